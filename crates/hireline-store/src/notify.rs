//! User-facing notification surface for mutation results.

use tracing::{info, warn};

/// Receives one message per resolved mutation, e.g. to show a toast.
pub trait Notifier: Send + Sync + 'static {
    fn success(&self, message: &str);

    fn error(&self, message: &str);
}

/// Writes notifications to the log.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn success(&self, message: &str) {
        info!(target: "hireline::notify", "{}", message);
    }

    fn error(&self, message: &str) {
        warn!(target: "hireline::notify", "{}", message);
    }
}
