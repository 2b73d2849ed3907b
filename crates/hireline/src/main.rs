//! Hireline: command-line client for the recruiting sync layer
//!
//! Subcommands:
//! - `fetch`: print a collection, served from cache when fresh
//! - `watch`: stream realtime snapshots for a query
//! - `conversations`: stream the conversation list with unread counts
//! - `send`: send a message optimistically and wait for the server id
//! - `unread`: print notification counts

use clap::{Parser, Subcommand};
use hireline_api::{Constraint, SubscriptionKey};
use hireline_store::model::conversation_key;
use hireline_store::{EntityKind, Message, Stores, SyncConfig};
use miette::{IntoDiagnostic, Result, miette};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod constraints;
mod watch;

use constraints::{parse_order_by, parse_where};

#[derive(Parser)]
#[command(name = "hireline")]
#[command(about = "Recruiting data sync client", long_about = None)]
struct Cli {
    /// Base URL of the REST API
    #[arg(long, env = "HIRELINE_API_URL", global = true, default_value = "http://localhost:3000")]
    api_url: String,

    /// API version path segment
    #[arg(long, env = "HIRELINE_API_VERSION", global = true, default_value = "v1")]
    api_version: String,

    /// WebSocket URL of the realtime provider
    #[arg(long, env = "HIRELINE_REALTIME_URL", global = true)]
    realtime_url: Option<String>,

    /// Bearer token for both backends
    #[arg(long, env = "HIRELINE_TOKEN", global = true, hide_env_values = true)]
    token: Option<String>,

    /// Total timeout for a single REST request, in seconds
    #[arg(long, global = true, default_value = "30")]
    timeout: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a collection as a JSON array
    Fetch {
        /// Entity kind, e.g. jobs or candidate
        kind: EntityKind,
    },

    /// Print a JSON line for every realtime snapshot of a query
    Watch {
        /// Entity kind; also the collection path
        kind: EntityKind,

        /// Filter as field=value, or field~value for array contains
        #[arg(long = "where", value_name = "FILTER", value_parser = parse_where)]
        filters: Vec<Constraint>,

        /// Sort as field or field:desc
        #[arg(long, value_name = "FIELD[:DIR]", value_parser = parse_order_by)]
        order_by: Vec<Constraint>,

        /// Maximum number of documents per snapshot
        #[arg(long)]
        limit: Option<u32>,
    },

    /// Print the conversation list each time it changes
    Conversations {
        /// Only this conversation
        #[arg(long)]
        conversation: Option<String>,

        /// Count unread messages addressed to this user
        #[arg(long)]
        viewer: Option<String>,
    },

    /// Send a message
    Send {
        /// Sender user id
        #[arg(long)]
        from: String,

        /// Recipient user id
        #[arg(long)]
        to: String,

        /// Message text
        #[arg(long)]
        text: String,

        /// Conversation id (defaults to the sender/recipient pair)
        #[arg(long)]
        conversation: Option<String>,
    },

    /// Print notification counts
    Unread,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Logs go to stderr; stdout carries JSON
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".to_string()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let mut config = SyncConfig::new(&cli.api_url)
        .api_version(&cli.api_version)
        .request_timeout_secs(cli.timeout);
    if let Some(url) = &cli.realtime_url {
        config = config.realtime_url(url);
    }
    if let Some(token) = &cli.token {
        config = config.token(token);
    }
    let stores = Stores::from_config(&config).into_diagnostic()?;

    match cli.command {
        Commands::Fetch { kind } => {
            let rows = stores.fetch_json(kind).await.into_diagnostic()?;
            watch::print_line(&rows)
        }

        Commands::Watch {
            kind,
            filters,
            order_by,
            limit,
        } => {
            let constraints = filters
                .into_iter()
                .chain(order_by)
                .chain(limit.map(Constraint::limit));
            let key = SubscriptionKey::new(kind.collection(), constraints);
            watch::watch(&stores, kind, key).await
        }

        Commands::Conversations {
            conversation,
            viewer,
        } => {
            let key = SubscriptionKey::new(
                EntityKind::Message.collection(),
                conversation.map(|id| Constraint::equals("conversationId", id)),
            );
            watch::conversations(&stores, Some(key), viewer).await
        }

        Commands::Send {
            from,
            to,
            text,
            conversation,
        } => {
            let conversation = conversation.unwrap_or_else(|| conversation_key(&from, &to));
            let submission = stores
                .outbox
                .submit(Message::draft(conversation, from, to, text));
            tracing::info!(temp_id = %submission.temp_id, "message queued");

            let sent = submission
                .settled()
                .await
                .map_err(|e| miette!("failed to send message: {}", e))?;
            watch::print_line(&sent)
        }

        Commands::Unread => {
            stores.notifications.fetch_if_needed().await.into_diagnostic()?;
            watch::print_line(&stores.notification_summary())
        }
    }
}
