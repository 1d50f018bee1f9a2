use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use livechat_client::config::{DEFAULT_CHANNEL_ID, DEFAULT_GUEST_NAME};
use livechat_client::telemetry::{DEFAULT_LOG_FILTER, init_tracing};
use livechat_client::{
    ActivityStore, ChannelSink, ChatConfig, ChatEngine, FileActivityStore, presentation,
};
use tokio::io::BufReader;
use tracing::info;

#[derive(Debug, Parser)]
#[command(
    name = "livechat",
    author,
    version,
    about = "Terminal visitor client for a live chat support channel"
)]
struct Cli {
    /// Backend origin the chat routes are served from.
    #[arg(long, env = "LIVECHAT_ORIGIN", default_value = "127.0.0.1:8069")]
    origin: String,

    /// Support channel to join.
    #[arg(long, env = "LIVECHAT_CHANNEL_ID", default_value_t = DEFAULT_CHANNEL_ID)]
    channel_id: i64,

    /// Name shown to the operator.
    #[arg(long, env = "LIVECHAT_GUEST_NAME", default_value = DEFAULT_GUEST_NAME)]
    guest_name: String,

    /// Base delay before a failed poll is retried.
    #[arg(long, env = "LIVECHAT_ERROR_DELAY_MS", default_value_t = 10_000)]
    error_delay_ms: u64,

    /// Where the activity record is kept. Defaults to ~/.livechat/activity.toml.
    #[arg(long, env = "LIVECHAT_STATE_FILE")]
    state_file: Option<PathBuf>,

    /// Keep nothing on disk; every run starts a new conversation.
    #[arg(long, env = "LIVECHAT_NO_PERSIST", default_value_t = false)]
    no_persist: bool,

    /// Tracing filter directives.
    #[arg(long, env = "LIVECHAT_LOG_FILTER", default_value = DEFAULT_LOG_FILTER)]
    log_filter: String,
}

impl TryFrom<&Cli> for ChatConfig {
    type Error = anyhow::Error;

    fn try_from(cli: &Cli) -> Result<Self, Self::Error> {
        ChatConfig::builder(cli.origin.clone())
            .channel_id(cli.channel_id)
            .guest_name(cli.guest_name.clone())
            .error_delay(Duration::from_millis(cli.error_delay_ms))
            .build()
            .with_context(|| format!("invalid chat configuration for origin {}", cli.origin))
    }
}

fn open_store(cli: &Cli) -> Result<Option<Arc<dyn ActivityStore>>> {
    if cli.no_persist {
        return Ok(None);
    }
    let path = match &cli.state_file {
        Some(path) => path.clone(),
        None => FileActivityStore::default_path().context("failed to locate activity store")?,
    };
    let store = FileActivityStore::open(&path)
        .with_context(|| format!("failed to open activity store at {}", path.display()))?;
    info!(target: "livechat::store", path = %store.path().display(), "activity store opened");
    Ok(Some(Arc::new(store)))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_filter);

    let config = ChatConfig::try_from(&cli)?;
    let store = open_store(&cli)?;
    let (sink, events) = ChannelSink::new();
    let engine = ChatEngine::connect(config, store, Arc::new(sink))
        .context("failed to build chat engine")?;

    let mut output = std::io::stdout();
    if !presentation::announce(&engine, &mut output).await? {
        return Ok(());
    }

    let input = BufReader::new(tokio::io::stdin());
    presentation::run(engine, events, input, output)
        .await
        .context("terminal session failed")?;
    Ok(())
}
