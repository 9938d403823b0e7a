use std::sync::Arc;

use clap::{Parser, Subcommand};
use lib::assistant::{AssistantClient, ThreadsApi};
use lib::channels::{ChannelEvent, ChatTransport, DiscordChannel};
use lib::lifecycle::LifecycleController;
use lib::router::Router;
use lib::session::SessionStore;
use tokio::sync::mpsc;

#[derive(Parser)]
#[command(name = "quill")]
#[command(about = "Quill — Discord assistant bridge", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show version
    Version,

    /// Create the configuration directory and a default config file.
    Init {
        /// Config file path (default: QUILL_CONFIG_PATH or ~/.quill/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },

    /// Run the bridge: connect to Discord, register commands, and route
    /// messages through the assistant backend.
    Run {
        /// Config file path (default: QUILL_CONFIG_PATH or ~/.quill/config.json)
        #[arg(long, short, value_name = "PATH")]
        config: Option<std::path::PathBuf>,
    },
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Version) => {
            println!("quill {}", env!("CARGO_PKG_VERSION"));
        }
        Some(Commands::Init { config }) => {
            if let Err(e) = run_init(config) {
                log::error!("init failed: {}", e);
                std::process::exit(1);
            }
        }
        Some(Commands::Run { config }) => {
            if let Err(e) = run_bridge(config).await {
                log::error!("bridge failed: {:#}", e);
                std::process::exit(1);
            }
        }
        None => {
            println!("Run with --help for usage");
        }
    }
}

fn run_init(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let path = config_path.unwrap_or_else(lib::config::default_config_path);
    let dir = lib::init::init_config_dir(&path)?;
    println!("initialized configuration at {}", dir.display());
    Ok(())
}

async fn run_bridge(config_path: Option<std::path::PathBuf>) -> anyhow::Result<()> {
    let (config, path) = lib::config::load_config(config_path)?;

    let bot_token = lib::config::resolve_bot_token(&config)
        .ok_or_else(|| anyhow::anyhow!("missing Discord bot token (set DISCORD_BOT_TOKEN or discord.botToken)"))?;
    let application_id = lib::config::resolve_application_id(&config)
        .ok_or_else(|| anyhow::anyhow!("missing Discord application id (set DISCORD_APPLICATION_ID or discord.applicationId)"))?;
    let api_key = lib::config::resolve_api_key(&config)
        .ok_or_else(|| anyhow::anyhow!("missing assistant API key (set OPENAI_API_KEY or assistant.apiKey)"))?;
    let assistant_id = lib::config::resolve_assistant_id(&config)
        .ok_or_else(|| anyhow::anyhow!("missing assistant id (set ASSISTANT_ID or assistant.assistantId)"))?;

    let store_path = lib::config::resolve_store_path(&config, &path);
    log::info!("session store at {}", store_path.display());
    let store = Arc::new(SessionStore::new(store_path));

    let api: Arc<dyn ThreadsApi> = Arc::new(AssistantClient::new(
        api_key,
        assistant_id,
        config.assistant.base_url.clone(),
    ));

    let discord = Arc::new(DiscordChannel::new(bot_token, application_id));
    discord
        .register_commands()
        .await
        .map_err(anyhow::Error::msg)?;
    let transport: Arc<dyn ChatTransport> = discord.clone();

    let router = Arc::new(Router::new(
        store.clone(),
        api.clone(),
        transport.clone(),
        config.assistant.poll_policy(),
    ));
    let lifecycle = Arc::new(LifecycleController::new(store, api, transport));

    let (event_tx, mut event_rx) = mpsc::channel::<ChannelEvent>(64);
    let gateway = discord.clone().start_inbound(event_tx);

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("shutting down");
                break;
            }
            event = event_rx.recv() => {
                let event = match event {
                    Some(e) => e,
                    None => break,
                };
                match event {
                    ChannelEvent::Message(msg) => {
                        // The router serializes per channel; spawning keeps
                        // other channels responsive during a slow run.
                        let router = router.clone();
                        tokio::spawn(async move {
                            router.handle_message(msg).await;
                        });
                    }
                    ChannelEvent::Command(cmd) => {
                        let lifecycle = lifecycle.clone();
                        tokio::spawn(async move {
                            lifecycle.handle_command(cmd).await;
                        });
                    }
                }
            }
        }
    }

    discord.stop();
    let _ = gateway.await;
    Ok(())
}
