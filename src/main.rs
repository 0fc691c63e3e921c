//! ItemReminder client - Main Entry Point
//!
//! Connects to the configured broker, listens for commands and publishes
//! reminder notifications until interrupted.

use clap::{Parser, Subcommand};
use itemreminder_mqtt::config::{ClientConfig, ConfigError};
use itemreminder_mqtt::error::{ClientError, ClientResult, ConnectError};
use itemreminder_mqtt::observability::{init_logging, LoggingOptions};
use itemreminder_mqtt::protocol::{Command, Message, QoS, Reminder};
use itemreminder_mqtt::scheduler::{Schedule, ScheduledPublisher};
use itemreminder_mqtt::session::{LoggingObserver, SessionManager, SessionState};
use itemreminder_mqtt::transport::mqtt::MqttConnector;
use itemreminder_mqtt::transport::BrokerConnector;
use std::path::{Path, PathBuf};
use std::process;
use std::sync::Arc;
use tokio::signal;
use tracing::{error, info, warn, Level};

const DEFAULT_CONFIG_PATHS: [&str; 2] = ["itemreminder.toml", "config/itemreminder.toml"];

/// ItemReminder MQTT client
#[derive(Parser)]
#[command(name = "itemreminder-client")]
#[command(about = "Publishes ItemReminder notifications and listens for device commands")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "FILE", env = "ITEMREMINDER_CONFIG")]
    config: Option<PathBuf>,

    /// Verbose logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Connect and run until SIGINT/SIGTERM
    Run,
    /// Validate configuration
    Config {
        /// Show current configuration
        #[arg(long)]
        show: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let mut logging = LoggingOptions::from_env();
    match cli.verbose {
        0 => {}
        1 => logging.level = Level::DEBUG,
        _ => logging.level = Level::TRACE,
    }
    if let Err(e) = init_logging(&logging) {
        eprintln!("Failed to initialize logging: {e}");
    }

    info!("Starting ItemReminder client v{}", env!("CARGO_PKG_VERSION"));

    let result = match load_configuration(cli.config.as_deref()) {
        Ok(config) => match cli.command {
            Commands::Run => run_client(config).await,
            Commands::Config { show } => handle_config_command(&config, show),
        },
        Err(e) => Err(e),
    };

    if let Err(e) = result {
        error!("Command failed: {}", e);
        process::exit(exit_code(&e));
    }

    info!("Application shutdown complete");
}

fn exit_code(error: &ClientError) -> i32 {
    match error {
        ClientError::Config(_) => 2,
        ClientError::Connect(ConnectError::AuthRejected) => 3,
        _ => 1,
    }
}

fn load_configuration(config_path: Option<&Path>) -> ClientResult<ClientConfig> {
    if let Some(path) = config_path {
        info!("Loading configuration from: {}", path.display());
        return Ok(ClientConfig::load_from_file(path)?);
    }

    for path_str in DEFAULT_CONFIG_PATHS {
        let path = PathBuf::from(path_str);
        if path.exists() {
            info!("Loading configuration from: {}", path.display());
            return Ok(ClientConfig::load_from_file(&path)?);
        }
    }

    Err(ConfigError::FileRead(std::io::Error::new(
        std::io::ErrorKind::NotFound,
        "no configuration file found; pass -c/--config or create itemreminder.toml",
    ))
    .into())
}

fn handle_config_command(config: &ClientConfig, show: bool) -> ClientResult<()> {
    if show {
        println!("Current configuration:");
        println!("{}", config.redacted().to_toml_string()?);
    }

    info!(endpoint = %config.endpoint()?, "Configuration validation complete");
    Ok(())
}

async fn run_client(config: ClientConfig) -> ClientResult<()> {
    let endpoint = config.endpoint()?;
    let credentials = config.credentials()?;
    let settings = config.session_settings();
    info!(client_id = %settings.client_id, endpoint = %endpoint, "Client starting");

    let session = Arc::new(SessionManager::new(
        MqttConnector::new(),
        settings,
        Arc::new(LoggingObserver),
    ));
    session.on_message(handle_command).await;

    session
        .connect(endpoint, credentials, config.keepalive())
        .await?;
    session
        .subscribe(&config.topics.command, QoS::AtLeastOnce)
        .await?;

    let mut publisher = config.reminder_schedule().map(|reminders| {
        let priority = reminders.priority;
        ScheduledPublisher::start(
            Arc::clone(&session),
            Schedule::from(&reminders),
            move |sequence| {
                Reminder::example(sequence, priority)
                    .to_payload()
                    .unwrap_or_else(|e| {
                        warn!(sequence, error = %e, "Failed to encode reminder");
                        Vec::new()
                    })
            },
        )
    });

    let mut sigint = signal::unix::signal(signal::unix::SignalKind::interrupt())?;
    let mut sigterm = signal::unix::signal(signal::unix::SignalKind::terminate())?;

    info!("Client is running, waiting for commands on {}", config.topics.command);

    let permanently_lost = tokio::select! {
        _ = sigint.recv() => {
            info!("Received SIGINT, shutting down gracefully...");
            false
        }
        _ = sigterm.recv() => {
            info!("Received SIGTERM, shutting down gracefully...");
            false
        }
        _ = wait_for_permanent_disconnect(&session) => {
            error!("MQTT connection permanently lost, shutting down client...");
            true
        }
    };

    if let Some(publisher) = publisher.as_mut() {
        publisher.stop().await;
        info!(stats = ?publisher.stats(), "Reminder schedule finished");
    }
    session.disconnect(true).await;

    if permanently_lost {
        return Err(ConnectError::ConnectionLost.into());
    }
    Ok(())
}

fn handle_command(message: &Message) {
    match Command::parse(&message.payload) {
        command @ Command::Json(_) => info!(
            topic = %message.topic,
            action = command.action().unwrap_or("<none>"),
            "Received command"
        ),
        Command::Text(text) => info!(topic = %message.topic, "Received text command: {}", text),
    }
}

/// Resolve once the session gave up reconnecting
async fn wait_for_permanent_disconnect<C: BrokerConnector>(session: &SessionManager<C>) {
    let mut states = session.watch_state();
    loop {
        if states.changed().await.is_err() {
            return;
        }
        let state = *states.borrow_and_update();
        if state == SessionState::Disconnected && session.is_permanently_disconnected().await {
            return;
        }
    }
}
