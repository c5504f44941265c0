use std::{path::PathBuf, sync::Arc};

use clap::{Parser, Subcommand};
use drydock::{
    config::SystemConfig,
    event::{EventLogger, OperationLogger, TracingLogger},
    provider::{
        hook_fn, ConnectionLifecycle, ConnectionRef, ContainerConnection, ProviderDescriptor,
        ProviderLifecycle, ProviderStatus,
    },
    system::System,
    Error, InternalResult,
};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "drydock.json", env = "DRYDOCK_CONFIG")]
    config: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate the config file and print the effective values
    CheckConfig,
    /// Register a demo provider and drive it through its lifecycle
    Simulate,
    /// Start the core and wait for Ctrl+C
    Run,
}

fn load_config(cli: &Cli) -> InternalResult<SystemConfig> {
    if cli.config.exists() {
        Ok(SystemConfig::from_file(&cli.config)?)
    } else {
        Ok(SystemConfig::default())
    }
}

fn init_tracing(config: &SystemConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_filter.as_str()));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();
}

fn demo_provider() -> ProviderDescriptor {
    let lifecycle = ProviderLifecycle::default()
        .with_start(hook_fn(|logger| async move {
            logger.log("booting demo machine");
            Ok(())
        }))
        .with_stop(hook_fn(|logger| async move {
            logger.log("halting demo machine");
            Ok(())
        }));
    ProviderDescriptor::new("demo", "Demo Engine")
        .with_status(ProviderStatus::Configured)
        .with_version("1.0.0")
        .with_lifecycle(lifecycle)
}

fn demo_connection() -> ContainerConnection {
    let lifecycle = ConnectionLifecycle::default()
        .with_start(hook_fn(|_| async { Ok(()) }))
        .with_stop(hook_fn(|_| async { Ok(()) }));
    ContainerConnection::new("demo-machine", "unix:///run/demo/demo.sock")
        .with_display_name("Demo Machine")
        .with_lifecycle(lifecycle)
}

fn print_json<T: serde::Serialize>(label: &str, value: &T) -> InternalResult<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| Error::internal(format!("Failed to serialize {}: {}", label, e)))?;
    println!("{}:\n{}", label, text);
    Ok(())
}

async fn simulate(system: &System) -> InternalResult<()> {
    let registry = system.providers();
    let (id, handle) = registry.register(demo_provider())?;
    let _connection = registry.register_container_connection(id, demo_connection())?;
    let connection = ConnectionRef::container("demo-machine", "unix:///run/demo/demo.sock");

    let logger: Arc<dyn OperationLogger> = Arc::new(EventLogger::new("simulate", system.event_bus()));
    registry.start_provider(id, logger.clone()).await?;
    registry
        .start_provider_connection(id, &connection, Arc::new(TracingLogger::new("start-connection")))
        .await?;
    print_json("providers", &registry.get_provider_infos())?;
    println!("tray: {}", system.tray().global_status());

    registry
        .stop_provider_connection(id, &connection, Arc::new(TracingLogger::new("stop-connection")))
        .await?;
    registry.stop_provider(id, logger).await?;
    println!("tray: {}", system.tray().global_status());

    handle.dispose();
    debug!(remaining = registry.provider_count(), "demo provider unregistered");
    Ok(())
}

async fn run(cli: &Cli, config: SystemConfig) -> InternalResult<()> {
    let system = System::new(config)?;
    system.start();

    match cli.command {
        Command::CheckConfig => print_json("config", system.config())?,
        Command::Simulate => simulate(&system).await?,
        Command::Run => {
            let started = system.providers().run_autostart().await;
            info!(started, "core running, press Ctrl+C to stop");
            tokio::signal::ctrl_c()
                .await
                .map_err(|e| Error::internal(format!("Failed to wait for Ctrl+C: {}", e)))?;
            println!("Shutdown signal received, performing clean shutdown...");
        }
    }

    system.shutdown().await
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match load_config(&cli) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    };
    init_tracing(&config);
    info!("config loaded.");

    if let Err(e) = run(&cli, config).await {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
