use std::time::Duration;

use clap::Parser;
use saml_bridge::{
    AppState, build_app,
    config::BridgeConfig,
    db::DbPool,
    models::DEFAULT_APP_ID,
    observability::init_tracing,
    services::sweeper::{SweepSettings, start_sweeper},
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};

/// CLI arguments for the SAML bridge
#[derive(Parser, Debug)]
#[command(version, about = "SAML 2.0 SSO bridge", long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// Path to config file. Without one the bridge runs in memory with
    /// default settings.
    #[arg(short, long, global = true)]
    config: Option<String>,
}

#[derive(clap::Subcommand, Debug)]
enum Command {
    /// Start the server (default)
    Serve,
    /// Run database migrations and exit
    ///
    /// Useful for init containers or CI/CD pipelines.
    Migrate,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    match args.command {
        Some(Command::Migrate) => run_migrate(args.config.as_deref()).await,
        Some(Command::Serve) | None => run_server(args.config.as_deref()).await,
    }
}

fn load_config(path: Option<&str>) -> BridgeConfig {
    let Some(path) = path else {
        return BridgeConfig::default();
    };
    match BridgeConfig::from_file(path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load config {}: {}", path, e);
            std::process::exit(1);
        }
    }
}

/// Run database migrations and exit.
async fn run_migrate(config_path: Option<&str>) {
    let config = load_config(config_path);

    if let Err(e) = init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
    }

    if config.database.is_none() {
        eprintln!("Error: No database configured. Nothing to migrate.");
        std::process::exit(1);
    }

    let db = match DbPool::from_config(&config.database).await {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Failed to connect to database: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = db.run_migrations().await {
        eprintln!("Failed to run migrations: {}", e);
        std::process::exit(1);
    }

    db.close().await;
    tracing::info!("Migrations completed successfully");
}

async fn run_server(config_path: Option<&str>) {
    let config = load_config(config_path);

    if let Err(e) = init_tracing(&config.observability) {
        eprintln!("Failed to initialize tracing: {}", e);
        std::process::exit(1);
    }

    if config_path.is_none() {
        tracing::warn!("No config file given, running in memory with default settings");
    }

    let state = match AppState::new(config.clone()).await {
        Ok(state) => state,
        Err(e) => {
            tracing::error!(error = %e, "Failed to initialize application");
            std::process::exit(1);
        }
    };

    // Generate the default app's SP certificate before the first login needs it.
    state.services.certificates.for_app(DEFAULT_APP_ID);

    let task_tracker = TaskTracker::new();
    let shutdown = CancellationToken::new();
    task_tracker.spawn(start_sweeper(
        state.db.clone(),
        SweepSettings::from(&config.saml),
        shutdown.clone(),
    ));

    let db = state.db.clone();
    let app = build_app(&config, state);

    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = match tokio::net::TcpListener::bind(&bind_addr).await {
        Ok(listener) => listener,
        Err(e) => {
            tracing::error!(address = %bind_addr, error = %e, "Failed to bind");
            std::process::exit(1);
        }
    };

    tracing::info!("Server listening on http://{}", bind_addr);

    // Graceful shutdown: wait for SIGINT/SIGTERM, then wait for background tasks
    if let Err(e) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(task_tracker, shutdown))
        .await
    {
        tracing::error!(error = %e, "Server error");
        std::process::exit(1);
    }

    db.close().await;
    tracing::info!("Shutdown complete");
}

async fn shutdown_signal(task_tracker: TaskTracker, shutdown: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received, waiting for background tasks to complete...");

    shutdown.cancel();
    task_tracker.close();

    match tokio::time::timeout(Duration::from_secs(30), task_tracker.wait()).await {
        Ok(()) => tracing::info!("All background tasks completed"),
        Err(_) => {
            tracing::warn!("Timeout waiting for background tasks, some may not have completed")
        }
    }
}
