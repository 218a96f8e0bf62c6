use clap::Parser;
use mxctl::{Application, Config, config::Command, telemetry};

/// Wait for shutdown signal (SIGTERM or Ctrl+C)
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, shutting down gracefully...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, shutting down gracefully...");
        },
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Install rustls crypto provider before anything else that might build a TLS client
    rustls::crypto::aws_lc_rs::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("Failed to install rustls crypto provider"))?;

    let args = mxctl::config::Args::parse();
    let config = Config::load(&args)?;

    if args.validate {
        println!("Configuration is valid.");
        return Ok(());
    }

    telemetry::init_telemetry(config.enable_otel_export)?;
    tracing::debug!("{:?}", args);

    let result = match args.command.clone().unwrap_or(Command::Serve) {
        Command::Serve => {
            return Application::new(config).await?.serve(shutdown_signal()).await;
        }
        Command::CommunicateWithPublicApi => mxctl::communicate_with_public_api(&config).await,
        Command::LoadInitialData { admin_username } => {
            let admin_username = admin_username.unwrap_or_else(|| config.admin_username.clone());
            let pool = mxctl::db::pool::connect(&config.database).await?;
            mxctl::migrator().run(&pool).await?;
            let data = mxctl::load_initial_data(&pool, &admin_username, &config.admin_password, &config.auth.password).await?;
            if data.admin_created {
                println!("Created super administrator '{admin_username}'.");
            } else {
                println!("Super administrator '{admin_username}' already exists.");
            }
            pool.close().await;
            Ok(())
        }
    };

    telemetry::shutdown_telemetry();
    result
}
