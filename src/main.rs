#![forbid(unsafe_code)]

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use secrecy::SecretString;
use tracing::{error, info, warn};

mod cache;
mod cli;
mod config;
mod db;
mod forwarder;
mod graph;
mod service;
mod utils;
mod web;

use cli::{Cli, Commands};
use config::Config;
use db::DatabaseManager;
use forwarder::Forwarder;
use graph::GraphClient;
use service::Services;
use utils::error::{AppError, AppResult};
use web::{WebServer, metrics::Metrics};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // needs neither config nor database
    if let Commands::HashPassword { password } = cli.command() {
        println!("{}", hash_password(password)?);
        return Ok(ExitCode::SUCCESS);
    }

    let config = match Config::load_from_file(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load {}: {}", cli.config.display(), err);
            return Ok(ExitCode::FAILURE);
        }
    };

    if *cli.command() == Commands::ValidateConfig {
        println!(
            "configuration OK ({} backend, database {})",
            db::DbType::from(config.database.db_type()).as_str(),
            config.database.redacted_url()
        );
        return Ok(ExitCode::SUCCESS);
    }

    utils::logging::init_tracing(&config.logging);
    Metrics::start();

    let db_manager = Arc::new(DatabaseManager::new(&config.database).await?);
    db_manager.migrate().await?;

    match cli.command() {
        Commands::Serve => serve(&config, db_manager).await?,
        Commands::ForwardOnce => {
            let forwarder = build_forwarder(&config, db_manager)?;
            let summary = forwarder.run_once().await.map_err(AppError::from)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }
        Commands::Diagnose { company } => {
            let report = service::diagnose(&db_manager, *company)
                .await
                .map_err(AppError::from)?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Status => {
            let counts = Services::new(db_manager)
                .messaging
                .queue_counts()
                .await
                .map_err(AppError::from)?;
            println!("{}", serde_json::to_string_pretty(&counts)?);
        }
        Commands::ValidateConfig | Commands::HashPassword { .. } => {}
    }

    Ok(ExitCode::SUCCESS)
}

fn hash_password(password: &str) -> AppResult<String> {
    let secret = SecretString::from(password.to_string());
    utils::password::hash_password(&secret).map_err(AppError::Password)
}

fn build_forwarder(config: &Config, db: Arc<DatabaseManager>) -> AppResult<Arc<Forwarder>> {
    let sender = Arc::new(GraphClient::new(&config.graph)?);
    let forwarder = Forwarder::new(db, sender, &config.forwarder)?;
    Ok(Arc::new(forwarder))
}

async fn serve(config: &Config, db_manager: Arc<DatabaseManager>) -> Result<()> {
    info!("shopdesk starting up");

    let forwarder = if config.forwarder.enabled {
        Some(build_forwarder(config, db_manager.clone())?)
    } else {
        warn!("outbound forwarder is disabled; pending messages will not be sent");
        None
    };

    let web_server = WebServer::new(
        config.server.clone(),
        Services::new(db_manager.clone()),
        forwarder.clone(),
    );

    let web_handle = tokio::spawn(async move { web_server.start().await });

    let forwarder_handle = tokio::spawn(async move {
        match forwarder {
            Some(forwarder) => forwarder.run().await,
            None => std::future::pending::<()>().await,
        }
    });

    tokio::pin!(web_handle);
    tokio::pin!(forwarder_handle);

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("received Ctrl+C, beginning shutdown");
            Ok(())
        },
        joined = &mut web_handle => {
            info!("web server task exited, beginning shutdown");
            match joined {
                Ok(result) => result,
                Err(e) => Err(e.into()),
            }
        },
        _ = &mut forwarder_handle => {
            info!("forwarder task exited, beginning shutdown");
            Ok(())
        },
    };

    web_handle.abort();
    forwarder_handle.abort();

    if let Err(e) = &outcome {
        error!("web server error: {}", e);
    }
    info!("shopdesk shutting down");
    outcome
}
