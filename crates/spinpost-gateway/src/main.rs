use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use spinpost_campaign::{CampaignService, EntitlementGate, Orchestrator, OrchestratorSettings};
use spinpost_core::config::SpinpostConfig;
use spinpost_scheduler::{SchedulerEngine, ScheduleStore};
use spinpost_store::{open_repository, CampaignStore, StateStore};
use spinpost_transfer::MediaArchive;
use tracing::{info, warn};

mod app;
mod clients;
mod http;
mod ws;

#[cfg(test)]
mod test_support;

/// Partially assembled uploads untouched for this long are dropped.
const UPLOAD_IDLE: Duration = Duration::from_secs(15 * 60);

#[derive(Parser)]
#[command(name = "spinpost-gateway", version, about = "Campaign posting gateway")]
struct Cli {
    /// Config file (defaults to ~/.spinpost/spinpost.toml)
    #[arg(long, env = "SPINPOST_CONFIG")]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "spinpost_gateway=info,spinpost_campaign=info,spinpost_scheduler=info,tower_http=debug"
                    .into()
            }),
        )
        .init();

    let cli = Cli::parse();
    let config = SpinpostConfig::load(cli.config.as_deref()).unwrap_or_else(|e| {
        warn!("Config load failed ({}), using defaults", e);
        SpinpostConfig::default()
    });

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;

    // one repository for every subsystem; memory-only if the file won't open
    info!(path = %config.database.path, "opening state database");
    let (repo, durable) = open_repository(&config.database.path);

    // cold start: stale run flags are cleared, then half-run records closed out
    let state = Arc::new(StateStore::hydrate(repo.clone()));
    let campaigns = CampaignStore::new(repo.clone());
    match campaigns.recover_interrupted() {
        Ok(0) => {}
        Ok(n) => info!(recovered = n, "closed out interrupted campaigns"),
        Err(e) => warn!(error = %e, "could not recover interrupted campaigns"),
    }

    let archive = MediaArchive::new(repo.clone());
    let entitlement = Arc::new(EntitlementGate::new(
        Arc::new(clients::entitlement::HttpEntitlementService::new(&config.entitlement)),
        config.entitlement.account_id.clone(),
    ));
    if config.entitlement.account_id.is_empty() {
        warn!("entitlement.account_id is not set; campaign starts will be refused");
    }
    let driver = Arc::new(clients::driver::HttpDriver::new(&config.driver));

    let orchestrator = Arc::new(Orchestrator::new(
        state.clone(),
        campaigns,
        archive.clone(),
        driver.clone(),
        driver,
        entitlement,
        OrchestratorSettings::from(&config.orchestrator),
    ));
    let service = CampaignService::new(orchestrator);

    let schedules = Arc::new(ScheduleStore::new(
        repo,
        Duration::from_secs(config.scheduler.cache_ttl_secs),
    ));
    let scheduler_engine = SchedulerEngine::new(
        schedules.clone(),
        Arc::new(service.clone()),
        &config.scheduler,
    );

    let app_state = Arc::new(app::AppState::new(
        config,
        durable,
        state,
        service,
        schedules,
        archive,
    ));
    let router = app::build_router(app_state.clone());

    // spawn scheduler engine loop in background
    let (shutdown_tx, shutdown_rx) = tokio::sync::watch::channel(false);
    tokio::spawn(async move { scheduler_engine.run(shutdown_rx).await });

    // drop abandoned uploads
    let uploads_state = Arc::clone(&app_state);
    let mut uploads_shutdown = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(60));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let evicted = uploads_state.uploads.evict_idle(UPLOAD_IDLE);
                    if evicted > 0 {
                        info!(evicted, "evicted idle uploads");
                    }
                }
                _ = uploads_shutdown.changed() => break,
            }
        }
    });

    let addr: SocketAddr = format!("{}:{}", bind, port).parse()?;
    info!("Spinpost gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    // signal background loops to stop
    let _ = shutdown_tx.send(true);
    Ok(())
}
