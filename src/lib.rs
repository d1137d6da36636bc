pub mod agent;
pub mod db;
pub mod monitoring;
pub mod screentime;
pub mod sensing;
pub mod settings;
pub mod utils;

use std::time::Duration;

use anyhow::{Context, Result};
use log::{error, info};

pub use agent::{Agent, Collaborators, ResetHandle};
pub use settings::{AgentPaths, AgentSettings};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

pub fn run() {
    if let Err(err) = utils::logging::init_logging() {
        eprintln!("ProcGuard: {err:#}");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("procguard-worker")
        .build()
    {
        Ok(runtime) => runtime,
        Err(err) => {
            error!("Failed to start async runtime: {err}");
            std::process::exit(1);
        }
    };

    if let Err(err) = runtime.block_on(run_agent()) {
        error!("ProcGuard stopped: {err:#}");
        std::process::exit(1);
    }
}

async fn run_agent() -> Result<()> {
    let paths = AgentPaths::resolve()?;
    paths.ensure_exists()?;
    let settings = AgentSettings::load(&paths.settings());
    info!("ProcGuard starting up...");

    let agent = Agent::start(settings, paths)
        .await
        .context("failed to start agent")?;

    let mut health_ticker = tokio::time::interval(HEALTH_LOG_INTERVAL);
    health_ticker.tick().await;

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                if let Err(err) = signal {
                    error!("Failed to listen for shutdown signal: {err}");
                }
                info!("Shutdown requested");
                break;
            }
            _ = health_ticker.tick() => {
                let health = agent.health();
                if health.is_healthy {
                    info!(
                        "Monitoring healthy: {} subscriber(s), last tick {:?}",
                        health.subscriber_count, health.last_tick
                    );
                } else {
                    error!(
                        "Monitoring unhealthy: state {}, {} consecutive failure(s)",
                        health.state.as_str(),
                        health.consecutive_failures
                    );
                }
            }
        }
    }

    agent.shutdown().await
}
