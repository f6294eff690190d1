//! DoseWatch service binary: wires the store, gateway, and alerter into
//! the scheduler loop and runs until interrupted.

use std::sync::Arc;
use std::time::Duration;

use dosewatch::{
    Config, ConsoleAlerter, ConsoleGateway, DueDoseScanner, EngineSettings, EscalationEngine,
    ReminderDb, Scheduler,
};

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run().await {
        log::error!("{e}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), String> {
    let config = Config::load()?;
    let tz = config.tz()?;
    log::info!(
        "Starting DoseWatch (voice grace {}m, sms grace {}m, tick {}s, tz {})",
        config.voice_grace_minutes,
        config.sms_grace_minutes,
        config.tick_interval_secs,
        config.timezone
    );

    let db_path = config.resolve_db_path()?;
    let db = Arc::new(
        ReminderDb::open_at(&db_path).map_err(|e| format!("Failed to open database: {e}"))?,
    );
    log::info!("Database ready at {}", db_path.display());

    let settings = EngineSettings::from_config(&config)?;
    let engine = Arc::new(EscalationEngine::new(
        db.clone(),
        Arc::new(ConsoleGateway),
        Arc::new(ConsoleAlerter),
        settings,
    ));
    let scanner = DueDoseScanner::new(db, engine.clone(), tz);
    let scheduler = Scheduler::new(
        scanner,
        engine,
        Duration::from_secs(config.tick_interval_secs),
    );

    let handle = scheduler.start();

    tokio::signal::ctrl_c()
        .await
        .map_err(|e| format!("Failed to listen for shutdown signal: {e}"))?;
    log::info!("Shutdown requested");
    handle.shutdown().await;

    Ok(())
}
