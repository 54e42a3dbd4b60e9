use anyhow::Context;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::sync::mpsc;

use mpv_engine::bridge::Bridge;
use mpv_engine::{Engine, EngineConfig, ExitTrigger};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Stdout carries the UI protocol, so logs go to stderr
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();

    log::info!("Starting mpv playback engine");

    let config = match std::env::args().nth(1) {
        Some(path) => EngineConfig::load(&path).with_context(|| format!("Failed to load config {}", path))?,
        None => EngineConfig::default(),
    }
    .with_env_overrides();
    log::info!("Using player binary {:?}", config.binary());

    let engine = Arc::new(Engine::with_system_launcher(config));

    // Signals only hand a trigger to the async side; cleanup runs there
    let (exit_tx, exit_rx) = mpsc::unbounded_channel();
    ctrlc::set_handler(move || {
        log::info!("Received interrupt signal, shutting down player...");
        if exit_tx.send(ExitTrigger::Interrupt).is_err() {
            log::warn!("Shutdown already underway");
        }
    })
    .context("Failed to set Ctrl+C handler")?;

    let engine_for_panic = engine.clone();
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        log::error!("Panic, killing player: {}", info);
        engine_for_panic.emergency_shutdown(ExitTrigger::Panic);
        default_hook(info);
    }));

    if !engine.initialize().await {
        log::error!("Player failed to start; waiting for UI commands anyway");
    }

    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let forwarder = Bridge::forward_events(engine.subscribe(), out_tx.clone());
    let writer = tokio::spawn(Bridge::write_outgoing(out_rx, tokio::io::stdout()));

    let bridge = Bridge::new(engine.clone(), out_tx);
    let trigger = bridge
        .run(BufReader::new(tokio::io::stdin()), exit_rx)
        .await;

    log::info!("Exiting on {}", trigger);
    if engine.shutdown(trigger).await {
        log::info!("Player stopped");
    }

    // The writer returns once every sender is gone and the queue is flushed
    forwarder.abort();
    let _ = forwarder.await;
    drop(bridge);
    if tokio::time::timeout(Duration::from_secs(1), writer).await.is_err() {
        log::warn!("Timed out flushing UI output");
    }

    // A blocked stdin read would otherwise hold the runtime open
    std::process::exit(0)
}
