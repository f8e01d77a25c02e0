//! CAN Supervisor Daemon - Main Entry Point

use can_supervisor::{
    init_logging, CoreEvent, SlcanBridge, SocketCanIo, Supervisor, SupervisorSettings,
};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_logging();

    info!("=== CAN Supervisor v{} ===", env!("CARGO_PKG_VERSION"));
    let settings = SupervisorSettings::load(std::env::args().nth(1).as_deref())?;

    let bridge = SlcanBridge::new(Duration::from_millis(settings.interface.command_timeout_ms));
    let handle = Supervisor::spawn(settings, bridge, SocketCanIo::new());
    let mut events = handle.subscribe();

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => log_event(&event),
                Err(RecvError::Lagged(n)) => warn!("event stream lagged, {} events dropped", n),
                Err(RecvError::Closed) => break,
            }
        }
    }

    info!("shutting down");
    handle.shutdown().await;
    Ok(())
}

/// Render each core event as a JSON line for downstream consumers
fn log_event(event: &CoreEvent) {
    let rendered = serde_json::to_string(event).unwrap_or_default();
    match event {
        CoreEvent::FrameRow(_) => debug!("event {}", rendered),
        _ => info!("event {}", rendered),
    }
}
