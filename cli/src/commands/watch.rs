//! Follow the realtime connection

use anyhow::Result;
use stoat_core::{ActivityLog, ClientSettings, ServerEvent};
use stoat_networking::{ConnectionManager, ReconnectPolicy, TungsteniteConnector};
use tracing::{debug, info};

pub async fn run(settings: &ClientSettings) -> Result<()> {
    let manager = ConnectionManager::new(
        TungsteniteConnector,
        ReconnectPolicy::from_settings(&settings.reconnect),
    );
    let mut states = manager.subscribe_state();
    let mut messages = manager.subscribe_messages();
    let mut activity = ActivityLog::default();

    manager.connect(settings.ws_url.clone());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted, closing connection");
                break;
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                match manager.retry_attempt() {
                    0 => info!("{}", state),
                    attempt => info!("{} (attempt {})", state, attempt),
                }
            }
            changed = messages.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(message) = messages.borrow_and_update().clone() else {
                    continue;
                };
                match ServerEvent::parse(&message.payload) {
                    Some(event) => {
                        let entry = activity.push(event);
                        info!(id = entry.id, "{}: {}", entry.event_type.label(), entry.details);
                    }
                    None => debug!("Ignoring non-event frame #{}", message.seq),
                }
            }
        }
    }

    manager.shutdown().await;
    info!("Saw {} events", activity.len());
    Ok(())
}
