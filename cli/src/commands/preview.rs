//! Debounced effect previews driven by stdin

use anyhow::Result;
use serde_json::Value;
use std::time::Duration;
use stoat_engine::Debounced;
use stoat_networking::{api, StoatClient};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Slack after the last burst before giving up on a settle at end of input
const DRAIN_MARGIN: Duration = Duration::from_millis(50);

pub async fn run(client: StoatClient, effect_type: String, window_ms: i64) -> Result<()> {
    let debounced = Debounced::<Option<Value>>::from_millis(None, window_ms)?;
    let drain_after = debounced.window() + DRAIN_MARGIN;
    let mut settled = debounced.subscribe();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut input_open = true;
    let mut in_flight: Option<JoinHandle<()>> = None;

    info!("Reading {} parameters from stdin", effect_type);

    loop {
        tokio::select! {
            biased;

            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }

            changed = settled.changed() => {
                if changed.is_err() {
                    break;
                }
                let Some(parameters) = settled.borrow_and_update().clone() else {
                    continue;
                };
                if let Some(stale) = in_flight.take() {
                    stale.abort();
                    debug!("Superseded an in-flight preview");
                }
                let client = client.clone();
                let effect_type = effect_type.clone();
                in_flight = Some(tokio::spawn(async move {
                    match api::preview_effect(&client, &effect_type, &parameters).await {
                        Ok(filter) => println!("{}", filter),
                        Err(e) => error!("Preview failed: {}", e),
                    }
                }));
            }

            line = lines.next_line(), if input_open => {
                match line? {
                    Some(line) => {
                        let line = line.trim();
                        if line.is_empty() {
                            continue;
                        }
                        match serde_json::from_str::<Value>(line) {
                            Ok(parameters) if parameters.is_object() => {
                                debounced.update(Some(parameters));
                            }
                            Ok(_) => warn!("Ignoring line that is not a JSON object"),
                            Err(e) => warn!("Ignoring malformed JSON: {}", e),
                        }
                    }
                    None => input_open = false,
                }
            }

            // End of input: the last burst has settled by now
            _ = tokio::time::sleep(drain_after), if !input_open => break,
        }
    }

    debounced.dispose();
    if let Some(task) = in_flight {
        // An aborted task reports a cancellation error; nothing to surface
        let _ = task.await;
    }
    Ok(())
}
