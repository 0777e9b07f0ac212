//! Event helpers for integration tests

use std::time::Duration;
use tokio::sync::broadcast;
use transfer_task::Event;

/// Wait until an event matching `predicate` arrives, or give up after `timeout`
pub async fn wait_for_event<P>(
    events: &mut broadcast::Receiver<Event>,
    timeout: Duration,
    mut predicate: P,
) -> Option<Event>
where
    P: FnMut(&Event) -> bool,
{
    tokio::time::timeout(timeout, async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    })
    .await
    .ok()
    .flatten()
}

/// Collect every event already buffered in the receiver
pub fn drain_events(events: &mut broadcast::Receiver<Event>) -> Vec<Event> {
    let mut collected = Vec::new();
    while let Ok(event) = events.try_recv() {
        collected.push(event);
    }
    collected
}
