//! Periodic ping of stashed WebSockets.
//!
//! Every interval: sweep closed sockets, then ping the rest. A failed
//! ping removes the socket like any other failed write. The task stops on
//! shutdown.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use super::WebSocketStash;
use crate::lifecycle::ShutdownSignal;

/// Spawn the ping task.
pub fn spawn(
    websockets: WebSocketStash,
    period: Duration,
    mut shutdown: ShutdownSignal,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let swept = websockets.sweep();
                    let pinged = websockets.all_each(|_, socket| socket.ping());
                    tracing::trace!(swept, pinged, "websocket keepalive");
                }
                _ = shutdown.recv() => break,
            }
        }
        tracing::debug!("websocket keepalive stopped");
    })
}
