use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;

use crate::emitter::Emitter;

/// Inject a `keepalive` whenever the thread has been silent for `interval`.
///
/// The task ends once the emitter's stream is closed; callers also abort it
/// when the run finishes.
pub fn spawn_keepalive(emitter: Arc<Emitter>, interval: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        if interval.is_zero() {
            return;
        }
        loop {
            tokio::time::sleep_until(emitter.last_emit() + interval).await;
            if emitter.is_closed() {
                break;
            }
            if emitter.idle_for() >= interval {
                tracing::trace!(thread_id = emitter.thread_id(), "emitting keepalive");
                emitter.keepalive();
            }
        }
    })
}
