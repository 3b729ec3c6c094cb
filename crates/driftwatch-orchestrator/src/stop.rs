use std::sync::Arc;

use tokio::{
    sync::watch,
    time::{sleep_until, Duration, Instant},
};

/// Requests a cooperative stop. Dropping every handle never stops the loop.
#[derive(Debug, Clone)]
pub struct StopHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl StopHandle {
    pub fn stop(&self) {
        self.tx.send_replace(true);
    }
}

/// Receiving side, polled by the loop at tick boundaries.
#[derive(Debug, Clone)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
}

pub fn stop_channel() -> (StopHandle, StopSignal) {
    let (tx, rx) = watch::channel(false);
    (StopHandle { tx: Arc::new(tx) }, StopSignal { rx })
}

impl StopSignal {
    pub fn is_stopped(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration`, waking early if a stop is requested.
    /// Returns whether a stop has been requested.
    pub async fn pause(&mut self, duration: Duration) -> bool {
        if self.is_stopped() || duration.is_zero() {
            return self.is_stopped();
        }
        let deadline = Instant::now() + duration;
        loop {
            tokio::select! {
                _ = sleep_until(deadline) => break,
                changed = self.rx.changed() => {
                    if changed.is_err() {
                        sleep_until(deadline).await;
                        break;
                    }
                    if self.is_stopped() {
                        break;
                    }
                }
            }
        }
        self.is_stopped()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stop_wakes_a_pause_early() {
        let (handle, mut signal) = stop_channel();
        let started = Instant::now();
        let waiter = tokio::spawn(async move { signal.pause(Duration::from_secs(30)).await });
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.stop();
        assert!(waiter.await.expect("join"));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[tokio::test]
    async fn dropped_handle_does_not_stop() {
        let (handle, mut signal) = stop_channel();
        drop(handle);
        assert!(!signal.pause(Duration::from_millis(5)).await);
        assert!(!signal.is_stopped());
    }
}
