//! Periodic keep-alive for leases held while an item is in flight
//!
//! The beat runs on its own task and stops when the guard is dropped, so a
//! lease is kept exactly as long as the work holding it.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

const MIN_PERIOD: Duration = Duration::from_secs(1);

/// Beat period for a lease: a third of it, so two beats can be lost
pub fn period_for(lease: Duration) -> Duration {
    (lease / 3).max(MIN_PERIOD)
}

/// Aborts its beat task on drop
pub struct Heartbeat {
    handle: JoinHandle<()>,
}

impl Heartbeat {
    /// Call `beat` every `period`, first after one full period. A beat that
    /// returns false ends the heartbeat.
    pub fn start<F, Fut>(period: Duration, mut beat: F) -> Self
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = bool> + Send + 'static,
    {
        let period = period.max(MIN_PERIOD);
        let handle = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                if !beat().await {
                    break;
                }
            }
        });
        Self { handle }
    }
}

impl Drop for Heartbeat {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
