//! Fixed-cadence tick driver for the simulation.

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::{self, Instant, MissedTickBehavior};

/// Drives a callback at a fixed period. The callback receives the tick number
/// (a 64-bit counter starting at 1) and the nominal tick duration in seconds.
pub struct Loop {
    period: Duration,
}

impl Loop {
    pub fn new(period: Duration) -> Self {
        Loop { period }
    }

    /// Fires `on_tick` once per period until the shutdown flag flips or its
    /// sender is dropped. Returns immediately for a zero period.
    pub async fn run<F>(self, mut shutdown: watch::Receiver<bool>, mut on_tick: F)
    where
        F: FnMut(i64, f64),
    {
        if self.period.is_zero() {
            return;
        }

        // First tick fires one full period after start.
        let mut interval = time::interval_at(Instant::now() + self.period, self.period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let delta = self.period.as_secs_f64();
        let mut tick: i64 = 0;

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    tick += 1;
                    on_tick(tick, delta);
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        return;
                    }
                }
            }
        }
    }
}
