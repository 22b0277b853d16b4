use std::time::Duration;

use async_trait::async_trait;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};

/// Paces the session loop.
#[async_trait]
pub trait Ticker: Send {
    /// Waits for the next tick and returns the time elapsed since the
    /// ticker started.
    async fn tick(&mut self) -> Duration;
}

pub struct IntervalTicker {
    interval: Interval,
    started: Instant,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        Self {
            interval,
            started: Instant::now(),
        }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) -> Duration {
        self.interval.tick().await;
        self.started.elapsed()
    }
}
