use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use tokio::{task::JoinHandle, time::Instant};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::server_address::ServerAddress;

use super::{HeartbeatRequest, Heartbeater};

const RTT_ALPHA: f64 = 0.2;

/// Exponentially weighted moving average of heartbeat round trips.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct RoundTripTimeAverage {
    average: Option<Duration>,
}

impl RoundTripTimeAverage {
    pub fn add_sample(&mut self, sample: Duration) {
        self.average = Some(match self.average {
            None => sample,
            Some(previous) => {
                previous.mul_f64(1.0 - RTT_ALPHA) + sample.mul_f64(RTT_ALPHA)
            }
        });
    }

    pub fn reset(&mut self) {
        self.average = None;
    }

    pub fn value(&self) -> Option<Duration> {
        self.average
    }
}

pub(crate) type SharedRoundTripTime = Arc<Mutex<RoundTripTimeAverage>>;

/// Keeps the round-trip average fresh while the main monitor is parked on awaited heartbeats,
/// whose durations include the server-side wait and are useless as latency samples.
pub(crate) struct RttMonitor {
    pub(crate) address: ServerAddress,
    pub(crate) heartbeater: Arc<dyn Heartbeater>,
    pub(crate) average: SharedRoundTripTime,
    pub(crate) interval: Duration,
    pub(crate) timeout: Duration,
    pub(crate) cancel: CancellationToken,
}

impl RttMonitor {
    pub(crate) fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    #[instrument(level = "debug", name = "RTT Monitor", skip(self), fields(address = %self.address))]
    async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = interval.tick() => {}
            }

            let start = Instant::now();
            let check = self
                .heartbeater
                .check(&self.address, HeartbeatRequest::polling());
            let result = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = tokio::time::timeout(self.timeout, check) => result,
            };

            match result {
                Ok(Ok(_)) => {
                    let sample = start.elapsed();
                    if let Ok(mut average) = self.average.lock() {
                        average.add_sample(sample);
                    }
                    tracing::trace!("RTT sample {:?}", sample);
                }
                // Failures are the main monitor's business; it will notice on its own check.
                Ok(Err(e)) => tracing::trace!("RTT probe failed: {}", e),
                Err(_) => tracing::trace!("RTT probe timed out after {:?}", self.timeout),
            }
        }
        tracing::debug!("RTT monitor stopped");
    }
}
