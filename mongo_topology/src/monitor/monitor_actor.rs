use std::{sync::Arc, time::Duration};

use tokio::{
    sync::{broadcast, mpsc},
    task::JoinHandle,
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    events::TopologyEvent,
    hello_reply::{HelloReply, TopologyVersion},
    server_address::ServerAddress,
    server_description::ServerDescription,
    topology::TopologyMessage,
    topology_options::{ServerMonitoringMode, TopologyOptions},
};

use super::{
    rtt_monitor::{RttMonitor, SharedRoundTripTime},
    HeartbeatError, HeartbeatRequest, Heartbeater, MonitorMessage,
};

/// Keeps one server's description fresh. Runs `Idle -> Checking -> Idle` until cancelled or
/// until the topology stops listening.
pub(crate) struct MonitorActor {
    address: ServerAddress,
    heartbeater: Arc<dyn Heartbeater>,
    options: TopologyOptions,
    receiver: mpsc::Receiver<MonitorMessage>,
    topology: mpsc::Sender<TopologyMessage>,
    events: broadcast::Sender<TopologyEvent>,
    cancel: CancellationToken,
    round_trip_time: SharedRoundTripTime,
    /// Present while the server supports streaming and the last check succeeded.
    topology_version: Option<TopologyVersion>,
    rtt_monitor: Option<(CancellationToken, JoinHandle<()>)>,
    previous_was_available: bool,
    retried_after_failure: bool,
}

/// What the loop should do after a check.
struct CheckOutcome {
    description: ServerDescription,
    check_again_immediately: bool,
}

impl MonitorActor {
    pub(crate) fn new(
        address: ServerAddress,
        heartbeater: Arc<dyn Heartbeater>,
        options: TopologyOptions,
        receiver: mpsc::Receiver<MonitorMessage>,
        topology: mpsc::Sender<TopologyMessage>,
        events: broadcast::Sender<TopologyEvent>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            address,
            heartbeater,
            options,
            receiver,
            topology,
            events,
            cancel,
            round_trip_time: SharedRoundTripTime::default(),
            topology_version: None,
            rtt_monitor: None,
            previous_was_available: false,
            retried_after_failure: false,
        }
    }

    fn streaming_allowed(&self) -> bool {
        self.options.server_monitoring_mode != ServerMonitoringMode::Poll
    }

    /// Waits out the idle phase. Returns false when the monitor should stop.
    async fn idle(&mut self, last_check: Instant) -> bool {
        let next_scheduled = last_check + self.options.heartbeat_frequency();
        tokio::select! {
            _ = self.cancel.cancelled() => false,
            _ = tokio::time::sleep_until(next_scheduled) => true,
            msg = self.receiver.recv() => match msg {
                Some(MonitorMessage::RequestImmediateCheck) => {
                    // Immediate checks are still spaced by the minimum frequency.
                    let earliest = last_check + self.options.min_heartbeat_frequency();
                    tokio::select! {
                        _ = self.cancel.cancelled() => false,
                        _ = tokio::time::sleep_until(earliest) => true,
                    }
                }
                None => false,
            },
        }
    }

    #[instrument(level = "trace", skip(self), fields(address = %self.address))]
    async fn check(&mut self) -> CheckOutcome {
        // This check answers any requests that queued up meanwhile.
        while self.receiver.try_recv().is_ok() {}

        let awaited = self.streaming_allowed() && self.topology_version.is_some();
        let (request, timeout) = match (&self.topology_version, awaited) {
            (Some(version), true) => (
                HeartbeatRequest::awaited(version, self.options.heartbeat_frequency()),
                self.options.connect_timeout() + self.options.heartbeat_frequency(),
            ),
            _ => (HeartbeatRequest::polling(), self.options.connect_timeout()),
        };

        let _ = self.events.send(TopologyEvent::ServerHeartbeatStarted {
            address: self.address.clone(),
            awaited,
        });

        let start = Instant::now();
        let result = match tokio::time::timeout(
            timeout,
            self.heartbeater.check(&self.address, request),
        )
        .await
        {
            Ok(Ok(document)) => HelloReply::from_document(document)
                .map_err(|e| HeartbeatError::MalformedReply(e.to_string())),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(HeartbeatError::Timeout(timeout)),
        };
        let duration = start.elapsed();

        match result {
            Ok(reply) => self.on_success(reply, duration, awaited),
            Err(e) => self.on_failure(e, duration, awaited),
        }
    }

    fn on_success(&mut self, reply: HelloReply, duration: Duration, awaited: bool) -> CheckOutcome {
        tracing::trace!("Heartbeat succeeded in {:?}", duration);
        let _ = self.events.send(TopologyEvent::ServerHeartbeatSucceeded {
            address: self.address.clone(),
            duration,
            awaited,
        });

        let round_trip_time = match self.round_trip_time.lock() {
            Ok(mut average) => {
                if !awaited {
                    average.add_sample(duration);
                }
                average.value()
            }
            Err(_) => Some(duration),
        };

        self.topology_version = reply.topology_version.clone();
        let streaming = self.streaming_allowed() && self.topology_version.is_some();
        if streaming {
            self.start_rtt_monitor();
        } else {
            self.stop_rtt_monitor();
        }

        let description =
            ServerDescription::new_from_reply(self.address.clone(), &reply, round_trip_time);
        self.previous_was_available = description.is_available();
        self.retried_after_failure = false;

        CheckOutcome {
            description,
            check_again_immediately: streaming,
        }
    }

    fn on_failure(&mut self, error: HeartbeatError, duration: Duration, awaited: bool) -> CheckOutcome {
        tracing::debug!("Heartbeat failed after {:?}: {}", duration, error);
        let _ = self.events.send(TopologyEvent::ServerHeartbeatFailed {
            address: self.address.clone(),
            duration,
            failure: error.to_string(),
            awaited,
        });

        if let Ok(mut average) = self.round_trip_time.lock() {
            average.reset();
        }
        self.topology_version = None;
        self.stop_rtt_monitor();

        // A server that was fine a moment ago gets one immediate second chance.
        let retry = error.is_network_error()
            && self.previous_was_available
            && !self.retried_after_failure;
        self.retried_after_failure = retry;
        self.previous_was_available = false;

        CheckOutcome {
            description: ServerDescription::new_from_error(
                self.address.clone(),
                error.to_string(),
                None,
            ),
            check_again_immediately: retry,
        }
    }

    fn start_rtt_monitor(&mut self) {
        if self.rtt_monitor.is_some() {
            return;
        }
        let cancel = self.cancel.child_token();
        let rtt_monitor = RttMonitor {
            address: self.address.clone(),
            heartbeater: self.heartbeater.clone(),
            average: self.round_trip_time.clone(),
            interval: self.options.heartbeat_frequency(),
            timeout: self.options.connect_timeout(),
            cancel: cancel.clone(),
        };
        self.rtt_monitor = Some((cancel, rtt_monitor.spawn()));
    }

    fn stop_rtt_monitor(&mut self) {
        if let Some((cancel, _join)) = self.rtt_monitor.take() {
            cancel.cancel();
        }
    }
}

#[instrument(level = "debug", name = "Running Monitor", skip(actor), fields(address = %actor.address))]
pub(crate) async fn run_monitor_actor(mut actor: MonitorActor) {
    tracing::debug!("Monitor started");
    let cancel = actor.cancel.clone();
    let mut check_immediately = true;
    let mut last_check = Instant::now();

    loop {
        if !check_immediately && !actor.idle(last_check).await {
            break;
        }

        last_check = Instant::now();
        let outcome = tokio::select! {
            _ = cancel.cancelled() => break,
            outcome = actor.check() => outcome,
        };
        check_immediately = outcome.check_again_immediately;

        // A monitor stopped while the topology is busy must not deliver its last result.
        let update = TopologyMessage::ServerDescriptionUpdated(Box::new(outcome.description));
        let sent = tokio::select! {
            _ = cancel.cancelled() => break,
            sent = actor.topology.send(update) => sent,
        };
        if sent.is_err() {
            tracing::debug!("Topology is gone, stopping monitor");
            break;
        }
    }

    actor.stop_rtt_monitor();
    tracing::debug!("Monitor stopped");
}
