use std::{collections::HashMap, sync::Arc};

use tokio::sync::{broadcast, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{instrument, Span};
use uuid::Uuid;

use crate::{
    connection_pool::ConnectionPool,
    events::TopologyEvent,
    monitor::{Heartbeater, Monitor},
    server_address::ServerAddress,
    server_description::{ServerDescription, ServerType},
    topology_description::{TopologyDescription, TopologyType},
    topology_options::TopologyOptions,
};

use super::{ApplicationErrorReport, TopologyMessage};

/// Single writer of the topology description. Monitors and handles post messages; the actor
/// folds them in one at a time and publishes each new snapshot.
pub(crate) struct TopologyActor {
    description: Arc<TopologyDescription>,
    publisher: watch::Sender<Arc<TopologyDescription>>,
    events: broadcast::Sender<TopologyEvent>,
    monitors: HashMap<ServerAddress, Monitor>,
    heartbeater: Arc<dyn Heartbeater>,
    connection_pool: Arc<dyn ConnectionPool>,
    options: TopologyOptions,
    receiver: mpsc::Receiver<TopologyMessage>,
    /// Monitors post here, so the actor outlives them only as long as some handle exists.
    receiver_internal: mpsc::Receiver<TopologyMessage>,
    sender_internal: mpsc::Sender<TopologyMessage>,
    cancel: CancellationToken,
}

impl TopologyActor {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        description: Arc<TopologyDescription>,
        publisher: watch::Sender<Arc<TopologyDescription>>,
        events: broadcast::Sender<TopologyEvent>,
        heartbeater: Arc<dyn Heartbeater>,
        connection_pool: Arc<dyn ConnectionPool>,
        options: TopologyOptions,
        receiver: mpsc::Receiver<TopologyMessage>,
        cancel: CancellationToken,
    ) -> Self {
        let (sender_internal, receiver_internal) = mpsc::channel(64);
        Self {
            description,
            publisher,
            events,
            monitors: HashMap::new(),
            heartbeater,
            connection_pool,
            options,
            receiver,
            receiver_internal,
            sender_internal,
            cancel,
        }
    }

    /// Message handler for the TopologyActor
    #[instrument(
        level = "debug",
        name = "Topology Actor - Handle Message",
        skip(self, msg),
        fields(correlation_id)
    )]
    fn handle_message(&mut self, msg: TopologyMessage) {
        // Apply a correlation id to all child spans of this message handler
        Span::current().record("correlation_id", Uuid::new_v4().to_string());
        match msg {
            TopologyMessage::ServerDescriptionUpdated(server) => {
                self.apply(*server);
            }
            TopologyMessage::ApplicationError { report, respond_to } => {
                self.handle_application_error(report);
                let _ = respond_to.send(());
            }
            TopologyMessage::RequestImmediateCheck { address } => match address {
                Some(address) => {
                    if let Some(monitor) = self.monitors.get(&address) {
                        monitor.request_immediate_check();
                    }
                }
                None => self
                    .monitors
                    .values()
                    .for_each(Monitor::request_immediate_check),
            },
            TopologyMessage::Shutdown { respond_to } => {
                self.close();
                let _ = respond_to.send(());
            }
        }
    }

    /// Folds a server observation in, publishes the result if anything changed, and brings
    /// the monitor set in line with the tracked servers.
    fn apply(&mut self, incoming: ServerDescription) {
        let address = incoming.address.clone();
        let hinted_primary = incoming.primary.clone();
        let previous_server = self.description.server(&address).cloned();

        let next = self.description.apply(incoming);
        if next == *self.description {
            tracing::trace!("Update from {} changed nothing", address);
            return;
        }
        let previous = std::mem::replace(&mut self.description, Arc::new(next));
        let current = self.description.clone();

        if let (Some(previous_server), Some(new_server)) =
            (previous_server, current.server(&address))
        {
            if previous_server != *new_server {
                tracing::debug!(
                    "{} is now {:?} (was {:?})",
                    address,
                    new_server.server_type,
                    previous_server.server_type
                );
                let _ = self.events.send(TopologyEvent::ServerDescriptionChanged {
                    address: address.clone(),
                    previous: Box::new(previous_server),
                    new: Box::new(new_server.clone()),
                });
            }
        }
        if previous.topology_type != current.topology_type {
            tracing::info!(
                "Topology type changed from {:?} to {:?}",
                previous.topology_type,
                current.topology_type
            );
        }
        if previous.compatible && !current.compatible {
            tracing::warn!(
                "Deployment became incompatible: {}",
                current.compatibility_error.as_deref().unwrap_or_default()
            );
        }

        self.publisher.send_replace(current.clone());
        let _ = self.events.send(TopologyEvent::TopologyDescriptionChanged {
            previous,
            new: current.clone(),
        });

        self.reconcile_monitors();

        // Without a primary, a member's opinion of who the primary is earns that server an
        // early check.
        if current.primary().is_none() {
            if let Some(hinted) = hinted_primary {
                let unchecked = current
                    .server(&hinted)
                    .map(|server| server.server_type == ServerType::Unknown)
                    .unwrap_or(false);
                if unchecked {
                    if let Some(monitor) = self.monitors.get(&hinted) {
                        tracing::debug!("Checking possible primary {} early", hinted);
                        monitor.request_immediate_check();
                    }
                }
            }
        }
    }

    fn handle_application_error(&mut self, report: ApplicationErrorReport) {
        let Some(current) = self.description.server(&report.address) else {
            tracing::trace!("Ignoring error from untracked server {}", report.address);
            return;
        };
        if let (Some(recorded), Some(reported)) =
            (&current.topology_version, &report.topology_version)
        {
            if recorded.is_at_least(reported) {
                tracing::debug!(
                    "Ignoring stale error from {}: {}",
                    report.address,
                    report.message
                );
                return;
            }
        }

        tracing::debug!(
            "Marking {} unknown after application error: {}",
            report.address,
            report.message
        );
        let unknown = ServerDescription::new_from_error(
            report.address.clone(),
            report.message,
            report.topology_version,
        );
        self.apply(unknown);
        self.connection_pool.clear(&report.address);
        if let Some(monitor) = self.monitors.get(&report.address) {
            monitor.request_immediate_check();
        }
    }

    /// Starts a monitor for every tracked server that lacks one and stops monitors of servers
    /// no longer tracked.
    fn reconcile_monitors(&mut self) {
        if self.cancel.is_cancelled()
            || self.description.topology_type == TopologyType::LoadBalanced
        {
            return;
        }

        let description = &self.description;
        let events = &self.events;
        self.monitors.retain(|address, monitor| {
            if description.servers.contains_key(address) {
                return true;
            }
            tracing::info!("Stopping monitor for {}", address);
            monitor.stop();
            let _ = events.send(TopologyEvent::ServerClosed {
                address: address.clone(),
            });
            false
        });

        let mut added = self
            .description
            .servers
            .keys()
            .filter(|address| !self.monitors.contains_key(*address))
            .cloned()
            .collect::<Vec<_>>();
        added.sort();
        for address in added {
            tracing::info!("Starting monitor for {}", address);
            let _ = self.events.send(TopologyEvent::ServerOpening {
                address: address.clone(),
            });
            let monitor = Monitor::start(
                address.clone(),
                self.heartbeater.clone(),
                self.options.clone(),
                self.sender_internal.clone(),
                self.events.clone(),
                &self.cancel,
            );
            self.monitors.insert(address, monitor);
        }
    }

    fn close(&mut self) {
        if self.cancel.is_cancelled() {
            return;
        }
        tracing::info!("Closing topology");
        self.cancel.cancel();
        for (address, monitor) in self.monitors.drain() {
            monitor.stop();
            let _ = self.events.send(TopologyEvent::ServerClosed { address });
        }
        let _ = self.events.send(TopologyEvent::TopologyClosed);
    }
}

#[instrument(level = "debug", name = "Running Topology", skip(actor))]
pub(crate) async fn run_topology_actor(mut actor: TopologyActor) {
    if actor.description.topology_type == TopologyType::LoadBalanced {
        for address in actor.description.servers.keys() {
            let _ = actor.events.send(TopologyEvent::ServerOpening {
                address: address.clone(),
            });
        }
    }
    actor.reconcile_monitors();

    loop {
        tokio::select! {
            opt_msg = actor.receiver.recv() => {
                let msg = match opt_msg {
                    Some(msg) => msg,
                    None => {
                        tracing::debug!("All topology handles dropped");
                        actor.close();
                        break;
                    }
                };
                actor.handle_message(msg);
            },
            Some(msg) = actor.receiver_internal.recv() => {
                actor.handle_message(msg);
            }
        }
        if actor.cancel.is_cancelled() {
            break;
        }
    }
    tracing::debug!("Topology actor stopped");
}
