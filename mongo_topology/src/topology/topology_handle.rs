use std::sync::Arc;

use tokio::{
    sync::{broadcast, mpsc, oneshot, watch},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use tracing::instrument;

use crate::{
    connection_pool::{Connection, ConnectionPool},
    events::TopologyEvent,
    monitor::Heartbeater,
    server_address::ServerAddress,
    server_description::ServerDescription,
    server_selection::{self, SelectionCriteria},
    topology_description::TopologyDescription,
    topology_options::TopologyOptions,
    OperationError, TopologyBuilder,
};

use super::{
    run_topology_actor, ApplicationErrorReport, TopologyActor, TopologyError, TopologyMessage,
};

/// Handle to the topology actor.
///
/// Cloning is cheap and every clone talks to the same actor. When the last handle is dropped
/// the actor stops its monitors and exits.
#[derive(Clone)]
pub struct Topology {
    sender: mpsc::Sender<TopologyMessage>,
    description: watch::Receiver<Arc<TopologyDescription>>,
    events: broadcast::Sender<TopologyEvent>,
    connection_pool: Arc<dyn ConnectionPool>,
    options: TopologyOptions,
    cancel: CancellationToken,
}

impl Topology {
    pub fn builder() -> TopologyBuilder {
        TopologyBuilder::default()
    }

    // Only the builder creates topologies, after validating the seeds.
    pub(crate) fn new(
        seeds: Vec<ServerAddress>,
        options: TopologyOptions,
        heartbeater: Arc<dyn Heartbeater>,
        connection_pool: Arc<dyn ConnectionPool>,
    ) -> Self {
        let initial = Arc::new(TopologyDescription::new(&seeds, &options));
        let (publisher, description) = watch::channel(initial.clone());
        let (events, _) = broadcast::channel(256);
        let (sender, receiver) = mpsc::channel(32);
        let cancel = CancellationToken::new();

        let actor = TopologyActor::new(
            initial,
            publisher,
            events.clone(),
            heartbeater,
            connection_pool.clone(),
            options.clone(),
            receiver,
            cancel.clone(),
        );
        tokio::spawn(run_topology_actor(actor));

        Self {
            sender,
            description,
            events,
            connection_pool,
            options,
            cancel,
        }
    }

    /// The latest published snapshot.
    pub fn description(&self) -> Arc<TopologyDescription> {
        self.description.borrow().clone()
    }

    /// A receiver that yields every published snapshot.
    pub fn watch(&self) -> watch::Receiver<Arc<TopologyDescription>> {
        self.description.clone()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<TopologyEvent> {
        self.events.subscribe()
    }

    pub fn options(&self) -> &TopologyOptions {
        &self.options
    }

    pub fn is_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Picks a server matching `criteria`, waiting for the topology to change until one
    /// appears or the server selection timeout elapses.
    #[instrument(level = "debug", name = "Topology Handle - Select Server", skip(self))]
    pub async fn select_server(
        &self,
        criteria: &SelectionCriteria,
    ) -> Result<SelectedServer, TopologyError> {
        let timeout = self.options.server_selection_timeout();
        let deadline = Instant::now() + timeout;
        let mut watcher = self.description.clone();

        loop {
            if self.cancel.is_cancelled() {
                return Err(TopologyError::Shutdown);
            }

            let snapshot = watcher.borrow_and_update().clone();
            if let Some(server) = server_selection::select_server(
                &snapshot,
                criteria,
                self.options.local_threshold(),
            )? {
                tracing::debug!("Selected {}", server.address);
                return Ok(SelectedServer {
                    description: server.clone(),
                    connection_pool: self.connection_pool.clone(),
                });
            }

            tracing::debug!("No suitable server yet. Topology: {}", snapshot);
            self.request_immediate_check(None);

            tokio::select! {
                _ = self.cancel.cancelled() => return Err(TopologyError::Shutdown),
                _ = tokio::time::sleep_until(deadline) => {
                    let description = watcher.borrow().clone();
                    tracing::debug!("Server selection timed out. Topology: {}", description);
                    return Err(TopologyError::SelectionTimeout {
                        timeout_ms: timeout.as_millis(),
                        description,
                    });
                }
                changed = watcher.changed() => {
                    if changed.is_err() {
                        return Err(TopologyError::Shutdown);
                    }
                }
            }
        }
    }

    /// Cuts the idle wait of one monitor (or all of them for `None`) short.
    pub fn request_immediate_check(&self, address: Option<ServerAddress>) {
        if let Err(e) = self
            .sender
            .try_send(TopologyMessage::RequestImmediateCheck { address })
        {
            tracing::trace!("Immediate check request dropped. Caused by: {}", e);
        }
    }

    /// Reports an operation failure against `address`. Network and state-change errors mark
    /// the server unknown, clear its pool and trigger an immediate check; other errors are
    /// left to the monitor. Returns once the actor has published the resulting description.
    #[instrument(
        level = "debug",
        name = "Topology Handle - Handle Application Error",
        skip(self, error)
    )]
    pub async fn handle_application_error(&self, address: &ServerAddress, error: &OperationError) {
        if !error.is_network_error() && !error.is_state_change_error() {
            return;
        }
        let report = ApplicationErrorReport {
            address: address.clone(),
            message: error.to_string(),
            topology_version: error.topology_version().cloned(),
        };
        let (tx, rx) = oneshot::channel();
        if let Err(e) = self
            .sender
            .send(TopologyMessage::ApplicationError {
                report,
                respond_to: tx,
            })
            .await
        {
            tracing::error!(
                "Could not report application error to the topology. Caused by: {}",
                e
            );
            return;
        }
        // Selections made after this returns see the server marked unknown.
        if rx.await.is_err() {
            tracing::debug!("Topology actor stopped before applying the application error");
        }
    }

    /// Stops every monitor, wakes every selection waiter with [`TopologyError::Shutdown`] and
    /// waits for the actor to acknowledge.
    #[instrument(level = "debug", name = "Topology Handle - Shutdown", skip(self))]
    pub async fn shutdown(&self) {
        let (tx, rx) = oneshot::channel();
        if self
            .sender
            .send(TopologyMessage::Shutdown { respond_to: tx })
            .await
            .is_err()
        {
            tracing::debug!("Topology actor already stopped");
            return;
        }
        if rx.await.is_err() {
            tracing::debug!("Topology actor stopped before acknowledging shutdown");
        }
    }
}

/// A server chosen by selection together with the means to reach it.
#[derive(Clone)]
pub struct SelectedServer {
    description: ServerDescription,
    connection_pool: Arc<dyn ConnectionPool>,
}

impl SelectedServer {
    /// The server as it was described when selected.
    pub fn description(&self) -> &ServerDescription {
        &self.description
    }

    pub fn address(&self) -> &ServerAddress {
        &self.description.address
    }

    pub async fn checkout(&self) -> Result<Box<dyn Connection>, OperationError> {
        self.connection_pool.checkout(&self.description.address).await
    }
}

impl std::fmt::Debug for SelectedServer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SelectedServer")
            .field("address", &self.description.address)
            .field("server_type", &self.description.server_type)
            .finish()
    }
}
