mod topology_actor;
mod topology_builder;
mod topology_error;
mod topology_handle;

pub use topology_builder::TopologyBuilder;
pub use topology_error::TopologyError;
pub use topology_handle::{SelectedServer, Topology};

pub(crate) use topology_actor::{run_topology_actor, TopologyActor};

use tokio::sync::oneshot;

use crate::{
    hello_reply::TopologyVersion, server_address::ServerAddress,
    server_description::ServerDescription,
};

pub(crate) enum TopologyMessage {
    /// A monitor finished a check. Applied in the order each monitor produced them.
    ServerDescriptionUpdated(Box<ServerDescription>),
    /// An operation saw a network or state-change error against `address`. Answered once the
    /// resulting description has been published.
    ApplicationError {
        report: ApplicationErrorReport,
        respond_to: oneshot::Sender<()>,
    },
    /// `None` wakes every monitor.
    RequestImmediateCheck { address: Option<ServerAddress> },
    Shutdown { respond_to: oneshot::Sender<()> },
}

/// What the topology needs to know about a failed operation to react to it.
#[derive(Clone, Debug)]
pub(crate) struct ApplicationErrorReport {
    pub(crate) address: ServerAddress,
    pub(crate) message: String,
    pub(crate) topology_version: Option<TopologyVersion>,
}
