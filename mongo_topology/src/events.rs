use std::{sync::Arc, time::Duration};

use crate::{
    server_address::ServerAddress, server_description::ServerDescription,
    topology_description::TopologyDescription,
};

/// Notifications published to external observers through
/// [`Topology::subscribe_events`](crate::Topology::subscribe_events).
#[derive(Clone, Debug)]
pub enum TopologyEvent {
    ServerOpening {
        address: ServerAddress,
    },
    ServerClosed {
        address: ServerAddress,
    },
    ServerDescriptionChanged {
        address: ServerAddress,
        previous: Box<ServerDescription>,
        new: Box<ServerDescription>,
    },
    TopologyDescriptionChanged {
        previous: Arc<TopologyDescription>,
        new: Arc<TopologyDescription>,
    },
    ServerHeartbeatStarted {
        address: ServerAddress,
        awaited: bool,
    },
    ServerHeartbeatSucceeded {
        address: ServerAddress,
        duration: Duration,
        awaited: bool,
    },
    ServerHeartbeatFailed {
        address: ServerAddress,
        duration: Duration,
        failure: String,
        awaited: bool,
    },
    TopologyClosed,
}
