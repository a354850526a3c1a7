use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::{
    events::TopologyEvent, server_address::ServerAddress, topology::TopologyMessage,
    topology_options::TopologyOptions,
};

use super::{run_monitor_actor, Heartbeater, MonitorActor, MonitorMessage};

/// Handle to a running monitor task. Owned by the topology actor; stopping the handle stops
/// the task and nothing it produces afterwards reaches the topology.
pub(crate) struct Monitor {
    sender: mpsc::Sender<MonitorMessage>,
    cancel: CancellationToken,
}

impl Monitor {
    pub(crate) fn start(
        address: ServerAddress,
        heartbeater: Arc<dyn Heartbeater>,
        options: TopologyOptions,
        topology: mpsc::Sender<TopologyMessage>,
        events: broadcast::Sender<TopologyEvent>,
        parent: &CancellationToken,
    ) -> Self {
        // One slot is enough: a queued request already guarantees the next check.
        let (sender, receiver) = mpsc::channel(1);
        let cancel = parent.child_token();
        let actor = MonitorActor::new(
            address,
            heartbeater,
            options,
            receiver,
            topology,
            events,
            cancel.clone(),
        );
        tokio::spawn(run_monitor_actor(actor));

        Self { sender, cancel }
    }

    pub(crate) fn request_immediate_check(&self) {
        let _ = self.sender.try_send(MonitorMessage::RequestImmediateCheck);
    }

    pub(crate) fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Monitor {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}
