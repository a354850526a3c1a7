/*!
mongo_topology is the cluster-awareness layer of a MongoDB driver: it discovers and monitors
the members of a deployment, keeps a consistent picture of them, picks a server for each
operation, and retries an operation once when a transient failure makes that safe.

The crate uses tokio and the actor pattern. A single topology actor owns the current
[`TopologyDescription`] and is the only writer of it; every server gets its own monitor task
feeding heartbeat results to that actor. Readers get immutable snapshots, so selection never
waits on a lock.

Talking to servers is left to two collaborators supplied by the caller: a [`Heartbeater`]
that runs the handshake command on a monitoring connection, and a [`ConnectionPool`] that
hands out connections for operations.

# Example
```no_run
# use std::sync::Arc;
# use mongo_topology::{ConnectionPool, Heartbeater};
# async fn example(heartbeater: Arc<dyn Heartbeater>, pool: Arc<dyn ConnectionPool>)
# -> Result<(), Box<dyn std::error::Error>> {
use mongo_topology::{RetryableExecutor, RunCommand, Topology};
use serde_json::json;

let topology = Topology::builder()
    .set_hosts(&["db1.example.com", "db2.example.com:27018"])
    .set_replica_set_name("rs0")
    .set_heartbeater(heartbeater)
    .set_connection_pool(pool)
    .build()?;

let executor = RetryableExecutor::new(topology.clone());
let ping = RunCommand::new(json!({ "ping": 1 }).as_object().cloned().unwrap_or_default())?;
let reply = executor.execute(&ping, None).await?;
println!("{:?}", reply);

topology.shutdown().await;
# Ok(())
# }
```
*/

mod connection_pool;
mod monitor;
mod retryable_executor;
mod session;
mod topology;

pub mod events;
pub mod hello_reply;
pub mod server_address;
pub mod server_description;
pub mod server_selection;
pub mod topology_description;
pub mod topology_options;

pub use connection_pool::{Connection, ConnectionPool};
pub use events::TopologyEvent;
pub use hello_reply::{Document, HelloReply};
pub use monitor::{HeartbeatError, HeartbeatRequest, Heartbeater, RoundTripTimeAverage};
pub use retryable_executor::*;
pub use server_address::ServerAddress;
pub use server_description::{ServerDescription, ServerType};
pub use server_selection::{ReadPreference, ReadPreferenceMode, SelectionCriteria};
pub use session::ClientSession;
pub use topology::{SelectedServer, Topology, TopologyBuilder, TopologyError};
pub use topology_description::{TopologyDescription, TopologyType};
pub use topology_options::{ServerMonitoringMode, TopologyOptions};

/// Formats an error followed by every error in its `source()` chain.
pub fn error_chain_fmt(
    e: &impl std::error::Error,
    f: &mut std::fmt::Formatter<'_>,
) -> std::fmt::Result {
    writeln!(f, "{}\n", e)?;
    let mut current = e.source();
    while let Some(cause) = current {
        writeln!(f, "Caused by:\n\t{}", cause)?;
        current = cause.source();
    }
    Ok(())
}
