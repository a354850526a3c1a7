use std::sync::Arc;

use tracing::instrument;

use crate::{
    connection_pool::ConnectionPool, monitor::Heartbeater, server_address::ServerAddress,
    topology_options::TopologyOptions,
};

use super::{Topology, TopologyError};

#[derive(Default)]
pub struct TopologyBuilder {
    hosts: Vec<String>,
    options: TopologyOptions,
    heartbeater: Option<Arc<dyn Heartbeater>>,
    connection_pool: Option<Arc<dyn ConnectionPool>>,
}

impl TopologyBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_hosts<T>(mut self, hosts: &[T]) -> Self
    where
        T: AsRef<str>,
    {
        for host in hosts {
            self.hosts.push(host.as_ref().to_string());
        }
        self
    }

    /// Replaces every option at once, e.g. with values deserialized from configuration.
    pub fn set_options(mut self, options: TopologyOptions) -> Self {
        tracing::trace!("Setting topology options: {:?}", &options);
        self.options = options;
        self
    }

    pub fn set_replica_set_name(mut self, replica_set_name: &str) -> Self {
        self.options.replica_set_name = Some(replica_set_name.to_string());
        self
    }

    pub fn set_direct_connection(mut self, direct_connection: bool) -> Self {
        self.options.direct_connection = direct_connection;
        self
    }

    pub fn set_load_balanced(mut self, load_balanced: bool) -> Self {
        self.options.load_balanced = load_balanced;
        self
    }

    pub fn set_heartbeater(mut self, heartbeater: Arc<dyn Heartbeater>) -> Self {
        self.heartbeater = Some(heartbeater);
        self
    }

    pub fn set_connection_pool(mut self, connection_pool: Arc<dyn ConnectionPool>) -> Self {
        self.connection_pool = Some(connection_pool);
        self
    }

    /// Validates the configuration, spawns the topology actor and returns a handle to it.
    ///
    /// Must be called from within a tokio runtime. The builder can be reused as a template;
    /// every call creates an independent topology.
    #[instrument(level = "debug", name = "Build TopologyBuilder", skip(self))]
    pub fn build(&self) -> Result<Topology, TopologyError> {
        if self.hosts.is_empty() {
            tracing::error!(
                "No hosts were supplied and a topology can't exist without at least one seed"
            );
            return Err(TopologyError::MissingHosts);
        }

        let seeds = validate_hosts(self.hosts.as_slice())?;
        validate_options(&self.options, seeds.len())?;

        let heartbeater = self
            .heartbeater
            .clone()
            .ok_or(TopologyError::MissingCollaborator("heartbeater"))?;
        let connection_pool = self
            .connection_pool
            .clone()
            .ok_or(TopologyError::MissingCollaborator("connection pool"))?;

        tracing::trace!("Seeds: {:?}", &seeds);
        Ok(Topology::new(
            seeds,
            self.options.clone(),
            heartbeater,
            connection_pool,
        ))
    }
}

/// Parses every host into its canonical address, dropping duplicates but keeping the order in
/// which hosts were first given.
#[instrument(level = "debug", name = "Validate Hosts")]
fn validate_hosts<T>(hosts: &[T]) -> Result<Vec<ServerAddress>, TopologyError>
where
    T: AsRef<str> + std::fmt::Debug,
{
    let mut seeds: Vec<ServerAddress> = Vec::with_capacity(hosts.len());
    for host in hosts {
        let address =
            ServerAddress::parse(host.as_ref()).map_err(|e| TopologyError::InvalidHost {
                host: host.as_ref().to_string(),
                reason: e.to_string(),
            })?;
        if !seeds.contains(&address) {
            seeds.push(address);
        }
    }
    Ok(seeds)
}

fn validate_options(options: &TopologyOptions, seed_count: usize) -> Result<(), TopologyError> {
    let contradiction = if options.direct_connection && seed_count > 1 {
        Some("a direct connection needs exactly one host")
    } else if options.load_balanced && seed_count > 1 {
        Some("a load-balanced topology needs exactly one host")
    } else if options.load_balanced && options.replica_set_name.is_some() {
        Some("a load-balanced topology can't name a replica set")
    } else if options.load_balanced && options.direct_connection {
        Some("a load-balanced topology can't use a direct connection")
    } else {
        None
    };

    if let Some(reason) = contradiction {
        tracing::error!("Contradictory configuration: {}", reason);
        return Err(TopologyError::ContradictoryConfiguration(reason.to_string()));
    }

    validate_intervals(options)
}

/// Monitors sleep for these intervals between checks, so none of them may be zero and the
/// rate limit can't exceed the regular period.
fn validate_intervals(options: &TopologyOptions) -> Result<(), TopologyError> {
    let invalid = if options.heartbeat_frequency_ms == 0 {
        Some(("heartbeatFrequencyMS", "must be greater than zero".to_string()))
    } else if options.min_heartbeat_frequency_ms == 0 {
        Some(("minHeartbeatFrequencyMS", "must be greater than zero".to_string()))
    } else if options.min_heartbeat_frequency_ms > options.heartbeat_frequency_ms {
        Some((
            "minHeartbeatFrequencyMS",
            format!(
                "{}ms exceeds heartbeatFrequencyMS of {}ms",
                options.min_heartbeat_frequency_ms, options.heartbeat_frequency_ms
            ),
        ))
    } else if options.connect_timeout_ms == 0 {
        Some(("connectTimeoutMS", "must be greater than zero".to_string()))
    } else {
        None
    };

    match invalid {
        Some((option, reason)) => {
            tracing::error!("Invalid option {}: {}", option, reason);
            Err(TopologyError::InvalidOption { option, reason })
        }
        None => Ok(()),
    }
}
