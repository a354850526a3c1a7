//! Immutable snapshot of the whole deployment and the discovery rules that fold server
//! observations into it.
//!
//! [`TopologyDescription::apply`] never mutates `self`: it returns the successor description,
//! which the topology actor swaps in wholesale.
use std::{collections::HashMap, fmt, time::Duration};

use crate::{
    hello_reply::ObjectId,
    server_address::ServerAddress,
    server_description::{ServerDescription, ServerType},
    topology_options::TopologyOptions,
};

/// Oldest wire protocol version this driver can speak.
pub const MIN_SUPPORTED_WIRE_VERSION: i32 = 6;
/// Newest wire protocol version this driver knows about.
pub const MAX_SUPPORTED_WIRE_VERSION: i32 = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TopologyType {
    Single,
    ReplicaSetNoPrimary,
    ReplicaSetWithPrimary,
    Sharded,
    Unknown,
    LoadBalanced,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TopologyDescription {
    pub topology_type: TopologyType,
    pub servers: HashMap<ServerAddress, ServerDescription>,
    pub set_name: Option<String>,
    pub max_set_version: Option<i32>,
    pub max_election_id: Option<ObjectId>,
    pub logical_session_timeout_minutes: Option<i64>,
    pub compatible: bool,
    pub compatibility_error: Option<String>,
    /// True while at most half of the tracked servers have completed a first check.
    pub stale: bool,
    pub heartbeat_frequency: Duration,
    /// How many distinct seeds the topology started from. Never changes afterwards. A
    /// standalone seen while the type is still `Unknown` turns the topology into `Single`
    /// only when this is one; otherwise the standalone is dropped.
    pub seed_count: usize,
}

impl TopologyDescription {
    pub fn new(seeds: &[ServerAddress], options: &TopologyOptions) -> Self {
        let topology_type = if options.load_balanced {
            TopologyType::LoadBalanced
        } else if options.direct_connection {
            TopologyType::Single
        } else if options.replica_set_name.is_some() {
            TopologyType::ReplicaSetNoPrimary
        } else {
            TopologyType::Unknown
        };

        let servers = seeds
            .iter()
            .map(|address| {
                let description = if topology_type == TopologyType::LoadBalanced {
                    ServerDescription::new_load_balancer(address.clone())
                } else {
                    ServerDescription::new_unknown(address.clone())
                };
                (address.clone(), description)
            })
            .collect();

        let mut description = Self {
            topology_type,
            servers,
            set_name: options.replica_set_name.clone(),
            max_set_version: None,
            max_election_id: None,
            logical_session_timeout_minutes: None,
            compatible: true,
            compatibility_error: None,
            stale: false,
            heartbeat_frequency: options.heartbeat_frequency(),
            seed_count: seeds.len(),
        };
        description.recompute_derived();
        description
    }

    pub fn server(&self, address: &ServerAddress) -> Option<&ServerDescription> {
        self.servers.get(address)
    }

    pub fn primary(&self) -> Option<&ServerDescription> {
        self.servers
            .values()
            .find(|server| server.server_type == ServerType::RsPrimary)
    }

    /// Folds one server observation into a new description. Updates for addresses that are no
    /// longer tracked leave the description unchanged.
    pub fn apply(&self, incoming: ServerDescription) -> TopologyDescription {
        let mut next = self.clone();
        if !next.servers.contains_key(&incoming.address) {
            tracing::trace!(
                "Ignoring update for untracked server {}",
                incoming.address
            );
            return next;
        }
        if next.topology_type == TopologyType::LoadBalanced {
            // A load balancer is never re-classified by observations.
            return next;
        }

        next.transition(incoming);
        next.recompute_derived();
        next
    }

    fn transition(&mut self, incoming: ServerDescription) {
        let server_type = incoming.server_type;
        self.servers
            .insert(incoming.address.clone(), incoming.clone());

        match self.topology_type {
            TopologyType::Single => self.update_single(incoming),
            TopologyType::LoadBalanced => {}
            TopologyType::Unknown => match server_type {
                ServerType::Standalone => self.update_unknown_with_standalone(&incoming),
                ServerType::Mongos => self.topology_type = TopologyType::Sharded,
                ServerType::RsPrimary => self.update_rs_from_primary(incoming),
                ServerType::RsSecondary => {
                    self.topology_type = TopologyType::ReplicaSetNoPrimary;
                    self.update_rs_without_primary(&incoming);
                }
                ServerType::RsArbiter
                | ServerType::RsOther
                | ServerType::RsGhost
                | ServerType::Unknown
                | ServerType::LoadBalancer => {}
            },
            TopologyType::Sharded => match server_type {
                ServerType::Unknown | ServerType::Mongos => {}
                _ => {
                    tracing::warn!(
                        "Removing {} from sharded topology: it reported {:?}",
                        incoming.address,
                        server_type
                    );
                    self.servers.remove(&incoming.address);
                }
            },
            TopologyType::ReplicaSetNoPrimary => match server_type {
                ServerType::Standalone | ServerType::Mongos | ServerType::LoadBalancer => {
                    self.remove_from_replica_set(&incoming.address, server_type);
                }
                ServerType::RsPrimary => self.update_rs_from_primary(incoming),
                ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                    self.update_rs_without_primary(&incoming);
                }
                ServerType::Unknown | ServerType::RsGhost => {}
            },
            TopologyType::ReplicaSetWithPrimary => match server_type {
                ServerType::Standalone | ServerType::Mongos | ServerType::LoadBalancer => {
                    self.remove_from_replica_set(&incoming.address, server_type);
                    self.check_if_has_primary();
                }
                ServerType::RsPrimary => self.update_rs_from_primary(incoming),
                ServerType::RsSecondary | ServerType::RsArbiter | ServerType::RsOther => {
                    self.update_rs_with_primary_from_member(&incoming);
                }
                ServerType::Unknown | ServerType::RsGhost => self.check_if_has_primary(),
            },
        }
    }

    fn update_single(&mut self, incoming: ServerDescription) {
        let mismatched = incoming.is_available()
            && self.set_name.is_some()
            && incoming.replica_set_name != self.set_name;
        if mismatched {
            let reason = format!(
                "Replica set name {:?} does not match the configured {:?}",
                incoming.replica_set_name, self.set_name
            );
            tracing::warn!("{}: {}", incoming.address, reason);
            self.servers
                .insert(incoming.address.clone(), demoted(&incoming, reason));
        }
    }

    fn update_unknown_with_standalone(&mut self, incoming: &ServerDescription) {
        if self.seed_count == 1 {
            self.topology_type = TopologyType::Single;
        } else {
            tracing::warn!(
                "Removing standalone {} discovered through a multi-host seed list",
                incoming.address
            );
            self.servers.remove(&incoming.address);
        }
    }

    fn update_rs_from_primary(&mut self, incoming: ServerDescription) {
        let address = incoming.address.clone();

        if self.set_name.is_none() {
            self.set_name = incoming.replica_set_name.clone();
        } else if self.set_name != incoming.replica_set_name {
            self.remove_for_set_name_mismatch(&incoming);
            self.check_if_has_primary();
            return;
        }

        let claim = incoming.election_marks();
        let marks = (self.max_election_id, self.max_set_version);
        let incumbent = self
            .servers
            .values()
            .any(|server| server.server_type == ServerType::RsPrimary && server.address != address);
        let is_stale =
            claim < marks || (claim == marks && claim != (None, None) && incumbent);

        if is_stale {
            let reason = format!(
                "Stale primary claim (electionId {:?}, setVersion {:?}) is not newer than \
                 (electionId {:?}, setVersion {:?})",
                claim.0, claim.1, marks.0, marks.1
            );
            tracing::warn!("{}: {}", address, reason);
            self.servers
                .insert(address.clone(), demoted(&incoming, reason));
            self.check_if_has_primary();
            return;
        }

        if claim > marks {
            self.max_election_id = claim.0;
            self.max_set_version = claim.1;
        }

        // Only one primary may be recorded; any other claimant is demoted.
        let superseded: Vec<ServerAddress> = self
            .servers
            .values()
            .filter(|server| server.server_type == ServerType::RsPrimary && server.address != address)
            .map(|server| server.address.clone())
            .collect();
        for old_primary in superseded {
            tracing::info!("Primary moved from {} to {}", old_primary, address);
            if let Some(old) = self.servers.get(&old_primary) {
                let reason = format!("Primary moved to {}", address);
                let replacement = demoted(old, reason);
                self.servers.insert(old_primary, replacement);
            }
        }

        // The primary's member list is authoritative.
        for member in &incoming.hosts {
            self.servers
                .entry(member.clone())
                .or_insert_with(|| ServerDescription::new_unknown(member.clone()));
        }
        let removed: Vec<ServerAddress> = self
            .servers
            .keys()
            .filter(|tracked| !incoming.hosts.contains(tracked))
            .cloned()
            .collect();
        for gone in removed {
            tracing::info!("Primary {} no longer lists {}, removing it", address, gone);
            self.servers.remove(&gone);
        }

        self.check_if_has_primary();
    }

    fn update_rs_without_primary(&mut self, incoming: &ServerDescription) {
        if self.set_name.is_none() {
            self.set_name = incoming.replica_set_name.clone();
        } else if self.set_name != incoming.replica_set_name {
            self.remove_for_set_name_mismatch(incoming);
            return;
        }

        for member in &incoming.hosts {
            self.servers
                .entry(member.clone())
                .or_insert_with(|| ServerDescription::new_unknown(member.clone()));
        }

        if let Some(me) = &incoming.me {
            if *me != incoming.address {
                tracing::warn!(
                    "Removing {}: it identifies itself as {}",
                    incoming.address,
                    me
                );
                self.servers.remove(&incoming.address);
            }
        }
    }

    fn update_rs_with_primary_from_member(&mut self, incoming: &ServerDescription) {
        if self.set_name != incoming.replica_set_name {
            self.remove_for_set_name_mismatch(incoming);
        } else if incoming.me.as_ref().is_some_and(|me| *me != incoming.address) {
            tracing::warn!("Removing {}: `me` does not match its address", incoming.address);
            self.servers.remove(&incoming.address);
        }
        self.check_if_has_primary();
    }

    fn remove_for_set_name_mismatch(&mut self, incoming: &ServerDescription) {
        tracing::warn!(
            "Removing {}: replica set name {:?} does not match {:?}",
            incoming.address,
            incoming.replica_set_name,
            self.set_name
        );
        self.servers.remove(&incoming.address);
    }

    fn remove_from_replica_set(&mut self, address: &ServerAddress, server_type: ServerType) {
        tracing::warn!(
            "Removing {} from replica set topology: it reported {:?}",
            address,
            server_type
        );
        self.servers.remove(address);
    }

    fn check_if_has_primary(&mut self) {
        self.topology_type = if self.primary().is_some() {
            TopologyType::ReplicaSetWithPrimary
        } else {
            TopologyType::ReplicaSetNoPrimary
        };
    }

    fn recompute_derived(&mut self) {
        self.compatibility_error = self
            .servers
            .values()
            .filter(|server| {
                server.is_available() && server.server_type != ServerType::LoadBalancer
            })
            .find_map(compatibility_error);
        self.compatible = self.compatibility_error.is_none();

        let mut data_bearing = self
            .servers
            .values()
            .filter(|server| server.server_type.is_data_bearing())
            .filter(|server| server.server_type != ServerType::LoadBalancer)
            .peekable();
        self.logical_session_timeout_minutes = if data_bearing.peek().is_none() {
            None
        } else {
            data_bearing
                .map(|server| server.logical_session_timeout_minutes)
                .try_fold(i64::MAX, |min, timeout| timeout.map(|t| min.min(t)))
        };

        let checked = self
            .servers
            .values()
            .filter(|server| server.has_been_checked())
            .count();
        self.stale = self.topology_type != TopologyType::LoadBalanced
            && !self.servers.is_empty()
            && checked * 2 <= self.servers.len();
    }
}

fn compatibility_error(server: &ServerDescription) -> Option<String> {
    if server.min_wire_version > MAX_SUPPORTED_WIRE_VERSION {
        Some(format!(
            "Server at {} requires wire version {}, but this driver only supports up to {}",
            server.address, server.min_wire_version, MAX_SUPPORTED_WIRE_VERSION
        ))
    } else if server.max_wire_version < MIN_SUPPORTED_WIRE_VERSION {
        Some(format!(
            "Server at {} reports maximum wire version {}, but this driver requires at least {}",
            server.address, server.max_wire_version, MIN_SUPPORTED_WIRE_VERSION
        ))
    } else {
        None
    }
}

/// Unknown replacement for a server whose claim was rejected. Built only from the rejected
/// description so that re-applying the same input yields the same result.
fn demoted(server: &ServerDescription, reason: String) -> ServerDescription {
    ServerDescription {
        last_update_time: server.last_update_time,
        topology_version: server.topology_version.clone(),
        error: Some(reason),
        ..ServerDescription::new_unknown(server.address.clone())
    }
}

impl fmt::Display for TopologyDescription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut servers = self.servers.values().collect::<Vec<_>>();
        servers.sort_by(|a, b| a.address.cmp(&b.address));
        write!(f, "{{ type: {:?}", self.topology_type)?;
        if let Some(set_name) = &self.set_name {
            write!(f, ", set name: {}", set_name)?;
        }
        write!(f, ", servers: [")?;
        for (i, server) in servers.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{} ({:?}", server.address, server.server_type)?;
            if let Some(error) = &server.error {
                write!(f, ", error: {}", error)?;
            }
            write!(f, ")")?;
        }
        write!(f, "] }}")
    }
}
