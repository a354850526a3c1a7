use std::{collections::HashMap, time::Duration};

use chrono::{DateTime, Utc};

use crate::{
    hello_reply::{HelloReply, ObjectId, TopologyVersion},
    server_address::ServerAddress,
};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum ServerType {
    #[default]
    Unknown,
    Standalone,
    Mongos,
    RsPrimary,
    RsSecondary,
    RsArbiter,
    RsOther,
    RsGhost,
    LoadBalancer,
}

impl ServerType {
    /// Servers that hold data and can answer reads.
    pub fn is_data_bearing(self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::Mongos
                | ServerType::RsPrimary
                | ServerType::RsSecondary
                | ServerType::LoadBalancer
        )
    }

    pub fn is_writable(self) -> bool {
        matches!(
            self,
            ServerType::Standalone
                | ServerType::Mongos
                | ServerType::RsPrimary
                | ServerType::LoadBalancer
        )
    }

    fn from_reply(reply: &HelloReply) -> Self {
        if reply.ok != 1.0 {
            ServerType::Unknown
        } else if reply.is_replica_set.unwrap_or(false) {
            ServerType::RsGhost
        } else if reply.msg.as_deref() == Some("isdbgrid") {
            ServerType::Mongos
        } else if reply.set_name.is_some() {
            if reply.hidden.unwrap_or(false) {
                ServerType::RsOther
            } else if reply.is_writable_primary() {
                ServerType::RsPrimary
            } else if reply.secondary.unwrap_or(false) {
                ServerType::RsSecondary
            } else if reply.arbiter_only.unwrap_or(false) {
                ServerType::RsArbiter
            } else {
                ServerType::RsOther
            }
        } else {
            ServerType::Standalone
        }
    }
}

/// Snapshot of one server as last observed. Never mutated once published; every heartbeat
/// produces a fresh one.
#[derive(Clone, Debug, PartialEq)]
pub struct ServerDescription {
    pub address: ServerAddress,
    pub server_type: ServerType,
    pub round_trip_time: Option<Duration>,
    pub last_update_time: Option<DateTime<Utc>>,
    pub last_write_date: Option<DateTime<Utc>>,
    pub min_wire_version: i32,
    pub max_wire_version: i32,
    pub replica_set_name: Option<String>,
    pub set_version: Option<i32>,
    pub election_id: Option<ObjectId>,
    pub topology_version: Option<TopologyVersion>,
    pub tags: HashMap<String, String>,
    pub logical_session_timeout_minutes: Option<i64>,
    pub hosts: Vec<ServerAddress>,
    pub primary: Option<ServerAddress>,
    pub me: Option<ServerAddress>,
    pub error: Option<String>,
}

impl ServerDescription {
    /// Placeholder for an address that has not been checked yet.
    pub fn new_unknown(address: ServerAddress) -> Self {
        Self {
            address,
            server_type: ServerType::Unknown,
            round_trip_time: None,
            last_update_time: None,
            last_write_date: None,
            min_wire_version: 0,
            max_wire_version: 0,
            replica_set_name: None,
            set_version: None,
            election_id: None,
            topology_version: None,
            tags: HashMap::new(),
            logical_session_timeout_minutes: None,
            hosts: Vec::new(),
            primary: None,
            me: None,
            error: None,
        }
    }

    /// Result of a failed check. The server type is always `Unknown` once an error is present.
    pub fn new_from_error(
        address: ServerAddress,
        error: impl Into<String>,
        topology_version: Option<TopologyVersion>,
    ) -> Self {
        Self {
            last_update_time: Some(Utc::now()),
            topology_version,
            error: Some(error.into()),
            ..Self::new_unknown(address)
        }
    }

    pub fn new_load_balancer(address: ServerAddress) -> Self {
        Self {
            server_type: ServerType::LoadBalancer,
            ..Self::new_unknown(address)
        }
    }

    pub fn new_from_reply(
        address: ServerAddress,
        reply: &HelloReply,
        round_trip_time: Option<Duration>,
    ) -> Self {
        let server_type = ServerType::from_reply(reply);
        if server_type == ServerType::Unknown {
            return Self::new_from_error(
                address,
                format!("Heartbeat reply reported ok: {}", reply.ok),
                reply.topology_version.clone(),
            );
        }

        let parse = |raw: &Option<String>| raw.as_deref().and_then(|s| ServerAddress::parse(s).ok());

        Self {
            server_type,
            round_trip_time,
            last_update_time: Some(Utc::now()),
            last_write_date: reply.last_write_date(),
            min_wire_version: reply.min_wire_version,
            max_wire_version: reply.max_wire_version,
            replica_set_name: reply.set_name.clone(),
            set_version: reply.set_version,
            election_id: reply.election_id,
            topology_version: reply.topology_version.clone(),
            tags: reply.tags.clone(),
            logical_session_timeout_minutes: reply.logical_session_timeout_minutes,
            hosts: reply.member_addresses(),
            primary: parse(&reply.primary),
            me: parse(&reply.me),
            ..Self::new_unknown(address)
        }
    }

    pub fn is_available(&self) -> bool {
        self.server_type != ServerType::Unknown
    }

    /// True once a check has completed, successful or not.
    pub fn has_been_checked(&self) -> bool {
        self.last_update_time.is_some() || self.error.is_some()
    }

    /// Whether a tag set (all pairs must be present) matches this server.
    pub fn matches_tag_set(&self, tag_set: &HashMap<String, String>) -> bool {
        tag_set
            .iter()
            .all(|(key, value)| self.tags.get(key) == Some(value))
    }

    pub(crate) fn election_marks(&self) -> (Option<ObjectId>, Option<i32>) {
        (self.election_id, self.set_version)
    }
}
