//! Pure selection functions: given one snapshot and criteria, which servers qualify.
//!
//! Waiting for a better snapshot is the caller's business (see
//! [`Topology::select_server`](crate::Topology::select_server)).
use std::time::Duration;

use rand::seq::IteratorRandom;

use crate::{
    server_description::{ServerDescription, ServerType},
    topology::TopologyError,
    topology_description::{TopologyDescription, TopologyType},
};

use super::{ReadPreference, ReadPreferenceMode, SelectionCriteria};

/// Lower bound for max staleness regardless of heartbeat frequency.
pub const SMALLEST_MAX_STALENESS: Duration = Duration::from_secs(90);
/// How often an idle primary writes a no-op, bounding how stale a secondary can look.
pub const IDLE_WRITE_PERIOD: Duration = Duration::from_secs(10);

/// Picks one server at random from the latency window, or `None` if nothing qualifies yet.
pub fn select_server<'a>(
    description: &'a TopologyDescription,
    criteria: &SelectionCriteria,
    local_threshold: Duration,
) -> Result<Option<&'a ServerDescription>, TopologyError> {
    let suitable = suitable_servers(description, criteria)?;
    let candidates = match description.topology_type {
        TopologyType::Single | TopologyType::LoadBalanced => suitable,
        _ => latency_window(suitable, local_threshold),
    };
    Ok(candidates.into_iter().choose(&mut rand::thread_rng()))
}

/// Servers whose role satisfies `criteria`, before latency filtering.
pub fn suitable_servers<'a>(
    description: &'a TopologyDescription,
    criteria: &SelectionCriteria,
) -> Result<Vec<&'a ServerDescription>, TopologyError> {
    if !description.compatible {
        return Err(TopologyError::IncompatibleDeployment(
            description
                .compatibility_error
                .clone()
                .unwrap_or_else(|| "wire version mismatch".to_string()),
        ));
    }
    if let SelectionCriteria::ReadPreference(read_preference) = criteria {
        validate_read_preference(read_preference, description.heartbeat_frequency)?;
    }

    let servers = description.servers.values();
    let suitable = match description.topology_type {
        TopologyType::Unknown => Vec::new(),
        TopologyType::Single | TopologyType::LoadBalanced => servers
            .filter(|server| server.is_available())
            .filter(|server| matches_address(server, criteria))
            .collect(),
        TopologyType::Sharded => servers
            .filter(|server| server.server_type == ServerType::Mongos)
            .filter(|server| matches_address(server, criteria))
            .collect(),
        TopologyType::ReplicaSetNoPrimary | TopologyType::ReplicaSetWithPrimary => {
            match criteria {
                SelectionCriteria::Writable => description.primary().into_iter().collect(),
                SelectionCriteria::Address(address) => servers
                    .filter(|server| &server.address == address)
                    .filter(|server| server.server_type.is_data_bearing())
                    .collect(),
                SelectionCriteria::ReadPreference(read_preference) => {
                    replica_set_suitable(description, read_preference)
                }
            }
        }
    };
    Ok(suitable)
}

/// Keeps measured servers within `local_threshold` of the fastest one. Servers without a
/// round-trip sample yet are left out.
pub fn latency_window(
    servers: Vec<&ServerDescription>,
    local_threshold: Duration,
) -> Vec<&ServerDescription> {
    let fastest = servers
        .iter()
        .filter_map(|server| server.round_trip_time)
        .min();
    let Some(fastest) = fastest else {
        return Vec::new();
    };
    servers
        .into_iter()
        .filter(|server| {
            server
                .round_trip_time
                .map(|rtt| rtt <= fastest + local_threshold)
                .unwrap_or(false)
        })
        .collect()
}

fn matches_address(server: &ServerDescription, criteria: &SelectionCriteria) -> bool {
    match criteria {
        SelectionCriteria::Address(address) => &server.address == address,
        _ => true,
    }
}

fn validate_read_preference(
    read_preference: &ReadPreference,
    heartbeat_frequency: Duration,
) -> Result<(), TopologyError> {
    if read_preference.mode == ReadPreferenceMode::Primary {
        if !read_preference.tag_sets.iter().all(|tag_set| tag_set.is_empty()) {
            return Err(TopologyError::InvalidReadPreference(
                "tag sets are not allowed with mode primary".to_string(),
            ));
        }
        if read_preference.max_staleness.is_some() {
            return Err(TopologyError::InvalidReadPreference(
                "max staleness is not allowed with mode primary".to_string(),
            ));
        }
    }

    if let Some(max_staleness) = read_preference.max_staleness {
        let smallest = SMALLEST_MAX_STALENESS.max(heartbeat_frequency + IDLE_WRITE_PERIOD);
        if max_staleness < smallest {
            return Err(TopologyError::InvalidMaxStaleness(format!(
                "{:?} is below the minimum of {:?}",
                max_staleness, smallest
            )));
        }
    }
    Ok(())
}

fn replica_set_suitable<'a>(
    description: &'a TopologyDescription,
    read_preference: &ReadPreference,
) -> Vec<&'a ServerDescription> {
    let primary = description.primary();
    match read_preference.mode {
        ReadPreferenceMode::Primary => primary.into_iter().collect(),
        ReadPreferenceMode::Secondary => eligible_members(description, read_preference, false),
        ReadPreferenceMode::PrimaryPreferred => match primary {
            Some(primary) => vec![primary],
            None => eligible_members(description, read_preference, false),
        },
        ReadPreferenceMode::SecondaryPreferred => {
            let secondaries = eligible_members(description, read_preference, false);
            if secondaries.is_empty() {
                primary.into_iter().collect()
            } else {
                secondaries
            }
        }
        ReadPreferenceMode::Nearest => eligible_members(description, read_preference, true),
    }
}

/// Secondaries (and optionally the primary) passing the staleness and tag-set filters.
fn eligible_members<'a>(
    description: &'a TopologyDescription,
    read_preference: &ReadPreference,
    include_primary: bool,
) -> Vec<&'a ServerDescription> {
    let candidates = description
        .servers
        .values()
        .filter(|server| {
            server.server_type == ServerType::RsSecondary
                || (include_primary && server.server_type == ServerType::RsPrimary)
        })
        .filter(|server| match read_preference.max_staleness {
            Some(max_staleness) => staleness(description, server)
                .map(|staleness| staleness <= max_staleness)
                .unwrap_or(true),
            None => true,
        })
        .collect::<Vec<_>>();

    if read_preference.tag_sets.is_empty() {
        return candidates;
    }
    for tag_set in &read_preference.tag_sets {
        let matching = candidates
            .iter()
            .copied()
            .filter(|server| server.matches_tag_set(tag_set))
            .collect::<Vec<_>>();
        if !matching.is_empty() {
            return matching;
        }
    }
    Vec::new()
}

/// Estimated replication lag of `server`, or `None` when the timestamps needed are missing.
pub fn staleness(
    description: &TopologyDescription,
    server: &ServerDescription,
) -> Option<Duration> {
    if server.server_type == ServerType::RsPrimary {
        return Some(Duration::ZERO);
    }
    let heartbeat_ms = description.heartbeat_frequency.as_millis() as i64;
    let server_update = server.last_update_time?;
    let server_write = server.last_write_date?;

    let staleness_ms = match description.primary() {
        Some(primary) => {
            let primary_lag = primary.last_update_time? - primary.last_write_date?;
            ((server_update - server_write) - primary_lag).num_milliseconds() + heartbeat_ms
        }
        None => {
            let freshest = description
                .servers
                .values()
                .filter(|s| s.server_type == ServerType::RsSecondary)
                .filter_map(|s| s.last_write_date)
                .max()?;
            (freshest - server_write).num_milliseconds() + heartbeat_ms
        }
    };
    Some(Duration::from_millis(staleness_ms.max(0) as u64))
}
