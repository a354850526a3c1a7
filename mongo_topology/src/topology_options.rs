use std::time::Duration;

use serde::Deserialize;

/// How monitors talk to their server.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerMonitoringMode {
    /// Stream when the server advertises a topology version, otherwise poll.
    #[default]
    Auto,
    Stream,
    Poll,
}

/// Tunables for discovery, monitoring and selection. Field names follow the connection-string
/// option names so a parsed configuration can be deserialised straight into this struct.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TopologyOptions {
    #[serde(rename = "heartbeatFrequencyMS")]
    pub heartbeat_frequency_ms: u64,
    #[serde(rename = "minHeartbeatFrequencyMS")]
    pub min_heartbeat_frequency_ms: u64,
    #[serde(rename = "connectTimeoutMS")]
    pub connect_timeout_ms: u64,
    #[serde(rename = "localThresholdMS")]
    pub local_threshold_ms: u64,
    #[serde(rename = "serverSelectionTimeoutMS")]
    pub server_selection_timeout_ms: u64,
    pub server_monitoring_mode: ServerMonitoringMode,
    pub direct_connection: bool,
    #[serde(rename = "replicaSet")]
    pub replica_set_name: Option<String>,
    pub load_balanced: bool,
    pub retry_reads: bool,
    pub retry_writes: bool,
}

impl Default for TopologyOptions {
    fn default() -> Self {
        Self {
            heartbeat_frequency_ms: 10_000,
            min_heartbeat_frequency_ms: 500,
            connect_timeout_ms: 10_000,
            local_threshold_ms: 15,
            server_selection_timeout_ms: 30_000,
            server_monitoring_mode: ServerMonitoringMode::Auto,
            direct_connection: false,
            replica_set_name: None,
            load_balanced: false,
            retry_reads: true,
            retry_writes: true,
        }
    }
}

// Getters
impl TopologyOptions {
    pub fn heartbeat_frequency(&self) -> Duration {
        Duration::from_millis(self.heartbeat_frequency_ms)
    }

    pub fn min_heartbeat_frequency(&self) -> Duration {
        Duration::from_millis(self.min_heartbeat_frequency_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn local_threshold(&self) -> Duration {
        Duration::from_millis(self.local_threshold_ms)
    }

    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_millis(self.server_selection_timeout_ms)
    }
}
