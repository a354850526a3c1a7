//! Typed view of a decoded heartbeat reply.
//!
//! The wire layer hands over the reply as a decoded document; these structs pick out only the
//! fields server discovery cares about. Unknown fields are ignored.
use std::{collections::HashMap, fmt};

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::server_address::ServerAddress;

/// A decoded command or reply document.
pub type Document = serde_json::Map<String, serde_json::Value>;

#[derive(Clone, Debug, Deserialize, Default, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct HelloReply {
    #[serde(default = "default_ok")]
    pub ok: f64,
    pub is_writable_primary: Option<bool>,
    /// Legacy spelling of `isWritablePrimary` used by older servers.
    #[serde(rename = "ismaster")]
    pub is_master: Option<bool>,
    pub secondary: Option<bool>,
    pub arbiter_only: Option<bool>,
    pub hidden: Option<bool>,
    #[serde(rename = "isreplicaset")]
    pub is_replica_set: Option<bool>,
    pub msg: Option<String>,
    pub set_name: Option<String>,
    pub set_version: Option<i32>,
    pub election_id: Option<ObjectId>,
    pub primary: Option<String>,
    pub me: Option<String>,
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub passives: Vec<String>,
    #[serde(default)]
    pub arbiters: Vec<String>,
    #[serde(default)]
    pub tags: HashMap<String, String>,
    #[serde(default)]
    pub min_wire_version: i32,
    #[serde(default)]
    pub max_wire_version: i32,
    pub logical_session_timeout_minutes: Option<i64>,
    pub topology_version: Option<TopologyVersion>,
    pub last_write: Option<LastWrite>,
}

fn default_ok() -> f64 {
    1.0
}

impl HelloReply {
    pub fn from_document(document: Document) -> anyhow::Result<Self> {
        serde_json::from_value(serde_json::Value::Object(document))
            .map_err(|e| anyhow::anyhow!("Malformed heartbeat reply. Caused by: {}", e))
    }

    pub fn is_writable_primary(&self) -> bool {
        self.is_writable_primary.or(self.is_master).unwrap_or(false)
    }

    pub fn last_write_date(&self) -> Option<DateTime<Utc>> {
        self.last_write.as_ref().and_then(|w| w.last_write_date)
    }

    /// Parses the member lists, skipping entries that are not valid addresses.
    pub fn member_addresses(&self) -> Vec<ServerAddress> {
        self.hosts
            .iter()
            .chain(self.passives.iter())
            .chain(self.arbiters.iter())
            .filter_map(|host| match ServerAddress::parse(host) {
                Ok(address) => Some(address),
                Err(e) => {
                    tracing::warn!("Ignoring unparseable member `{}`: {}", host, e);
                    None
                }
            })
            .collect()
    }
}

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct LastWrite {
    #[serde(default, deserialize_with = "deserialize_epoch_millis")]
    pub last_write_date: Option<DateTime<Utc>>,
}

/// Identifies a server process and its topology change counter. Ordering is only meaningful
/// between versions with the same `process_id`.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TopologyVersion {
    pub process_id: ObjectId,
    pub counter: i64,
}

impl TopologyVersion {
    /// True when `self` is known to be at least as new as `other`.
    pub fn is_at_least(&self, other: &TopologyVersion) -> bool {
        self.process_id == other.process_id && self.counter >= other.counter
    }
}

/// Twelve-byte object identifier, compared bytewise.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectId([u8; 12]);

impl ObjectId {
    pub const fn from_bytes(bytes: [u8; 12]) -> Self {
        Self(bytes)
    }

    pub fn parse_hex(hex: &str) -> anyhow::Result<Self> {
        if hex.len() != 24 || !hex.is_ascii() {
            return Err(anyhow::anyhow!("ObjectId `{}` is not 24 hex characters", hex));
        }
        let mut bytes = [0u8; 12];
        for (i, byte) in bytes.iter_mut().enumerate() {
            *byte = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16)
                .map_err(|e| anyhow::anyhow!("ObjectId `{}` is not hex. Caused by: {}", hex, e))?;
        }
        Ok(Self(bytes))
    }

    pub fn bytes(&self) -> [u8; 12] {
        self.0
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0 {
            write!(f, "{:02x}", byte)?;
        }
        Ok(())
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self)
    }
}

impl Serialize for ObjectId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeMap;

        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry("$oid", &self.to_string())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for ObjectId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        // Both a bare hex string and extended JSON `{"$oid": "..."}` show up in decoded replies.
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Hex(String),
            Extended {
                #[serde(rename = "$oid")]
                oid: String,
            },
        }

        let hex = match Raw::deserialize(deserializer)? {
            Raw::Hex(hex) => hex,
            Raw::Extended { oid } => oid,
        };
        ObjectId::parse_hex(hex.as_str()).map_err(serde::de::Error::custom)
    }
}

fn deserialize_epoch_millis<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Millis(i64),
        Extended {
            #[serde(rename = "$date")]
            date: i64,
        },
    }

    let millis = match Option::<Raw>::deserialize(deserializer)? {
        Some(Raw::Millis(millis)) => millis,
        Some(Raw::Extended { date }) => date,
        None => return Ok(None),
    };
    Ok(Utc.timestamp_millis_opt(millis).single())
}
