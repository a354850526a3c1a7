use std::{collections::HashMap, time::Duration};

use crate::server_address::ServerAddress;

/// All pairs must be present on a server for the tag set to match it.
pub type TagSet = HashMap<String, String>;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ReadPreferenceMode {
    #[default]
    Primary,
    PrimaryPreferred,
    Secondary,
    SecondaryPreferred,
    Nearest,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct ReadPreference {
    pub mode: ReadPreferenceMode,
    /// Tried in order; the first set that matches any server wins. An empty set matches all.
    pub tag_sets: Vec<TagSet>,
    pub max_staleness: Option<Duration>,
}

impl ReadPreference {
    pub fn primary() -> Self {
        Self::default()
    }

    pub fn with_mode(mode: ReadPreferenceMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn set_tag_sets(mut self, tag_sets: Vec<TagSet>) -> Self {
        self.tag_sets = tag_sets;
        self
    }

    pub fn set_max_staleness(mut self, max_staleness: Duration) -> Self {
        self.max_staleness = Some(max_staleness);
        self
    }
}

/// What an operation needs from the server it runs on.
#[derive(Clone, Debug, PartialEq)]
pub enum SelectionCriteria {
    ReadPreference(ReadPreference),
    /// Primary, standalone, mongos or load balancer.
    Writable,
    /// A specific server, e.g. the one holding an open cursor.
    Address(ServerAddress),
}

impl From<ReadPreference> for SelectionCriteria {
    fn from(read_preference: ReadPreference) -> Self {
        SelectionCriteria::ReadPreference(read_preference)
    }
}
