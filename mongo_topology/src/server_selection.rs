mod read_preference;
mod selector;

pub use read_preference::{ReadPreference, ReadPreferenceMode, SelectionCriteria, TagSet};
pub use selector::{
    latency_window, select_server, staleness, suitable_servers, IDLE_WRITE_PERIOD,
    SMALLEST_MAX_STALENESS,
};
