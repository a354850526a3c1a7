mod heartbeater;
mod monitor_actor;
mod monitor_error;
mod monitor_handle;
mod rtt_monitor;

pub use heartbeater::{HeartbeatRequest, Heartbeater};
pub use monitor_error::HeartbeatError;
pub use rtt_monitor::RoundTripTimeAverage;

pub(crate) use monitor_actor::{run_monitor_actor, MonitorActor};
pub(crate) use monitor_handle::Monitor;

pub(crate) enum MonitorMessage {
    /// Cut the idle wait short, e.g. after an operation saw this server fail.
    RequestImmediateCheck,
}
