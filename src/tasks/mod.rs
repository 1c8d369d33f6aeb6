//! Background tasks spawned at startup

mod heartbeat;

pub use heartbeat::HeartbeatTask;
