//! Wire records, the running transcript and snapshot records.

pub mod message;
pub mod snapshot;
pub mod transcript;

/// Version stamped on every wire record; receivers reject anything else.
pub const PROTOCOL_VERSION: u16 = 1;
