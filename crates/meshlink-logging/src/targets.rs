//! Tracing targets used to split subsystem logs into their own files.

pub const T_WIFI: &str = "wifi";
pub const T_NET: &str = "net";
pub const T_MESH: &str = "mesh";

pub const ALL: [&str; 3] = [T_WIFI, T_NET, T_MESH];
