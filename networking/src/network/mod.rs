mod service;
mod switchboard;

pub use service::{
    DEFAULT_HEARTBEAT_INTERVAL_MS, DEFAULT_RECONNECT_INTERVAL_MS, NetworkEvent, NetworkHandle,
    NetworkService, NetworkServiceConfig,
};
pub use switchboard::LocalSwitchboard;
