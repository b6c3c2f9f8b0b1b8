//! Field adapters for the YAML config surface.
use serde::{Deserialize, Deserializer};

/// `Duration` as a whole number of milliseconds.
pub mod duration_millis {
    use std::time::Duration;

    use super::{Deserialize, Deserializer};

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}
