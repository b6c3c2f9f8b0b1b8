use std::fmt;

/// Coarse work state of the catch-up syncer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SyncerStatus {
    /// Stopped state: not behind the best peer by more than the stop threshold.
    ///
    /// Initial state. The syncer re-enters it only after a cycle has actually
    /// closed the gap.
    #[default]
    Stopped,

    /// Started state: a catch-up cycle is running.
    ///
    /// Entered on the first iteration of a cycle that finds the node behind.
    Started,
}

impl fmt::Display for SyncerStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncerStatus::Started => f.write_str("CSSStarted"),
            SyncerStatus::Stopped => f.write_str("CSSStopped"),
        }
    }
}
