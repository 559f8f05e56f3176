use std::io;

use thiserror::Error;

/// Everything that can go wrong during one tick. The main loops catch this
/// at the top of the tick and decide whether to force a resync, tolerate, or
/// abort.
#[derive(Debug, Error)]
pub enum SyncError {
    /// The emulator did not answer before the read deadline.
    #[error("emulator not responding")]
    EmulatorUnresponsive,

    /// The emulator answered, but the reply was short, long or garbled.
    #[error("bad emulator reply: {0}")]
    EmulatorReadError(String),

    /// Sending or receiving on the peer socket failed outright.
    #[error("peer unreachable: {0}")]
    PeerUnreachable(#[source] io::Error),

    /// A peer datagram that could not be decoded or parsed.
    #[error("undecodable peer message: {0}")]
    PeerProtocolError(String),

    /// RAM changed between the snapshot and the guarded write.
    #[error("RAM changed under the writer")]
    RaceCondition,

    /// Unusable configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    ConfigError(String),
}

impl SyncError {
    /// Whether the next SYNC request should carry the immediate-reply flag.
    pub fn wants_resync(&self) -> bool {
        matches!(
            self,
            SyncError::EmulatorUnresponsive
                | SyncError::EmulatorReadError(_)
                | SyncError::RaceCondition
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn emulator_and_race_errors_force_resync() {
        assert!(SyncError::EmulatorUnresponsive.wants_resync());
        assert!(SyncError::EmulatorReadError("short".into()).wants_resync());
        assert!(SyncError::RaceCondition.wants_resync());
    }

    #[test]
    fn peer_errors_do_not_force_resync() {
        let io_err = io::Error::new(io::ErrorKind::ConnectionRefused, "refused");
        assert!(!SyncError::PeerUnreachable(io_err).wants_resync());
        assert!(!SyncError::PeerProtocolError("junk".into()).wants_resync());
        assert!(!SyncError::ConfigError("missing".into()).wants_resync());
    }
}
