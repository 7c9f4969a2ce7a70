use thiserror::Error;

/// Error kinds surfaced by the diff engine.
///
/// The `invalid UUID provided` / `invalid argument provided` /
/// `already exists` message fragments are part of the client contract and
/// asserted by the CLI error tests; keep them stable.
#[derive(Debug, Error)]
pub enum VdiffError {
    #[error("invalid UUID provided: {0}")]
    InvalidUuid(String),

    #[error("invalid argument provided: {0}")]
    InvalidArgument(String),

    #[error("vdiff with UUID {uuid} already exists on shard {shard}")]
    AlreadyExists { uuid: String, shard: String },

    #[error("vdiff {0} not found")]
    NotFound(String),

    #[error("deadline exceeded while {0}")]
    DeadlineExceeded(String),

    /// Retryable transport-level failure against a shard primary.
    #[error("shard unavailable: {0}")]
    Unavailable(String),

    /// Retryable MySQL failure (deadlock / lock wait / connection reset
    /// class); the retry manager picks these up automatically.
    #[error("{0}")]
    Ephemeral(String),

    /// Non-retryable failure: schema drift, undecodable values. Requires an
    /// operator resume or delete.
    #[error("{0}")]
    Permanent(String),

    #[error("sidecar store: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("comparison failed: {0}")]
    Eval(#[from] vdiff_eval::EvalError),

    #[error("encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl VdiffError {
    /// Whether the automatic retry sweeper may pick this failure up.
    pub fn is_ephemeral(&self) -> bool {
        match self {
            VdiffError::Unavailable(_) => true,
            VdiffError::Ephemeral(msg) => is_ephemeral_error_text(msg),
            _ => false,
        }
    }
}

/// Classify a persisted `last_error` message. The sweeper only ever sees the
/// stored text, so classification is textual: the MySQL deadlock/lock-wait
/// errno/sqlstate pair plus the transport failures a tablet restart causes.
pub fn is_ephemeral_error_text(msg: &str) -> bool {
    const EPHEMERAL_MARKERS: &[&str] = &[
        "errno 1213",
        "errno 1205",
        "sqlstate 40001",
        "connection reset",
        "broken pipe",
        "not serving",
        "unavailable",
    ];
    let msg = msg.to_ascii_lowercase();
    EPHEMERAL_MARKERS.iter().any(|m| msg.contains(m))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadlock_text_is_ephemeral() {
        let msg = "vttablet: rpc error: code = Unknown desc = (errno 1213) (sqlstate 40001): \
                   Deadlock found when trying to get lock; try restarting transaction";
        assert!(is_ephemeral_error_text(msg));
    }

    #[test]
    fn schema_drift_is_permanent() {
        assert!(!is_ephemeral_error_text("table customer has 4 columns on source, 5 on target"));
        assert!(!VdiffError::Permanent("decode failed".into()).is_ephemeral());
    }

    #[test]
    fn client_facing_messages_keep_their_fragments() {
        assert!(VdiffError::InvalidUuid("xyz".into())
            .to_string()
            .contains("invalid UUID provided"));
        assert!(VdiffError::InvalidArgument("xyz".into())
            .to_string()
            .contains("invalid argument provided"));
        let err = VdiffError::AlreadyExists {
            uuid: "u".into(),
            shard: "-80".into(),
        };
        assert!(err.to_string().contains("already exists"));
    }
}
