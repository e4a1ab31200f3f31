//! Error taxonomy shared by the core components.
//!
//! None of these escape to the user as a crash: corrupt storage becomes an
//! empty history, service failures become model replies, stale targets are
//! logged no-ops and device failures become an inline notice.

#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("stored conversations are unreadable: {0}")]
    PersistenceCorrupt(String),
    #[error("{0}")]
    DeviceUnavailable(String),
    #[error("{0}")]
    ServiceFailure(String),
    #[error("conversation {0} no longer exists")]
    StaleTarget(String),
    #[error("configuration error: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

