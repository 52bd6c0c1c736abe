use thiserror::Error;

pub type Result<T> = std::result::Result<T, LarderError>;

#[derive(Error, Debug)]
pub enum LarderError {
    /// An item's product reference resolves to nothing and is not tombstoned.
    #[error("No product in the catalog matches '{name}'")]
    ResolutionMiss { name: String },

    #[error("Recovery blocked: the local catalog is empty ({pending} products pending)")]
    RecoveryBlockedEmptyBase { pending: usize },

    #[error("Recovery blocked: catalog would shrink from {before} to {after} products")]
    RecoveryBlockedDataLoss { before: usize, after: usize },

    #[error("Malformed record '{key}': {reason}")]
    MalformedStorageRecord { key: String, reason: String },

    #[error("{0}")]
    InvalidInput(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Remote catalog error: {0}")]
    Remote(String),
}

impl LarderError {
    /// True for the conditions that abort a catalog write and must reach the user.
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        matches!(
            self,
            Self::RecoveryBlockedEmptyBase { .. } | Self::RecoveryBlockedDataLoss { .. }
        )
    }
}

impl From<rusqlite::Error> for LarderError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Storage(e.to_string())
    }
}
