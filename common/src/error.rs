use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Everything the core can refuse to do, in a shape the wire protocol can
/// carry back to whichever collaborator asked. None of these corrupt stored
/// state; `Persistence` is the only variant that can leave the system
/// degraded and is worth retrying.
#[derive(Error, Serialize, Deserialize, Debug, PartialEq, Clone)]
pub enum Error {
    #[error("{entity} already exists: {key}")]
    DuplicateKey { entity: String, key: String },

    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    #[error("a match needs two distinct teams")]
    TeamsMustDiffer,

    #[error("odds must be greater than 1.0, got {odds}")]
    InvalidOdds { odds: f64 },

    #[error("stake {stake} is below the minimum of {minimum}")]
    InvalidStake { stake: u64, minimum: u64 },

    #[error("stake {stake} exceeds balance {balance}")]
    InsufficientBalance { stake: u64, balance: u64 },

    #[error("{user} already has a wager on proposition {proposition}")]
    DuplicateWager { user: String, proposition: String },

    #[error("proposition {id} is not open for wagers")]
    PropositionNotActive { id: String },

    #[error("proposition {id} is already settled")]
    AlreadySettled { id: String },

    #[error("proposition {id} is already cancelled")]
    AlreadyCancelled { id: String },

    #[error("proposal {id} has already been reviewed")]
    AlreadyReviewed { id: String },

    #[error("match {id} cannot be updated while {status}")]
    BadMatchState { id: String, status: String },

    #[error("{entity} {id} is still referenced and cannot be deleted")]
    InUse { entity: String, id: String },

    #[error("administrator privileges required")]
    Forbidden,

    #[error("persistence failure: {0}")]
    Persistence(String),
}

/// The coarse taxonomy callers branch on when rendering a failure.
#[derive(Serialize, Deserialize, Debug, PartialEq, Eq, Clone, Copy)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    InsufficientBalance,
    Persistence,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::DuplicateKey { .. }
            | Error::TeamsMustDiffer
            | Error::InvalidOdds { .. }
            | Error::InvalidStake { .. } => ErrorKind::Validation,
            Error::NotFound { .. } => ErrorKind::NotFound,
            Error::DuplicateWager { .. }
            | Error::PropositionNotActive { .. }
            | Error::AlreadySettled { .. }
            | Error::AlreadyCancelled { .. }
            | Error::AlreadyReviewed { .. }
            | Error::BadMatchState { .. }
            | Error::InUse { .. }
            | Error::Forbidden => ErrorKind::Conflict,
            Error::InsufficientBalance { .. } => ErrorKind::InsufficientBalance,
            Error::Persistence(_) => ErrorKind::Persistence,
        }
    }

    pub fn not_found(entity: &str, id: impl Into<String>) -> Self {
        Error::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn duplicate_key(entity: &str, key: impl Into<String>) -> Self {
        Error::DuplicateKey {
            entity: entity.into(),
            key: key.into(),
        }
    }

    pub fn persistence(source: impl std::fmt::Display) -> Self {
        Error::Persistence(source.to_string())
    }
}
