use crate::model::RequestStatus;
use sled::transaction::{ConflictableTransactionError, TransactionError};

/// Failures of the pure tariff calculator. Raised before any write happens.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum TariffError {
    #[error("slab {index} starts at {start}, before the previous slab's start")]
    SlabsOutOfOrder { index: usize, start: String },
    #[error("slab {index} has a negative start")]
    NegativeStart { index: usize },
    #[error("slab {index} ends at or before its start")]
    EmptySlab { index: usize },
    #[error("slab {index} is open-ended but is not the last slab")]
    OpenSlabNotLast { index: usize },
    #[error("slab {index} has a negative rate")]
    NegativeRate { index: usize },
    #[error("{0} must not be negative")]
    NegativeCharge(&'static str),
    #[error("units consumed must not be negative, got {0}")]
    NegativeUnits(String),
    #[error("charge calculation overflowed")]
    Overflow,
}

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum IdentifierError {
    #[error("secure random source unavailable: {0}")]
    EntropyUnavailable(String),
    #[error("meter sequence for {0} is exhausted")]
    SequenceExhausted(String),
    #[error("temporary credentials must be at least {minimum} characters, got {requested}")]
    CredentialTooShort { minimum: usize, requested: usize },
    #[error("password hashing failed: {0}")]
    Hashing(String),
}

#[derive(thiserror::Error, Debug)]
pub enum StoreError {
    #[error("storage engine failure: {0}")]
    Engine(#[from] sled::Error),
    #[error("failed to encode {0}")]
    Encode(String),
    #[error("failed to decode record at {0}")]
    Decode(String),
}

/// Delivery failure reported by a [`crate::directory::Notifier`]. Logged and
/// dropped by the lifecycle, never surfaced.
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
#[error("notification failed: {0}")]
pub struct NotificationError(pub String);

/// Caller-facing classification of a [`DeskError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidTransition,
    PreconditionFailed,
    IdentifierCollision,
    PersistenceFailure,
    NotFound,
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InvalidTransition => "invalid_transition",
            ErrorKind::PreconditionFailed => "precondition_failed",
            ErrorKind::IdentifierCollision => "identifier_collision",
            ErrorKind::PersistenceFailure => "persistence_failure",
            ErrorKind::NotFound => "not_found",
            ErrorKind::InvalidInput => "invalid_input",
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum DeskError {
    #[error("cannot {action} a request that is {status}")]
    InvalidTransition {
        action: &'static str,
        status: RequestStatus,
    },
    #[error("work order {work_order_id} cannot move from {from} to {to}")]
    InvalidWorkOrderMove {
        work_order_id: u64,
        from: &'static str,
        to: &'static str,
    },
    #[error("precondition failed: {0}")]
    PreconditionFailed(String),
    #[error("identifier collision: {0}")]
    IdentifierCollision(String),
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
    #[error("connection request {0} not found")]
    RequestNotFound(u64),
    #[error("work order {0} not found")]
    WorkOrderNotFound(u64),
    #[error("customer {0} not found")]
    CustomerNotFound(u64),
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    #[error("an active application already exists: {0}")]
    DuplicateApplication(String),
    #[error(transparent)]
    Tariff(#[from] TariffError),
    #[error(transparent)]
    Identifier(#[from] IdentifierError),
}

impl DeskError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DeskError::InvalidTransition { .. } | DeskError::InvalidWorkOrderMove { .. } => {
                ErrorKind::InvalidTransition
            }
            DeskError::PreconditionFailed(_) | DeskError::DuplicateApplication(_) => {
                ErrorKind::PreconditionFailed
            }
            DeskError::IdentifierCollision(_) => ErrorKind::IdentifierCollision,
            DeskError::PersistenceFailure(_) => ErrorKind::PersistenceFailure,
            DeskError::RequestNotFound(_)
            | DeskError::WorkOrderNotFound(_)
            | DeskError::CustomerNotFound(_) => ErrorKind::NotFound,
            DeskError::InvalidPayload(_) | DeskError::Tariff(_) => ErrorKind::InvalidInput,
            DeskError::Identifier(IdentifierError::SequenceExhausted(_)) => {
                ErrorKind::IdentifierCollision
            }
            DeskError::Identifier(_) => ErrorKind::PreconditionFailed,
        }
    }

    /// Every documented failure path runs before or inside a single transaction,
    /// so a failed call never leaves partial state behind. Only an engine error
    /// raised while the commit itself was in flight is reported as uncertain.
    pub fn nothing_changed(&self) -> bool {
        !matches!(self, DeskError::PersistenceFailure(msg) if msg.starts_with(COMMIT_UNCERTAIN))
    }
}

pub(crate) const COMMIT_UNCERTAIN: &str = "commit outcome unknown";

impl From<StoreError> for DeskError {
    fn from(value: StoreError) -> Self {
        DeskError::PersistenceFailure(value.to_string())
    }
}

impl From<TransactionError<DeskError>> for DeskError {
    fn from(value: TransactionError<DeskError>) -> Self {
        match value {
            TransactionError::Abort(err) => err,
            TransactionError::Storage(err) => {
                DeskError::PersistenceFailure(format!("{COMMIT_UNCERTAIN}: {err}"))
            }
        }
    }
}

/// Result type used inside a unit of work. Aborts roll the whole transaction back.
pub type TxResult<T> = Result<T, ConflictableTransactionError<DeskError>>;

pub(crate) fn abort<T>(err: impl Into<DeskError>) -> TxResult<T> {
    Err(ConflictableTransactionError::Abort(err.into()))
}
