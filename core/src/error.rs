//! Error taxonomy for the engine: validation errors (pure, pre-DDL),
//! DDL errors (wrapped driver errors), and transient errors (retryable).

use thiserror::Error;

/// The top-level error type returned by every public engine entry point.
///
/// Validation variants are raised by `Operation::validate` before any DDL is
/// issued. DDL/transient variants wrap whatever the driver reported, tagged
/// with the action that failed.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("table \"{0}\" does not exist")]
    TableDoesNotExist(String),

    #[error("column \"{0}\" does not exist on table \"{1}\"")]
    ColumnDoesNotExist(String, String),

    #[error("column \"{0}\" already exists on table \"{1}\"")]
    ColumnAlreadyExists(String, String),

    #[error("constraint \"{0}\" already exists on table \"{1}\"")]
    ConstraintAlreadyExists(String, String),

    #[error("constraint \"{0}\" does not exist on table \"{1}\"")]
    ConstraintDoesNotExist(String, String),

    #[error("index \"{0}\" does not exist on table \"{1}\"")]
    IndexDoesNotExist(String, String),

    #[error("table \"{0}\" can't be backfilled: it has no primary key and no NOT NULL UNIQUE column")]
    BackfillNotPossible(String),

    #[error("identifier \"{0}\" is invalid: {1}")]
    InvalidName(String, &'static str),

    #[error("identifier \"{0}\" is {1} bytes, the PostgreSQL limit is {MAX_IDENTIFIER_LENGTH}")]
    InvalidLength(String, usize),

    #[error("field \"{0}\" is required for operation \"{1}\"")]
    FieldRequired(&'static str, &'static str),

    #[error("column \"{0}\" is already nullable")]
    ColumnIsNullable(String),

    #[error("column \"{0}\" is not nullable")]
    ColumnIsNotNullable(String),

    #[error("alter_column for \"{0}\" makes no changes")]
    AlterColumnNoChanges(String),

    #[error("alter_column for \"{0}\" may only change one of type/nullable/unique/check/references/default/comment at a time")]
    MultipleAlterColumnChanges(String),

    #[error("table \"{0}\" already has a primary key")]
    PrimaryKeysAlreadySet(String),

    #[error("generated column \"{0}\" is invalid: identity and expression are mutually exclusive")]
    InvalidGeneratedColumn(String),

    #[error("invalid primary key for table \"{0}\": {1}")]
    InvalidPrimaryKey(String, &'static str),

    #[error("invalid replica identity: {0}")]
    InvalidReplicaIdentity(String),

    #[error("up SQL for column \"{0}\" must be provided, or the column must have a default")]
    UpSqlMustBeColumnDefault(String),

    #[error("action \"{action_id}\" failed: {source}")]
    Ddl {
        action_id: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("operation was cancelled")]
    Cancelled,

    #[error("migration \"{0}\" already started")]
    AlreadyStarted(String),

    #[error("migration \"{0}\" is not in progress")]
    NotInProgress(String),

    #[error("migration \"{0}\" has already completed")]
    AlreadyCompleted(String),

    #[error("migration \"{0}\" has an isolated operation that must run alone, but has {1} operations")]
    IsolatedOperationNotAlone(String, usize),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// PostgreSQL's hard identifier length limit (NAMEDATALEN - 1).
pub const MAX_IDENTIFIER_LENGTH: usize = 63;

impl EngineError {
    /// True if this error represents a pure validation failure (no DDL has
    /// run), as opposed to a DDL or transient failure mid-action.
    pub fn is_validation(&self) -> bool {
        !matches!(self, EngineError::Ddl { .. } | EngineError::Other(_))
    }

    pub fn ddl(action_id: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        EngineError::Ddl {
            action_id: action_id.into(),
            source: source.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;

/// SQLSTATE codes with special handling during column duplication.
pub mod sqlstate {
    /// Datatype mismatch: swallowed when copying a DEFAULT or FK to a shadow
    /// column whose type doesn't accept it (yet, or at all).
    pub const DATATYPE_MISMATCH: &str = "42804";
    /// Undefined function: swallowed when a rewritten CHECK expression
    /// references a function that doesn't resolve against the shadow column.
    pub const UNDEFINED_FUNCTION: &str = "42883";
    /// Lock not available: raised when `lock_timeout` is exceeded.
    pub const LOCK_NOT_AVAILABLE: &str = "55P03";
    /// Serialization failure under SERIALIZABLE/REPEATABLE READ.
    pub const SERIALIZATION_FAILURE: &str = "40001";
    /// Deadlock detected.
    pub const DEADLOCK_DETECTED: &str = "40P01";
    /// Duplicate object: constraint/index already exists, swallowed when an
    /// action is re-run after a crash left its DDL already applied.
    pub const DUPLICATE_OBJECT: &str = "42710";
}

/// Classify an already-wrapped engine error as retryable (transient) or
/// fatal, for callers (the backfiller's per-batch transaction) that need to
/// decide whether to retry the whole transaction rather than a single
/// statement.
pub fn is_transient_error(err: &EngineError) -> bool {
    let EngineError::Other(err) = err else {
        return false;
    };
    err.downcast_ref::<tokio_postgres::Error>()
        .and_then(|e| e.as_db_error())
        .map(is_transient)
        .unwrap_or(false)
}

/// Classify a driver error as retryable (transient) or fatal.
pub fn is_transient(db_error: &tokio_postgres::error::DbError) -> bool {
    matches!(
        db_error.code().code(),
        sqlstate::LOCK_NOT_AVAILABLE | sqlstate::SERIALIZATION_FAILURE | sqlstate::DEADLOCK_DETECTED
    )
}
