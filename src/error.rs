use std::sync::Arc;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResourceType {
    Store,
    Index,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceType::Store => write!(f, "object store"),
            ResourceType::Index => write!(f, "index"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdbErrorCode {
    MissingWhereClause,
    ClauseRedefined,
    MissingUpperBound,
    UnknownOperator,
    Constraint,
    StoreNotFound,
    IndexNotFound,
    StoreAlreadyExists,
    IndexAlreadyExists,
    Version,
    Blocked,
    TransactionInactive,
    ReadOnly,
    InvalidState,
    InvalidAccess,
    Data,
    Encode,
    Decode,
    Migration,
    BeforeMigrations,
    Aborted,
    UnknownTransaction,
    UnknownRequest,
    RecordNotFound,
    PersistenceDenied,
    External,
}

impl IdbErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            IdbErrorCode::MissingWhereClause => "missing_where_clause",
            IdbErrorCode::ClauseRedefined => "clause_redefined",
            IdbErrorCode::MissingUpperBound => "missing_upper_bound",
            IdbErrorCode::UnknownOperator => "unknown_operator",
            IdbErrorCode::Constraint => "constraint",
            IdbErrorCode::StoreNotFound => "store_not_found",
            IdbErrorCode::IndexNotFound => "index_not_found",
            IdbErrorCode::StoreAlreadyExists => "store_already_exists",
            IdbErrorCode::IndexAlreadyExists => "index_already_exists",
            IdbErrorCode::Version => "version",
            IdbErrorCode::Blocked => "blocked",
            IdbErrorCode::TransactionInactive => "transaction_inactive",
            IdbErrorCode::ReadOnly => "read_only",
            IdbErrorCode::InvalidState => "invalid_state",
            IdbErrorCode::InvalidAccess => "invalid_access",
            IdbErrorCode::Data => "data",
            IdbErrorCode::Encode => "encode",
            IdbErrorCode::Decode => "decode",
            IdbErrorCode::Migration => "migration",
            IdbErrorCode::BeforeMigrations => "before_migrations",
            IdbErrorCode::Aborted => "aborted",
            IdbErrorCode::UnknownTransaction => "unknown_transaction",
            IdbErrorCode::UnknownRequest => "unknown_request",
            IdbErrorCode::RecordNotFound => "record_not_found",
            IdbErrorCode::PersistenceDenied => "persistence_denied",
            IdbErrorCode::External => "external",
        }
    }
}

/// Every failure surfaced by the engine, the query builders and the migration runner.
///
/// Errors are `Clone` because a single request failure is observed both by the
/// request and by the transaction it aborts.
#[derive(Debug, Clone, Error)]
pub enum IdbError {
    #[error("Missing where clause")]
    MissingWhereClause,
    #[error("Where clause cannot be redefined")]
    ClauseRedefined,
    #[error("Missing upper bounds for {op}")]
    MissingUpperBound { op: String },
    #[error("Unknown operator {op}")]
    UnknownOperator { op: String },
    #[error("constraint error: {0}")]
    Constraint(String),
    #[error("{resource_type} '{name}' not found")]
    NotFound {
        resource_type: ResourceType,
        name: String,
    },
    #[error("{resource_type} '{name}' already exists")]
    AlreadyExists {
        resource_type: ResourceType,
        name: String,
    },
    #[error("requested version {requested} is lower than the stored version {current}")]
    Version { requested: u64, current: u64 },
    #[error("upgrade of database '{name}' is blocked by an open connection")]
    Blocked { name: String },
    #[error("transaction is not active")]
    TransactionInactive,
    #[error("transaction is read-only")]
    ReadOnly,
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("invalid access: {0}")]
    InvalidAccess(String),
    #[error("data error: {0}")]
    Data(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("Error in migration {step}: {source}")]
    Migration {
        step: String,
        #[source]
        source: Box<IdbError>,
    },
    #[error("Error before starting migrations: {source}")]
    BeforeMigrations {
        #[source]
        source: Box<IdbError>,
    },
    #[error("transaction aborted")]
    Aborted,
    #[error("unknown transaction error")]
    UnknownTransaction,
    #[error("request failed without a cause")]
    UnknownRequest,
    #[error("No record found")]
    RecordNotFound,
    #[error("durable storage persistence was not granted")]
    PersistenceDenied,
    #[error(transparent)]
    External(Arc<dyn std::error::Error + Send + Sync>),
}

impl IdbError {
    /// Wraps an arbitrary error raised inside a transaction scope or migration step.
    pub fn external<E>(error: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        IdbError::External(Arc::new(error))
    }

    pub fn code(&self) -> IdbErrorCode {
        match self {
            IdbError::MissingWhereClause => IdbErrorCode::MissingWhereClause,
            IdbError::ClauseRedefined => IdbErrorCode::ClauseRedefined,
            IdbError::MissingUpperBound { .. } => IdbErrorCode::MissingUpperBound,
            IdbError::UnknownOperator { .. } => IdbErrorCode::UnknownOperator,
            IdbError::Constraint(_) => IdbErrorCode::Constraint,
            IdbError::NotFound { resource_type, .. } => match resource_type {
                ResourceType::Store => IdbErrorCode::StoreNotFound,
                ResourceType::Index => IdbErrorCode::IndexNotFound,
            },
            IdbError::AlreadyExists { resource_type, .. } => match resource_type {
                ResourceType::Store => IdbErrorCode::StoreAlreadyExists,
                ResourceType::Index => IdbErrorCode::IndexAlreadyExists,
            },
            IdbError::Version { .. } => IdbErrorCode::Version,
            IdbError::Blocked { .. } => IdbErrorCode::Blocked,
            IdbError::TransactionInactive => IdbErrorCode::TransactionInactive,
            IdbError::ReadOnly => IdbErrorCode::ReadOnly,
            IdbError::InvalidState(_) => IdbErrorCode::InvalidState,
            IdbError::InvalidAccess(_) => IdbErrorCode::InvalidAccess,
            IdbError::Data(_) => IdbErrorCode::Data,
            IdbError::Encode(_) => IdbErrorCode::Encode,
            IdbError::Decode(_) => IdbErrorCode::Decode,
            IdbError::Migration { .. } => IdbErrorCode::Migration,
            IdbError::BeforeMigrations { .. } => IdbErrorCode::BeforeMigrations,
            IdbError::Aborted => IdbErrorCode::Aborted,
            IdbError::UnknownTransaction => IdbErrorCode::UnknownTransaction,
            IdbError::UnknownRequest => IdbErrorCode::UnknownRequest,
            IdbError::RecordNotFound => IdbErrorCode::RecordNotFound,
            IdbError::PersistenceDenied => IdbErrorCode::PersistenceDenied,
            IdbError::External(_) => IdbErrorCode::External,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// Usage errors come from misuse of the builders and never reach the engine.
    pub fn is_usage(&self) -> bool {
        matches!(
            self,
            IdbError::MissingWhereClause
                | IdbError::ClauseRedefined
                | IdbError::MissingUpperBound { .. }
                | IdbError::UnknownOperator { .. }
        )
    }

    /// The error that caused a migration failure, or `self` for any other error.
    pub fn root_cause(&self) -> &IdbError {
        match self {
            IdbError::Migration { source, .. } | IdbError::BeforeMigrations { source } => {
                source.root_cause()
            }
            other => other,
        }
    }

    pub(crate) fn store_not_found(name: &str) -> Self {
        IdbError::NotFound {
            resource_type: ResourceType::Store,
            name: name.to_string(),
        }
    }

    pub(crate) fn index_not_found(name: &str) -> Self {
        IdbError::NotFound {
            resource_type: ResourceType::Index,
            name: name.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IdbError, IdbErrorCode, ResourceType};

    #[test]
    fn error_code_strings_are_stable() {
        assert_eq!(IdbErrorCode::StoreNotFound.as_str(), "store_not_found");
        assert_eq!(
            IdbErrorCode::IndexAlreadyExists.as_str(),
            "index_already_exists"
        );
        assert_eq!(IdbErrorCode::RecordNotFound.as_str(), "record_not_found");
    }

    #[test]
    fn usage_errors_keep_their_messages() {
        assert_eq!(IdbError::MissingWhereClause.to_string(), "Missing where clause");
        assert_eq!(
            IdbError::ClauseRedefined.to_string(),
            "Where clause cannot be redefined"
        );
        assert_eq!(
            IdbError::UnknownOperator { op: "==".into() }.to_string(),
            "Unknown operator =="
        );
        assert_eq!(
            IdbError::MissingUpperBound { op: "[]".into() }.to_string(),
            "Missing upper bounds for []"
        );
        assert!(IdbError::ClauseRedefined.is_usage());
        assert!(!IdbError::RecordNotFound.is_usage());
    }

    #[test]
    fn migration_errors_expose_their_cause() {
        let err = IdbError::Migration {
            step: "2".into(),
            source: Box::new(IdbError::AlreadyExists {
                resource_type: ResourceType::Store,
                name: "items".into(),
            }),
        };
        assert_eq!(err.code(), IdbErrorCode::Migration);
        assert_eq!(err.root_cause().code(), IdbErrorCode::StoreAlreadyExists);
        assert!(err.to_string().starts_with("Error in migration 2"));
    }

    #[test]
    fn external_errors_keep_their_message() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "seed file missing");
        let err = IdbError::Migration {
            step: "seed".into(),
            source: Box::new(IdbError::external(io)),
        };
        assert_eq!(err.root_cause().code_str(), "external");
        assert_eq!(err.root_cause().to_string(), "seed file missing");
        assert!(std::error::Error::source(&err).is_some());
    }
}
