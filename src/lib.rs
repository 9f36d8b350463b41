//! Typed query builders over an IndexedDB-style storage engine.
//!
//! A [`DatabaseDefinition`] names a database and the ordered migrations that
//! build its schema. Work happens inside transaction scopes opened with
//! [`Database::read`] and [`Database::change`], through select, insert,
//! update and delete builders. The in-process engine under [`storage`]
//! provides the versioned databases, auto-committing transactions, requests
//! and cursors the builders run on.

pub mod catalog;
pub mod config;
pub mod cursor;
pub mod database;
pub mod error;
pub mod migration;
pub mod query;
pub mod request;
pub mod storage;
pub mod transaction;

pub use crate::catalog::{IndexParams, IndexPath, Key, KeyPath};
pub use crate::config::{DatabaseOptions, EngineConfig};
pub use crate::cursor::{
    Cursor, CursorEntry, CursorStream, KeyEntry, KeyStream, Keys, PrimaryKeyStream, ValueStream,
    Values,
};
pub use crate::database::{
    Database, DatabaseDefinition, define_database, drop_database, list_databases, open_database,
    request_database_persistence,
};
pub use crate::error::{IdbError, IdbErrorCode, ResourceType};
pub use crate::migration::{DatabaseBuilder, Migration, StoreBuilder};
pub use crate::query::delete::DeleteQueryBuilder;
pub use crate::query::range::{Operator, build_range};
pub use crate::query::select::SelectQueryBuilder;
pub use crate::query::update::{InsertQueryBuilder, UpdateQueryBuilder};
pub use crate::query::{ErrorClass, ErrorSource, NOT_FOUND_MESSAGE, ObjectStore};
pub use crate::request::wait_on_request;
pub use crate::storage::cursor::Direction;
pub use crate::storage::range::KeyRange;
pub use crate::storage::transaction::TransactionMode;
pub use crate::storage::{Connection, Factory};
pub use crate::transaction::{ReadOnlyTransaction, ReadWriteTransaction};
