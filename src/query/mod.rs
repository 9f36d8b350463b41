pub mod delete;
pub mod range;
pub mod select;
pub mod update;

use crate::catalog::key::Key;
use crate::catalog::schema::KeyPath;
use crate::error::IdbError;
use crate::storage::cursor::Direction;
use crate::storage::range::KeyRange;
use crate::storage::request::{CursorRequest, Request};
use crate::storage::store::{IndexHandle, StoreHandle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as Json;
use std::marker::PhantomData;

/// Message of the error raised when a required row is absent.
pub const NOT_FOUND_MESSAGE: &str = "No record found";

/// An object store bound to a transaction, shared by every query builder.
#[derive(Clone, Debug)]
pub struct ObjectStore {
    handle: StoreHandle,
    upgrading: bool,
}

impl ObjectStore {
    pub(crate) fn new(handle: StoreHandle, upgrading: bool) -> Self {
        Self { handle, upgrading }
    }

    pub fn name(&self) -> &str {
        self.handle.name()
    }

    /// Key path of the store. Inside a migration every store reports
    /// [`KeyPath::Upgrading`] so that any key shape may be written.
    pub fn key_path(&self) -> Result<KeyPath, IdbError> {
        if self.upgrading {
            return Ok(KeyPath::Upgrading);
        }
        self.handle.key_path()
    }

    pub fn index_names(&self) -> Result<Vec<String>, IdbError> {
        self.handle.index_names()
    }

    /// The native store handle.
    pub fn handle(&self) -> &StoreHandle {
        &self.handle
    }
}

/// Builds the error returned when a required row is absent.
///
/// Implemented for zero-argument closures, whose error is returned as is, and
/// for [`ErrorClass`], which builds its error from [`NOT_FOUND_MESSAGE`].
pub trait ErrorSource<E> {
    fn into_error(self, message: &str) -> E;
}

impl<E, F> ErrorSource<E> for F
where
    F: FnOnce() -> E,
{
    fn into_error(self, _message: &str) -> E {
        self()
    }
}

/// Marker that builds an `E` from the not-found message.
pub struct ErrorClass<E>(PhantomData<fn() -> E>);

impl<E> ErrorClass<E> {
    pub fn new() -> Self {
        Self(PhantomData)
    }
}

impl<E> Default for ErrorClass<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E: From<String>> ErrorSource<E> for ErrorClass<E> {
    fn into_error(self, message: &str) -> E {
        E::from(message.to_string())
    }
}

pub(crate) fn encode<T: Serialize>(row: &T) -> Result<Json, IdbError> {
    serde_json::to_value(row).map_err(|e| IdbError::Encode(e.to_string()))
}

pub(crate) fn decode<T: DeserializeOwned>(value: Json) -> Result<T, IdbError> {
    serde_json::from_value(value).map_err(|e| IdbError::Decode(e.to_string()))
}

/// Where reads of a builder go: the store itself or one of its indexes.
pub(crate) enum Source {
    Store(StoreHandle),
    Index(IndexHandle),
}

impl Source {
    pub(crate) fn get(&self, range: KeyRange) -> Result<Request<Option<Json>>, IdbError> {
        match self {
            Source::Store(store) => store.get(range),
            Source::Index(index) => index.get(range),
        }
    }

    pub(crate) fn get_key(&self, range: KeyRange) -> Result<Request<Option<Key>>, IdbError> {
        match self {
            Source::Store(store) => store.get_key(range),
            Source::Index(index) => index.get_key(range),
        }
    }

    pub(crate) fn get_all(
        &self,
        range: Option<KeyRange>,
        count: Option<u32>,
    ) -> Result<Request<Vec<Json>>, IdbError> {
        match self {
            Source::Store(store) => store.get_all(range, count),
            Source::Index(index) => index.get_all(range, count),
        }
    }

    pub(crate) fn get_all_keys(
        &self,
        range: Option<KeyRange>,
        count: Option<u32>,
    ) -> Result<Request<Vec<Key>>, IdbError> {
        match self {
            Source::Store(store) => store.get_all_keys(range, count),
            Source::Index(index) => index.get_all_keys(range, count),
        }
    }

    pub(crate) fn count(&self, range: Option<KeyRange>) -> Result<Request<u64>, IdbError> {
        match self {
            Source::Store(store) => store.count(range),
            Source::Index(index) => index.count(range),
        }
    }

    pub(crate) fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: Direction,
    ) -> Result<CursorRequest, IdbError> {
        match self {
            Source::Store(store) => store.open_cursor(range, direction),
            Source::Index(index) => index.open_cursor(range, direction),
        }
    }

    pub(crate) fn open_key_cursor(
        &self,
        range: Option<KeyRange>,
        direction: Direction,
    ) -> Result<CursorRequest, IdbError> {
        match self {
            Source::Store(store) => store.open_key_cursor(range, direction),
            Source::Index(index) => index.open_key_cursor(range, direction),
        }
    }
}
