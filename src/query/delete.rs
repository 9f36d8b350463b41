use crate::catalog::key::Key;
use crate::catalog::schema::KeyPath;
use crate::error::IdbError;
use crate::query::ObjectStore;
use crate::query::range::build_range;
use crate::request::wait_on_request;
use crate::storage::range::KeyRange;
use std::sync::atomic::{AtomicBool, Ordering};

/// Deletes rows of one object store by primary key.
#[derive(Debug)]
pub struct DeleteQueryBuilder {
    store: ObjectStore,
    defined: AtomicBool,
}

impl DeleteQueryBuilder {
    pub(crate) fn new(store: ObjectStore) -> Self {
        Self {
            store,
            defined: AtomicBool::new(false),
        }
    }

    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn key_path(&self) -> Result<KeyPath, IdbError> {
        self.store.key_path()
    }

    pub fn index_names(&self) -> Result<Vec<String>, IdbError> {
        self.store.index_names()
    }

    /// Removes every row of the store.
    pub async fn everything(&self) -> Result<(), IdbError> {
        wait_on_request(self.store.handle().clear()?).await
    }

    /// Removes the rows whose primary key compares with `value`.
    pub async fn where_key(&self, op: &str, value: impl Into<Key>) -> Result<(), IdbError> {
        let range = self.define(op, value.into(), None)?;
        self.delete(range).await
    }

    /// Removes the rows whose primary key lies within the bounds.
    pub async fn where_key_range(
        &self,
        op: &str,
        lower: impl Into<Key>,
        upper: impl Into<Key>,
    ) -> Result<(), IdbError> {
        let range = self.define(op, lower.into(), Some(upper.into()))?;
        self.delete(range).await
    }

    fn define(&self, op: &str, first: Key, second: Option<Key>) -> Result<KeyRange, IdbError> {
        if self.defined.load(Ordering::Acquire) {
            return Err(IdbError::ClauseRedefined);
        }
        // a clause that fails to build leaves the builder usable
        let range = build_range(op, first, second)?;
        if self.defined.swap(true, Ordering::AcqRel) {
            return Err(IdbError::ClauseRedefined);
        }
        Ok(range)
    }

    async fn delete(&self, range: KeyRange) -> Result<(), IdbError> {
        wait_on_request(self.store.handle().delete(range)?).await
    }
}
