use crate::catalog::key::Key;
use crate::catalog::schema::KeyPath;
use crate::error::IdbError;
use crate::query::{ObjectStore, encode};
use crate::request::wait_on_request;
use serde::Serialize;
use std::marker::PhantomData;

/// Writes rows of type `T` into one object store.
///
/// Whether a call may pass an explicit key depends on the store's
/// [`KeyPath`]: manual keys need one, generated and in-line keys refuse one.
#[derive(Debug)]
pub struct UpdateQueryBuilder<T> {
    store: ObjectStore,
    row: PhantomData<fn(&T)>,
}

pub type InsertQueryBuilder<T> = UpdateQueryBuilder<T>;

impl<T> UpdateQueryBuilder<T> {
    pub(crate) fn new(store: ObjectStore) -> Self {
        Self {
            store,
            row: PhantomData,
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

    fn check_key(&self, explicit: bool) -> Result<(), IdbError> {
        let key_path = self.store.key_path()?;
        match (&key_path, explicit) {
            (KeyPath::Upgrading, _) => Ok(()),
            (KeyPath::Manual, true) => Ok(()),
            (KeyPath::Manual, false) => Err(IdbError::Data(format!(
                "store {} needs an explicit key",
                self.store.name()
            ))),
            (_, false) => Ok(()),
            (_, true) => Err(IdbError::Data(format!(
                "store {} derives its keys and refuses an explicit key",
                self.store.name()
            ))),
        }
    }
}

impl<T: Serialize> UpdateQueryBuilder<T> {
    /// Inserts a row whose key is generated or read from the row.
    /// A duplicate key is a constraint error.
    pub async fn add(&self, row: &T) -> Result<Key, IdbError> {
        self.write(row, None, true).await
    }

    /// Inserts a row under an out-of-line key.
    pub async fn add_with_key(&self, row: &T, key: impl Into<Key>) -> Result<Key, IdbError> {
        self.write(row, Some(key.into()), true).await
    }

    /// Inserts or replaces a row whose key is generated or read from the row.
    pub async fn put(&self, row: &T) -> Result<Key, IdbError> {
        self.write(row, None, false).await
    }

    pub async fn put_with_key(&self, row: &T, key: impl Into<Key>) -> Result<Key, IdbError> {
        self.write(row, Some(key.into()), false).await
    }

    async fn write(&self, row: &T, key: Option<Key>, strict: bool) -> Result<Key, IdbError> {
        self.check_key(key.is_some())?;
        let value = encode(row)?;
        let store = self.store.handle();
        let request = if strict {
            store.add(value, key)?
        } else {
            store.put(value, key)?
        };
        wait_on_request(request).await
    }
}
