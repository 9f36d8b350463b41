use crate::catalog::key::Key;
use crate::catalog::schema::{IndexParams, IndexPath, KeyPath};
use crate::error::IdbError;
use crate::storage::cursor::{CursorHandle, Direction};
use crate::storage::range::KeyRange;
use crate::storage::request::{CursorRequest, Request};
use crate::storage::transaction::TransactionHandle;
use serde_json::Value as Json;

fn limit(rows: impl Iterator<Item = Json>, count: Option<u32>) -> Vec<Json> {
    match count {
        Some(count) if count > 0 => rows.take(count as usize).collect(),
        _ => rows.collect(),
    }
}

fn limit_keys(keys: impl Iterator<Item = Key>, count: Option<u32>) -> Vec<Key> {
    match count {
        Some(count) if count > 0 => keys.take(count as usize).collect(),
        _ => keys.collect(),
    }
}

/// An object store as seen through one transaction.
#[derive(Clone, Debug)]
pub struct StoreHandle {
    txn: TransactionHandle,
    name: String,
}

impl StoreHandle {
    pub(crate) fn new(txn: TransactionHandle, name: &str) -> Self {
        Self {
            txn,
            name: name.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn transaction(&self) -> &TransactionHandle {
        &self.txn
    }

    pub fn key_path(&self) -> Result<KeyPath, IdbError> {
        self.txn
            .with_schema(|data| data.store(&self.name).map(|store| store.key_path.clone()))
    }

    pub fn index_names(&self) -> Result<Vec<String>, IdbError> {
        self.txn
            .with_schema(|data| data.store(&self.name).map(|store| store.index_names()))
    }

    pub fn index(&self, name: &str) -> Result<IndexHandle, IdbError> {
        self.txn
            .with_schema(|data| data.store(&self.name)?.index(name).map(|_| ()))?;
        Ok(IndexHandle {
            store: self.clone(),
            name: name.to_string(),
        })
    }

    pub fn create_index(
        &self,
        name: &str,
        key_path: impl Into<IndexPath>,
        params: IndexParams,
    ) -> Result<IndexHandle, IdbError> {
        let key_path = key_path.into();
        self.txn.with_working(|data| {
            data.store_mut(&self.name)?
                .create_index(name, key_path, params)
        })?;
        Ok(IndexHandle {
            store: self.clone(),
            name: name.to_string(),
        })
    }

    pub fn delete_index(&self, name: &str) -> Result<(), IdbError> {
        self.txn
            .with_working(|data| data.store_mut(&self.name)?.delete_index(name))
    }

    /// First row in the range.
    pub fn get(&self, range: KeyRange) -> Result<Request<Option<Json>>, IdbError> {
        let store = self.name.clone();
        self.txn.request(move |data| {
            Ok(data
                .store(&store)?
                .rows_in(Some(&range))
                .next()
                .map(|(_, value)| value.clone()))
        })
    }

    pub fn get_key(&self, range: KeyRange) -> Result<Request<Option<Key>>, IdbError> {
        let store = self.name.clone();
        self.txn
            .request(move |data| Ok(data.store(&store)?.keys_in(Some(&range)).next().cloned()))
    }

    pub fn get_all(
        &self,
        range: Option<KeyRange>,
        count: Option<u32>,
    ) -> Result<Request<Vec<Json>>, IdbError> {
        let store = self.name.clone();
        self.txn.request(move |data| {
            let rows = data
                .store(&store)?
                .rows_in(range.as_ref())
                .map(|(_, value)| value.clone());
            Ok(limit(rows, count))
        })
    }

    pub fn get_all_keys(
        &self,
        range: Option<KeyRange>,
        count: Option<u32>,
    ) -> Result<Request<Vec<Key>>, IdbError> {
        let store = self.name.clone();
        self.txn.request(move |data| {
            let keys = data.store(&store)?.keys_in(range.as_ref()).cloned();
            Ok(limit_keys(keys, count))
        })
    }

    pub fn count(&self, range: Option<KeyRange>) -> Result<Request<u64>, IdbError> {
        let store = self.name.clone();
        self.txn
            .request(move |data| Ok(data.store(&store)?.count(range.as_ref())))
    }

    /// Inserts a row; an existing key is a constraint error.
    pub fn add(&self, value: Json, key: Option<Key>) -> Result<Request<Key>, IdbError> {
        self.write(value, key, true)
    }

    /// Inserts or replaces a row.
    pub fn put(&self, value: Json, key: Option<Key>) -> Result<Request<Key>, IdbError> {
        self.write(value, key, false)
    }

    fn write(
        &self,
        value: Json,
        key: Option<Key>,
        no_overwrite: bool,
    ) -> Result<Request<Key>, IdbError> {
        self.txn.check_writable()?;
        let store = self.name.clone();
        self.txn.request(move |data| {
            data.store_mut(&store)?
                .store_record(&store, value, key, no_overwrite)
        })
    }

    pub fn delete(&self, range: KeyRange) -> Result<Request<()>, IdbError> {
        self.txn.check_writable()?;
        let store = self.name.clone();
        self.txn.request(move |data| {
            data.store_mut(&store)?.delete_range(&range);
            Ok(())
        })
    }

    pub fn clear(&self) -> Result<Request<()>, IdbError> {
        self.txn.check_writable()?;
        let store = self.name.clone();
        self.txn.request(move |data| {
            data.store_mut(&store)?.clear();
            Ok(())
        })
    }

    pub fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: Direction,
    ) -> Result<CursorRequest, IdbError> {
        CursorHandle::open(self.txn.clone(), &self.name, None, range, direction, true)
    }

    pub fn open_key_cursor(
        &self,
        range: Option<KeyRange>,
        direction: Direction,
    ) -> Result<CursorRequest, IdbError> {
        CursorHandle::open(self.txn.clone(), &self.name, None, range, direction, false)
    }
}

/// A secondary index of a store as seen through one transaction.
#[derive(Clone, Debug)]
pub struct IndexHandle {
    store: StoreHandle,
    name: String,
}

impl IndexHandle {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn store(&self) -> &StoreHandle {
        &self.store
    }

    pub fn key_path(&self) -> Result<IndexPath, IdbError> {
        self.store.txn.with_schema(|data| {
            data.store(&self.store.name)?
                .index(&self.name)
                .map(|index| index.key_path.clone())
        })
    }

    pub fn params(&self) -> Result<IndexParams, IdbError> {
        self.store.txn.with_schema(|data| {
            data.store(&self.store.name)?
                .index(&self.name)
                .map(|index| index.params)
        })
    }

    /// Row of the first entry in the range.
    pub fn get(&self, range: KeyRange) -> Result<Request<Option<Json>>, IdbError> {
        let (store, index) = self.names();
        self.store.txn.request(move |data| {
            let store = data.store(&store)?;
            let first = store.index(&index)?.scan(Some(&range)).next();
            Ok(first.and_then(|(_, pk)| store.rows.get(pk).cloned()))
        })
    }

    /// Primary key of the first entry in the range.
    pub fn get_key(&self, range: KeyRange) -> Result<Request<Option<Key>>, IdbError> {
        let (store, index) = self.names();
        self.store.txn.request(move |data| {
            let first = data.store(&store)?.index(&index)?.scan(Some(&range)).next();
            Ok(first.map(|(_, pk)| pk.clone()))
        })
    }

    pub fn get_all(
        &self,
        range: Option<KeyRange>,
        count: Option<u32>,
    ) -> Result<Request<Vec<Json>>, IdbError> {
        let (store, index) = self.names();
        self.store.txn.request(move |data| {
            let store = data.store(&store)?;
            let rows = store
                .index(&index)?
                .scan(range.as_ref())
                .filter_map(|(_, pk)| store.rows.get(pk).cloned());
            Ok(limit(rows, count))
        })
    }

    pub fn get_all_keys(
        &self,
        range: Option<KeyRange>,
        count: Option<u32>,
    ) -> Result<Request<Vec<Key>>, IdbError> {
        let (store, index) = self.names();
        self.store.txn.request(move |data| {
            let keys = data
                .store(&store)?
                .index(&index)?
                .scan(range.as_ref())
                .map(|(_, pk)| pk.clone());
            Ok(limit_keys(keys, count))
        })
    }

    pub fn count(&self, range: Option<KeyRange>) -> Result<Request<u64>, IdbError> {
        let (store, index) = self.names();
        self.store.txn.request(move |data| {
            Ok(data.store(&store)?.index(&index)?.count(range.as_ref()))
        })
    }

    pub fn open_cursor(
        &self,
        range: Option<KeyRange>,
        direction: Direction,
    ) -> Result<CursorRequest, IdbError> {
        CursorHandle::open(
            self.store.txn.clone(),
            &self.store.name,
            Some(&self.name),
            range,
            direction,
            true,
        )
    }

    pub fn open_key_cursor(
        &self,
        range: Option<KeyRange>,
        direction: Direction,
    ) -> Result<CursorRequest, IdbError> {
        CursorHandle::open(
            self.store.txn.clone(),
            &self.store.name,
            Some(&self.name),
            range,
            direction,
            false,
        )
    }

    fn names(&self) -> (String, String) {
        (self.store.name.clone(), self.name.clone())
    }
}
