use crate::catalog::key::{Key, MAX_SAFE_INTEGER, inject_path, resolve_path};
use crate::catalog::schema::{IndexParams, IndexPath, KeyPath};
use crate::error::{IdbError, ResourceType};
use crate::storage::index::IndexData;
use crate::storage::range::{KeyRange, is_empty};
use im::OrdMap;
use serde_json::Value as Json;
use std::ops::Bound;

/// Committed (or working) state of one database. Cloning is cheap: every map is
/// persistent, so transactions take a snapshot and publish it back on commit.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DatabaseData {
    pub version: u64,
    pub stores: OrdMap<String, StoreData>,
}

impl DatabaseData {
    pub fn store(&self, name: &str) -> Result<&StoreData, IdbError> {
        self.stores
            .get(name)
            .ok_or_else(|| IdbError::store_not_found(name))
    }

    pub fn store_mut(&mut self, name: &str) -> Result<&mut StoreData, IdbError> {
        self.stores
            .get_mut(name)
            .ok_or_else(|| IdbError::store_not_found(name))
    }

    pub fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    pub fn create_store(&mut self, name: &str, key_path: KeyPath) -> Result<(), IdbError> {
        if self.stores.contains_key(name) {
            return Err(IdbError::AlreadyExists {
                resource_type: ResourceType::Store,
                name: name.to_string(),
            });
        }
        if matches!(key_path, KeyPath::Upgrading) {
            return Err(IdbError::InvalidAccess(format!(
                "store '{name}' needs a concrete key path"
            )));
        }
        self.stores.insert(name.to_string(), StoreData::new(key_path));
        Ok(())
    }

    pub fn delete_store(&mut self, name: &str) -> Result<(), IdbError> {
        self.stores
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IdbError::store_not_found(name))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoreData {
    pub key_path: KeyPath,
    /// Next value handed out by the key generator.
    pub next_key: u64,
    pub rows: OrdMap<Key, Json>,
    pub indexes: OrdMap<String, IndexData>,
}

impl StoreData {
    pub fn new(key_path: KeyPath) -> Self {
        Self {
            key_path,
            next_key: 1,
            rows: OrdMap::new(),
            indexes: OrdMap::new(),
        }
    }

    pub fn index(&self, name: &str) -> Result<&IndexData, IdbError> {
        self.indexes
            .get(name)
            .ok_or_else(|| IdbError::index_not_found(name))
    }

    pub fn index_names(&self) -> Vec<String> {
        self.indexes.keys().cloned().collect()
    }

    pub fn create_index(
        &mut self,
        name: &str,
        key_path: IndexPath,
        params: IndexParams,
    ) -> Result<(), IdbError> {
        if self.indexes.contains_key(name) {
            return Err(IdbError::AlreadyExists {
                resource_type: ResourceType::Index,
                name: name.to_string(),
            });
        }
        if params.multi_entry && matches!(key_path, IndexPath::Compound(_)) {
            return Err(IdbError::InvalidAccess(format!(
                "multi-entry index '{name}' cannot use a compound key path"
            )));
        }
        let mut index = IndexData::new(key_path, params);
        for (pk, value) in self.rows.iter() {
            index.check_unique(name, value, pk)?;
            index.insert(value, pk);
        }
        self.indexes.insert(name.to_string(), index);
        Ok(())
    }

    pub fn delete_index(&mut self, name: &str) -> Result<(), IdbError> {
        self.indexes
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| IdbError::index_not_found(name))
    }

    /// Resolves the primary key of a row about to be written: out-of-line stores
    /// take the supplied key or generate one, in-line stores read it from the row.
    /// Generated in-line keys are written into the row.
    fn resolve_key(&mut self, value: &mut Json, key: Option<Key>) -> Result<Key, IdbError> {
        match (&self.key_path, key) {
            (KeyPath::Path(_) | KeyPath::Paths(_) | KeyPath::AutoIncrementPath(_), Some(_)) => {
                Err(IdbError::Data(
                    "the store uses in-line keys and a key was supplied".into(),
                ))
            }
            (KeyPath::Path(_) | KeyPath::Paths(_), None) => match self.key_path.extract(value) {
                Some(Some(key)) => Ok(key),
                _ => Err(IdbError::Data(
                    "the row does not contain a valid key at the store's key path".into(),
                )),
            },
            (KeyPath::Manual, None) => Err(IdbError::Data(
                "the store uses out-of-line keys and no key was supplied".into(),
            )),
            (KeyPath::AutoIncrementPath(path), None) => {
                let path = path.clone();
                match resolve_path(value, &path) {
                    Some(found) => {
                        let key = Key::from_json(found)?.validate()?;
                        self.observe_key(&key);
                        Ok(key)
                    }
                    None => {
                        let key = self.generate_key()?;
                        inject_path(value, &path, &key)?;
                        Ok(key)
                    }
                }
            }
            (KeyPath::AutoIncrement, Some(key)) => {
                let key = key.validate()?;
                self.observe_key(&key);
                Ok(key)
            }
            (KeyPath::AutoIncrement, None) => self.generate_key(),
            (KeyPath::Manual | KeyPath::Upgrading, Some(key)) => key.validate(),
            (KeyPath::Upgrading, None) => Err(IdbError::InvalidState(
                "store has no concrete key path".into(),
            )),
        }
    }

    fn generate_key(&mut self) -> Result<Key, IdbError> {
        if self.next_key as f64 > MAX_SAFE_INTEGER {
            return Err(IdbError::Constraint("the key generator is exhausted".into()));
        }
        let key = Key::from(self.next_key);
        self.next_key += 1;
        Ok(key)
    }

    /// Numeric keys written explicitly push the generator past them.
    fn observe_key(&mut self, key: &Key) {
        if let Some(n) = key.as_f64()
            && n >= self.next_key as f64
        {
            self.next_key = (n.floor() + 1.0).min(MAX_SAFE_INTEGER + 1.0) as u64;
        }
    }

    /// Writes a row, maintaining every index. With `no_overwrite` an existing
    /// primary key is a constraint error.
    pub fn store_record(
        &mut self,
        store: &str,
        mut value: Json,
        key: Option<Key>,
        no_overwrite: bool,
    ) -> Result<Key, IdbError> {
        let key = self.resolve_key(&mut value, key)?;
        if no_overwrite && self.rows.contains_key(&key) {
            return Err(IdbError::Constraint(format!(
                "store '{store}' already contains key {key}"
            )));
        }
        for (name, index) in self.indexes.iter() {
            index.check_unique(name, &value, &key)?;
        }
        self.remove_row(&key);
        self.for_each_index(|index| index.insert(&value, &key));
        self.rows.insert(key.clone(), value);
        Ok(key)
    }

    /// Like [`StoreData::store_record`] but keeps the primary key fixed, as a
    /// cursor update does.
    pub fn replace_record(&mut self, store: &str, value: Json, pk: &Key) -> Result<(), IdbError> {
        match self.key_path.extract(&value) {
            Some(Some(key)) if &key == pk => {
                self.store_record(store, value, None, false)?;
            }
            Some(_) => {
                return Err(IdbError::Data(
                    "an update through a cursor cannot change the row's key".into(),
                ));
            }
            None => {
                self.store_record(store, value, Some(pk.clone()), false)?;
            }
        }
        Ok(())
    }

    fn for_each_index(&mut self, mut apply: impl FnMut(&mut IndexData)) {
        let names = self.index_names();
        for name in names {
            if let Some(index) = self.indexes.get_mut(&name) {
                apply(index);
            }
        }
    }

    fn remove_row(&mut self, pk: &Key) -> Option<Json> {
        let old = self.rows.remove(pk)?;
        self.for_each_index(|index| index.remove(&old, pk));
        Some(old)
    }

    pub fn delete_key(&mut self, pk: &Key) -> bool {
        self.remove_row(pk).is_some()
    }

    pub fn delete_range(&mut self, range: &KeyRange) -> u64 {
        let doomed: Vec<Key> = self.keys_in(Some(range)).cloned().collect();
        for pk in &doomed {
            self.remove_row(pk);
        }
        doomed.len() as u64
    }

    pub fn clear(&mut self) {
        self.rows = OrdMap::new();
        self.for_each_index(|index| index.entries = OrdMap::new());
    }

    pub fn keys_in(&self, range: Option<&KeyRange>) -> impl Iterator<Item = &Key> + '_ {
        self.rows_in(range).map(|(key, _)| key)
    }

    pub fn rows_in(&self, range: Option<&KeyRange>) -> impl Iterator<Item = (&Key, &Json)> + '_ {
        let (lower, upper) = range
            .map(KeyRange::bounds)
            .unwrap_or((Bound::Unbounded, Bound::Unbounded));
        let scan = if is_empty(&lower, &upper) {
            None
        } else {
            Some(self.rows.range((lower, upper)))
        };
        scan.into_iter().flatten()
    }

    pub fn count(&self, range: Option<&KeyRange>) -> u64 {
        self.rows_in(range).count() as u64
    }
}
