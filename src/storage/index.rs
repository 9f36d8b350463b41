use crate::catalog::key::Key;
use crate::catalog::schema::{IndexParams, IndexPath};
use crate::error::IdbError;
use crate::storage::range::{KeyRange, is_empty};
use im::{OrdMap, OrdSet};
use serde_json::Value as Json;

/// Secondary index: index key to the ordered set of primary keys carrying it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexData {
    pub key_path: IndexPath,
    pub params: IndexParams,
    pub entries: OrdMap<Key, OrdSet<Key>>,
}

impl IndexData {
    pub fn new(key_path: IndexPath, params: IndexParams) -> Self {
        Self {
            key_path,
            params,
            entries: OrdMap::new(),
        }
    }

    pub fn keys_for(&self, value: &Json) -> Vec<Key> {
        self.key_path.index_keys(value, self.params.multi_entry)
    }

    /// Fails when a unique index already maps one of the row's keys to a
    /// different primary key.
    pub fn check_unique(&self, name: &str, value: &Json, pk: &Key) -> Result<(), IdbError> {
        if !self.params.unique {
            return Ok(());
        }
        for key in self.keys_for(value) {
            if let Some(pks) = self.entries.get(&key)
                && pks.iter().any(|existing| existing != pk)
            {
                return Err(IdbError::Constraint(format!(
                    "unique index '{name}' already contains key {key}"
                )));
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, value: &Json, pk: &Key) {
        for key in self.keys_for(value) {
            let mut pks = self.entries.get(&key).cloned().unwrap_or_default();
            pks.insert(pk.clone());
            self.entries.insert(key, pks);
        }
    }

    pub fn remove(&mut self, value: &Json, pk: &Key) {
        for key in self.keys_for(value) {
            let Some(mut pks) = self.entries.get(&key).cloned() else {
                continue;
            };
            pks.remove(pk);
            if pks.is_empty() {
                self.entries.remove(&key);
            } else {
                self.entries.insert(key, pks);
            }
        }
    }

    /// `(index key, primary key)` pairs in range order.
    pub fn scan(&self, range: Option<&KeyRange>) -> impl Iterator<Item = (&Key, &Key)> + '_ {
        let (lower, upper) = range.map(KeyRange::bounds).unwrap_or((
            std::ops::Bound::Unbounded,
            std::ops::Bound::Unbounded,
        ));
        let scan = if is_empty(&lower, &upper) {
            None
        } else {
            Some(self.entries.range((lower, upper)))
        };
        scan.into_iter()
            .flatten()
            .flat_map(|(key, pks)| pks.iter().map(move |pk| (key, pk)))
    }

    pub fn count(&self, range: Option<&KeyRange>) -> u64 {
        self.scan(range).count() as u64
    }
}
