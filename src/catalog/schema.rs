use crate::catalog::key::{Key, resolve_path};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

/// How a store derives the primary key of its rows.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum KeyPath {
    /// Out-of-line keys supplied with every write.
    Manual,
    /// Out-of-line keys produced by the store's key generator.
    AutoIncrement,
    /// In-line key read from a dotted member path.
    Path(String),
    /// In-line key at a dotted member path; rows without one get a generated
    /// key written there.
    AutoIncrementPath(String),
    /// In-line compound key read from several member paths.
    Paths(Vec<String>),
    /// Schema not known statically, as seen while migrating. Never stored.
    Upgrading,
}

impl KeyPath {
    pub fn path(path: impl Into<String>) -> Self {
        KeyPath::Path(path.into())
    }

    pub fn auto_increment_path(path: impl Into<String>) -> Self {
        KeyPath::AutoIncrementPath(path.into())
    }

    pub fn paths<I, S>(paths: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        KeyPath::Paths(paths.into_iter().map(Into::into).collect())
    }

    pub fn is_inline(&self) -> bool {
        matches!(
            self,
            KeyPath::Path(_) | KeyPath::Paths(_) | KeyPath::AutoIncrementPath(_)
        )
    }

    pub fn auto_increment(&self) -> bool {
        matches!(self, KeyPath::AutoIncrement | KeyPath::AutoIncrementPath(_))
    }

    /// Extracts the in-line key of a row. `None` for out-of-line stores.
    pub(crate) fn extract(&self, value: &Json) -> Option<Option<Key>> {
        match self {
            KeyPath::Path(path) | KeyPath::AutoIncrementPath(path) => {
                Some(IndexPath::Single(path.clone()).extract(value))
            }
            KeyPath::Paths(paths) => Some(IndexPath::Compound(paths.clone()).extract(value)),
            _ => None,
        }
    }
}

/// Member path an index reads its keys from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum IndexPath {
    Single(String),
    Compound(Vec<String>),
}

impl IndexPath {
    /// Key found at this path, or `None` when the row is not indexable there.
    pub fn extract(&self, value: &Json) -> Option<Key> {
        match self {
            IndexPath::Single(path) => resolve_path(value, path).and_then(json_key),
            IndexPath::Compound(paths) => paths
                .iter()
                .map(|path| resolve_path(value, path).and_then(json_key))
                .collect::<Option<Vec<_>>>()
                .map(Key::Array),
        }
    }

    /// Keys a row contributes to an index. Multi-entry single paths over an
    /// array contribute each distinct valid element.
    pub(crate) fn index_keys(&self, value: &Json, multi_entry: bool) -> Vec<Key> {
        match (self, multi_entry) {
            (IndexPath::Single(path), true) => match resolve_path(value, path) {
                Some(Json::Array(items)) => {
                    let mut keys: Vec<Key> = items.iter().filter_map(json_key).collect();
                    keys.sort();
                    keys.dedup();
                    keys
                }
                Some(other) => json_key(other).into_iter().collect(),
                None => Vec::new(),
            },
            _ => self.extract(value).into_iter().collect(),
        }
    }
}

fn json_key(value: &Json) -> Option<Key> {
    Key::from_json(value).ok().filter(Key::is_valid)
}

impl From<&str> for IndexPath {
    fn from(value: &str) -> Self {
        IndexPath::Single(value.to_string())
    }
}

impl From<String> for IndexPath {
    fn from(value: String) -> Self {
        IndexPath::Single(value)
    }
}

impl From<Vec<String>> for IndexPath {
    fn from(value: Vec<String>) -> Self {
        IndexPath::Compound(value)
    }
}

impl<const N: usize> From<[&str; N]> for IndexPath {
    fn from(value: [&str; N]) -> Self {
        IndexPath::Compound(value.iter().map(|path| path.to_string()).collect())
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct IndexParams {
    pub unique: bool,
    pub multi_entry: bool,
}

impl IndexParams {
    pub fn unique() -> Self {
        Self {
            unique: true,
            multi_entry: false,
        }
    }

    pub fn multi_entry() -> Self {
        Self {
            unique: false,
            multi_entry: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{IndexPath, KeyPath};
    use crate::catalog::key::Key;
    use serde_json::json;

    #[test]
    fn compound_paths_build_array_keys() {
        let row = json!({"last": "Reynolds", "first": "Malcolm", "age": 49});
        let path = IndexPath::from(["last", "first"]);
        assert_eq!(
            path.extract(&row),
            Some(Key::Array(vec![Key::from("Reynolds"), Key::from("Malcolm")]))
        );
        assert_eq!(IndexPath::from(["last", "nickname"]).extract(&row), None);
    }

    #[test]
    fn multi_entry_indexes_each_distinct_element() {
        let row = json!({"tags": ["b", "a", "b", null]});
        let keys = IndexPath::from("tags").index_keys(&row, true);
        assert_eq!(keys, vec![Key::from("a"), Key::from("b")]);
        let whole = IndexPath::from("tags").index_keys(&json!({"tags": ["a", "b"]}), false);
        assert_eq!(whole, vec![Key::Array(vec![Key::from("a"), Key::from("b")])]);
    }

    #[test]
    fn out_of_line_key_paths_extract_nothing() {
        assert_eq!(KeyPath::Manual.extract(&json!({"id": 1})), None);
        assert_eq!(
            KeyPath::path("id").extract(&json!({"id": 1})),
            Some(Some(Key::from(1)))
        );
        assert!(KeyPath::paths(["a", "b"]).is_inline());
        let generated = KeyPath::auto_increment_path("id");
        assert!(generated.is_inline() && generated.auto_increment());
        assert_eq!(generated.extract(&json!({"name": "x"})), Some(None));
    }
}
