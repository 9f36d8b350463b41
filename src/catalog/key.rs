use crate::error::IdbError;
use serde_json::Value as Json;
use std::cmp::Ordering;
use std::fmt;

/// A valid store or index key.
///
/// Keys of different kinds order as `Number < Date < String < Binary < Array`;
/// arrays compare element-wise with a shorter prefix ordering first.
#[derive(Debug, Clone)]
pub enum Key {
    Number(f64),
    /// Milliseconds since the Unix epoch.
    Date(f64),
    String(String),
    Binary(Vec<u8>),
    Array(Vec<Key>),
}

impl Key {
    pub fn number(value: f64) -> Self {
        Key::Number(unsigned_zero(value))
    }

    pub fn date(millis: f64) -> Self {
        Key::Date(unsigned_zero(millis))
    }

    pub fn binary(bytes: impl Into<Vec<u8>>) -> Self {
        Key::Binary(bytes.into())
    }

    fn kind_rank(&self) -> u8 {
        match self {
            Key::Number(_) => 0,
            Key::Date(_) => 1,
            Key::String(_) => 2,
            Key::Binary(_) => 3,
            Key::Array(_) => 4,
        }
    }

    /// NaN numbers and dates are not keys; arrays are valid when every element is.
    pub fn is_valid(&self) -> bool {
        match self {
            Key::Number(n) | Key::Date(n) => !n.is_nan(),
            Key::String(_) | Key::Binary(_) => true,
            Key::Array(items) => items.iter().all(Key::is_valid),
        }
    }

    pub(crate) fn validate(self) -> Result<Key, IdbError> {
        if self.is_valid() {
            Ok(self)
        } else {
            Err(IdbError::Data(format!("{self} is not a valid key")))
        }
    }

    /// Converts a JSON value into a key. Only numbers, strings and arrays of
    /// those are keys.
    pub fn from_json(value: &Json) -> Result<Key, IdbError> {
        match value {
            Json::Number(n) => n
                .as_f64()
                .map(Key::number)
                .ok_or_else(|| IdbError::Data(format!("{n} is not a valid key"))),
            Json::String(s) => Ok(Key::String(s.clone())),
            Json::Array(items) => items
                .iter()
                .map(Key::from_json)
                .collect::<Result<Vec<_>, _>>()
                .map(Key::Array),
            other => Err(IdbError::Data(format!("{other} is not a valid key"))),
        }
    }

    /// JSON form of the key; integral numbers become JSON integers so rows with
    /// integer fields deserialize.
    pub fn to_json(&self) -> Json {
        match self {
            Key::Number(n) | Key::Date(n) => number_to_json(*n),
            Key::String(s) => Json::String(s.clone()),
            Key::Binary(bytes) => Json::Array(bytes.iter().map(|b| Json::from(*b)).collect()),
            Key::Array(items) => Json::Array(items.iter().map(Key::to_json).collect()),
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Key::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// The number as an integer, when it is one.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Key::Number(n) if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER => Some(*n as i64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Key::String(s) => Some(s),
            _ => None,
        }
    }
}

/// -0 and +0 are the same key.
fn unsigned_zero(n: f64) -> f64 {
    if n == 0.0 { 0.0 } else { n }
}

/// Largest integer a generated key may take.
pub(crate) const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

fn number_to_json(n: f64) -> Json {
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE_INTEGER {
        Json::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Json::Number)
            .unwrap_or(Json::Null)
    }
}

impl PartialEq for Key {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Key {}

impl PartialOrd for Key {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Key {
    fn cmp(&self, other: &Self) -> Ordering {
        let rank_cmp = self.kind_rank().cmp(&other.kind_rank());
        if rank_cmp != Ordering::Equal {
            return rank_cmp;
        }

        match (self, other) {
            (Key::Number(a), Key::Number(b)) | (Key::Date(a), Key::Date(b)) => {
                unsigned_zero(*a).total_cmp(&unsigned_zero(*b))
            }
            (Key::String(a), Key::String(b)) => a.cmp(b),
            (Key::Binary(a), Key::Binary(b)) => a.cmp(b),
            (Key::Array(a), Key::Array(b)) => a.cmp(b),
            _ => Ordering::Equal,
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Key::Number(n) => write!(f, "{n}"),
            Key::Date(n) => write!(f, "Date({n})"),
            Key::String(s) => write!(f, "{s:?}"),
            Key::Binary(bytes) => write!(f, "Binary({} bytes)", bytes.len()),
            Key::Array(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
        }
    }
}

impl From<f64> for Key {
    fn from(value: f64) -> Self {
        Key::number(value)
    }
}

impl From<i32> for Key {
    fn from(value: i32) -> Self {
        Key::number(f64::from(value))
    }
}

impl From<u32> for Key {
    fn from(value: u32) -> Self {
        Key::number(f64::from(value))
    }
}

impl From<i64> for Key {
    fn from(value: i64) -> Self {
        Key::number(value as f64)
    }
}

impl From<u64> for Key {
    fn from(value: u64) -> Self {
        Key::number(value as f64)
    }
}

impl From<&str> for Key {
    fn from(value: &str) -> Self {
        Key::String(value.to_string())
    }
}

impl From<String> for Key {
    fn from(value: String) -> Self {
        Key::String(value)
    }
}

impl From<Vec<Key>> for Key {
    fn from(value: Vec<Key>) -> Self {
        Key::Array(value)
    }
}

impl From<&Key> for Key {
    fn from(value: &Key) -> Self {
        value.clone()
    }
}

/// Resolves a dotted member path against a row. The empty path is the row itself.
pub(crate) fn resolve_path<'a>(value: &'a Json, path: &str) -> Option<&'a Json> {
    if path.is_empty() {
        return Some(value);
    }
    path.split('.')
        .try_fold(value, |current, member| current.as_object()?.get(member))
}

/// Writes `key` at a dotted member path, creating missing intermediate
/// objects. Fails when the row or an intermediate member is not an object.
pub(crate) fn inject_path(value: &mut Json, path: &str, key: &Key) -> Result<(), IdbError> {
    let not_object = || IdbError::Data(format!("cannot inject a key at '{path}' into a non-object"));
    let mut members = path.split('.').peekable();
    let mut current = value;
    while let Some(member) = members.next() {
        let object = current.as_object_mut().ok_or_else(not_object)?;
        if members.peek().is_none() {
            object.insert(member.to_string(), key.to_json());
            return Ok(());
        }
        current = object
            .entry(member.to_string())
            .or_insert_with(|| Json::Object(serde_json::Map::new()));
    }
    Err(not_object())
}
