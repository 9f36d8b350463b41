use crate::catalog::key::Key;
use crate::error::IdbError;
use crate::storage::index::IndexData;
use crate::storage::keyspace::{DatabaseData, StoreData};
use crate::storage::range::{KeyRange, is_empty, max_lower, min_upper};
use crate::storage::request::{CursorRequest, Request};
use crate::storage::transaction::{Delivery, Job, TransactionHandle};
use parking_lot::Mutex;
use serde_json::Value as Json;
use std::ops::Bound;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    #[default]
    Next,
    NextUnique,
    Prev,
    PrevUnique,
}

impl Direction {
    pub fn is_forward(self) -> bool {
        matches!(self, Direction::Next | Direction::NextUnique)
    }

    pub fn is_unique(self) -> bool {
        matches!(self, Direction::NextUnique | Direction::PrevUnique)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Position {
    pub key: Key,
    pub primary_key: Key,
}

#[derive(Debug, Clone)]
enum Seek {
    Start,
    Step,
    ToKey(Key),
    ToPrimaryKey(Key, Key),
    Advance(u32),
}

/// What a cursor walks: store rows keyed by primary key, or index entries
/// keyed by index key with primary keys as the second level.
enum View<'a> {
    Store(&'a StoreData),
    Index(&'a IndexData),
}

impl View<'_> {
    fn first_key(&self, lower: Bound<Key>, upper: Bound<Key>) -> Option<Key> {
        if is_empty(&lower, &upper) {
            return None;
        }
        match self {
            View::Store(store) => store.rows.range((lower, upper)).next().map(|(k, _)| k.clone()),
            View::Index(index) => index.entries.range((lower, upper)).next().map(|(k, _)| k.clone()),
        }
    }

    fn last_key(&self, lower: Bound<Key>, upper: Bound<Key>) -> Option<Key> {
        if is_empty(&lower, &upper) {
            return None;
        }
        match self {
            View::Store(store) => store
                .rows
                .range((lower, upper))
                .next_back()
                .map(|(k, _)| k.clone()),
            View::Index(index) => index
                .entries
                .range((lower, upper))
                .next_back()
                .map(|(k, _)| k.clone()),
        }
    }

    /// Primary keys stored under `key` that fall within the given bounds.
    fn primary_key(&self, key: &Key, lower: Bound<Key>, upper: Bound<Key>, last: bool) -> Option<Key> {
        match self {
            View::Store(_) => {
                let fits_lower = match &lower {
                    Bound::Included(pk) => key >= pk,
                    Bound::Excluded(pk) => key > pk,
                    Bound::Unbounded => true,
                };
                let fits_upper = match &upper {
                    Bound::Included(pk) => key <= pk,
                    Bound::Excluded(pk) => key < pk,
                    Bound::Unbounded => true,
                };
                (fits_lower && fits_upper).then(|| key.clone())
            }
            View::Index(index) => {
                if is_empty(&lower, &upper) {
                    return None;
                }
                let pks = index.entries.get(key)?;
                let mut scan = pks.range((lower, upper));
                let found = if last { scan.next_back() } else { scan.next() };
                found.cloned()
            }
        }
    }

    fn first_pk(&self, key: &Key) -> Option<Key> {
        self.primary_key(key, Bound::Unbounded, Bound::Unbounded, false)
    }

    fn last_pk(&self, key: &Key) -> Option<Key> {
        self.primary_key(key, Bound::Unbounded, Bound::Unbounded, true)
    }
}

fn range_bounds(range: Option<&KeyRange>) -> (Bound<Key>, Bound<Key>) {
    range
        .map(KeyRange::bounds)
        .unwrap_or((Bound::Unbounded, Bound::Unbounded))
}

/// First position past the `from` bound, in range order.
fn forward_from(view: &View<'_>, range: Option<&KeyRange>, from: Bound<Key>) -> Option<Position> {
    let (lower, upper) = range_bounds(range);
    let key = view.first_key(max_lower(lower, from), upper)?;
    let primary_key = view.first_pk(&key)?;
    Some(Position { key, primary_key })
}

/// Last position before the `to` bound. Non-unique reverse walks start each key
/// at its greatest primary key; unique walks at its smallest.
fn backward_from(
    view: &View<'_>,
    range: Option<&KeyRange>,
    to: Bound<Key>,
    unique: bool,
) -> Option<Position> {
    let (lower, upper) = range_bounds(range);
    let key = view.last_key(lower, min_upper(upper, to))?;
    let primary_key = if unique {
        view.first_pk(&key)?
    } else {
        view.last_pk(&key)?
    };
    Some(Position { key, primary_key })
}

fn step(
    view: &View<'_>,
    range: Option<&KeyRange>,
    direction: Direction,
    current: &Position,
) -> Option<Position> {
    let Position { key, primary_key } = current;
    match direction {
        Direction::Next => view
            .primary_key(key, Bound::Excluded(primary_key.clone()), Bound::Unbounded, false)
            .map(|pk| Position {
                key: key.clone(),
                primary_key: pk,
            })
            .or_else(|| forward_from(view, range, Bound::Excluded(key.clone()))),
        Direction::NextUnique => forward_from(view, range, Bound::Excluded(key.clone())),
        Direction::Prev => view
            .primary_key(key, Bound::Unbounded, Bound::Excluded(primary_key.clone()), true)
            .map(|pk| Position {
                key: key.clone(),
                primary_key: pk,
            })
            .or_else(|| backward_from(view, range, Bound::Excluded(key.clone()), false)),
        Direction::PrevUnique => backward_from(view, range, Bound::Excluded(key.clone()), true),
    }
}

fn seek_position(
    view: &View<'_>,
    range: Option<&KeyRange>,
    direction: Direction,
    current: Option<&Position>,
    seek: &Seek,
) -> Option<Position> {
    let forward = direction.is_forward();
    match (seek, current) {
        (Seek::Start, _) | (_, None) => {
            if forward {
                forward_from(view, range, Bound::Unbounded)
            } else {
                backward_from(view, range, Bound::Unbounded, direction.is_unique())
            }
        }
        (Seek::Step, Some(current)) => step(view, range, direction, current),
        (Seek::Advance(count), Some(current)) => {
            let mut position = current.clone();
            for _ in 0..*count {
                position = step(view, range, direction, &position)?;
            }
            Some(position)
        }
        (Seek::ToKey(target), Some(_)) => {
            if forward {
                forward_from(view, range, Bound::Included(target.clone()))
            } else {
                backward_from(
                    view,
                    range,
                    Bound::Included(target.clone()),
                    direction.is_unique(),
                )
            }
        }
        (Seek::ToPrimaryKey(target, target_pk), Some(_)) => {
            let in_range = range.is_none_or(|range| range.includes(target));
            if forward {
                in_range
                    .then(|| {
                        view.primary_key(target, Bound::Included(target_pk.clone()), Bound::Unbounded, false)
                    })
                    .flatten()
                    .map(|pk| Position {
                        key: target.clone(),
                        primary_key: pk,
                    })
                    .or_else(|| forward_from(view, range, Bound::Excluded(target.clone())))
            } else {
                in_range
                    .then(|| {
                        view.primary_key(target, Bound::Unbounded, Bound::Included(target_pk.clone()), true)
                    })
                    .flatten()
                    .map(|pk| Position {
                        key: target.clone(),
                        primary_key: pk,
                    })
                    .or_else(|| backward_from(view, range, Bound::Excluded(target.clone()), false))
            }
        }
    }
}

#[derive(Default)]
struct CursorState {
    position: Option<Position>,
    value: Option<Json>,
    pending: bool,
    exhausted: bool,
}

struct CursorShared {
    txn: TransactionHandle,
    store: String,
    index: Option<String>,
    range: Option<KeyRange>,
    direction: Direction,
    with_value: bool,
    request: CursorRequest,
    state: Mutex<CursorState>,
}

/// A native cursor. Positioning calls queue a step on the owning transaction;
/// the result arrives through the cursor's request.
#[derive(Clone)]
pub struct CursorHandle {
    inner: Arc<CursorShared>,
}

impl CursorHandle {
    pub(crate) fn open(
        txn: TransactionHandle,
        store: &str,
        index: Option<&str>,
        range: Option<KeyRange>,
        direction: Direction,
        with_value: bool,
    ) -> Result<CursorRequest, IdbError> {
        let request = CursorRequest::new(Some(txn.activity().clone()));
        let cursor = CursorHandle {
            inner: Arc::new(CursorShared {
                txn: txn.clone(),
                store: store.to_string(),
                index: index.map(str::to_string),
                range,
                direction,
                with_value,
                request: request.clone(),
                state: Mutex::new(CursorState {
                    pending: true,
                    ..CursorState::default()
                }),
            }),
        };
        txn.enqueue(seek_job(cursor, Seek::Start))?;
        Ok(request)
    }

    pub fn direction(&self) -> Direction {
        self.inner.direction
    }

    pub fn key(&self) -> Option<Key> {
        self.inner.state.lock().position.as_ref().map(|p| p.key.clone())
    }

    pub fn primary_key(&self) -> Option<Key> {
        self.inner
            .state
            .lock()
            .position
            .as_ref()
            .map(|p| p.primary_key.clone())
    }

    /// Row at the current position; always `None` for key cursors.
    pub fn value(&self) -> Option<Json> {
        self.inner.state.lock().value.clone()
    }

    /// Moves to the next position in the cursor's direction.
    pub fn step(&self) -> Result<(), IdbError> {
        self.reposition(Seek::Step)
    }

    pub fn continue_key(&self, key: Key) -> Result<(), IdbError> {
        self.reposition(Seek::ToKey(key))
    }

    /// Moves to `key` and, within it, to `primary_key`. Only non-unique index
    /// cursors may do this.
    pub fn continue_primary_key(&self, key: Key, primary_key: Key) -> Result<(), IdbError> {
        self.reposition(Seek::ToPrimaryKey(key, primary_key))
    }

    pub fn advance(&self, count: u32) -> Result<(), IdbError> {
        self.reposition(Seek::Advance(count))
    }

    pub fn update(&self, value: Json) -> Result<Request<Key>, IdbError> {
        self.inner.txn.check_writable()?;
        if !self.inner.with_value {
            return Err(IdbError::InvalidState(
                "a key cursor cannot update rows".into(),
            ));
        }
        let pk = self.settled_primary_key()?;
        let store = self.inner.store.clone();
        self.inner.txn.request(move |data| {
            data.store_mut(&store)?.replace_record(&store, value, &pk)?;
            Ok(pk)
        })
    }

    pub fn delete(&self) -> Result<Request<()>, IdbError> {
        self.inner.txn.check_writable()?;
        if !self.inner.with_value {
            return Err(IdbError::InvalidState(
                "a key cursor cannot delete rows".into(),
            ));
        }
        let pk = self.settled_primary_key()?;
        let store = self.inner.store.clone();
        self.inner.txn.request(move |data| {
            data.store_mut(&store)?.delete_key(&pk);
            Ok(())
        })
    }

    fn settled_primary_key(&self) -> Result<Key, IdbError> {
        let state = self.inner.state.lock();
        match (&state.position, state.pending) {
            (Some(position), false) => Ok(position.primary_key.clone()),
            _ => Err(IdbError::InvalidState(
                "the cursor is moving or has finished".into(),
            )),
        }
    }

    fn reposition(&self, seek: Seek) -> Result<(), IdbError> {
        {
            let mut state = self.inner.state.lock();
            let position = match (&state.position, state.pending || state.exhausted) {
                (Some(position), false) => position.clone(),
                _ => {
                    return Err(IdbError::InvalidState(
                        "the cursor is moving or has finished".into(),
                    ));
                }
            };
            self.validate(&position, &seek)?;
            state.pending = true;
        }
        if let Err(error) = self.inner.txn.enqueue(seek_job(self.clone(), seek)) {
            self.inner.state.lock().pending = false;
            return Err(error);
        }
        Ok(())
    }

    fn validate(&self, position: &Position, seek: &Seek) -> Result<(), IdbError> {
        let forward = self.inner.direction.is_forward();
        match seek {
            Seek::Start | Seek::Step => Ok(()),
            Seek::Advance(0) => Err(IdbError::Data(
                "advance count must be greater than zero".into(),
            )),
            Seek::Advance(_) => Ok(()),
            Seek::ToKey(key) => {
                if !key.is_valid() {
                    return Err(IdbError::Data(format!("{key} is not a valid key")));
                }
                let behind = if forward {
                    key <= &position.key
                } else {
                    key >= &position.key
                };
                if behind {
                    return Err(IdbError::Data(format!(
                        "continue key {key} does not move past {}",
                        position.key
                    )));
                }
                Ok(())
            }
            Seek::ToPrimaryKey(key, primary_key) => {
                if self.inner.index.is_none() || self.inner.direction.is_unique() {
                    return Err(IdbError::InvalidAccess(
                        "only non-unique index cursors can continue to a primary key".into(),
                    ));
                }
                if !key.is_valid() || !primary_key.is_valid() {
                    return Err(IdbError::Data("continue keys must be valid keys".into()));
                }
                let behind = if forward {
                    key < &position.key
                        || (key == &position.key && primary_key <= &position.primary_key)
                } else {
                    key > &position.key
                        || (key == &position.key && primary_key >= &position.primary_key)
                };
                if behind {
                    return Err(IdbError::Data(format!(
                        "continue position ({key}, {primary_key}) does not move past ({}, {})",
                        position.key, position.primary_key
                    )));
                }
                Ok(())
            }
        }
    }

    fn locate(
        &self,
        data: &DatabaseData,
        seek: &Seek,
    ) -> Result<Option<(Position, Option<Json>)>, IdbError> {
        let store = data.store(&self.inner.store)?;
        let view = match &self.inner.index {
            Some(name) => View::Index(store.index(name)?),
            None => View::Store(store),
        };
        let current = self.inner.state.lock().position.clone();
        let found = seek_position(
            &view,
            self.inner.range.as_ref(),
            self.inner.direction,
            current.as_ref(),
            seek,
        );
        Ok(found.map(|position| {
            let value = if self.inner.with_value {
                store.rows.get(&position.primary_key).cloned()
            } else {
                None
            };
            (position, value)
        }))
    }

    fn settle(&self, found: Option<(Position, Option<Json>)>) {
        let mut state = self.inner.state.lock();
        state.pending = false;
        match found {
            Some((position, value)) => {
                state.position = Some(position);
                state.value = value;
            }
            None => {
                state.position = None;
                state.value = None;
                state.exhausted = true;
            }
        }
    }
}

fn seek_job(cursor: CursorHandle, seek: Seek) -> Job {
    Box::new(move |data| {
        let request = cursor.inner.request.clone();
        let Some(data) = data else {
            cursor.settle(None);
            return Delivery {
                notify: Box::new(move || request.fire(Err(IdbError::Aborted))),
                error: None,
            };
        };
        match cursor.locate(data, &seek) {
            Ok(found) => {
                let exhausted = found.is_none();
                cursor.settle(found);
                Delivery {
                    notify: Box::new(move || request.fire(Ok((!exhausted).then_some(cursor)))),
                    error: None,
                }
            }
            Err(error) => {
                cursor.settle(None);
                Delivery {
                    notify: Box::new({
                        let error = error.clone();
                        move || request.fire(Err(error))
                    }),
                    error: Some(error),
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::{Direction, Position, Seek, View, seek_position};
    use crate::catalog::key::Key;
    use crate::catalog::schema::{IndexParams, IndexPath, KeyPath};
    use crate::storage::keyspace::StoreData;
    use crate::storage::range::KeyRange;
    use serde_json::json;

    fn typed_store() -> StoreData {
        let mut store = StoreData::new(KeyPath::path("id"));
        store
            .create_index("type", IndexPath::from("type"), IndexParams::default())
            .expect("index");
        for (id, kind) in [(1, "a"), (2, "b"), (3, "a"), (4, "b"), (5, "a")] {
            store
                .store_record("s", json!({"id": id, "type": kind}), None, false)
                .expect("row");
        }
        store
    }

    fn walk(view: &View<'_>, range: Option<&KeyRange>, direction: Direction) -> Vec<(Key, Key)> {
        let mut out = Vec::new();
        let mut current = seek_position(view, range, direction, None, &Seek::Start);
        while let Some(position) = current {
            out.push((position.key.clone(), position.primary_key.clone()));
            current = seek_position(view, range, direction, Some(&position), &Seek::Step);
        }
        out
    }

    fn pks(walked: &[(Key, Key)]) -> Vec<Key> {
        walked.iter().map(|(_, pk)| pk.clone()).collect()
    }

    #[test]
    fn index_walks_in_every_direction() {
        let store = typed_store();
        let view = View::Index(store.index("type").expect("index"));
        let next = walk(&view, None, Direction::Next);
        assert_eq!(pks(&next), [1, 3, 5, 2, 4].map(Key::from).to_vec());
        let prev = walk(&view, None, Direction::Prev);
        assert_eq!(pks(&prev), [4, 2, 5, 3, 1].map(Key::from).to_vec());
        let next_unique = walk(&view, None, Direction::NextUnique);
        assert_eq!(pks(&next_unique), [1, 2].map(Key::from).to_vec());
        let prev_unique = walk(&view, None, Direction::PrevUnique);
        assert_eq!(pks(&prev_unique), [2, 1].map(Key::from).to_vec());
    }

    #[test]
    fn store_walk_respects_range() {
        let store = typed_store();
        let view = View::Store(&store);
        let range = KeyRange::bound(2, 4, false, true).expect("range");
        let walked = walk(&view, Some(&range), Direction::Next);
        assert_eq!(pks(&walked), [2, 3].map(Key::from).to_vec());
        let walked = walk(&view, Some(&range), Direction::Prev);
        assert_eq!(pks(&walked), [3, 2].map(Key::from).to_vec());
    }

    #[test]
    fn advance_skips_positions() {
        let store = typed_store();
        let view = View::Store(&store);
        let start = Position {
            key: Key::from(1),
            primary_key: Key::from(1),
        };
        let found = seek_position(&view, None, Direction::Next, Some(&start), &Seek::Advance(2))
            .expect("position");
        assert_eq!(found.primary_key, Key::from(3));
        assert!(
            seek_position(&view, None, Direction::Next, Some(&start), &Seek::Advance(9)).is_none()
        );
    }

    #[test]
    fn continue_to_primary_key_within_index_key() {
        let store = typed_store();
        let view = View::Index(store.index("type").expect("index"));
        let start = Position {
            key: Key::from("a"),
            primary_key: Key::from(1),
        };
        let found = seek_position(
            &view,
            None,
            Direction::Next,
            Some(&start),
            &Seek::ToPrimaryKey(Key::from("a"), Key::from(4)),
        )
        .expect("position");
        assert_eq!(found.primary_key, Key::from(5));
        let past = seek_position(
            &view,
            None,
            Direction::Next,
            Some(&start),
            &Seek::ToPrimaryKey(Key::from("a"), Key::from(6)),
        )
        .expect("position");
        assert_eq!((past.key, past.primary_key), (Key::from("b"), Key::from(2)));
    }

    #[test]
    fn continue_to_key_lands_on_next_present_key() {
        let store = typed_store();
        let view = View::Store(&store);
        let start = Position {
            key: Key::from(1),
            primary_key: Key::from(1),
        };
        let found = seek_position(
            &view,
            None,
            Direction::Next,
            Some(&start),
            &Seek::ToKey(Key::from(3.5)),
        )
        .expect("position");
        assert_eq!(found.key, Key::from(4));
    }
}
