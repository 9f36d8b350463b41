use crate::catalog::key::Key;
use crate::error::IdbError;
use crate::query::{decode, encode};
use crate::request::wait_on_request;
use crate::storage::activity::Hold;
use crate::storage::cursor::{CursorHandle, Direction};
use crate::storage::request::CursorRequest;
use futures::Stream;
use parking_lot::Mutex;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;
use std::sync::Arc;
use tokio::sync::oneshot;

type Position = Result<Option<CursorHandle>, IdbError>;
/// A position, plus the hold on the transaction owed until it is consumed.
type Delivered = (Position, Option<Hold>);
type Waiter = Arc<Mutex<Option<oneshot::Sender<Delivered>>>>;

/// What a cursor yields per position.
pub trait CursorKind {
    type Entry;

    /// Whether the native cursor carries rows.
    const WITH_VALUE: bool;

    fn entry(cursor: &CursorHandle) -> Result<Self::Entry, IdbError>;
}

/// Cursor over rows decoded as `T`.
pub struct Values<T>(PhantomData<fn() -> T>);

/// Cursor over keys only.
pub struct Keys;

#[derive(Debug, Clone, PartialEq)]
pub struct CursorEntry<T> {
    /// Index key, or the primary key when the cursor walks the store.
    pub key: Key,
    pub primary_key: Key,
    pub value: T,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEntry {
    pub key: Key,
    pub primary_key: Key,
}

fn position_keys(cursor: &CursorHandle) -> Result<(Key, Key), IdbError> {
    match (cursor.key(), cursor.primary_key()) {
        (Some(key), Some(primary_key)) => Ok((key, primary_key)),
        _ => Err(IdbError::InvalidState("cursor has no position".into())),
    }
}

impl<T: DeserializeOwned> CursorKind for Values<T> {
    type Entry = CursorEntry<T>;
    const WITH_VALUE: bool = true;

    fn entry(cursor: &CursorHandle) -> Result<Self::Entry, IdbError> {
        let (key, primary_key) = position_keys(cursor)?;
        let value = cursor
            .value()
            .ok_or_else(|| IdbError::InvalidState("cursor has no value".into()))?;
        Ok(CursorEntry {
            key,
            primary_key,
            value: decode(value)?,
        })
    }
}

impl CursorKind for Keys {
    type Entry = KeyEntry;
    const WITH_VALUE: bool = false;

    fn entry(cursor: &CursorHandle) -> Result<Self::Entry, IdbError> {
        let (key, primary_key) = position_keys(cursor)?;
        Ok(KeyEntry { key, primary_key })
    }
}

/// Movement applied before the next position is produced.
#[derive(Debug, Clone)]
enum NextStep {
    Continue,
    Advance(u32),
    ContinueTo(Key, Option<Key>),
}

enum State {
    Unopened,
    Positioned(CursorHandle),
    Exhausted,
}

/// Pull-based walk over a native cursor.
///
/// Positions are produced one at a time and only on demand: the native cursor
/// is moved when [`Cursor::next`] is called, not before. `next` takes `&mut
/// self`, so a cursor never has two positioning requests in flight. The walk
/// cannot be restarted.
pub struct Cursor<K: CursorKind> {
    waiter: Waiter,
    receiver: Option<oneshot::Receiver<Delivered>>,
    direction: Direction,
    state: State,
    step: NextStep,
    kind: PhantomData<fn() -> K>,
}

impl<K: CursorKind> Cursor<K> {
    /// Wraps a freshly opened native cursor request. The first position is
    /// already on its way.
    pub(crate) fn new(request: CursorRequest, direction: Direction) -> Self {
        let waiter: Waiter = Arc::new(Mutex::new(None));
        let (sender, receiver) = oneshot::channel();
        *waiter.lock() = Some(sender);
        let activity = request.holder();
        {
            let waiter = Arc::clone(&waiter);
            let activity = activity.clone();
            request.on_success(move |cursor| {
                if let Some(sender) = waiter.lock().take() {
                    let _ = sender.send((Ok(cursor), activity.as_ref().map(|a| a.hold())));
                }
            });
        }
        {
            let waiter = Arc::clone(&waiter);
            request.on_error(move |error| {
                if let Some(sender) = waiter.lock().take() {
                    let error = error.unwrap_or(IdbError::UnknownRequest);
                    let _ = sender.send((Err(error), activity.as_ref().map(|a| a.hold())));
                }
            });
        }
        Self {
            waiter,
            receiver: Some(receiver),
            direction,
            state: State::Unopened,
            step: NextStep::Continue,
            kind: PhantomData,
        }
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_exhausted(&self) -> bool {
        matches!(self.state, State::Exhausted)
    }

    /// Index key, or primary key for store cursors, of the current position.
    pub fn key(&self) -> Option<Key> {
        self.current().and_then(CursorHandle::key)
    }

    pub fn primary_key(&self) -> Option<Key> {
        self.current().and_then(CursorHandle::primary_key)
    }

    /// Makes the next call to [`Cursor::next`] skip `count` positions, the
    /// current one included, instead of moving by one.
    pub fn advance(&mut self, count: u32) -> Result<(), IdbError> {
        self.positioned()?;
        if count == 0 {
            return Err(IdbError::Data(
                "advance count must be greater than zero".into(),
            ));
        }
        self.step = NextStep::Advance(count);
        Ok(())
    }

    /// Makes the next call to [`Cursor::next`] jump to the first position at
    /// `key` or beyond it in the cursor's direction. With `primary_key`, ties
    /// on `key` are resolved by primary key as well.
    pub fn continue_to(&mut self, key: impl Into<Key>, primary_key: Option<Key>) -> Result<(), IdbError> {
        self.positioned()?;
        self.step = NextStep::ContinueTo(key.into(), primary_key);
        Ok(())
    }

    /// Produces the next position, or `None` once the walk is over.
    pub async fn next(&mut self) -> Result<Option<K::Entry>, IdbError> {
        match &self.state {
            State::Exhausted => return Ok(None),
            State::Unopened => {}
            State::Positioned(cursor) => {
                let cursor = cursor.clone();
                let step = std::mem::replace(&mut self.step, NextStep::Continue);
                self.rearm();
                let moved = match step {
                    NextStep::Continue => cursor.step(),
                    NextStep::Advance(count) => cursor.advance(count),
                    NextStep::ContinueTo(key, None) => cursor.continue_key(key),
                    NextStep::ContinueTo(key, Some(primary_key)) => {
                        cursor.continue_primary_key(key, primary_key)
                    }
                };
                if let Err(error) = moved {
                    self.finish();
                    return Err(error);
                }
            }
        }

        let Some(receiver) = self.receiver.take() else {
            self.finish();
            return Ok(None);
        };
        let position = receiver.await.map(|(position, _owed)| position);
        match position {
            Ok(Ok(Some(cursor))) => {
                let entry = K::entry(&cursor);
                self.state = State::Positioned(cursor);
                entry.map(Some)
            }
            Ok(Ok(None)) => {
                self.finish();
                Ok(None)
            }
            Ok(Err(error)) => {
                self.finish();
                Err(error)
            }
            Err(_) => {
                self.finish();
                Err(IdbError::UnknownRequest)
            }
        }
    }

    /// Removes the row at the current position.
    pub async fn delete(&self) -> Result<(), IdbError> {
        let request = self.positioned()?.delete()?;
        wait_on_request(request).await
    }

    /// Converts the cursor into a [`Stream`] of its entries.
    pub fn into_stream(self) -> impl Stream<Item = Result<K::Entry, IdbError>>
    where
        K::Entry: 'static,
    {
        futures::stream::unfold(Some(self), |cursor| async move {
            let mut cursor = cursor?;
            match cursor.next().await {
                Ok(Some(entry)) => Some((Ok(entry), Some(cursor))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }

    fn current(&self) -> Option<&CursorHandle> {
        match &self.state {
            State::Positioned(cursor) => Some(cursor),
            _ => None,
        }
    }

    fn positioned(&self) -> Result<&CursorHandle, IdbError> {
        self.current().ok_or_else(|| {
            IdbError::InvalidState("cursor is not positioned on a row".into())
        })
    }

    /// Replaces the waiter before the native cursor is asked to move, so the
    /// position it reports always finds a receiver.
    fn rearm(&mut self) {
        let (sender, receiver) = oneshot::channel();
        *self.waiter.lock() = Some(sender);
        self.receiver = Some(receiver);
    }

    fn finish(&mut self) {
        self.state = State::Exhausted;
        self.receiver = None;
        self.waiter.lock().take();
    }
}

impl<T: DeserializeOwned + Serialize> Cursor<Values<T>> {
    /// Replaces the row at the current position and resolves with its key.
    pub async fn update(&self, row: &T) -> Result<Key, IdbError> {
        let value = encode(row)?;
        let request = self.positioned()?.update(value)?;
        wait_on_request(request).await
    }
}

impl<K: CursorKind> std::fmt::Debug for Cursor<K> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            State::Unopened => "unopened",
            State::Positioned(_) => "positioned",
            State::Exhausted => "exhausted",
        };
        f.debug_struct("Cursor")
            .field("direction", &self.direction)
            .field("state", &state)
            .field("with_value", &K::WITH_VALUE)
            .finish()
    }
}

/// A cursor projected to one part of each entry, such as the row or a key.
///
/// [`CursorStream::resume`] forwards an optional advance count before pulling
/// the next item, which lets a caller skip runs of positions mid-walk.
pub struct CursorStream<K: CursorKind, O> {
    cursor: Cursor<K>,
    project: fn(K::Entry) -> O,
}

pub type ValueStream<T> = CursorStream<Values<T>, T>;
pub type KeyStream = CursorStream<Keys, Key>;
pub type PrimaryKeyStream = CursorStream<Keys, Key>;

impl<K: CursorKind, O> CursorStream<K, O> {
    pub(crate) fn new(cursor: Cursor<K>, project: fn(K::Entry) -> O) -> Self {
        Self { cursor, project }
    }

    pub async fn next(&mut self) -> Result<Option<O>, IdbError> {
        self.resume(None).await
    }

    /// Pulls the next item, first skipping `advance` positions when given.
    /// The count is ignored before the first item.
    pub async fn resume(&mut self, advance: Option<u32>) -> Result<Option<O>, IdbError> {
        if let Some(count) = advance
            && self.cursor.current().is_some()
        {
            self.cursor.advance(count)?;
        }
        Ok(self.cursor.next().await?.map(self.project))
    }

    pub fn cursor(&self) -> &Cursor<K> {
        &self.cursor
    }

    pub fn into_stream(self) -> impl Stream<Item = Result<O, IdbError>>
    where
        K::Entry: 'static,
        O: 'static,
    {
        let project = self.project;
        futures::stream::unfold(Some(self.cursor), move |cursor| async move {
            let mut cursor = cursor?;
            match cursor.next().await {
                Ok(Some(entry)) => Some((Ok(project(entry)), Some(cursor))),
                Ok(None) => None,
                Err(error) => Some((Err(error), None)),
            }
        })
    }
}
