use crate::catalog::key::Key;
use crate::catalog::schema::KeyPath;
use crate::cursor::{
    Cursor, CursorEntry, KeyEntry, KeyStream, Keys, PrimaryKeyStream, ValueStream, Values,
};
use crate::error::IdbError;
use crate::query::range::build_range;
use crate::query::{ErrorSource, NOT_FOUND_MESSAGE, ObjectStore, Source, decode};
use crate::request::wait_on_request;
use crate::storage::cursor::Direction;
use crate::storage::range::KeyRange;
use futures::Stream;
use serde::de::DeserializeOwned;
use std::marker::PhantomData;

/// The single where-clause a select may carry.
#[derive(Debug, Clone)]
enum Clause {
    Unfiltered,
    Key(KeyRange),
    /// Walk an index, over `range` when one was given.
    Index { name: String, range: Option<KeyRange> },
}

/// Read query over one object store, decoding rows as `T`.
///
/// A where-clause is set at most once; any later `by`, `where_` or
/// `where_key` call fails with [`IdbError::ClauseRedefined`].
#[derive(Debug)]
pub struct SelectQueryBuilder<T> {
    store: ObjectStore,
    clause: Clause,
    row: PhantomData<fn() -> T>,
}

impl<T> SelectQueryBuilder<T> {
    pub(crate) fn new(store: ObjectStore) -> Self {
        Self {
            store,
            clause: Clause::Unfiltered,
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

    /// Orders the query by an index without narrowing it. The index is
    /// resolved when the query runs.
    pub fn by(self, index: &str) -> Result<Self, IdbError> {
        self.ensure_unfiltered()?;
        Ok(self.with_clause(Clause::Index {
            name: index.to_string(),
            range: None,
        }))
    }

    /// Compares an index with a value.
    pub fn where_(self, index: &str, op: &str, value: impl Into<Key>) -> Result<Self, IdbError> {
        self.index_clause(index, op, value.into(), None)
    }

    /// Compares an index with bounds.
    pub fn where_range(
        self,
        index: &str,
        op: &str,
        lower: impl Into<Key>,
        upper: impl Into<Key>,
    ) -> Result<Self, IdbError> {
        self.index_clause(index, op, lower.into(), Some(upper.into()))
    }

    /// Compares the primary key with a value.
    pub fn where_key(self, op: &str, value: impl Into<Key>) -> Result<Self, IdbError> {
        self.ensure_unfiltered()?;
        let range = build_range(op, value.into(), None)?;
        Ok(self.with_clause(Clause::Key(range)))
    }

    /// Compares the primary key with bounds.
    pub fn where_key_range(
        self,
        op: &str,
        lower: impl Into<Key>,
        upper: impl Into<Key>,
    ) -> Result<Self, IdbError> {
        self.ensure_unfiltered()?;
        let range = build_range(op, lower.into(), Some(upper.into()))?;
        Ok(self.with_clause(Clause::Key(range)))
    }

    fn index_clause(
        self,
        index: &str,
        op: &str,
        first: Key,
        second: Option<Key>,
    ) -> Result<Self, IdbError> {
        self.ensure_unfiltered()?;
        let range = build_range(op, first, second)?;
        Ok(self.with_clause(Clause::Index {
            name: index.to_string(),
            range: Some(range),
        }))
    }

    fn ensure_unfiltered(&self) -> Result<(), IdbError> {
        match self.clause {
            Clause::Unfiltered => Ok(()),
            _ => Err(IdbError::ClauseRedefined),
        }
    }

    fn with_clause(mut self, clause: Clause) -> Self {
        self.clause = clause;
        self
    }

    fn source(&self) -> Result<(Source, Option<KeyRange>), IdbError> {
        let store = self.store.handle();
        match &self.clause {
            Clause::Unfiltered => Ok((Source::Store(store.clone()), None)),
            Clause::Key(range) => Ok((Source::Store(store.clone()), Some(range.clone()))),
            Clause::Index { name, range } => Ok((Source::Index(store.index(name)?), range.clone())),
        }
    }

    /// Source and range of a single-row read; those need a range.
    fn first_source(&self) -> Result<(Source, KeyRange), IdbError> {
        let store = self.store.handle();
        match &self.clause {
            Clause::Key(range) => Ok((Source::Store(store.clone()), range.clone())),
            Clause::Index {
                name,
                range: Some(range),
            } => Ok((Source::Index(store.index(name)?), range.clone())),
            _ => Err(IdbError::MissingWhereClause),
        }
    }

    /// Number of rows matching the query.
    pub async fn count(&self) -> Result<u64, IdbError> {
        let (source, range) = self.source()?;
        wait_on_request(source.count(range)?).await
    }

    /// Primary keys of the matching rows, at most `limit` when given.
    pub async fn get_all_keys(&self, limit: Option<u32>) -> Result<Vec<Key>, IdbError> {
        let (source, range) = self.source()?;
        wait_on_request(source.get_all_keys(range, limit)?).await
    }

    /// Primary key of the first matching row.
    pub async fn get_first_key(&self) -> Result<Option<Key>, IdbError> {
        let (source, range) = self.first_source()?;
        wait_on_request(source.get_key(range)?).await
    }

    pub async fn get_first_key_or_throw(&self) -> Result<Key, IdbError> {
        self.get_first_key().await?.ok_or(IdbError::RecordNotFound)
    }

    /// Like [`get_first_key_or_throw`](Self::get_first_key_or_throw), with the
    /// missing-row error built by `error`.
    pub async fn get_first_key_or_else<E, S>(&self, error: S) -> Result<Key, E>
    where
        E: From<IdbError>,
        S: ErrorSource<E>,
    {
        match self.get_first_key().await? {
            Some(key) => Ok(key),
            None => Err(error.into_error(NOT_FOUND_MESSAGE)),
        }
    }

    /// Opens a key cursor over the matching rows.
    pub fn key_cursor(&self, direction: Option<Direction>) -> Result<Cursor<Keys>, IdbError> {
        let direction = direction.unwrap_or_default();
        let (source, range) = self.source()?;
        Ok(Cursor::new(source.open_key_cursor(range, direction)?, direction))
    }

    /// Streams the cursor keys: index keys when walking an index, primary keys
    /// otherwise.
    pub fn stream_keys(&self, direction: Option<Direction>) -> Result<KeyStream, IdbError> {
        Ok(KeyStream::new(self.key_cursor(direction)?, |entry: KeyEntry| {
            entry.key
        }))
    }

    pub fn stream_primary_keys(
        &self,
        direction: Option<Direction>,
    ) -> Result<PrimaryKeyStream, IdbError> {
        Ok(PrimaryKeyStream::new(
            self.key_cursor(direction)?,
            |entry: KeyEntry| entry.primary_key,
        ))
    }
}

impl<T: DeserializeOwned> SelectQueryBuilder<T> {
    /// The matching rows, at most `limit` when given.
    pub async fn get_all(&self, limit: Option<u32>) -> Result<Vec<T>, IdbError> {
        let (source, range) = self.source()?;
        let rows = wait_on_request(source.get_all(range, limit)?).await?;
        rows.into_iter().map(decode).collect()
    }

    /// First matching row, `None` when nothing matches.
    ///
    /// Fails with [`IdbError::MissingWhereClause`] unless the query carries a
    /// range, through `where_` or `where_key`.
    pub async fn get_first(&self) -> Result<Option<T>, IdbError> {
        let (source, range) = self.first_source()?;
        match wait_on_request(source.get(range)?).await? {
            Some(row) => decode(row).map(Some),
            None => Ok(None),
        }
    }

    /// First matching row; [`IdbError::RecordNotFound`] when nothing matches.
    pub async fn get_first_or_throw(&self) -> Result<T, IdbError> {
        self.get_first().await?.ok_or(IdbError::RecordNotFound)
    }

    /// First matching row; the error built by `error` when nothing matches.
    pub async fn get_first_or_else<E, S>(&self, error: S) -> Result<T, E>
    where
        E: From<IdbError>,
        S: ErrorSource<E>,
    {
        match self.get_first().await? {
            Some(row) => Ok(row),
            None => Err(error.into_error(NOT_FOUND_MESSAGE)),
        }
    }

    /// Opens a value cursor over the matching rows.
    pub fn cursor(&self, direction: Option<Direction>) -> Result<Cursor<Values<T>>, IdbError> {
        let direction = direction.unwrap_or_default();
        let (source, range) = self.source()?;
        Ok(Cursor::new(source.open_cursor(range, direction)?, direction))
    }

    /// Streams the matching rows.
    pub fn stream(&self, direction: Option<Direction>) -> Result<ValueStream<T>, IdbError> {
        Ok(ValueStream::new(
            self.cursor(direction)?,
            |entry: CursorEntry<T>| entry.value,
        ))
    }

    /// Converts the query into a forward [`Stream`] of rows.
    pub fn into_stream(self) -> Result<impl Stream<Item = Result<T, IdbError>>, IdbError>
    where
        T: 'static,
    {
        Ok(self.stream(None)?.into_stream())
    }
}
