use crate::error::IdbError;
use crate::query::ObjectStore;
use crate::query::delete::DeleteQueryBuilder;
use crate::query::select::SelectQueryBuilder;
use crate::query::update::{InsertQueryBuilder, UpdateQueryBuilder};
use crate::storage::activity::Hold;
use crate::storage::transaction::{TransactionHandle, TransactionMode};
use parking_lot::Mutex;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use tokio::sync::oneshot;
use tracing::{debug, warn};

/// Read access to the stores a transaction was opened over.
///
/// A transaction handed to a scope must not be kept after the scope returns:
/// by then it has committed or aborted and every request fails.
pub struct ReadOnlyTransaction {
    handle: TransactionHandle,
    upgrading: bool,
}

impl ReadOnlyTransaction {
    pub(crate) fn new(handle: TransactionHandle) -> Self {
        Self {
            handle,
            upgrading: false,
        }
    }

    pub(crate) fn upgrading(handle: TransactionHandle) -> Self {
        Self {
            handle,
            upgrading: true,
        }
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self {
            handle: self.handle.clone(),
            upgrading: self.upgrading,
        }
    }

    /// The native transaction underneath.
    pub fn handle(&self) -> &TransactionHandle {
        &self.handle
    }

    pub fn mode(&self) -> TransactionMode {
        self.handle.mode()
    }

    pub fn store_names(&self) -> Vec<String> {
        self.handle.store_names()
    }

    pub fn object_store(&self, store: &str) -> Result<ObjectStore, IdbError> {
        Ok(ObjectStore::new(
            self.handle.object_store(store)?,
            self.upgrading,
        ))
    }

    pub fn select_from<T>(&self, store: &str) -> Result<SelectQueryBuilder<T>, IdbError> {
        Ok(SelectQueryBuilder::new(self.object_store(store)?))
    }

    /// Aborts the transaction; the enclosing scope's result is then an error.
    pub fn abort(&self) -> Result<(), IdbError> {
        self.handle.abort()
    }
}

/// Read and write access to the stores a transaction was opened over.
pub struct ReadWriteTransaction {
    inner: ReadOnlyTransaction,
}

impl ReadWriteTransaction {
    pub(crate) fn new(handle: TransactionHandle) -> Self {
        Self {
            inner: ReadOnlyTransaction::new(handle),
        }
    }

    pub(crate) fn upgrading(handle: TransactionHandle) -> Self {
        Self {
            inner: ReadOnlyTransaction::upgrading(handle),
        }
    }

    pub(crate) fn duplicate(&self) -> Self {
        Self {
            inner: self.inner.duplicate(),
        }
    }

    pub fn insert_into<T>(&self, store: &str) -> Result<InsertQueryBuilder<T>, IdbError> {
        self.update(store)
    }

    pub fn update<T>(&self, store: &str) -> Result<UpdateQueryBuilder<T>, IdbError> {
        Ok(UpdateQueryBuilder::new(self.object_store(store)?))
    }

    pub fn delete_from(&self, store: &str) -> Result<DeleteQueryBuilder, IdbError> {
        Ok(DeleteQueryBuilder::new(self.object_store(store)?))
    }
}

impl Deref for ReadWriteTransaction {
    type Target = ReadOnlyTransaction;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Aborts a transaction whose scope future is dropped before finishing.
struct AbortOnDrop {
    handle: Option<TransactionHandle>,
}

impl AbortOnDrop {
    fn disarm(&mut self) {
        self.handle = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take()
            && !handle.is_finished()
        {
            warn!(
                transaction = handle.id(),
                "transaction scope dropped before finishing; aborting"
            );
            let _ = handle.abort();
        }
    }
}

type OutcomeSender = Arc<Mutex<Option<oneshot::Sender<Result<(), IdbError>>>>>;

/// First terminal event wins.
fn settle(sender: &OutcomeSender, outcome: Result<(), IdbError>) {
    if let Some(sender) = sender.lock().take() {
        let _ = sender.send(outcome);
    }
}

/// Runs `scope` inside a native transaction and resolves with the scope's value
/// once the transaction commits.
///
/// A scope error aborts the transaction and is returned unchanged. A scope that
/// succeeds still fails when the transaction ends in error or abort.
///
/// `opening` keeps the transaction alive until the scope is first polled. After
/// that the transaction is held for the duration of every poll, so it only
/// counts towards auto-commit while the scope is suspended.
pub(crate) async fn run<Tx, R, E, F, Fut>(
    handle: TransactionHandle,
    opening: Hold,
    trx: Tx,
    scope: F,
) -> Result<R, E>
where
    F: FnOnce(Tx) -> Fut,
    Fut: Future<Output = Result<R, E>>,
    E: From<IdbError>,
{
    let (sender, receiver) = oneshot::channel();
    let sender: OutcomeSender = Arc::new(Mutex::new(Some(sender)));
    {
        let sender = Arc::clone(&sender);
        handle.on_complete(move || settle(&sender, Ok(())));
    }
    {
        let sender = Arc::clone(&sender);
        handle.on_error(move |error| {
            settle(&sender, Err(error.unwrap_or(IdbError::UnknownTransaction)))
        });
    }
    handle.on_abort(move |error| settle(&sender, Err(error.unwrap_or(IdbError::Aborted))));

    let mut guard = AbortOnDrop {
        handle: Some(handle.clone()),
    };
    let scope = scope(trx);
    let mut scope = std::pin::pin!(scope);
    let mut opening = Some(opening);
    let result = futures::future::poll_fn(|cx| {
        let _turn = handle.hold();
        let poll = scope.as_mut().poll(cx);
        drop(opening.take());
        poll
    })
    .await;
    guard.disarm();

    match result {
        Err(error) => {
            if let Err(reason) = handle.abort() {
                debug!(
                    transaction = handle.id(),
                    reason = %reason,
                    "transaction finished before the failing scope returned"
                );
            }
            Err(error)
        }
        Ok(value) => {
            if let Err(reason) = handle.commit() {
                debug!(
                    transaction = handle.id(),
                    reason = %reason,
                    "transaction finished before the scope returned"
                );
            }
            match receiver.await {
                Ok(Ok(())) => Ok(value),
                Ok(Err(error)) => Err(E::from(error)),
                Err(_) => Err(E::from(IdbError::UnknownTransaction)),
            }
        }
    }
}
