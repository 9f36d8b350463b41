use crate::catalog::schema::KeyPath;
use crate::error::IdbError;
use crate::storage::DatabaseShared;
use crate::storage::activity::{Activity, Hold};
use crate::storage::keyspace::DatabaseData;
use crate::storage::request::Request;
use crate::storage::store::StoreHandle;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionMode {
    ReadOnly,
    ReadWrite,
    VersionChange,
}

/// How a finished transaction ended.
#[derive(Debug, Clone)]
pub enum TransactionOutcome {
    Committed,
    Aborted(Option<IdbError>),
}

/// Result of running one queued job: the callback to fire once the transaction
/// state is unlocked, and the error that aborts the transaction, if any.
pub(crate) struct Delivery {
    pub notify: Box<dyn FnOnce() + Send>,
    pub error: Option<IdbError>,
}

/// A queued request. It receives the working data, or `None` when the
/// transaction finished before the job ran.
pub(crate) type Job = Box<dyn FnOnce(Option<&mut DatabaseData>) -> Delivery + Send>;

/// Per-database lock held for the lifetime of a transaction.
pub(crate) struct LockGuard {
    _shared: Option<OwnedRwLockReadGuard<()>>,
    _exclusive: Option<OwnedRwLockWriteGuard<()>>,
}

impl LockGuard {
    pub(crate) fn shared(guard: OwnedRwLockReadGuard<()>) -> Self {
        Self {
            _shared: Some(guard),
            _exclusive: None,
        }
    }

    pub(crate) fn exclusive(guard: OwnedRwLockWriteGuard<()>) -> Self {
        Self {
            _shared: None,
            _exclusive: Some(guard),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Active,
    Committing,
    Finished,
}

type CompleteListener = Box<dyn FnOnce() + Send>;
type FailureListener = Box<dyn FnOnce(Option<IdbError>) + Send>;

struct TxnState {
    phase: Phase,
    queue: VecDeque<Job>,
    working: Option<DatabaseData>,
    guard: Option<LockGuard>,
    outcome: Option<TransactionOutcome>,
    on_complete: Vec<CompleteListener>,
    on_error: Vec<FailureListener>,
    on_abort: Vec<FailureListener>,
}

struct TransactionShared {
    id: u64,
    mode: TransactionMode,
    scope: Vec<String>,
    database: Arc<DatabaseShared>,
    idle_yields: usize,
    activity: Activity,
    state: Mutex<TxnState>,
}

enum Step {
    Run(Delivery),
    Idle,
    Commit,
    Done,
}

static NEXT_TRANSACTION_ID: AtomicU64 = AtomicU64::new(1);

/// A native transaction. Requests queue up and run in order on a driver task;
/// once the queue stays empty and nothing holds the transaction for the
/// configured number of scheduler yields, the transaction commits on its own.
///
/// A transaction is held while a delivered result waits for its consumer and
/// while a [`Hold`] from [`TransactionHandle::hold`] is alive.
#[derive(Clone)]
pub struct TransactionHandle {
    inner: Arc<TransactionShared>,
}

impl TransactionHandle {
    /// Creates the transaction and spawns its driver. Version-change
    /// transactions arrive with their lock and working copy already in hand.
    ///
    /// The returned hold is taken before the driver starts; the idle countdown
    /// cannot begin until it is dropped.
    pub(crate) fn start(
        database: Arc<DatabaseShared>,
        mode: TransactionMode,
        scope: Vec<String>,
        guard: Option<LockGuard>,
        working: Option<DatabaseData>,
        idle_yields: usize,
    ) -> (Self, Hold) {
        let activity = Activity::default();
        let opening = activity.hold();
        let handle = Self {
            inner: Arc::new(TransactionShared {
                id: NEXT_TRANSACTION_ID.fetch_add(1, Ordering::Relaxed),
                mode,
                scope,
                database,
                idle_yields: idle_yields.max(1),
                activity,
                state: Mutex::new(TxnState {
                    phase: Phase::Active,
                    queue: VecDeque::new(),
                    working,
                    guard,
                    outcome: None,
                    on_complete: Vec::new(),
                    on_error: Vec::new(),
                    on_abort: Vec::new(),
                }),
            }),
        };
        debug!(
            transaction = handle.inner.id,
            database = %handle.inner.database.name,
            mode = ?mode,
            "transaction started"
        );
        tokio::spawn(Arc::clone(&handle.inner).drive());
        (handle, opening)
    }

    pub fn id(&self) -> u64 {
        self.inner.id
    }

    pub fn mode(&self) -> TransactionMode {
        self.inner.mode
    }

    /// Keeps the transaction from committing on its own until the hold is
    /// dropped.
    pub fn hold(&self) -> Hold {
        self.inner.activity.hold()
    }

    pub(crate) fn activity(&self) -> &Activity {
        &self.inner.activity
    }

    pub fn database_name(&self) -> &str {
        &self.inner.database.name
    }

    /// Stores this transaction may touch.
    pub fn store_names(&self) -> Vec<String> {
        match self.inner.mode {
            TransactionMode::VersionChange => self.with_schema(DatabaseData::store_names),
            _ => self.inner.scope.clone(),
        }
    }

    pub fn is_finished(&self) -> bool {
        self.inner.state.lock().phase == Phase::Finished
    }

    /// The error that aborted the transaction.
    pub fn error(&self) -> Option<IdbError> {
        match &self.inner.state.lock().outcome {
            Some(TransactionOutcome::Aborted(error)) => error.clone(),
            _ => None,
        }
    }

    pub fn object_store(&self, name: &str) -> Result<StoreHandle, IdbError> {
        if self.is_finished() {
            return Err(IdbError::InvalidState(
                "transaction has already finished".into(),
            ));
        }
        let in_scope = self.inner.mode == TransactionMode::VersionChange
            || self.inner.scope.iter().any(|store| store == name);
        if !in_scope || !self.with_schema(|data| data.stores.contains_key(name)) {
            return Err(IdbError::store_not_found(name));
        }
        Ok(StoreHandle::new(self.clone(), name))
    }

    pub fn create_object_store(
        &self,
        name: &str,
        key_path: KeyPath,
    ) -> Result<StoreHandle, IdbError> {
        self.with_working(|data| data.create_store(name, key_path))?;
        debug!(transaction = self.inner.id, store = name, "object store created");
        Ok(StoreHandle::new(self.clone(), name))
    }

    pub fn delete_object_store(&self, name: &str) -> Result<(), IdbError> {
        self.with_working(|data| data.delete_store(name))?;
        debug!(transaction = self.inner.id, store = name, "object store deleted");
        Ok(())
    }

    /// Commits once every queued request has run.
    pub fn commit(&self) -> Result<(), IdbError> {
        let mut state = self.inner.state.lock();
        match state.phase {
            Phase::Active => {
                state.phase = Phase::Committing;
                self.inner.activity.wake();
                Ok(())
            }
            Phase::Committing | Phase::Finished => Err(IdbError::InvalidState(
                "transaction is already committing or finished".into(),
            )),
        }
    }

    /// Rolls back every change and fails every queued request.
    pub fn abort(&self) -> Result<(), IdbError> {
        self.inner.finish_aborted(None)
    }

    pub fn on_complete(&self, listener: impl FnOnce() + Send + 'static) {
        let mut state = self.inner.state.lock();
        let outcome = state.outcome.clone();
        match outcome {
            None => state.on_complete.push(Box::new(listener)),
            Some(TransactionOutcome::Committed) => {
                drop(state);
                listener();
            }
            Some(TransactionOutcome::Aborted(_)) => {}
        }
    }

    /// Fires when the transaction aborts because of an error.
    pub fn on_error(&self, listener: impl FnOnce(Option<IdbError>) + Send + 'static) {
        let mut state = self.inner.state.lock();
        let outcome = state.outcome.clone();
        match outcome {
            None => state.on_error.push(Box::new(listener)),
            Some(TransactionOutcome::Aborted(Some(error))) => {
                drop(state);
                listener(Some(error));
            }
            Some(_) => {}
        }
    }

    pub fn on_abort(&self, listener: impl FnOnce(Option<IdbError>) + Send + 'static) {
        let mut state = self.inner.state.lock();
        let outcome = state.outcome.clone();
        match outcome {
            None => state.on_abort.push(Box::new(listener)),
            Some(TransactionOutcome::Aborted(error)) => {
                drop(state);
                listener(error);
            }
            Some(TransactionOutcome::Committed) => {}
        }
    }

    pub(crate) fn check_writable(&self) -> Result<(), IdbError> {
        match self.inner.mode {
            TransactionMode::ReadOnly => Err(IdbError::ReadOnly),
            TransactionMode::ReadWrite | TransactionMode::VersionChange => Ok(()),
        }
    }

    pub(crate) fn enqueue(&self, job: Job) -> Result<(), IdbError> {
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Active {
            return Err(IdbError::TransactionInactive);
        }
        state.queue.push_back(job);
        self.inner.activity.wake();
        Ok(())
    }

    /// Queues an operation on the working data and returns its request.
    pub(crate) fn request<T, F>(&self, op: F) -> Result<Request<T>, IdbError>
    where
        T: Send + 'static,
        F: FnOnce(&mut DatabaseData) -> Result<T, IdbError> + Send + 'static,
    {
        let (request, responder) = Request::pair_within(Some(self.inner.activity.clone()));
        self.enqueue(Box::new(move |data| {
            let result = match data {
                Some(data) => op(data),
                None => Err(IdbError::Aborted),
            };
            let error = result.as_ref().err().cloned();
            Delivery {
                notify: Box::new(move || responder.complete(result)),
                error,
            }
        }))?;
        Ok(request)
    }

    /// Reads the schema this transaction sees.
    pub(crate) fn with_schema<R>(&self, read: impl FnOnce(&DatabaseData) -> R) -> R {
        {
            let state = self.inner.state.lock();
            if let Some(data) = state.working.as_ref() {
                return read(data);
            }
        }
        read(&self.inner.database.snapshot())
    }

    /// Applies a synchronous schema change. Only version-change transactions
    /// may alter the schema.
    pub(crate) fn with_working<R>(
        &self,
        change: impl FnOnce(&mut DatabaseData) -> Result<R, IdbError>,
    ) -> Result<R, IdbError> {
        if self.inner.mode != TransactionMode::VersionChange {
            return Err(IdbError::InvalidState(
                "the schema can only change during an upgrade".into(),
            ));
        }
        let mut state = self.inner.state.lock();
        if state.phase != Phase::Active {
            return Err(IdbError::TransactionInactive);
        }
        let data = state
            .working
            .as_mut()
            .ok_or(IdbError::TransactionInactive)?;
        change(data)
    }
}

impl std::fmt::Debug for TransactionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionHandle")
            .field("id", &self.inner.id)
            .field("mode", &self.inner.mode)
            .field("scope", &self.inner.scope)
            .finish()
    }
}

impl TransactionShared {
    async fn drive(self: Arc<Self>) {
        let needs_lock = self.state.lock().guard.is_none();
        if needs_lock {
            let lock = Arc::clone(&self.database.lock);
            let guard = match self.mode {
                TransactionMode::ReadOnly => LockGuard::shared(lock.read_owned().await),
                _ => LockGuard::exclusive(lock.write_owned().await),
            };
            let mut state = self.state.lock();
            if state.phase == Phase::Finished {
                return;
            }
            state.working = Some(self.database.snapshot());
            state.guard = Some(guard);
        }

        let mut idle = 0;
        loop {
            match self.next_step(idle) {
                Step::Run(delivery) => {
                    idle = 0;
                    (delivery.notify)();
                    if let Some(error) = delivery.error {
                        warn!(
                            transaction = self.id,
                            error = %error,
                            "request failed; aborting transaction"
                        );
                        let _ = self.finish_aborted(Some(error));
                        return;
                    }
                }
                Step::Idle if self.activity.is_idle() => {
                    idle += 1;
                    tokio::task::yield_now().await;
                }
                Step::Idle => {
                    idle = 0;
                    self.activity.changed().await;
                }
                Step::Commit => {
                    self.finish_committed();
                    return;
                }
                Step::Done => return,
            }
        }
    }

    fn next_step(&self, idle: usize) -> Step {
        let mut state = self.state.lock();
        if state.phase == Phase::Finished {
            return Step::Done;
        }
        if let Some(job) = state.queue.pop_front() {
            return Step::Run(job(state.working.as_mut()));
        }
        if state.phase == Phase::Committing || idle >= self.idle_yields {
            Step::Commit
        } else {
            Step::Idle
        }
    }

    fn finish_committed(&self) {
        let (guard, listeners) = {
            let mut state = self.state.lock();
            if state.phase == Phase::Finished {
                return;
            }
            state.phase = Phase::Finished;
            if let Some(working) = state.working.take()
                && self.mode != TransactionMode::ReadOnly
            {
                self.database.publish(working);
            }
            state.outcome = Some(TransactionOutcome::Committed);
            state.on_error.clear();
            state.on_abort.clear();
            (state.guard.take(), std::mem::take(&mut state.on_complete))
        };
        drop(guard);
        debug!(transaction = self.id, "transaction committed");
        for listener in listeners {
            listener();
        }
    }

    fn finish_aborted(&self, error: Option<IdbError>) -> Result<(), IdbError> {
        let (jobs, guard, on_error, on_abort) = {
            let mut state = self.state.lock();
            if state.phase == Phase::Finished {
                return Err(IdbError::InvalidState(
                    "transaction has already finished".into(),
                ));
            }
            state.phase = Phase::Finished;
            state.working = None;
            state.outcome = Some(TransactionOutcome::Aborted(error.clone()));
            state.on_complete.clear();
            (
                std::mem::take(&mut state.queue),
                state.guard.take(),
                std::mem::take(&mut state.on_error),
                std::mem::take(&mut state.on_abort),
            )
        };
        drop(guard);
        self.activity.wake();
        debug!(transaction = self.id, pending = jobs.len(), "transaction aborted");
        for job in jobs {
            (job(None).notify)();
        }
        if let Some(error) = &error {
            for listener in on_error {
                listener(Some(error.clone()));
            }
        }
        for listener in on_abort {
            listener(error.clone());
        }
        Ok(())
    }
}
