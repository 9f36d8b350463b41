//! Reference storage engine with browser-database semantics: named, versioned
//! databases of object stores and indexes, transactions that commit once their
//! request queue goes idle, and callback-based requests and cursors.

pub mod activity;
pub mod cursor;
pub mod index;
pub mod keyspace;
pub mod range;
pub mod request;
pub mod store;
pub mod transaction;

use crate::config::EngineConfig;
use crate::error::IdbError;
use crate::storage::activity::Hold;
use crate::storage::keyspace::DatabaseData;
use crate::storage::request::{Request, Responder};
use crate::storage::transaction::{LockGuard, TransactionHandle, TransactionMode};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{OnceCell, RwLock, oneshot};
use tracing::{debug, info, warn};

pub(crate) struct DatabaseShared {
    pub name: String,
    data: Mutex<DatabaseData>,
    /// Shared by read-only transactions, exclusive for everything else.
    pub lock: Arc<RwLock<()>>,
    connections: AtomicUsize,
}

impl DatabaseShared {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            data: Mutex::new(DatabaseData::default()),
            lock: Arc::new(RwLock::new(())),
            connections: AtomicUsize::new(0),
        }
    }

    pub fn snapshot(&self) -> DatabaseData {
        self.data.lock().clone()
    }

    pub fn publish(&self, data: DatabaseData) {
        *self.data.lock() = data;
    }

    pub fn version(&self) -> u64 {
        self.data.lock().version
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseInfo {
    pub name: String,
    pub version: u64,
}

struct FactoryShared {
    config: EngineConfig,
    databases: Mutex<BTreeMap<String, Arc<DatabaseShared>>>,
    persisted: AtomicBool,
    persistence: OnceCell<bool>,
}

impl FactoryShared {
    fn database(&self, name: &str) -> Arc<DatabaseShared> {
        let mut databases = self.databases.lock();
        Arc::clone(
            databases
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(DatabaseShared::new(name))),
        )
    }

    /// Drops a database whose first upgrade never committed.
    fn discard_unversioned(&self, name: &str) {
        let mut databases = self.databases.lock();
        if let Some(database) = databases.get(name)
            && database.version() == 0
            && database.connections.load(Ordering::SeqCst) == 0
        {
            databases.remove(name);
        }
    }
}

/// Entry point of the engine: opens, deletes and lists databases.
#[derive(Clone)]
pub struct Factory {
    inner: Arc<FactoryShared>,
}

impl Default for Factory {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Factory {
    pub fn new(config: EngineConfig) -> Self {
        let persisted = config.persisted;
        Self {
            inner: Arc::new(FactoryShared {
                config,
                databases: Mutex::new(BTreeMap::new()),
                persisted: AtomicBool::new(persisted),
                persistence: OnceCell::new(),
            }),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    /// Prepares an open request. Attach upgrade and blocked handlers, then
    /// [`OpenRequest::send`] it.
    pub fn open(&self, name: &str, version: u64) -> Result<OpenRequest, IdbError> {
        if version == 0 {
            return Err(IdbError::Data("database version must be positive".into()));
        }
        Ok(OpenRequest {
            factory: self.clone(),
            name: name.to_string(),
            version,
            on_upgrade_needed: None,
            on_blocked: None,
        })
    }

    /// Deletes a database. Fails with [`IdbError::Blocked`] while connections are open.
    pub fn delete_database(&self, name: &str) -> Request<()> {
        let (request, responder) = Request::pair();
        let factory = self.clone();
        let name = name.to_string();
        tokio::spawn(async move {
            let result = factory.delete(&name).await;
            responder.complete(result);
        });
        request
    }

    async fn delete(&self, name: &str) -> Result<(), IdbError> {
        let database = self.inner.databases.lock().get(name).cloned();
        let Some(database) = database else {
            return Ok(());
        };
        if database.connections.load(Ordering::SeqCst) > 0 {
            warn!(database = name, "delete blocked by open connections");
            return Err(IdbError::Blocked {
                name: name.to_string(),
            });
        }
        let _guard = Arc::clone(&database.lock).write_owned().await;
        self.inner.databases.lock().remove(name);
        info!(database = name, "database deleted");
        Ok(())
    }

    /// Databases that have completed at least one upgrade.
    pub fn databases(&self) -> Vec<DatabaseInfo> {
        self.inner
            .databases
            .lock()
            .values()
            .map(|database| DatabaseInfo {
                name: database.name.clone(),
                version: database.version(),
            })
            .filter(|info| info.version > 0)
            .collect()
    }

    pub fn persisted(&self) -> bool {
        self.inner.persisted.load(Ordering::SeqCst)
    }

    /// Asks for durable persistence; returns whether storage is now persisted.
    pub fn persist(&self) -> bool {
        if self.inner.config.grant_persistence {
            self.inner.persisted.store(true, Ordering::SeqCst);
        }
        self.persisted()
    }

    pub(crate) fn persistence(&self) -> &OnceCell<bool> {
        &self.inner.persistence
    }
}

impl std::fmt::Debug for Factory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Factory")
            .field("config", &self.inner.config)
            .field("databases", &self.databases())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChange {
    pub old_version: u64,
    pub new_version: u64,
}

/// Delivered to the upgrade handler with the version-change transaction.
///
/// The transaction cannot commit on its own while `hold` is alive. Handlers
/// that hand the work to another task move the hold along with it.
#[derive(Debug)]
pub struct UpgradeEvent {
    pub old_version: u64,
    pub new_version: u64,
    pub transaction: TransactionHandle,
    pub hold: Hold,
}

type UpgradeHandler = Box<dyn FnOnce(UpgradeEvent) + Send>;
type BlockedHandler = Box<dyn FnOnce(VersionChange) + Send>;

pub struct OpenRequest {
    factory: Factory,
    name: String,
    version: u64,
    on_upgrade_needed: Option<UpgradeHandler>,
    on_blocked: Option<BlockedHandler>,
}

impl OpenRequest {
    pub fn on_upgrade_needed(mut self, handler: impl FnOnce(UpgradeEvent) + Send + 'static) -> Self {
        self.on_upgrade_needed = Some(Box::new(handler));
        self
    }

    pub fn on_blocked(mut self, handler: impl FnOnce(VersionChange) + Send + 'static) -> Self {
        self.on_blocked = Some(Box::new(handler));
        self
    }

    /// Starts opening on the current tokio runtime.
    pub fn send(self) -> Request<Connection> {
        let (request, responder) = Request::pair();
        tokio::spawn(self.run(responder));
        request
    }

    async fn run(self, responder: Responder<Connection>) {
        let OpenRequest {
            factory,
            name,
            version,
            on_upgrade_needed,
            on_blocked,
        } = self;
        let database = factory.inner.database(&name);
        let idle_yields = factory.inner.config.idle_yields;
        match upgrade(&database, version, idle_yields, on_upgrade_needed, on_blocked).await {
            Ok(()) => {
                database.connections.fetch_add(1, Ordering::SeqCst);
                debug!(database = %name, version, "connection opened");
                responder.complete(Ok(Connection::new(database, idle_yields)));
            }
            Err(error) => {
                factory.inner.discard_unversioned(&name);
                responder.complete(Err(error));
            }
        }
    }
}

/// Brings the database to `version`, running a version-change transaction
/// when it is behind.
async fn upgrade(
    database: &Arc<DatabaseShared>,
    version: u64,
    idle_yields: usize,
    on_upgrade_needed: Option<UpgradeHandler>,
    on_blocked: Option<BlockedHandler>,
) -> Result<(), IdbError> {
    let current = database.version();
    if version < current {
        return Err(IdbError::Version {
            requested: version,
            current,
        });
    }
    if version == current {
        return Ok(());
    }
    if database.connections.load(Ordering::SeqCst) > 0 {
        warn!(
            database = %database.name,
            old_version = current,
            new_version = version,
            "upgrade blocked by open connections"
        );
        if let Some(handler) = on_blocked {
            handler(VersionChange {
                old_version: current,
                new_version: version,
            });
        }
        return Err(IdbError::Blocked {
            name: database.name.clone(),
        });
    }

    let guard = LockGuard::exclusive(Arc::clone(&database.lock).write_owned().await);
    // another upgrade may have finished while we waited for the lock
    let current = database.version();
    if version < current {
        return Err(IdbError::Version {
            requested: version,
            current,
        });
    }
    if version == current {
        return Ok(());
    }

    let mut working = database.snapshot();
    working.version = version;
    let (transaction, hold) = TransactionHandle::start(
        Arc::clone(database),
        TransactionMode::VersionChange,
        Vec::new(),
        Some(guard),
        Some(working),
        idle_yields,
    );
    let (sender, receiver) = oneshot::channel();
    let sender = Arc::new(Mutex::new(Some(sender)));
    let on_complete = Arc::clone(&sender);
    transaction.on_complete(move || {
        if let Some(sender) = on_complete.lock().take() {
            let _ = sender.send(Ok(()));
        }
    });
    transaction.on_abort(move |error| {
        if let Some(sender) = sender.lock().take() {
            let _ = sender.send(Err(error.unwrap_or(IdbError::Aborted)));
        }
    });

    info!(
        database = %database.name,
        old_version = current,
        new_version = version,
        "upgrading database"
    );
    match on_upgrade_needed {
        Some(handler) => handler(UpgradeEvent {
            old_version: current,
            new_version: version,
            transaction,
            hold,
        }),
        None => drop(hold),
    }
    receiver
        .await
        .unwrap_or(Err(IdbError::UnknownTransaction))
}

/// An open connection to one database version.
#[derive(Clone)]
pub struct Connection {
    inner: Arc<ConnectionShared>,
}

struct ConnectionShared {
    database: Arc<DatabaseShared>,
    version: u64,
    idle_yields: usize,
    closed: AtomicBool,
}

impl ConnectionShared {
    fn close(&self) {
        if !self.closed.swap(true, Ordering::SeqCst) {
            self.database.connections.fetch_sub(1, Ordering::SeqCst);
            debug!(database = %self.database.name, "connection closed");
        }
    }
}

impl Drop for ConnectionShared {
    fn drop(&mut self) {
        self.close();
    }
}

impl Connection {
    fn new(database: Arc<DatabaseShared>, idle_yields: usize) -> Self {
        let version = database.version();
        Self {
            inner: Arc::new(ConnectionShared {
                database,
                version,
                idle_yields,
                closed: AtomicBool::new(false),
            }),
        }
    }

    pub fn name(&self) -> &str {
        &self.inner.database.name
    }

    pub fn version(&self) -> u64 {
        self.inner.version
    }

    pub fn store_names(&self) -> Vec<String> {
        self.inner.database.snapshot().store_names()
    }

    pub fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::SeqCst)
    }

    /// Starts a read-only or read-write transaction over the named stores.
    pub fn transaction(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> Result<TransactionHandle, IdbError> {
        let (transaction, _opening) = self.begin(stores, mode)?;
        Ok(transaction)
    }

    /// Like [`Connection::transaction`], but the transaction stays open until
    /// the returned hold is dropped.
    pub(crate) fn begin(
        &self,
        stores: &[&str],
        mode: TransactionMode,
    ) -> Result<(TransactionHandle, Hold), IdbError> {
        if self.is_closed() {
            return Err(IdbError::InvalidState("connection is closed".into()));
        }
        if mode == TransactionMode::VersionChange {
            return Err(IdbError::InvalidAccess(
                "version-change transactions are only created by upgrades".into(),
            ));
        }
        if stores.is_empty() {
            return Err(IdbError::InvalidAccess(
                "a transaction needs at least one store".into(),
            ));
        }
        let schema = self.inner.database.snapshot();
        for store in stores {
            schema.store(store)?;
        }
        let mut scope: Vec<String> = stores.iter().map(|store| store.to_string()).collect();
        scope.sort();
        scope.dedup();
        Ok(TransactionHandle::start(
            Arc::clone(&self.inner.database),
            mode,
            scope,
            None,
            None,
            self.inner.idle_yields,
        ))
    }

    pub fn close(&self) {
        self.inner.close();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("closed", &self.is_closed())
            .finish()
    }
}
