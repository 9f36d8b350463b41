use crate::config::DatabaseOptions;
use crate::error::IdbError;
use crate::migration::{DatabaseBuilder, run_migrations};
use crate::request::wait_on_request;
use crate::storage::transaction::TransactionMode;
use crate::storage::{Connection, Factory, UpgradeEvent, VersionChange};
use crate::transaction::{self, ReadOnlyTransaction, ReadWriteTransaction};
use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// An open connection to a database.
#[derive(Clone, Debug)]
pub struct Database {
    connection: Connection,
}

impl Database {
    pub(crate) fn new(connection: Connection) -> Self {
        Self { connection }
    }

    pub fn name(&self) -> &str {
        self.connection.name()
    }

    pub fn version(&self) -> u64 {
        self.connection.version()
    }

    pub fn stores(&self) -> Vec<String> {
        self.connection.store_names()
    }

    pub fn is_closed(&self) -> bool {
        self.connection.is_closed()
    }

    /// The native connection underneath.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Runs `scope` in a read-only transaction over `stores`.
    ///
    /// Every request made inside the scope has to be awaited before the scope
    /// returns, and nothing but those requests may be awaited in between:
    /// a transaction left idle commits on its own.
    pub async fn read<R, E, F, Fut>(&self, stores: &[&str], scope: F) -> Result<R, E>
    where
        F: FnOnce(ReadOnlyTransaction) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<IdbError>,
    {
        let (handle, opening) = self.connection.begin(stores, TransactionMode::ReadOnly)?;
        let trx = ReadOnlyTransaction::new(handle.clone());
        transaction::run(handle, opening, trx, scope).await
    }

    /// Runs `scope` in a read-write transaction over `stores`. The same rules
    /// as for [`Database::read`] apply.
    pub async fn change<R, E, F, Fut>(&self, stores: &[&str], scope: F) -> Result<R, E>
    where
        F: FnOnce(ReadWriteTransaction) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<IdbError>,
    {
        let (handle, opening) = self.connection.begin(stores, TransactionMode::ReadWrite)?;
        let trx = ReadWriteTransaction::new(handle.clone());
        transaction::run(handle, opening, trx, scope).await
    }

    pub fn close(&self) {
        self.connection.close();
    }
}

/// Opens a database at the version its migrations describe, running the
/// migrations it has not applied yet.
pub async fn open_database(
    factory: &Factory,
    options: &DatabaseOptions,
) -> Result<Database, IdbError> {
    if options.persist {
        let persisted = request_database_persistence(factory, false).await?;
        if !persisted {
            warn!(
                database = %options.name,
                "databases will not persist, persistence was denied"
            );
        }
    }

    let open = factory
        .open(&options.name, options.version())
        .map_err(|source| IdbError::BeforeMigrations {
            source: Box::new(source),
        })?;

    let failure: Arc<Mutex<Option<IdbError>>> = Arc::default();
    let recorded = Arc::clone(&failure);
    let migrations = options.migrations.clone();
    let name = options.name.clone();
    let request = open
        .on_upgrade_needed(move |event: UpgradeEvent| {
            let UpgradeEvent {
                old_version,
                new_version,
                transaction: handle,
                hold,
            } = event;
            info!(database = %name, old_version, new_version, "migrating database");
            tokio::spawn(async move {
                let db = DatabaseBuilder::new(ReadWriteTransaction::upgrading(handle.clone()));
                let outcome = transaction::run(handle, hold, db, |db| async move {
                    let result = run_migrations(&db, &migrations, old_version).await;
                    if let Err(error) = &result {
                        *recorded.lock() = Some(error.clone());
                    }
                    result
                })
                .await;
                if let Err(error) = outcome {
                    debug!(database = %name, error = %error, "upgrade transaction did not commit");
                }
            });
        })
        .on_blocked({
            let name = options.name.clone();
            move |change: VersionChange| {
                warn!(
                    database = %name,
                    old_version = change.old_version,
                    new_version = change.new_version,
                    "database is being upgraded while another connection is open"
                );
            }
        })
        .send();

    match wait_on_request(request).await {
        Ok(connection) => Ok(Database::new(connection)),
        Err(error) => Err(failure.lock().take().unwrap_or(error)),
    }
}

/// A database described by its name and migrations, opened on first use.
///
/// The connection is shared by every caller and reopened after
/// [`DatabaseDefinition::close`].
pub struct DatabaseDefinition {
    factory: Factory,
    options: DatabaseOptions,
    connection: tokio::sync::Mutex<Option<Database>>,
}

pub fn define_database(factory: &Factory, options: DatabaseOptions) -> DatabaseDefinition {
    DatabaseDefinition {
        factory: factory.clone(),
        options,
        connection: tokio::sync::Mutex::new(None),
    }
}

impl DatabaseDefinition {
    pub fn name(&self) -> &str {
        &self.options.name
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.options
    }

    /// The shared connection, opening it when needed.
    pub async fn connect(&self) -> Result<Database, IdbError> {
        let mut connection = self.connection.lock().await;
        if let Some(db) = connection.as_ref()
            && !db.is_closed()
        {
            return Ok(db.clone());
        }
        let db = open_database(&self.factory, &self.options).await?;
        *connection = Some(db.clone());
        Ok(db)
    }

    pub async fn version(&self) -> Result<u64, IdbError> {
        Ok(self.connect().await?.version())
    }

    pub async fn stores(&self) -> Result<Vec<String>, IdbError> {
        Ok(self.connect().await?.stores())
    }

    pub async fn read<R, E, F, Fut>(&self, stores: &[&str], scope: F) -> Result<R, E>
    where
        F: FnOnce(ReadOnlyTransaction) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<IdbError>,
    {
        let db = self.connect().await?;
        db.read(stores, scope).await
    }

    pub async fn change<R, E, F, Fut>(&self, stores: &[&str], scope: F) -> Result<R, E>
    where
        F: FnOnce(ReadWriteTransaction) -> Fut,
        Fut: Future<Output = Result<R, E>>,
        E: From<IdbError>,
    {
        let db = self.connect().await?;
        db.change(stores, scope).await
    }

    /// Closes the shared connection; the next use opens a new one.
    pub async fn close(&self) {
        if let Some(db) = self.connection.lock().await.take() {
            db.close();
        }
    }
}

impl std::fmt::Debug for DatabaseDefinition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseDefinition")
            .field("name", &self.options.name)
            .field("version", &self.options.version())
            .finish()
    }
}

/// Deletes a database. Fails with [`IdbError::Blocked`] while it has open
/// connections.
pub async fn drop_database(factory: &Factory, name: &str) -> Result<(), IdbError> {
    wait_on_request(factory.delete_database(name)).await
}

/// Names of the databases that exist.
pub fn list_databases(factory: &Factory) -> Vec<String> {
    factory
        .databases()
        .into_iter()
        .map(|info| info.name)
        .collect()
}

/// Asks once per factory for durable storage and reports whether it was
/// granted. With `fail`, a denial is returned as [`IdbError::PersistenceDenied`].
pub async fn request_database_persistence(factory: &Factory, fail: bool) -> Result<bool, IdbError> {
    let granted = *factory
        .persistence()
        .get_or_init(|| async { factory.persisted() || factory.persist() })
        .await;
    if fail && !granted {
        return Err(IdbError::PersistenceDenied);
    }
    Ok(granted)
}
