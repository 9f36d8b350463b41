use crate::catalog::schema::{IndexParams, IndexPath, KeyPath};
use crate::error::IdbError;
use crate::storage::store::StoreHandle;
use crate::transaction::ReadWriteTransaction;
use futures::FutureExt;
use futures::future::BoxFuture;
use std::future::Future;
use std::ops::Deref;
use std::sync::Arc;
use tracing::{error, info};

type Step = dyn Fn(DatabaseBuilder) -> BoxFuture<'static, Result<(), IdbError>> + Send + Sync;

/// One schema version. The migration at position `n` (zero based) upgrades a
/// database from version `n` to `n + 1`.
#[derive(Clone)]
pub struct Migration {
    name: Option<String>,
    step: Arc<Step>,
}

impl Migration {
    /// A migration whose step may await requests on the upgrade transaction.
    ///
    /// The step must only await requests of that transaction; anything else
    /// lets the transaction commit underneath it.
    pub fn new<F, Fut>(step: F) -> Self
    where
        F: Fn(DatabaseBuilder) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), IdbError>> + Send + 'static,
    {
        Self {
            name: None,
            step: Arc::new(move |db: DatabaseBuilder| step(db).boxed()),
        }
    }

    /// A migration that only changes the schema.
    pub fn sync<F>(step: F) -> Self
    where
        F: Fn(&DatabaseBuilder) -> Result<(), IdbError> + Send + Sync + 'static,
    {
        Self {
            name: None,
            step: Arc::new(move |db: DatabaseBuilder| {
                let result = step(&db);
                async move { result }.boxed()
            }),
        }
    }

    /// Names the migration in errors and logs instead of its version.
    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

impl std::fmt::Debug for Migration {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// The upgrade transaction as seen by a migration step.
///
/// Besides schema changes it offers every read-write builder, with key checks
/// relaxed so that rows of any shape can be moved between stores.
pub struct DatabaseBuilder {
    trx: ReadWriteTransaction,
}

impl DatabaseBuilder {
    pub(crate) fn new(trx: ReadWriteTransaction) -> Self {
        Self { trx }
    }

    /// Another handle to the same upgrade transaction.
    pub fn duplicate(&self) -> Self {
        Self {
            trx: self.trx.duplicate(),
        }
    }

    pub fn create_store(&self, name: &str, key_path: KeyPath) -> Result<StoreBuilder, IdbError> {
        let store = self.handle().create_object_store(name, key_path)?;
        Ok(StoreBuilder { store })
    }

    pub fn alter_store(&self, name: &str) -> Result<StoreBuilder, IdbError> {
        let store = self.handle().object_store(name)?;
        Ok(StoreBuilder { store })
    }

    pub fn drop_store(&self, name: &str) -> Result<(), IdbError> {
        self.handle().delete_object_store(name)
    }
}

impl Deref for DatabaseBuilder {
    type Target = ReadWriteTransaction;

    fn deref(&self) -> &Self::Target {
        &self.trx
    }
}

/// Schema changes on one object store.
#[derive(Debug, Clone)]
pub struct StoreBuilder {
    store: StoreHandle,
}

impl StoreBuilder {
    pub fn name(&self) -> &str {
        self.store.name()
    }

    pub fn key_path(&self) -> Result<KeyPath, IdbError> {
        self.store.key_path()
    }

    pub fn index_names(&self) -> Result<Vec<String>, IdbError> {
        self.store.index_names()
    }

    pub fn create_index(
        &self,
        name: &str,
        key_path: impl Into<IndexPath>,
        params: IndexParams,
    ) -> Result<&Self, IdbError> {
        self.store.create_index(name, key_path, params)?;
        Ok(self)
    }

    pub fn drop_index(&self, name: &str) -> Result<&Self, IdbError> {
        self.store.delete_index(name)?;
        Ok(self)
    }
}

/// Runs, in order, the migrations a database at `old_version` has not seen.
///
/// A failing step stops the run; its error is wrapped with the step's name,
/// or its 1-based version when unnamed.
pub(crate) async fn run_migrations(
    db: &DatabaseBuilder,
    migrations: &[Migration],
    old_version: u64,
) -> Result<(), IdbError> {
    let database = db.handle().database_name().to_string();
    let pending = migrations.iter().enumerate().skip(old_version as usize);
    for (position, migration) in pending {
        let version = position as u64 + 1;
        let step = match migration.name() {
            Some(name) => name.to_string(),
            None => version.to_string(),
        };
        info!(database = %database, version, step = %step, "running migration");
        if let Err(source) = (migration.step)(db.duplicate()).await {
            error!(
                database = %database,
                version,
                step = %step,
                error = %source,
                "migration failed"
            );
            return Err(IdbError::Migration {
                step,
                source: Box::new(source),
            });
        }
    }
    Ok(())
}
