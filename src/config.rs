use crate::migration::Migration;

/// Runtime configuration for the reference storage engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Scheduler yields an idle transaction waits before it auto-commits. A
    /// transaction is not idle while a scope is being polled or a delivered
    /// result waits to be consumed; a scope that awaits anything else for
    /// longer than this loses the transaction.
    pub idle_yields: usize,
    /// Whether a persistence request is granted.
    pub grant_persistence: bool,
    /// Whether storage starts out already persisted.
    pub persisted: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            idle_yields: 8,
            grant_persistence: true,
            persisted: false,
        }
    }
}

impl EngineConfig {
    /// Tight auto-commit window that surfaces continuations that lose their
    /// transaction by awaiting foreign futures.
    pub fn strict() -> Self {
        Self {
            idle_yields: 2,
            ..Self::default()
        }
    }

    /// Generous window for busy runtimes where a suspended scope may wait a
    /// while before it is scheduled again.
    pub fn relaxed() -> Self {
        Self {
            idle_yields: 64,
            ..Self::default()
        }
    }

    pub fn with_idle_yields(mut self, idle_yields: usize) -> Self {
        self.idle_yields = idle_yields.max(1);
        self
    }

    pub fn with_grant_persistence(mut self, grant: bool) -> Self {
        self.grant_persistence = grant;
        self
    }

    pub fn with_persisted(mut self, persisted: bool) -> Self {
        self.persisted = persisted;
        self
    }
}

/// Declarative description of a database: its name and ordered migrations.
///
/// The schema version is always the number of migrations.
#[derive(Debug, Clone)]
pub struct DatabaseOptions {
    pub name: String,
    pub migrations: Vec<Migration>,
    pub persist: bool,
}

impl DatabaseOptions {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            migrations: Vec::new(),
            persist: false,
        }
    }

    pub fn migration(mut self, migration: Migration) -> Self {
        self.migrations.push(migration);
        self
    }

    pub fn migrations(mut self, migrations: impl IntoIterator<Item = Migration>) -> Self {
        self.migrations.extend(migrations);
        self
    }

    /// Requests durable persistence before opening; a denial is logged, not fatal.
    pub fn persist(mut self, persist: bool) -> Self {
        self.persist = persist;
        self
    }

    pub fn version(&self) -> u64 {
        self.migrations.len() as u64
    }
}
