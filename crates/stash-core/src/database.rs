//! Namespaces and their table registries
//!
//! A `Database` owns everything shared by the tables of one namespace: the
//! backing store, the flush engine and the identifier allocator. Tables are
//! created on first access and live as long as the database. A `Registry`
//! hands out one database per namespace.

use crate::allocator::{IdAllocator, PK_MAP_KEY};
use crate::config::{Backend, StashConfig};
use crate::flush::FlushEngine;
use crate::ports::{KvStore, StoreFactory};
use crate::storage::MemoryStoreFactory;
use crate::table::Table;
use crate::{Result, StashError, DEFAULT_PRIMARY_KEY};
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::info;

pub struct Database {
    namespace: String,
    primary_key: String,
    store: Arc<dyn KvStore>,
    flush: Arc<FlushEngine>,
    ids: Arc<IdAllocator>,
    tables: DashMap<String, Arc<Table>>,
}

impl Database {
    pub fn new(namespace: impl Into<String>, store: Arc<dyn KvStore>) -> Self {
        let flush = Arc::new(FlushEngine::new());
        let ids = Arc::new(IdAllocator::new(store.clone(), flush.clone()));
        Self {
            namespace: namespace.into(),
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            store,
            flush,
            ids,
            tables: DashMap::new(),
        }
    }

    /// Primary key used by tables opened through [`Database::table`]
    pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
        self.primary_key = primary_key.into();
        self
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn store(&self) -> &Arc<dyn KvStore> {
        &self.store
    }

    pub fn ids(&self) -> &IdAllocator {
        &self.ids
    }

    pub fn flush_engine(&self) -> &FlushEngine {
        &self.flush
    }

    /// The table called `name`, created on first access
    pub fn table(&self, name: &str) -> Result<Arc<Table>> {
        let primary_key = self.primary_key.clone();
        self.table_with_key(name, &primary_key)
    }

    /// The table called `name`, keyed by `primary_key`.
    ///
    /// Asking for an existing table with a different primary key is an error.
    pub fn table_with_key(&self, name: &str, primary_key: &str) -> Result<Arc<Table>> {
        if name == PK_MAP_KEY {
            return Err(StashError::InvalidConfig(format!(
                "{} is reserved for identifier counters",
                PK_MAP_KEY
            )));
        }
        if name.is_empty() {
            return Err(StashError::InvalidConfig("table name is empty".to_string()));
        }

        let table = self
            .tables
            .entry(name.to_string())
            .or_insert_with(|| {
                info!("Opening table {}/{}", self.namespace, name);
                Arc::new(Table::new(
                    name,
                    primary_key,
                    self.store.clone(),
                    self.flush.clone(),
                    self.ids.clone(),
                ))
            })
            .clone();

        if table.primary_key() != primary_key {
            return Err(StashError::InvalidConfig(format!(
                "table {} is keyed by {}, not {}",
                name,
                table.primary_key(),
                primary_key
            )));
        }
        Ok(table)
    }

    /// Names of the tables opened in this process, sorted
    pub fn tables(&self) -> Vec<String> {
        let mut names: Vec<String> = self.tables.iter().map(|t| t.key().clone()).collect();
        names.sort();
        names
    }
}

/// One `Database` per namespace, opened through a `StoreFactory`
pub struct Registry {
    factory: Arc<dyn StoreFactory>,
    primary_key: String,
    databases: DashMap<String, Arc<OnceCell<Arc<Database>>>>,
}

impl Registry {
    pub fn new(factory: Arc<dyn StoreFactory>) -> Self {
        Self {
            factory,
            primary_key: DEFAULT_PRIMARY_KEY.to_string(),
            databases: DashMap::new(),
        }
    }

    /// Registry backed by the store selected in `config`
    pub async fn from_config(config: &StashConfig) -> Result<Self> {
        let factory: Arc<dyn StoreFactory> = match config.backend {
            Backend::Memory => Arc::new(MemoryStoreFactory::new()),
            #[cfg(feature = "sqlite")]
            Backend::Sqlite => Arc::new(
                crate::storage::SqliteStoreFactory::new(&config.database_path()).await?,
            ),
            #[cfg(not(feature = "sqlite"))]
            Backend::Sqlite => {
                return Err(StashError::InvalidConfig(
                    "sqlite backend not compiled in".to_string(),
                ))
            }
        };

        let mut registry = Self::new(factory);
        registry.primary_key = config.primary_key.clone();
        Ok(registry)
    }

    /// The database for `namespace`, opening its store on first use.
    ///
    /// Concurrent first calls share one open.
    pub async fn database(&self, namespace: &str) -> Result<Arc<Database>> {
        let cell = self
            .databases
            .entry(namespace.to_string())
            .or_default()
            .clone();

        let database = cell
            .get_or_try_init(|| async {
                let store = self.factory.open(namespace).await?;
                info!("Opened namespace {}", namespace);
                Ok::<_, StashError>(Arc::new(
                    Database::new(namespace, store).with_primary_key(self.primary_key.clone()),
                ))
            })
            .await?;

        Ok(database.clone())
    }
}
