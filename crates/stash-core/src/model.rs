//! Typed models on top of tables
//!
//! A model declares its table and primary key; its serde field list is its
//! schema. `ModelState` wraps one model instance with its own listeners and
//! remembers the attributes it was last saved or loaded with.

use crate::database::Database;
use crate::events::EventTarget;
use crate::table::Table;
use crate::{Record, RecordId, Result, StashError, DEFAULT_PRIMARY_KEY};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::marker::PhantomData;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

pub trait Model: Serialize + DeserializeOwned + Send + Sync {
    const TABLE: &'static str;
    const PRIMARY_KEY: &'static str = DEFAULT_PRIMARY_KEY;

    fn id(&self) -> Option<RecordId>;
    fn set_id(&mut self, id: RecordId);

    fn to_record(&self) -> Result<Record> {
        Record::from_value(serde_json::to_value(self)?).ok_or_else(|| {
            StashError::InvalidRecord(format!("{} does not serialize to an object", Self::TABLE))
        })
    }

    fn from_record(record: Record) -> Result<Self> {
        Ok(serde_json::from_value(record.into_value())?)
    }
}

/// A model instance with its own listeners and saved-state tracking
pub struct ModelState<M: Model> {
    model: M,
    saved: Option<Record>,
    events: EventTarget,
}

impl<M: Model> ModelState<M> {
    pub fn new(model: M) -> Self {
        Self {
            model,
            saved: None,
            events: EventTarget::new(),
        }
    }

    fn loaded(model: M, record: Record) -> Self {
        Self {
            model,
            saved: Some(record),
            events: EventTarget::new(),
        }
    }

    /// Listeners notified only for this instance
    pub fn events(&self) -> &EventTarget {
        &self.events
    }

    /// Whether the attributes differ from those last saved or loaded
    pub fn is_dirty(&self) -> bool {
        match (&self.saved, self.model.to_record()) {
            (Some(saved), Ok(current)) => *saved != current,
            _ => true,
        }
    }

    pub fn into_inner(self) -> M {
        self.model
    }
}

impl<M: Model> Deref for ModelState<M> {
    type Target = M;

    fn deref(&self) -> &M {
        &self.model
    }
}

impl<M: Model> DerefMut for ModelState<M> {
    fn deref_mut(&mut self) -> &mut M {
        &mut self.model
    }
}

impl<M: Model + std::fmt::Debug> std::fmt::Debug for ModelState<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelState")
            .field("model", &self.model)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

/// Typed access to the table of `M`
pub struct Repository<M: Model> {
    table: Arc<Table>,
    _model: PhantomData<fn() -> M>,
}

impl<M: Model> Repository<M> {
    pub fn new(db: &Database) -> Result<Self> {
        Ok(Self {
            table: db.table_with_key(M::TABLE, M::PRIMARY_KEY)?,
            _model: PhantomData,
        })
    }

    pub fn table(&self) -> &Arc<Table> {
        &self.table
    }

    /// Listeners notified for every instance of `M`
    pub fn class_events(&self) -> &EventTarget {
        self.table.events()
    }

    /// Save an instance, assigning its identifier if it has none
    pub async fn save(&self, state: &mut ModelState<M>) -> Result<()> {
        let record = state.model.to_record()?;
        let saved = self.table.save_with(record, Some(&state.events)).await?;
        if let Some(id) = saved.id(M::PRIMARY_KEY) {
            state.model.set_id(id);
        }
        state.saved = Some(saved);
        Ok(())
    }

    /// Wrap `model` and save it
    pub async fn insert(&self, model: M) -> Result<ModelState<M>> {
        let mut state = ModelState::new(model);
        self.save(&mut state).await?;
        Ok(state)
    }

    pub async fn get_by_id(&self, id: RecordId) -> Result<Option<ModelState<M>>> {
        match self.table.get_by_id(id).await? {
            Some(record) => Ok(Some(Self::materialize(record)?)),
            None => Ok(None),
        }
    }

    /// Delete an instance; returns whether it was stored
    pub async fn delete(&self, state: &ModelState<M>) -> Result<bool> {
        let Some(id) = state.id() else {
            return Ok(false);
        };
        let removed = self.table.delete_with(id, Some(&state.events)).await?;
        Ok(removed.is_some())
    }

    pub async fn delete_by_id(&self, id: RecordId) -> Result<bool> {
        Ok(self.table.delete(id).await?.is_some())
    }

    /// Every instance, ascending by identifier
    pub fn all(&self) -> impl Future<Output = Result<Vec<ModelState<M>>>> + '_ {
        self.query(|_| true)
    }

    /// Instances matching `filter`, ascending by identifier
    pub fn query<'a, F>(
        &'a self,
        filter: F,
    ) -> impl Future<Output = Result<Vec<ModelState<M>>>> + 'a
    where
        F: Fn(&M) -> bool + 'a,
    {
        let records = self.table.all();
        async move {
            let records = records.await?;
            let mut states = Vec::with_capacity(records.len());
            for record in records {
                let state = Self::materialize(record)?;
                if filter(&state) {
                    states.push(state);
                }
            }
            Ok(states)
        }
    }

    fn materialize(record: Record) -> Result<ModelState<M>> {
        let model = M::from_record(record.clone())?;
        Ok(ModelState::loaded(model, record))
    }
}
