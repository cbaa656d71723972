//! In-memory remote store with failure injection and change-event echoes.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use habit_sync::core::ManualTimeSource;
use habit_sync::sync::StoreError;
use habit_sync::{
    ChangeEvent, ClientRequestId, EntityClass, Record, RecordIdentity, RemoteStore, Scope,
    TimeSource,
};

use super::transport::MemoryTransport;

type FetchHook = Box<dyn FnOnce() + Send>;

pub struct MemoryStore {
    state: Mutex<StoreState>,
    clock: ManualTimeSource,
    echo: Option<Arc<MemoryTransport>>,
    during_fetch: Mutex<Option<FetchHook>>,
}

#[derive(Default)]
struct StoreState {
    rows: BTreeMap<String, Vec<Record>>,
    next_id: u64,
    fail_next: Option<StoreError>,
    fetches: usize,
    writes: usize,
}

impl MemoryStore {
    pub fn new(clock: ManualTimeSource) -> Self {
        Self {
            state: Mutex::new(StoreState::default()),
            clock,
            echo: None,
            during_fetch: Mutex::new(None),
        }
    }

    /// Successful writes are pushed through `transport` before the write
    /// call returns, carrying the caller's request tag.
    pub fn echoing(clock: ManualTimeSource, transport: Arc<MemoryTransport>) -> Self {
        Self {
            echo: Some(transport),
            ..Self::new(clock)
        }
    }

    pub fn seed(&self, entity: &EntityClass, rows: Vec<Record>) {
        let mut state = self.state.lock().expect("store state");
        state.rows.insert(entity.to_string(), rows);
    }

    pub fn rows(&self, entity: &EntityClass) -> Vec<Record> {
        let state = self.state.lock().expect("store state");
        state.rows.get(entity.as_str()).cloned().unwrap_or_default()
    }

    pub fn fail_next(&self, err: StoreError) {
        self.state.lock().expect("store state").fail_next = Some(err);
    }

    /// Runs `hook` once, after the next fetch has read its rows and before
    /// it returns them.
    pub fn during_next_fetch(&self, hook: impl FnOnce() + Send + 'static) {
        *self.during_fetch.lock().expect("fetch hook") = Some(Box::new(hook));
    }

    pub fn fetches(&self) -> usize {
        self.state.lock().expect("store state").fetches
    }

    pub fn writes(&self) -> usize {
        self.state.lock().expect("store state").writes
    }

    fn echo(&self, event: ChangeEvent, request: ClientRequestId) {
        if let Some(transport) = &self.echo {
            transport.emit(&event.committed_at(self.clock.now()).with_request(request));
        }
    }
}

impl RemoteStore for MemoryStore {
    fn fetch(&self, scope: &Scope) -> Result<Vec<Record>, StoreError> {
        let rows = {
            let mut state = self.state.lock().expect("store state");
            state.fetches += 1;
            if let Some(err) = state.fail_next.take() {
                return Err(err);
            }
            state.rows.get(scope.entity.as_str()).cloned().unwrap_or_default()
        };
        let hook = self.during_fetch.lock().expect("fetch hook").take();
        if let Some(hook) = hook {
            hook();
        }
        Ok(rows
            .into_iter()
            .filter(|row| scope.filter.as_ref().is_none_or(|f| f.matches(row)))
            .collect())
    }

    fn insert(
        &self,
        entity: &EntityClass,
        record: &Record,
        request: ClientRequestId,
    ) -> Result<Record, StoreError> {
        let stored = {
            let mut state = self.state.lock().expect("store state");
            if let Some(err) = state.fail_next.take() {
                return Err(err);
            }
            state.next_id += 1;
            state.writes += 1;
            let stored = record.clone().with("id", format!("srv-{}", state.next_id));
            state
                .rows
                .entry(entity.to_string())
                .or_default()
                .push(stored.clone());
            stored
        };
        self.echo(ChangeEvent::insert(entity.clone(), stored.clone()), request);
        Ok(stored)
    }

    fn update(
        &self,
        entity: &EntityClass,
        target: &RecordIdentity,
        fields: &Record,
        request: ClientRequestId,
    ) -> Result<Record, StoreError> {
        let stored = {
            let mut state = self.state.lock().expect("store state");
            if let Some(err) = state.fail_next.take() {
                return Err(err);
            }
            let rows = state.rows.entry(entity.to_string()).or_default();
            let Some(row) = rows.iter_mut().find(|r| r.matches(target)) else {
                return Err(StoreError::NotFound {
                    entity: entity.clone(),
                    identity: target.to_string(),
                });
            };
            *row = row.merged_with(fields);
            let stored = row.clone();
            state.writes += 1;
            stored
        };
        self.echo(ChangeEvent::update(entity.clone(), stored.clone()), request);
        Ok(stored)
    }

    fn delete(
        &self,
        entity: &EntityClass,
        target: &RecordIdentity,
        request: ClientRequestId,
    ) -> Result<(), StoreError> {
        {
            let mut state = self.state.lock().expect("store state");
            if let Some(err) = state.fail_next.take() {
                return Err(err);
            }
            let rows = state.rows.entry(entity.to_string()).or_default();
            let before = rows.len();
            rows.retain(|r| !r.matches(target));
            if rows.len() == before {
                return Err(StoreError::NotFound {
                    entity: entity.clone(),
                    identity: target.to_string(),
                });
            }
            state.writes += 1;
        }
        self.echo(ChangeEvent::delete(entity.clone(), target.clone()), request);
        Ok(())
    }
}
