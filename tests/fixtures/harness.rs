//! A sync service wired to in-memory backends and a manual clock.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use habit_sync::core::ManualTimeSource;
use habit_sync::sync::ConnectivitySignal;
use habit_sync::{
    ChangeEvent, ConnectivityMonitor, EntityClass, Filter, Record, RecordId, RecordIdentity,
    SyncService, SyncSettings, WallClock,
};

use super::store::MemoryStore;
use super::transport::MemoryTransport;

pub const START: WallClock = WallClock(1_700_000_000_000);

pub struct Harness {
    pub clock: ManualTimeSource,
    pub transport: Arc<MemoryTransport>,
    pub store: Arc<MemoryStore>,
    pub service: Arc<SyncService>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_settings(SyncSettings::default())
    }

    pub fn with_settings(settings: SyncSettings) -> Self {
        let clock = ManualTimeSource::new(START);
        let transport = MemoryTransport::new();
        let store = Arc::new(MemoryStore::echoing(clock.clone(), Arc::clone(&transport)));
        let service = Arc::new(SyncService::new(
            settings,
            store.clone(),
            transport.clone(),
            ConnectivityMonitor::new(true),
            Arc::new(clock.clone()),
        ));
        Self {
            clock,
            transport,
            store,
            service,
        }
    }

    pub fn advance(&self, by: Duration) {
        self.clock.advance(by);
    }

    pub fn go_offline(&self) {
        self.service
            .connectivity()
            .handle_signal(ConnectivitySignal::Unreachable);
    }

    pub fn go_online(&self) {
        self.service
            .connectivity()
            .handle_signal(ConnectivitySignal::Reachable);
    }
}

/// Collects delivered events for the test to apply later.
#[derive(Clone, Default)]
pub struct Inbox(Arc<Mutex<Vec<ChangeEvent>>>);

impl Inbox {
    pub fn push(&self, event: &ChangeEvent) {
        self.0.lock().expect("inbox").push(event.clone());
    }

    pub fn drain(&self) -> Vec<ChangeEvent> {
        std::mem::take(&mut *self.0.lock().expect("inbox"))
    }

    pub fn len(&self) -> usize {
        self.0.lock().expect("inbox").len()
    }
}

pub fn habits() -> EntityClass {
    EntityClass::new("habits").expect("entity")
}

pub fn completions() -> EntityClass {
    EntityClass::new("habit_completions").expect("entity")
}

pub fn owner(user: &str) -> Filter {
    Filter::eq("user_id", user).expect("filter")
}

pub fn record(value: serde_json::Value) -> Record {
    Record::from_value(value).expect("record")
}

pub fn by_id(id: &str) -> RecordIdentity {
    RecordIdentity::Id(RecordId::new(id).expect("record id"))
}

pub fn ids(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .filter_map(Record::id)
        .map(|id| id.to_string())
        .collect()
}
