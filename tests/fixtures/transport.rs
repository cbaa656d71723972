//! In-memory push transport: each open channel keeps its sink until closed.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use habit_sync::ChangeEvent;
use habit_sync::core::{RawChange, SubscriptionKey};
use habit_sync::sync::{EventSink, TransportError, UpstreamChannel, UpstreamTransport};

#[derive(Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<TransportState>>,
}

#[derive(Default)]
struct TransportState {
    next_channel: u64,
    open: BTreeMap<u64, EventSink>,
    opened: usize,
    closed: usize,
    fail_next: Option<TransportError>,
}

struct MemoryChannel {
    id: u64,
    state: Arc<Mutex<TransportState>>,
}

impl UpstreamChannel for MemoryChannel {
    fn close(self: Box<Self>) {
        let mut state = self.state.lock().expect("transport state");
        state.open.remove(&self.id);
        state.closed += 1;
    }
}

impl UpstreamTransport for MemoryTransport {
    fn open(
        &self,
        _key: &SubscriptionKey,
        sink: EventSink,
    ) -> Result<Box<dyn UpstreamChannel>, TransportError> {
        let mut state = self.state.lock().expect("transport state");
        if let Some(err) = state.fail_next.take() {
            return Err(err);
        }
        state.next_channel += 1;
        let id = state.next_channel;
        state.open.insert(id, sink);
        state.opened += 1;
        Ok(Box::new(MemoryChannel {
            id,
            state: Arc::clone(&self.state),
        }))
    }
}

impl MemoryTransport {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Pushes `event` down every open channel whose key admits it, the way
    /// the backend filters server-side. Returns total observer deliveries.
    pub fn emit(&self, event: &ChangeEvent) -> usize {
        let sinks = self.sinks_admitting(|sink| sink.key().admits(event));
        sinks
            .into_iter()
            .map(|sink| sink.deliver(event.clone()))
            .sum()
    }

    /// Pushes a wire-shaped notification to every channel on `entity`.
    pub fn emit_raw(&self, raw: &RawChange) -> usize {
        let sinks = self.sinks_admitting(|sink| sink.key().entity.as_str() == raw.table);
        sinks
            .into_iter()
            .map(|sink| sink.deliver_raw(raw.clone()))
            .sum()
    }

    fn sinks_admitting(&self, admits: impl Fn(&EventSink) -> bool) -> Vec<EventSink> {
        let state = self.state.lock().expect("transport state");
        state.open.values().filter(|s| admits(s)).cloned().collect()
    }

    pub fn fail_next(&self, err: TransportError) {
        self.state.lock().expect("transport state").fail_next = Some(err);
    }

    pub fn opened(&self) -> usize {
        self.state.lock().expect("transport state").opened
    }

    pub fn closed(&self) -> usize {
        self.state.lock().expect("transport state").closed
    }

    pub fn open_channels(&self) -> usize {
        self.state.lock().expect("transport state").open.len()
    }
}
