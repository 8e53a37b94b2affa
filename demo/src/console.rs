//! Event sink that prints to stdout instead of posting anywhere.

use std::sync::Mutex;

use tollgate_contracts::event::{Event, EventType};
use tollgate_core::traits::EventSink;

#[derive(Default)]
pub struct ConsoleSink {
    events: Mutex<Vec<Event>>,
}

impl ConsoleSink {
    pub fn count(&self, event_type: EventType) -> usize {
        self.events
            .lock()
            .map(|events| events.iter().filter(|e| e.event_type == event_type).count())
            .unwrap_or(0)
    }
}

impl EventSink for ConsoleSink {
    fn track(&self, event: Event) {
        println!("      event  {:<18} {}", event.event_type.as_str(), event.name);
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}
