//! Ordering key for the simulation event queue.

use crate::NodeIndex;
use dolev_core::{Event, EventPriority};
use std::time::Duration;

/// Position of an event in the global queue.
///
/// Field order is the sort order: time, then priority (timers before network
/// before client), then node, then insertion sequence as the final tie-break.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EventKey {
    pub time: Duration,
    pub priority: EventPriority,
    pub node_index: NodeIndex,
    pub sequence: u64,
}

impl EventKey {
    pub fn new(time: Duration, event: &Event, node_index: NodeIndex, sequence: u64) -> Self {
        Self {
            time,
            priority: event.priority(),
            node_index,
            sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dolev_core::RequestId;
    use dolev_types::Payload;
    use std::collections::BTreeMap;

    fn submit() -> Event {
        Event::SubmitBroadcast {
            payload: Payload::from_static(b"x"),
            request_id: RequestId(0),
        }
    }

    #[test]
    fn test_ordering() {
        let ms = Duration::from_millis;
        let mut queue = BTreeMap::new();
        queue.insert(EventKey::new(ms(5), &submit(), 0, 1), "late");
        queue.insert(EventKey::new(ms(1), &submit(), 0, 2), "client");
        queue.insert(EventKey::new(ms(1), &Event::LivenessTimer, 3, 3), "timer");
        queue.insert(EventKey::new(ms(1), &Event::LivenessTimer, 1, 4), "timer-low-node");

        let order: Vec<_> = queue.into_values().collect();
        assert_eq!(order, vec!["timer-low-node", "timer", "client", "late"]);
    }
}
