use dashmap::DashMap;

use crate::bridge::{Bridge, BridgeId};
use crate::leg::{LegHandle, LegId};

/// Owns every live Leg, addressed by `LegId`. Bridges hold only the ID and
/// look the handle up here — this breaks the Dialog/Leg/Bridge cyclic
/// reference the source modeled with shared pointers and callback graphs.
///
/// Also keeps a secondary index from an outbound leg's own wire Call-ID to
/// its `LegId`, so ingress can route an in-dialog BYE arriving from a B-leg's
/// far end (which never goes through `switchboard_dialog::DialogManager`,
/// since the B-leg has no inbound `Dialog`) back to the right Leg.
#[derive(Default)]
pub struct LegRegistry {
    legs: DashMap<LegId, LegHandle>,
    by_wire_call_id: DashMap<String, LegId>,
}

impl LegRegistry {
    pub fn new() -> Self {
        Self {
            legs: DashMap::new(),
            by_wire_call_id: DashMap::new(),
        }
    }

    pub fn insert(&self, handle: LegHandle) -> LegId {
        let id = handle.lock().id;
        self.legs.insert(id, handle);
        id
    }

    pub fn get(&self, id: LegId) -> Option<LegHandle> {
        self.legs.get(&id).map(|entry| entry.clone())
    }

    pub fn remove(&self, id: LegId) {
        self.legs.remove(&id);
        self.by_wire_call_id.retain(|_, v| *v != id);
    }

    pub fn list(&self) -> Vec<LegHandle> {
        self.legs.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.legs.len()
    }

    /// Indexes an outbound leg's wire Call-ID once it is known (on answer).
    pub fn index_wire_call_id(&self, wire_call_id: String, id: LegId) {
        self.by_wire_call_id.insert(wire_call_id, id);
    }

    pub fn get_by_wire_call_id(&self, wire_call_id: &str) -> Option<LegHandle> {
        let id = *self.by_wire_call_id.get(wire_call_id)?;
        self.get(id)
    }
}

/// Owns every live Bridge, addressed by `BridgeId`.
#[derive(Default)]
pub struct BridgeRegistry {
    bridges: DashMap<BridgeId, std::sync::Arc<Bridge>>,
}

impl BridgeRegistry {
    pub fn new() -> Self {
        Self {
            bridges: DashMap::new(),
        }
    }

    pub fn insert(&self, bridge: std::sync::Arc<Bridge>) {
        self.bridges.insert(bridge.id, bridge);
    }

    pub fn get(&self, id: BridgeId) -> Option<std::sync::Arc<Bridge>> {
        self.bridges.get(&id).map(|entry| entry.clone())
    }

    pub fn remove(&self, id: BridgeId) {
        self.bridges.remove(&id);
    }

    pub fn list(&self) -> Vec<std::sync::Arc<Bridge>> {
        self.bridges.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn count(&self) -> usize {
        self.bridges.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::leg::{Direction, Leg};
    use std::sync::Arc;

    fn leg_handle(call_id: &str) -> LegHandle {
        Arc::new(parking_lot::Mutex::new(Leg::new(call_id.to_string(), Direction::Inbound)))
    }

    #[test]
    fn insert_then_get_roundtrips() {
        let registry = LegRegistry::new();
        let handle = leg_handle("call-1");
        let id = registry.insert(handle.clone());
        assert!(registry.get(id).is_some());
        assert_eq!(registry.count(), 1);
    }

    #[test]
    fn remove_drops_the_leg_and_its_wire_call_id_index() {
        let registry = LegRegistry::new();
        let handle = leg_handle("call-2");
        let id = registry.insert(handle);
        registry.index_wire_call_id("wire-abc".to_string(), id);
        assert!(registry.get_by_wire_call_id("wire-abc").is_some());

        registry.remove(id);
        assert!(registry.get(id).is_none());
        assert!(registry.get_by_wire_call_id("wire-abc").is_none());
    }

    #[test]
    fn get_by_wire_call_id_is_none_when_unindexed() {
        let registry = LegRegistry::new();
        assert!(registry.get_by_wire_call_id("nope").is_none());
    }

    #[test]
    fn list_returns_every_inserted_leg() {
        let registry = LegRegistry::new();
        registry.insert(leg_handle("a"));
        registry.insert(leg_handle("b"));
        assert_eq!(registry.list().len(), 2);
    }

    #[test]
    fn bridge_registry_insert_get_remove() {
        let legs = Arc::new(LegRegistry::new());
        let id_a = legs.insert(leg_handle("a"));
        let id_b = legs.insert(leg_handle("b"));

        let bridges = BridgeRegistry::new();
        let bridge = crate::bridge::Bridge::new(id_a, id_b, legs, None);
        let bridge_id = bridge.id;
        bridges.insert(bridge.clone());

        assert!(bridges.get(bridge_id).is_some());
        assert_eq!(bridges.count(), 1);
        bridges.remove(bridge_id);
        assert!(bridges.get(bridge_id).is_none());
    }
}
