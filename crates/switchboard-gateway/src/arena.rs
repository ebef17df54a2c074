//! Generational slot arena.
//!
//! Values are addressed by [`ConnectionId`]: a slot index plus the
//! generation the slot had when the value was inserted. Removing a value
//! bumps the slot's generation, so every id handed out for the old value
//! stops resolving even after the slot is reused.

use switchboard_types::ConnectionId;

#[derive(Debug)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slots indexed by generation-checked ids.
#[derive(Debug)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    /// Empty arena.
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Store a value. Returns `None` only when every slot index is taken.
    pub fn insert(&mut self, value: T) -> Option<ConnectionId> {
        if let Some(index) = self.free.pop() {
            let slot = self.slots.get_mut(usize::try_from(index).ok()?)?;
            slot.value = Some(value);
            self.len = self.len.saturating_add(1);
            return Some(ConnectionId::new(index, slot.generation));
        }

        let index = u32::try_from(self.slots.len()).ok()?;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len = self.len.saturating_add(1);
        Some(ConnectionId::new(index, 0))
    }

    /// The value for `id`, if it is still live.
    pub fn get(&self, id: ConnectionId) -> Option<&T> {
        self.slot(id).and_then(|slot| slot.value.as_ref())
    }

    /// Mutable access to the value for `id`, if it is still live.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut T> {
        let slot = self.slots.get_mut(usize::try_from(id.slot()).ok()?)?;
        if slot.generation != id.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    /// Remove and return the value, invalidating `id`.
    pub fn remove(&mut self, id: ConnectionId) -> Option<T> {
        let slot = self.slots.get_mut(usize::try_from(id.slot()).ok()?)?;
        if slot.generation != id.generation() {
            return None;
        }
        let value = slot.value.take()?;
        self.len = self.len.saturating_sub(1);
        // A slot whose generation would wrap is retired rather than reused.
        if let Some(next) = slot.generation.checked_add(1) {
            slot.generation = next;
            self.free.push(id.slot());
        }
        Some(value)
    }

    /// Number of live values.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether no values are live.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Ids of every live value, in slot order.
    pub fn ids(&self) -> Vec<ConnectionId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Live values with their ids, in slot order.
    pub fn iter(&self) -> impl Iterator<Item = (ConnectionId, &T)> {
        self.slots.iter().zip(0_u32..).filter_map(|(slot, index)| {
            slot.value
                .as_ref()
                .map(|value| (ConnectionId::new(index, slot.generation), value))
        })
    }

    fn slot(&self, id: ConnectionId) -> Option<&Slot<T>> {
        let slot = self.slots.get(usize::try_from(id.slot()).ok()?)?;
        (slot.generation == id.generation()).then_some(slot)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::arithmetic_side_effects)]
mod tests {
    use super::*;

    #[test]
    fn removed_id_goes_stale_when_slot_is_reused() {
        let mut arena = Arena::new();
        let first = arena.insert("a").unwrap();
        assert_eq!(arena.remove(first), Some("a"));

        let second = arena.insert("b").unwrap();
        assert_eq!(second.slot(), first.slot());
        assert_ne!(second, first);
        assert_eq!(arena.get(first), None);
        assert_eq!(arena.get(second), Some(&"b"));
        assert_eq!(arena.remove(first), None);
    }

    #[test]
    fn len_tracks_live_values() {
        let mut arena = Arena::new();
        let a = arena.insert(1).unwrap();
        let b = arena.insert(2).unwrap();
        assert_eq!(arena.len(), 2);
        arena.remove(a);
        assert_eq!(arena.len(), 1);
        assert_eq!(arena.ids(), vec![b]);
        arena.remove(b);
        assert!(arena.is_empty());
    }

    #[test]
    fn get_mut_respects_generation() {
        let mut arena = Arena::new();
        let id = arena.insert(1).unwrap();
        *arena.get_mut(id).unwrap() += 1;
        assert_eq!(arena.get(id), Some(&2));
        arena.remove(id);
        assert!(arena.get_mut(id).is_none());
    }

    #[test]
    fn exhausted_generation_retires_slot() {
        let mut arena = Arena::new();
        let id = arena.insert(()).unwrap();
        arena.slots.get_mut(0).unwrap().generation = u32::MAX;
        let max = ConnectionId::new(id.slot(), u32::MAX);
        arena.remove(max);
        let next = arena.insert(()).unwrap();
        assert_eq!(next.slot(), 1);
    }
}
