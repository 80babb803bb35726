//! Generational slot arena.

use alloc::vec::Vec;
use core::fmt;

/// Position plus generation of a value in an [`Arena`].
///
/// A removed slot bumps its generation, so an index that outlives its value
/// never resolves to whatever later reuses the slot.
#[derive(Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Index {
    slot: u32,
    generation: u32,
}

impl fmt::Debug for Index {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}v{}", self.slot, self.generation)
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    vacant: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            slots: Vec::new(),
            vacant: Vec::new(),
            len: 0,
        }
    }

    /// Store `value`, handing it back if the heap cannot grow the arena.
    ///
    /// Space for every slot's vacancy entry is reserved up front, so
    /// [`Arena::remove`] never allocates.
    pub fn insert(&mut self, value: T) -> Result<Index, T> {
        if let Some(slot) = self.vacant.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.value = Some(value);
            self.len += 1;
            return Ok(Index {
                slot,
                generation: entry.generation,
            });
        }
        let Ok(slot) = u32::try_from(self.slots.len()) else {
            return Err(value);
        };
        if self.slots.try_reserve(1).is_err()
            || self.vacant.try_reserve(self.slots.len() + 1).is_err()
        {
            return Err(value);
        }
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Ok(Index {
            slot,
            generation: 0,
        })
    }

    #[must_use]
    pub fn get(&self, index: Index) -> Option<&T> {
        self.slots
            .get(index.slot as usize)
            .filter(|s| s.generation == index.generation)
            .and_then(|s| s.value.as_ref())
    }

    pub fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        self.slots
            .get_mut(index.slot as usize)
            .filter(|s| s.generation == index.generation)
            .and_then(|s| s.value.as_mut())
    }

    #[must_use]
    pub fn contains(&self, index: Index) -> bool {
        self.get(index).is_some()
    }

    pub fn remove(&mut self, index: Index) -> Option<T> {
        let slot = self.slots.get_mut(index.slot as usize)?;
        if slot.generation != index.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.vacant.push(index.slot);
        self.len -= 1;
        Some(value)
    }

    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Live values with their indices, in slot order.
    #[allow(clippy::cast_possible_truncation)]
    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, s)| {
            s.value.as_ref().map(|v| {
                (
                    Index {
                        slot: i as u32,
                        generation: s.generation,
                    },
                    v,
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stale_index_does_not_see_reused_slot() {
        let mut arena = Arena::new();
        let a = arena.insert("a").unwrap();
        arena.remove(a).unwrap();
        let b = arena.insert("b").unwrap();
        assert_eq!(arena.get(a), None);
        assert_eq!(arena.get(b), Some(&"b"));
        assert_eq!(arena.remove(a), None);
        assert_eq!(arena.len(), 1);
    }

    #[test]
    fn iter_skips_vacant_slots() {
        let mut arena = Arena::new();
        let a = arena.insert(1).unwrap();
        let _ = arena.insert(2);
        let c = arena.insert(3).unwrap();
        arena.remove(a);
        let values: Vec<_> = arena.iter().map(|(_, v)| *v).collect();
        assert_eq!(values, vec![2, 3]);
        assert!(arena.contains(c));
    }

    #[test]
    fn removal_never_grows_the_vacancy_list() {
        let mut arena = Arena::new();
        let ids: Vec<_> = (0..5).map(|i| arena.insert(i).unwrap()).collect();
        let reserved = arena.vacant.capacity();
        assert!(reserved >= ids.len());
        for id in ids {
            arena.remove(id).unwrap();
        }
        assert_eq!(arena.vacant.capacity(), reserved);
        assert!(arena.is_empty());
    }
}
