use std::collections::HashMap;

use crate::{HeapObject, SMALL_INT_MAX, Value, VmError};

pub const TABLE_MIN_SIZE: usize = 30_000;
pub const TABLE_GROW_SIZE: usize = 10_000;
pub const TABLE_MAX_SIZE: usize = 60_000;

#[derive(Debug, Clone)]
pub struct MemorySettings {
    /// initial object table capacity
    pub table_min: usize,
    /// slots added per growth step, also the amount a reclamation must free
    pub table_grow: usize,
    pub table_max: usize,
}

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            table_min: TABLE_MIN_SIZE,
            table_grow: TABLE_GROW_SIZE,
            table_max: TABLE_MAX_SIZE,
        }
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum ReclaimScope {
    /// only objects registered after the old boundary are swept
    Young,
    Full,
}

#[derive(Debug, Default, Clone, Copy)]
pub struct MemoryStats {
    pub reclamations: usize,
    pub reclaimed: usize,
    pub growths: usize,
}

#[derive(Debug)]
struct Slot {
    generation: u32,
    object: Option<HeapObject>,
}

/// Arena of heap objects plus the ordered object table used for enumeration.
///
/// The arena owns storage and hands out generation-checked references. The
/// table lists live references in registration order; reclamation slides the
/// survivors down without reordering them.
#[derive(Debug)]
pub struct ObjectMemory {
    slots: Vec<Slot>,
    free: Vec<u32>,
    table: Vec<Value>,
    capacity: usize,
    old_boundary: usize,
    last_hash: i32,
    last_index: usize,
    pinned: Vec<Value>,
    settings: MemorySettings,
    stats: MemoryStats,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum BecomeError {
    LengthMismatch,
    NotAnObject,
    Duplicate,
}

impl ObjectMemory {
    pub fn new(settings: MemorySettings) -> Self {
        let capacity = settings.table_min.min(settings.table_max);
        Self {
            slots: Vec::with_capacity(capacity),
            free: Vec::new(),
            table: Vec::with_capacity(capacity),
            capacity,
            old_boundary: 0,
            last_hash: 0,
            last_index: 0,
            pinned: Vec::new(),
            settings,
            stats: MemoryStats::default(),
        }
    }

    // ── Registration ──────────────────────────────────────────────

    #[inline]
    pub fn is_full(&self) -> bool {
        self.table.len() >= self.capacity
    }

    pub fn can_grow(&self) -> bool {
        self.capacity < self.settings.table_max
    }

    pub fn grow(&mut self) -> bool {
        if !self.can_grow() {
            return false;
        }
        let new_capacity = (self.capacity + self.settings.table_grow).min(self.settings.table_max);
        log::info!("growing object table to {new_capacity} objects");
        self.capacity = new_capacity;
        self.stats.growths += 1;
        true
    }

    fn next_hash(&mut self) -> u16 {
        self.last_hash = 13849_i32.wrapping_add(27181_i32.wrapping_mul(self.last_hash));
        (self.last_hash & 0xFFF) as u16
    }

    /// Register a new object and give it a fresh identity hash.
    pub fn register(&mut self, mut object: HeapObject) -> Result<Value, VmError> {
        object.hash = self.next_hash();
        self.insert(object)
    }

    /// Register an object that already carries its identity hash.
    pub fn register_with_hash(&mut self, object: HeapObject) -> Result<Value, VmError> {
        self.insert(object)
    }

    fn insert(&mut self, object: HeapObject) -> Result<Value, VmError> {
        if self.is_full() && !self.grow() {
            return Err(VmError::ObjectTableFull(self.table.len()));
        }
        let value = match self.free.pop() {
            Some(index) => {
                let slot = &mut self.slots[index as usize];
                slot.object = Some(object);
                Value::reference(index, slot.generation)
            }
            None => {
                let index = self.slots.len() as u32;
                self.slots.push(Slot {
                    generation: 0,
                    object: Some(object),
                });
                Value::reference(index, 0)
            }
        };
        self.table.push(value);
        Ok(value)
    }

    pub fn set_last_hash(&mut self, seed: i32) {
        self.last_hash = seed;
    }

    /// Everything registered so far counts as old for young reclamation.
    pub fn mark_old_boundary(&mut self) {
        self.old_boundary = self.table.len();
    }

    // ── Access ────────────────────────────────────────────────────

    #[inline]
    pub fn get(&self, value: Value) -> Option<&HeapObject> {
        if !value.is_reference() {
            return None;
        }
        let slot = self.slots.get(value.index())?;
        if slot.generation != value.generation() {
            return None;
        }
        slot.object.as_ref()
    }

    #[inline]
    pub fn get_mut(&mut self, value: Value) -> Option<&mut HeapObject> {
        if !value.is_reference() {
            return None;
        }
        let slot = self.slots.get_mut(value.index())?;
        if slot.generation != value.generation() {
            return None;
        }
        slot.object.as_mut()
    }

    #[inline]
    pub fn object(&self, value: Value) -> Result<&HeapObject, VmError> {
        self.get(value).ok_or(VmError::InvalidReference(value))
    }

    #[inline]
    pub fn object_mut(&mut self, value: Value) -> Result<&mut HeapObject, VmError> {
        self.get_mut(value).ok_or(VmError::InvalidReference(value))
    }

    pub fn is_live(&self, value: Value) -> bool {
        self.get(value).is_some()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> MemoryStats {
        self.stats
    }

    pub fn settings(&self) -> &MemorySettings {
        &self.settings
    }

    // ── Enumeration ───────────────────────────────────────────────

    /// Table position of `value`, checking the hint from the previous query first.
    pub fn index_of(&mut self, value: Value) -> Option<usize> {
        if self.table.get(self.last_index) == Some(&value) {
            return Some(self.last_index);
        }
        let index = self.table.iter().position(|&v| v == value)?;
        self.last_index = index;
        Some(index)
    }

    /// First object at or after table position `start`, optionally of `class`.
    pub fn enumerate(&mut self, start: usize, class: Option<Value>) -> Option<Value> {
        for index in start..self.table.len() {
            let value = self.table[index];
            let Some(object) = self.get(value) else {
                continue;
            };
            if class.is_none_or(|class| object.class == class) {
                self.last_index = index;
                return Some(value);
            }
        }
        None
    }

    pub fn first_instance(&mut self, class: Value) -> Option<Value> {
        self.enumerate(0, Some(class))
    }

    pub fn next_instance(&mut self, after: Value) -> Option<Value> {
        let class = self.get(after)?.class;
        let start = self.index_of(after)? + 1;
        self.enumerate(start, Some(class))
    }

    pub fn first_object(&mut self) -> Option<Value> {
        self.enumerate(0, None)
    }

    pub fn next_object(&mut self, after: Value) -> Option<Value> {
        let start = self.index_of(after)? + 1;
        self.enumerate(start, None)
    }

    pub fn iter(&self) -> impl Iterator<Item = Value> + '_ {
        self.table.iter().copied()
    }

    // ── Become ────────────────────────────────────────────────────

    /// Rewrite every class field and pointer field that refers to an entry of
    /// `from` to the paired entry of `to` (and back when `two_way`). All
    /// preconditions are checked before anything is touched.
    pub fn bulk_become(
        &mut self,
        from: &[Value],
        to: &[Value],
        two_way: bool,
    ) -> Result<HashMap<Value, Value>, BecomeError> {
        if from.len() != to.len() {
            return Err(BecomeError::LengthMismatch);
        }
        let mut mapping = HashMap::with_capacity(from.len() * 2);
        for (&old, &new) in from.iter().zip(to) {
            if !old.is_reference() {
                return Err(BecomeError::NotAnObject);
            }
            if mapping.insert(old, new).is_some() {
                return Err(BecomeError::Duplicate);
            }
        }
        if two_way {
            for (&old, &new) in from.iter().zip(to) {
                if !new.is_reference() {
                    return Err(BecomeError::NotAnObject);
                }
                if mapping.insert(new, old).is_some() {
                    return Err(BecomeError::Duplicate);
                }
            }
        }

        for slot in &mut self.slots {
            let Some(object) = slot.object.as_mut() else {
                continue;
            };
            if let Some(&new) = mapping.get(&object.class) {
                object.class = new;
            }
            for field in &mut object.pointers {
                if let Some(&new) = mapping.get(field) {
                    *field = new;
                }
            }
        }
        for pin in &mut self.pinned {
            if let Some(&new) = mapping.get(pin) {
                *pin = new;
            }
        }
        Ok(mapping)
    }

    // ── Pins ──────────────────────────────────────────────────────

    /// Keep `value` alive across reclamations until released.
    pub fn pin(&mut self, value: Value) {
        self.pinned.push(value);
    }

    pub fn pin_count(&self) -> usize {
        self.pinned.len()
    }

    /// Release every pin taken after `mark`.
    pub fn release_pins(&mut self, mark: usize) {
        self.pinned.truncate(mark);
    }

    // ── Reclamation ───────────────────────────────────────────────

    /// Mark from `roots` and the pinned values, free every unreachable object
    /// in `scope`, and slide the survivors down the table. A young reclamation
    /// treats every old object as a root. Returns the number of objects freed.
    pub fn reclaim(&mut self, roots: &[Value], scope: ReclaimScope) -> usize {
        let boundary = self.old_boundary.min(self.table.len());
        let start = match scope {
            ReclaimScope::Young => boundary,
            ReclaimScope::Full => 0,
        };
        let mut marked = vec![false; self.slots.len()];
        let mut work: Vec<Value> = roots.iter().chain(&self.pinned).copied().collect();
        work.extend(&self.table[..start]);
        while let Some(value) = work.pop() {
            let Some(object) = self.get(value) else {
                continue;
            };
            let index = value.index();
            if marked[index] {
                continue;
            }
            marked[index] = true;
            work.push(object.class);
            work.extend(object.pointers.iter().filter(|v| v.is_reference()));
        }

        let mut write = start;
        let mut old_survivors = start;
        let mut freed = 0;
        for read in start..self.table.len() {
            let value = self.table[read];
            let index = value.index();
            if marked.get(index).copied().unwrap_or(false) {
                self.table[write] = value;
                write += 1;
                if read < boundary {
                    old_survivors += 1;
                }
                continue;
            }
            let slot = &mut self.slots[index];
            if slot.generation == value.generation() && slot.object.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(index as u32);
                freed += 1;
            }
        }
        self.table.truncate(write);
        if scope == ReclaimScope::Full {
            self.old_boundary = old_survivors;
        }
        self.last_index = 0;
        self.stats.reclamations += 1;
        self.stats.reclaimed += freed;
        log::debug!(
            "reclaimed {freed} objects ({scope:?}), {} live of {}",
            self.table.len(),
            self.capacity
        );
        freed
    }

    /// Free table slots times the mean live object size, clamped to the
    /// immediate range.
    pub fn space_left(&self) -> i64 {
        let live = self.table.len();
        let total: usize = self
            .table
            .iter()
            .filter_map(|&v| self.get(v))
            .map(HeapObject::byte_size)
            .sum();
        let mean = if live == 0 { 64 } else { total / live };
        let free_slots = self.settings.table_max.saturating_sub(live);
        ((free_slots * mean) as i64).min(SMALL_INT_MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Format;

    fn memory() -> ObjectMemory {
        ObjectMemory::new(MemorySettings {
            table_min: 8,
            table_grow: 4,
            table_max: 16,
        })
    }

    fn blank(memory: &mut ObjectMemory, fields: Vec<Value>) -> Value {
        let class = Value::small(0);
        memory
            .register(HeapObject::with_pointers(class, Format::Fixed, fields))
            .expect("room")
    }

    #[test]
    fn identity_hash_follows_the_congruential_sequence() {
        let mut memory = memory();
        let a = blank(&mut memory, vec![]);
        let b = blank(&mut memory, vec![]);
        let first = 13849_i32;
        let second = 13849_i32.wrapping_add(27181_i32.wrapping_mul(first));
        assert_eq!(memory.get(a).unwrap().hash, (first & 0xFFF) as u16);
        assert_eq!(memory.get(b).unwrap().hash, (second & 0xFFF) as u16);
    }

    #[test]
    fn registering_past_capacity_grows_until_the_maximum() {
        let mut memory = memory();
        for _ in 0..16 {
            blank(&mut memory, vec![]);
        }
        assert_eq!(memory.capacity(), 16);
        assert_eq!(memory.stats().growths, 2);
        let overflow = memory.register(HeapObject::with_pointers(
            Value::small(0),
            Format::Empty,
            vec![],
        ));
        assert!(matches!(overflow, Err(VmError::ObjectTableFull(16))));
    }

    #[test]
    fn enumeration_filters_by_class_and_ends_with_none() {
        let mut memory = memory();
        let class_a = blank(&mut memory, vec![]);
        let class_b = blank(&mut memory, vec![]);
        let a1 = memory
            .register(HeapObject::with_pointers(class_a, Format::Empty, vec![]))
            .unwrap();
        memory
            .register(HeapObject::with_pointers(class_b, Format::Empty, vec![]))
            .unwrap();
        let a2 = memory
            .register(HeapObject::with_pointers(class_a, Format::Empty, vec![]))
            .unwrap();
        assert_eq!(memory.first_instance(class_a), Some(a1));
        assert_eq!(memory.next_instance(a1), Some(a2));
        assert_eq!(memory.next_instance(a2), None);
        assert_eq!(memory.first_object(), Some(class_a));
        assert_eq!(memory.index_of(a2), Some(4));
    }

    #[test]
    fn reclaim_frees_unreachable_and_keeps_order() {
        let mut memory = memory();
        let leaf = blank(&mut memory, vec![]);
        let garbage = blank(&mut memory, vec![]);
        let root = blank(&mut memory, vec![leaf]);
        let pinned = blank(&mut memory, vec![]);
        memory.pin(pinned);
        let hash = memory.get(root).unwrap().hash;

        assert_eq!(memory.reclaim(&[root], ReclaimScope::Full), 1);
        assert!(memory.get(garbage).is_none());
        assert_eq!(memory.iter().collect::<Vec<_>>(), vec![leaf, root, pinned]);
        assert_eq!(memory.get(root).unwrap().hash, hash);

        let reused = blank(&mut memory, vec![]);
        assert_eq!(reused.index(), garbage.index());
        assert_ne!(reused, garbage);
        assert!(memory.get(garbage).is_none());
    }

    #[test]
    fn young_reclaim_spares_old_objects() {
        let mut memory = memory();
        let old = blank(&mut memory, vec![]);
        memory.mark_old_boundary();
        let young = blank(&mut memory, vec![]);
        assert_eq!(memory.reclaim(&[], ReclaimScope::Young), 1);
        assert!(memory.is_live(old));
        assert!(!memory.is_live(young));
        assert_eq!(memory.reclaim(&[], ReclaimScope::Full), 1);
        assert!(!memory.is_live(old));
    }

    #[test]
    fn young_reclaim_keeps_what_old_objects_reference() {
        let mut memory = memory();
        let old = blank(&mut memory, vec![Value::small(0)]);
        memory.mark_old_boundary();
        let young = blank(&mut memory, vec![]);
        let grandchild = blank(&mut memory, vec![]);
        memory.object_mut(young).unwrap().pointers.push(grandchild);
        memory.object_mut(old).unwrap().pointers[0] = young;
        let garbage = blank(&mut memory, vec![]);

        assert_eq!(memory.reclaim(&[], ReclaimScope::Young), 1);
        assert!(!memory.is_live(garbage));
        let field = memory.object(old).unwrap().pointers[0];
        assert!(memory.get(field).is_some());
        assert!(memory.is_live(grandchild));
        assert_eq!(memory.enumerate(0, None), Some(old));
    }

    #[test]
    fn full_reclaim_moves_the_old_boundary_to_the_old_survivors() {
        let mut memory = memory();
        let dead_old = blank(&mut memory, vec![]);
        let kept_old = blank(&mut memory, vec![]);
        memory.mark_old_boundary();
        let young = blank(&mut memory, vec![]);

        assert_eq!(memory.reclaim(&[kept_old, young], ReclaimScope::Full), 1);
        assert!(!memory.is_live(dead_old));
        // the young object stays young once the table slides down
        assert_eq!(memory.reclaim(&[], ReclaimScope::Young), 1);
        assert!(!memory.is_live(young));
        assert!(memory.is_live(kept_old));
    }

    #[test]
    fn become_rewrites_fields_and_classes() {
        let mut memory = memory();
        let a = blank(&mut memory, vec![]);
        let b = blank(&mut memory, vec![]);
        let holder = blank(&mut memory, vec![a, b, Value::small(3)]);
        let instance = memory
            .register(HeapObject::with_pointers(a, Format::Empty, vec![]))
            .unwrap();

        memory.bulk_become(&[a], &[b], true).unwrap();
        assert_eq!(
            memory.get(holder).unwrap().pointers,
            vec![b, a, Value::small(3)]
        );
        assert_eq!(memory.get(instance).unwrap().class, b);
    }

    #[test]
    fn failed_become_changes_nothing() {
        let mut memory = memory();
        let a = blank(&mut memory, vec![]);
        let b = blank(&mut memory, vec![]);
        let holder = blank(&mut memory, vec![a, b]);
        let before = memory.get(holder).unwrap().pointers.clone();

        assert_eq!(
            memory.bulk_become(&[a, b], &[b], false),
            Err(BecomeError::LengthMismatch)
        );
        assert_eq!(
            memory.bulk_become(&[a, a], &[b, b], false),
            Err(BecomeError::Duplicate)
        );
        assert_eq!(
            memory.bulk_become(&[a, Value::small(1)], &[b, b], false),
            Err(BecomeError::NotAnObject)
        );
        assert_eq!(
            memory.bulk_become(&[a], &[Value::small(1)], true),
            Err(BecomeError::NotAnObject)
        );
        assert_eq!(memory.get(holder).unwrap().pointers, before);
    }
}
