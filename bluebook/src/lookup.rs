//! Method dictionaries and the global method cache.
use crate::{MethodHeader, ObjectMemory, Value, VmError};

pub const CLASS_SUPERCLASS: usize = 0;
pub const CLASS_METHOD_DICTIONARY: usize = 1;
pub const CLASS_FORMAT: usize = 2;
pub const CLASS_NAME: usize = 6;

pub const DICTIONARY_METHOD_ARRAY: usize = 1;
pub const DICTIONARY_SELECTOR_START: usize = 2;

pub const MESSAGE_SELECTOR: usize = 0;
pub const MESSAGE_ARGUMENTS: usize = 1;
pub const MESSAGE_LOOKUP_CLASS: usize = 2;

pub const ASSOCIATION_VALUE: usize = 1;

pub const METHOD_CACHE_SIZE: usize = 1024;
const METHOD_CACHE_MASK: usize = METHOD_CACHE_SIZE - 1;
const METHOD_CACHE_PROBES: usize = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub selector: Value,
    pub class: Value,
    pub method: Value,
    pub primitive: usize,
}

/// Direct-mapped cache with reprobe, keyed by selector and class hash.
#[derive(Debug)]
pub struct MethodCache {
    entries: Vec<Option<CacheEntry>>,
    randomish: usize,
    pub hits: u64,
    pub misses: u64,
}

impl Default for MethodCache {
    fn default() -> Self {
        Self::new()
    }
}

impl MethodCache {
    pub fn new() -> Self {
        Self {
            entries: vec![None; METHOD_CACHE_SIZE],
            randomish: 0,
            hits: 0,
            misses: 0,
        }
    }

    fn probes(selector_hash: u16, class_hash: u16) -> impl Iterator<Item = usize> {
        let start = (selector_hash ^ class_hash) as usize;
        (0..METHOD_CACHE_PROBES)
            .map(move |i| (start + i * selector_hash as usize) & METHOD_CACHE_MASK)
    }

    pub fn probe(
        &mut self,
        selector: Value,
        selector_hash: u16,
        class: Value,
        class_hash: u16,
    ) -> Option<CacheEntry> {
        let hit = Self::probes(selector_hash, class_hash)
            .filter_map(|slot| self.entries[slot])
            .find(|entry| entry.selector == selector && entry.class == class);
        match hit {
            Some(_) => self.hits += 1,
            None => self.misses += 1,
        }
        hit
    }

    /// Fill an empty probe slot, or replace the one picked by the rotating
    /// counter so a handful of colliding pairs do not evict each other forever.
    pub fn install(&mut self, entry: CacheEntry, selector_hash: u16, class_hash: u16) {
        self.randomish = (self.randomish + 1) % METHOD_CACHE_PROBES;
        let mut victim = None;
        for (i, slot) in Self::probes(selector_hash, class_hash).enumerate() {
            if self.entries[slot].is_none() {
                self.entries[slot] = Some(entry);
                return;
            }
            if i == self.randomish {
                victim = Some(slot);
            }
        }
        if let Some(slot) = victim {
            self.entries[slot] = Some(entry);
        }
    }

    pub fn clear(&mut self) {
        self.entries.fill(None);
    }

    pub fn flush_selector(&mut self, selector: Value) {
        for entry in &mut self.entries {
            if entry.is_some_and(|e| e.selector == selector) {
                *entry = None;
            }
        }
    }

    pub fn flush_method(&mut self, method: Value) {
        for entry in &mut self.entries {
            if entry.is_some_and(|e| e.method == method) {
                *entry = None;
            }
        }
    }
}

fn field(memory: &ObjectMemory, object: Value, index: usize) -> Result<Value, VmError> {
    memory
        .object(object)?
        .pointers
        .get(index)
        .copied()
        .ok_or(VmError::Malformed {
            what: "lookup structure",
            value: object,
        })
}

/// Open-addressed probe of one method dictionary. The selector part is a power
/// of two long; an empty (nil) key ends the probe.
pub fn lookup_in_dictionary(
    memory: &ObjectMemory,
    dictionary: Value,
    selector: Value,
    nil: Value,
) -> Result<Option<Value>, VmError> {
    let Some(dict) = memory.get(dictionary) else {
        return Ok(None);
    };
    let length = dict.pointers.len();
    if length <= DICTIONARY_SELECTOR_START {
        return Ok(None);
    }
    let selector_hash = memory.object(selector).map_or(0, |s| s.hash as usize);
    let mask = (length - DICTIONARY_SELECTOR_START).wrapping_sub(1);
    let start = (mask & selector_hash) + DICTIONARY_SELECTOR_START;
    let start = if start < length {
        start
    } else {
        DICTIONARY_SELECTOR_START
    };
    for index in (start..length).chain(DICTIONARY_SELECTOR_START..start) {
        let key = dict.pointers[index];
        if key == nil {
            return Ok(None);
        }
        if key == selector {
            let methods = field(memory, dictionary, DICTIONARY_METHOD_ARRAY)?;
            return field(memory, methods, index - DICTIONARY_SELECTOR_START).map(Some);
        }
    }
    Ok(None)
}

/// Walk the superclass chain from `class`. No cache involvement.
pub fn find_method(
    memory: &ObjectMemory,
    class: Value,
    selector: Value,
    nil: Value,
) -> Result<Option<Value>, VmError> {
    let mut current = class;
    while current != nil {
        let dictionary = field(memory, current, CLASS_METHOD_DICTIONARY)?;
        if let Some(method) = lookup_in_dictionary(memory, dictionary, selector, nil)? {
            return Ok(Some(method));
        }
        current = field(memory, current, CLASS_SUPERCLASS)?;
    }
    Ok(None)
}

/// Cache-backed lookup without the does-not-understand fallback.
pub fn cached_lookup(
    memory: &ObjectMemory,
    cache: &mut MethodCache,
    class: Value,
    selector: Value,
    nil: Value,
) -> Result<Option<CacheEntry>, VmError> {
    let selector_hash = memory.object(selector).map_or(0, |s| s.hash);
    let class_hash = memory.object(class)?.hash;
    if let Some(entry) = cache.probe(selector, selector_hash, class, class_hash) {
        return Ok(Some(entry));
    }
    let Some(method) = find_method(memory, class, selector, nil)? else {
        return Ok(None);
    };
    let entry = CacheEntry {
        selector,
        class,
        method,
        primitive: MethodHeader::of(memory, method)?.primitive_index(),
    };
    cache.install(entry, selector_hash, class_hash);
    Ok(Some(entry))
}
