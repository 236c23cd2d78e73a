//! Indexed access: at:, at:put:, size and replace, with the at-cache that lets
//! the at: and at:put: bytecodes skip the send.
use crate::{
    Format, Interpreter, PrimitiveError, PrimitiveResult, Value, VmError,
    context::STACK_POINTER,
    primitives::{OrFail, declined},
    special::{CHARACTER_TABLE, CLASS_BLOCK_CONTEXT, CLASS_CHARACTER, CLASS_FLOAT, CLASS_METHOD_CONTEXT},
};

pub const AT_CACHE_SIZE: usize = 32;
const AT_CACHE_MASK: usize = AT_CACHE_SIZE - 1;

pub const CHARACTER_VALUE: usize = 0;

// offsets of at: and at:put: in the special selectors array
pub const SPECIAL_AT: usize = 32;
pub const SPECIAL_AT_PUT: usize = 34;

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Access {
    At,
    AtPut,
}

/// Bounds and layout of one array, valid until the next reclamation.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AtCacheEntry {
    pub array: Value,
    pub size: usize,
    pub ivar_offset: usize,
    pub convert_chars: bool,
}

/// Direct-mapped on the array's identity hash, one table per access kind.
#[derive(Debug)]
pub struct AtCache {
    at: [Option<AtCacheEntry>; AT_CACHE_SIZE],
    at_put: [Option<AtCacheEntry>; AT_CACHE_SIZE],
}

impl Default for AtCache {
    fn default() -> Self {
        Self::new()
    }
}

impl AtCache {
    pub fn new() -> Self {
        Self {
            at: [None; AT_CACHE_SIZE],
            at_put: [None; AT_CACHE_SIZE],
        }
    }

    fn table(&self, access: Access) -> &[Option<AtCacheEntry>; AT_CACHE_SIZE] {
        match access {
            Access::At => &self.at,
            Access::AtPut => &self.at_put,
        }
    }

    pub fn lookup(&self, access: Access, array: Value, hash: u16) -> Option<AtCacheEntry> {
        self.table(access)[hash as usize & AT_CACHE_MASK].filter(|entry| entry.array == array)
    }

    pub fn install(&mut self, access: Access, hash: u16, entry: AtCacheEntry) {
        let table = match access {
            Access::At => &mut self.at,
            Access::AtPut => &mut self.at_put,
        };
        table[hash as usize & AT_CACHE_MASK] = Some(entry);
    }

    pub fn clear(&mut self) {
        self.at.fill(None);
        self.at_put.fill(None);
    }
}

impl Interpreter {
    pub(crate) fn is_context(&self, value: Value) -> bool {
        self.is_instance_of(value, CLASS_METHOD_CONTEXT)
            || self.is_instance_of(value, CLASS_BLOCK_CONTEXT)
    }

    /// Named instance variables of `value`.
    pub(crate) fn fixed_fields(&self, value: Value) -> Result<usize, VmError> {
        let object = self.memory.object(value)?;
        let spec = match object.format {
            Format::FixedIndexable | Format::Weak => Some(self.instance_spec(object.class)?),
            _ => None,
        };
        Ok(object.inst_size(spec))
    }

    /// Indexed slot count as at: sees it, `None` for non-indexable objects.
    pub(crate) fn indexable_size(&self, value: Value) -> Result<Option<usize>, VmError> {
        if value.is_small() {
            return Ok(None);
        }
        if self.is_context(value) {
            let stored = self.fetch_int(value, STACK_POINTER)?;
            return Ok(Some(stored.max(0) as usize));
        }
        let object = self.memory.object(value)?;
        let size = match object.format {
            Format::Empty | Format::Fixed => return Ok(None),
            Format::Indexable | Format::FixedIndexable | Format::Weak => {
                object.pointers.len() - self.fixed_fields(value)?
            }
            Format::Words | Format::Bytes => object.body_len(),
            Format::Method => object.body_len() + 4 * object.pointers.len(),
        };
        Ok(Some(size))
    }

    /// Work out the bounds of `array`, and remember them when this came from a
    /// plain at:/at:put: send to an array whose size cannot change.
    fn at_cache_entry(
        &mut self,
        access: Access,
        array: Value,
        convert_chars: bool,
        include_inst_vars: bool,
    ) -> Result<AtCacheEntry, VmError> {
        let fixed = self.fixed_fields(array)?;
        let indexable = self.indexable_size(array)?;
        let format = self.memory.object(array)?.format;
        let (size, ivar_offset) = if include_inst_vars {
            (indexable.unwrap_or(0) + fixed, 0)
        } else {
            let offset = if format.is_pointers() { fixed } else { 0 };
            (indexable.unwrap_or(0), offset)
        };
        let entry = AtCacheEntry {
            array,
            size,
            ivar_offset,
            convert_chars,
        };
        let selector = self.special_selector(match access {
            Access::At => SPECIAL_AT,
            Access::AtPut => SPECIAL_AT_PUT,
        })?;
        let cacheable = self.verify_at == Some((selector, self.class_of(array)?))
            && !self.is_context(array);
        if cacheable {
            let hash = self.memory.object(array)?.hash;
            self.at_cache.install(access, hash, entry);
        }
        Ok(entry)
    }

    pub(crate) fn character_for(&self, byte: u8) -> Result<Value, VmError> {
        self.fetch(self.special(CHARACTER_TABLE), byte as usize)
    }

    fn byte_to_put(&self, value: Value, convert_chars: bool) -> Result<u8, PrimitiveError> {
        let code = if convert_chars {
            if !self.is_instance_of(value, CLASS_CHARACTER) {
                return Err(PrimitiveError::Failed);
            }
            self.fetch(value, CHARACTER_VALUE)?.as_small().or_fail()?
        } else {
            value.as_small().or_fail()?
        };
        u8::try_from(code).or_fail()
    }

    /// Shared body of every at: flavour. Leaves the stack alone.
    pub(crate) fn indexed_at(
        &mut self,
        from_bytecode: bool,
        convert_chars: bool,
        include_inst_vars: bool,
    ) -> Result<Value, PrimitiveError> {
        let array = self.stack_object(1)?;
        let index = self.stack_pos32(0)? as usize;
        let entry = if from_bytecode {
            let hash = self.memory.object(array)?.hash;
            self.at_cache.lookup(Access::At, array, hash).or_fail()?
        } else {
            if self.is_instance_of(array, CLASS_FLOAT) {
                let bits = self.float_value(array).or_fail()?.to_bits();
                let word = match index {
                    1 => (bits >> 32) as u32,
                    2 => bits as u32,
                    _ => return Err(PrimitiveError::Failed),
                };
                return Ok(self.pos32_for(word)?);
            }
            self.at_cache_entry(Access::At, array, convert_chars, include_inst_vars)?
        };
        if index < 1 || index > entry.size {
            return Err(PrimitiveError::Failed);
        }
        let slot = index - 1;
        let object = self.memory.object(array)?;
        if include_inst_vars {
            return object.pointers.get(slot).copied().or_fail();
        }
        match object.format {
            format if format.is_pointers() => {
                object.pointers.get(slot + entry.ivar_offset).copied().or_fail()
            }
            Format::Words => {
                let word = *object.words().and_then(|w| w.get(slot)).or_fail()?;
                Ok(self.pos32_for(word)?)
            }
            Format::Bytes => {
                let byte = *object.bytes().and_then(|b| b.get(slot)).or_fail()?;
                if entry.convert_chars {
                    Ok(self.character_for(byte)?)
                } else {
                    Ok(Value::small(i64::from(byte)))
                }
            }
            _ => {
                let offset = object.pointers.len() * 4;
                let slot = slot.checked_sub(offset).or_fail()?;
                let byte = *object.bytes().and_then(|b| b.get(slot)).or_fail()?;
                Ok(Value::small(i64::from(byte)))
            }
        }
    }

    /// Shared body of every at:put: flavour. Answers the stored value and
    /// leaves the stack alone.
    pub(crate) fn indexed_at_put(
        &mut self,
        from_bytecode: bool,
        convert_chars: bool,
        include_inst_vars: bool,
    ) -> Result<Value, PrimitiveError> {
        let array = self.stack_object(2)?;
        let index = self.stack_pos32(1)? as usize;
        let value = self.stack_value(0)?;
        let entry = if from_bytecode {
            let hash = self.memory.object(array)?.hash;
            self.at_cache.lookup(Access::AtPut, array, hash).or_fail()?
        } else {
            self.at_cache_entry(Access::AtPut, array, convert_chars, include_inst_vars)?
        };
        if index < 1 || index > entry.size {
            return Err(PrimitiveError::Failed);
        }
        let slot = index - 1;
        let format = self.memory.object(array)?.format;
        if include_inst_vars || format.is_pointers() {
            let slot = if include_inst_vars { slot } else { slot + entry.ivar_offset };
            let target = self.memory.object_mut(array)?.pointers.get_mut(slot).or_fail()?;
            *target = value;
            return Ok(value);
        }
        match format {
            Format::Words => {
                let word = self.pos32_value(value)?;
                let object = self.memory.object_mut(array)?;
                *object.words_mut().and_then(|w| w.get_mut(slot)).or_fail()? = word;
            }
            Format::Bytes => {
                let byte = self.byte_to_put(value, entry.convert_chars)?;
                let object = self.memory.object_mut(array)?;
                *object.bytes_mut().and_then(|b| b.get_mut(slot)).or_fail()? = byte;
            }
            _ => {
                let byte = self.byte_to_put(value, entry.convert_chars)?;
                let object = self.memory.object_mut(array)?;
                let slot = slot.checked_sub(object.pointers.len() * 4).or_fail()?;
                *object.bytes_mut().and_then(|b| b.get_mut(slot)).or_fail()? = byte;
            }
        }
        Ok(value)
    }

    pub(crate) fn quick_at(&mut self) -> Result<bool, VmError> {
        let Some(value) = declined(self.indexed_at(true, true, false))? else {
            return Ok(false);
        };
        self.pop_then_push(2, value)?;
        Ok(true)
    }

    pub(crate) fn quick_at_put(&mut self) -> Result<bool, VmError> {
        let Some(value) = declined(self.indexed_at_put(true, true, false))? else {
            return Ok(false);
        };
        self.pop_then_push(3, value)?;
        Ok(true)
    }

    pub(crate) fn quick_size(&mut self) -> Result<bool, VmError> {
        let Some(size) = self.indexable_size(self.top()?)? else {
            return Ok(false);
        };
        let Ok(size) = u32::try_from(size) else {
            return Ok(false);
        };
        let size = self.pos32_for(size)?;
        self.pop_then_push(1, size)?;
        Ok(true)
    }
}

pub fn basic_at(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let value = vm.indexed_at(false, false, false)?;
    vm.answer(1, value)
}

pub fn basic_at_put(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let value = vm.indexed_at_put(false, false, false)?;
    vm.answer(2, value)
}

pub fn string_at(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let value = vm.indexed_at(false, true, false)?;
    vm.answer(1, value)
}

pub fn string_at_put(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let value = vm.indexed_at_put(false, true, false)?;
    vm.answer(2, value)
}

pub fn object_at(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let value = vm.indexed_at(false, false, true)?;
    vm.answer(1, value)
}

pub fn object_at_put(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let value = vm.indexed_at_put(false, false, true)?;
    vm.answer(2, value)
}

pub fn size(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let size = vm.indexable_size(vm.top()?)?.or_fail()?;
    let size = vm.pos32_for(u32::try_from(size).or_fail()?)?;
    vm.answer(0, size)
}

/// replaceFrom:to:with:startingAt: between two objects of the same kind.
pub fn replace(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let dest = vm.stack_object(4)?;
    let start = vm.stack_integer(3)?;
    let stop = vm.stack_integer(2)?;
    let source = vm.stack_object(1)?;
    let source_start = vm.stack_integer(0)?;

    let count = usize::try_from(stop - start + 1).or_fail()?;
    let dest_pos = usize::try_from(start - 1).or_fail()?;
    let source_pos = usize::try_from(source_start - 1).or_fail()?;
    let dest_format = vm.memory.object(dest)?.format;
    let source_format = vm.memory.object(source)?.format;

    if dest_format.is_pointers() && source_format.is_pointers() {
        let source_pos = source_pos + vm.fixed_fields(source)?;
        let dest_pos = dest_pos + vm.fixed_fields(dest)?;
        let elements = vm
            .memory
            .object(source)?
            .pointers
            .get(source_pos..source_pos + count)
            .or_fail()?
            .to_vec();
        vm.memory
            .object_mut(dest)?
            .pointers
            .get_mut(dest_pos..dest_pos + count)
            .or_fail()?
            .copy_from_slice(&elements);
    } else if dest_format == Format::Words && source_format == Format::Words {
        let elements = vm
            .memory
            .object(source)?
            .words()
            .and_then(|w| w.get(source_pos..source_pos + count))
            .or_fail()?
            .to_vec();
        vm.memory
            .object_mut(dest)?
            .words_mut()
            .and_then(|w| w.get_mut(dest_pos..dest_pos + count))
            .or_fail()?
            .copy_from_slice(&elements);
    } else if dest_format == Format::Bytes && source_format == Format::Bytes {
        let elements = vm
            .memory
            .object(source)?
            .bytes()
            .and_then(|b| b.get(source_pos..source_pos + count))
            .or_fail()?
            .to_vec();
        vm.memory
            .object_mut(dest)?
            .bytes_mut()
            .and_then(|b| b.get_mut(dest_pos..dest_pos + count))
            .or_fail()?
            .copy_from_slice(&elements);
    } else {
        return Err(PrimitiveError::Failed);
    }
    vm.answer(4, dest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ReclaimScope, special::CLASS_ARRAY, testing::World};

    fn world_with_stack(values: &[Value]) -> World {
        let mut world = World::new();
        let driver = world.method(&[], &[112]);
        world.activate(driver, world.vm.specials.nil);
        for &value in values {
            world.vm.push(value).unwrap();
        }
        world
    }

    #[test]
    fn at_put_fast_path_is_dropped_by_reclamation() {
        let mut world = World::new();
        let array_class = world.vm.special(CLASS_ARRAY);
        let at_put = world.vm.special_selector(SPECIAL_AT_PUT).unwrap();
        world.install_primitive(array_class, at_put, 2, 61);
        let nil = world.vm.specials.nil;
        let array = world.instance(array_class, &[nil, nil, nil]);
        // array at: 1 put: 2, twice, then array at: 1 put: 0
        let driver = world.method(
            &[array],
            &[32, 118, 119, 193, 135, 32, 118, 119, 193, 135, 32, 118, 117, 193],
        );
        world.activate(driver, nil);
        let hash = world.vm.memory.object(array).unwrap().hash;

        for _ in 0..5 {
            world.vm.step().unwrap();
        }
        let entry = world.vm.at_cache.lookup(Access::AtPut, array, hash).unwrap();
        assert_eq!(entry.size, 3);
        assert_eq!(world.vm.statistics().sends, 1);

        for _ in 0..5 {
            world.vm.step().unwrap();
        }
        assert_eq!(world.vm.statistics().sends, 1);
        assert_eq!(world.vm.fetch(array, 0).unwrap(), Value::small(2));

        world.vm.reclaim(ReclaimScope::Young);
        assert_eq!(world.vm.at_cache.lookup(Access::AtPut, array, hash), None);

        for _ in 0..4 {
            world.vm.step().unwrap();
        }
        assert_eq!(world.vm.statistics().sends, 2);
        assert_eq!(world.vm.fetch(array, 0).unwrap(), Value::small(0));
        assert!(world.vm.at_cache.lookup(Access::AtPut, array, hash).is_some());
    }

    #[test]
    fn direct_primitive_calls_bypass_the_cache() {
        let mut world = world_with_stack(&[]);
        let class = world.vm.special(CLASS_ARRAY);
        let array = world.instance(class, &[Value::small(5)]);
        world.vm.push(array).unwrap();
        world.vm.push(Value::small(1)).unwrap();
        basic_at(&mut world.vm, 1).unwrap();
        assert_eq!(world.vm.top().unwrap(), Value::small(5));
        let hash = world.vm.memory.object(array).unwrap().hash;
        assert_eq!(world.vm.at_cache.lookup(Access::At, array, hash), None);
    }

    #[test]
    fn string_access_converts_characters() {
        let mut world = world_with_stack(&[]);
        let string = world.vm.make_string("hi").unwrap();
        world.vm.push(string).unwrap();
        world.vm.push(Value::small(2)).unwrap();
        string_at(&mut world.vm, 1).unwrap();
        let character = world.vm.top().unwrap();
        assert!(world.vm.is_instance_of(character, CLASS_CHARACTER));
        assert_eq!(
            world.vm.fetch(character, CHARACTER_VALUE).unwrap(),
            Value::small(i64::from(b'i'))
        );

        world.vm.pop().unwrap();
        world.vm.push(string).unwrap();
        world.vm.push(Value::small(1)).unwrap();
        world.vm.push(character).unwrap();
        string_at_put(&mut world.vm, 2).unwrap();
        assert_eq!(world.vm.memory.object(string).unwrap().bytes(), Some(&b"ii"[..]));
    }

    #[test]
    fn out_of_range_stores_fail_without_touching_the_stack() {
        let mut world = world_with_stack(&[]);
        let string = world.vm.make_string("ab").unwrap();
        for (index, value) in [(3, 1), (0, 1), (1, 256), (1, -1)] {
            world.vm.push(string).unwrap();
            world.vm.push(Value::small(index)).unwrap();
            world.vm.push(Value::small(value)).unwrap();
            let depth = world.vm.stack_depth();
            assert!(matches!(basic_at_put(&mut world.vm, 2), Err(PrimitiveError::Failed)));
            assert_eq!(world.vm.stack_depth(), depth);
            world.vm.pop_n(3).unwrap();
        }
        assert_eq!(world.vm.memory.object(string).unwrap().bytes(), Some(&b"ab"[..]));
    }

    #[test]
    fn size_skips_named_fields_and_rejects_fixed_objects() {
        let mut world = world_with_stack(&[]);
        let point = world.vm.make_point(Value::small(1), Value::small(2)).unwrap();
        world.vm.push(point).unwrap();
        assert!(size(&mut world.vm, 0).is_err());
        world.vm.pop().unwrap();
        let string = world.vm.make_string("abc").unwrap();
        world.vm.push(string).unwrap();
        size(&mut world.vm, 0).unwrap();
        assert_eq!(world.vm.top().unwrap(), Value::small(3));
    }

    #[test]
    fn replace_copies_a_range_between_arrays() {
        let mut world = world_with_stack(&[]);
        let class = world.vm.special(CLASS_ARRAY);
        let values: Vec<Value> = (1..=5).map(Value::small).collect();
        let source = world.instance(class, &values);
        let nil = world.vm.specials.nil;
        let dest = world.instance(class, &[nil; 4]);
        for value in [dest, Value::small(2), Value::small(3), source, Value::small(4)] {
            world.vm.push(value).unwrap();
        }
        replace(&mut world.vm, 4).unwrap();
        assert_eq!(world.vm.top().unwrap(), dest);
        assert_eq!(
            world.vm.memory.object(dest).unwrap().pointers,
            vec![nil, Value::small(4), Value::small(5), nil]
        );

        world.vm.pop().unwrap();
        for value in [dest, Value::small(3), Value::small(5), source, Value::small(1)] {
            world.vm.push(value).unwrap();
        }
        assert!(replace(&mut world.vm, 4).is_err());
    }
}
