use crate::{
    HeapObject, Interpreter, MethodHeader, PrimitiveError, PrimitiveResult, Value,
    VmError, primitives::OrFail,
};

/// Largest indexed size basicNew: hands out.
pub const MAX_INDEXABLE: u32 = 0x0100_0000;

impl Interpreter {
    /// Swap identities and re-point the interpreter's own registers. `false`
    /// when the two lists cannot be paired.
    pub(crate) fn become_objects(
        &mut self,
        from: &[Value],
        to: &[Value],
        two_way: bool,
    ) -> Result<bool, VmError> {
        let mapping = match self.memory.bulk_become(from, to, two_way) {
            Ok(mapping) => mapping,
            Err(err) => {
                log::trace!("become refused: {err:?}");
                return Ok(false);
            }
        };
        let remap = |value: &mut Value| {
            if let Some(&new) = mapping.get(value) {
                *value = new;
            }
        };
        remap(&mut self.active_context);
        remap(&mut self.home_context);
        remap(&mut self.method);
        remap(&mut self.receiver);
        remap(&mut self.specials.array);
        self.specials.refresh(&self.memory)?;
        self.verify_at = None;
        self.contexts.clear();
        self.flush_caches();
        Ok(true)
    }
}

fn new_instance_of(vm: &mut Interpreter, class: Value, indexable: usize) -> Result<Value, PrimitiveError> {
    let spec = vm.instance_spec(class).or_fail()?;
    if indexable > 0 && !(2..12).contains(&spec.format_code) {
        return Err(PrimitiveError::Failed);
    }
    Ok(vm.instantiate_class(class, indexable)?)
}

pub fn basic_new(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let class = vm.stack_object(0)?;
    let instance = new_instance_of(vm, class, 0)?;
    vm.answer(0, instance)
}

pub fn basic_new_sized(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let class = vm.stack_object(1)?;
    let size = vm.stack_pos32(0)?;
    if size > MAX_INDEXABLE {
        return Err(PrimitiveError::Failed);
    }
    let instance = new_instance_of(vm, class, size as usize)?;
    vm.answer(1, instance)
}

fn array_become(vm: &mut Interpreter, two_way: bool) -> PrimitiveResult {
    let receiver = vm.stack_object(1)?;
    let argument = vm.stack_object(0)?;
    let from = vm.memory.object(receiver)?.pointers.clone();
    let to = vm.memory.object(argument)?.pointers.clone();
    if !vm.become_objects(&from, &to, two_way)? {
        return Err(PrimitiveError::Failed);
    }
    let receiver = vm.stack_value(1)?;
    vm.answer(1, receiver)
}

pub fn become_forward(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    array_become(vm, false)
}

pub fn become_both(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    array_become(vm, true)
}

pub fn identity_hash(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let receiver = vm.stack_object(0)?;
    let hash = vm.memory.object(receiver)?.hash;
    vm.answer(0, Value::small(i64::from(hash)))
}

pub fn some_instance(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let class = vm.stack_object(0)?;
    let instance = vm.memory.first_instance(class).unwrap_or(vm.specials.nil);
    vm.answer(0, instance)
}

pub fn next_instance(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let previous = vm.stack_object(0)?;
    let instance = vm.memory.next_instance(previous).unwrap_or(vm.specials.nil);
    vm.answer(0, instance)
}

pub fn some_object(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let object = vm.memory.first_object().unwrap_or(vm.specials.nil);
    vm.answer(0, object)
}

/// Answers 0 after the last object.
pub fn next_object(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let previous = vm.stack_object(0)?;
    let object = vm.memory.next_object(previous).unwrap_or(Value::small(0));
    vm.answer(0, object)
}

/// CompiledMethod class newMethod: byteCount header: header
pub fn new_method(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let class = vm.stack_object(2)?;
    let byte_count = vm.stack_pos32(1)?;
    let header = vm.stack_integer(0)?;
    if vm.instance_spec(class).or_fail()?.format_code < 12 || byte_count > MAX_INDEXABLE {
        return Err(PrimitiveError::Failed);
    }
    let literal_count = MethodHeader(header).literal_count();
    let mut pointers = vec![vm.specials.nil; literal_count + 1];
    pointers[0] = Value::small(header);
    let method = vm.allocate(HeapObject::method(class, pointers, vec![0; byte_count as usize]))?;
    vm.answer(2, method)
}

pub fn identical(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let receiver = vm.stack_value(1)?;
    let argument = vm.stack_value(0)?;
    vm.answer_bool(1, receiver == argument)
}

pub fn class(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let class = vm.class_of(vm.top()?)?;
    vm.answer(0, class)
}

pub fn special_objects_array(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let array = vm.specials.array;
    vm.answer(0, array)
}

/// Shallow copy with a fresh identity hash.
pub fn clone(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let original = vm.stack_object(0)?;
    let copy = vm.memory.object(original)?.clone();
    let copy = vm.allocate(copy)?;
    vm.answer(0, copy)
}
