//! Blocks, perform and method cache maintenance.
use crate::{
    HeapObject, Interpreter, MethodHeader, PrimitiveError, PrimitiveResult, Value,
    context::{
        BLOCK_ARGUMENT_COUNT, CALLER, HOME, INITIAL_IP, INSTRUCTION_POINTER, METHOD,
        STACK_POINTER, TEMP_FRAME_START,
    },
    lookup::CLASS_SUPERCLASS,
    primitives::OrFail,
    special::CLASS_BLOCK_CONTEXT,
};

impl Interpreter {
    /// A block context for `thisContext blockCopy: argCount`. Its body starts
    /// after the jump that follows the send.
    pub(crate) fn block_copy(&mut self) -> Result<Value, PrimitiveError> {
        let context = self.stack_object(1)?;
        let arg_count = self.stack_value(0)?;
        if !arg_count.is_small() || !self.is_context(context) {
            return Err(PrimitiveError::Failed);
        }
        let home = if self.fetch(context, METHOD)?.is_small() {
            self.fetch(context, HOME)?
        } else {
            context
        };
        let (format, size) = {
            let object = self.memory.object(home)?;
            (object.format, object.pointers.len())
        };
        let nil = self.specials.nil;
        let class = self.special(CLASS_BLOCK_CONTEXT);
        let block = self.allocate(HeapObject::with_pointers(class, format, vec![nil; size]))?;
        let initial_ip = Value::small(self.encode_pc(self.pc + 2));
        {
            let pointers = &mut self.memory.object_mut(block)?.pointers;
            pointers[CALLER] = nil;
            pointers[INSTRUCTION_POINTER] = initial_ip;
            pointers[STACK_POINTER] = Value::small(0);
            pointers[BLOCK_ARGUMENT_COUNT] = arg_count;
            pointers[INITIAL_IP] = initial_ip;
            pointers[HOME] = home;
        }
        // the home context is now referenced from the heap
        self.reclaimable_contexts = 0;
        Ok(block)
    }

    /// Enter the block under `arg_count` arguments, copying them into its
    /// frame. Fails for a wrong argument count or a block already running.
    pub(crate) fn block_value(&mut self, arg_count: usize) -> Result<(), PrimitiveError> {
        let block = self.stack_value(arg_count)?;
        if !self.is_instance_of(block, CLASS_BLOCK_CONTEXT) {
            return Err(PrimitiveError::Failed);
        }
        let expected = self.fetch(block, BLOCK_ARGUMENT_COUNT)?.as_small().or_fail()?;
        if usize::try_from(expected).ok() != Some(arg_count)
            || self.fetch(block, CALLER)? != self.specials.nil
            || self.memory.object(block)?.pointers.len() < TEMP_FRAME_START + arg_count
        {
            return Err(PrimitiveError::Failed);
        }
        let arguments = (0..arg_count)
            .rev()
            .map(|depth| self.stack_value(depth))
            .collect::<Result<Vec<_>, _>>()?;
        let initial_ip = self.fetch(block, INITIAL_IP)?;
        let caller = self.active_context;
        {
            let pointers = &mut self.memory.object_mut(block)?.pointers;
            pointers[TEMP_FRAME_START..TEMP_FRAME_START + arg_count].copy_from_slice(&arguments);
            pointers[INSTRUCTION_POINTER] = initial_ip;
            pointers[STACK_POINTER] = Value::small(arg_count as i64);
            pointers[CALLER] = caller;
        }
        self.pop_n(arg_count + 1)?;
        self.new_active_context(block)?;
        Ok(())
    }

    /// Fails when `selector` resolves to a method of another arity. An
    /// unresolved selector passes so the send can raise doesNotUnderstand:.
    fn check_arity(&mut self, selector: Value, class: Value, arg_count: usize) -> PrimitiveResult {
        if let Some(entry) = self.lookup(selector, class)? {
            if MethodHeader::of(&self.memory, entry.method)?.arg_count() != arg_count {
                return Err(PrimitiveError::Failed);
            }
        }
        Ok(())
    }

    /// Shared tail of perform:withArguments: and its superclass variant. The
    /// receiver, selector and argument array sit `extra` slots below the top.
    fn perform_with_arguments_from(&mut self, lookup_class: Value, extra: usize) -> PrimitiveResult {
        let selector = self.stack_object(extra + 1)?;
        let arguments = self.stack_object(extra)?;
        let arguments = {
            let object = self.memory.object(arguments)?;
            if !object.format.is_pointers() {
                return Err(PrimitiveError::Failed);
            }
            object.pointers.clone()
        };
        let room = self.memory.object(self.active_context)?.pointers.len();
        if self.sp - extra - 2 + arguments.len() >= room {
            return Err(PrimitiveError::Failed);
        }
        self.check_arity(selector, lookup_class, arguments.len())?;
        self.pop_n(extra + 2)?;
        for argument in &arguments {
            self.push(*argument)?;
        }
        self.send_to_class(selector, arguments.len(), lookup_class)?;
        Ok(())
    }
}

pub fn block_copy(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let block = vm.block_copy()?;
    vm.answer(1, block)
}

pub fn block_value(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    vm.block_value(arg_count)
}

/// perform: selector with: ... with the arguments already on the stack.
pub fn perform(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    let Some(true_arg_count) = arg_count.checked_sub(1) else {
        return Err(PrimitiveError::Failed);
    };
    let selector = vm.stack_object(true_arg_count)?;
    let receiver = vm.stack_value(arg_count)?;
    let class = vm.class_of(receiver)?;
    vm.check_arity(selector, class, true_arg_count)?;
    let arguments = (0..true_arg_count)
        .rev()
        .map(|depth| vm.stack_value(depth))
        .collect::<Result<Vec<_>, _>>()?;
    vm.pop_n(arg_count)?;
    for argument in arguments {
        vm.push(argument)?;
    }
    vm.send_to_class(selector, true_arg_count, class)?;
    Ok(())
}

pub fn perform_with_arguments(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let class = vm.class_of(vm.stack_value(2)?)?;
    vm.perform_with_arguments_from(class, 0)
}

/// The lookup starts at the class on top, which must be in the receiver's
/// superclass chain.
pub fn perform_in_superclass(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let lookup_class = vm.stack_object(0)?;
    let nil = vm.specials.nil;
    let mut class = vm.class_of(vm.stack_value(3)?)?;
    while class != lookup_class {
        if class == nil {
            return Err(PrimitiveError::Failed);
        }
        class = vm.fetch(class, CLASS_SUPERCLASS)?;
    }
    vm.perform_with_arguments_from(lookup_class, 1)
}

pub fn flush_cache(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    vm.flush_caches();
    Ok(())
}

pub fn flush_method(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let method = vm.top()?;
    vm.method_cache.flush_method(method);
    Ok(())
}

pub fn flush_selector(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let selector = vm.top()?;
    vm.method_cache.flush_selector(selector);
    Ok(())
}
