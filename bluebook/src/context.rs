//! Context layout, the stored pc/sp encoding and the recycling pools.
use crate::{Format, HeapObject, ObjectMemory, Value, VmError};

pub const SENDER: usize = 0;
pub const INSTRUCTION_POINTER: usize = 1;
pub const STACK_POINTER: usize = 2;
pub const METHOD: usize = 3;
pub const RECEIVER: usize = 5;
pub const TEMP_FRAME_START: usize = 6;

// block contexts
pub const CALLER: usize = 0;
pub const BLOCK_ARGUMENT_COUNT: usize = 3;
pub const INITIAL_IP: usize = 4;
pub const HOME: usize = 5;

pub const SMALL_FRAME: usize = 17;
pub const LARGE_FRAME: usize = 57;
pub const SMALL_CONTEXT_SIZE: usize = TEMP_FRAME_START + SMALL_FRAME;
pub const LARGE_CONTEXT_SIZE: usize = TEMP_FRAME_START + LARGE_FRAME;

// The stored pc counts bytes from the start of the method object, 1-based,
// with the header and literal words in front of the bytecodes.
#[inline]
pub fn encode_pc(pc: usize, literal_count: usize) -> i64 {
    (pc + (literal_count + 1) * 4 + 1) as i64
}

#[inline]
pub fn decode_pc(stored: i64, literal_count: usize) -> Option<usize> {
    usize::try_from(stored - ((literal_count as i64 + 1) * 4 + 1)).ok()
}

// The stored sp counts stack entries above the fixed fields.
#[inline]
pub fn encode_sp(sp: usize) -> i64 {
    sp as i64 - (RECEIVER as i64)
}

#[inline]
pub fn decode_sp(stored: i64) -> Option<usize> {
    usize::try_from(stored + RECEIVER as i64).ok()
}

/// Free lists of method contexts, one per frame size, threaded through the
/// sender slot.
#[derive(Debug, Default)]
pub struct ContextPool {
    small: Option<Value>,
    large: Option<Value>,
    pub allocated: u64,
    pub recycled: u64,
}

impl ContextPool {
    pub fn clear(&mut self) {
        self.small = None;
        self.large = None;
    }

    /// Free-list heads; they are reclamation roots until cleared.
    pub fn roots(&self) -> impl Iterator<Item = Value> {
        self.small.into_iter().chain(self.large)
    }

    /// Pop a pooled context of the requested size and wipe every slot to nil.
    pub fn take(
        &mut self,
        memory: &mut ObjectMemory,
        large: bool,
        nil: Value,
    ) -> Result<Option<Value>, VmError> {
        let head = if large { &mut self.large } else { &mut self.small };
        let Some(context) = *head else {
            return Ok(None);
        };
        let object = memory.object_mut(context)?;
        let next = object.pointers.get(SENDER).copied().unwrap_or(nil);
        *head = (next != nil).then_some(next);
        object.pointers.fill(nil);
        Ok(Some(context))
    }

    /// Pool `context` if it is a method context of one of the two frame sizes.
    pub fn recycle(
        &mut self,
        memory: &mut ObjectMemory,
        context: Value,
        method_context_class: Value,
        nil: Value,
    ) -> bool {
        let Some(object) = memory.get_mut(context) else {
            return false;
        };
        if object.class != method_context_class {
            return false;
        }
        let head = match object.pointers.len() {
            SMALL_CONTEXT_SIZE => &mut self.small,
            LARGE_CONTEXT_SIZE => &mut self.large,
            _ => return false,
        };
        object.pointers[SENDER] = head.unwrap_or(nil);
        *head = Some(context);
        self.recycled += 1;
        true
    }

    /// A pooled context if one is free, else a fresh nil-filled one.
    pub fn allocate(
        &mut self,
        memory: &mut ObjectMemory,
        large: bool,
        class: Value,
        nil: Value,
    ) -> Result<Value, VmError> {
        if let Some(context) = self.take(memory, large, nil)? {
            return Ok(context);
        }
        let size = if large { LARGE_CONTEXT_SIZE } else { SMALL_CONTEXT_SIZE };
        let context = memory.register(HeapObject::with_pointers(
            class,
            Format::Indexable,
            vec![nil; size],
        ))?;
        self.allocated += 1;
        Ok(context)
    }
}
