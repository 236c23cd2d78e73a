//! Indices into the special objects array and the registers cached from it.
use crate::{ObjectMemory, Value, VmError};

pub const NIL_OBJECT: usize = 0;
pub const FALSE_OBJECT: usize = 1;
pub const TRUE_OBJECT: usize = 2;
pub const SCHEDULER_ASSOCIATION: usize = 3;
pub const CLASS_SMALL_INTEGER: usize = 5;
pub const CLASS_STRING: usize = 6;
pub const CLASS_ARRAY: usize = 7;
pub const CLASS_FLOAT: usize = 9;
pub const CLASS_METHOD_CONTEXT: usize = 10;
pub const CLASS_BLOCK_CONTEXT: usize = 11;
pub const CLASS_POINT: usize = 12;
pub const CLASS_LARGE_POSITIVE_INTEGER: usize = 13;
pub const THE_DISPLAY: usize = 14;
pub const CLASS_MESSAGE: usize = 15;
pub const CLASS_COMPILED_METHOD: usize = 16;
pub const THE_LOW_SPACE_SEMAPHORE: usize = 17;
pub const CLASS_SEMAPHORE: usize = 18;
pub const CLASS_CHARACTER: usize = 19;
pub const SELECTOR_DOES_NOT_UNDERSTAND: usize = 20;
pub const SPECIAL_SELECTORS: usize = 23;
pub const CHARACTER_TABLE: usize = 24;
pub const SELECTOR_MUST_BE_BOOLEAN: usize = 25;
pub const CLASS_BYTE_ARRAY: usize = 26;
pub const CLASS_PROCESS: usize = 27;
pub const COMPACT_CLASSES: usize = 28;
pub const THE_TIMER_SEMAPHORE: usize = 29;
pub const THE_INTERRUPT_SEMAPHORE: usize = 30;

/// Registers cached from the special objects array. The array itself stays
/// authoritative; [`SpecialObjects::refresh`] re-reads it after a become.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SpecialObjects {
    pub array: Value,
    pub nil: Value,
    pub false_object: Value,
    pub true_object: Value,
}

impl SpecialObjects {
    pub fn load(memory: &ObjectMemory, array: Value) -> Result<Self, VmError> {
        let fetch = |index: usize| -> Result<Value, VmError> {
            memory
                .object(array)?
                .pointers
                .get(index)
                .copied()
                .ok_or(VmError::Malformed {
                    what: "special objects array",
                    value: array,
                })
        };
        Ok(Self {
            array,
            nil: fetch(NIL_OBJECT)?,
            false_object: fetch(FALSE_OBJECT)?,
            true_object: fetch(TRUE_OBJECT)?,
        })
    }

    pub fn refresh(&mut self, memory: &ObjectMemory) -> Result<(), VmError> {
        *self = Self::load(memory, self.array)?;
        Ok(())
    }

    /// Entry `index`, or nil when the array is shorter.
    pub fn get(&self, memory: &ObjectMemory, index: usize) -> Value {
        memory
            .get(self.array)
            .and_then(|array| array.pointers.get(index).copied())
            .unwrap_or(self.nil)
    }

    #[inline(always)]
    pub fn boolean(&self, value: bool) -> Value {
        if value { self.true_object } else { self.false_object }
    }
}
