//! Numbered primitives.
//!
//! The numbering is the contract with compiled methods in existing images, so
//! it never changes. Every primitive checks its operands before touching the
//! stack: a [`PrimitiveError::Failed`] result must leave the stack exactly as
//! the send left it, because the bytecoded method runs next.
use crate::{
    Format, HeapObject, Interpreter, PrimitiveError, PrimitiveResult, Value, VmError,
    special::{CLASS_FLOAT, CLASS_LARGE_POSITIVE_INTEGER, CLASS_POINT, CLASS_STRING},
};

pub(crate) mod arithmetic;
mod control;
mod device;
mod file;
mod float;
mod object;
mod process;
pub(crate) mod storage;
mod system;

pub use storage::{AtCache, AtCacheEntry};

pub const POINT_X: usize = 0;
pub const POINT_Y: usize = 1;

pub type PrimitiveFn = fn(&mut Interpreter, usize) -> PrimitiveResult;

#[derive(Debug, Copy, Clone)]
pub struct PrimitiveDesc<'a> {
    pub index: usize,
    pub name: &'a str,
    pub ptr: PrimitiveFn,
}

impl<'a> PrimitiveDesc<'a> {
    pub const fn new(index: usize, name: &'a str, ptr: PrimitiveFn) -> Self {
        Self { index, name, ptr }
    }
}

pub const PRIMITIVES: &[PrimitiveDesc] = &[
    PrimitiveDesc::new(1, "SmallInteger +", arithmetic::add),
    PrimitiveDesc::new(2, "SmallInteger -", arithmetic::subtract),
    PrimitiveDesc::new(3, "SmallInteger <", arithmetic::less),
    PrimitiveDesc::new(4, "SmallInteger >", arithmetic::greater),
    PrimitiveDesc::new(5, "SmallInteger <=", arithmetic::less_or_equal),
    PrimitiveDesc::new(6, "SmallInteger >=", arithmetic::greater_or_equal),
    PrimitiveDesc::new(7, "SmallInteger =", arithmetic::equal),
    PrimitiveDesc::new(8, "SmallInteger ~=", arithmetic::not_equal),
    PrimitiveDesc::new(9, "SmallInteger *", arithmetic::multiply),
    PrimitiveDesc::new(10, "SmallInteger /", arithmetic::divide),
    PrimitiveDesc::new(11, "SmallInteger \\\\", arithmetic::modulo),
    PrimitiveDesc::new(12, "SmallInteger //", arithmetic::floor_divide),
    PrimitiveDesc::new(13, "SmallInteger quo:", arithmetic::quotient),
    PrimitiveDesc::new(14, "bitAnd:", arithmetic::bit_and),
    PrimitiveDesc::new(15, "bitOr:", arithmetic::bit_or),
    PrimitiveDesc::new(16, "bitXor:", arithmetic::bit_xor),
    PrimitiveDesc::new(17, "bitShift:", arithmetic::bit_shift),
    PrimitiveDesc::new(18, "@", arithmetic::make_point),
    PrimitiveDesc::new(40, "asFloat", float::as_float),
    PrimitiveDesc::new(41, "Float +", float::add),
    PrimitiveDesc::new(42, "Float -", float::subtract),
    PrimitiveDesc::new(43, "Float <", float::less),
    PrimitiveDesc::new(44, "Float >", float::greater),
    PrimitiveDesc::new(45, "Float <=", float::less_or_equal),
    PrimitiveDesc::new(46, "Float >=", float::greater_or_equal),
    PrimitiveDesc::new(47, "Float =", float::equal),
    PrimitiveDesc::new(48, "Float ~=", float::not_equal),
    PrimitiveDesc::new(49, "Float *", float::multiply),
    PrimitiveDesc::new(50, "Float /", float::divide),
    PrimitiveDesc::new(51, "truncated", float::truncated),
    PrimitiveDesc::new(58, "ln", float::ln),
    PrimitiveDesc::new(60, "basicAt:", storage::basic_at),
    PrimitiveDesc::new(61, "basicAt:put:", storage::basic_at_put),
    PrimitiveDesc::new(62, "size", storage::size),
    PrimitiveDesc::new(63, "String at:", storage::string_at),
    PrimitiveDesc::new(64, "String at:put:", storage::string_at_put),
    PrimitiveDesc::new(68, "objectAt:", storage::object_at),
    PrimitiveDesc::new(69, "objectAt:put:", storage::object_at_put),
    PrimitiveDesc::new(70, "basicNew", object::basic_new),
    PrimitiveDesc::new(71, "basicNew:", object::basic_new_sized),
    PrimitiveDesc::new(72, "elementsForwardIdentityTo:", object::become_forward),
    PrimitiveDesc::new(73, "instVarAt:", storage::object_at),
    PrimitiveDesc::new(74, "instVarAt:put:", storage::object_at_put),
    PrimitiveDesc::new(75, "identityHash", object::identity_hash),
    PrimitiveDesc::new(77, "someInstance", object::some_instance),
    PrimitiveDesc::new(78, "nextInstance", object::next_instance),
    PrimitiveDesc::new(79, "newMethod:header:", object::new_method),
    PrimitiveDesc::new(80, "blockCopy:", control::block_copy),
    PrimitiveDesc::new(81, "value", control::block_value),
    PrimitiveDesc::new(83, "perform:", control::perform),
    PrimitiveDesc::new(84, "perform:withArguments:", control::perform_with_arguments),
    PrimitiveDesc::new(85, "signal", process::signal),
    PrimitiveDesc::new(86, "wait", process::wait),
    PrimitiveDesc::new(87, "resume", process::resume),
    PrimitiveDesc::new(88, "suspend", process::suspend),
    PrimitiveDesc::new(89, "flushCache", control::flush_cache),
    PrimitiveDesc::new(90, "mousePoint", device::mouse_point),
    PrimitiveDesc::new(96, "copyBits", device::copy_bits),
    PrimitiveDesc::new(100, "perform:withArguments:inSuperclass:", control::perform_in_superclass),
    PrimitiveDesc::new(101, "beCursor", device::be_cursor),
    PrimitiveDesc::new(102, "beDisplay", device::be_display),
    PrimitiveDesc::new(105, "replaceFrom:to:with:startingAt:", storage::replace),
    PrimitiveDesc::new(106, "actualScreenSize", device::screen_size),
    PrimitiveDesc::new(107, "mouseButtons", device::mouse_buttons),
    PrimitiveDesc::new(108, "kbdNext", device::keyboard_next),
    PrimitiveDesc::new(109, "kbdPeek", device::keyboard_peek),
    PrimitiveDesc::new(110, "==", object::identical),
    PrimitiveDesc::new(111, "class", object::class),
    PrimitiveDesc::new(112, "bytesLeft", system::bytes_left),
    PrimitiveDesc::new(113, "quit", system::quit),
    PrimitiveDesc::new(116, "flushCacheByMethod", control::flush_method),
    PrimitiveDesc::new(119, "flushCacheBySelector", control::flush_selector),
    PrimitiveDesc::new(121, "imageName", system::image_name),
    PrimitiveDesc::new(122, "reverseDisplay", device::reverse_display),
    PrimitiveDesc::new(124, "lowSpaceSemaphore:", process::low_space_semaphore),
    PrimitiveDesc::new(125, "signalAtBytesLeft:", process::low_space_threshold),
    PrimitiveDesc::new(128, "elementsExchangeIdentityWith:", object::become_both),
    PrimitiveDesc::new(129, "specialObjectsArray", object::special_objects_array),
    PrimitiveDesc::new(130, "garbageCollect", system::full_gc),
    PrimitiveDesc::new(131, "incrementalGarbageCollect", system::incremental_gc),
    PrimitiveDesc::new(134, "interruptSemaphore:", process::interrupt_semaphore),
    PrimitiveDesc::new(135, "millisecondClock", system::millisecond_clock),
    PrimitiveDesc::new(136, "signal:atMilliseconds:", process::signal_at_milliseconds),
    PrimitiveDesc::new(137, "secondsClock", system::seconds_clock),
    PrimitiveDesc::new(138, "someObject", object::some_object),
    PrimitiveDesc::new(139, "nextObject", object::next_object),
    PrimitiveDesc::new(142, "vmPath", system::vm_path),
    PrimitiveDesc::new(148, "clone", object::clone),
    PrimitiveDesc::new(149, "getSystemAttribute:", system::get_attribute),
    PrimitiveDesc::new(150, "primAtEnd:", file::at_end),
    PrimitiveDesc::new(151, "primClose:", file::close),
    PrimitiveDesc::new(152, "primGetPosition:", file::position),
    PrimitiveDesc::new(153, "primOpen:writable:", file::open),
    PrimitiveDesc::new(154, "primRead:into:startingAt:count:", file::read),
    PrimitiveDesc::new(155, "primSetPosition:to:", file::set_position),
    PrimitiveDesc::new(156, "primDeleteFileNamed:", file::delete),
    PrimitiveDesc::new(157, "primSize:", file::size),
    PrimitiveDesc::new(158, "primWrite:from:startingAt:count:", file::write),
    PrimitiveDesc::new(159, "primRename:to:", file::rename),
    PrimitiveDesc::new(160, "primCreateDirectory:", file::create_directory),
    PrimitiveDesc::new(161, "primPathNameDelimiter", file::delimiter),
    PrimitiveDesc::new(162, "primLookupEntryIn:index:", file::lookup),
    PrimitiveDesc::new(230, "relinquishProcessorForMicroseconds:", system::relinquish),
];

/// Dispatch table indexed by primitive number.
pub fn table() -> Vec<Option<PrimitiveFn>> {
    let len = PRIMITIVES.iter().map(|p| p.index + 1).max().unwrap_or(0);
    let mut table = vec![None; len];
    for primitive in PRIMITIVES {
        table[primitive.index] = Some(primitive.ptr);
    }
    table
}

pub fn primitive_named(name: &str) -> Option<usize> {
    PRIMITIVES.iter().find(|p| p.name == name).map(|p| p.index)
}

pub(crate) trait OrFail<T> {
    fn or_fail(self) -> Result<T, PrimitiveError>;
}

impl<T> OrFail<T> for Option<T> {
    #[inline]
    fn or_fail(self) -> Result<T, PrimitiveError> {
        self.ok_or(PrimitiveError::Failed)
    }
}

impl<T, E> OrFail<T> for Result<T, E> {
    #[inline]
    fn or_fail(self) -> Result<T, PrimitiveError> {
        self.map_err(|_| PrimitiveError::Failed)
    }
}

/// `None` for a declined primitive; fatal errors pass through.
pub(crate) fn declined<T>(outcome: Result<T, PrimitiveError>) -> Result<Option<T>, VmError> {
    match outcome {
        Ok(value) => Ok(Some(value)),
        Err(PrimitiveError::Failed) => Ok(None),
        Err(PrimitiveError::Fatal(err)) => Err(err),
    }
}

impl Interpreter {
    pub(crate) fn stack_integer(&self, depth: usize) -> Result<i64, PrimitiveError> {
        self.stack_value(depth)?.as_small().or_fail()
    }

    /// A heap reference from the stack; fails on a SmallInteger.
    pub(crate) fn stack_object(&self, depth: usize) -> Result<Value, PrimitiveError> {
        let value = self.stack_value(depth)?;
        if value.is_small() {
            return Err(PrimitiveError::Failed);
        }
        Ok(value)
    }

    /// A non-negative SmallInteger or a LargePositiveInteger of at most 4 bytes.
    pub(crate) fn stack_pos32(&self, depth: usize) -> Result<u32, PrimitiveError> {
        self.pos32_value(self.stack_value(depth)?)
    }

    pub(crate) fn pos32_value(&self, value: Value) -> Result<u32, PrimitiveError> {
        if let Some(small) = value.as_small() {
            return u32::try_from(small).or_fail();
        }
        if !self.is_instance_of(value, CLASS_LARGE_POSITIVE_INTEGER) {
            return Err(PrimitiveError::Failed);
        }
        let bytes = self.memory.object(value)?.bytes().or_fail()?;
        if bytes.len() > 4 {
            return Err(PrimitiveError::Failed);
        }
        Ok(bytes
            .iter()
            .enumerate()
            .fold(0, |acc, (i, &b)| acc | (u32::from(b) << (8 * i))))
    }

    /// `value` as a SmallInteger when it fits, else a 4-byte LargePositiveInteger.
    pub(crate) fn pos32_for(&mut self, value: u32) -> Result<Value, VmError> {
        if let Some(small) = Value::try_small(i64::from(value)) {
            return Ok(small);
        }
        let class = self.special(CLASS_LARGE_POSITIVE_INTEGER);
        self.allocate(HeapObject::with_bytes(class, value.to_le_bytes().to_vec()))
    }

    pub(crate) fn float_value(&self, value: Value) -> Option<f64> {
        if !self.is_instance_of(value, CLASS_FLOAT) {
            return None;
        }
        let object = self.memory.get(value)?;
        match (object.float(), object.words()) {
            (Some(float), _) => Some(float),
            (None, Some(&[high, low])) => {
                Some(f64::from_bits((u64::from(high) << 32) | u64::from(low)))
            }
            _ => None,
        }
    }

    pub(crate) fn stack_float(&self, depth: usize) -> Result<f64, PrimitiveError> {
        self.float_value(self.stack_value(depth)?).or_fail()
    }

    pub(crate) fn make_float(&mut self, value: f64) -> Result<Value, VmError> {
        let class = self.special(CLASS_FLOAT);
        self.allocate(HeapObject::with_float(class, value))
    }

    pub(crate) fn make_point(&mut self, x: Value, y: Value) -> Result<Value, VmError> {
        let mark = self.memory.pin_count();
        self.memory.pin(x);
        self.memory.pin(y);
        let point = self.instantiate_class(self.special(CLASS_POINT), 0);
        self.memory.release_pins(mark);
        let point = point?;
        self.store(point, POINT_X, x)?;
        self.store(point, POINT_Y, y)?;
        Ok(point)
    }

    pub(crate) fn make_string(&mut self, text: &str) -> Result<Value, VmError> {
        let class = self.special(CLASS_STRING);
        self.allocate(HeapObject::with_bytes(class, text.as_bytes().to_vec()))
    }

    /// Bytes of a String or ByteArray argument.
    pub(crate) fn string_value(&self, value: Value) -> Result<String, PrimitiveError> {
        let object = self.memory.get(value).or_fail()?;
        if object.format != Format::Bytes {
            return Err(PrimitiveError::Failed);
        }
        let bytes = object.bytes().or_fail()?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Replace the receiver and `arg_count` arguments with `value`.
    #[inline]
    pub(crate) fn answer(&mut self, arg_count: usize, value: Value) -> PrimitiveResult {
        self.pop_then_push(arg_count + 1, value)?;
        Ok(())
    }

    #[inline]
    pub(crate) fn answer_bool(&mut self, arg_count: usize, value: bool) -> PrimitiveResult {
        let value = self.specials.boolean(value);
        self.answer(arg_count, value)
    }
}
