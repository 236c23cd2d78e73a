use std::{
    path::PathBuf,
    time::{Duration, Instant},
};

use crate::{
    CacheEntry, ContextPool, Devices, Format, HeapObject, InstanceSpec, MethodCache,
    MethodHeader, ObjectMemory, PrimitiveError, PrimitiveFn, ReclaimScope, SMALL_INT_MAX,
    SpecialObjects, Value, VmError,
    context::{
        self, HOME, INITIAL_IP, INSTRUCTION_POINTER, METHOD, RECEIVER, SENDER, STACK_POINTER,
        TEMP_FRAME_START,
    },
    lookup::{
        self, ASSOCIATION_VALUE, CLASS_FORMAT, CLASS_SUPERCLASS, MESSAGE_ARGUMENTS,
        MESSAGE_LOOKUP_CLASS, MESSAGE_SELECTOR,
    },
    primitives::{self, AtCache},
    special::{
        CLASS_ARRAY, CLASS_MESSAGE, CLASS_METHOD_CONTEXT, CLASS_SMALL_INTEGER,
        SCHEDULER_ASSOCIATION, SELECTOR_DOES_NOT_UNDERSTAND, THE_INTERRUPT_SEMAPHORE,
        THE_LOW_SPACE_SEMAPHORE, THE_TIMER_SEMAPHORE,
    },
};

pub const MILLISECOND_CLOCK_MASK: i64 = SMALL_INT_MAX >> 1;

#[derive(Debug, Clone)]
pub struct InterpreterSettings {
    /// target gap between two clock samples
    pub interrupt_check_interval_ms: i64,
    /// floor of the adaptive countdown between clock samples
    pub min_interrupt_counter: i64,
    /// wait of the yield primitive when it is given no argument
    pub yield_timeout: Duration,
}

impl Default for InterpreterSettings {
    fn default() -> Self {
        Self {
            interrupt_check_interval_ms: 3,
            min_interrupt_counter: 1000,
            yield_timeout: Duration::from_millis(100),
        }
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Statistics {
    pub bytecodes: u64,
    pub sends: u64,
    pub method_cache_hits: u64,
    pub method_cache_misses: u64,
    pub does_not_understand: u64,
    pub primitive_failures: u64,
    pub contexts_allocated: u64,
    pub contexts_recycled: u64,
    pub process_switches: u64,
    pub reclamations: usize,
    pub objects_reclaimed: usize,
    pub live_objects: usize,
    pub table_capacity: usize,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StopReason {
    Quit,
    StepLimit,
}

#[derive(Debug, Default)]
pub(crate) struct InterruptState {
    pub counter: i64,
    pub feedback_reset: i64,
    pub last_tick: i64,
    pub next_wakeup_tick: i64,
    pub pending: bool,
    pub signal_low_space: bool,
}

/// The bytecode interpreter: object memory, cached context registers and
/// every VM-wide cache, owned in one place and passed by `&mut`.
#[derive(Debug)]
pub struct Interpreter {
    pub memory: ObjectMemory,
    pub specials: SpecialObjects,
    pub devices: Devices,

    pub(crate) active_context: Value,
    pub(crate) home_context: Value,
    pub(crate) method: Value,
    pub(crate) receiver: Value,
    /// index of the next bytecode to fetch
    pub(crate) pc: usize,
    /// index of the top stack slot in the active context
    pub(crate) sp: usize,
    literal_count: usize,
    pub(crate) reclaimable_contexts: usize,

    pub(crate) method_cache: MethodCache,
    pub(crate) at_cache: AtCache,
    pub(crate) contexts: ContextPool,
    /// selector and lookup class of the last send that found a primitive
    pub(crate) verify_at: Option<(Value, Value)>,
    primitives: Vec<Option<PrimitiveFn>>,

    pub(crate) interrupts: InterruptState,
    pub(crate) low_space_threshold: i64,
    started: Instant,
    pub(crate) settings: InterpreterSettings,
    pub(crate) stats: Statistics,
    pub(crate) quit: bool,
    pub image_path: Option<PathBuf>,
}

impl Interpreter {
    pub fn new(
        memory: ObjectMemory,
        specials: SpecialObjects,
        settings: InterpreterSettings,
        devices: Devices,
    ) -> Self {
        let nil = specials.nil;
        Self {
            memory,
            specials,
            devices,
            active_context: nil,
            home_context: nil,
            method: nil,
            receiver: nil,
            pc: 0,
            sp: 0,
            literal_count: 0,
            reclaimable_contexts: 0,
            method_cache: MethodCache::new(),
            at_cache: AtCache::new(),
            contexts: ContextPool::default(),
            verify_at: None,
            primitives: primitives::table(),
            interrupts: InterruptState {
                feedback_reset: settings.min_interrupt_counter,
                ..Default::default()
            },
            low_space_threshold: 0,
            started: Instant::now(),
            settings,
            stats: Statistics::default(),
            quit: false,
            image_path: None,
        }
    }

    /// Resume the context the image's active process was saved in.
    pub fn load_initial_context(&mut self) -> Result<(), VmError> {
        let process = self.active_process()?;
        let context = self.fetch(process, crate::scheduler::PROCESS_SUSPENDED_CONTEXT)?;
        self.active_context = context;
        self.fetch_context_registers(context)?;
        self.reclaimable_contexts = 0;
        log::debug!("starting in context {context:?}");
        Ok(())
    }

    pub fn statistics(&self) -> Statistics {
        let memory = self.memory.stats();
        Statistics {
            method_cache_hits: self.method_cache.hits,
            method_cache_misses: self.method_cache.misses,
            contexts_allocated: self.contexts.allocated,
            contexts_recycled: self.contexts.recycled,
            reclamations: memory.reclamations,
            objects_reclaimed: memory.reclaimed,
            live_objects: self.memory.len(),
            table_capacity: self.memory.capacity(),
            ..self.stats
        }
    }

    pub fn is_quitting(&self) -> bool {
        self.quit
    }

    /// Execute one bytecode.
    pub fn step(&mut self) -> Result<(), VmError> {
        let bytecode = self.next_byte()?;
        self.stats.bytecodes += 1;
        self.dispatch(bytecode)
    }

    /// Run until the image quits, `max_steps` bytecodes have run, or a fatal
    /// error ends interpretation.
    pub fn run(&mut self, max_steps: Option<u64>) -> Result<StopReason, VmError> {
        let mut steps = 0;
        while !self.quit {
            if max_steps.is_some_and(|max| steps >= max) {
                return Ok(StopReason::StepLimit);
            }
            self.step()?;
            steps += 1;
        }
        Ok(StopReason::Quit)
    }

    // ── Object access ─────────────────────────────────────────────

    #[inline]
    pub(crate) fn fetch(&self, object: Value, index: usize) -> Result<Value, VmError> {
        self.memory
            .object(object)?
            .pointers
            .get(index)
            .copied()
            .ok_or(VmError::Malformed {
                what: "pointer index",
                value: object,
            })
    }

    #[inline]
    pub(crate) fn store(&mut self, object: Value, index: usize, value: Value) -> Result<(), VmError> {
        let slot = self
            .memory
            .object_mut(object)?
            .pointers
            .get_mut(index)
            .ok_or(VmError::Malformed {
                what: "pointer index",
                value: object,
            })?;
        *slot = value;
        Ok(())
    }

    pub(crate) fn fetch_int(&self, object: Value, index: usize) -> Result<i64, VmError> {
        let value = self.fetch(object, index)?;
        value.as_small().ok_or(VmError::Malformed {
            what: "integer field",
            value,
        })
    }

    pub(crate) fn special(&self, index: usize) -> Value {
        self.specials.get(&self.memory, index)
    }

    pub fn class_of(&self, value: Value) -> Result<Value, VmError> {
        if value.is_small() {
            return Ok(self.special(CLASS_SMALL_INTEGER));
        }
        Ok(self.memory.object(value)?.class)
    }

    pub(crate) fn is_instance_of(&self, value: Value, special_class: usize) -> bool {
        value.is_reference()
            && self
                .memory
                .get(value)
                .is_some_and(|object| object.class == self.special(special_class))
    }

    pub(crate) fn instance_spec(&self, class: Value) -> Result<InstanceSpec, VmError> {
        Ok(InstanceSpec::decode(self.fetch_int(class, CLASS_FORMAT)?))
    }

    // ── Allocation ────────────────────────────────────────────────

    /// Register `object`, reclaiming or growing the table first when it is full.
    pub(crate) fn allocate(&mut self, object: HeapObject) -> Result<Value, VmError> {
        if self.memory.is_full() {
            self.make_room()?;
        }
        self.memory.register(object)
    }

    /// New instance of `class` with `indexable` indexed slots, shaped by the
    /// class' format.
    pub(crate) fn instantiate_class(&mut self, class: Value, indexable: usize) -> Result<Value, VmError> {
        let spec = self.instance_spec(class)?;
        let nil = self.specials.nil;
        let object = match spec.format_code {
            6 => HeapObject::with_words(class, vec![0; indexable]),
            code if code < 8 => {
                let format = match code {
                    0 if indexable == 0 => Format::Empty,
                    0 | 1 => Format::Fixed,
                    2 => Format::Indexable,
                    4 => Format::Weak,
                    _ => Format::FixedIndexable,
                };
                HeapObject::with_pointers(class, format, vec![nil; spec.inst_size + indexable])
            }
            _ => HeapObject::with_bytes(class, vec![0; indexable]),
        };
        self.allocate(object)
    }

    pub(crate) fn allocate_context(&mut self, large: bool) -> Result<Value, VmError> {
        if self.memory.is_full() {
            self.make_room()?;
        }
        let class = self.special(CLASS_METHOD_CONTEXT);
        let nil = self.specials.nil;
        self.contexts.allocate(&mut self.memory, large, class, nil)
    }

    fn make_room(&mut self) -> Result<(), VmError> {
        let wanted = self.memory.settings().table_grow;
        let mut freed = 0;
        for attempt in 1..=5 {
            if attempt >= 3 {
                self.flush_caches();
                self.contexts.clear();
            }
            freed += self.reclaim(ReclaimScope::Young);
            if freed >= wanted {
                return Ok(());
            }
        }
        if self.memory.grow() {
            return Ok(());
        }
        freed += self.reclaim(ReclaimScope::Full);
        if freed > 0 && !self.memory.is_full() {
            return Ok(());
        }
        Err(VmError::ObjectTableFull(self.memory.len()))
    }

    /// Values the interpreter holds outside the heap.
    fn roots(&self) -> Vec<Value> {
        let mut roots = vec![
            self.specials.array,
            self.active_context,
            self.home_context,
            self.method,
            self.receiver,
        ];
        roots.extend(self.contexts.roots());
        if let Some((selector, class)) = self.verify_at {
            roots.extend([selector, class]);
        }
        roots
    }

    /// Reclaim unreachable objects and invalidate the caches keyed by them.
    pub fn reclaim(&mut self, scope: ReclaimScope) -> usize {
        let roots = self.roots();
        let freed = self.memory.reclaim(&roots, scope);
        self.flush_caches();
        if self.memory.space_left() < self.low_space_threshold {
            self.interrupts.signal_low_space = true;
        }
        freed
    }

    pub(crate) fn flush_caches(&mut self) {
        self.method_cache.clear();
        self.at_cache.clear();
    }

    // ── Context registers ─────────────────────────────────────────

    pub(crate) fn fetch_context_registers(&mut self, context: Value) -> Result<(), VmError> {
        let slot = self.fetch(context, METHOD)?;
        // a block context keeps its argument count where a method context
        // keeps its method
        let (home, method) = if slot.is_small() {
            let home = self.fetch(context, HOME)?;
            (home, self.fetch(home, METHOD)?)
        } else {
            (context, slot)
        };
        self.home_context = home;
        self.receiver = self.fetch(home, RECEIVER)?;
        self.method = method;
        self.literal_count = MethodHeader::of(&self.memory, method)?.literal_count();
        let stored_pc = self.fetch_int(context, INSTRUCTION_POINTER)?;
        self.pc = context::decode_pc(stored_pc, self.literal_count).ok_or(VmError::Malformed {
            what: "instruction pointer",
            value: context,
        })?;
        let stored_sp = self.fetch_int(context, STACK_POINTER)?;
        self.sp = context::decode_sp(stored_sp).ok_or(VmError::Malformed {
            what: "stack pointer",
            value: context,
        })?;
        Ok(())
    }

    pub(crate) fn store_context_registers(&mut self) -> Result<(), VmError> {
        let pc = Value::small(context::encode_pc(self.pc, self.literal_count));
        let sp = Value::small(context::encode_sp(self.sp));
        self.store(self.active_context, INSTRUCTION_POINTER, pc)?;
        self.store(self.active_context, STACK_POINTER, sp)
    }

    pub(crate) fn new_active_context(&mut self, context: Value) -> Result<(), VmError> {
        self.store_context_registers()?;
        self.active_context = context;
        self.fetch_context_registers(context)
    }

    pub(crate) fn encode_pc(&self, pc: usize) -> i64 {
        context::encode_pc(pc, self.literal_count)
    }

    // ── Stack ─────────────────────────────────────────────────────

    #[inline]
    pub(crate) fn push(&mut self, value: Value) -> Result<(), VmError> {
        self.store(self.active_context, self.sp + 1, value)?;
        self.sp += 1;
        Ok(())
    }

    #[inline]
    pub(crate) fn pop(&mut self) -> Result<Value, VmError> {
        let value = self.top()?;
        self.sp -= 1;
        Ok(value)
    }

    #[inline]
    pub(crate) fn top(&self) -> Result<Value, VmError> {
        self.stack_value(0)
    }

    pub(crate) fn stack_value(&self, depth: usize) -> Result<Value, VmError> {
        let index = self.sp.checked_sub(depth).ok_or(VmError::Malformed {
            what: "stack depth",
            value: self.active_context,
        })?;
        self.fetch(self.active_context, index)
    }

    pub(crate) fn pop_n(&mut self, count: usize) -> Result<(), VmError> {
        self.sp = self.sp.checked_sub(count).ok_or(VmError::Malformed {
            what: "stack depth",
            value: self.active_context,
        })?;
        Ok(())
    }

    /// Drop `count` entries and push `value` in their place.
    pub(crate) fn pop_then_push(&mut self, count: usize, value: Value) -> Result<(), VmError> {
        self.pop_n(count)?;
        self.push(value)
    }

    pub fn stack_depth(&self) -> usize {
        self.sp
    }

    // ── Method access ─────────────────────────────────────────────

    pub(crate) fn next_byte(&mut self) -> Result<u8, VmError> {
        let byte = self
            .memory
            .object(self.method)?
            .bytes()
            .and_then(|bytes| bytes.get(self.pc))
            .copied()
            .ok_or(VmError::Malformed {
                what: "instruction stream",
                value: self.method,
            })?;
        self.pc += 1;
        Ok(byte)
    }

    /// Literal `index` of the active method (0 is the first literal).
    pub(crate) fn literal(&self, index: usize) -> Result<Value, VmError> {
        self.fetch(self.method, index + 1)
    }

    // ── Sends ─────────────────────────────────────────────────────

    pub(crate) fn send(&mut self, selector: Value, arg_count: usize, to_super: bool) -> Result<(), VmError> {
        let lookup_class = if to_super {
            let class = self.method_class_for_super()?;
            self.fetch(class, CLASS_SUPERCLASS)?
        } else {
            self.class_of(self.stack_value(arg_count)?)?
        };
        self.send_to_class(selector, arg_count, lookup_class)
    }

    /// Send with the lookup starting at `lookup_class`.
    pub(crate) fn send_to_class(
        &mut self,
        selector: Value,
        arg_count: usize,
        lookup_class: Value,
    ) -> Result<(), VmError> {
        self.stats.sends += 1;
        let receiver = self.stack_value(arg_count)?;
        let prior_sp = self.sp;
        let entry = self.find_selector_in_class(selector, arg_count, lookup_class)?;
        if entry.primitive > 0 {
            self.verify_at = Some((selector, lookup_class));
        }
        let arg_count = arg_count + self.sp - prior_sp;
        self.execute_new_method(receiver, entry.method, arg_count, entry.primitive)
    }

    /// The class a super send in the active method starts above: the value of
    /// the association in its last literal.
    fn method_class_for_super(&self) -> Result<Value, VmError> {
        let association = self.fetch(self.method, self.literal_count)?;
        self.fetch(association, ASSOCIATION_VALUE)
    }

    pub(crate) fn lookup(&mut self, selector: Value, class: Value) -> Result<Option<CacheEntry>, VmError> {
        lookup::cached_lookup(
            &self.memory,
            &mut self.method_cache,
            class,
            selector,
            self.specials.nil,
        )
    }

    /// Cache-backed lookup; on a miss the arguments on the stack are folded
    /// into a Message and doesNotUnderstand: is looked up instead.
    pub(crate) fn find_selector_in_class(
        &mut self,
        selector: Value,
        arg_count: usize,
        class: Value,
    ) -> Result<CacheEntry, VmError> {
        if let Some(entry) = self.lookup(selector, class)? {
            return Ok(entry);
        }
        let does_not_understand = self.special(SELECTOR_DOES_NOT_UNDERSTAND);
        if selector == does_not_understand {
            return Err(VmError::RecursiveDoesNotUnderstand { selector });
        }
        self.stats.does_not_understand += 1;
        log::trace!("{selector:?} not understood by instances of {class:?}");
        let message = self.create_actual_message(selector, arg_count, class)?;
        self.pop_then_push(arg_count, message)?;
        self.find_selector_in_class(does_not_understand, 1, class)
    }

    fn create_actual_message(
        &mut self,
        selector: Value,
        arg_count: usize,
        class: Value,
    ) -> Result<Value, VmError> {
        let arguments = (0..arg_count)
            .rev()
            .map(|depth| self.stack_value(depth))
            .collect::<Result<Vec<_>, _>>()?;
        let array_class = self.special(CLASS_ARRAY);
        let array = self.allocate(HeapObject::with_pointers(
            array_class,
            Format::Indexable,
            arguments,
        ))?;
        let mark = self.memory.pin_count();
        self.memory.pin(array);
        let message = self.instantiate_class(self.special(CLASS_MESSAGE), 0);
        self.memory.release_pins(mark);
        let message = message?;
        self.store(message, MESSAGE_SELECTOR, selector)?;
        self.store(message, MESSAGE_ARGUMENTS, array)?;
        if self.memory.object(message)?.pointers.len() > MESSAGE_LOOKUP_CLASS {
            self.store(message, MESSAGE_LOOKUP_CLASS, class)?;
        }
        Ok(message)
    }

    /// Offer the primitive first; otherwise build a context and switch to it.
    pub(crate) fn execute_new_method(
        &mut self,
        receiver: Value,
        method: Value,
        arg_count: usize,
        primitive: usize,
    ) -> Result<(), VmError> {
        if primitive > 0 && self.try_primitive(primitive, arg_count)? {
            return Ok(());
        }
        let header = MethodHeader::of(&self.memory, method)?;
        let mark = self.memory.pin_count();
        self.memory.pin(method);
        let context = self.allocate_context(header.needs_large_frame());
        self.memory.release_pins(mark);
        let context = context?;

        let nil = self.specials.nil;
        let first = self.sp.checked_sub(arg_count).ok_or(VmError::Malformed {
            what: "stack depth",
            value: self.active_context,
        })?;
        let frame = (first..=self.sp)
            .map(|index| self.fetch(self.active_context, index))
            .collect::<Result<Vec<_>, _>>()?;
        let temp_count = header.temp_count();
        let sender = self.active_context;
        {
            let pointers = &mut self.memory.object_mut(context)?.pointers;
            let frame_end = RECEIVER + frame.len();
            let temps_end = TEMP_FRAME_START + temp_count;
            if frame_end.max(temps_end) > pointers.len() {
                return Err(VmError::Malformed {
                    what: "method frame",
                    value: method,
                });
            }
            pointers[METHOD] = method;
            pointers[INITIAL_IP] = nil;
            pointers[SENDER] = sender;
            pointers[RECEIVER..frame_end].copy_from_slice(&frame);
            if temps_end > frame_end {
                pointers[frame_end..temps_end].fill(nil);
            }
        }
        self.pop_n(arg_count + 1)?;
        self.reclaimable_contexts += 1;
        self.store_context_registers()?;

        self.active_context = context;
        self.home_context = context;
        self.method = method;
        self.literal_count = header.literal_count();
        self.pc = 0;
        self.sp = RECEIVER + temp_count;
        self.store_context_registers()?;
        self.receiver = receiver;
        self.check_for_interrupts()
    }

    fn try_primitive(&mut self, index: usize, arg_count: usize) -> Result<bool, VmError> {
        if (256..520).contains(&index) {
            return self.quick_primitive(index);
        }
        let Some(primitive) = self.primitives.get(index).copied().flatten() else {
            return Ok(false);
        };
        match primitive(self, arg_count) {
            Ok(()) => Ok(true),
            Err(PrimitiveError::Failed) => {
                self.stats.primitive_failures += 1;
                log::trace!("primitive {index} failed");
                Ok(false)
            }
            Err(PrimitiveError::Fatal(err)) => Err(err),
        }
    }

    /// Constant and instance-variable returns encoded in the primitive index.
    fn quick_primitive(&mut self, index: usize) -> Result<bool, VmError> {
        let value = match index {
            256 => return Ok(true),
            257 => self.specials.true_object,
            258 => self.specials.false_object,
            259 => self.specials.nil,
            260..=263 => Value::small(index as i64 - 261),
            _ => {
                let receiver = self.top()?;
                match self.memory.get(receiver).and_then(|o| o.pointers.get(index - 264)) {
                    Some(&value) => value,
                    None => return Ok(false),
                }
            }
        };
        self.pop_then_push(1, value)?;
        Ok(true)
    }

    // ── Returns ───────────────────────────────────────────────────

    /// Unwind to `target` and push `value` there. Contexts passed on the way
    /// are severed, and pooled while the reclaimable count allows.
    pub(crate) fn do_return(&mut self, value: Value, target: Value) -> Result<(), VmError> {
        let nil = self.specials.nil;
        if target == nil || self.fetch(target, INSTRUCTION_POINTER)? == nil {
            return Err(VmError::CannotReturn { context: target });
        }
        let mut this = self.active_context;
        while this != target {
            if this == nil {
                return Err(VmError::CannotReturn { context: target });
            }
            this = self.fetch(this, SENDER)?;
        }

        let method_context_class = self.special(CLASS_METHOD_CONTEXT);
        let mut this = self.active_context;
        while this != target {
            let next = self.fetch(this, SENDER)?;
            self.store(this, SENDER, nil)?;
            self.store(this, INSTRUCTION_POINTER, nil)?;
            if self.reclaimable_contexts > 0 {
                self.reclaimable_contexts -= 1;
                self.contexts
                    .recycle(&mut self.memory, this, method_context_class, nil);
            }
            this = next;
        }
        self.active_context = this;
        self.fetch_context_registers(this)?;
        self.push(value)
    }

    // ── Interrupts ────────────────────────────────────────────────

    pub fn millisecond_clock(&self) -> i64 {
        self.started.elapsed().as_millis() as i64 & MILLISECOND_CLOCK_MASK
    }

    /// Arm the interrupt semaphore for the next clock sample.
    pub fn request_interrupt(&mut self) {
        self.interrupts.pending = true;
        self.interrupts.counter = 0;
    }

    /// Sample the clock every so many calls and signal the interrupt,
    /// low-space and timer semaphores when due.
    pub(crate) fn check_for_interrupts(&mut self) -> Result<(), VmError> {
        if self.interrupts.counter > 0 {
            self.interrupts.counter -= 1;
            return Ok(());
        }
        let now = self.millisecond_clock();
        let state = &mut self.interrupts;
        if now < state.last_tick {
            if state.next_wakeup_tick != 0 {
                state.next_wakeup_tick = now + (state.next_wakeup_tick - state.last_tick);
            }
        }
        if now - state.last_tick < self.settings.interrupt_check_interval_ms {
            state.feedback_reset += 10;
        } else if state.feedback_reset <= self.settings.min_interrupt_counter {
            state.feedback_reset = self.settings.min_interrupt_counter;
        } else {
            state.feedback_reset -= 12;
        }
        state.counter = state.feedback_reset;
        state.last_tick = now;

        if std::mem::take(&mut self.interrupts.signal_low_space) {
            self.signal_special_semaphore(THE_LOW_SPACE_SEMAPHORE)?;
        }
        if std::mem::take(&mut self.interrupts.pending) {
            self.signal_special_semaphore(THE_INTERRUPT_SEMAPHORE)?;
        }
        let wakeup = self.interrupts.next_wakeup_tick;
        if wakeup != 0 && now >= wakeup {
            self.interrupts.next_wakeup_tick = 0;
            self.signal_special_semaphore(THE_TIMER_SEMAPHORE)?;
        }
        Ok(())
    }

    fn signal_special_semaphore(&mut self, index: usize) -> Result<(), VmError> {
        let semaphore = self.special(index);
        if semaphore != self.specials.nil {
            self.synchronous_signal(semaphore)?;
        }
        Ok(())
    }

    pub(crate) fn scheduler(&self) -> Result<Value, VmError> {
        let association = self.special(SCHEDULER_ASSOCIATION);
        self.fetch(association, ASSOCIATION_VALUE)
    }
}
