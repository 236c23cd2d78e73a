//! A minimal image built in memory: enough classes, special objects and a
//! scheduler for the interpreter to run hand-assembled methods.
use std::collections::HashMap;

use crate::{
    Devices, Format, HeapObject, InstanceSpec, Interpreter, InterpreterSettings, MemorySettings,
    MethodHeader, ObjectMemory, SpecialObjects, Value,
    context::{INSTRUCTION_POINTER, METHOD, RECEIVER, SENDER, SMALL_CONTEXT_SIZE, STACK_POINTER},
    lookup::{
        CLASS_FORMAT, CLASS_METHOD_DICTIONARY, CLASS_NAME, CLASS_SUPERCLASS,
        DICTIONARY_METHOD_ARRAY, DICTIONARY_SELECTOR_START,
    },
    scheduler::{PROCESS_SUSPENDED_CONTEXT, SCHEDULER_PROCESS_LISTS},
    special::*,
};

const SPECIALS_SIZE: usize = 50;
const GLOBALS: usize = 8;
const CLASS_SIZE: usize = CLASS_NAME + 1;
const PRIORITIES: usize = 8;
const ROOT_PRIORITY: i64 = 5;

const SPECIAL_SELECTOR_NAMES: [(&str, i64); 32] = [
    ("+", 1),
    ("-", 1),
    ("<", 1),
    (">", 1),
    ("<=", 1),
    (">=", 1),
    ("=", 1),
    ("~=", 1),
    ("*", 1),
    ("/", 1),
    ("\\\\", 1),
    ("@", 1),
    ("bitShift:", 1),
    ("//", 1),
    ("bitAnd:", 1),
    ("bitOr:", 1),
    ("at:", 1),
    ("at:put:", 2),
    ("size", 0),
    ("next", 0),
    ("nextPut:", 1),
    ("atEnd", 0),
    ("==", 1),
    ("class", 0),
    ("blockCopy:", 1),
    ("value", 0),
    ("value:", 1),
    ("do:", 1),
    ("new", 0),
    ("new:", 1),
    ("x", 0),
    ("y", 0),
];

/// Objects registered before the interpreter exists.
struct Bootstrap {
    memory: ObjectMemory,
    nil: Value,
}

impl Bootstrap {
    fn register(&mut self, object: HeapObject) -> Value {
        self.memory.register(object).unwrap()
    }

    fn pointers(&mut self, class: Value, pointers: Vec<Value>) -> Value {
        let format = if pointers.is_empty() { Format::Empty } else { Format::Fixed };
        self.register(HeapObject::with_pointers(class, format, pointers))
    }

    fn array(&mut self, class: Value, pointers: Vec<Value>) -> Value {
        self.register(HeapObject::with_pointers(class, Format::Indexable, pointers))
    }

    /// The class of every class is patched in once it exists.
    fn class(&mut self, superclass: Value, inst_size: usize, format_code: u32) -> Value {
        let mut fields = vec![self.nil; CLASS_SIZE];
        fields[CLASS_SUPERCLASS] = superclass;
        fields[CLASS_FORMAT] = Value::small(InstanceSpec::encode(inst_size, format_code));
        self.pointers(self.nil, fields)
    }

    fn set_class(&mut self, object: Value, class: Value) {
        self.memory.object_mut(object).unwrap().class = class;
    }
}

pub struct World {
    pub vm: Interpreter,
    pub object_class: Value,
    pub semaphore_class: Value,
    class_class: Value,
    symbol_class: Value,
    globals: Value,
    symbols: HashMap<String, Value>,
    root_process: Value,
    root_context: Value,
}

impl World {
    pub fn new() -> Self {
        let _ = env_logger::builder().is_test(true).try_init();
        let mut memory = ObjectMemory::new(MemorySettings::default());
        let nil = memory
            .register(HeapObject::with_pointers(Value::small(0), Format::Empty, vec![]))
            .unwrap();
        let mut boot = Bootstrap { memory, nil };

        let object_class = boot.class(nil, 0, 0);
        let class_class = boot.class(object_class, CLASS_SIZE, 1);
        let undefined_class = boot.class(object_class, 0, 0);
        let true_class = boot.class(object_class, 0, 0);
        let false_class = boot.class(object_class, 0, 0);
        let small_integer_class = boot.class(object_class, 0, 0);
        let string_class = boot.class(object_class, 0, 8);
        let symbol_class = boot.class(string_class, 0, 8);
        let array_class = boot.class(object_class, 0, 2);
        let float_class = boot.class(object_class, 0, 6);
        let method_context_class = boot.class(object_class, 6, 3);
        let block_context_class = boot.class(object_class, 6, 3);
        let point_class = boot.class(object_class, 2, 1);
        let large_positive_class = boot.class(object_class, 0, 8);
        let large_negative_class = boot.class(object_class, 0, 8);
        let message_class = boot.class(object_class, 3, 1);
        let method_class = boot.class(object_class, 0, 12);
        let semaphore_class = boot.class(object_class, 3, 1);
        let character_class = boot.class(object_class, 1, 1);
        let byte_array_class = boot.class(object_class, 0, 8);
        let process_class = boot.class(object_class, 4, 1);
        let bitmap_class = boot.class(object_class, 0, 6);
        let linked_list_class = boot.class(object_class, 2, 1);
        let scheduler_class = boot.class(object_class, 2, 1);
        let association_class = boot.class(object_class, 2, 1);
        let classes = [
            ("Object", object_class),
            ("Class", class_class),
            ("UndefinedObject", undefined_class),
            ("True", true_class),
            ("False", false_class),
            ("SmallInteger", small_integer_class),
            ("String", string_class),
            ("Symbol", symbol_class),
            ("Array", array_class),
            ("Float", float_class),
            ("MethodContext", method_context_class),
            ("BlockContext", block_context_class),
            ("Point", point_class),
            ("LargePositiveInteger", large_positive_class),
            ("LargeNegativeInteger", large_negative_class),
            ("Message", message_class),
            ("CompiledMethod", method_class),
            ("Semaphore", semaphore_class),
            ("Character", character_class),
            ("ByteArray", byte_array_class),
            ("Process", process_class),
            ("Bitmap", bitmap_class),
            ("LinkedList", linked_list_class),
            ("ProcessorScheduler", scheduler_class),
            ("Association", association_class),
        ];
        boot.set_class(nil, undefined_class);
        for (_, class) in classes {
            boot.set_class(class, class_class);
        }

        let false_object = boot.pointers(false_class, vec![]);
        let true_object = boot.pointers(true_class, vec![]);

        let mut symbols = HashMap::new();
        let mut intern = |boot: &mut Bootstrap, name: &str| -> Value {
            *symbols.entry(name.to_owned()).or_insert_with(|| {
                boot.register(HeapObject::with_bytes(symbol_class, name.as_bytes().to_vec()))
            })
        };
        for (name, class) in classes {
            let name = intern(&mut boot, name);
            boot.memory.object_mut(class).unwrap().pointers[CLASS_NAME] = name;
        }

        let mut special_selectors = Vec::with_capacity(SPECIAL_SELECTOR_NAMES.len() * 2);
        for (name, arg_count) in SPECIAL_SELECTOR_NAMES {
            special_selectors.push(intern(&mut boot, name));
            special_selectors.push(Value::small(arg_count));
        }
        let special_selectors = boot.array(array_class, special_selectors);
        let does_not_understand = intern(&mut boot, "doesNotUnderstand:");
        let must_be_boolean = intern(&mut boot, "mustBeBoolean");

        let characters = (0..256)
            .map(|code| boot.pointers(character_class, vec![Value::small(code)]))
            .collect();
        let character_table = boot.array(array_class, characters);

        let root_process = boot.pointers(
            process_class,
            vec![nil, nil, Value::small(ROOT_PRIORITY), nil],
        );
        let lists = (0..PRIORITIES)
            .map(|_| boot.pointers(linked_list_class, vec![nil, nil]))
            .collect();
        let lists = boot.array(array_class, lists);
        let scheduler = boot.pointers(scheduler_class, vec![lists, root_process]);
        let processor = intern(&mut boot, "Processor");
        let scheduler_association = boot.pointers(association_class, vec![processor, scheduler]);

        let mut globals: Vec<Value> = classes.iter().map(|&(_, class)| class).collect();
        globals.extend(symbols.values().copied());
        let globals = boot.array(array_class, globals);

        let mut specials = vec![nil; SPECIALS_SIZE];
        specials[NIL_OBJECT] = nil;
        specials[FALSE_OBJECT] = false_object;
        specials[TRUE_OBJECT] = true_object;
        specials[SCHEDULER_ASSOCIATION] = scheduler_association;
        specials[CLASS_SMALL_INTEGER] = small_integer_class;
        specials[CLASS_STRING] = string_class;
        specials[CLASS_ARRAY] = array_class;
        specials[GLOBALS] = globals;
        specials[CLASS_FLOAT] = float_class;
        specials[CLASS_METHOD_CONTEXT] = method_context_class;
        specials[CLASS_BLOCK_CONTEXT] = block_context_class;
        specials[CLASS_POINT] = point_class;
        specials[CLASS_LARGE_POSITIVE_INTEGER] = large_positive_class;
        specials[CLASS_MESSAGE] = message_class;
        specials[CLASS_COMPILED_METHOD] = method_class;
        specials[CLASS_SEMAPHORE] = semaphore_class;
        specials[CLASS_CHARACTER] = character_class;
        specials[SELECTOR_DOES_NOT_UNDERSTAND] = does_not_understand;
        specials[SPECIAL_SELECTORS] = special_selectors;
        specials[CHARACTER_TABLE] = character_table;
        specials[SELECTOR_MUST_BE_BOOLEAN] = must_be_boolean;
        specials[CLASS_BYTE_ARRAY] = byte_array_class;
        specials[CLASS_PROCESS] = process_class;
        let specials = boot.array(array_class, specials);

        let Bootstrap { mut memory, .. } = boot;
        memory.mark_old_boundary();
        let special_objects = SpecialObjects::load(&memory, specials).unwrap();
        let vm = Interpreter::new(
            memory,
            special_objects,
            InterpreterSettings::default(),
            Devices::headless(),
        );
        Self {
            vm,
            object_class,
            semaphore_class,
            class_class,
            symbol_class,
            globals,
            symbols,
            root_process,
            root_context: nil,
        }
    }

    fn remember(&mut self, value: Value) {
        self.vm.memory.object_mut(self.globals).unwrap().pointers.push(value);
    }

    pub fn symbol(&mut self, name: &str) -> Value {
        if let Some(&symbol) = self.symbols.get(name) {
            return symbol;
        }
        let symbol = self
            .vm
            .allocate(HeapObject::with_bytes(self.symbol_class, name.as_bytes().to_vec()))
            .unwrap();
        self.symbols.insert(name.to_owned(), symbol);
        self.remember(symbol);
        symbol
    }

    /// A non-indexable class with `inst_size` named fields.
    pub fn define_class(&mut self, name: &str, superclass: Value, inst_size: usize) -> Value {
        let nil = self.vm.specials.nil;
        let name = self.symbol(name);
        let mut fields = vec![nil; CLASS_SIZE];
        fields[CLASS_SUPERCLASS] = superclass;
        fields[CLASS_FORMAT] = Value::small(InstanceSpec::encode(inst_size, u32::from(inst_size > 0)));
        fields[CLASS_NAME] = name;
        let class = self
            .vm
            .allocate(HeapObject::with_pointers(self.class_class, Format::Fixed, fields))
            .unwrap();
        self.remember(class);
        class
    }

    /// Instance of `class` whose pointer fields start with `fields`; the
    /// rest up to the class' named field count is nil.
    pub fn instance(&mut self, class: Value, fields: &[Value]) -> Value {
        let spec = self.vm.instance_spec(class).unwrap();
        let nil = self.vm.specials.nil;
        let mut pointers = fields.to_vec();
        if pointers.len() < spec.inst_size {
            pointers.resize(spec.inst_size, nil);
        }
        let format = match spec.format_code {
            2 => Format::Indexable,
            3 => Format::FixedIndexable,
            _ if pointers.is_empty() => Format::Empty,
            _ => Format::Fixed,
        };
        self.vm
            .allocate(HeapObject::with_pointers(class, format, pointers))
            .unwrap()
    }

    pub fn method(&mut self, literals: &[Value], bytecodes: &[u8]) -> Value {
        self.compile(0, 0, 0, literals, bytecodes)
    }

    fn compile(
        &mut self,
        arg_count: usize,
        temp_count: usize,
        primitive: usize,
        literals: &[Value],
        bytecodes: &[u8],
    ) -> Value {
        let header = MethodHeader::encode(arg_count, temp_count, literals.len(), false, primitive);
        let mut pointers = vec![Value::small(header.0)];
        pointers.extend_from_slice(literals);
        let class = self.vm.special(CLASS_COMPILED_METHOD);
        self.vm
            .allocate(HeapObject::method(class, pointers, bytecodes.to_vec()))
            .unwrap()
    }

    /// Add `method` under `selector`, rebuilding the dictionary so the
    /// selector part stays a power of two with at least one free slot.
    fn add_to_dictionary(&mut self, class: Value, selector: Value, method: Value) {
        let nil = self.vm.specials.nil;
        let dictionary = self.vm.fetch(class, CLASS_METHOD_DICTIONARY).unwrap();
        let mut entries = Vec::new();
        if dictionary != nil {
            let object = self.vm.memory.object(dictionary).unwrap();
            let methods = object.pointers[DICTIONARY_METHOD_ARRAY];
            let methods = self.vm.memory.object(methods).unwrap().pointers.clone();
            for (key, &method) in object.pointers[DICTIONARY_SELECTOR_START..].iter().zip(&methods) {
                if *key != nil && *key != selector {
                    entries.push((*key, method));
                }
            }
        }
        entries.push((selector, method));

        let capacity = (entries.len() * 2).next_power_of_two().max(4);
        let mut keys = vec![nil; capacity];
        let mut values = vec![nil; capacity];
        for (key, value) in entries {
            let hash = self.vm.memory.object(key).unwrap().hash as usize;
            let mut slot = hash & (capacity - 1);
            while keys[slot] != nil {
                slot = (slot + 1) % capacity;
            }
            keys[slot] = key;
            values[slot] = value;
        }
        let array_class = self.vm.special(CLASS_ARRAY);
        let methods = self
            .vm
            .allocate(HeapObject::with_pointers(array_class, Format::Indexable, values))
            .unwrap();
        let tally = Value::small(keys.iter().filter(|&&key| key != nil).count() as i64);
        let mut pointers = vec![tally, methods];
        pointers.extend(keys);
        let dictionary = self
            .vm
            .allocate(HeapObject::with_pointers(self.object_class, Format::FixedIndexable, pointers))
            .unwrap();
        self.vm.store(class, CLASS_METHOD_DICTIONARY, dictionary).unwrap();
        self.vm.flush_caches();
    }

    pub fn install_method(
        &mut self,
        class: Value,
        selector: Value,
        arg_count: usize,
        temp_count: usize,
        literals: &[Value],
        bytecodes: &[u8],
    ) -> Value {
        let method = self.compile(arg_count, temp_count, 0, literals, bytecodes);
        self.add_to_dictionary(class, selector, method);
        method
    }

    /// A method that runs primitive `primitive` and answers self when it fails.
    pub fn install_primitive(
        &mut self,
        class: Value,
        selector: Value,
        arg_count: usize,
        primitive: usize,
    ) -> Value {
        let method = self.compile(arg_count, arg_count, primitive, &[], &[120]);
        self.add_to_dictionary(class, selector, method);
        method
    }

    fn context_for(&mut self, method: Value, receiver: Value) -> Value {
        let nil = self.vm.specials.nil;
        let header = MethodHeader::of(&self.vm.memory, method).unwrap();
        let class = self.vm.special(CLASS_METHOD_CONTEXT);
        let mut pointers = vec![nil; SMALL_CONTEXT_SIZE];
        pointers[SENDER] = nil;
        pointers[INSTRUCTION_POINTER] =
            Value::small(crate::context::encode_pc(0, header.literal_count()));
        pointers[STACK_POINTER] = Value::small(crate::context::encode_sp(RECEIVER + header.temp_count()));
        pointers[METHOD] = method;
        pointers[RECEIVER] = receiver;
        self.vm
            .allocate(HeapObject::with_pointers(class, Format::Indexable, pointers))
            .unwrap()
    }

    /// Run `method` on `receiver` as the root process' only context.
    pub fn activate(&mut self, method: Value, receiver: Value) {
        let context = self.context_for(method, receiver);
        self.vm.store(self.root_process, PROCESS_SUSPENDED_CONTEXT, context).unwrap();
        self.vm.load_initial_context().unwrap();
        self.root_context = context;
    }

    pub fn root_context(&self) -> Value {
        self.root_context
    }

    pub fn root_process(&self) -> Value {
        self.root_process
    }

    /// A process suspended at the start of `method`, on no list.
    pub fn process(&mut self, method: Value, priority: i64) -> Value {
        let nil = self.vm.specials.nil;
        let context = self.context_for(method, nil);
        let class = self.vm.special(CLASS_PROCESS);
        let process = self.instance(class, &[nil, context, Value::small(priority), nil]);
        self.remember(process);
        process
    }

    pub fn priority_list(&self, priority: usize) -> Value {
        let scheduler = self.vm.scheduler().unwrap();
        let lists = self.vm.fetch(scheduler, SCHEDULER_PROCESS_LISTS).unwrap();
        self.vm.fetch(lists, priority - 1).unwrap()
    }

    pub fn semaphore(&mut self) -> Value {
        let nil = self.vm.specials.nil;
        let semaphore = self.instance(self.semaphore_class, &[nil, nil, Value::small(0)]);
        self.remember(semaphore);
        semaphore
    }

    pub fn set_special(&mut self, index: usize, value: Value) {
        self.vm.store(self.vm.specials.array, index, value).unwrap();
    }
}
