//! File primitives over the [`FileSystem`](crate::devices::FileSystem)
//! collaborator. Open files are named by SmallInteger handles; any host I/O
//! error is a primitive failure.
use std::io;

use crate::{
    Format, HeapObject, Interpreter, PrimitiveError, PrimitiveResult, Value,
    devices::{DirectoryEntry, FileHandle, FileSystem as _},
    primitives::OrFail,
    special::CLASS_ARRAY,
};

fn host<T>(result: io::Result<T>) -> Result<T, PrimitiveError> {
    result.map_err(|err| {
        log::debug!("file primitive declined: {err}");
        PrimitiveError::Failed
    })
}

fn expect_args(arg_count: usize, expected: usize) -> PrimitiveResult {
    if arg_count != expected {
        return Err(PrimitiveError::Failed);
    }
    Ok(())
}

impl Interpreter {
    fn stack_handle(&self, depth: usize) -> Result<FileHandle, PrimitiveError> {
        FileHandle::try_from(self.stack_integer(depth)?).or_fail()
    }

    fn stack_path(&self, depth: usize) -> Result<String, PrimitiveError> {
        self.string_value(self.stack_value(depth)?)
    }

    /// The byte range `start..start + count` (1-based start) of a bytes
    /// object, checked against its size.
    fn stack_byte_range(&self, depth: usize) -> Result<(Value, usize, usize), PrimitiveError> {
        let buffer = self.stack_object(depth)?;
        let start = self.stack_integer(depth - 1)?;
        let count = self.stack_integer(depth - 2)?;
        let object = self.memory.object(buffer)?;
        if object.format != Format::Bytes {
            return Err(PrimitiveError::Failed);
        }
        let first = usize::try_from(start - 1).or_fail()?;
        let count = usize::try_from(count).or_fail()?;
        if first + count > object.body_len() {
            return Err(PrimitiveError::Failed);
        }
        Ok((buffer, first, count))
    }

    fn seconds_value(&mut self, seconds: i64) -> Result<Value, PrimitiveError> {
        let seconds = u32::try_from(seconds).or_fail()?;
        Ok(self.pos32_for(seconds)?)
    }

    /// `{name. created. modified. isDirectory. size}`
    fn directory_entry(&mut self, entry: &DirectoryEntry) -> Result<Value, PrimitiveError> {
        let mark = self.memory.pin_count();
        let result = self.build_directory_entry(entry);
        self.memory.release_pins(mark);
        result
    }

    fn build_directory_entry(&mut self, entry: &DirectoryEntry) -> Result<Value, PrimitiveError> {
        let name = self.make_string(&entry.name)?;
        self.memory.pin(name);
        let created = self.seconds_value(entry.created)?;
        self.memory.pin(created);
        let modified = self.seconds_value(entry.modified)?;
        self.memory.pin(modified);
        let size = self.pos32_for(u32::try_from(entry.size).or_fail()?)?;
        self.memory.pin(size);
        let is_directory = self.specials.boolean(entry.is_directory);
        let class = self.special(CLASS_ARRAY);
        Ok(self.allocate(HeapObject::with_pointers(
            class,
            Format::Indexable,
            vec![name, created, modified, is_directory, size],
        ))?)
    }
}

pub fn at_end(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 1)?;
    let handle = vm.stack_handle(0)?;
    let at_end = host(vm.devices.files.at_end(handle))?;
    vm.answer_bool(1, at_end)
}

pub fn close(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 1)?;
    let handle = vm.stack_handle(0)?;
    host(vm.devices.files.close(handle))?;
    let receiver = vm.stack_value(1)?;
    vm.answer(1, receiver)
}

pub fn position(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 1)?;
    let handle = vm.stack_handle(0)?;
    let position = host(vm.devices.files.position(handle))?;
    let position = vm.pos32_for(u32::try_from(position).or_fail()?)?;
    vm.answer(1, position)
}

/// primOpen: name writable: aBoolean, answering a fresh handle.
pub fn open(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 2)?;
    let path = vm.stack_path(1)?;
    let writable = match vm.stack_value(0)? {
        flag if flag == vm.specials.true_object => true,
        flag if flag == vm.specials.false_object => false,
        _ => return Err(PrimitiveError::Failed),
    };
    let handle = host(vm.devices.files.open(&path, writable))?;
    let Some(handle) = Value::try_small(i64::from(handle)) else {
        // the host ran out of handles the image can name
        let _ = vm.devices.files.close(handle);
        return Err(PrimitiveError::Failed);
    };
    vm.answer(2, handle)
}

/// primRead: handle into: bytes startingAt: start count: count
pub fn read(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 4)?;
    let handle = vm.stack_handle(3)?;
    let (buffer, first, count) = vm.stack_byte_range(2)?;
    let mut bytes = vec![0; count];
    let read = host(vm.devices.files.read(handle, &mut bytes))?;
    vm.memory
        .object_mut(buffer)?
        .bytes_mut()
        .or_fail()?
        .get_mut(first..first + read)
        .or_fail()?
        .copy_from_slice(&bytes[..read]);
    let read = vm.pos32_for(u32::try_from(read).or_fail()?)?;
    vm.answer(4, read)
}

pub fn set_position(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 2)?;
    let handle = vm.stack_handle(1)?;
    let position = vm.stack_pos32(0)?;
    host(vm.devices.files.set_position(handle, u64::from(position)))?;
    let receiver = vm.stack_value(2)?;
    vm.answer(2, receiver)
}

pub fn delete(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 1)?;
    let path = vm.stack_path(0)?;
    host(vm.devices.files.delete(&path))?;
    let receiver = vm.stack_value(1)?;
    vm.answer(1, receiver)
}

pub fn size(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 1)?;
    let handle = vm.stack_handle(0)?;
    let size = host(vm.devices.files.size(handle))?;
    let size = vm.pos32_for(u32::try_from(size).or_fail()?)?;
    vm.answer(1, size)
}

/// primWrite: handle from: bytes startingAt: start count: count
pub fn write(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 4)?;
    let handle = vm.stack_handle(3)?;
    let (buffer, first, count) = vm.stack_byte_range(2)?;
    let bytes = vm.memory.object(buffer)?.bytes().or_fail()?[first..first + count].to_vec();
    let written = host(vm.devices.files.write(handle, &bytes))?;
    let written = vm.pos32_for(u32::try_from(written).or_fail()?)?;
    vm.answer(4, written)
}

pub fn rename(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 2)?;
    let from = vm.stack_path(1)?;
    let to = vm.stack_path(0)?;
    host(vm.devices.files.rename(&from, &to))?;
    let receiver = vm.stack_value(2)?;
    vm.answer(2, receiver)
}

pub fn create_directory(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 1)?;
    let path = vm.stack_path(0)?;
    host(vm.devices.files.create_directory(&path))?;
    let receiver = vm.stack_value(1)?;
    vm.answer(1, receiver)
}

/// The path separator as a Character.
pub fn delimiter(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let separator = u8::try_from(vm.devices.files.delimiter()).or_fail()?;
    let character = vm.character_for(separator)?;
    vm.answer(0, character)
}

/// lookupEntryIn: path index: n, answering nil past the last entry.
pub fn lookup(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    expect_args(arg_count, 2)?;
    let directory = vm.stack_path(1)?;
    let index = usize::try_from(vm.stack_integer(0)?).or_fail()?;
    if index == 0 {
        return Err(PrimitiveError::Failed);
    }
    let entry = match host(vm.devices.files.lookup(&directory, index))? {
        Some(entry) => vm.directory_entry(&entry)?,
        None => vm.specials.nil,
    };
    vm.answer(2, entry)
}
