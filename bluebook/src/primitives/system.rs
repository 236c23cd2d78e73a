use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::{
    Interpreter, PrimitiveError, PrimitiveResult, ReclaimScope, Value,
    devices::SECONDS_1901_TO_1970,
};

fn space_left(vm: &Interpreter) -> Value {
    Value::small(vm.memory.space_left().clamp(0, crate::SMALL_INT_MAX))
}

pub fn bytes_left(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let left = space_left(vm);
    vm.answer(0, left)
}

pub fn quit(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    log::info!("image requested quit");
    vm.quit = true;
    Ok(())
}

/// Renaming the image is not supported; only the query form succeeds.
pub fn image_name(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    if arg_count != 0 {
        return Err(PrimitiveError::Failed);
    }
    let path = vm.image_path.as_ref().ok_or(PrimitiveError::Failed)?;
    let path = std::path::absolute(path)
        .unwrap_or_else(|_| path.clone())
        .to_string_lossy()
        .into_owned();
    let name = vm.make_string(&path)?;
    vm.answer(0, name)
}

pub fn full_gc(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    vm.contexts.clear();
    for _ in 0..5 {
        vm.reclaim(ReclaimScope::Young);
    }
    let freed = vm.reclaim(ReclaimScope::Full);
    log::debug!("full reclamation freed {freed} slots");
    let left = space_left(vm);
    vm.answer(0, left)
}

pub fn incremental_gc(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    vm.reclaim(ReclaimScope::Young);
    let left = space_left(vm);
    vm.answer(0, left)
}

pub fn millisecond_clock(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let now = Value::small(vm.millisecond_clock());
    vm.answer(0, now)
}

pub fn seconds_clock(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let since_1970 = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs() as i64);
    let seconds = u32::try_from(since_1970 + SECONDS_1901_TO_1970).or(Err(PrimitiveError::Failed))?;
    let seconds = vm.pos32_for(seconds)?;
    vm.answer(0, seconds)
}

/// The working directory the VM was started from.
pub fn vm_path(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let directory = std::env::current_dir().map_err(|_| PrimitiveError::Failed)?;
    let mut path = directory.to_string_lossy().into_owned();
    path.push(std::path::MAIN_SEPARATOR);
    let path = vm.make_string(&path)?;
    vm.answer(0, path)
}

/// No system attributes are defined.
pub fn get_attribute(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let nil = vm.specials.nil;
    vm.answer(1, nil)
}

/// Park the interpreter until a device event arrives or the timeout passes.
pub fn relinquish(vm: &mut Interpreter, arg_count: usize) -> PrimitiveResult {
    let timeout = match arg_count {
        0 => vm.settings.yield_timeout,
        1 => {
            let micros = vm.stack_integer(0)?;
            vm.pop()?;
            Duration::from_micros(micros.max(0) as u64)
        }
        _ => return Err(PrimitiveError::Failed),
    };
    vm.devices.events.wait_timeout(timeout);
    Ok(())
}
