//! Semaphore and process primitives, plus the semaphores the interpreter
//! signals on its own.
use crate::{
    Interpreter, PrimitiveError, PrimitiveResult, Value,
    special::{
        CLASS_PROCESS, CLASS_SEMAPHORE, THE_INTERRUPT_SEMAPHORE, THE_LOW_SPACE_SEMAPHORE,
        THE_TIMER_SEMAPHORE,
    },
};

impl Interpreter {
    fn receiver_of_class(&self, special_class: usize) -> Result<Value, PrimitiveError> {
        let receiver = self.top()?;
        if !self.is_instance_of(receiver, special_class) {
            return Err(PrimitiveError::Failed);
        }
        Ok(receiver)
    }

    /// Install `value` as special object `index`, or nil when it is not a
    /// Semaphore.
    fn register_semaphore(&mut self, index: usize, value: Value) -> PrimitiveResult {
        let semaphore = if self.is_instance_of(value, CLASS_SEMAPHORE) {
            value
        } else {
            self.specials.nil
        };
        self.store(self.specials.array, index, semaphore)?;
        Ok(())
    }
}

pub fn signal(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let semaphore = vm.receiver_of_class(CLASS_SEMAPHORE)?;
    vm.synchronous_signal(semaphore)?;
    Ok(())
}

/// The receiver stays on the waiting process' stack as the answer.
pub fn wait(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let semaphore = vm.receiver_of_class(CLASS_SEMAPHORE)?;
    vm.semaphore_wait(semaphore)?;
    Ok(())
}

pub fn resume(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let process = vm.receiver_of_class(CLASS_PROCESS)?;
    if process == vm.active_process()? {
        return Err(PrimitiveError::Failed);
    }
    vm.resume(process)?;
    Ok(())
}

/// Only the active process can suspend itself; it answers nil when resumed.
pub fn suspend(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let process = vm.top()?;
    if process != vm.active_process()? {
        return Err(PrimitiveError::Failed);
    }
    vm.pop_then_push(1, vm.specials.nil)?;
    vm.suspend_active()?;
    Ok(())
}

pub fn low_space_semaphore(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let semaphore = vm.stack_value(0)?;
    vm.register_semaphore(THE_LOW_SPACE_SEMAPHORE, semaphore)?;
    let receiver = vm.stack_value(1)?;
    vm.answer(1, receiver)
}

/// Free object slots below which the low-space semaphore is signalled.
pub fn low_space_threshold(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let threshold = vm.stack_integer(0)?;
    vm.low_space_threshold = threshold;
    let receiver = vm.stack_value(1)?;
    vm.answer(1, receiver)
}

pub fn interrupt_semaphore(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let semaphore = vm.stack_value(0)?;
    vm.register_semaphore(THE_INTERRUPT_SEMAPHORE, semaphore)?;
    let receiver = vm.stack_value(1)?;
    vm.answer(1, receiver)
}

/// Arm the timer semaphore for a millisecond clock value; a non-Semaphore
/// disarms it.
pub fn signal_at_milliseconds(vm: &mut Interpreter, _: usize) -> PrimitiveResult {
    let semaphore = vm.stack_value(1)?;
    let tick = vm.stack_integer(0)?;
    vm.register_semaphore(THE_TIMER_SEMAPHORE, semaphore)?;
    vm.interrupts.next_wakeup_tick = if vm.is_instance_of(semaphore, CLASS_SEMAPHORE) {
        tick
    } else {
        0
    };
    let receiver = vm.stack_value(2)?;
    vm.answer(2, receiver)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        scheduler::{LIST_FIRST, PROCESS_SUSPENDED_CONTEXT, SEMAPHORE_EXCESS_SIGNALS},
        testing::World,
    };

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
    fn signal_refuses_a_non_semaphore() {
        let mut world = world_with_stack(&[Value::small(3)]);
        assert!(matches!(signal(&mut world.vm, 0), Err(PrimitiveError::Failed)));
        assert_eq!(world.vm.top().unwrap(), Value::small(3));
    }

    #[test]
    fn wait_on_a_signalled_semaphore_keeps_running() {
        let mut world = world_with_stack(&[]);
        let semaphore = world.semaphore();
        world.vm.push(semaphore).unwrap();
        signal(&mut world.vm, 0).unwrap();
        wait(&mut world.vm, 0).unwrap();
        assert_eq!(world.vm.top().unwrap(), semaphore);
        assert_eq!(world.vm.fetch_int(semaphore, SEMAPHORE_EXCESS_SIGNALS).unwrap(), 0);
        assert_eq!(world.vm.active_process().unwrap(), world.root_process());
    }

    #[test]
    fn suspend_switches_to_the_next_runnable_process() {
        let mut world = world_with_stack(&[]);
        let root = world.root_process();
        let method = world.method(&[], &[112]);
        let other = world.process(method, 3);
        let other_context = world.vm.fetch(other, PROCESS_SUSPENDED_CONTEXT).unwrap();
        let list = world.priority_list(3);
        world.vm.link_process_to_list(other, list).unwrap();

        world.vm.push(root).unwrap();
        let depth = world.vm.stack_depth();
        suspend(&mut world.vm, 0).unwrap();
        assert_eq!(world.vm.active_process().unwrap(), other);
        assert_eq!(world.vm.active_context, other_context);
        // the suspended process answers nil once it runs again
        let saved = world.vm.fetch(root, PROCESS_SUSPENDED_CONTEXT).unwrap();
        assert_eq!(saved, world.root_context());
        assert_eq!(world.vm.fetch(saved, depth).unwrap(), world.vm.specials.nil);
        // a process that is not running cannot suspend itself
        world.vm.push(root).unwrap();
        assert!(matches!(suspend(&mut world.vm, 0), Err(PrimitiveError::Failed)));
    }

    #[test]
    fn resume_queues_a_lower_priority_process() {
        let mut world = world_with_stack(&[]);
        let method = world.method(&[], &[112]);
        let other = world.process(method, 2);
        world.vm.push(other).unwrap();
        resume(&mut world.vm, 0).unwrap();
        assert_eq!(world.vm.top().unwrap(), other);
        let list = world.priority_list(2);
        assert_eq!(world.vm.fetch(list, LIST_FIRST).unwrap(), other);
        assert_eq!(world.vm.active_process().unwrap(), world.root_process());
    }

    #[test]
    fn timer_semaphore_is_armed_and_disarmed() {
        let mut world = world_with_stack(&[]);
        let semaphore = world.semaphore();
        let receiver = world.vm.specials.nil;
        for value in [receiver, semaphore, Value::small(500)] {
            world.vm.push(value).unwrap();
        }
        signal_at_milliseconds(&mut world.vm, 2).unwrap();
        assert_eq!(world.vm.special(THE_TIMER_SEMAPHORE), semaphore);
        assert_eq!(world.vm.interrupts.next_wakeup_tick, 500);
        assert_eq!(world.vm.top().unwrap(), receiver);

        for value in [Value::small(0), Value::small(900)] {
            world.vm.push(value).unwrap();
        }
        signal_at_milliseconds(&mut world.vm, 2).unwrap();
        assert_eq!(world.vm.special(THE_TIMER_SEMAPHORE), world.vm.specials.nil);
        assert_eq!(world.vm.interrupts.next_wakeup_tick, 0);
    }

    #[test]
    fn low_space_threshold_is_recorded() {
        let mut world = world_with_stack(&[Value::small(1), Value::small(64)]);
        low_space_threshold(&mut world.vm, 1).unwrap();
        assert_eq!(world.vm.low_space_threshold, 64);
        assert_eq!(world.vm.top().unwrap(), Value::small(1));
    }
}
