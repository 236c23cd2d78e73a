//! Cooperative process scheduling over the image's ProcessorScheduler.
//!
//! Processes sit on linked lists: one per priority in the scheduler, plus the
//! wait list every Semaphore is. All switches are synchronous and happen
//! only from bytecode execution.
use crate::{Interpreter, Value, VmError};

pub const SCHEDULER_PROCESS_LISTS: usize = 0;
pub const SCHEDULER_ACTIVE_PROCESS: usize = 1;

pub const LINK_NEXT: usize = 0;
pub const LIST_FIRST: usize = 0;
pub const LIST_LAST: usize = 1;

pub const SEMAPHORE_EXCESS_SIGNALS: usize = 2;

pub const PROCESS_SUSPENDED_CONTEXT: usize = 1;
pub const PROCESS_PRIORITY: usize = 2;
pub const PROCESS_MY_LIST: usize = 3;

impl Interpreter {
    pub(crate) fn active_process(&self) -> Result<Value, VmError> {
        self.fetch(self.scheduler()?, SCHEDULER_ACTIVE_PROCESS)
    }

    fn priority(&self, process: Value) -> Result<i64, VmError> {
        self.fetch_int(process, PROCESS_PRIORITY)
    }

    pub(crate) fn is_empty_list(&self, list: Value) -> Result<bool, VmError> {
        Ok(self.fetch(list, LIST_FIRST)? == self.specials.nil)
    }

    pub(crate) fn link_process_to_list(&mut self, process: Value, list: Value) -> Result<(), VmError> {
        if self.is_empty_list(list)? {
            self.store(list, LIST_FIRST, process)?;
        } else {
            let last = self.fetch(list, LIST_LAST)?;
            self.store(last, LINK_NEXT, process)?;
        }
        self.store(list, LIST_LAST, process)?;
        self.store(process, PROCESS_MY_LIST, list)
    }

    pub(crate) fn remove_first_link(&mut self, list: Value) -> Result<Value, VmError> {
        let nil = self.specials.nil;
        let first = self.fetch(list, LIST_FIRST)?;
        let last = self.fetch(list, LIST_LAST)?;
        if first == last {
            self.store(list, LIST_FIRST, nil)?;
            self.store(list, LIST_LAST, nil)?;
        } else {
            let next = self.fetch(first, LINK_NEXT)?;
            self.store(list, LIST_FIRST, next)?;
        }
        self.store(first, LINK_NEXT, nil)?;
        Ok(first)
    }

    fn put_to_sleep(&mut self, process: Value) -> Result<(), VmError> {
        let lists = self.fetch(self.scheduler()?, SCHEDULER_PROCESS_LISTS)?;
        let priority = self.priority(process)?;
        let index = usize::try_from(priority - 1).map_err(|_| VmError::Malformed {
            what: "process priority",
            value: process,
        })?;
        let list = self.fetch(lists, index)?;
        self.link_process_to_list(process, list)
    }

    /// Make `process` active, saving the current registers into the process
    /// that was running.
    pub(crate) fn transfer_to(&mut self, process: Value) -> Result<(), VmError> {
        let scheduler = self.scheduler()?;
        let old = self.fetch(scheduler, SCHEDULER_ACTIVE_PROCESS)?;
        self.store(scheduler, SCHEDULER_ACTIVE_PROCESS, process)?;
        self.store(old, PROCESS_SUSPENDED_CONTEXT, self.active_context)?;
        let context = self.fetch(process, PROCESS_SUSPENDED_CONTEXT)?;
        self.new_active_context(context)?;
        self.store(process, PROCESS_SUSPENDED_CONTEXT, self.specials.nil)?;
        self.reclaimable_contexts = 0;
        self.stats.process_switches += 1;
        log::debug!("switched from process {old:?} to {process:?}");
        Ok(())
    }

    /// Remove and answer the first process of the highest non-empty priority.
    pub(crate) fn pick_top_process(&mut self) -> Result<Value, VmError> {
        let lists = self.fetch(self.scheduler()?, SCHEDULER_PROCESS_LISTS)?;
        let count = self.memory.object(lists)?.pointers.len();
        for index in (0..count).rev() {
            let list = self.fetch(lists, index)?;
            if !self.is_empty_list(list)? {
                return self.remove_first_link(list);
            }
        }
        Err(VmError::NoRunnableProcess)
    }

    /// Preempt the active process when `process` has a higher priority,
    /// otherwise queue `process` behind its peers.
    pub(crate) fn resume(&mut self, process: Value) -> Result<(), VmError> {
        let active = self.active_process()?;
        if self.priority(process)? > self.priority(active)? {
            self.put_to_sleep(active)?;
            self.transfer_to(process)
        } else {
            self.put_to_sleep(process)
        }
    }

    pub(crate) fn synchronous_signal(&mut self, semaphore: Value) -> Result<(), VmError> {
        if self.is_empty_list(semaphore)? {
            let excess = self.fetch_int(semaphore, SEMAPHORE_EXCESS_SIGNALS)?;
            self.store(semaphore, SEMAPHORE_EXCESS_SIGNALS, Value::small(excess + 1))
        } else {
            let process = self.remove_first_link(semaphore)?;
            self.resume(process)
        }
    }

    pub(crate) fn semaphore_wait(&mut self, semaphore: Value) -> Result<(), VmError> {
        let excess = self.fetch_int(semaphore, SEMAPHORE_EXCESS_SIGNALS)?;
        if excess > 0 {
            return self.store(semaphore, SEMAPHORE_EXCESS_SIGNALS, Value::small(excess - 1));
        }
        let active = self.active_process()?;
        self.link_process_to_list(active, semaphore)?;
        let next = self.pick_top_process()?;
        self.transfer_to(next)
    }

    /// Stop the active process and run the best waiting one.
    pub(crate) fn suspend_active(&mut self) -> Result<(), VmError> {
        let next = self.pick_top_process()?;
        self.transfer_to(next)
    }
}
