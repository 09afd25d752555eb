//! Tasks and the ready list.
//!
//! Grounded on the teacher's `task.rs` (the `TaskCb`/`TaskSt` state machine,
//! `unlock_cpu_and_check_preemption`, `choose_next_running_task`) and
//! `task/readyqueue.rs` (the `Queue` interface: push/pop/reorder by
//! priority). The teacher's ready queue is a bitmap-segregated structure
//! sized for a few hundred priority levels; this kernel follows spec.md
//! §4.1's literal design instead — a single priority-ordered list with a
//! cached `nominal_tail` — since that is the one the testable properties
//! (spec.md §8, invariant 1) are written against. Per spec.md §9, the
//! teacher's intrusive pointers become index links stored inline in
//! [`TaskRuntime`] and reused by whichever list (ready list, or a
//! semaphore/mutex/message waiter list) currently holds the task, since a
//! task is a member of at most one such list at a time.
use arrayvec::ArrayVec;
use bitflags::bitflags;

use crate::{
    cfg::{SystemCfg, MAX_MUTEXES, MAX_TASKS, MSG_PRIORITY_LEVELS},
    error::{BadContextError, BadIdError, Violation},
    klock::{self, CpuLockGuard},
    platform::Platform,
};

/// A task identifier: the statically declared ordinal, 0-based internally
/// (spec.md §3 describes tasks as numbered `1..N`; application-facing
/// constructors add the offset back, see [`TaskId::from_ordinal`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TaskId(pub u8);

impl TaskId {
    pub fn from_ordinal(ordinal: u8) -> Result<Self, BadIdError> {
        if ordinal == 0 {
            return Err(BadIdError::BadId);
        }
        Ok(TaskId(ordinal - 1))
    }

    pub fn ordinal(self) -> u8 {
        self.0 + 1
    }

    fn check<Cfg: SystemCfg>(self) -> Result<Self, BadIdError> {
        if (self.0 as usize) < Cfg::NUM_TASKS {
            Ok(self)
        } else {
            Err(BadIdError::BadId)
        }
    }
}

bitflags! {
    /// Why a task is not on the ready list. At most one bit other than
    /// `NOT_LAUNCHED` is meaningful at a time (spec.md §3: "exactly one of
    /// {on ready list, on a waiter list, ...} holds").
    #[derive(Default)]
    pub struct BlockFlags: u16 {
        const NOT_LAUNCHED  = 1 << 0;
        const ASLEEP        = 1 << 1;
        const BOP           = 1 << 2;
        const BOP_TIMEOUT   = 1 << 3;
        const MSG           = 1 << 4;
        const MSG_TIMEOUT   = 1 << 5;
        const SEMA          = 1 << 6;
        const SEMA_TIMEOUT  = 1 << 7;
        const POOL          = 1 << 8;
        const POOL_TIMEOUT  = 1 << 9;
    }
}

bitflags! {
    #[derive(Default)]
    pub struct StatusFlags: u8 {
        const TIMER_RUNNING = 1 << 0;
        const BOP_LOCKED    = 1 << 1;
    }
}

/// Statically declared, immutable per-task attributes (spec.md §6's task
/// table: id, entry, stack region, initial priority).
#[derive(Debug, Clone, Copy)]
pub struct TaskAttr {
    pub entry: fn(usize),
    pub entry_param: usize,
    pub stack_base: usize,
    pub stack_size: usize,
    pub base_priority: u8,
}

/// A task control block. Only the immutable [`TaskAttr`] lives here; all
/// mutable state lives in the corresponding [`TaskRuntime`] slot inside
/// [`crate::klock::KernelState`], where it is already covered by CPU Lock.
pub struct TaskCb<Cfg: SystemCfg> {
    pub attr: TaskAttr,
    _marker: core::marker::PhantomData<Cfg>,
}

impl<Cfg: SystemCfg> TaskCb<Cfg> {
    pub const fn new(attr: TaskAttr) -> Self {
        Self {
            attr,
            _marker: core::marker::PhantomData,
        }
    }
}

/// A single message-inbox FIFO, as an index-linked list over the global
/// message-block pool (see `message.rs`).
#[derive(Debug, Clone, Copy, Default)]
pub struct InboxQueue {
    pub head: Option<u16>,
    pub tail: Option<u16>,
}

/// The mutable state of one task (spec.md §3's TCB fields, minus the
/// immutable attributes already in [`TaskAttr`]).
#[derive(Debug, Clone, Copy)]
pub struct TaskRuntime {
    pub state: TaskState,
    pub priority: u8,
    pub priority_restore_prioritized: Option<u8>,
    pub priority_restore_inherited: Option<u8>,
    pub block_flags: BlockFlags,
    pub status: StatusFlags,
    pub bop_key: u16,
    pub bop_pending: bool,
    /// The stack pointer `Platform::prepare_stack` handed back at the most
    /// recent `launch` (spec.md §4.1). Ports that carry their own call
    /// stack (e.g. one OS thread per task) use this only to smuggle the
    /// per-launch `parm` through to the spawned thread.
    pub initial_sp: usize,
    pub abort_message_priority: Option<u8>,
    pub inbox: [InboxQueue; MSG_PRIORITY_LEVELS],
    pub held_mutexes: ArrayVec<u8, MAX_MUTEXES>,
    pub waiting_on_mutex: Option<u8>,
    pub waiting_on_sema: Option<u8>,
    /// Set while blocked in `pool_allocate_w/t` (there is exactly one pool
    /// in this kernel, the particle pool, so no id is needed).
    pub waiting_on_pool: bool,
    pub wake_reason: WakeReason,
    /// Intrusive link, reused by the ready list or whichever waiter list
    /// currently contains this task.
    pub(crate) link_next: Option<TaskId>,
    pub(crate) link_prev: Option<TaskId>,
}

impl TaskRuntime {
    pub const fn new(base_priority: u8) -> Self {
        Self {
            state: TaskState::NotLaunched,
            priority: base_priority,
            priority_restore_prioritized: None,
            priority_restore_inherited: None,
            block_flags: BlockFlags::NOT_LAUNCHED,
            status: StatusFlags::empty(),
            bop_key: 0,
            bop_pending: false,
            initial_sp: 0,
            abort_message_priority: None,
            inbox: [InboxQueue { head: None, tail: None }; MSG_PRIORITY_LEVELS],
            held_mutexes: ArrayVec::new_const(),
            waiting_on_mutex: None,
            waiting_on_sema: None,
            waiting_on_pool: false,
            wake_reason: WakeReason::Normal,
            link_next: None,
            link_prev: None,
        }
    }
}

/// Why a blocked task was returned to the ready list. Set by whichever
/// module woke it (`bop.rs`, `semaphore.rs`, `message.rs`, `timer.rs`) and
/// consumed by the waiter once it runs again, so a single wait call can
/// distinguish "woken normally", "timed out", and "aborted by an incoming
/// message" (spec.md §4.2, §5 "Cancellation").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WakeReason {
    Normal,
    Timeout,
    MsgAbort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    NotLaunched,
    /// On the ready list (this includes the currently running task, which
    /// is always the list's head — spec.md §5).
    Ready,
    /// On some waiter list, or on the timer list for a sleep.
    Waiting,
}

/// A priority-ordered, FIFO-within-priority intrusive list of tasks,
/// threaded through [`TaskRuntime::link_next`]/`link_prev`. Used both as
/// the ready list and as each semaphore/mutex/message waiter list.
#[derive(Debug, Clone, Copy, Default)]
pub struct PriorityTaskList {
    head: Option<TaskId>,
    tail: Option<TaskId>,
    /// Caches the tail of the run of nodes sharing the current tail's
    /// priority, so appending another task at that same priority (the
    /// common case) is O(1) instead of a full scan (spec.md §4.1).
    nominal_tail: Option<TaskId>,
}

impl PriorityTaskList {
    pub const fn new() -> Self {
        Self { head: None, tail: None, nominal_tail: None }
    }

    pub fn head(&self) -> Option<TaskId> {
        self.head
    }

    pub fn is_empty(&self) -> bool {
        self.head.is_none()
    }

    /// Insert `tid` (whose priority is `rt(tid).priority`) into the list,
    /// after any existing tasks of equal-or-higher priority, preserving
    /// FIFO order within a priority band.
    pub fn insert<Cfg: SystemCfg>(&mut self, rt: &mut [TaskRuntime; MAX_TASKS], tid: TaskId) {
        let priority = rt[tid.0 as usize].priority;
        debug_assert!(rt[tid.0 as usize].link_next.is_none() && rt[tid.0 as usize].link_prev.is_none());

        // Fast path: append after the current nominal-priority tail.
        if let Some(tail) = self.tail {
            if rt[tail.0 as usize].priority <= priority {
                self.link_after(rt, tail, tid);
                if rt[tail.0 as usize].priority == priority {
                    self.nominal_tail = Some(tid);
                }
                self.tail = Some(tid);
                return;
            }
        }

        // General path: scan from head, stop at the first node of
        // strictly lower priority (higher numeric value) than `tid`.
        let mut cursor = self.head;
        let mut prev: Option<TaskId> = None;
        while let Some(cur) = cursor {
            if rt[cur.0 as usize].priority > priority {
                break;
            }
            prev = Some(cur);
            cursor = rt[cur.0 as usize].link_next;
        }
        self.insert_between(rt, prev, cursor, tid);
    }

    fn link_after(&mut self, rt: &mut [TaskRuntime; MAX_TASKS], after: TaskId, tid: TaskId) {
        let next = rt[after.0 as usize].link_next;
        rt[tid.0 as usize].link_prev = Some(after);
        rt[tid.0 as usize].link_next = next;
        if let Some(next) = next {
            rt[next.0 as usize].link_prev = Some(tid);
        }
        rt[after.0 as usize].link_next = Some(tid);
    }

    fn insert_between(
        &mut self,
        rt: &mut [TaskRuntime; MAX_TASKS],
        prev: Option<TaskId>,
        next: Option<TaskId>,
        tid: TaskId,
    ) {
        rt[tid.0 as usize].link_prev = prev;
        rt[tid.0 as usize].link_next = next;
        match prev {
            Some(p) => rt[p.0 as usize].link_next = Some(tid),
            None => self.head = Some(tid),
        }
        match next {
            Some(n) => rt[n.0 as usize].link_prev = Some(tid),
            None => self.tail = Some(tid),
        }
        if next.is_none() {
            self.nominal_tail = Some(tid);
        }
    }

    pub fn remove(&mut self, rt: &mut [TaskRuntime; MAX_TASKS], tid: TaskId) {
        let prev = rt[tid.0 as usize].link_prev;
        let next = rt[tid.0 as usize].link_next;
        match prev {
            Some(p) => rt[p.0 as usize].link_next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => rt[n.0 as usize].link_prev = prev,
            None => self.tail = prev,
        }
        if self.nominal_tail == Some(tid) {
            self.nominal_tail = prev;
        }
        rt[tid.0 as usize].link_next = None;
        rt[tid.0 as usize].link_prev = None;
    }

    /// Remove and re-insert `tid`, e.g. after its priority changed.
    pub fn reorder<Cfg: SystemCfg>(&mut self, rt: &mut [TaskRuntime; MAX_TASKS], tid: TaskId) {
        self.remove(rt, tid);
        self.insert::<Cfg>(rt, tid);
    }

    /// Does any ready task have a priority numerically at or below (i.e.
    /// at least as urgent as) `ceiling`?
    pub fn has_task_at_or_above(&self, rt: &[TaskRuntime; MAX_TASKS], ceiling: u8) -> bool {
        match self.head {
            Some(h) => rt[h.0 as usize].priority <= ceiling,
            None => false,
        }
    }

    pub fn iter<'a>(&'a self, rt: &'a [TaskRuntime; MAX_TASKS]) -> PriorityTaskListIter<'a> {
        PriorityTaskListIter { rt, cursor: self.head }
    }
}

pub struct PriorityTaskListIter<'a> {
    rt: &'a [TaskRuntime; MAX_TASKS],
    cursor: Option<TaskId>,
}

impl<'a> Iterator for PriorityTaskListIter<'a> {
    type Item = TaskId;
    fn next(&mut self) -> Option<TaskId> {
        let cur = self.cursor?;
        self.cursor = self.rt[cur.0 as usize].link_next;
        Some(cur)
    }
}

/// The ready list proper: a [`PriorityTaskList`] plus the fixed-size
/// per-task runtime array it threads through.
pub struct ReadyList<Cfg: SystemCfg> {
    pub list: PriorityTaskList,
    pub rt: [TaskRuntime; MAX_TASKS],
    _marker: core::marker::PhantomData<Cfg>,
}

impl<Cfg: SystemCfg> ReadyList<Cfg> {
    pub const fn new() -> Self {
        Self {
            list: PriorityTaskList::new(),
            rt: [TaskRuntime::new(0); MAX_TASKS],
            _marker: core::marker::PhantomData,
        }
    }

    pub fn rt(&self, tid: TaskId) -> &TaskRuntime {
        &self.rt[tid.0 as usize]
    }

    pub fn rt_mut(&mut self, tid: TaskId) -> &mut TaskRuntime {
        &mut self.rt[tid.0 as usize]
    }

    /// Insert `tid` into the ready list proper. A thin wrapper so call
    /// sites don't need to name `self.list`/`self.rt` separately — doing
    /// so through a re-borrowed [`crate::klock::CpuLockGuard`] would
    /// require dereferencing it twice in one expression.
    pub fn insert_ready(&mut self, tid: TaskId) {
        self.list.insert::<Cfg>(&mut self.rt, tid);
    }

    pub fn remove_ready(&mut self, tid: TaskId) {
        self.list.remove(&mut self.rt, tid);
    }

    pub fn reorder_ready(&mut self, tid: TaskId) {
        self.list.reorder::<Cfg>(&mut self.rt, tid);
    }
}

impl<Cfg: SystemCfg> System<Cfg> {
    /// Get the statically declared id for the calling task. Only valid
    /// from a task context.
    pub fn current_task_id(lock: &CpuLockGuard<'_, Cfg>) -> Option<TaskId> {
        lock.running
    }
}

/// The `exit` a prepared stack falls through to if a task's `entry` ever
/// returns, monomorphized per `Cfg` so it can be named as a plain `fn()`
/// (spec.md:166 requires `prepare_stack`'s `exit` argument has that shape).
fn task_exit_trampoline<Cfg: SystemCfg + Platform>() {
    let _ = System::<Cfg>::exit_running();
}

/// A zero-sized facade tying generic kernel operations to one `Cfg`, named
/// after the teacher's `System<Traits>`.
pub struct System<Cfg>(core::marker::PhantomData<Cfg>);

impl<Cfg: SystemCfg + Platform> System<Cfg> {
    /// Implements the task API's `launch(tid, parm)`: prepares the task's
    /// stack via the platform hook so its entry function is invoked with
    /// `parm` (spec.md §4.1), then adds it to the ready list.
    pub fn launch(tid: TaskId, parm: usize) -> Result<(), Violation> {
        let tid = tid.check::<Cfg>().map_err(|_| Violation::BadId)?;
        let mut lock = klock::lock_cpu::<Cfg>();
        {
            let rt = lock.ready_list.rt_mut(tid);
            if rt.state != TaskState::NotLaunched {
                return Err(Violation::AlreadyBlocked);
            }
            let attr = Cfg::task_cb(tid.0).attr;
            let initial_sp =
                Cfg::prepare_stack(attr.stack_base, attr.stack_size, attr.entry, task_exit_trampoline::<Cfg>, parm);
            rt.state = TaskState::Ready;
            rt.block_flags = BlockFlags::empty();
            rt.priority = attr.base_priority;
            rt.initial_sp = initial_sp;
        }
        lock.ready_list.insert_ready(tid);
        unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Implements `exit_running()`.
    pub fn exit_running() -> Result<(), BadContextError> {
        let mut lock = klock::lock_cpu::<Cfg>();
        let tid = lock.running.ok_or(BadContextError::BadContext)?;
        lock.ready_list.remove_ready(tid);
        {
            let rt = lock.ready_list.rt_mut(tid);
            rt.state = TaskState::NotLaunched;
            rt.block_flags = BlockFlags::NOT_LAUNCHED;
        }
        crate::semaphore::abandon_held_mutexes::<Cfg>(&mut lock, tid);
        crate::particle::abandon_pool_wait::<Cfg>(&mut lock, tid);
        lock.running = None;
        unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Implements `kill(tid)` — forcible removal from another context.
    pub fn kill(tid: TaskId) -> Result<(), Violation> {
        let tid = tid.check::<Cfg>().map_err(|_| Violation::BadId)?;
        let mut lock = klock::lock_cpu::<Cfg>();
        {
            let state = lock.ready_list.rt(tid).state;
            match state {
                TaskState::NotLaunched => return Ok(()),
                TaskState::Ready => lock.ready_list.remove_ready(tid),
                // A blocked task is either on no list at all (BOP, message,
                // or sleep waits don't use one) or on a semaphore/mutex
                // waiter list; `abandon_held_mutexes`, called next, detaches
                // it from the latter via `waiting_on_sema`/`waiting_on_mutex`.
                TaskState::Waiting => {}
            }
        }
        crate::timer::cancel_all_for_task::<Cfg>(&mut lock, tid);
        crate::semaphore::abandon_held_mutexes::<Cfg>(&mut lock, tid);
        crate::particle::abandon_pool_wait::<Cfg>(&mut lock, tid);
        {
            let rt = lock.ready_list.rt_mut(tid);
            rt.state = TaskState::NotLaunched;
            rt.block_flags = BlockFlags::NOT_LAUNCHED;
            rt.bop_key = rt.bop_key.wrapping_add(1);
        }
        if lock.running == Some(tid) {
            lock.running = None;
        }
        unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// Implements `change_priority(tid, new)`.
    pub fn change_priority(tid: TaskId, new_priority: u8) -> Result<(), Violation> {
        let tid = tid.check::<Cfg>().map_err(|_| Violation::BadId)?;
        let mut lock = klock::lock_cpu::<Cfg>();
        lock.ready_list.rt_mut(tid).priority = new_priority;
        if lock.ready_list.rt(tid).state == TaskState::Ready {
            lock.ready_list.reorder_ready(tid);
        }
        // Waiting on a semaphore: re-position in that waiter list too.
        crate::semaphore::reposition_waiter::<Cfg>(&mut lock, tid);
        unlock_cpu_and_check_preemption(lock);
        Ok(())
    }

    /// `prioritize()` — temporarily raise the running task to the
    /// guaranteed-highest priority, creating a critical section that may
    /// outlive a single CPU Lock span (spec.md §4.1, §9 "Prioritize").
    pub fn prioritize(lock: &mut CpuLockGuard<'_, Cfg>) -> Result<(), Violation> {
        let tid = lock.running.ok_or(Violation::NotOnReadyList)?;
        let rt = lock.ready_list.rt_mut(tid);
        if rt.priority_restore_prioritized.is_some() {
            return Err(Violation::UnbalancedPrioritize);
        }
        rt.priority_restore_prioritized = Some(rt.priority);
        rt.priority = Cfg::GUARANTEED_HIGHEST_PRIORITY;
        lock.ready_list.reorder_ready(tid);
        Ok(())
    }

    /// `unprioritize()` — restore the priority saved by the matching
    /// `prioritize()`.
    pub fn unprioritize(lock: &mut CpuLockGuard<'_, Cfg>) -> Result<(), Violation> {
        let tid = lock.running.ok_or(Violation::NotOnReadyList)?;
        let rt = lock.ready_list.rt_mut(tid);
        let restore = rt.priority_restore_prioritized.take().ok_or(Violation::UnbalancedPrioritize)?;
        rt.priority = restore;
        lock.ready_list.reorder_ready(tid);
        Ok(())
    }

    /// Raise `tid`'s priority to `new_priority` (priority inheritance, or
    /// the send-then-wait boost in `message.rs`), saving the prior value
    /// if none is already saved. A no-op if `tid` is already at or above
    /// `new_priority`.
    pub fn boost_to(lock: &mut CpuLockGuard<'_, Cfg>, tid: TaskId, new_priority: u8) {
        let rt = lock.ready_list.rt_mut(tid);
        if rt.priority <= new_priority {
            return;
        }
        if rt.priority_restore_inherited.is_none() {
            rt.priority_restore_inherited = Some(rt.priority);
        }
        rt.priority = new_priority;
        if lock.ready_list.rt(tid).state == TaskState::Ready {
            lock.ready_list.reorder_ready(tid);
        }
        crate::semaphore::reposition_waiter::<Cfg>(lock, tid);
    }

    /// `self_tid()`.
    pub fn self_tid() -> Option<TaskId> {
        let lock = klock::lock_cpu::<Cfg>();
        lock.running
    }

    /// `sleep(ticks)` — block the calling task until `ticks` ticks pass.
    pub fn sleep(ticks: u32) -> Result<(), BadContextError> {
        let tid = {
            let lock = klock::lock_cpu::<Cfg>();
            lock.running.ok_or(BadContextError::BadContext)?
        };
        crate::timer::start_wake_timer::<Cfg>(tid, ticks);
        let mut lock = klock::lock_cpu::<Cfg>();
        block_running_task(&mut lock, tid, BlockFlags::ASLEEP, None);
        unlock_cpu_and_check_preemption(lock);
        Cfg::reschedule();
        crate::timer::cancel_wake_timer::<Cfg>(tid);
        Ok(())
    }

    /// `yield()` — give up the CPU to any other ready task of the same
    /// priority, without changing this task's position relative to tasks
    /// of a different priority (re-inserted at the tail of its own
    /// priority band).
    pub fn yield_now() -> Result<(), BadContextError> {
        let mut lock = klock::lock_cpu::<Cfg>();
        let tid = lock.running.ok_or(BadContextError::BadContext)?;
        lock.ready_list.reorder_ready(tid);
        unlock_cpu_and_check_preemption(lock);
        Cfg::reschedule();
        Ok(())
    }

    /// Undo the most recent [`Self::boost_to`] on `tid`, restoring its
    /// saved priority. A no-op if nothing is saved.
    pub fn unboost(lock: &mut CpuLockGuard<'_, Cfg>, tid: TaskId) {
        let rt = lock.ready_list.rt_mut(tid);
        let restore = match rt.priority_restore_inherited.take() {
            Some(p) => p,
            None => return,
        };
        rt.priority = restore;
        if lock.ready_list.rt(tid).state == TaskState::Ready {
            lock.ready_list.reorder_ready(tid);
        }
        crate::semaphore::reposition_waiter::<Cfg>(lock, tid);
    }
}

/// After a kernel operation modifies the ready list while CPU Lock is
/// held, release the lock and, if the ready-list head changed in a way
/// that outranks the task that was running when the lock was taken,
/// request a context switch. Mirrors the teacher's function of the same
/// name in `task.rs`.
pub fn unlock_cpu_and_check_preemption<Cfg: SystemCfg + Platform>(mut lock: CpuLockGuard<'_, Cfg>) {
    let should_switch = match lock.running {
        Some(running) if lock.ready_list.rt(running).state == TaskState::Ready => {
            // The running task is still runnable: only switch if something
            // strictly higher-priority jumped ahead of it.
            match lock.ready_list.list.head() {
                Some(head) if head != running => {
                    lock.ready_list.rt(head).priority < lock.ready_list.rt(running).priority
                }
                _ => false,
            }
        }
        // The running task just blocked or exited: it cannot continue, so
        // a switch (possibly to the idle/background context, if the ready
        // list is now empty) is mandatory.
        Some(_) | None => true,
    };
    drop(lock);
    if should_switch {
        Cfg::reschedule();
    }
}

/// Remove the calling task from the ready list and mark it waiting.
/// Shared by `bop.rs`, `semaphore.rs`, `message.rs`, and a task's own
/// `sleep()`.
pub(crate) fn block_running_task<Cfg: SystemCfg>(
    lock: &mut CpuLockGuard<'_, Cfg>,
    tid: TaskId,
    flags: BlockFlags,
    abort_priority: Option<u8>,
) {
    lock.ready_list.remove_ready(tid);
    let rt = lock.ready_list.rt_mut(tid);
    rt.state = TaskState::Waiting;
    rt.block_flags = flags;
    rt.abort_message_priority = abort_priority;
}

/// Return `tid` to the ready list after its wait completes, recording why.
pub(crate) fn wake_task<Cfg: SystemCfg>(lock: &mut CpuLockGuard<'_, Cfg>, tid: TaskId, reason: WakeReason) {
    let rt = lock.ready_list.rt_mut(tid);
    rt.state = TaskState::Ready;
    rt.block_flags = BlockFlags::empty();
    rt.abort_message_priority = None;
    rt.wake_reason = reason;
    lock.ready_list.insert_ready(tid);
}

/// Called by the port's dispatcher: pick the ready list's head as the new
/// running task.
pub fn choose_next_running_task<Cfg: SystemCfg + Platform>(lock: &mut CpuLockGuard<'_, Cfg>) -> Option<TaskId> {
    lock.running = lock.ready_list.list.head();
    lock.running
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestCfg;
    use quickcheck_macros::quickcheck;

    #[test]
    fn launch_twice_is_rejected_then_kill_allows_relaunch() {
        TestCfg::reset();
        let tid = TaskId(0);
        System::<TestCfg>::launch(tid, 0).unwrap();
        assert_eq!(System::<TestCfg>::launch(tid, 0), Err(Violation::AlreadyBlocked));

        System::<TestCfg>::kill(tid).unwrap();
        assert_eq!(klock::lock_cpu::<TestCfg>().ready_list.rt(tid).state, TaskState::NotLaunched);
        System::<TestCfg>::launch(tid, 0).unwrap();
        assert_eq!(klock::lock_cpu::<TestCfg>().ready_list.rt(tid).state, TaskState::Ready);
    }

    #[test]
    fn change_priority_reorders_the_ready_list() {
        TestCfg::reset();
        let low = TaskId(0);
        let high = TaskId(1);
        System::<TestCfg>::launch(low, 0).unwrap();
        System::<TestCfg>::launch(high, 0).unwrap();
        // Both launch at TestCfg's base_priority (4), so `low` (launched
        // first) starts at the ready list's head.
        assert_eq!(klock::lock_cpu::<TestCfg>().ready_list.list.head(), Some(low));

        System::<TestCfg>::change_priority(high, 1).unwrap();
        assert_eq!(klock::lock_cpu::<TestCfg>().ready_list.list.head(), Some(high));
    }

    /// Property backing invariant 1 (spec.md §8): however tasks are
    /// inserted, the list is always sorted ascending by priority.
    #[quickcheck]
    fn ready_list_stays_sorted_by_priority(priorities: Vec<u8>) {
        let n = priorities.len().min(MAX_TASKS);
        let mut rt = [TaskRuntime::new(0); MAX_TASKS];
        let mut list = PriorityTaskList::new();
        for (i, &p) in priorities.iter().take(n).enumerate() {
            rt[i].priority = p;
            list.insert::<TestCfg>(&mut rt, TaskId(i as u8));
        }
        let mut last = None;
        for tid in list.iter(&rt) {
            let p = rt[tid.0 as usize].priority;
            if let Some(last) = last {
                assert!(p >= last);
            }
            last = Some(p);
        }
    }
}
