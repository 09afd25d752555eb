//! Counting semaphores and priority-inheriting mutexes (spec.md §4.4).
//!
//! Grounded on the teacher's `semaphore.rs` (`SemaphoreCb`, `poll_core`,
//! `wait_one`/`wait_one_timeout`, `signal` — the split between a
//! non-blocking poll, a blocking wait built on top of it, and a release
//! that hands ownership straight to the highest-priority waiter). A
//! mutex is, per spec.md §3, "a semaphore with initial count 1 and
//! priority-inheritance enabled"; this module keeps semaphores and
//! mutexes as separate typed tables (matching [`crate::cfg::SystemCfg`]'s
//! separate `NUM_SEMAPHORES`/`NUM_MUTEXES` configuration and
//! `semaphore_cb`/`mutex_cb` accessors) but shares the waiter-list and
//! wait/release mechanics between them.
use crate::{
    cfg::{SystemCfg, MAX_MUTEXES, MAX_SEMAPHORES},
    error::{BadIdError, LockError, WaitError},
    klock::{self, CpuLockGuard},
    platform::Platform,
    task::{self, BlockFlags, PriorityTaskList, TaskId, TaskState, WakeReason},
};

/// A counting semaphore's identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SemaphoreId(u8);

impl SemaphoreId {
    pub fn ordinal(self) -> u8 {
        self.0 + 1
    }

    fn check<Cfg: SystemCfg>(self) -> Result<Self, BadIdError> {
        if (self.0 as usize) < Cfg::NUM_SEMAPHORES {
            Ok(self)
        } else {
            Err(BadIdError::BadId)
        }
    }
}

/// A mutex's identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MutexId(u8);

impl MutexId {
    pub fn ordinal(self) -> u8 {
        self.0 + 1
    }

    fn check<Cfg: SystemCfg>(self) -> Result<Self, BadIdError> {
        if (self.0 as usize) < Cfg::NUM_MUTEXES {
            Ok(self)
        } else {
            Err(BadIdError::BadId)
        }
    }
}

/// Statically declared semaphore attributes.
#[derive(Debug, Clone, Copy)]
pub struct SemaphoreAttr {
    pub initial_count: u32,
}

pub struct SemaphoreCb<Cfg: SystemCfg> {
    attr: SemaphoreAttr,
    _marker: core::marker::PhantomData<Cfg>,
}

impl<Cfg: SystemCfg> SemaphoreCb<Cfg> {
    pub const fn new(initial_count: u32) -> Self {
        Self { attr: SemaphoreAttr { initial_count }, _marker: core::marker::PhantomData }
    }
}

pub struct MutexCb<Cfg: SystemCfg> {
    _marker: core::marker::PhantomData<Cfg>,
}

impl<Cfg: SystemCfg> MutexCb<Cfg> {
    pub const fn new() -> Self {
        Self { _marker: core::marker::PhantomData }
    }
}

#[derive(Debug, Clone, Copy)]
struct SemaphoreRuntime {
    count: u32,
    waiters: PriorityTaskList,
}

impl SemaphoreRuntime {
    const fn new() -> Self {
        Self { count: 0, waiters: PriorityTaskList::new() }
    }
}

#[derive(Debug, Clone, Copy)]
struct MutexRuntime {
    owner: Option<TaskId>,
    waiters: PriorityTaskList,
}

impl MutexRuntime {
    const fn new() -> Self {
        Self { owner: None, waiters: PriorityTaskList::new() }
    }
}

pub struct SemaphoreTable<Cfg: SystemCfg> {
    entries: [SemaphoreRuntime; MAX_SEMAPHORES],
    _marker: core::marker::PhantomData<Cfg>,
}

impl<Cfg: SystemCfg> SemaphoreTable<Cfg> {
    pub const fn new() -> Self {
        Self { entries: [SemaphoreRuntime::new(); MAX_SEMAPHORES], _marker: core::marker::PhantomData }
    }

    pub fn init(&mut self) {
        for i in 0..Cfg::NUM_SEMAPHORES {
            self.entries[i].count = Cfg::semaphore_cb(i as u8).attr.initial_count;
            self.entries[i].waiters = PriorityTaskList::new();
        }
    }
}

pub struct MutexTable<Cfg: SystemCfg> {
    entries: [MutexRuntime; MAX_MUTEXES],
    _marker: core::marker::PhantomData<Cfg>,
}

impl<Cfg: SystemCfg> MutexTable<Cfg> {
    pub const fn new() -> Self {
        Self { entries: [MutexRuntime::new(); MAX_MUTEXES], _marker: core::marker::PhantomData }
    }

    pub fn init(&mut self) {
        for i in 0..Cfg::NUM_MUTEXES {
            self.entries[i] = MutexRuntime::new();
        }
    }
}

// These live on `KernelState` itself (not `SemaphoreTable`/`MutexTable`)
// because a waiter-list operation always touches both a table entry and
// `ready_list.rt` together; going through `CpuLockGuard`'s `Deref`/`DerefMut`
// twice in one expression (once for the table, once for `ready_list`) is
// two opaque calls the borrow checker can't prove disjoint, even though the
// underlying fields are. Projecting plain fields off one concrete `&mut
// KernelState` sidesteps that entirely.
impl<Cfg: SystemCfg> crate::klock::KernelState<Cfg> {
    fn sema_waiter_insert(&mut self, sema: SemaphoreId, tid: TaskId) {
        self.sema_table.entries[sema.0 as usize].waiters.insert::<Cfg>(&mut self.ready_list.rt, tid);
    }

    fn sema_waiter_remove(&mut self, sema: SemaphoreId, tid: TaskId) {
        self.sema_table.entries[sema.0 as usize].waiters.remove(&mut self.ready_list.rt, tid);
    }

    fn sema_waiter_reorder(&mut self, sema: SemaphoreId, tid: TaskId) {
        self.sema_table.entries[sema.0 as usize].waiters.reorder::<Cfg>(&mut self.ready_list.rt, tid);
    }

    fn mutex_waiter_insert(&mut self, mutex: MutexId, tid: TaskId) {
        self.mutex_table.entries[mutex.0 as usize].waiters.insert::<Cfg>(&mut self.ready_list.rt, tid);
    }

    fn mutex_waiter_remove(&mut self, mutex: MutexId, tid: TaskId) {
        self.mutex_table.entries[mutex.0 as usize].waiters.remove(&mut self.ready_list.rt, tid);
    }

    fn mutex_waiter_reorder(&mut self, mutex: MutexId, tid: TaskId) {
        self.mutex_table.entries[mutex.0 as usize].waiters.reorder::<Cfg>(&mut self.ready_list.rt, tid);
    }
}

/// `sema_get_w(sema, abort_pri)` — decrement if available, else block on
/// the semaphore's priority-ordered waiter list.
pub fn sema_get_w<Cfg: SystemCfg + Platform>(
    sema: SemaphoreId,
    abort_priority: Option<u8>,
) -> Result<WaitError, BadIdError> {
    let sema = sema.check::<Cfg>()?;
    let mut lock = klock::lock_cpu::<Cfg>();
    if lock.sema_table.entries[sema.0 as usize].count > 0 {
        lock.sema_table.entries[sema.0 as usize].count -= 1;
        return Ok(WaitError::OkNoBlock);
    }
    let tid = lock.running.expect("sema_get called outside task context");
    lock.sema_waiter_insert(sema, tid);
    lock.ready_list.rt_mut(tid).waiting_on_sema = Some(sema.0);
    task::block_running_task(&mut lock, tid, BlockFlags::SEMA, abort_priority);
    task::unlock_cpu_and_check_preemption(lock);
    Cfg::reschedule();

    let mut lock = klock::lock_cpu::<Cfg>();
    lock.ready_list.rt_mut(tid).waiting_on_sema = None;
    Ok(match lock.ready_list.rt(tid).wake_reason {
        WakeReason::Normal => WaitError::OkBlock,
        WakeReason::Timeout => WaitError::Timeout,
        WakeReason::MsgAbort => WaitError::MsgAbort,
    })
}

/// `sema_get_t(sema, abort_pri, ticks)` — as `sema_get_w`, with a timeout.
pub fn sema_get_t<Cfg: SystemCfg + Platform>(
    sema: SemaphoreId,
    abort_priority: Option<u8>,
    ticks: u32,
) -> Result<WaitError, BadIdError> {
    let sema = sema.check::<Cfg>()?;
    let mut lock = klock::lock_cpu::<Cfg>();
    if lock.sema_table.entries[sema.0 as usize].count > 0 {
        lock.sema_table.entries[sema.0 as usize].count -= 1;
        return Ok(WaitError::OkNoBlock);
    }
    let tid = lock.running.expect("sema_get called outside task context");
    drop(lock);

    crate::timer::start_wake_timer::<Cfg>(tid, ticks);
    let mut lock = klock::lock_cpu::<Cfg>();
    lock.sema_waiter_insert(sema, tid);
    lock.ready_list.rt_mut(tid).waiting_on_sema = Some(sema.0);
    task::block_running_task(&mut lock, tid, BlockFlags::SEMA_TIMEOUT, abort_priority);
    task::unlock_cpu_and_check_preemption(lock);
    Cfg::reschedule();
    crate::timer::cancel_wake_timer::<Cfg>(tid);

    let mut lock = klock::lock_cpu::<Cfg>();
    lock.ready_list.rt_mut(tid).waiting_on_sema = None;
    Ok(match lock.ready_list.rt(tid).wake_reason {
        WakeReason::Normal => WaitError::OkBlock,
        WakeReason::Timeout => WaitError::Timeout,
        WakeReason::MsgAbort => WaitError::MsgAbort,
    })
}

/// `sema_release(sema)` — hand the count straight to the
/// highest-priority waiter, if any, else increment the count.
pub fn sema_release<Cfg: SystemCfg + Platform>(sema: SemaphoreId) -> Result<(), BadIdError> {
    let sema = sema.check::<Cfg>()?;
    let mut lock = klock::lock_cpu::<Cfg>();
    match lock.sema_table.entries[sema.0 as usize].waiters.head() {
        Some(waiter) => {
            lock.sema_waiter_remove(sema, waiter);
            task::wake_task(&mut lock, waiter, WakeReason::Normal);
        }
        None => lock.sema_table.entries[sema.0 as usize].count += 1,
    }
    task::unlock_cpu_and_check_preemption(lock);
    Ok(())
}

/// `sema_count_get(sema)`.
pub fn sema_count_get<Cfg: SystemCfg + Platform>(sema: SemaphoreId) -> Result<u32, BadIdError> {
    let sema = sema.check::<Cfg>()?;
    let lock = klock::lock_cpu::<Cfg>();
    Ok(lock.sema_table.entries[sema.0 as usize].count)
}

/// `mutex_init()` — must run once at boot.
pub fn mutex_init<Cfg: SystemCfg + Platform>() {
    let mut lock = klock::lock_cpu::<Cfg>();
    lock.mutex_table.init();
}

/// `sema_init()` — must run once at boot.
pub fn sema_init<Cfg: SystemCfg + Platform>() {
    let mut lock = klock::lock_cpu::<Cfg>();
    lock.sema_table.init();
}

fn mutex_highest_waiter_priority<Cfg: SystemCfg>(lock: &CpuLockGuard<'_, Cfg>, mutex: MutexId) -> Option<u8> {
    lock.mutex_table.entries[mutex.0 as usize].waiters.head().map(|w| lock.ready_list.rt(w).priority)
}

/// Boost `holder` to `requester_priority` and, if `holder` is itself
/// blocked waiting on another mutex, follow that mutex to its owner and
/// boost again, and so on — spec.md §9's "implementers should handle
/// transitive boosting to at least two levels". Bounded by
/// `MAX_MUTEXES` since a well-formed lock order graph is acyclic and at
/// most that many mutexes can appear in one chain.
fn propagate_inheritance<Cfg: SystemCfg + Platform>(
    lock: &mut CpuLockGuard<'_, Cfg>,
    mut holder: TaskId,
    requester_priority: u8,
) {
    for _ in 0..MAX_MUTEXES {
        if lock.ready_list.rt(holder).priority <= requester_priority {
            return;
        }
        task::System::<Cfg>::boost_to(lock, holder, requester_priority);
        let next = match lock.ready_list.rt(holder).waiting_on_mutex {
            Some(m) => lock.mutex_table.entries[m as usize].owner,
            None => None,
        };
        match next {
            Some(next_holder) if next_holder != holder => holder = next_holder,
            _ => return,
        }
    }
}

/// `mutex_lock_w(mutex)` — acquire if unowned, else inherit priority into
/// the owner (spec.md §4.4's "Priority inheritance") and block.
pub fn mutex_lock_w<Cfg: SystemCfg + Platform>(mutex: MutexId) -> Result<WaitError, BadIdError> {
    let mutex = mutex.check::<Cfg>()?;
    let mut lock = klock::lock_cpu::<Cfg>();
    let tid = lock.running.expect("mutex_lock called outside task context");
    if lock.mutex_table.entries[mutex.0 as usize].owner.is_none() {
        lock.mutex_table.entries[mutex.0 as usize].owner = Some(tid);
        let _ = lock.ready_list.rt_mut(tid).held_mutexes.try_push(mutex.0);
        return Ok(WaitError::OkNoBlock);
    }

    let owner = lock.mutex_table.entries[mutex.0 as usize].owner.unwrap();
    let requester_priority = lock.ready_list.rt(tid).priority;
    propagate_inheritance::<Cfg>(&mut lock, owner, requester_priority);

    lock.mutex_waiter_insert(mutex, tid);
    lock.ready_list.rt_mut(tid).waiting_on_mutex = Some(mutex.0);
    task::block_running_task(&mut lock, tid, BlockFlags::SEMA, None);
    task::unlock_cpu_and_check_preemption(lock);
    Cfg::reschedule();

    let mut lock = klock::lock_cpu::<Cfg>();
    lock.ready_list.rt_mut(tid).waiting_on_mutex = None;
    let _ = lock.ready_list.rt_mut(tid).held_mutexes.try_push(mutex.0);
    Ok(WaitError::OkBlock)
}

/// `mutex_lock_t(mutex, ticks)` — as `mutex_lock_w`, with a timeout.
pub fn mutex_lock_t<Cfg: SystemCfg + Platform>(mutex: MutexId, ticks: u32) -> Result<WaitError, BadIdError> {
    let mutex = mutex.check::<Cfg>()?;
    let mut lock = klock::lock_cpu::<Cfg>();
    let tid = lock.running.expect("mutex_lock called outside task context");
    if lock.mutex_table.entries[mutex.0 as usize].owner.is_none() {
        lock.mutex_table.entries[mutex.0 as usize].owner = Some(tid);
        let _ = lock.ready_list.rt_mut(tid).held_mutexes.try_push(mutex.0);
        return Ok(WaitError::OkNoBlock);
    }
    let owner = lock.mutex_table.entries[mutex.0 as usize].owner.unwrap();
    let requester_priority = lock.ready_list.rt(tid).priority;
    propagate_inheritance::<Cfg>(&mut lock, owner, requester_priority);
    drop(lock);

    crate::timer::start_wake_timer::<Cfg>(tid, ticks);
    let mut lock = klock::lock_cpu::<Cfg>();
    lock.mutex_waiter_insert(mutex, tid);
    lock.ready_list.rt_mut(tid).waiting_on_mutex = Some(mutex.0);
    task::block_running_task(&mut lock, tid, BlockFlags::SEMA_TIMEOUT, None);
    task::unlock_cpu_and_check_preemption(lock);
    Cfg::reschedule();
    crate::timer::cancel_wake_timer::<Cfg>(tid);

    let mut lock = klock::lock_cpu::<Cfg>();
    lock.ready_list.rt_mut(tid).waiting_on_mutex = None;
    match lock.ready_list.rt(tid).wake_reason {
        WakeReason::Normal => {
            let _ = lock.ready_list.rt_mut(tid).held_mutexes.try_push(mutex.0);
            Ok(WaitError::OkBlock)
        }
        WakeReason::Timeout => {
            lock.mutex_waiter_remove(mutex, tid);
            Ok(WaitError::Timeout)
        }
        WakeReason::MsgAbort => {
            lock.mutex_waiter_remove(mutex, tid);
            Ok(WaitError::MsgAbort)
        }
    }
}

/// `mutex_unlock(mutex)` — hand ownership to the highest-priority
/// waiter, restoring the releaser's inherited priority.
pub fn mutex_unlock<Cfg: SystemCfg + Platform>(mutex: MutexId) -> Result<(), LockError> {
    let mutex = mutex.check::<Cfg>()?;
    let mut lock = klock::lock_cpu::<Cfg>();
    let tid = lock.running.expect("mutex_unlock called outside task context");
    if lock.mutex_table.entries[mutex.0 as usize].owner != Some(tid) {
        return Err(LockError::NotOwner);
    }
    release_mutex::<Cfg>(&mut lock, mutex, tid);
    task::unlock_cpu_and_check_preemption(lock);
    Ok(())
}

fn release_mutex<Cfg: SystemCfg + Platform>(lock: &mut CpuLockGuard<'_, Cfg>, mutex: MutexId, owner: TaskId) {
    lock.ready_list.rt_mut(owner).held_mutexes.retain(|&mut m| m != mutex.0);

    match lock.mutex_table.entries[mutex.0 as usize].waiters.head() {
        Some(waiter) => {
            lock.mutex_waiter_remove(mutex, waiter);
            lock.mutex_table.entries[mutex.0 as usize].owner = Some(waiter);
            task::wake_task(lock, waiter, WakeReason::Normal);
        }
        None => lock.mutex_table.entries[mutex.0 as usize].owner = None,
    }

    // Restore the releaser's priority only if it no longer has any
    // reason to stay boosted (spec.md §9: "implementers may extend
    // transitively" — here, as soon as no held mutex still has a waiter
    // requiring the boost).
    let still_needed = lock
        .ready_list
        .rt(owner)
        .held_mutexes
        .iter()
        .any(|&m| mutex_highest_waiter_priority(lock, MutexId(m)).is_some());
    if !still_needed {
        task::System::<Cfg>::unboost(lock, owner);
    }
}

/// Called from `task::kill` when a killed task still owns mutexes: hand
/// each off to its waiter list exactly as a normal unlock would,
/// without requiring the (now-dead) task to be `running`.
pub(crate) fn abandon_held_mutexes<Cfg: SystemCfg + Platform>(lock: &mut CpuLockGuard<'_, Cfg>, tid: TaskId) {
    let held: arrayvec::ArrayVec<u8, MAX_MUTEXES> = lock.ready_list.rt(tid).held_mutexes.clone();
    for m in held {
        release_mutex::<Cfg>(lock, MutexId(m), tid);
    }
    if let Some(sema) = lock.ready_list.rt_mut(tid).waiting_on_sema.take() {
        lock.sema_waiter_remove(SemaphoreId(sema), tid);
    }
    if let Some(mutex) = lock.ready_list.rt_mut(tid).waiting_on_mutex.take() {
        lock.mutex_waiter_remove(MutexId(mutex), tid);
    }
}

/// Called after a task's priority changes (`change_priority`,
/// `boost_to`/`unboost`) to keep whichever waiter list it's on
/// correctly ordered.
pub(crate) fn reposition_waiter<Cfg: SystemCfg>(lock: &mut CpuLockGuard<'_, Cfg>, tid: TaskId)
where
    Cfg: Platform,
{
    if let Some(sema) = lock.ready_list.rt(tid).waiting_on_sema {
        lock.sema_waiter_reorder(SemaphoreId(sema), tid);
    }
    if let Some(mutex) = lock.ready_list.rt(tid).waiting_on_mutex {
        lock.mutex_waiter_reorder(MutexId(mutex), tid);
    }
    if lock.ready_list.rt(tid).waiting_on_pool {
        crate::particle::reorder_pool_waiter::<Cfg>(lock, tid);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestCfg;

    #[test]
    fn sema_get_no_block_when_count_positive_then_release_restores_it() {
        TestCfg::reset();
        let sema = SemaphoreId(2); // TestCfg declares this one with initial_count = 1.
        assert_eq!(sema_count_get::<TestCfg>(sema).unwrap(), 1);
        assert_eq!(sema_get_w::<TestCfg>(sema, None).unwrap(), WaitError::OkNoBlock);
        assert_eq!(sema_count_get::<TestCfg>(sema).unwrap(), 0);

        sema_release::<TestCfg>(sema).unwrap();
        assert_eq!(sema_count_get::<TestCfg>(sema).unwrap(), 1);
    }

    /// Scenario 3 (spec.md §8): Task L (prio 12) holds mutex M. Task H
    /// (prio 7) requests it: L's effective priority is boosted to 7. L
    /// releases M: ownership passes to H and L's priority returns to 12.
    #[test]
    fn priority_inversion_resolves_on_release() {
        TestCfg::reset();
        let l = TaskId(0);
        let h = TaskId(1);
        let m = MutexId(0);

        {
            let mut lock = klock::lock_cpu::<TestCfg>();
            lock.ready_list.rt_mut(l).priority = 12;
            lock.ready_list.rt_mut(h).priority = 7;
            lock.running = Some(l);
        }
        assert_eq!(mutex_lock_w::<TestCfg>(m).unwrap(), WaitError::OkNoBlock);

        // H requests M while L holds it: this reproduces the non-blocking
        // prefix of `mutex_lock_w`'s blocking path (inheritance, then
        // waiter-list membership) without this single-threaded test
        // actually suspending on the call.
        {
            let mut lock = klock::lock_cpu::<TestCfg>();
            propagate_inheritance::<TestCfg>(&mut lock, l, 7);
            lock.mutex_waiter_insert(m, h);
            lock.ready_list.rt_mut(h).waiting_on_mutex = Some(m.0);
        }
        assert_eq!(klock::lock_cpu::<TestCfg>().ready_list.rt(l).priority, 7);

        {
            let mut lock = klock::lock_cpu::<TestCfg>();
            release_mutex::<TestCfg>(&mut lock, m, l);
        }
        let lock = klock::lock_cpu::<TestCfg>();
        assert_eq!(lock.ready_list.rt(l).priority, 12);
        assert_eq!(lock.mutex_table.entries[m.0 as usize].owner, Some(h));
    }
}
