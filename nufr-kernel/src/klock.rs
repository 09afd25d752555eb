//! The kernel's single critical-section lock.
//!
//! The teacher protects each piece of shared kernel state behind its own
//! `CpuLockCell`, a zero-cost capability-token cell whose safety rests on
//! `tokenlock`'s compile-time proof that CPU Lock is held. That proof
//! technique pays for itself across dozens of independently-allocated
//! kernel objects; this kernel instead keeps exactly one block of mutable
//! global state (the ready list, the message/particle pools, the timer
//! list — spec.md §3's "process-wide state"), so it is simpler and just as
//! sound to put that block behind one `spin::Mutex`, the same way the
//! simulator port already serializes its own scheduler state behind one
//! `thread_group` lock. `CpuLockGuard` keeps the teacher's name and
//! `borrow_mut()` shape so call sites read the same way.
use core::ops::{Deref, DerefMut};

use crate::{
    cfg::SystemCfg, message::MsgPool, particle::PclPool, platform::Platform,
    semaphore::{MutexTable, SemaphoreTable}, task::ReadyList, task::TaskId, timer::TimerList,
};

/// The process-wide mutable kernel state (spec.md §3, last paragraph).
pub struct KernelState<Cfg: SystemCfg> {
    pub ready_list: ReadyList<Cfg>,
    pub msg_pool: MsgPool<Cfg>,
    pub pcl_pool: PclPool<Cfg>,
    pub timer_list: TimerList<Cfg>,
    pub sema_table: SemaphoreTable<Cfg>,
    pub mutex_table: MutexTable<Cfg>,
    /// A free-running reference used as the app timer module's time base.
    pub latest_time: u32,
    /// The currently running task, or `None` before boot / during idle.
    pub running: Option<TaskId>,
    /// Set while an app-timer list update is underway, so a re-entrant
    /// `expire_timer_callin` backs off instead of observing a half-updated
    /// list (spec.md §4.7, §5).
    pub queue_update_in_progress: bool,
}

impl<Cfg: SystemCfg> KernelState<Cfg> {
    pub const fn new() -> Self {
        Self {
            ready_list: ReadyList::new(),
            msg_pool: MsgPool::new(),
            pcl_pool: PclPool::new(),
            timer_list: TimerList::new(),
            sema_table: SemaphoreTable::new(),
            mutex_table: MutexTable::new(),
            latest_time: 0,
            running: None,
            queue_update_in_progress: false,
        }
    }
}

/// A held CPU Lock, guarding access to [`KernelState`].
///
/// Dropping this guard releases the lock (both the `spin::Mutex` and, via
/// [`Platform::int_unlock`], the platform's interrupt-disable).
pub struct CpuLockGuard<'a, Cfg: SystemCfg + Platform> {
    state: spin::MutexGuard<'a, KernelState<Cfg>>,
    was_locked: bool,
}

impl<'a, Cfg: SystemCfg + Platform> CpuLockGuard<'a, Cfg> {
    /// Re-borrow the guard for a shorter lifetime, the way the teacher's
    /// `CpuLockGuard::borrow_mut` lets a function hand its lock down to a
    /// callee without giving up ownership of it.
    pub fn borrow_mut(&mut self) -> &mut KernelState<Cfg> {
        &mut self.state
    }
}

impl<'a, Cfg: SystemCfg + Platform> Deref for CpuLockGuard<'a, Cfg> {
    type Target = KernelState<Cfg>;
    fn deref(&self) -> &Self::Target {
        &self.state
    }
}

impl<'a, Cfg: SystemCfg + Platform> DerefMut for CpuLockGuard<'a, Cfg> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.state
    }
}

impl<'a, Cfg: SystemCfg + Platform> Drop for CpuLockGuard<'a, Cfg> {
    fn drop(&mut self) {
        // Safety: `was_locked` is the value `Platform::int_lock` returned
        // when this guard was constructed, and this is the first and only
        // place it's consumed.
        unsafe { Cfg::int_unlock(self.was_locked) };
    }
}

/// Acquire CPU Lock, blocking the current context from being preempted by
/// anything this kernel schedules until the returned guard is dropped.
#[inline]
pub fn lock_cpu<Cfg: SystemCfg + Platform>() -> CpuLockGuard<'static, Cfg> {
    let was_locked = Cfg::int_lock();
    let state = Cfg::kernel_state().lock();
    CpuLockGuard { state, was_locked }
}
