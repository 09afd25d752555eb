//! A minimal, statically-declared [`SystemCfg`] shared by every module's
//! unit tests, so each test module doesn't hand-roll its own fixture.
#![cfg(test)]

use crate::{
    cfg::{Capabilities, SystemCfg},
    klock::KernelState,
    platform::Platform,
    semaphore::{MutexCb, SemaphoreCb},
    task::{TaskAttr, TaskCb},
};

pub const NUM_TASKS: usize = 4;
pub const NUM_SEMAPHORES: usize = 4;
pub const NUM_MUTEXES: usize = 2;
pub const NUM_TIMERS: usize = 4;

pub struct TestCfg;

fn noop_entry(_: usize) {}

static TASKS: [TaskCb<TestCfg>; NUM_TASKS] = [
    TaskCb::new(TaskAttr { entry: noop_entry, entry_param: 0, stack_base: 0, stack_size: 1024, base_priority: 4 }),
    TaskCb::new(TaskAttr { entry: noop_entry, entry_param: 0, stack_base: 0, stack_size: 1024, base_priority: 4 }),
    TaskCb::new(TaskAttr { entry: noop_entry, entry_param: 0, stack_base: 0, stack_size: 1024, base_priority: 4 }),
    TaskCb::new(TaskAttr { entry: noop_entry, entry_param: 0, stack_base: 0, stack_size: 1024, base_priority: 4 }),
];
static SEMAPHORES: [SemaphoreCb<TestCfg>; NUM_SEMAPHORES] =
    [SemaphoreCb::new(0), SemaphoreCb::new(0), SemaphoreCb::new(1), SemaphoreCb::new(0)];
static MUTEXES: [MutexCb<TestCfg>; NUM_MUTEXES] = [MutexCb::new(), MutexCb::new()];
static KERNEL_STATE: spin::Mutex<KernelState<TestCfg>> = spin::Mutex::new(KernelState::new());

impl SystemCfg for TestCfg {
    const NUM_TASKS: usize = NUM_TASKS;
    const NUM_SEMAPHORES: usize = NUM_SEMAPHORES;
    const NUM_MUTEXES: usize = NUM_MUTEXES;
    const NUM_TIMERS: usize = NUM_TIMERS;
    const MAX_MSGS: usize = 32;
    const NUM_PCLS: usize = 8;
    const PCL_SIZE: usize = 16;
    const TICK_PERIOD_MS: u32 = 10;
    const MSG_PRIORITIES: usize = 4;
    const CAPABILITIES: Capabilities =
        Capabilities { task_kill: true, local_struct: false, messaging: true, semaphore: true };
    const LOWEST_PRIORITY: u8 = 7;

    fn task_cb(id: u8) -> &'static TaskCb<Self> {
        &TASKS[id as usize]
    }
    fn semaphore_cb(id: u8) -> &'static SemaphoreCb<Self> {
        &SEMAPHORES[id as usize]
    }
    fn mutex_cb(id: u8) -> &'static MutexCb<Self> {
        &MUTEXES[id as usize]
    }
    fn kernel_state() -> &'static spin::Mutex<KernelState<Self>> {
        &KERNEL_STATE
    }
}

unsafe impl Platform for TestCfg {
    fn int_lock() -> bool {
        false
    }
    unsafe fn int_unlock(_was_locked: bool) {}
    fn reschedule() {}
    fn tick_period_ms() -> u32 {
        10
    }
    fn systick_get_reference_time() -> u32 {
        0
    }
    fn quantum_timer_reconfigure(_delay_ms: u32) {}
    fn prepare_stack(_base: usize, _size: usize, _entry: fn(usize), _exit: fn(), parm: usize) -> usize {
        parm
    }
}

impl TestCfg {
    /// Reset the shared kernel state to its initial condition. Tests using
    /// this fixture run serially with respect to each other (the default
    /// for `cargo test` within one binary absent explicit threading), so
    /// this only needs to guard against leftovers from the previous test,
    /// not concurrent access.
    pub fn reset() {
        let mut lock = KERNEL_STATE.lock();
        *lock = KernelState::new();
        lock.msg_pool.init();
        lock.sema_table.init();
        lock.mutex_table.init();
        lock.pcl_pool.init();
    }
}
