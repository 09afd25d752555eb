//! POSIX host simulator port: implements [`nufr_kernel::Platform`] with one
//! native OS thread per configured task, the same overall shape as the
//! teacher's `r3_port_std` (a thread per task, a dedicated timer thread,
//! CPU Lock and dispatch as small free functions an application's
//! `Platform` impl forwards into). It is considerably smaller than the
//! teacher's port because this kernel's [`nufr_kernel::platform::Platform`]
//! trait has no interrupt-line management of its own to emulate: there is
//! no remote-thread-park machinery, no `UMS` scheduler, no per-platform
//! `threading_unix`/`threading_windows` split -- just `std::thread` plus a
//! `Mutex`/`Condvar` gate per task, which is enough to hand exactly one
//! logical "running" task between OS threads at a time.
//!
//! An application using this port declares its [`nufr_kernel::SystemCfg`]
//! type, implements `Platform` for it by forwarding to the free functions
//! here, then calls [`spawn_tasks`] followed by [`nufr_kernel::System::launch`]
//! for each task it wants to start, and finally [`park_forever`] to let the
//! simulated scheduler run.
use std::{
    cell::Cell,
    sync::{Condvar, Mutex, OnceLock},
    thread,
    time::{Duration, Instant},
};

use nufr_kernel::{task::TaskId, Platform, SystemCfg};

thread_local! {
    /// Which task, if any, this OS thread is standing in for. `None` on the
    /// thread that called [`spawn_tasks`]/[`park_forever`] and on the timer
    /// thread -- both behave like the teacher's "any other context" case of
    /// `reschedule`: they request a switch-in and return immediately rather
    /// than blocking on a gate of their own.
    static CURRENT_TASK: Cell<Option<TaskId>> = Cell::new(None);

    /// Nesting depth of `int_lock`/`int_unlock` on this OS thread. Real
    /// preemption in this port only ever happens at an explicit
    /// `reschedule()` call site, never asynchronously, so there is nothing
    /// to actually suspend here; the counter exists purely to give nested
    /// `int_lock`/`int_unlock` pairs the no-op-when-already-locked behavior
    /// the trait documents.
    static INT_LOCK_DEPTH: Cell<u32> = Cell::new(0);
}

/// One wake gate per configured task: `true` means "run", `false` means
/// "parked". Mirrors spec.md §4.8's "`context_switch` sets `nufr_running`
/// and posts the switch-in task's semaphore; the switch-out task then
/// blocks on its own" -- each gate here *is* one task's semaphore.
struct Gate {
    run: Mutex<bool>,
    cond: Condvar,
}

impl Gate {
    fn new() -> Self {
        Self { run: Mutex::new(false), cond: Condvar::new() }
    }

    fn park(&self) {
        let mut run = self.run.lock().unwrap();
        while !*run {
            run = self.cond.wait(run).unwrap();
        }
        *run = false;
    }

    fn wake(&self) {
        let mut run = self.run.lock().unwrap();
        *run = true;
        self.cond.notify_one();
    }
}

struct SimState {
    gates: Vec<Gate>,
    origin: Instant,
}

/// One instance of this per distinct `Cfg` the process links in (a
/// `static` declared inside a generic function is monomorphized per type
/// argument, the same trick the teacher uses to give each kernel trait its
/// own singleton state).
fn state<Cfg: SystemCfg>() -> &'static SimState {
    static CELL: OnceLock<SimState> = OnceLock::new();
    CELL.get_or_init(|| SimState {
        gates: (0..Cfg::NUM_TASKS).map(|_| Gate::new()).collect(),
        origin: Instant::now(),
    })
}

/// `int_lock()`.
pub fn int_lock() -> bool {
    INT_LOCK_DEPTH.with(|c| {
        let depth = c.get();
        c.set(depth + 1);
        depth > 0
    })
}

/// `int_unlock(was_locked)`.
///
/// # Safety
/// `was_locked` must be the value most recently returned by a not-yet-unlocked
/// call to [`int_lock`] on this same OS thread.
pub unsafe fn int_unlock(_was_locked: bool) {
    INT_LOCK_DEPTH.with(|c| c.set(c.get().saturating_sub(1)));
}

/// `reschedule()`: pick the ready list's new head and hand it the CPU.
pub fn reschedule<Cfg: SystemCfg + Platform>() {
    let state = state::<Cfg>();
    let next = {
        let mut lock = nufr_kernel::klock::lock_cpu::<Cfg>();
        nufr_kernel::task::choose_next_running_task::<Cfg>(&mut lock)
    };
    let me = CURRENT_TASK.with(Cell::get);

    if let Some(next) = next {
        log::trace!("reschedule: switching in task {}", next.ordinal());
        state.gates[next.0 as usize].wake();
    }

    if let Some(me) = me {
        if next != Some(me) {
            log::trace!("reschedule: task {} parking", me.ordinal());
            state.gates[me.0 as usize].park();
            log::trace!("reschedule: task {} resumed", me.ordinal());
        }
    }
}

/// `systick_get_reference_time()`: milliseconds since [`spawn_tasks`] was
/// first called for this `Cfg`.
pub fn systick_get_reference_time<Cfg: SystemCfg>() -> u32 {
    state::<Cfg>().origin.elapsed().as_millis() as u32
}

/// `quantum_timer_reconfigure(delay_ms)`: a no-op. This port drives
/// [`nufr_kernel::timer::timer_expire_timer_callin`] from the fixed-period
/// tick thread spawned by [`spawn_tasks`] rather than from a separate
/// one-shot timer, which the trait documentation notes is a valid choice
/// for a port that doesn't need sub-tick timer precision.
pub fn quantum_timer_reconfigure(_delay_ms: u32) {}

/// `prepare_stack(base, size, entry, exit, parm)`.
///
/// This port has no real stack to build -- each task already runs on its
/// own OS thread, which carries its own call stack -- so `base`/`size`/
/// `entry`/`exit` are unused here and the task thread (spawned once, up
/// front, by [`spawn_tasks`]) calls them itself once woken. The only thing
/// that needs to survive from `launch` to that thread is `parm`, so this
/// just returns it verbatim for `System::launch` to stash in the task's
/// runtime state.
pub fn prepare_stack(_base: usize, _size: usize, _entry: fn(usize), _exit: fn(), parm: usize) -> usize {
    parm
}

/// Spawn one OS thread per task configured in `Cfg::NUM_TASKS`, plus a tick
/// thread driving the app timer wheel at `Cfg::TICK_PERIOD_MS`. Each task
/// thread immediately parks on its gate; it only starts running the task's
/// `entry` function once [`nufr_kernel::System::launch`] (called separately
/// by the application) causes a `reschedule()` to choose it.
///
/// Must be called exactly once per `Cfg`, before any `launch` call.
pub fn spawn_tasks<Cfg: SystemCfg + Platform>() {
    let _ = env_logger::try_init();
    let state = state::<Cfg>();

    for t in 0..Cfg::NUM_TASKS {
        let tid = TaskId(t as u8);
        thread::Builder::new()
            .name(format!("nufr-task-{}", tid.ordinal()))
            .spawn(move || {
                CURRENT_TASK.with(|c| c.set(Some(tid)));
                state::<Cfg>().gates[tid.0 as usize].park();
                log::debug!("task {} starting", tid.ordinal());
                let attr = Cfg::task_cb(tid.0).attr;
                let parm = {
                    let lock = nufr_kernel::klock::lock_cpu::<Cfg>();
                    lock.ready_list.rt(tid).initial_sp
                };
                (attr.entry)(parm);
                log::debug!("task {} entry function returned; exiting", tid.ordinal());
                let _ = nufr_kernel::System::<Cfg>::exit_running();
            })
            .expect("failed to spawn nufr-sim task thread");
    }

    thread::Builder::new()
        .name("nufr-tick".to_owned())
        .spawn(move || {
            log::trace!("tick thread started");
            let period = Duration::from_millis(Cfg::tick_period_ms() as u64);
            loop {
                thread::sleep(period);
                let now = state.origin.elapsed().as_millis() as u32;
                let _ = nufr_kernel::timer::timer_expire_timer_callin::<Cfg>(now);
            }
        })
        .expect("failed to spawn nufr-sim tick thread");
}

/// Block the calling thread forever, letting the task and tick threads
/// spawned by [`spawn_tasks`] drive the simulation. Intended to be the
/// last call in an application's `main`.
pub fn park_forever() -> ! {
    loop {
        thread::park();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nufr_kernel::cfg::Capabilities;
    use nufr_kernel::klock::KernelState;
    use nufr_kernel::semaphore::{MutexCb, SemaphoreCb};
    use nufr_kernel::task::{TaskAttr, TaskCb};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct DemoCfg;

    static RAN: AtomicUsize = AtomicUsize::new(0);

    fn task_a(_: usize) {
        RAN.fetch_add(1, Ordering::SeqCst);
    }

    static TASKS: [TaskCb<DemoCfg>; 1] =
        [TaskCb::new(TaskAttr { entry: task_a, entry_param: 0, stack_base: 0, stack_size: 4096, base_priority: 4 })];
    static SEMAPHORES: [SemaphoreCb<DemoCfg>; 1] = [SemaphoreCb::new(0)];
    static MUTEXES: [MutexCb<DemoCfg>; 1] = [MutexCb::new()];
    static KERNEL_STATE: spin::Mutex<KernelState<DemoCfg>> = spin::Mutex::new(KernelState::new());

    impl SystemCfg for DemoCfg {
        const NUM_TASKS: usize = 1;
        const NUM_SEMAPHORES: usize = 1;
        const NUM_MUTEXES: usize = 1;
        const NUM_TIMERS: usize = 1;
        const MAX_MSGS: usize = 8;
        const NUM_PCLS: usize = 4;
        const PCL_SIZE: usize = 16;
        const TICK_PERIOD_MS: u32 = 5;
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

    struct ParmCfg;

    static RECEIVED_PARM: AtomicUsize = AtomicUsize::new(0);

    fn task_b(parm: usize) {
        RECEIVED_PARM.store(parm, Ordering::SeqCst);
    }

    static PARM_TASKS: [TaskCb<ParmCfg>; 1] =
        [TaskCb::new(TaskAttr { entry: task_b, entry_param: 0, stack_base: 0, stack_size: 4096, base_priority: 4 })];
    static PARM_SEMAPHORES: [SemaphoreCb<ParmCfg>; 1] = [SemaphoreCb::new(0)];
    static PARM_MUTEXES: [MutexCb<ParmCfg>; 1] = [MutexCb::new()];
    static PARM_KERNEL_STATE: spin::Mutex<KernelState<ParmCfg>> = spin::Mutex::new(KernelState::new());

    impl SystemCfg for ParmCfg {
        const NUM_TASKS: usize = 1;
        const NUM_SEMAPHORES: usize = 1;
        const NUM_MUTEXES: usize = 1;
        const NUM_TIMERS: usize = 1;
        const MAX_MSGS: usize = 8;
        const NUM_PCLS: usize = 4;
        const PCL_SIZE: usize = 16;
        const TICK_PERIOD_MS: u32 = 5;
        const MSG_PRIORITIES: usize = 4;
        const CAPABILITIES: Capabilities =
            Capabilities { task_kill: true, local_struct: false, messaging: true, semaphore: true };
        const LOWEST_PRIORITY: u8 = 7;

        fn task_cb(id: u8) -> &'static TaskCb<Self> {
            &PARM_TASKS[id as usize]
        }
        fn semaphore_cb(id: u8) -> &'static SemaphoreCb<Self> {
            &PARM_SEMAPHORES[id as usize]
        }
        fn mutex_cb(id: u8) -> &'static MutexCb<Self> {
            &PARM_MUTEXES[id as usize]
        }
        fn kernel_state() -> &'static spin::Mutex<KernelState<Self>> {
            &PARM_KERNEL_STATE
        }
    }

    unsafe impl Platform for ParmCfg {
        fn int_lock() -> bool {
            int_lock()
        }
        unsafe fn int_unlock(was_locked: bool) {
            unsafe { int_unlock(was_locked) }
        }
        fn reschedule() {
            reschedule::<Self>()
        }
        fn tick_period_ms() -> u32 {
            Self::TICK_PERIOD_MS
        }
        fn systick_get_reference_time() -> u32 {
            systick_get_reference_time::<Self>()
        }
        fn quantum_timer_reconfigure(delay_ms: u32) {
            quantum_timer_reconfigure(delay_ms)
        }
        fn prepare_stack(base: usize, size: usize, entry: fn(usize), exit: fn(), parm: usize) -> usize {
            prepare_stack(base, size, entry, exit, parm)
        }
    }

    unsafe impl Platform for DemoCfg {
        fn int_lock() -> bool {
            int_lock()
        }
        unsafe fn int_unlock(was_locked: bool) {
            unsafe { int_unlock(was_locked) }
        }
        fn reschedule() {
            reschedule::<Self>()
        }
        fn tick_period_ms() -> u32 {
            Self::TICK_PERIOD_MS
        }
        fn systick_get_reference_time() -> u32 {
            systick_get_reference_time::<Self>()
        }
        fn quantum_timer_reconfigure(delay_ms: u32) {
            quantum_timer_reconfigure(delay_ms)
        }
        fn prepare_stack(base: usize, size: usize, entry: fn(usize), exit: fn(), parm: usize) -> usize {
            prepare_stack(base, size, entry, exit, parm)
        }
    }

    #[test]
    fn a_launched_task_actually_runs_on_its_own_thread() {
        nufr_kernel::nufr_init::<DemoCfg>().unwrap();
        spawn_tasks::<DemoCfg>();
        nufr_kernel::System::<DemoCfg>::launch(TaskId(0), 0).unwrap();

        for _ in 0..200 {
            if RAN.load(Ordering::SeqCst) > 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert!(RAN.load(Ordering::SeqCst) > 0);
    }

    #[test]
    fn launch_parm_reaches_the_task_entry_function() {
        RECEIVED_PARM.store(0, Ordering::SeqCst);
        nufr_kernel::nufr_init::<ParmCfg>().unwrap();
        spawn_tasks::<ParmCfg>();
        nufr_kernel::System::<ParmCfg>::launch(TaskId(0), 0xABCD).unwrap();

        for _ in 0..200 {
            if RECEIVED_PARM.load(Ordering::SeqCst) != 0 {
                break;
            }
            thread::sleep(Duration::from_millis(10));
        }
        assert_eq!(RECEIVED_PARM.load(Ordering::SeqCst), 0xABCD);
    }
}
