//! The static configuration surface an application declares.
//!
//! The teacher expresses a statically-declared kernel configuration through
//! a generic-const-eval "configurator" crate (`r3_core`'s `cfg`/`bind`
//! modules) that builds a whole dependency graph at compile time. That
//! machinery solves a much larger problem — wiring up arbitrary
//! combinations of optional kernel objects — than this kernel's fixed,
//! plainly-enumerated configuration surface (spec.md §6) calls for, so it
//! is not reproduced here. Instead, exactly like `KernelTraits` is
//! implemented once per kernel instantiation in the teacher, an
//! application implements [`SystemCfg`] once for a marker type and every
//! generic kernel module is written against it.

use crate::{klock::KernelState, semaphore::{MutexCb, SemaphoreCb}, task::TaskCb};

/// Upper bound on the number of tasks a single kernel instance may declare.
pub const MAX_TASKS: usize = 32;
/// Upper bound on the number of counting semaphores.
pub const MAX_SEMAPHORES: usize = 32;
/// Upper bound on the number of mutexes.
pub const MAX_MUTEXES: usize = 16;
/// Upper bound on the number of app timers.
pub const MAX_TIMERS: usize = 16;
/// Upper bound on the number of message blocks in the global pool.
pub const MAX_MSGS: usize = 128;
/// Upper bound on the number of particles in the global pool.
pub const MAX_PCLS: usize = 128;
/// Upper bound on a particle's element size in bytes (spec.md §6's
/// `PCL_SIZE`).
pub const MAX_PCL_SIZE: usize = 256;
/// Number of distinct message-priority inbox levels (spec.md §6:
/// `MSG_PRIORITIES` is 1..4).
pub const MSG_PRIORITY_LEVELS: usize = 4;

/// Optional capability flags an application may enable (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Capabilities {
    pub task_kill: bool,
    pub local_struct: bool,
    pub messaging: bool,
    pub semaphore: bool,
}

/// The static configuration of one kernel instance.
///
/// Implemented once, by the application, for a zero-sized marker type —
/// the same role `KernelTraits` plays in the teacher. All kernel modules
/// are generic over `Cfg: SystemCfg`.
pub trait SystemCfg: Sized + Send + Sync + 'static {
    /// Number of statically declared tasks, `1..=MAX_TASKS`.
    const NUM_TASKS: usize;
    /// Number of counting semaphores, `0..=MAX_SEMAPHORES`.
    const NUM_SEMAPHORES: usize;
    /// Number of mutexes, `0..=MAX_MUTEXES`.
    const NUM_MUTEXES: usize;
    /// Number of app timers, `0..=MAX_TIMERS`.
    const NUM_TIMERS: usize;
    /// Size of the global message-block pool, `0..=MAX_MSGS`.
    const MAX_MSGS: usize;
    /// Size of the global particle pool.
    const NUM_PCLS: usize;
    /// Particle payload size in bytes, excluding the chain-head header.
    const PCL_SIZE: usize;
    /// OS tick period in milliseconds.
    const TICK_PERIOD_MS: u32;
    /// Number of distinct message-priority levels in use, `1..=4`.
    const MSG_PRIORITIES: usize;

    const CAPABILITIES: Capabilities;

    /// Priority of the lowest-priority (background/idle) task. Numerically
    /// largest value = lowest priority (spec.md §3: "0 is highest").
    const LOWEST_PRIORITY: u8;
    /// Priority `prioritize()` raises a task to.
    const GUARANTEED_HIGHEST_PRIORITY: u8 = 0;

    /// The per-task control blocks, indexed by `TaskId`.
    fn task_cb(id: u8) -> &'static TaskCb<Self>;
    /// The per-semaphore control blocks, indexed by `SemaphoreId`.
    fn semaphore_cb(id: u8) -> &'static SemaphoreCb<Self>;
    /// The per-mutex control blocks, indexed by `MutexId`.
    fn mutex_cb(id: u8) -> &'static MutexCb<Self>;

    /// The single process-wide lock protecting ready list, message pool,
    /// particle pool, and timer list state (see `klock.rs`).
    fn kernel_state() -> &'static spin::Mutex<KernelState<Self>>;
}
