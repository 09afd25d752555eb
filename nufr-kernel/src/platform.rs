//! The interface a port must supply.
//!
//! Mirrors the split the teacher's `PortThreading`/`PortTimer` traits make
//! between "things the kernel needs from the world" and "things the kernel
//! exposes to the world" — except here there is exactly one such trait,
//! since this kernel has no interrupt-line management of its own (spec.md
//! §1 keeps device drivers and interrupt routing as external collaborators).

/// Operations a port must supply so that the generic kernel logic in this
/// crate can run on top of it.
///
/// # Safety
///
/// `int_lock`/`int_unlock` must nest correctly (a save/restore pair, like
/// `cpsid i` / restore `PRIMASK`) and must be the *only* mechanism by which
/// the kernel's shared state is protected from concurrent modification by
/// an interrupt handler or another CPU context.
pub unsafe trait Platform: Sized + 'static {
    /// Disable interrupts (or, for a cooperative host simulator, disable
    /// preemption) and return a token capturing whether they were already
    /// disabled, so a nested `int_lock`/`int_unlock` pair is a no-op.
    fn int_lock() -> bool;

    /// Restore the interrupt-enable state captured by a matching
    /// `int_lock`.
    ///
    /// # Safety
    /// `was_locked` must be the value most recently returned by a
    /// not-yet-unlocked call to `int_lock` on the same context.
    unsafe fn int_unlock(was_locked: bool);

    /// Re-evaluate the ready list and switch to its head.
    ///
    /// Called after releasing CPU Lock whenever the ready list may have
    /// changed (a task was unblocked, the running task blocked itself, a
    /// priority changed). From a task context, if the calling task is no
    /// longer the ready list's head, this call does not return until the
    /// scheduler chooses it again. From any other context (an ISR, or the
    /// tick thread) it performs the switch-in side effects and returns
    /// immediately, matching spec.md §4.8's "`context_switch` sets
    /// `nufr_running` and posts the switch-in task's semaphore; the
    /// switch-out task then blocks on its own."
    fn reschedule();

    /// The configured OS tick period, in milliseconds.
    fn tick_period_ms() -> u32;

    /// A free-running millisecond-ish reference time, used only to seed
    /// `latest_time` at boot.
    fn systick_get_reference_time() -> u32;

    /// Rearm (or disable, with `delay_ms == 0`) a one-shot "quantum timer"
    /// that should call [`crate::timer::expire_timer_callin`] after
    /// `delay_ms` milliseconds. Optional: a port that only drives the app
    /// timer module from the regular OS tick may implement this as a no-op.
    fn quantum_timer_reconfigure(delay_ms: u32);

    /// Build a stack frame over `[base, base + size)` that, when restored,
    /// begins executing `entry(parm)` with interrupts enabled and, should
    /// `entry` ever return, falls through to `exit` (spec.md:166). Returns
    /// the initial stack pointer `launch` hands off to the scheduler.
    fn prepare_stack(base: usize, size: usize, entry: fn(usize), exit: fn(), parm: usize) -> usize;
}
