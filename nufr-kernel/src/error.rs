//! Error types.
//!
//! The teacher groups its per-operation error enums (`WaitSemaphoreError`,
//! `DrainSemaphoreError`, ...) into a handful of shared "suberror" enums via
//! a `define_suberror!` macro that also wires up `From` conversions into
//! each operation's public error type. This kernel's API surface is small
//! enough that the conversions are written out by hand below instead of
//! macro-generated; the shape (a handful of narrow, `Copy`, fieldless
//! enums with explicit `From` impls) is kept.
use core::fmt;

/// Returned by any operation attempted outside of the context it requires
/// (e.g. calling a `_w`/`_t` wait from an ISR).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadContextError {
    BadContext,
}

impl fmt::Display for BadContextError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("operation not valid in the current context")
    }
}

/// A `tid`/`sema`/`mutex`/`timer` id did not name a configured object.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BadIdError {
    BadId,
}

impl fmt::Display for BadIdError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("invalid object id")
    }
}

/// Result of a BOP send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BopSendError {
    /// The target task is not currently blocked on a BOP wait.
    TaskNotWaiting,
    /// The target is waiting on a BOP, but its key does not match.
    KeyMismatch,
}

/// Result of a blocking BOP wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BopWaitError {
    Timeout,
    AbortedByMessage,
}

/// Result of `msg_send`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgSendError {
    /// The global message-block pool is exhausted.
    NoMsgBlock,
    BadId,
    /// A prefix→destination lookup produced no destination.
    DestNotFound,
}

impl From<BadIdError> for MsgSendError {
    fn from(_: BadIdError) -> Self {
        MsgSendError::BadId
    }
}

/// Outcome of a successful `msg_send`, distinguishing what it did to the
/// destination task (spec.md §4.3 steps 3-5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgSendOutcome {
    Delivered,
    AwokeReceiver,
    AbortedReceiver,
}

/// Result of a blocking message receive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MsgGetError {
    Timeout,
    BadContext,
}

impl From<BadContextError> for MsgGetError {
    fn from(_: BadContextError) -> Self {
        MsgGetError::BadContext
    }
}

/// Result of a semaphore/mutex wait.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitError {
    /// Returned without blocking: the resource was immediately available.
    OkNoBlock,
    /// Blocked, then was woken by a release.
    OkBlock,
    Timeout,
    MsgAbort,
}

/// Result of `sema_release`/`mutex_unlock` when the caller does not own
/// what it is releasing, or a mutex is locked recursively beyond what the
/// implementation supports.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockError {
    NotOwner,
    WouldDeadlock,
    BadId,
}

impl From<BadIdError> for LockError {
    fn from(_: BadIdError) -> Self {
        LockError::BadId
    }
}

/// Particle chain outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PclError {
    /// The particle pool could not supply enough particles.
    OutOfParticles,
    Timeout,
    /// `seek_rewind` asked to rewind more than one particle.
    RewindTooFar,
}

/// A violation of an invariant this kernel assumes always holds (spec.md
/// §7: assertion categories). Fatal by construction — see
/// [`crate::sanity::sanity_check`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Violation {
    BadId,
    AlreadyBlocked,
    NotOnReadyList,
    PriorityOutOfRange,
    ConfigTooLarge,
    StackSizeZero,
    UnbalancedPrioritize,
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Violation::BadId => "invalid object id",
            Violation::AlreadyBlocked => "operation on an already-blocked task",
            Violation::NotOnReadyList => "task expected to be on the ready list is not",
            Violation::PriorityOutOfRange => "priority ordinal out of configured range",
            Violation::ConfigTooLarge => "configuration exceeds a compiled-in maximum",
            Violation::StackSizeZero => "task declared with a zero-size stack",
            Violation::UnbalancedPrioritize => "unprioritize() without a matching prioritize()",
        };
        f.write_str(s)
    }
}
