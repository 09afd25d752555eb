//! The message system: a fixed message-block pool and per-task,
//! per-priority inbox FIFOs (spec.md §4.3).
//!
//! The bit-packed `fields` word (spec.md §3, §9) is the one binding wire
//! format in this kernel and is kept exactly as specified so any existing
//! sender/receiver pair stays compatible; it's exposed through typed
//! getters/setters rather than macros, per spec.md §9's "Bit-packed
//! `fields` word" design note. The block pool and inbox FIFOs are
//! grounded on the teacher's `semaphore.rs` wait/signal pattern (a waiter
//! list woken one at a time under CPU Lock) and on spec.md §9's arena+index
//! direction: message blocks live in one fixed array and are referenced by
//! `u16` index rather than by pointer.
use crate::{
    cfg::{SystemCfg, MAX_MSGS, MSG_PRIORITY_LEVELS},
    error::{MsgGetError, MsgSendError, MsgSendOutcome, PclError},
    klock::{self, CpuLockGuard},
    platform::Platform,
    task::{self, BlockFlags, PriorityTaskList, TaskId, TaskState, WakeReason},
};

/// A message's packed fields, unpacked into a typed record.
///
/// Bit layout (LSB -> MSB), matching spec.md §3 exactly:
/// `priority:3`, `sending_task:8`, 1 reserved bit, `id:10`, `prefix:10`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MsgFields {
    pub priority: u8,
    pub sending_task: Option<u8>,
    pub id: u16,
    pub prefix: u16,
}

const PRIORITY_SHIFT: u32 = 0;
const PRIORITY_MASK: u32 = 0b111;
const SENDING_TASK_SHIFT: u32 = 3;
const SENDING_TASK_MASK: u32 = 0xFF;
const ID_SHIFT: u32 = 12;
const ID_MASK: u32 = 0x3FF;
const PREFIX_SHIFT: u32 = 22;
const PREFIX_MASK: u32 = 0x3FF;
/// Sentinel: no real task has this ordinal; marks an ISR-originated send.
const NO_SENDING_TASK: u8 = 0xFF;

impl MsgFields {
    pub fn pack(self) -> u32 {
        let sending_task = self.sending_task.unwrap_or(NO_SENDING_TASK);
        ((self.priority as u32 & PRIORITY_MASK) << PRIORITY_SHIFT)
            | ((sending_task as u32 & SENDING_TASK_MASK) << SENDING_TASK_SHIFT)
            | ((self.id as u32 & ID_MASK) << ID_SHIFT)
            | ((self.prefix as u32 & PREFIX_MASK) << PREFIX_SHIFT)
    }

    pub fn unpack(fields: u32) -> Self {
        let sending_task = ((fields >> SENDING_TASK_SHIFT) & SENDING_TASK_MASK) as u8;
        Self {
            priority: ((fields >> PRIORITY_SHIFT) & PRIORITY_MASK) as u8,
            sending_task: if sending_task == NO_SENDING_TASK { None } else { Some(sending_task) },
            id: ((fields >> ID_SHIFT) & ID_MASK) as u16,
            prefix: ((fields >> PREFIX_SHIFT) & PREFIX_MASK) as u16,
        }
    }
}

/// One message block: a packed fields word, a parameter word, and the
/// intrusive "next" link used both by the global free list and by
/// whichever task inbox currently holds it.
#[derive(Debug, Clone, Copy)]
pub struct MsgBlock {
    pub(crate) flink: Option<u16>,
    pub fields: u32,
    pub parameter: u32,
}

impl MsgBlock {
    const fn new() -> Self {
        Self { flink: None, fields: 0, parameter: 0 }
    }
}

/// The global message-block pool plus every task's inboxes are reached
/// through this type, which lives inside [`crate::klock::KernelState`].
pub struct MsgPool<Cfg: SystemCfg> {
    blocks: [MsgBlock; MAX_MSGS],
    free_head: Option<u16>,
    /// Tasks blocked in `msg_send_args_w/t` waiting for a free block.
    waiters: PriorityTaskList,
    _marker: core::marker::PhantomData<Cfg>,
}

impl<Cfg: SystemCfg> MsgPool<Cfg> {
    pub const fn new() -> Self {
        Self {
            blocks: [MsgBlock::new(); MAX_MSGS],
            free_head: None,
            waiters: PriorityTaskList::new(),
            _marker: core::marker::PhantomData,
        }
    }

    /// Must be called once at boot, after `Cfg::MAX_MSGS` is known to be
    /// in range, to thread every block onto the free list.
    pub fn init(&mut self) {
        self.free_head = None;
        self.waiters = PriorityTaskList::new();
        for i in (0..Cfg::MAX_MSGS).rev() {
            self.blocks[i].flink = self.free_head;
            self.free_head = Some(i as u16);
        }
    }

    fn get_block(&mut self) -> Option<u16> {
        let idx = self.free_head?;
        self.free_head = self.blocks[idx as usize].flink;
        Some(idx)
    }

    fn free_block(&mut self, idx: u16) {
        self.blocks[idx as usize].flink = self.free_head;
        self.free_head = Some(idx);
    }
}

/// `msg_init()` — must run once at boot.
pub fn msg_init<Cfg: SystemCfg + Platform>() {
    let mut lock = klock::lock_cpu::<Cfg>();
    lock.msg_pool.init();
}

impl<Cfg: SystemCfg> crate::klock::KernelState<Cfg> {
    fn msg_waiter_insert(&mut self, tid: TaskId) {
        self.msg_pool.waiters.insert::<Cfg>(&mut self.ready_list.rt, tid);
    }

    fn msg_waiter_remove(&mut self, tid: TaskId) {
        self.msg_pool.waiters.remove(&mut self.ready_list.rt, tid);
    }
}

/// Return `block` to the pool and, if a task is blocked in
/// `msg_send_args_w/t` waiting for one, wake it.
fn release_block<Cfg: SystemCfg + Platform>(lock: &mut CpuLockGuard<'_, Cfg>, block: u16) {
    lock.msg_pool.free_block(block);
    if let Some(waiter) = lock.msg_pool.waiters.head() {
        lock.msg_waiter_remove(waiter);
        task::wake_task(lock, waiter, WakeReason::Normal);
    }
}

fn priority_index<Cfg: SystemCfg>(priority: u8) -> usize {
    (priority as usize).min(Cfg::MSG_PRIORITIES.saturating_sub(1)).min(MSG_PRIORITY_LEVELS - 1)
}

fn enqueue<Cfg: SystemCfg>(lock: &mut CpuLockGuard<'_, Cfg>, dest: TaskId, priority: usize, block: u16) {
    lock.msg_pool.blocks[block as usize].flink = None;
    let tail = lock.ready_list.rt(dest).inbox[priority].tail;
    match tail {
        Some(tail) => lock.msg_pool.blocks[tail as usize].flink = Some(block),
        None => lock.ready_list.rt_mut(dest).inbox[priority].head = Some(block),
    }
    lock.ready_list.rt_mut(dest).inbox[priority].tail = Some(block);
}

fn dequeue<Cfg: SystemCfg>(lock: &mut CpuLockGuard<'_, Cfg>, tid: TaskId) -> Option<u16> {
    for p in 0..Cfg::MSG_PRIORITIES.min(MSG_PRIORITY_LEVELS) {
        let head = lock.ready_list.rt(tid).inbox[p].head;
        if let Some(block) = head {
            let next = lock.msg_pool.blocks[block as usize].flink;
            let q = &mut lock.ready_list.rt_mut(tid).inbox[p];
            q.head = next;
            if next.is_none() {
                q.tail = None;
            }
            return Some(block);
        }
    }
    None
}

fn send_into_lock<Cfg: SystemCfg + Platform>(
    lock: &mut CpuLockGuard<'_, Cfg>,
    fields_packed: u32,
    parameter: u32,
    dest: TaskId,
) -> Result<MsgSendOutcome, MsgSendError> {
    let block = lock.msg_pool.get_block().ok_or(MsgSendError::NoMsgBlock)?;
    lock.msg_pool.blocks[block as usize].fields = fields_packed;
    lock.msg_pool.blocks[block as usize].parameter = parameter;

    let unpacked = MsgFields::unpack(fields_packed);
    let prio_idx = priority_index::<Cfg>(unpacked.priority);
    enqueue::<Cfg>(lock, dest, prio_idx, block);

    let rt = lock.ready_list.rt(dest);
    let outcome = if rt.state == TaskState::Waiting
        && rt.block_flags.intersects(BlockFlags::MSG | BlockFlags::MSG_TIMEOUT)
    {
        task::wake_task(lock, dest, WakeReason::Normal);
        MsgSendOutcome::AwokeReceiver
    } else if rt.state == TaskState::Waiting
        && !rt.status.contains(task::StatusFlags::BOP_LOCKED)
        && rt.abort_message_priority.map_or(false, |abort_pri| unpacked.priority <= abort_pri)
    {
        task::wake_task(lock, dest, WakeReason::MsgAbort);
        MsgSendOutcome::AbortedReceiver
    } else {
        MsgSendOutcome::Delivered
    };

    Ok(outcome)
}

/// `msg_send(fields, parameter, dest_tid)` (spec.md §4.3).
pub fn msg_send<Cfg: SystemCfg + Platform>(
    fields: MsgFields,
    parameter: u32,
    dest: TaskId,
) -> Result<MsgSendOutcome, MsgSendError> {
    let mut lock = klock::lock_cpu::<Cfg>();
    let outcome = send_into_lock::<Cfg>(&mut lock, fields.pack(), parameter, dest)?;
    task::unlock_cpu_and_check_preemption(lock);
    Ok(outcome)
}

/// Deliver a timer-produced message directly against an already-held
/// lock, for use by the app-timer expiry sweep (`timer.rs`), which cannot
/// re-enter [`klock::lock_cpu`].
pub(crate) fn deliver_from_timer<Cfg: SystemCfg + Platform>(
    lock: &mut CpuLockGuard<'_, Cfg>,
    dest: TaskId,
    fields_packed: u32,
    parameter: u32,
) {
    let _ = send_into_lock::<Cfg>(lock, fields_packed, parameter, dest);
}

/// `msg_send_multi(fields, parameter, list)` — boosts the sender so the
/// whole multicast is delivered atomically with respect to other senders
/// (spec.md §4.3).
///
/// Per spec.md §9's noted open bug, the original does not restore the
/// sender's priority if the block pool is exhausted partway through; this
/// implementation always restores, via an RAII-style guard, even on early
/// return (see DESIGN.md).
pub fn msg_send_multi<Cfg: SystemCfg + Platform>(
    fields: MsgFields,
    parameter: u32,
    dests: &[TaskId],
) -> arrayvec::ArrayVec<(TaskId, Result<MsgSendOutcome, MsgSendError>), { crate::cfg::MAX_TASKS }> {
    let mut lock = klock::lock_cpu::<Cfg>();
    let _ = task::System::<Cfg>::prioritize(&mut lock);
    drop(lock);

    let mut results = arrayvec::ArrayVec::new();
    for &dest in dests {
        let r = msg_send::<Cfg>(fields, parameter, dest);
        results.push((dest, r));
    }

    let mut lock = klock::lock_cpu::<Cfg>();
    let _ = task::System::<Cfg>::unprioritize(&mut lock);
    task::unlock_cpu_and_check_preemption(lock);
    results
}

fn get_core<Cfg: SystemCfg + Platform>(tid: TaskId, lock: &mut CpuLockGuard<'_, Cfg>) -> Option<(MsgFields, u32)> {
    let block = dequeue::<Cfg>(lock, tid)?;
    let b = lock.msg_pool.blocks[block as usize];
    release_block::<Cfg>(lock, block);
    Some((MsgFields::unpack(b.fields), b.parameter))
}

/// `msg_get_w` — block until a message is available, then return it.
pub fn msg_get_w<Cfg: SystemCfg + Platform>() -> Result<(MsgFields, u32), MsgGetError> {
    let mut lock = klock::lock_cpu::<Cfg>();
    let tid = lock.running.ok_or(MsgGetError::BadContext)?;
    if let Some(msg) = get_core::<Cfg>(tid, &mut lock) {
        return Ok(msg);
    }
    task::block_running_task(&mut lock, tid, BlockFlags::MSG, None);
    task::unlock_cpu_and_check_preemption(lock);
    Cfg::reschedule();

    let mut lock = klock::lock_cpu::<Cfg>();
    Ok(get_core::<Cfg>(tid, &mut lock).expect("woken for a message that is not there"))
}

/// `msg_get_t` — as `msg_get_w`, with a timeout.
pub fn msg_get_t<Cfg: SystemCfg + Platform>(ticks: u32) -> Result<(MsgFields, u32), MsgGetError> {
    let mut lock = klock::lock_cpu::<Cfg>();
    let tid = lock.running.ok_or(MsgGetError::BadContext)?;
    if let Some(msg) = get_core::<Cfg>(tid, &mut lock) {
        return Ok(msg);
    }
    drop(lock);

    crate::timer::start_wake_timer::<Cfg>(tid, ticks);
    let mut lock = klock::lock_cpu::<Cfg>();
    task::block_running_task(&mut lock, tid, BlockFlags::MSG_TIMEOUT, None);
    task::unlock_cpu_and_check_preemption(lock);
    Cfg::reschedule();
    crate::timer::cancel_wake_timer::<Cfg>(tid);

    let mut lock = klock::lock_cpu::<Cfg>();
    match lock.ready_list.rt(tid).wake_reason {
        WakeReason::Timeout => Err(MsgGetError::Timeout),
        _ => Ok(get_core::<Cfg>(tid, &mut lock).expect("woken for a message that is not there")),
    }
}

/// `msg_purge(matching_fields, all)` — free every block in every inbox
/// whose prefix+id matches `mask`/`value`. If `all` is false, stop after
/// the first match.
pub fn msg_purge<Cfg: SystemCfg + Platform>(prefix: u16, id: u16, all: bool) -> usize {
    let mut lock = klock::lock_cpu::<Cfg>();
    let mut purged = 0;
    for t in 0..Cfg::NUM_TASKS {
        let tid = TaskId(t as u8);
        for p in 0..MSG_PRIORITY_LEVELS {
            let mut cursor = lock.ready_list.rt(tid).inbox[p].head;
            let mut prev: Option<u16> = None;
            while let Some(block) = cursor {
                let next = lock.msg_pool.blocks[block as usize].flink;
                let unpacked = MsgFields::unpack(lock.msg_pool.blocks[block as usize].fields);
                if unpacked.prefix == prefix && unpacked.id == id {
                    match prev {
                        Some(p0) => lock.msg_pool.blocks[p0 as usize].flink = next,
                        None => lock.ready_list.rt_mut(tid).inbox[p].head = next,
                    }
                    if next.is_none() {
                        lock.ready_list.rt_mut(tid).inbox[p].tail = prev;
                    }
                    release_block::<Cfg>(&mut lock, block);
                    purged += 1;
                    cursor = next;
                    if !all {
                        return purged;
                    }
                    continue;
                }
                prev = Some(block);
                cursor = next;
            }
        }
    }
    purged
}

/// `msg_drain(tid, from_priority)` — free every block at or below
/// `from_priority` (numerically below or equal, i.e. as urgent or more)
/// in `tid`'s inboxes.
pub fn msg_drain<Cfg: SystemCfg + Platform>(tid: TaskId, from_priority: u8) -> usize {
    let mut lock = klock::lock_cpu::<Cfg>();
    let mut drained = 0;
    for p in 0..=priority_index::<Cfg>(from_priority) {
        let mut cursor = lock.ready_list.rt(tid).inbox[p].head;
        lock.ready_list.rt_mut(tid).inbox[p] = task::InboxQueue { head: None, tail: None };
        while let Some(block) = cursor {
            cursor = lock.msg_pool.blocks[block as usize].flink;
            release_block::<Cfg>(&mut lock, block);
            drained += 1;
        }
    }
    drained
}

/// `msg_peek` — look at the next message to be received without
/// dequeuing it.
pub fn msg_peek<Cfg: SystemCfg + Platform>(tid: TaskId) -> Option<(MsgFields, u32)> {
    let lock = klock::lock_cpu::<Cfg>();
    for p in 0..Cfg::MSG_PRIORITIES.min(MSG_PRIORITY_LEVELS) {
        if let Some(block) = lock.ready_list.rt(tid).inbox[p].head {
            let b = lock.msg_pool.blocks[block as usize];
            return Some((MsgFields::unpack(b.fields), b.parameter));
        }
    }
    None
}

/// `get` half of the message-block pool's own public API: take a block
/// straight from the free list, without sending it anywhere.
pub fn msg_get_block<Cfg: SystemCfg + Platform>() -> Option<u16> {
    let mut lock = klock::lock_cpu::<Cfg>();
    lock.msg_pool.get_block()
}

/// `free` half of the message-block pool's own public API: return a
/// block obtained from `msg_get_block` without having sent it.
pub fn msg_free_block<Cfg: SystemCfg + Platform>(block: u16) {
    let mut lock = klock::lock_cpu::<Cfg>();
    release_block::<Cfg>(&mut lock, block);
    task::unlock_cpu_and_check_preemption(lock);
}

/// `msg_send_by_block(block, fields, parameter, dest)` — deliver using a
/// block the caller already owns (from `msg_get_block`), skipping the
/// pool allocation `msg_send` would otherwise do.
pub fn msg_send_by_block<Cfg: SystemCfg + Platform>(
    block: u16,
    fields: MsgFields,
    parameter: u32,
    dest: TaskId,
) -> MsgSendOutcome {
    let mut lock = klock::lock_cpu::<Cfg>();
    lock.msg_pool.blocks[block as usize].fields = fields.pack();
    lock.msg_pool.blocks[block as usize].parameter = parameter;
    let prio_idx = priority_index::<Cfg>(fields.priority);
    enqueue::<Cfg>(&mut lock, dest, prio_idx, block);
    let outcome = wake_or_abort::<Cfg>(&mut lock, dest, fields.priority);
    task::unlock_cpu_and_check_preemption(lock);
    outcome
}

fn wake_or_abort<Cfg: SystemCfg + Platform>(
    lock: &mut CpuLockGuard<'_, Cfg>,
    dest: TaskId,
    priority: u8,
) -> MsgSendOutcome {
    let rt = lock.ready_list.rt(dest);
    if rt.state == TaskState::Waiting && rt.block_flags.intersects(BlockFlags::MSG | BlockFlags::MSG_TIMEOUT) {
        task::wake_task(lock, dest, WakeReason::Normal);
        MsgSendOutcome::AwokeReceiver
    } else if rt.state == TaskState::Waiting
        && !rt.status.contains(task::StatusFlags::BOP_LOCKED)
        && rt.abort_message_priority.map_or(false, |abort_pri| priority <= abort_pri)
    {
        task::wake_task(lock, dest, WakeReason::MsgAbort);
        MsgSendOutcome::AbortedReceiver
    } else {
        MsgSendOutcome::Delivered
    }
}

/// `msg_send_args_w(fields, parameter, dest)` — as `msg_send`, but blocks
/// until a message block is free instead of returning `NoMsgBlock`.
pub fn msg_send_args_w<Cfg: SystemCfg + Platform>(fields: MsgFields, parameter: u32, dest: TaskId) -> MsgSendOutcome {
    let block = get_block_w::<Cfg>();
    msg_send_by_block::<Cfg>(block, fields, parameter, dest)
}

fn get_block_w<Cfg: SystemCfg + Platform>() -> u16 {
    let mut lock = klock::lock_cpu::<Cfg>();
    if let Some(block) = lock.msg_pool.get_block() {
        return block;
    }
    let tid = lock.running.expect("msg_send_args_w called outside task context");
    lock.msg_waiter_insert(tid);
    task::block_running_task(&mut lock, tid, BlockFlags::MSG, None);
    task::unlock_cpu_and_check_preemption(lock);
    Cfg::reschedule();

    let mut lock = klock::lock_cpu::<Cfg>();
    lock.msg_pool.get_block().expect("woken for a message block that is not there")
}

/// `msg_send_struct_w(fields, ptr, dest)` — send a pointer to
/// caller-owned storage, requiring `Cfg::CAPABILITIES.local_struct`, and
/// block until the receiver signals it has finished reading (spec.md
/// §6's "local struct" capability). Built directly on
/// `msg_send_and_bop_wait_w`: the receiver must reply with `bop_send` to
/// the sender once it's done with `ptr`.
pub fn msg_send_struct_w<Cfg: SystemCfg + Platform>(
    fields: MsgFields,
    ptr: u32,
    dest: TaskId,
) -> Result<(), crate::error::BopWaitError> {
    debug_assert!(Cfg::CAPABILITIES.local_struct, "msg_send_struct_w used without the local_struct capability");
    msg_send_and_bop_wait_w::<Cfg>(fields, ptr, dest, None)
}

/// `msg_get_args_w` — identical payload shape to `msg_get_w`; named
/// separately only to match the calling convention of a caller that
/// always expects a plain `parameter` word ("args").
pub fn msg_get_args_w<Cfg: SystemCfg + Platform>() -> Result<(MsgFields, u32), MsgGetError> {
    msg_get_w::<Cfg>()
}

/// `msg_get_args_t` — as `msg_get_args_w`, with a timeout.
pub fn msg_get_args_t<Cfg: SystemCfg + Platform>(ticks: u32) -> Result<(MsgFields, u32), MsgGetError> {
    msg_get_t::<Cfg>(ticks)
}

/// `msg_get_struct_w` — receives a message sent by `msg_send_struct_w`;
/// the caller is responsible for calling `bop_send` back to the sender
/// once done reading the pointed-to struct.
pub fn msg_get_struct_w<Cfg: SystemCfg + Platform>() -> Result<(MsgFields, u32), MsgGetError> {
    msg_get_w::<Cfg>()
}

/// `msg_get_struct_t` — as `msg_get_struct_w`, with a timeout.
pub fn msg_get_struct_t<Cfg: SystemCfg + Platform>(ticks: u32) -> Result<(MsgFields, u32), MsgGetError> {
    msg_get_t::<Cfg>(ticks)
}

/// `msg_send_and_bop_wait_w(fields, parameter, dest, abort_pri)` — send,
/// then wait for a reply BOP, with the caller briefly boosted to at
/// least `dest`'s priority so `dest` cannot preempt, process, and reply
/// before the caller reaches its BOP wait (spec.md §4.3).
pub fn msg_send_and_bop_wait_w<Cfg: SystemCfg + Platform>(
    fields: MsgFields,
    parameter: u32,
    dest: TaskId,
    abort_priority: Option<u8>,
) -> Result<(), crate::error::BopWaitError> {
    send_and_boost::<Cfg>(fields, parameter, dest);
    let result = crate::bop::bop_wait_w::<Cfg>(abort_priority);
    restore_boost::<Cfg>();
    result
}

/// As [`msg_send_and_bop_wait_w`], with a timeout on the BOP wait.
pub fn msg_send_and_bop_wait_t<Cfg: SystemCfg + Platform>(
    fields: MsgFields,
    parameter: u32,
    dest: TaskId,
    abort_priority: Option<u8>,
    ticks: u32,
) -> Result<(), crate::error::BopWaitError> {
    send_and_boost::<Cfg>(fields, parameter, dest);
    let result = crate::bop::bop_wait_t::<Cfg>(abort_priority, ticks);
    restore_boost::<Cfg>();
    result
}

fn send_and_boost<Cfg: SystemCfg + Platform>(fields: MsgFields, parameter: u32, dest: TaskId) {
    let mut lock = klock::lock_cpu::<Cfg>();
    let caller = lock.running.expect("msg_send_and_bop_wait called outside task context");
    let dest_priority = lock.ready_list.rt(dest).priority;
    if dest_priority < lock.ready_list.rt(caller).priority {
        task::System::<Cfg>::boost_to(&mut lock, caller, dest_priority);
    }
    let _ = send_into_lock::<Cfg>(&mut lock, fields.pack(), parameter, dest);
    task::unlock_cpu_and_check_preemption(lock);
}

fn restore_boost<Cfg: SystemCfg + Platform>() {
    let mut lock = klock::lock_cpu::<Cfg>();
    let caller = lock.running.expect("msg_send_and_bop_wait called outside task context");
    task::System::<Cfg>::unboost(&mut lock, caller);
    task::unlock_cpu_and_check_preemption(lock);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestCfg;

    #[test]
    fn msg_fields_pack_unpack_round_trips() {
        let fields = MsgFields { priority: 5, sending_task: Some(3), id: 777, prefix: 42 };
        assert_eq!(MsgFields::unpack(fields.pack()), fields);

        let isr_fields = MsgFields { priority: 0, sending_task: None, id: 0, prefix: 0 };
        assert_eq!(MsgFields::unpack(isr_fields.pack()).sending_task, None);
    }

    #[test]
    fn send_then_get_round_trips_fields_and_parameter() {
        TestCfg::reset();
        let dest = TaskId(0);
        task::System::<TestCfg>::launch(dest, 0).unwrap();
        let fields = MsgFields { priority: 1, sending_task: Some(1), id: 9, prefix: 1 };
        let outcome = msg_send::<TestCfg>(fields, 123, dest).unwrap();
        assert_eq!(outcome, MsgSendOutcome::Delivered);

        {
            let mut lock = klock::lock_cpu::<TestCfg>();
            lock.running = Some(dest);
        }
        let (got_fields, got_param) = msg_get_w::<TestCfg>().unwrap();
        assert_eq!(got_fields, fields);
        assert_eq!(got_param, 123);
    }

    /// Scenario 1 (spec.md §8): three sends at descending urgency (LOW,
    /// MID, HIGH) arrive in FIFO send order; the receiver drains them in
    /// priority order regardless.
    #[test]
    fn three_way_message_priority_ordering() {
        TestCfg::reset();
        let a = TaskId(0);
        task::System::<TestCfg>::launch(a, 0).unwrap();

        const HIGH: u8 = 0;
        const MID: u8 = 1;
        const LOW: u8 = 2;
        let send = |priority: u8, id: u16, param: u32| {
            let fields = MsgFields { priority, sending_task: Some(1), id, prefix: 1 };
            msg_send::<TestCfg>(fields, param, a).unwrap();
        };
        send(LOW, 1, 5);
        send(MID, 2, 6);
        send(HIGH, 3, 7);

        {
            let mut lock = klock::lock_cpu::<TestCfg>();
            lock.running = Some(a);
        }
        let (_, p1) = msg_get_w::<TestCfg>().unwrap();
        let (_, p2) = msg_get_w::<TestCfg>().unwrap();
        let (_, p3) = msg_get_w::<TestCfg>().unwrap();
        assert_eq!((p1, p2, p3), (7, 6, 5));
    }
}
