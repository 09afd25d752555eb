//! Chained fixed-size buffers ("particles") with a header in the first
//! buffer of each chain (spec.md §4.6).
//!
//! The particle pool itself is one instantiation of [`crate::pool::Pool`];
//! its blocking `pool_allocate_w/t`/`pool_free`/`pool_is_element` wrappers
//! are grounded on `semaphore.rs`'s `sema_get_w/t`/`sema_release` shape —
//! a non-blocking try first, then insert onto a priority waiter list and
//! block, mirrored here against the pool's own embedded count rather than
//! a separate semaphore table entry (see `DESIGN.md`). Chain bookkeeping
//! (next-particle link, per-particle used-length, per-chain tail/length)
//! is kept in parallel side arrays rather than packed into particle
//! payload bytes, the same choice `message.rs` makes for `MsgBlock`'s
//! `flink`.
use crate::{
    cfg::{SystemCfg, MAX_PCLS, MAX_PCL_SIZE},
    error::PclError,
    klock::{self, CpuLockGuard},
    platform::Platform,
    pool::Pool,
    task::{self, BlockFlags, TaskId, TaskState, WakeReason},
};

/// Bytes of the first particle in a chain spent on the chain header,
/// when `alloc_chain_wt` is asked for one (spec.md §4.6).
pub const HEADER_SIZE: u16 = 8;

/// A position within a chain: which particle, and a byte offset inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Seek {
    pub pcl: u16,
    pub offset: u16,
}

/// The particle pool plus per-particle chain bookkeeping, reached through
/// [`crate::klock::KernelState::pcl_pool`].
pub struct PclPool<Cfg: SystemCfg> {
    pool: Pool<MAX_PCL_SIZE, MAX_PCLS>,
    /// Next particle in the same chain, or `None` at the chain's tail.
    chain_next: [Option<u16>; MAX_PCLS],
    /// Bytes written so far in this particle.
    length: [u16; MAX_PCLS],
    /// Valid only on a chain's head particle: the chain's tail index.
    tail: [Option<u16>; MAX_PCLS],
    /// Valid only on a chain's head particle: particle count in the chain.
    num_pcls: [u16; MAX_PCLS],
    /// Valid only on a chain's head particle: was it allocated `with_header`?
    has_header: [bool; MAX_PCLS],
    _marker: core::marker::PhantomData<Cfg>,
}

impl<Cfg: SystemCfg> PclPool<Cfg> {
    pub const fn new() -> Self {
        Self {
            pool: Pool::new(),
            chain_next: [None; MAX_PCLS],
            length: [0; MAX_PCLS],
            tail: [None; MAX_PCLS],
            num_pcls: [0; MAX_PCLS],
            has_header: [false; MAX_PCLS],
            _marker: core::marker::PhantomData,
        }
    }

    /// `pool_init()` — must run once at boot.
    pub fn init(&mut self) {
        self.pool.init(Cfg::NUM_PCLS);
        self.chain_next = [None; MAX_PCLS];
        self.length = [0; MAX_PCLS];
        self.tail = [None; MAX_PCLS];
        self.num_pcls = [0; MAX_PCLS];
        self.has_header = [false; MAX_PCLS];
    }

    /// Per-particle usable payload capacity, accounting for the header
    /// reserved on a `with_header` chain's head particle.
    fn capacity(&self, pcl: u16, head: u16) -> u16 {
        if pcl == head && self.has_header[head as usize] {
            Cfg::PCL_SIZE.min(MAX_PCL_SIZE) as u16 - HEADER_SIZE
        } else {
            Cfg::PCL_SIZE.min(MAX_PCL_SIZE) as u16
        }
    }
}

/// `pool_init()`.
pub fn pool_init<Cfg: SystemCfg + Platform>() {
    let mut lock = klock::lock_cpu::<Cfg>();
    lock.pcl_pool.init();
}

/// `pool_is_element(ptr)`.
pub fn pool_is_element<Cfg: SystemCfg + Platform>(pcl: u16) -> bool {
    let lock = klock::lock_cpu::<Cfg>();
    lock.pcl_pool.pool.is_element(pcl)
}

/// `pool_free(element)` — non-blocking, wakes the highest-priority
/// waiter if one is blocked in `pool_allocate_w/t`.
pub fn pool_free<Cfg: SystemCfg + Platform>(pcl: u16) {
    let mut lock = klock::lock_cpu::<Cfg>();
    free_one::<Cfg>(&mut lock, pcl);
    task::unlock_cpu_and_check_preemption(lock);
}

fn free_one<Cfg: SystemCfg + Platform>(lock: &mut CpuLockGuard<'_, Cfg>, pcl: u16) {
    lock.pcl_pool.pool.free(pcl);
    if let Some(waiter) = lock.pcl_pool.pool.waiters.head() {
        lock.pool_waiter_remove(waiter);
        task::wake_task(lock, waiter, WakeReason::Normal);
    }
}

/// `pool_allocate(from_isr)`'s non-blocking case: take a free element iff
/// one is there right now, ISR-safe. Per spec.md §4.5 this is the only
/// allocation path an ISR may use.
pub fn pool_allocate<Cfg: SystemCfg + Platform>() -> Option<u16> {
    let mut lock = klock::lock_cpu::<Cfg>();
    lock.pcl_pool.pool.try_allocate()
}

impl<Cfg: SystemCfg> crate::klock::KernelState<Cfg> {
    fn pool_waiter_insert(&mut self, tid: TaskId) {
        self.pcl_pool.pool.waiters.insert::<Cfg>(&mut self.ready_list.rt, tid);
    }

    fn pool_waiter_remove(&mut self, tid: TaskId) {
        self.pcl_pool.pool.waiters.remove(&mut self.ready_list.rt, tid);
    }

    fn pool_waiter_reorder(&mut self, tid: TaskId) {
        self.pcl_pool.pool.waiters.reorder::<Cfg>(&mut self.ready_list.rt, tid);
    }
}

pub(crate) fn reorder_pool_waiter<Cfg: SystemCfg + Platform>(lock: &mut CpuLockGuard<'_, Cfg>, tid: TaskId) {
    lock.pool_waiter_reorder(tid);
}

/// Called from `task::kill`/`exit_running` to detach a task from the
/// pool's waiter list if it was blocked in `pool_allocate_w/t`.
pub(crate) fn abandon_pool_wait<Cfg: SystemCfg + Platform>(lock: &mut CpuLockGuard<'_, Cfg>, tid: TaskId) {
    if core::mem::take(&mut lock.ready_list.rt_mut(tid).waiting_on_pool) {
        lock.pool_waiter_remove(tid);
    }
}

/// `pool_allocate_w()` — block until a particle is free.
pub fn pool_allocate_w<Cfg: SystemCfg + Platform>() -> u16 {
    let mut lock = klock::lock_cpu::<Cfg>();
    if let Some(pcl) = lock.pcl_pool.pool.try_allocate() {
        return pcl;
    }
    let tid = lock.running.expect("pool_allocate_w called outside task context");
    lock.pool_waiter_insert(tid);
    lock.ready_list.rt_mut(tid).waiting_on_pool = true;
    task::block_running_task(&mut lock, tid, BlockFlags::POOL, None);
    task::unlock_cpu_and_check_preemption(lock);
    Cfg::reschedule();

    let mut lock = klock::lock_cpu::<Cfg>();
    lock.ready_list.rt_mut(tid).waiting_on_pool = false;
    lock.pcl_pool.pool.try_allocate().expect("woken for a particle that is not there")
}

/// `pool_allocate_t(ticks)` — as `pool_allocate_w`, with a timeout.
pub fn pool_allocate_t<Cfg: SystemCfg + Platform>(ticks: u32) -> Result<u16, PclError> {
    let mut lock = klock::lock_cpu::<Cfg>();
    if let Some(pcl) = lock.pcl_pool.pool.try_allocate() {
        return Ok(pcl);
    }
    let tid = lock.running.expect("pool_allocate_t called outside task context");
    drop(lock);

    crate::timer::start_wake_timer::<Cfg>(tid, ticks);
    let mut lock = klock::lock_cpu::<Cfg>();
    lock.pool_waiter_insert(tid);
    lock.ready_list.rt_mut(tid).waiting_on_pool = true;
    task::block_running_task(&mut lock, tid, BlockFlags::POOL_TIMEOUT, None);
    task::unlock_cpu_and_check_preemption(lock);
    Cfg::reschedule();
    crate::timer::cancel_wake_timer::<Cfg>(tid);

    let mut lock = klock::lock_cpu::<Cfg>();
    lock.ready_list.rt_mut(tid).waiting_on_pool = false;
    match lock.ready_list.rt(tid).wake_reason {
        WakeReason::Timeout => {
            lock.pool_waiter_remove(tid);
            Err(PclError::Timeout)
        }
        _ => Ok(lock.pcl_pool.pool.try_allocate().expect("woken for a particle that is not there")),
    }
}

/// How many particles `alloc_chain_wt(capacity, with_header, ..)` needs.
pub fn pcl_pcls_for_capacity<Cfg: SystemCfg>(capacity: u32, with_header: bool) -> u16 {
    let element_size = Cfg::PCL_SIZE.min(MAX_PCL_SIZE) as u32;
    let first = if with_header { element_size.saturating_sub(HEADER_SIZE as u32) } else { element_size };
    if capacity <= first {
        return 1;
    }
    let remaining = capacity - first;
    1 + ((remaining + element_size - 1) / element_size) as u16
}

/// `alloc_chain_wt(capacity, with_header, timeout)`.
pub fn pcl_alloc_chain_wt<Cfg: SystemCfg + Platform>(
    capacity: u32,
    with_header: bool,
    ticks: Option<u32>,
) -> Result<u16, PclError> {
    let n = pcl_pcls_for_capacity::<Cfg>(capacity, with_header);
    let mut pcls: arrayvec::ArrayVec<u16, MAX_PCLS> = arrayvec::ArrayVec::new();
    for _ in 0..n {
        let got = match ticks {
            None => pool_allocate_w::<Cfg>(),
            Some(ticks) => match pool_allocate_t::<Cfg>(ticks) {
                Ok(pcl) => pcl,
                Err(e) => {
                    for &p in pcls.iter() {
                        pool_free::<Cfg>(p);
                    }
                    return Err(e);
                }
            },
        };
        pcls.push(got);
    }

    let mut lock = klock::lock_cpu::<Cfg>();
    for w in pcls.windows(2) {
        lock.pcl_pool.chain_next[w[0] as usize] = Some(w[1]);
    }
    let head = pcls[0];
    let tail = *pcls.last().unwrap();
    lock.pcl_pool.chain_next[tail as usize] = None;
    for &p in pcls.iter() {
        lock.pcl_pool.length[p as usize] = 0;
    }
    lock.pcl_pool.tail[head as usize] = Some(tail);
    lock.pcl_pool.num_pcls[head as usize] = n;
    lock.pcl_pool.has_header[head as usize] = with_header;
    Ok(head)
}

/// `lengthen_chain_wt(head, extra_bytes, timeout)`.
pub fn pcl_lengthen_chain_wt<Cfg: SystemCfg + Platform>(
    head: u16,
    extra_bytes: u32,
    ticks: Option<u32>,
) -> Result<(), PclError> {
    let element_size = Cfg::PCL_SIZE.min(MAX_PCL_SIZE) as u32;
    let added = ((extra_bytes + element_size - 1) / element_size) as u16;
    let mut pcls: arrayvec::ArrayVec<u16, MAX_PCLS> = arrayvec::ArrayVec::new();
    for _ in 0..added {
        let got = match ticks {
            None => pool_allocate_w::<Cfg>(),
            Some(ticks) => match pool_allocate_t::<Cfg>(ticks) {
                Ok(pcl) => pcl,
                Err(e) => {
                    for &p in pcls.iter() {
                        pool_free::<Cfg>(p);
                    }
                    return Err(e);
                }
            },
        };
        pcls.push(got);
    }

    let mut lock = klock::lock_cpu::<Cfg>();
    let old_tail = lock.pcl_pool.tail[head as usize].expect("lengthen_chain_wt on a non-head particle");
    let mut prev = old_tail;
    for &p in pcls.iter() {
        lock.pcl_pool.chain_next[prev as usize] = Some(p);
        lock.pcl_pool.length[p as usize] = 0;
        prev = p;
    }
    lock.pcl_pool.chain_next[prev as usize] = None;
    lock.pcl_pool.tail[head as usize] = Some(prev);
    lock.pcl_pool.num_pcls[head as usize] += added;
    Ok(())
}

/// `free_chain(head)` — return every particle in the chain to the pool.
pub fn pcl_free_chain<Cfg: SystemCfg + Platform>(head: u16) {
    let mut lock = klock::lock_cpu::<Cfg>();
    let mut cursor = Some(head);
    while let Some(pcl) = cursor {
        cursor = lock.pcl_pool.chain_next[pcl as usize];
        lock.pcl_pool.chain_next[pcl as usize] = None;
        free_one::<Cfg>(&mut lock, pcl);
    }
    lock.pcl_pool.tail[head as usize] = None;
    lock.pcl_pool.num_pcls[head as usize] = 0;
    lock.pcl_pool.has_header[head as usize] = false;
}

/// `count_pcls_in_chain(head)`.
pub fn pcl_count_pcls_in_chain<Cfg: SystemCfg + Platform>(head: u16) -> u16 {
    let lock = klock::lock_cpu::<Cfg>();
    lock.pcl_pool.num_pcls[head as usize]
}

/// `chain_capacity(head)` — total usable payload bytes across the chain.
pub fn pcl_chain_capacity<Cfg: SystemCfg + Platform>(head: u16) -> u32 {
    let lock = klock::lock_cpu::<Cfg>();
    let n = lock.pcl_pool.num_pcls[head as usize];
    let element_size = Cfg::PCL_SIZE.min(MAX_PCL_SIZE) as u32;
    let header = if lock.pcl_pool.has_header[head as usize] { HEADER_SIZE as u32 } else { 0 };
    (n as u32) * element_size - header
}

/// `set_seek_to_packet_offset(chain, off)` — offset 0 = first byte after
/// the header (or chain start, if headerless).
pub fn pcl_set_seek_to_packet_offset<Cfg: SystemCfg + Platform>(head: u16, off: u32) -> Seek {
    seek_from_headerless_offset::<Cfg>(head, off)
}

/// `set_seek_to_headerless_offset(chain, off)` — offset 0 = start of the
/// first particle's data, regardless of whether it carries a header.
pub fn pcl_set_seek_to_headerless_offset<Cfg: SystemCfg + Platform>(head: u16, off: u32) -> Seek {
    seek_from_headerless_offset::<Cfg>(head, off)
}

fn seek_from_headerless_offset<Cfg: SystemCfg + Platform>(head: u16, off: u32) -> Seek {
    let lock = klock::lock_cpu::<Cfg>();
    let mut pcl = head;
    let mut remaining = off;
    loop {
        let cap = lock.pcl_pool.capacity(pcl, head) as u32;
        if remaining < cap {
            return Seek { pcl, offset: remaining as u16 };
        }
        remaining -= cap;
        match lock.pcl_pool.chain_next[pcl as usize] {
            Some(next) => pcl = next,
            None => return Seek { pcl, offset: cap as u16 },
        }
    }
}

/// `seek_ffwd(seek, n)` — advance `n` bytes, bounded by the chain's end.
pub fn pcl_seek_ffwd<Cfg: SystemCfg + Platform>(head: u16, seek: Seek, n: u32) -> Result<Seek, PclError> {
    let lock = klock::lock_cpu::<Cfg>();
    let mut pcl = seek.pcl;
    let mut offset = seek.offset as u32 + n;
    loop {
        let cap = lock.pcl_pool.capacity(pcl, head) as u32;
        if offset <= cap {
            return Ok(Seek { pcl, offset: offset as u16 });
        }
        offset -= cap;
        match lock.pcl_pool.chain_next[pcl as usize] {
            Some(next) => pcl = next,
            None => return Err(PclError::OutOfParticles),
        }
    }
}

/// `seek_rewind(chain, seek, n)` — rewind at most one particle back
/// (spec.md §4.6).
pub fn pcl_seek_rewind<Cfg: SystemCfg + Platform>(head: u16, seek: Seek, n: u32) -> Result<Seek, PclError> {
    if seek.offset as u32 >= n {
        return Ok(Seek { pcl: seek.pcl, offset: seek.offset - n as u16 });
    }
    let lock = klock::lock_cpu::<Cfg>();
    let prev = previous_pcl(&lock.pcl_pool.chain_next, head, seek.pcl).ok_or(PclError::RewindTooFar)?;
    let prev_cap = lock.pcl_pool.capacity(prev, head) as u32;
    let remaining = n - seek.offset as u32;
    if remaining > prev_cap {
        return Err(PclError::RewindTooFar);
    }
    Ok(Seek { pcl: prev, offset: (prev_cap - remaining) as u16 })
}

/// `get_previous_pcl(chain, pcl)` — walk the chain from its head to find
/// the particle immediately before `pcl`.
pub fn pcl_get_previous_pcl<Cfg: SystemCfg + Platform>(head: u16, pcl: u16) -> Option<u16> {
    let lock = klock::lock_cpu::<Cfg>();
    previous_pcl(&lock.pcl_pool.chain_next, head, pcl)
}

fn previous_pcl(chain_next: &[Option<u16>; MAX_PCLS], head: u16, pcl: u16) -> Option<u16> {
    if head == pcl {
        return None;
    }
    let mut cursor = head;
    loop {
        match chain_next[cursor as usize] {
            Some(next) if next == pcl => return Some(cursor),
            Some(next) => cursor = next,
            None => return None,
        }
    }
}

/// `contiguous_count(seek)` — bytes available in `seek`'s particle from
/// its current offset to that particle's capacity.
pub fn pcl_contiguous_count<Cfg: SystemCfg + Platform>(head: u16, seek: Seek) -> u32 {
    let lock = klock::lock_cpu::<Cfg>();
    lock.pcl_pool.capacity(seek.pcl, head) as u32 - seek.offset as u32
}

/// `write_data_continue(seek, data)` — copy across particle boundaries,
/// returning the bytes actually written (fewer than `data.len()` if the
/// chain is exhausted) and the advanced seek.
pub fn pcl_write_data_continue<Cfg: SystemCfg + Platform>(
    head: u16,
    mut seek: Seek,
    data: &[u8],
) -> (Seek, usize) {
    let mut lock = klock::lock_cpu::<Cfg>();
    let mut written = 0;
    while written < data.len() {
        let cap = lock.pcl_pool.capacity(seek.pcl, head) as usize;
        let room = cap - seek.offset as usize;
        if room == 0 {
            match lock.pcl_pool.chain_next[seek.pcl as usize] {
                Some(next) => {
                    seek = Seek { pcl: next, offset: 0 };
                    continue;
                }
                None => break,
            }
        }
        let take = room.min(data.len() - written);
        let buf = lock.pcl_pool.pool.element_mut(seek.pcl);
        buf[seek.offset as usize..seek.offset as usize + take].copy_from_slice(&data[written..written + take]);
        seek.offset += take as u16;
        written += take;
        let used = lock.pcl_pool.length[seek.pcl as usize].max(seek.offset);
        lock.pcl_pool.length[seek.pcl as usize] = used;
    }
    (seek, written)
}

/// `write_data_wt(chain, seek, data, timeout)` — as
/// `write_data_continue`, but lengthens the chain first so the full
/// write always succeeds once allocation does.
pub fn pcl_write_data_wt<Cfg: SystemCfg + Platform>(
    head: u16,
    seek: Seek,
    data: &[u8],
    ticks: Option<u32>,
) -> Result<(Seek, usize), PclError> {
    let available = pcl_chain_capacity::<Cfg>(head) as i64
        - pcl_set_seek_to_headerless_offset::<Cfg>(head, 0).offset as i64;
    let _ = available;
    let needed = {
        let lock = klock::lock_cpu::<Cfg>();
        let mut remaining = data.len() as u32;
        let mut pcl = seek.pcl;
        let mut room = lock.pcl_pool.capacity(pcl, head) as u32 - seek.offset as u32;
        loop {
            if remaining <= room {
                break 0u32;
            }
            remaining -= room;
            match lock.pcl_pool.chain_next[pcl as usize] {
                Some(next) => {
                    pcl = next;
                    room = lock.pcl_pool.capacity(pcl, head) as u32;
                }
                None => break remaining,
            }
        }
    };
    if needed > 0 {
        pcl_lengthen_chain_wt::<Cfg>(head, needed as u32, ticks)?;
    }
    Ok(pcl_write_data_continue::<Cfg>(head, seek, data))
}

/// `write_data_no_continue(seek, data)` — as `write_data_continue`, but
/// never crosses into the next particle: writes at most `seek`'s
/// particle's remaining capacity and stops there.
pub fn pcl_write_data_no_continue<Cfg: SystemCfg + Platform>(
    head: u16,
    seek: Seek,
    data: &[u8],
) -> (Seek, usize) {
    let mut lock = klock::lock_cpu::<Cfg>();
    let cap = lock.pcl_pool.capacity(seek.pcl, head) as usize;
    let room = cap.saturating_sub(seek.offset as usize);
    let take = room.min(data.len());
    let buf = lock.pcl_pool.pool.element_mut(seek.pcl);
    buf[seek.offset as usize..seek.offset as usize + take].copy_from_slice(&data[..take]);
    let new_offset = seek.offset + take as u16;
    lock.pcl_pool.length[seek.pcl as usize] = lock.pcl_pool.length[seek.pcl as usize].max(new_offset);
    (Seek { pcl: seek.pcl, offset: new_offset }, take)
}

/// `read(seek, dst)` — copy out of the chain starting at `seek`, stopping
/// at the chain's end. Returns the advanced seek and bytes read.
pub fn pcl_read<Cfg: SystemCfg + Platform>(head: u16, mut seek: Seek, dst: &mut [u8]) -> (Seek, usize) {
    let lock = klock::lock_cpu::<Cfg>();
    let mut read = 0;
    while read < dst.len() {
        let used = lock.pcl_pool.length[seek.pcl as usize];
        if seek.offset >= used {
            match lock.pcl_pool.chain_next[seek.pcl as usize] {
                Some(next) => {
                    seek = Seek { pcl: next, offset: 0 };
                    continue;
                }
                None => break,
            }
        }
        let room = (used - seek.offset) as usize;
        let take = room.min(dst.len() - read);
        let buf = lock.pcl_pool.pool.element(seek.pcl);
        dst[read..read + take].copy_from_slice(&buf[seek.offset as usize..seek.offset as usize + take]);
        seek.offset += take as u16;
        read += take;
    }
    (seek, read)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestCfg;
    use quickcheck_macros::quickcheck;

    #[test]
    fn alloc_chain_then_write_and_read_round_trips() {
        TestCfg::reset();
        pool_init::<TestCfg>();
        let head = pcl_alloc_chain_wt::<TestCfg>(40, true, None).unwrap();
        let seek = pcl_set_seek_to_packet_offset::<TestCfg>(head, 0);
        let payload = b"hello, nufr particles";
        let (seek, written) = pcl_write_data_continue::<TestCfg>(head, seek, payload);
        assert_eq!(written, payload.len());

        let start = pcl_set_seek_to_packet_offset::<TestCfg>(head, 0);
        let mut buf = [0u8; 22];
        let (_, read) = pcl_read::<TestCfg>(head, start, &mut buf);
        assert_eq!(read, payload.len());
        assert_eq!(&buf[..read], payload);
        let _ = seek;
        pcl_free_chain::<TestCfg>(head);
    }

    #[test]
    fn pcls_for_capacity_accounts_for_header() {
        let n = pcl_pcls_for_capacity::<TestCfg>(10, true);
        assert_eq!(n, 1);
        let n = pcl_pcls_for_capacity::<TestCfg>(1000, true);
        assert!(n > 1);
    }

    /// Round-trip law (spec.md §8): a `write_data_wt` of `k` bytes followed
    /// by a seek to 0 and a read of `k` bytes returns those same `k` bytes,
    /// whatever they are and however many particles the chain spans.
    #[quickcheck]
    fn write_then_read_round_trips(payload: Vec<u8>) {
        TestCfg::reset();
        pool_init::<TestCfg>();
        let payload = &payload[..payload.len().min(80)];

        let head = pcl_alloc_chain_wt::<TestCfg>(payload.len().max(1) as u32, true, None).unwrap();
        let seek = pcl_set_seek_to_packet_offset::<TestCfg>(head, 0);
        let (_, written) = pcl_write_data_continue::<TestCfg>(head, seek, payload);
        assert_eq!(written, payload.len());

        let start = pcl_set_seek_to_packet_offset::<TestCfg>(head, 0);
        let mut buf = [0u8; 80];
        let (_, read) = pcl_read::<TestCfg>(head, start, &mut buf[..payload.len()]);
        assert_eq!(read, payload.len());
        assert_eq!(&buf[..read], payload);
        pcl_free_chain::<TestCfg>(head);
    }

    /// Scenario 5 (spec.md §8): once the pool is exhausted, a blocked
    /// `pool_allocate_w` waiter is woken by the next `pool_free` and gets a
    /// valid element. The block/wake halves are driven directly (mirroring
    /// what `pool_allocate_w` itself does around its `Cfg::reschedule()`
    /// call) since this single-threaded test has no second OS thread to
    /// actually suspend `pool_allocate_w` on.
    #[test]
    fn pool_blocking_allocation_wakes_waiter_on_free() {
        TestCfg::reset();
        pool_init::<TestCfg>();
        let a = TaskId(0);
        let b = TaskId(1);

        let mut allocated = Vec::new();
        while let Some(pcl) = pool_allocate::<TestCfg>() {
            allocated.push(pcl);
        }
        assert!(!allocated.is_empty());

        {
            let mut lock = klock::lock_cpu::<TestCfg>();
            lock.running = Some(b);
            lock.pool_waiter_insert(b);
            lock.ready_list.rt_mut(b).waiting_on_pool = true;
            task::block_running_task(&mut lock, b, BlockFlags::POOL, None);
        }

        let freed = allocated.pop().unwrap();
        {
            let mut lock = klock::lock_cpu::<TestCfg>();
            lock.running = Some(a);
        }
        pool_free::<TestCfg>(freed);

        {
            let lock = klock::lock_cpu::<TestCfg>();
            assert_eq!(lock.ready_list.rt(b).state, TaskState::Ready);
            assert_eq!(lock.ready_list.rt(b).wake_reason, WakeReason::Normal);
        }

        let mut lock = klock::lock_cpu::<TestCfg>();
        lock.ready_list.rt_mut(b).waiting_on_pool = false;
        let pcl = lock.pcl_pool.pool.try_allocate().expect("woken for a particle that is not there");
        drop(lock);
        assert!(pool_is_element::<TestCfg>(pcl));
    }
}
