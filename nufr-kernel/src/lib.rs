//! A small preemptive, priority-based real-time kernel and service layer
//! for single-core targets (Cortex-M, MSP430, and a POSIX host
//! simulator port), covering task scheduling, a blocking-wake-signal
//! primitive ("BOP"), an inter-task message system, semaphores and
//! priority-inheriting mutexes, a fixed-block memory pool, chained-buffer
//! "particles", and an application timer wheel.
//!
//! Every module keeps its mutable state inside one [`klock::KernelState`],
//! taken under one lock ([`klock::lock_cpu`]); `Cfg: cfg::SystemCfg` is
//! the static, per-application configuration threaded through every
//! public entry point, and `Cfg: platform::Platform` is the per-target
//! hook for interrupt masking and context switching.
#![cfg_attr(not(test), no_std)]

pub mod bop;
pub mod cfg;
pub mod error;
pub mod klock;
pub mod message;
pub mod particle;
pub mod platform;
pub mod pool;
pub mod sanity;
pub mod semaphore;
pub mod task;
pub mod timer;

#[cfg(test)]
mod test_support;

pub use cfg::SystemCfg;
pub use platform::Platform;
pub use sanity::{nufr_init, validate_cfg};

pub use bop::{bop_send, bop_wait_t, bop_wait_w};
pub use error::{
    BadContextError, BadIdError, BopSendError, BopWaitError, LockError, MsgGetError, MsgSendError, MsgSendOutcome,
    PclError, Violation, WaitError,
};
pub use message::{
    msg_drain, msg_free_block, msg_get_args_t, msg_get_args_w, msg_get_block, msg_get_struct_t, msg_get_struct_w,
    msg_get_t, msg_get_w, msg_peek, msg_purge, msg_send, msg_send_and_bop_wait_t, msg_send_and_bop_wait_w,
    msg_send_args_w, msg_send_by_block, msg_send_multi, msg_send_struct_w, MsgFields,
};
pub use particle::{
    pcl_alloc_chain_wt, pcl_chain_capacity, pcl_contiguous_count, pcl_count_pcls_in_chain, pcl_free_chain,
    pcl_get_previous_pcl, pcl_lengthen_chain_wt, pcl_pcls_for_capacity, pcl_read, pcl_seek_ffwd, pcl_seek_rewind,
    pcl_set_seek_to_headerless_offset, pcl_set_seek_to_packet_offset, pcl_write_data_continue,
    pcl_write_data_no_continue, pcl_write_data_wt, pool_allocate, pool_allocate_t, pool_allocate_w, pool_free,
    pool_init, pool_is_element, Seek,
};
pub use semaphore::{
    mutex_init, mutex_lock_t, mutex_lock_w, mutex_unlock, sema_count_get, sema_get_t, sema_get_w, sema_init,
    sema_release, MutexId, SemaphoreId,
};
pub use task::{System, TaskId};
pub use timer::{
    timer_alloc, timer_expire_timer_callin, timer_free, timer_init, timer_kill, timer_start, TimerId, TimerMode,
};
