//! Config validation and boot sequencing (spec.md §7's assertion
//! categories).
//!
//! The teacher validates a `KernelCfg` at compile time, inside the
//! `cfg!`/`bind!` configurator; this kernel's plain-`trait` configuration
//! surface (see `cfg.rs`) can't do that, so the same checks run once at
//! boot instead, via [`sanity_check!`]. In a normal build a failed check
//! is a `debug_assert!` (compiled out of release); with the `strict_sanity`
//! feature it always panics, for applications that would rather fail fast
//! in the field than run on an unvalidated config.
use crate::{cfg::SystemCfg, error::Violation, platform::Platform};

/// Panic (any build) or `debug_assert!` (unless `strict_sanity` is on) if
/// `$cond` is false, citing `$violation`.
#[macro_export]
macro_rules! sanity_check {
    ($cond:expr, $violation:expr) => {
        if cfg!(feature = "strict_sanity") {
            assert!($cond, "nufr sanity check failed: {}", $violation);
        } else {
            debug_assert!($cond, "nufr sanity check failed: {}", $violation);
        }
    };
}

/// Validate `Cfg`'s declared configuration against this kernel's compiled
/// bounds and internal consistency rules (spec.md §7).
pub fn validate_cfg<Cfg: SystemCfg>() -> Result<(), Violation> {
    if Cfg::NUM_TASKS == 0 || Cfg::NUM_TASKS > crate::cfg::MAX_TASKS {
        return Err(Violation::ConfigTooLarge);
    }
    if Cfg::NUM_SEMAPHORES > crate::cfg::MAX_SEMAPHORES {
        return Err(Violation::ConfigTooLarge);
    }
    if Cfg::NUM_MUTEXES > crate::cfg::MAX_MUTEXES {
        return Err(Violation::ConfigTooLarge);
    }
    if Cfg::NUM_TIMERS > crate::cfg::MAX_TIMERS {
        return Err(Violation::ConfigTooLarge);
    }
    if Cfg::MAX_MSGS > crate::cfg::MAX_MSGS {
        return Err(Violation::ConfigTooLarge);
    }
    if Cfg::NUM_PCLS > crate::cfg::MAX_PCLS {
        return Err(Violation::ConfigTooLarge);
    }
    if Cfg::PCL_SIZE == 0 || Cfg::PCL_SIZE > crate::cfg::MAX_PCL_SIZE {
        return Err(Violation::ConfigTooLarge);
    }
    if Cfg::MSG_PRIORITIES == 0 || Cfg::MSG_PRIORITIES > crate::cfg::MSG_PRIORITY_LEVELS {
        return Err(Violation::ConfigTooLarge);
    }
    if Cfg::LOWEST_PRIORITY < Cfg::GUARANTEED_HIGHEST_PRIORITY {
        return Err(Violation::PriorityOutOfRange);
    }
    for t in 0..Cfg::NUM_TASKS {
        let attr = Cfg::task_cb(t as u8).attr;
        if attr.stack_size == 0 {
            return Err(Violation::StackSizeZero);
        }
        if attr.base_priority > Cfg::LOWEST_PRIORITY {
            return Err(Violation::PriorityOutOfRange);
        }
    }
    Ok(())
}

/// Bring up every kernel submodule's static state, in the order each
/// depends on the last (the message pool and particle pool have no
/// dependency on each other or on the semaphore/mutex/timer tables, so
/// their relative order doesn't matter; all must run before any task is
/// launched). Call exactly once at boot, before `launch`-ing any task.
pub fn nufr_init<Cfg: SystemCfg + Platform>() -> Result<(), Violation> {
    validate_cfg::<Cfg>()?;
    crate::message::msg_init::<Cfg>();
    crate::particle::pool_init::<Cfg>();
    crate::timer::timer_init::<Cfg>();
    crate::semaphore::sema_init::<Cfg>();
    crate::semaphore::mutex_init::<Cfg>();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::TestCfg;

    #[test]
    fn validate_cfg_accepts_the_test_fixture() {
        assert!(validate_cfg::<TestCfg>().is_ok());
    }

    #[test]
    fn nufr_init_is_idempotent_enough_to_run_once_cleanly() {
        TestCfg::reset();
        assert!(nufr_init::<TestCfg>().is_ok());
    }
}
