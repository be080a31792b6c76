//! Spin-policy configuration.
//!
//! The spin bounds govern how long a waiter busy-waits for an imminent
//! match before parking. The values are workload-independent constants
//! derived from the CPU count: a uniprocessor never spins (the counterpart
//! cannot make progress while we hold the CPU), multiprocessors spin a
//! short bounded number of iterations, longer when the wait is untimed.
//!
//! # Configuration Precedence
//!
//! 1. **Environment variables**: `HANDOFF_MAX_TIMED_SPINS`,
//!    `HANDOFF_MAX_UNTIMED_SPINS`
//! 2. **Defaults**: 0 on a single-CPU host, otherwise 32 timed and
//!    16x that untimed
//!
//! Unparseable environment values fall back to the defaults; spin tuning
//! must never abort startup.

use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable overriding the timed spin bound.
pub const ENV_MAX_TIMED_SPINS: &str = "HANDOFF_MAX_TIMED_SPINS";
/// Environment variable overriding the untimed spin bound.
pub const ENV_MAX_UNTIMED_SPINS: &str = "HANDOFF_MAX_UNTIMED_SPINS";

/// Timed waits at or below this threshold spin instead of parking; the
/// park/unpark round trip costs more than the remaining wait.
pub const SPIN_FOR_TIMEOUT_THRESHOLD: Duration = Duration::from_nanos(1000);

/// Resolved spin policy, computed once per process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SpinConfig {
    /// Detected CPU count.
    pub ncpus: usize,
    /// Spin iterations before parking when a deadline is armed.
    pub max_timed_spins: usize,
    /// Spin iterations before parking on an untimed wait.
    pub max_untimed_spins: usize,
}

impl SpinConfig {
    /// Computes the policy from a CPU count, without env overrides.
    #[must_use]
    pub const fn for_cpus(ncpus: usize) -> Self {
        let max_timed_spins = if ncpus < 2 { 0 } else { 32 };
        Self {
            ncpus,
            max_timed_spins,
            max_untimed_spins: max_timed_spins * 16,
        }
    }

    /// Returns the process-wide policy, resolving it on first use.
    #[must_use]
    pub fn get() -> &'static Self {
        static GLOBAL: OnceLock<SpinConfig> = OnceLock::new();
        GLOBAL.get_or_init(|| {
            let ncpus = std::thread::available_parallelism().map_or(1, usize::from);
            let mut config = Self::for_cpus(ncpus);
            if let Some(v) = read_env_usize(ENV_MAX_TIMED_SPINS) {
                config.max_timed_spins = v;
            }
            if let Some(v) = read_env_usize(ENV_MAX_UNTIMED_SPINS) {
                config.max_untimed_spins = v;
            }
            config
        })
    }

    /// Spin budget for a wait, per the policy.
    #[must_use]
    pub const fn spins(&self, timed: bool) -> usize {
        if timed {
            self.max_timed_spins
        } else {
            self.max_untimed_spins
        }
    }
}

fn read_env_usize(name: &str) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    let trimmed = val.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse().ok()
}
