use core_affinity::CoreId;
#[cfg(target_os = "linux")]
use libc::{SCHED_FIFO, sched_param, sched_setscheduler};
use tracing::warn;

/// Scheduling class requested for a worker thread.
///
/// Anything other than `OsDefault` asks for `SCHED_FIFO` realtime
/// scheduling, which needs CAP_SYS_NICE. On failure the thread keeps
/// running under the OS default scheduler.
#[derive(Clone, Copy, Debug, Default)]
pub enum ThreadPriority {
    #[default]
    OsDefault,
    Low,
    Medium,
    High,
    Custom(i32),
}

impl ThreadPriority {
    fn fifo_priority(self) -> Option<i32> {
        match self {
            Self::OsDefault => None,
            Self::Low => Some(40),
            Self::Medium => Some(60),
            Self::High => Some(75),
            Self::Custom(p) => Some(p),
        }
    }

    #[cfg(target_os = "linux")]
    fn apply(self) {
        let Some(sched_priority) = self.fifo_priority() else {
            return;
        };
        let param = sched_param { sched_priority };
        unsafe {
            let code = sched_setscheduler(0, SCHED_FIFO, &param);
            if code != 0 {
                warn!(%code, ?param, "couldn't set thread priority");
            }
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn apply(self) {
        if self.fifo_priority().is_some() {
            warn!(prio = ?self, "thread priority setting only supported on linux");
        }
    }
}

/// Pins the current thread to `core` (if given) and applies `prio`.
/// Call once at the top of a worker thread body.
pub fn boot_thread(core: Option<usize>, prio: ThreadPriority) {
    if let Some(id) = core {
        if !core_affinity::set_for_current(CoreId { id }) {
            warn!(core = id, "couldn't set core affinity");
        }
    }

    prio.apply();
}
