use std::fmt;

/// Events emitted by the admission engine and the sweepers.
///
/// Events flow through a [`TelemetrySink`](super::TelemetrySink); the engine
/// awaits the sink inline, so slow sinks should be wrapped in a
/// [`NonBlockingSink`](super::NonBlockingSink).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LimiterEvent {
    /// A request was admitted.
    Admitted {
        key: String,
        path: AdmissionPath,
    },
    /// A request was denied.
    Denied {
        key: String,
        retry_after_secs: u64,
        path: AdmissionPath,
    },
    /// A store fault or timeout was converted into an admission.
    FailedOpen {
        key: String,
        cause: String,
    },
    /// A fast-path write-through could not be applied to the store.
    WriteThroughFailed {
        key: String,
        cause: String,
    },
    /// The local cache sweep removed entries.
    CacheSwept {
        removed: usize,
        remaining: usize,
    },
    /// The retention sweeper deleted persisted rows.
    RetentionPurged {
        deleted: u64,
        cutoff: u64,
    },
    /// The retention sweeper could not reach the store.
    RetentionFailed {
        cause: String,
    },
}

/// Which tier produced a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionPath {
    /// The global kill switch short-circuited the check.
    Disabled,
    /// Decided from the local cache.
    Fast,
    /// Decided by the store's atomic increment or a saturated store read.
    Slow,
    /// The store window was absent or expired and this request started a new one.
    Reset,
    /// The store failed or timed out and the request was let through.
    FailOpen,
}

impl fmt::Display for AdmissionPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdmissionPath::Disabled => "disabled",
            AdmissionPath::Fast => "fast",
            AdmissionPath::Slow => "slow",
            AdmissionPath::Reset => "reset",
            AdmissionPath::FailOpen => "fail_open",
        };
        f.write_str(name)
    }
}

impl fmt::Display for LimiterEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LimiterEvent::Admitted { key, path } => write!(f, "Admitted({key}, path={path})"),
            LimiterEvent::Denied { key, retry_after_secs, path } => {
                write!(f, "Denied({key}, retry_after={retry_after_secs}s, path={path})")
            }
            LimiterEvent::FailedOpen { key, cause } => write!(f, "FailedOpen({key}, cause={cause})"),
            LimiterEvent::WriteThroughFailed { key, cause } => {
                write!(f, "WriteThroughFailed({key}, cause={cause})")
            }
            LimiterEvent::CacheSwept { removed, remaining } => {
                write!(f, "CacheSwept(removed={removed}, remaining={remaining})")
            }
            LimiterEvent::RetentionPurged { deleted, cutoff } => {
                write!(f, "RetentionPurged(deleted={deleted}, cutoff={cutoff})")
            }
            LimiterEvent::RetentionFailed { cause } => write!(f, "RetentionFailed(cause={cause})"),
        }
    }
}
