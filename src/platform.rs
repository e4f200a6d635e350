//! Best-effort process hardening.
//!
//! Keeps the master key out of core dumps: on Linux the process is marked
//! non-dumpable and the core size limit is set to zero; other Unix
//! systems only get the rlimit.  Elsewhere this is a no-op.

/// A hardening step that did not take effect.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardeningFailure {
    pub step: &'static str,
    pub errno: Option<i32>,
}

/// Apply every available hardening step and report the ones that failed.
pub fn harden_process() -> Vec<HardeningFailure> {
    let mut failures = Vec::new();

    #[cfg(target_os = "linux")]
    {
        // SAFETY: prctl with PR_SET_DUMPABLE takes plain integer arguments.
        let r = unsafe { libc::prctl(libc::PR_SET_DUMPABLE, 0, 0, 0, 0) };
        if r != 0 {
            failures.push(HardeningFailure {
                step: "prctl(PR_SET_DUMPABLE, 0)",
                errno: std::io::Error::last_os_error().raw_os_error(),
            });
        }
    }

    #[cfg(unix)]
    {
        let limit = libc::rlimit {
            rlim_cur: 0,
            rlim_max: 0,
        };
        // SAFETY: `limit` is a valid rlimit that outlives the call.
        let r = unsafe { libc::setrlimit(libc::RLIMIT_CORE, &limit) };
        if r != 0 {
            failures.push(HardeningFailure {
                step: "setrlimit(RLIMIT_CORE, 0)",
                errno: std::io::Error::last_os_error().raw_os_error(),
            });
        }
    }

    for failure in &failures {
        tracing::warn!(step = failure.step, errno = ?failure.errno, "process hardening step failed");
    }
    failures
}
