//! Kernel-wide error taxonomy.
//!
//! Every fallible kernel-internal operation (frame/virtual allocation,
//! paging, the heap, process-table and queue operations) returns
//! [`KernelResult<T>`]. The syscall dispatch boundary collapses a
//! `KernelError` down to the small signed-integer convention the user ABI
//! uses (zero or positive on success, a negative kind on failure); see
//! [`KernelError::to_syscall_errno`].
//!
//! Failures that are not recoverable — a corrupted heap header, a double
//! mapping with a mismatched value, an empty queue the caller assumed was
//! non-empty, an interrupt on an unknown vector — are never represented
//! here. Those use `panic!` directly, per the propagation policy: a
//! `KernelError` always means "a caller-correctable condition", never
//! "an invariant broke".

use core::fmt;

/// Result alias used throughout the kernel for recoverable failures.
pub type KernelResult<T> = Result<T, KernelError>;

/// The kernel's error taxonomy.
///
/// Variant names are the taxonomy's *kinds*; most carry the context that
/// made diagnosing the failure possible without re-deriving it from the
/// call site.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelError {
    /// Generic, otherwise-unclassified failure.
    GenericFailure,
    /// An argument failed validation (bad address, bad length, bad flag
    /// combination, misaligned value, ...).
    BadParameter,
    /// A file descriptor / shared-memory channel number named by a
    /// syscall does not refer to an object owned by the caller.
    BadChannel,
    /// `waitpid` found no child (living or zombie) matching the request.
    NoChildren,
    /// The physical frame allocator, the kernel heap, or a context's
    /// virtual-range list could not satisfy a request.
    OutOfMemory,
    /// A lookup (process table, queue, capability table) found nothing
    /// for the given key.
    NotFound,
    /// The process table's free list is empty; no PCB slot available.
    OutOfProcesses,
    /// A `pop`/`peek` was attempted against an empty queue that the
    /// caller expected to be non-empty, in a place where that is a
    /// caller-recoverable condition rather than an invariant violation.
    EmptyQueue,
    /// Paging walked to a leaf that carries no page-table entry (neither
    /// present nor lazily reserved) for the requested virtual address.
    NoPageTableEntry,
    /// The program loader's segment or argument-vector limit was
    /// exceeded.
    LoadLimit,
}

impl KernelError {
    /// Collapse this error to the negative `errno`-style value a syscall
    /// handler writes into the caller's return-value register.
    pub const fn to_syscall_errno(self) -> i64 {
        match self {
            KernelError::GenericFailure => -1,
            KernelError::BadParameter => -2,
            KernelError::BadChannel => -3,
            KernelError::NoChildren => -4,
            KernelError::OutOfMemory => -5,
            KernelError::NotFound => -6,
            KernelError::OutOfProcesses => -7,
            KernelError::EmptyQueue => -8,
            KernelError::NoPageTableEntry => -9,
            KernelError::LoadLimit => -10,
        }
    }
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::GenericFailure => write!(f, "generic failure"),
            KernelError::BadParameter => write!(f, "bad parameter"),
            KernelError::BadChannel => write!(f, "bad channel or file descriptor"),
            KernelError::NoChildren => write!(f, "no children"),
            KernelError::OutOfMemory => write!(f, "out of memory"),
            KernelError::NotFound => write!(f, "not found"),
            KernelError::OutOfProcesses => write!(f, "out of processes"),
            KernelError::EmptyQueue => write!(f, "empty queue"),
            KernelError::NoPageTableEntry => write!(f, "no page-table entry"),
            KernelError::LoadLimit => write!(f, "load limit exceeded"),
        }
    }
}

/// Shorthand for logging a warning at an error's construction site and
/// returning the error unchanged.
#[macro_export]
macro_rules! kernel_warn {
    ($err:expr, $($arg:tt)*) => {{
        log::warn!("{}: {}", format_args!($($arg)*), $err);
        $err
    }};
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn errno_values_are_distinct_and_negative() {
        let kinds = [
            KernelError::GenericFailure,
            KernelError::BadParameter,
            KernelError::BadChannel,
            KernelError::NoChildren,
            KernelError::OutOfMemory,
            KernelError::NotFound,
            KernelError::OutOfProcesses,
            KernelError::EmptyQueue,
            KernelError::NoPageTableEntry,
            KernelError::LoadLimit,
        ];
        for (i, a) in kinds.iter().enumerate() {
            assert!(a.to_syscall_errno() < 0);
            for b in &kinds[i + 1..] {
                assert_ne!(a.to_syscall_errno(), b.to_syscall_errno());
            }
        }
    }

    #[test]
    fn display_is_non_empty() {
        assert_eq!(format!("{}", KernelError::OutOfMemory), "out of memory");
    }
}
