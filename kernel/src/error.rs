//! The kernel's unified error taxonomy.
//!
//! Every fallible operation in the memory, descriptor, channel, and monitor
//! subsystems returns a [`KernelError`] through [`Result`]. The set of
//! variants is part of the syscall ABI: userspace sees these same kinds
//! through the syscall return path, so new variants should be added only
//! when none of the existing ones fit.

use core::fmt;

/// Main kernel error type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[must_use = "kernel errors must be handled, not silently discarded"]
pub enum KernelError {
    /// Caller-fault: bad pointer, unsupported flag combination, out-of-range
    /// id.
    InvalidArgument {
        name: &'static str,
        value: &'static str,
    },
    /// Retryable: out of memory, ring full with `no_wait`, concurrent
    /// create collision.
    TemporaryOutage { reason: &'static str },
    /// The object the caller addressed is gone: closed channel, released
    /// descriptor.
    PermanentOutage { reason: &'static str },
    /// A named resource is absent: a physical region, a bus, a port.
    ResourceUnavailable { resource: &'static str },
    /// Lookup target not present.
    NoSuchResource { resource: &'static str, id: u64 },
    /// Duplicate create, or an overlapping mapping-registry entry.
    AlreadyInProgress { resource: &'static str },
    /// An iterator-style operation was aborted by its own callback.
    Cancelled,
    /// An interruptible wait returned early because the caller was signaled.
    Signaled,
    /// A zero-timeout fast path failed to complete immediately.
    TimedOut,
    /// A size bound was violated on the high side.
    TooBig { limit: usize, requested: usize },
    /// A size bound was violated on the low side.
    TooSmall { minimum: usize, requested: usize },
    /// Recognized request, implementation gap.
    Unsupported { feature: &'static str },
    /// Policy denial.
    Forbidden { operation: &'static str },
    /// Out of memory specifically (a common `TemporaryOutage` cause, broken
    /// out because callers usually want the numbers).
    OutOfMemory { requested: usize, available: usize },
    /// Last resort; prefer a more specific variant when one applies.
    Unknown,
}

/// Result type alias for kernel operations.
pub type Result<T> = core::result::Result<T, KernelError>;

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidArgument { name, value } => {
                write!(f, "invalid argument '{}': {}", name, value)
            }
            Self::TemporaryOutage { reason } => write!(f, "temporary outage: {}", reason),
            Self::PermanentOutage { reason } => write!(f, "permanent outage: {}", reason),
            Self::ResourceUnavailable { resource } => {
                write!(f, "resource unavailable: {}", resource)
            }
            Self::NoSuchResource { resource, id } => {
                write!(f, "no such {}: {}", resource, id)
            }
            Self::AlreadyInProgress { resource } => {
                write!(f, "already in progress: {}", resource)
            }
            Self::Cancelled => write!(f, "cancelled"),
            Self::Signaled => write!(f, "signaled"),
            Self::TimedOut => write!(f, "timed out"),
            Self::TooBig { limit, requested } => {
                write!(f, "too big: requested {}, limit {}", requested, limit)
            }
            Self::TooSmall { minimum, requested } => {
                write!(f, "too small: requested {}, minimum {}", requested, minimum)
            }
            Self::Unsupported { feature } => write!(f, "unsupported: {}", feature),
            Self::Forbidden { operation } => write!(f, "forbidden: {}", operation),
            Self::OutOfMemory {
                requested,
                available,
            } => {
                write!(
                    f,
                    "out of memory: requested {} pages, {} available",
                    requested, available
                )
            }
            Self::Unknown => write!(f, "unknown error"),
        }
    }
}

#[macro_export]
macro_rules! kernel_error {
    (InvalidArgument { $name:expr => $value:expr }) => {
        $crate::error::KernelError::InvalidArgument {
            name: $name,
            value: $value,
        }
    };
    (NoSuchResource { $resource:expr => $id:expr }) => {
        $crate::error::KernelError::NoSuchResource {
            resource: $resource,
            id: $id,
        }
    };
    ($variant:ident) => {
        $crate::error::KernelError::$variant
    };
}
