//! Broker-wide status codes (spec §6, §7).
//!
//! Every fallible broker operation returns `Result<T, Status>`. There is no
//! exception-style unwinding and no wrapped library error type: status codes
//! are returned by value and mapped to the eventual wire reply one-to-one.

use std::fmt;

/// Status code returned to a client, or threaded internally between broker
/// components before being mapped onto a client reply.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Status {
    /// Success.
    Eok,
    /// No such file or directory.
    ENoEnt,
    /// The mount or descriptor's underlying subtree is still in use.
    EBusy,
    /// Resource (allocation) limit exceeded.
    ENoMem,
    /// Invalid argument or invalid flag combination.
    EInval,
    /// Operation not permitted given the descriptor's permission mask.
    EPerm,
    /// Bad file descriptor.
    EBadF,
    /// The target of a `CREATE | EXCLUSIVE` walk already exists.
    EExist,
    /// Operation is not supported by this backend or this broker build.
    ENotSup,
    /// I/O error, including a backend that failed to answer.
    EIo,
    /// A seek or size computation overflowed the representable range.
    EOverflow,
}

impl Status {
    /// True for [`Status::Eok`].
    pub fn is_ok(self) -> bool {
        matches!(self, Status::Eok)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Status::Eok => "EOK",
            Status::ENoEnt => "ENOENT",
            Status::EBusy => "EBUSY",
            Status::ENoMem => "ENOMEM",
            Status::EInval => "EINVAL",
            Status::EPerm => "EPERM",
            Status::EBadF => "EBADF",
            Status::EExist => "EEXIST",
            Status::ENotSup => "ENOTSUP",
            Status::EIo => "EIO",
            Status::EOverflow => "EOVERFLOW",
        };
        f.write_str(name)
    }
}

impl std::error::Error for Status {}

/// Shorthand result type used throughout the broker.
pub type Result<T> = std::result::Result<T, Status>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_wire_names() {
        assert_eq!(Status::ENoEnt.to_string(), "ENOENT");
        assert_eq!(Status::EOverflow.to_string(), "EOVERFLOW");
    }

    #[test]
    fn is_ok_only_for_eok() {
        assert!(Status::Eok.is_ok());
        assert!(!Status::EIo.is_ok());
    }
}
