//! Backend-stable node identity (spec §3).

use std::sync::atomic::{AtomicU64, Ordering};

/// Opaque handle identifying a registered backend connection.
///
/// Stable for the lifetime of the broker process; never reused while a
/// [`crate::node::Node`] referencing it is still cached.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BackendHandle(pub u64);

static NEXT_BACKEND_HANDLE: AtomicU64 = AtomicU64::new(1);

impl BackendHandle {
    /// Allocate a fresh, process-unique backend handle.
    pub fn allocate() -> Self {
        Self(NEXT_BACKEND_HANDLE.fetch_add(1, Ordering::Relaxed))
    }
}

/// The backend-stable identity of a node: `(backend_handle, service_id, index)`.
///
/// Equality is componentwise. Triplets are stable across broker restarts
/// only if the backend keeps `index` stable; the broker itself never
/// interprets `index` beyond equality and hashing.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct Triplet {
    pub backend: BackendHandle,
    pub service_id: u64,
    pub index: u64,
}

impl Triplet {
    pub fn new(backend: BackendHandle, service_id: u64, index: u64) -> Self {
        Self { backend, service_id, index }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equality_is_componentwise() {
        let b = BackendHandle(1);
        let t1 = Triplet::new(b, 7, 42);
        let t2 = Triplet::new(b, 7, 42);
        let t3 = Triplet::new(b, 7, 43);
        assert_eq!(t1, t2);
        assert_ne!(t1, t3);
    }

    #[test]
    fn allocate_is_unique() {
        let a = BackendHandle::allocate();
        let b = BackendHandle::allocate();
        assert_ne!(a, b);
    }
}
