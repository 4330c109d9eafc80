//! Reference [`crate::backend::Backend`] implementations bundled with the
//! broker, standing in for the out-of-scope production backend servers
//! (spec.md §1). Used by the integration tests and by `vfsbrokerd`'s
//! default configuration; never addressed directly by client code.
//!
//! Grounded on the teacher's `examples/in_memory/filesystem.rs`
//! (`InMemoryVfs`) and `examples/shadow_fs/fs/*.rs` (`ShadowFS`), adapted
//! from the NFS `Vfs` trait (path-string-ish file handles, `WccData`
//! semantics) to this spec's `Backend` trait (triplet identity,
//! mount/unmount/destroy lifecycle).

pub mod memory;
pub mod shadow;
