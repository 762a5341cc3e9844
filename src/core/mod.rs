//! Structures, version chains, branch resolution and course indices.

/// Version chain walks.
pub mod chain;
/// Course index and head compare-and-swap.
pub mod index;
/// Revision request to branch resolution.
pub mod revision;
/// Immutable structures and the structure store.
pub mod structure;
