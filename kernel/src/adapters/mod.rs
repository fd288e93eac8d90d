// Storage Backends
//
// Concrete implementations of the collection storage port.

pub mod file;
pub mod memory;

#[cfg(test)]
pub(crate) mod contract;

pub use file::{FileBackend, FileCollection};
pub use memory::{InMemoryBackend, InMemoryCollection};
