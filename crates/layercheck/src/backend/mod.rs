pub mod library;
pub mod memory;
pub mod queue;
pub mod registry;
pub mod spec;

pub use library::LibraryHandles;
pub use memory::{BlobMemory, MemoryTracker};
pub use queue::CommandQueue;
