pub mod checkpoint;

pub use checkpoint::{FileSyncCheckpoint, MemorySyncCheckpoint};
