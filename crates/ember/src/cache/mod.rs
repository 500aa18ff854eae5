//! Converted-artifact cache: keys, the on-disk store, and per-key locks.

mod key;
mod lock;
mod store;

pub use key::CacheKey;
pub use lock::{FileLock, KeyedMutex, LOCK_FILE_NAME};
pub use store::{CacheEntry, CacheStore, Manifest, CHECKPOINT_DIR_NAME, MANIFEST_FILE_NAME};

pub(crate) use store::unique_suffix;

#[cfg(test)]
mod tests;
