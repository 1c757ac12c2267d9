//! File-backed action cache.
//!
//! Successful live runs are stored as an ordered list of [`CacheStep`]s under
//! a [`CacheKey`] derived from the test definition. All access to the cache
//! file goes through a [`FileLock`]; when the lock cannot be taken in time the
//! operation degrades to "no cache" instead of failing the test.
pub mod entry;
pub mod error;
pub mod key;
pub mod lock;
pub mod merge;
pub mod store;

pub use entry::{CacheEntry, CacheStep, StepAction, StepExtras};
pub use error::CacheError;
pub use key::CacheKey;
pub use lock::{FileLock, LockGuard, LockInfo};
pub use store::ActionCache;
