//! densemap: an open-addressing hash map with a small-capacity inline
//! variant, plus the fingerprinting hash engine its string keys use.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: keep every entry directly in one power-of-two bucket array and
//!   resolve collisions by probing, with no per-entry allocation.
//! - Layers:
//!   - `hashing`: CityHash-style 64-bit fingerprints of byte strings and of
//!     heterogeneous value lists, seeded per process or per `HashEngine`.
//!   - `key_policy`: `KeyPolicy<K>` supplies hashing and equality for a key
//!     type; `DefaultKeyPolicy` covers integers, pointers, strings, pairs.
//!   - `bucket`: one slot with an explicit Empty/Tombstone/Live state and
//!     key/value storage that is initialized only while Live.
//!   - `storage` / `inline_storage`: where the bucket array lives. Heap
//!     storage reallocates on rebuild; inline storage embeds `N` buckets in
//!     the map and moves to the heap once more are needed.
//!   - `dense_map`: the probing core and public `DenseMap`/`SmallDenseMap`.
//!
//! Probing
//! - Start at `hash & (capacity - 1)` and step by 1, 2, 3, ... (triangular
//!   numbers), which visits every bucket of a power-of-two table once.
//! - A probe stops at the matching key or at an empty bucket. A miss
//!   remembers the first tombstone it passed so inserts refill erased
//!   buckets before empty ones.
//! - Probes give up after `capacity` buckets, so a table with no empty
//!   bucket left still answers misses.
//!
//! Rebuild thresholds (see `Config`)
//! - Grow to twice the capacity when an insert would reach 3/4 load.
//! - Otherwise rehash in place, same array, when an insert would leave at
//!   most capacity/8 buckets that are neither live nor tombstones.
//! - `clear` shrinks when fewer than a quarter of the buckets are live
//!   and the table is larger than the 64-bucket minimum.
//! - Inline storage instead fills all `N` buckets and moves to the heap on
//!   the insert that would exceed them.
//!
//! Ownership
//! - A bucket's state is the only record of whether its key and value are
//!   initialized. Every transition out of Live moves or drops them exactly
//!   once, and dropping a bucket drops a live entry.
//! - Rebuilds allocate the new array before detaching the old one, so a
//!   failed allocation leaves the map unchanged.
//!
//! Handles
//! - Lookups and inserts return a `Handle` (bucket index plus the map's
//!   epoch). The epoch advances on every rebuild, `clear`, `swap`, and on
//!   inserts that reuse a tombstone, so a handle never resolves to an entry
//!   other than the one it was created for.
//!
//! Notes and non-goals
//! - Single-threaded: no internal synchronization.
//! - Iteration follows storage order; there is no ordered iteration.
//! - Keys equal to a policy's reserved sentinels are rejected by
//!   `debug_assert!` only.

pub mod bucket;
pub mod config;
pub mod dense_map;
mod dense_map_proptest;
pub mod error;
pub mod hashing;
pub mod inline_storage;
pub mod key_policy;
pub mod storage;

// Public surface
pub use bucket::{Bucket, SlotState};
pub use config::Config;
pub use dense_map::{DenseMap, Handle, SmallDenseMap};
pub use error::Error;
pub use hashing::{
    execution_seed, hash_bytes, hash_combine_range, hash_integer, set_fixed_execution_seed,
    Fingerprint, FingerprintBuildHasher, HashCombiner, HashEngine,
};
pub use inline_storage::InlineStorage;
pub use key_policy::{
    DefaultKeyPolicy, FingerprintKeys, HashedKeys, KeyPolicy, Sentinel, SentinelKeys,
};
pub use storage::{HeapStorage, Storage};
