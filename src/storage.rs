//! Storage strategies: where a table's bucket array lives.
//!
//! The probing core in `dense_map` is generic over [`Storage`] and only ever
//! sees a bucket slice. Rebuilds go through [`Storage::replace`], which
//! installs a fresh array of empty buckets and hands back the previous ones
//! so the core can move their live entries across. The new array is
//! allocated before anything is detached, so a failed allocation leaves the
//! table exactly as it was.

use crate::bucket::Bucket;
use crate::config::Config;
use crate::error::Error;
use core::alloc::Layout;

/// A bucket array owned by one map.
pub trait Storage<K, V>: Sized {
    /// Buckets detached by [`Storage::replace`], yielded in storage order.
    type Retired: Iterator<Item = Bucket<K, V>>;

    /// Number of buckets embedded in the map itself; zero for heap-only
    /// storage.
    const INLINE_CAPACITY: usize;

    /// Storage with its default capacity: empty for the heap, the embedded
    /// array for inline storage.
    fn new() -> Self;

    fn buckets(&self) -> &[Bucket<K, V>];

    fn buckets_mut(&mut self) -> &mut [Bucket<K, V>];

    fn is_inline(&self) -> bool;

    /// Bucket count this strategy would use to hold at least `at_least`
    /// buckets.
    fn plan_capacity(at_least: usize, config: &Config) -> Result<usize, Error>;

    /// Install `buckets` empty buckets (as returned by `plan_capacity`) and
    /// return the previous ones.
    fn replace(&mut self, buckets: usize) -> Result<Self::Retired, Error>;

    /// Exchange contents with another storage of the same strategy.
    fn swap_storage(&mut self, other: &mut Self);

    fn into_retired(self) -> Self::Retired;

    #[inline]
    fn capacity(&self) -> usize {
        self.buckets().len()
    }
}

/// Heap bucket count for at least `at_least` buckets: zero stays zero,
/// anything else rounds up to a power of two no smaller than the minimum.
pub(crate) fn plan_heap_capacity(at_least: usize, config: &Config) -> Result<usize, Error> {
    if at_least == 0 {
        return Ok(0);
    }
    at_least
        .checked_next_power_of_two()
        .map(|n| n.max(config.min_heap_buckets))
        .ok_or(Error::CapacityOverflow)
}

/// Allocate `buckets` empty buckets, reporting failure instead of aborting.
pub(crate) fn allocate_buckets<K, V>(buckets: usize) -> Result<Vec<Bucket<K, V>>, Error> {
    let layout = Layout::array::<Bucket<K, V>>(buckets).map_err(|_| Error::CapacityOverflow)?;
    let mut out = Vec::new();
    out.try_reserve_exact(buckets)
        .map_err(|_| Error::AllocError { layout })?;
    out.resize_with(buckets, Bucket::empty);
    Ok(out)
}

/// Buckets on the heap, reallocated wholesale on every rebuild.
pub struct HeapStorage<K, V> {
    buckets: Vec<Bucket<K, V>>,
}

impl<K, V> Storage<K, V> for HeapStorage<K, V> {
    type Retired = std::vec::IntoIter<Bucket<K, V>>;

    const INLINE_CAPACITY: usize = 0;

    fn new() -> Self {
        HeapStorage {
            buckets: Vec::new(),
        }
    }

    #[inline]
    fn buckets(&self) -> &[Bucket<K, V>] {
        &self.buckets
    }

    #[inline]
    fn buckets_mut(&mut self) -> &mut [Bucket<K, V>] {
        &mut self.buckets
    }

    #[inline]
    fn is_inline(&self) -> bool {
        false
    }

    fn plan_capacity(at_least: usize, config: &Config) -> Result<usize, Error> {
        plan_heap_capacity(at_least, config)
    }

    fn replace(&mut self, buckets: usize) -> Result<Self::Retired, Error> {
        debug_assert!(buckets == 0 || buckets.is_power_of_two());
        let fresh = allocate_buckets(buckets)?;
        Ok(core::mem::replace(&mut self.buckets, fresh).into_iter())
    }

    fn swap_storage(&mut self, other: &mut Self) {
        core::mem::swap(&mut self.buckets, &mut other.buckets);
    }

    fn into_retired(self) -> Self::Retired {
        self.buckets.into_iter()
    }
}

impl<K: Clone, V: Clone> Clone for HeapStorage<K, V> {
    fn clone(&self) -> Self {
        HeapStorage {
            buckets: self.buckets.clone(),
        }
    }
}
