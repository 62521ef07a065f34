//! DenseMap: open-addressing table with triangular probing, generic over
//! its key policy and its bucket storage.

use crate::bucket::{Bucket, SlotState};
use crate::config::Config;
use crate::error::{infallible, Error};
use crate::inline_storage::InlineStorage;
use crate::key_policy::{DefaultKeyPolicy, KeyPolicy};
use crate::storage::{HeapStorage, Storage};
use core::alloc::Layout;
use core::fmt;
use core::iter::FusedIterator;
use core::marker::PhantomData;
use core::mem;
use tracing::{debug, trace};

/// Position of an entry, resolved against the map that produced it.
///
/// A handle stops resolving once its entry is erased, and after any
/// rebuild, `clear`, `swap`, or an insert that reuses an erased bucket.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle {
    index: usize,
    epoch: u64,
}

impl Handle {
    pub fn key<'a, K, V, P, S>(&self, map: &'a DenseMap<K, V, P, S>) -> Option<&'a K>
    where
        S: Storage<K, V>,
    {
        self.entry(map).map(|(k, _)| k)
    }

    pub fn value<'a, K, V, P, S>(&self, map: &'a DenseMap<K, V, P, S>) -> Option<&'a V>
    where
        S: Storage<K, V>,
    {
        self.entry(map).map(|(_, v)| v)
    }

    pub fn value_mut<'a, K, V, P, S>(&self, map: &'a mut DenseMap<K, V, P, S>) -> Option<&'a mut V>
    where
        S: Storage<K, V>,
    {
        map.bucket_at_mut(*self)
            .and_then(Bucket::entry_mut)
            .map(|(_, v)| v)
    }

    pub fn entry<'a, K, V, P, S>(&self, map: &'a DenseMap<K, V, P, S>) -> Option<(&'a K, &'a V)>
    where
        S: Storage<K, V>,
    {
        map.bucket_at(*self).and_then(Bucket::entry)
    }
}

/// Result of walking a probe sequence.
enum Probe {
    Found(usize),
    /// Miss. Carries the bucket an insert should use: the first tombstone
    /// on the sequence, else the empty bucket that ended it. `None` only
    /// when the table has no buckets or no free bucket at all.
    Vacant(Option<usize>),
}

/// Open-addressing hash map.
///
/// `P` supplies hashing and equality for `K`; `S` decides where the bucket
/// array lives. Iteration follows storage order.
pub struct DenseMap<K, V, P = DefaultKeyPolicy, S = HeapStorage<K, V>> {
    storage: S,
    live: usize,
    tombstones: usize,
    epoch: u64,
    config: Config,
    _entries: PhantomData<(K, V)>,
    _policy: PhantomData<fn() -> P>,
}

/// A [`DenseMap`] that keeps up to `N` buckets inline before moving to the
/// heap.
pub type SmallDenseMap<K, V, const N: usize = 4, P = DefaultKeyPolicy> =
    DenseMap<K, V, P, InlineStorage<K, V, N>>;

impl<K, V, P, S> DenseMap<K, V, P, S>
where
    S: Storage<K, V>,
{
    pub fn new() -> Self {
        Self::from_parts(S::new(), Config::DEFAULT)
    }

    /// Empty map using `config` for its growth and shrink thresholds.
    pub fn with_config(config: Config) -> Result<Self, Error> {
        config.validate()?;
        Ok(Self::from_parts(S::new(), config))
    }

    fn from_parts(storage: S, config: Config) -> Self {
        DenseMap {
            storage,
            live: 0,
            tombstones: 0,
            epoch: 0,
            config,
            _entries: PhantomData,
            _policy: PhantomData,
        }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.live
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.live == 0
    }

    /// Number of buckets: zero or a power of two.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.storage.capacity()
    }

    /// Buckets holding erased entries that no rebuild has reclaimed yet.
    #[inline]
    pub fn tombstones(&self) -> usize {
        self.tombstones
    }

    /// True while the bucket array is embedded in the map.
    #[inline]
    pub fn is_inline(&self) -> bool {
        self.storage.is_inline()
    }

    #[inline]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Bytes occupied by the bucket array.
    pub fn approx_memory_bytes(&self) -> usize {
        self.capacity() * mem::size_of::<Bucket<K, V>>()
    }

    /// Base address of the bucket array. Changes whenever a rebuild moves
    /// the entries to a new array.
    pub fn storage_ptr(&self) -> *const u8 {
        self.storage.buckets().as_ptr().cast()
    }

    /// True if `ptr` points into the bucket array.
    pub fn is_pointer_into_buckets<T>(&self, ptr: *const T) -> bool {
        let start = self.storage_ptr() as usize;
        let end = start + self.approx_memory_bytes();
        (start..end).contains(&(ptr as usize))
    }

    pub fn iter(&self) -> Iter<'_, K, V> {
        Iter {
            buckets: self.storage.buckets().iter(),
            remaining: self.live,
        }
    }

    pub fn iter_mut(&mut self) -> IterMut<'_, K, V> {
        IterMut {
            buckets: self.storage.buckets_mut().iter_mut(),
            remaining: self.live,
        }
    }

    pub fn keys(&self) -> Keys<'_, K, V> {
        Keys { inner: self.iter() }
    }

    pub fn values(&self) -> Values<'_, K, V> {
        Values { inner: self.iter() }
    }

    pub fn values_mut(&mut self) -> ValuesMut<'_, K, V> {
        ValuesMut {
            inner: self.iter_mut(),
        }
    }

    /// Exchange the contents of two maps. Handles into either map stop
    /// resolving.
    pub fn swap(&mut self, other: &mut Self) {
        self.storage.swap_storage(&mut other.storage);
        mem::swap(&mut self.live, &mut other.live);
        mem::swap(&mut self.tombstones, &mut other.tombstones);
        mem::swap(&mut self.config, &mut other.config);
        let epoch = self.epoch.max(other.epoch).wrapping_add(1);
        self.epoch = epoch;
        other.epoch = epoch;
    }

    /// Drop every entry. Shrinks the table first when it is mostly empty.
    pub fn clear(&mut self) {
        if self.live == 0 && self.tombstones == 0 {
            return;
        }
        let cap = self.capacity();
        if self.live * self.config.shrink_ratio < cap && cap > self.config.min_heap_buckets {
            self.shrink_and_clear();
            return;
        }
        for bucket in self.storage.buckets_mut() {
            bucket.reset();
        }
        self.live = 0;
        self.tombstones = 0;
        self.bump_epoch();
    }

    /// Drop every entry and resize the table for roughly the number of
    /// entries it held. Hybrid maps move back inline when that fits.
    pub fn shrink_and_clear(&mut self) {
        let old_live = self.live;
        let wanted = if old_live == 0 {
            0
        } else {
            let log2 = usize::BITS - (old_live - 1).leading_zeros();
            1usize << (log2 + 1)
        };
        let from = self.capacity();
        let to = infallible(S::plan_capacity(wanted, &self.config));
        if to == from {
            for bucket in self.storage.buckets_mut() {
                bucket.reset();
            }
        } else {
            drop(infallible(self.storage.replace(to)));
            debug!(from, to, live = old_live, "shrank bucket array");
        }
        self.live = 0;
        self.tombstones = 0;
        self.bump_epoch();
    }

    #[inline]
    fn bump_epoch(&mut self) {
        self.epoch = self.epoch.wrapping_add(1);
    }

    #[inline]
    fn handle(&self, index: usize) -> Handle {
        Handle {
            index,
            epoch: self.epoch,
        }
    }

    fn bucket_at(&self, h: Handle) -> Option<&Bucket<K, V>> {
        if h.epoch != self.epoch {
            return None;
        }
        self.storage.buckets().get(h.index)
    }

    fn bucket_at_mut(&mut self, h: Handle) -> Option<&mut Bucket<K, V>> {
        if h.epoch != self.epoch {
            return None;
        }
        self.storage.buckets_mut().get_mut(h.index)
    }
}

impl<K, V, P, S> DenseMap<K, V, P, S>
where
    P: KeyPolicy<K>,
    S: Storage<K, V>,
{
    /// Empty map with room for `entries` entries before the first rebuild.
    pub fn with_capacity(entries: usize) -> Self {
        infallible(Self::try_with_capacity(entries))
    }

    pub fn try_with_capacity(entries: usize) -> Result<Self, Error> {
        let mut map = Self::new();
        map.try_reserve(entries)?;
        Ok(map)
    }

    /// Make room for `entries` entries in total without further rebuilds.
    /// Hybrid maps stay inline when `entries` fits the inline array.
    pub fn reserve(&mut self, entries: usize) {
        infallible(self.try_reserve(entries))
    }

    pub fn try_reserve(&mut self, entries: usize) -> Result<(), Error> {
        if entries <= S::INLINE_CAPACITY {
            return Ok(());
        }
        let buckets = self.config.buckets_for_entries(entries)?;
        if buckets > self.capacity() {
            self.grow(buckets)?;
        }
        Ok(())
    }

    /// Walk the probe sequence for `key`. Visits at most `capacity`
    /// buckets, which for a power-of-two table is every bucket once.
    fn probe(&self, key: &K) -> Probe {
        debug_assert!(!P::is_reserved(key), "a reserved sentinel was used as a key");
        let buckets = self.storage.buckets();
        let cap = buckets.len();
        if cap == 0 {
            return Probe::Vacant(None);
        }
        let mask = cap - 1;
        let mut idx = P::hash_of(key) as usize & mask;
        let mut first_tombstone = None;
        for step in 1..=cap {
            let bucket = &buckets[idx];
            match bucket.state() {
                SlotState::Empty => return Probe::Vacant(first_tombstone.or(Some(idx))),
                SlotState::Tombstone => {
                    first_tombstone.get_or_insert(idx);
                }
                SlotState::Live => {
                    if bucket.key().is_some_and(|k| P::equals(k, key)) {
                        return Probe::Found(idx);
                    }
                }
            }
            idx = (idx + step) & mask;
        }
        Probe::Vacant(first_tombstone)
    }

    /// Find `key`, or pick the bucket a new entry for it goes into,
    /// rebuilding the table first when the thresholds call for it.
    fn locate_for_insert(&mut self, key: &K) -> Result<Result<usize, usize>, Error> {
        let target = match self.probe(key) {
            Probe::Found(idx) => return Ok(Ok(idx)),
            Probe::Vacant(target) => target,
        };

        let live_after = self.live + 1;
        let cap = self.capacity();
        let rebuilt = if self.storage.is_inline() {
            if live_after > cap {
                self.grow(cap * 2)?;
                true
            } else {
                false
            }
        } else if target.is_none() || self.config.exceeds_load(live_after, cap) {
            self.grow((cap * 2).max(1))?;
            true
        } else if self.config.lacks_headroom(live_after, self.tombstones, cap) {
            self.rehash_in_place()?;
            true
        } else {
            false
        };

        let target = if rebuilt {
            match self.probe(key) {
                Probe::Vacant(t) => t,
                Probe::Found(_) => unreachable!("rebuild lost track of a missing key"),
            }
        } else {
            target
        };
        Ok(Err(target.expect("rebuilt table has a free bucket")))
    }

    /// Construct a new entry in the bucket picked by `locate_for_insert`.
    fn occupy(&mut self, idx: usize, key: K, value: V) -> Handle {
        let bucket = &mut self.storage.buckets_mut()[idx];
        let reused = bucket.state() == SlotState::Tombstone;
        bucket.fill(key, value);
        self.live += 1;
        if reused {
            self.tombstones -= 1;
            // Handles to the erased entry must not resolve to this one.
            self.bump_epoch();
        }
        self.handle(idx)
    }

    /// Move every entry into a table of at least `at_least` buckets.
    fn grow(&mut self, at_least: usize) -> Result<(), Error> {
        let from = self.capacity();
        let to = S::plan_capacity(at_least, &self.config)?;
        let retired = self.storage.replace(to)?;
        debug!(from, to, live = self.live, tombstones = self.tombstones, "grew bucket array");
        self.tombstones = 0;
        self.bump_epoch();
        for bucket in retired {
            if let Some((k, v)) = bucket.into_entry() {
                self.place_fresh(k, v);
            }
        }
        Ok(())
    }

    /// Clear every tombstone without changing the bucket array.
    fn rehash_in_place(&mut self) -> Result<(), Error> {
        let mut scratch: Vec<(K, V)> = Vec::new();
        scratch.try_reserve_exact(self.live).map_err(|_| {
            Layout::array::<(K, V)>(self.live)
                .map_or(Error::CapacityOverflow, |layout| Error::AllocError { layout })
        })?;
        for bucket in self.storage.buckets_mut() {
            if let Some(entry) = bucket.evacuate() {
                scratch.push(entry);
            }
        }
        trace!(
            capacity = self.capacity(),
            live = self.live,
            tombstones = self.tombstones,
            "rehashed in place"
        );
        self.tombstones = 0;
        self.bump_epoch();
        for (k, v) in scratch {
            self.place_fresh(k, v);
        }
        Ok(())
    }

    /// Place an entry known to be absent into a table with no tombstones.
    /// Keys are distinct, so no equality checks are needed.
    fn place_fresh(&mut self, key: K, value: V) {
        let buckets = self.storage.buckets_mut();
        let mask = buckets.len() - 1;
        let mut idx = P::hash_of(&key) as usize & mask;
        let mut step = 1;
        while buckets[idx].is_live() {
            idx = (idx + step) & mask;
            step += 1;
        }
        buckets[idx].fill(key, value);
    }

    /// 1 if `key` is present, else 0.
    pub fn count(&self, key: &K) -> usize {
        usize::from(self.contains_key(key))
    }

    pub fn contains_key(&self, key: &K) -> bool {
        matches!(self.probe(key), Probe::Found(_))
    }

    pub fn find(&self, key: &K) -> Option<Handle> {
        match self.probe(key) {
            Probe::Found(idx) => Some(self.handle(idx)),
            Probe::Vacant(_) => None,
        }
    }

    pub fn get(&self, key: &K) -> Option<&V> {
        self.get_key_value(key).map(|(_, v)| v)
    }

    pub fn get_key_value(&self, key: &K) -> Option<(&K, &V)> {
        match self.probe(key) {
            Probe::Found(idx) => self.storage.buckets()[idx].entry(),
            Probe::Vacant(_) => None,
        }
    }

    pub fn get_mut(&mut self, key: &K) -> Option<&mut V> {
        match self.probe(key) {
            Probe::Found(idx) => self.storage.buckets_mut()[idx].entry_mut().map(|(_, v)| v),
            Probe::Vacant(_) => None,
        }
    }

    /// Copy of the value for `key`, or `V::default()` when absent.
    pub fn lookup(&self, key: &K) -> V
    where
        V: Clone + Default,
    {
        self.get(key).cloned().unwrap_or_default()
    }

    /// Insert if `key` is absent. An existing entry is left untouched; the
    /// flag reports whether the insert happened.
    pub fn insert(&mut self, key: K, value: V) -> (Handle, bool) {
        infallible(self.try_insert(key, value))
    }

    pub fn try_insert(&mut self, key: K, value: V) -> Result<(Handle, bool), Error> {
        self.try_insert_with(key, move || value)
    }

    /// Like `insert`, but `default` only runs when the key is absent.
    pub fn insert_with<F>(&mut self, key: K, default: F) -> (Handle, bool)
    where
        F: FnOnce() -> V,
    {
        infallible(self.try_insert_with(key, default))
    }

    pub fn try_insert_with<F>(&mut self, key: K, default: F) -> Result<(Handle, bool), Error>
    where
        F: FnOnce() -> V,
    {
        match self.locate_for_insert(&key)? {
            Ok(idx) => Ok((self.handle(idx), false)),
            Err(idx) => Ok((self.occupy(idx, key, default()), true)),
        }
    }

    /// Insert, overwriting the value of an existing entry. The flag is true
    /// when a new entry was created.
    pub fn insert_or_assign(&mut self, key: K, value: V) -> (Handle, bool) {
        infallible(self.try_insert_or_assign(key, value))
    }

    pub fn try_insert_or_assign(&mut self, key: K, value: V) -> Result<(Handle, bool), Error> {
        match self.locate_for_insert(&key)? {
            Ok(idx) => {
                if let Some((_, slot)) = self.storage.buckets_mut()[idx].entry_mut() {
                    *slot = value;
                }
                Ok((self.handle(idx), false))
            }
            Err(idx) => Ok((self.occupy(idx, key, value), true)),
        }
    }

    /// Mutable access to the value for `key`, inserting `V::default()`
    /// first if it is absent.
    pub fn get_or_insert_default(&mut self, key: K) -> &mut V
    where
        V: Default,
    {
        self.get_or_insert_with(key, V::default)
    }

    pub fn get_or_insert_with<F>(&mut self, key: K, default: F) -> &mut V
    where
        F: FnOnce() -> V,
    {
        let (h, _) = self.insert_with(key, default);
        match self.storage.buckets_mut()[h.index].entry_mut() {
            Some((_, v)) => v,
            None => unreachable!("handle from insert_with names a live bucket"),
        }
    }

    /// Remove `key`. Returns whether it was present.
    pub fn erase(&mut self, key: &K) -> bool {
        self.remove_entry(key).is_some()
    }

    /// Remove the entry `handle` names. Returns false for a stale handle.
    pub fn erase_at(&mut self, handle: Handle) -> bool {
        let live = self.bucket_at(handle).is_some_and(Bucket::is_live);
        if live {
            self.kill(handle.index);
        }
        live
    }

    pub fn remove(&mut self, key: &K) -> Option<V> {
        self.remove_entry(key).map(|(_, v)| v)
    }

    pub fn remove_entry(&mut self, key: &K) -> Option<(K, V)> {
        match self.probe(key) {
            Probe::Found(idx) => self.take(idx),
            Probe::Vacant(_) => None,
        }
    }

    /// Keep only the entries for which `keep` returns true.
    pub fn retain<F>(&mut self, mut keep: F)
    where
        F: FnMut(&K, &mut V) -> bool,
    {
        for idx in 0..self.capacity() {
            let drop_it = match self.storage.buckets_mut()[idx].entry_mut() {
                Some((k, v)) => !keep(k, v),
                None => false,
            };
            if drop_it {
                self.kill(idx);
            }
        }
    }

    fn take(&mut self, idx: usize) -> Option<(K, V)> {
        let entry = self.storage.buckets_mut()[idx].take()?;
        self.live -= 1;
        self.tombstones += 1;
        Some(entry)
    }

    fn kill(&mut self, idx: usize) {
        drop(self.take(idx));
    }

    /// Check the bookkeeping against the buckets. Test-only.
    #[cfg(test)]
    pub(crate) fn assert_consistent(&self) {
        let cap = self.capacity();
        assert!(cap == 0 || cap.is_power_of_two(), "capacity {cap}");
        let buckets = self.storage.buckets();
        let live = buckets.iter().filter(|b| b.is_live()).count();
        let tombs = buckets
            .iter()
            .filter(|b| b.state() == SlotState::Tombstone)
            .count();
        assert_eq!(live, self.live);
        assert_eq!(tombs, self.tombstones);
        assert!(self.live + self.tombstones <= cap);
        for (idx, b) in buckets.iter().enumerate() {
            if let Some(k) = b.key() {
                assert!(
                    matches!(self.probe(k), Probe::Found(i) if i == idx),
                    "live key at {idx} is not reachable by its probe sequence"
                );
            }
        }
    }
}

impl<K, V, P, S> Default for DenseMap<K, V, P, S>
where
    S: Storage<K, V>,
{
    fn default() -> Self {
        Self::new()
    }
}

/// Deep copy keeping the capacity and every bucket's state.
impl<K, V, P, S> Clone for DenseMap<K, V, P, S>
where
    S: Storage<K, V> + Clone,
{
    fn clone(&self) -> Self {
        DenseMap {
            storage: self.storage.clone(),
            live: self.live,
            tombstones: self.tombstones,
            epoch: self.epoch,
            config: self.config,
            _entries: PhantomData,
            _policy: PhantomData,
        }
    }
}

impl<K, V, P, S> fmt::Debug for DenseMap<K, V, P, S>
where
    K: fmt::Debug,
    V: fmt::Debug,
    S: Storage<K, V>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

/// Maps are equal when they hold the same keys with equal values,
/// whatever their capacity or storage order.
impl<K, V, P, S> PartialEq for DenseMap<K, V, P, S>
where
    V: PartialEq,
    P: KeyPolicy<K>,
    S: Storage<K, V>,
{
    fn eq(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().all(|(k, v)| other.get(k) == Some(v))
    }
}

impl<K, V, P, S> Eq for DenseMap<K, V, P, S>
where
    V: Eq,
    P: KeyPolicy<K>,
    S: Storage<K, V>,
{
}

impl<K, V, P, S> Extend<(K, V)> for DenseMap<K, V, P, S>
where
    P: KeyPolicy<K>,
    S: Storage<K, V>,
{
    fn extend<I: IntoIterator<Item = (K, V)>>(&mut self, iter: I) {
        let iter = iter.into_iter();
        let (lower, _) = iter.size_hint();
        self.reserve(self.len().saturating_add(lower));
        for (k, v) in iter {
            self.insert_or_assign(k, v);
        }
    }
}

impl<K, V, P, S> FromIterator<(K, V)> for DenseMap<K, V, P, S>
where
    P: KeyPolicy<K>,
    S: Storage<K, V>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut map = Self::new();
        map.extend(iter);
        map
    }
}

/// Iterator over entries in storage order.
pub struct Iter<'a, K, V> {
    buckets: core::slice::Iter<'a, Bucket<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for Iter<'a, K, V> {
    type Item = (&'a K, &'a V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let entry = self.buckets.by_ref().find_map(Bucket::entry)?;
        self.remaining -= 1;
        Some(entry)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for Iter<'_, K, V> {}
impl<K, V> FusedIterator for Iter<'_, K, V> {}

impl<K, V> Clone for Iter<'_, K, V> {
    fn clone(&self) -> Self {
        Iter {
            buckets: self.buckets.clone(),
            remaining: self.remaining,
        }
    }
}

/// Iterator over entries in storage order, with mutable values.
pub struct IterMut<'a, K, V> {
    buckets: core::slice::IterMut<'a, Bucket<K, V>>,
    remaining: usize,
}

impl<'a, K, V> Iterator for IterMut<'a, K, V> {
    type Item = (&'a K, &'a mut V);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let entry = self.buckets.by_ref().find_map(Bucket::entry_mut)?;
        self.remaining -= 1;
        Some(entry)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V> ExactSizeIterator for IterMut<'_, K, V> {}
impl<K, V> FusedIterator for IterMut<'_, K, V> {}

pub struct Keys<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Keys<'a, K, V> {
    type Item = &'a K;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(k, _)| k)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Keys<'_, K, V> {}
impl<K, V> FusedIterator for Keys<'_, K, V> {}

pub struct Values<'a, K, V> {
    inner: Iter<'a, K, V>,
}

impl<'a, K, V> Iterator for Values<'a, K, V> {
    type Item = &'a V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for Values<'_, K, V> {}
impl<K, V> FusedIterator for Values<'_, K, V> {}

pub struct ValuesMut<'a, K, V> {
    inner: IterMut<'a, K, V>,
}

impl<'a, K, V> Iterator for ValuesMut<'a, K, V> {
    type Item = &'a mut V;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.inner.next().map(|(_, v)| v)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}

impl<K, V> ExactSizeIterator for ValuesMut<'_, K, V> {}
impl<K, V> FusedIterator for ValuesMut<'_, K, V> {}

/// Owning iterator over entries in storage order.
pub struct IntoIter<K, V, S: Storage<K, V>> {
    buckets: S::Retired,
    remaining: usize,
}

impl<K, V, S: Storage<K, V>> Iterator for IntoIter<K, V, S> {
    type Item = (K, V);

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        let entry = self.buckets.by_ref().find_map(Bucket::into_entry)?;
        self.remaining -= 1;
        Some(entry)
    }

    #[inline]
    fn size_hint(&self) -> (usize, Option<usize>) {
        (self.remaining, Some(self.remaining))
    }
}

impl<K, V, S: Storage<K, V>> ExactSizeIterator for IntoIter<K, V, S> {}
impl<K, V, S: Storage<K, V>> FusedIterator for IntoIter<K, V, S> {}

impl<K, V, P, S: Storage<K, V>> IntoIterator for DenseMap<K, V, P, S> {
    type Item = (K, V);
    type IntoIter = IntoIter<K, V, S>;

    fn into_iter(self) -> Self::IntoIter {
        IntoIter {
            remaining: self.live,
            buckets: self.storage.into_retired(),
        }
    }
}

impl<'a, K, V, P, S: Storage<K, V>> IntoIterator for &'a DenseMap<K, V, P, S> {
    type Item = (&'a K, &'a V);
    type IntoIter = Iter<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

impl<'a, K, V, P, S: Storage<K, V>> IntoIterator for &'a mut DenseMap<K, V, P, S> {
    type Item = (&'a K, &'a mut V);
    type IntoIter = IterMut<'a, K, V>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter_mut()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::collections::BTreeSet;

    /// Every key collides, so lookups rely on equality alone.
    struct ConstPolicy;
    impl KeyPolicy<String> for ConstPolicy {
        fn hash_of(_: &String) -> u64 {
            0
        }
        fn equals(a: &String, b: &String) -> bool {
            a == b
        }
    }

    /// Invariant: `insert` never overwrites; the existing value survives and
    /// the flag reports the duplicate.
    #[test]
    fn duplicate_insert_leaves_entry_untouched() {
        let mut m: DenseMap<String, i32> = DenseMap::new();
        let (h, inserted) = m.insert("dup".to_string(), 1);
        assert!(inserted);
        let (h2, inserted) = m.insert("dup".to_string(), 2);
        assert!(!inserted);
        assert_eq!(h, h2);
        assert_eq!(h.value(&m), Some(&1));
        assert_eq!(m.len(), 1);
        m.assert_consistent();
    }

    /// Invariant: `insert_or_assign` overwrites in place and keeps the
    /// handle valid.
    #[test]
    fn insert_or_assign_overwrites() {
        let mut m: DenseMap<u32, &str> = DenseMap::new();
        let (h, inserted) = m.insert_or_assign(7, "a");
        assert!(inserted);
        let (h2, inserted) = m.insert_or_assign(7, "b");
        assert!(!inserted);
        assert_eq!(h, h2);
        assert_eq!(m.get(&7), Some(&"b"));
        assert_eq!(m.len(), 1);
    }

    /// Invariant: `find(k).is_some() == contains_key(k) == (count(k) == 1)`.
    #[test]
    fn find_contains_count_parity() {
        let mut m: DenseMap<String, i32> = DenseMap::new();
        for (i, k) in ["a", "b", "c"].iter().enumerate() {
            m.insert((*k).to_string(), i as i32);
        }
        for k in ["a", "b", "c", "x", "y"] {
            let s = k.to_string();
            let present = m.find(&s).is_some();
            assert_eq!(present, m.contains_key(&s));
            assert_eq!(m.count(&s), usize::from(present));
            assert_eq!(present, ["a", "b", "c"].contains(&k));
        }
    }

    /// Invariant: handle access yields the entry while it is live; mutation
    /// through `value_mut` is visible to lookups; erasing invalidates it.
    #[test]
    fn handle_access_and_mutation() {
        let mut m: DenseMap<String, i32> = DenseMap::new();
        let (h, _) = m.insert("k1".to_string(), 10);
        assert_eq!(h.key(&m), Some(&"k1".to_string()));
        *h.value_mut(&mut m).unwrap() += 5;
        assert_eq!(m.get(&"k1".to_string()), Some(&15));
        assert_eq!(h.entry(&m), Some((&"k1".to_string(), &15)));

        assert!(m.erase_at(h));
        assert!(h.value(&m).is_none());
        assert!(!m.erase_at(h), "second erase through the same handle");
        assert!(m.is_empty());
    }

    /// Invariant: an erased entry's handle never resolves to a later entry,
    /// even when the later insert reuses the erased bucket.
    #[test]
    fn stale_handle_does_not_alias_reused_bucket() {
        let mut m: DenseMap<String, i32, ConstPolicy> = DenseMap::new();
        let (h1, _) = m.insert("old".to_string(), 1);
        assert!(m.erase(&"old".to_string()));
        assert_eq!(m.tombstones(), 1);
        let (h2, _) = m.insert("new".to_string(), 2);
        assert_eq!(m.tombstones(), 0, "insert reuses the tombstone");
        assert_ne!(h1, h2);
        assert!(h1.value(&m).is_none());
        assert_eq!(h2.value(&m), Some(&2));
    }

    /// Invariant: handles stop resolving after a rebuild moves the entries.
    #[test]
    fn handles_expire_on_growth() {
        let mut m: DenseMap<u32, u32> = DenseMap::new();
        let (h, _) = m.insert(0, 0);
        for i in 1..47 {
            m.insert(i, i);
        }
        assert_eq!(h.value(&m), Some(&0), "no rebuild yet");
        m.insert(47, 47);
        assert_eq!(m.capacity(), 128);
        assert!(h.value(&m).is_none());
        assert_eq!(m.find(&0).and_then(|h| h.value(&m)), Some(&0));
    }

    /// Invariant: iteration yields each live entry exactly once and
    /// `iter_mut`/`values_mut` updates are seen by later lookups.
    #[test]
    fn iteration_and_mutation() {
        let mut m: DenseMap<String, i32> = DenseMap::new();
        let keys = ["k1", "k2", "k3"];
        for (i, k) in keys.iter().enumerate() {
            m.insert((*k).to_string(), i as i32);
        }
        m.erase(&"k2".to_string());
        m.insert("k2".to_string(), 1);

        let it = m.iter();
        assert_eq!(it.len(), 3);
        let seen: BTreeSet<String> = it.map(|(k, _)| k.clone()).collect();
        let expected: BTreeSet<String> = keys.iter().map(|s| (*s).to_string()).collect();
        assert_eq!(seen, expected);

        for (_, v) in m.iter_mut() {
            *v += 10;
        }
        for v in m.values_mut() {
            *v *= 2;
        }
        assert_eq!(m.get(&"k1".to_string()), Some(&20));
        assert_eq!(m.get(&"k3".to_string()), Some(&24));
        assert_eq!(m.values().copied().sum::<i32>(), 20 + 22 + 24);
        assert_eq!(m.keys().count(), 3);

        let mut owned: Vec<(String, i32)> = m.into_iter().collect();
        owned.sort();
        assert_eq!(owned[1], ("k2".to_string(), 22));
    }

    /// Invariant: lookups stay correct when every key hashes to the same
    /// bucket, including after erasing from the middle of a probe chain.
    #[test]
    fn collisions_resolve_by_equality() {
        let mut m: DenseMap<String, i32, ConstPolicy> = DenseMap::new();
        for i in 0..30 {
            m.insert(format!("k{i}"), i);
        }
        m.assert_consistent();
        assert!(m.erase(&"k10".to_string()));
        for i in 0..30 {
            let k = format!("k{i}");
            assert_eq!(m.get(&k).copied(), (i != 10).then_some(i));
        }
        m.insert("k10".to_string(), 100);
        assert_eq!(m.get(&"k10".to_string()), Some(&100));
        m.assert_consistent();
    }

    /// Invariant: `insert_with` runs its constructor only when inserting.
    #[test]
    fn insert_with_is_lazy() {
        let mut m: DenseMap<String, String> = DenseMap::new();
        let calls = Cell::new(0);
        let make = |v: &str| {
            calls.set(calls.get() + 1);
            v.to_string()
        };

        let (_, inserted) = m.insert_with("k".to_string(), || make("v"));
        assert!(inserted);
        let (h, inserted) = m.insert_with("k".to_string(), || make("v2"));
        assert!(!inserted);
        assert_eq!(calls.get(), 1, "constructor must not run on duplicate");
        assert_eq!(h.value(&m), Some(&"v".to_string()));
    }

    /// Invariant: `get_or_insert_default` creates the entry once and hands
    /// back the stored value each time.
    #[test]
    fn get_or_insert_default_counts_words() {
        let mut m: DenseMap<&str, usize> = DenseMap::new();
        for w in "the cat saw the other cat the end".split(' ') {
            *m.get_or_insert_default(w) += 1;
        }
        assert_eq!(m.lookup(&"the"), 3);
        assert_eq!(m.lookup(&"cat"), 2);
        assert_eq!(m.lookup(&"dog"), 0);
        assert_eq!(m.len(), 5);
    }

    /// Invariant: `len`/`is_empty` track live entries through failed
    /// duplicate inserts and removals.
    #[test]
    fn len_and_is_empty() {
        let mut m: DenseMap<i64, i64> = DenseMap::new();
        assert!(m.is_empty());
        assert_eq!(m.capacity(), 0);
        m.insert(-1, 1);
        m.insert(-1, 2);
        assert_eq!(m.len(), 1);
        m.insert(-2, 2);
        assert_eq!(m.remove(&-1), Some(1));
        assert_eq!(m.remove(&-1), None);
        assert_eq!(m.len(), 1);
        assert_eq!(m.remove_entry(&-2), Some((-2, 2)));
        assert!(m.is_empty());
        assert_eq!(m.tombstones(), 2);
        m.assert_consistent();
    }

    /// Invariant: the table doubles on the insert that brings `live` to
    /// three quarters of the capacity, and not before.
    #[test]
    fn grows_at_three_quarters() {
        let mut m: DenseMap<u32, u32> = DenseMap::new();
        m.insert(0, 0);
        assert_eq!(m.capacity(), 64);
        for i in 1..47 {
            m.insert(i, i);
        }
        assert_eq!(m.capacity(), 64);
        m.insert(47, 47);
        assert_eq!(m.capacity(), 128);
        assert_eq!(m.len(), 48);
        m.assert_consistent();
    }

    /// Invariant: once tombstones eat the free buckets down to an eighth of
    /// the table, an insert rebuilds in place instead of growing.
    #[test]
    fn tombstones_trigger_in_place_rehash() {
        let mut m: DenseMap<u32, u32> = DenseMap::new();
        m.insert(1_000_000, 0);
        let base = m.storage_ptr();
        let mut rehashed = false;
        for k in 0..2_000u32 {
            let before = m.tombstones();
            m.insert(k, k);
            // Reusing a tombstone only takes one away.
            if before >= 2 && m.tombstones() == 0 {
                rehashed = true;
                assert!(before >= 54, "rehashed early with {before} tombstones");
            }
            assert!(m.erase(&k));
            assert_eq!(m.capacity(), 64);
            assert_eq!(m.storage_ptr(), base);
            m.assert_consistent();
        }
        assert!(rehashed);
        assert_eq!(m.get(&1_000_000), Some(&0));
    }

    /// Invariant: `clear` shrinks a mostly empty table and otherwise keeps
    /// its capacity.
    #[test]
    fn clear_shrinks_sparse_tables() {
        let mut m: DenseMap<u32, u32> = DenseMap::new();
        for i in 0..48 {
            m.insert(i, i);
        }
        assert_eq!(m.capacity(), 128);
        m.clear();
        assert_eq!(m.capacity(), 128, "48 * 4 >= 128 keeps the table");
        assert!(m.is_empty());

        for i in 0..200 {
            m.insert(i, i);
        }
        assert_eq!(m.capacity(), 512);
        for i in 0..190 {
            m.erase(&i);
        }
        m.clear();
        // 10 live -> 2^(4 + 1) = 32 -> at least 64
        assert_eq!(m.capacity(), 64);
        assert_eq!(m.tombstones(), 0);

        m.insert(3, 3);
        m.shrink_and_clear();
        assert_eq!(m.capacity(), 64);
        m.shrink_and_clear();
        assert_eq!(m.capacity(), 0, "an empty map releases its table");
    }

    /// Invariant: `reserve` sizes for the requested entry count and never
    /// shrinks.
    #[test]
    fn reserve_sizes_for_entries() {
        let mut m: DenseMap<u32, u32> = DenseMap::with_capacity(48);
        assert_eq!(m.capacity(), 128);
        let base = m.storage_ptr();
        for i in 0..48 {
            m.insert(i, i);
        }
        assert_eq!(m.storage_ptr(), base, "no rebuild within the reservation");
        m.reserve(10);
        assert_eq!(m.capacity(), 128);
        assert!(m.try_reserve(usize::MAX).is_err());
        assert_eq!(m.len(), 48);
    }

    #[test]
    fn with_config_rejects_invalid_thresholds() {
        let bad = Config {
            max_load: (1, 0),
            ..Config::DEFAULT
        };
        let rejected: Result<DenseMap<u32, u32>, Error> = DenseMap::with_config(bad);
        assert!(matches!(rejected, Err(Error::InvalidConfig(_))));

        let tight = Config {
            min_heap_buckets: 8,
            ..Config::DEFAULT
        };
        let mut m: DenseMap<u32, u32> = DenseMap::with_config(tight).unwrap();
        m.insert(1, 1);
        assert_eq!(m.capacity(), 8);
    }

    /// Invariant: a clone is a deep copy with the same capacity and the
    /// same bucket states; the two maps then evolve independently.
    #[test]
    fn clone_is_deep() {
        let mut m: DenseMap<String, Vec<u8>> = DenseMap::new();
        m.insert("a".into(), vec![1]);
        m.insert("b".into(), vec![2]);
        m.erase(&"a".to_string());
        let mut c = m.clone();
        assert_eq!(c.capacity(), m.capacity());
        assert_eq!(c.tombstones(), 1);
        assert_eq!(c, m);
        c.get_mut(&"b".to_string()).unwrap().push(3);
        assert_eq!(m.get(&"b".to_string()), Some(&vec![2]));
        assert_ne!(c, m);
        c.assert_consistent();
    }

    #[test]
    fn retain_drops_rejected_entries() {
        let mut m: DenseMap<u32, u32> = (0..20).map(|i| (i, i * i)).collect();
        m.retain(|k, v| {
            *v += 1;
            k % 2 == 0
        });
        assert_eq!(m.len(), 10);
        assert_eq!(m.get(&4), Some(&17));
        assert!(!m.contains_key(&5));
        m.assert_consistent();
    }

    #[test]
    fn extend_overwrites_and_debug_lists_entries() {
        let mut m: DenseMap<u8, char> = DenseMap::new();
        m.extend([(1, 'a'), (2, 'b'), (1, 'c')]);
        assert_eq!(m.len(), 2);
        assert_eq!(m.get(&1), Some(&'c'));

        let mut single: DenseMap<u8, char> = DenseMap::new();
        single.insert(9, 'z');
        assert_eq!(format!("{single:?}"), "{9: 'z'}");
    }

    #[test]
    fn pointer_introspection() {
        let mut m: DenseMap<u64, u64> = DenseMap::new();
        assert_eq!(m.approx_memory_bytes(), 0);
        m.insert(1, 1);
        assert_eq!(
            m.approx_memory_bytes(),
            64 * mem::size_of::<Bucket<u64, u64>>()
        );
        let v: *const u64 = m.get(&1).unwrap();
        assert!(m.is_pointer_into_buckets(v));
        let outside = 5u64;
        assert!(!m.is_pointer_into_buckets(&outside as *const u64));
    }

    #[cfg(debug_assertions)]
    #[test]
    #[should_panic(expected = "reserved sentinel")]
    fn sentinel_keys_are_rejected_in_debug_builds() {
        let mut m: DenseMap<u32, u32> = DenseMap::new();
        m.insert(u32::MAX, 0);
    }
}
