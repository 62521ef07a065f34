//! Hybrid storage: a fixed bucket array embedded in the map that moves to
//! the heap once a rebuild asks for more than `N` buckets, and moves back
//! when a shrink-and-clear plans `N` or fewer.

use crate::bucket::Bucket;
use crate::config::Config;
use crate::error::Error;
use crate::storage::{allocate_buckets, plan_heap_capacity, Storage};
use core::mem;
use tracing::debug;

enum Repr<K, V, const N: usize> {
    Inline([Bucket<K, V>; N]),
    Heap(Vec<Bucket<K, V>>),
}

/// Storage holding up to `N` buckets inline. `N` must be a power of two.
pub struct InlineStorage<K, V, const N: usize> {
    repr: Repr<K, V, N>,
}

fn empty_array<K, V, const N: usize>() -> [Bucket<K, V>; N] {
    core::array::from_fn(|_| Bucket::empty())
}

impl<K, V, const N: usize> InlineStorage<K, V, N> {
    const VALID_CAPACITY: () = assert!(
        N.is_power_of_two(),
        "inline capacity must be a non-zero power of two"
    );

    /// Move the live entries of the inline array to the front of a scratch
    /// array, keeping their relative order.
    fn compact(inline: &mut [Bucket<K, V>; N]) -> [Bucket<K, V>; N] {
        let mut scratch = empty_array::<K, V, N>();
        let mut out = 0;
        for bucket in inline.iter_mut() {
            if let Some((k, v)) = bucket.evacuate() {
                scratch[out].fill(k, v);
                out += 1;
            }
        }
        scratch
    }

    /// Small/large exchange: stash the heap array, relocate the inline
    /// buckets into the side that owned it, then install the stash.
    fn swap_mixed(small: &mut Self, large: &mut Self) {
        let heap = match mem::replace(&mut large.repr, Repr::Inline(empty_array())) {
            Repr::Heap(heap) => heap,
            Repr::Inline(_) => unreachable!("swap_mixed called with two inline sides"),
        };
        if let (Repr::Inline(dst), Repr::Inline(src)) = (&mut large.repr, &mut small.repr) {
            for (d, s) in dst.iter_mut().zip(src.iter_mut()) {
                mem::swap(d, s);
            }
        }
        small.repr = Repr::Heap(heap);
    }
}

/// Buckets detached from an [`InlineStorage`].
pub enum Retired<K, V, const N: usize> {
    Inline(core::array::IntoIter<Bucket<K, V>, N>),
    Heap(std::vec::IntoIter<Bucket<K, V>>),
}

impl<K, V, const N: usize> Iterator for Retired<K, V, N> {
    type Item = Bucket<K, V>;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        match self {
            Retired::Inline(it) => it.next(),
            Retired::Heap(it) => it.next(),
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        match self {
            Retired::Inline(it) => it.size_hint(),
            Retired::Heap(it) => it.size_hint(),
        }
    }
}

impl<K, V, const N: usize> Storage<K, V> for InlineStorage<K, V, N> {
    type Retired = Retired<K, V, N>;

    const INLINE_CAPACITY: usize = N;

    fn new() -> Self {
        #[allow(clippy::let_unit_value)]
        let () = Self::VALID_CAPACITY;
        InlineStorage {
            repr: Repr::Inline(empty_array()),
        }
    }

    #[inline]
    fn buckets(&self) -> &[Bucket<K, V>] {
        match &self.repr {
            Repr::Inline(a) => a,
            Repr::Heap(v) => v,
        }
    }

    #[inline]
    fn buckets_mut(&mut self) -> &mut [Bucket<K, V>] {
        match &mut self.repr {
            Repr::Inline(a) => a,
            Repr::Heap(v) => v,
        }
    }

    #[inline]
    fn is_inline(&self) -> bool {
        matches!(self.repr, Repr::Inline(_))
    }

    fn plan_capacity(at_least: usize, config: &Config) -> Result<usize, Error> {
        if at_least <= N {
            Ok(N)
        } else {
            plan_heap_capacity(at_least, config)
        }
    }

    fn replace(&mut self, buckets: usize) -> Result<Self::Retired, Error> {
        if buckets <= N {
            let was_heap = !self.is_inline();
            let old = mem::replace(&mut self.repr, Repr::Inline(empty_array()));
            if was_heap {
                debug!(to = N, "demoted bucket array to inline storage");
            }
            return Ok(match old {
                Repr::Inline(a) => Retired::Inline(a.into_iter()),
                Repr::Heap(v) => Retired::Heap(v.into_iter()),
            });
        }

        let fresh = allocate_buckets(buckets)?;
        match mem::replace(&mut self.repr, Repr::Heap(fresh)) {
            Repr::Inline(mut inline) => {
                debug!(from = N, to = buckets, "promoted bucket array to the heap");
                Ok(Retired::Inline(Self::compact(&mut inline).into_iter()))
            }
            Repr::Heap(v) => Ok(Retired::Heap(v.into_iter())),
        }
    }

    fn swap_storage(&mut self, other: &mut Self) {
        match (self.is_inline(), other.is_inline()) {
            (true, true) => {
                if let (Repr::Inline(a), Repr::Inline(b)) = (&mut self.repr, &mut other.repr) {
                    a.swap_with_slice(b);
                }
            }
            (false, false) => {
                if let (Repr::Heap(a), Repr::Heap(b)) = (&mut self.repr, &mut other.repr) {
                    mem::swap(a, b);
                }
            }
            (true, false) => Self::swap_mixed(self, other),
            (false, true) => Self::swap_mixed(other, self),
        }
    }

    fn into_retired(self) -> Self::Retired {
        match self.repr {
            Repr::Inline(a) => Retired::Inline(a.into_iter()),
            Repr::Heap(v) => Retired::Heap(v.into_iter()),
        }
    }
}

impl<K: Clone, V: Clone, const N: usize> Clone for InlineStorage<K, V, N> {
    fn clone(&self) -> Self {
        let repr = match &self.repr {
            Repr::Inline(a) => Repr::Inline(a.clone()),
            Repr::Heap(v) => Repr::Heap(v.clone()),
        };
        InlineStorage { repr }
    }
}
