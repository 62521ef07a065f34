//! Growth and shrink thresholds.
//!
//! The defaults are the empirically tuned values the table has always
//! used; they are exposed so callers can trade memory for probe length.

use crate::error::Error;

/// Rebuild thresholds carried by every map.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct Config {
    /// Maximum load factor as `(numerator, denominator)`. An insert that
    /// would bring `live * den` to at least `capacity * num` doubles the
    /// table first.
    pub max_load: (usize, usize),
    /// An insert rehashes in place when the free buckets left after it
    /// would be at most `capacity / tombstone_headroom`.
    pub tombstone_headroom: usize,
    /// Smallest heap bucket array. Must be a power of two.
    pub min_heap_buckets: usize,
    /// `clear` shrinks the table when `live * shrink_ratio < capacity`
    /// and the capacity exceeds `min_heap_buckets`.
    pub shrink_ratio: usize,
}

impl Config {
    pub const DEFAULT: Config = Config {
        max_load: (3, 4),
        tombstone_headroom: 8,
        min_heap_buckets: 64,
        shrink_ratio: 4,
    };

    pub fn validate(&self) -> Result<(), Error> {
        let (num, den) = self.max_load;
        if num == 0 || den == 0 || num >= den {
            return Err(Error::InvalidConfig("max_load must be a fraction in (0, 1)"));
        }
        if self.tombstone_headroom <= 1 {
            return Err(Error::InvalidConfig("tombstone_headroom must be at least 2"));
        }
        // At the load limit a table without tombstones must still have more
        // than capacity / tombstone_headroom free buckets, or every insert
        // below the limit would rehash in place.
        if (den - num).saturating_mul(self.tombstone_headroom) <= den {
            return Err(Error::InvalidConfig(
                "max_load leaves no room above the tombstone headroom",
            ));
        }
        if !self.min_heap_buckets.is_power_of_two() {
            return Err(Error::InvalidConfig(
                "min_heap_buckets must be a power of two",
            ));
        }
        if self.shrink_ratio == 0 {
            return Err(Error::InvalidConfig("shrink_ratio must be non-zero"));
        }
        Ok(())
    }

    /// True when inserting one more entry into a table with `live` entries
    /// and `capacity` buckets must double the table first.
    #[inline]
    pub(crate) fn exceeds_load(&self, live_after: usize, capacity: usize) -> bool {
        let (num, den) = self.max_load;
        live_after * den >= capacity * num
    }

    /// True when the free buckets left after an insert would drop to the
    /// tombstone headroom.
    #[inline]
    pub(crate) fn lacks_headroom(
        &self,
        live_after: usize,
        tombstones: usize,
        capacity: usize,
    ) -> bool {
        capacity <= live_after + tombstones + capacity / self.tombstone_headroom
    }

    /// Bucket count that holds `entries` without tripping the load limit:
    /// the smallest power of two strictly above `entries * den / num`.
    pub(crate) fn buckets_for_entries(&self, entries: usize) -> Result<usize, Error> {
        if entries == 0 {
            return Ok(0);
        }
        let (num, den) = self.max_load;
        let scaled = entries
            .checked_mul(den)
            .map(|n| n / num)
            .and_then(|n| n.checked_add(1))
            .ok_or(Error::CapacityOverflow)?;
        scaled
            .checked_next_power_of_two()
            .and_then(|p| if p == scaled { p.checked_mul(2) } else { Some(p) })
            .ok_or(Error::CapacityOverflow)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::DEFAULT
    }
}
