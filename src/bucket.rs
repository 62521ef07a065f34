//! A single table slot: an explicit occupancy state plus key and value
//! storage that is initialized only while the slot is live.

use core::fmt;
use core::mem::{self, ManuallyDrop, MaybeUninit};

/// Occupancy of a bucket.
///
/// `Empty -> Live` on insert, `Live -> Tombstone` on erase. A tombstone only
/// returns to `Empty` when the whole table is rebuilt or cleared.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum SlotState {
    Empty,
    Tombstone,
    Live,
}

/// Key/value slot. `key` and `value` are initialized iff `state == Live`.
pub struct Bucket<K, V> {
    state: SlotState,
    key: MaybeUninit<K>,
    value: MaybeUninit<V>,
}

impl<K, V> Bucket<K, V> {
    #[inline]
    pub const fn empty() -> Self {
        Bucket {
            state: SlotState::Empty,
            key: MaybeUninit::uninit(),
            value: MaybeUninit::uninit(),
        }
    }

    #[inline]
    pub fn state(&self) -> SlotState {
        self.state
    }

    #[inline]
    pub fn is_live(&self) -> bool {
        self.state == SlotState::Live
    }

    #[inline]
    pub fn key(&self) -> Option<&K> {
        self.entry().map(|(k, _)| k)
    }

    #[inline]
    pub fn entry(&self) -> Option<(&K, &V)> {
        if self.is_live() {
            // SAFETY: both halves are initialized while live.
            unsafe { Some((self.key.assume_init_ref(), self.value.assume_init_ref())) }
        } else {
            None
        }
    }

    #[inline]
    pub fn entry_mut(&mut self) -> Option<(&K, &mut V)> {
        if self.is_live() {
            // SAFETY: both halves are initialized while live.
            unsafe { Some((self.key.assume_init_ref(), self.value.assume_init_mut())) }
        } else {
            None
        }
    }

    /// Construct an entry in a non-live slot.
    #[inline]
    pub fn fill(&mut self, key: K, value: V) {
        debug_assert!(!self.is_live(), "filling a live bucket");
        self.key.write(key);
        self.value.write(value);
        self.state = SlotState::Live;
    }

    /// Move the entry out, leaving a tombstone.
    #[inline]
    pub fn take(&mut self) -> Option<(K, V)> {
        let entry = self.read_out()?;
        self.state = SlotState::Tombstone;
        Some(entry)
    }

    /// Destroy the entry in place, leaving a tombstone. Returns whether the
    /// slot was live.
    pub fn kill(&mut self) -> bool {
        match self.take() {
            Some(entry) => {
                drop(entry);
                true
            }
            None => false,
        }
    }

    /// Move the entry out, leaving the slot empty. Used by rebuilds.
    #[inline]
    pub fn evacuate(&mut self) -> Option<(K, V)> {
        let entry = self.read_out();
        self.state = SlotState::Empty;
        entry
    }

    /// Destroy any entry and mark the slot empty.
    #[inline]
    pub fn reset(&mut self) {
        drop(self.evacuate());
    }

    pub fn into_entry(self) -> Option<(K, V)> {
        let mut this = ManuallyDrop::new(self);
        this.read_out()
    }

    /// Read both halves out of a live slot. The caller must move the slot
    /// out of `Live` before it can be observed again.
    #[inline]
    fn read_out(&mut self) -> Option<(K, V)> {
        if !self.is_live() {
            return None;
        }
        // Mark non-live first so a panic in a later drop cannot see the
        // moved-out halves as initialized.
        self.state = SlotState::Tombstone;
        // SAFETY: the slot was live, and its state no longer claims the data.
        unsafe {
            Some((
                mem::replace(&mut self.key, MaybeUninit::uninit()).assume_init(),
                mem::replace(&mut self.value, MaybeUninit::uninit()).assume_init(),
            ))
        }
    }
}

impl<K, V> Default for Bucket<K, V> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<K, V> Drop for Bucket<K, V> {
    fn drop(&mut self) {
        if self.is_live() {
            // SAFETY: live slots own initialized halves, dropped exactly once here.
            unsafe {
                self.key.assume_init_drop();
                self.value.assume_init_drop();
            }
        }
    }
}

/// Copies sentinel slots by state and live slots by cloning both halves.
impl<K: Clone, V: Clone> Clone for Bucket<K, V> {
    fn clone(&self) -> Self {
        let mut out = Bucket::empty();
        match self.entry() {
            Some((k, v)) => out.fill(k.clone(), v.clone()),
            None => out.state = self.state,
        }
        out
    }
}

impl<K: fmt::Debug, V: fmt::Debug> fmt::Debug for Bucket<K, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.entry() {
            Some((k, v)) => f.debug_tuple("Live").field(k).field(v).finish(),
            None => f.write_str(match self.state {
                SlotState::Empty => "Empty",
                _ => "Tombstone",
            }),
        }
    }
}
