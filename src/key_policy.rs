//! Key policies: how a table hashes and compares its keys.
//!
//! A policy is a zero-sized type consumed by the table, never owned by a
//! key. Tables track slot occupancy with an explicit per-bucket state, so a
//! policy only has to supply hashing and equality. Policies that do reserve
//! two sentinel key values implement [`SentinelKeys`] as well; the table then
//! rejects those values in debug builds.

use crate::hashing::{hash_bytes, Fingerprint, FingerprintBuildHasher};
use core::hash::{BuildHasher, Hash};
use core::marker::PhantomData;

/// Hashing and equality for keys of type `K`.
pub trait KeyPolicy<K: ?Sized> {
    fn hash_of(key: &K) -> u64;

    fn equals(a: &K, b: &K) -> bool;

    /// Which reserved value `key` is, if any.
    #[inline]
    fn sentinel(_key: &K) -> Option<Sentinel> {
        None
    }

    /// True for values callers must never store as keys. Tables
    /// `debug_assert!` against this on every lookup.
    #[inline]
    fn is_reserved(key: &K) -> bool {
        Self::sentinel(key).is_some()
    }
}

/// The two reserved key values of a [`SentinelKeys`] policy.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Sentinel {
    Empty,
    Tombstone,
}

/// A policy that reserves two key values that are never real keys.
///
/// The two sentinels must differ from each other and from every key a
/// caller stores.
pub trait SentinelKeys<K>: KeyPolicy<K> {
    fn empty_key() -> K;
    fn tombstone_key() -> K;
}

/// The built-in policy for primitive, pointer, string and pair keys.
#[derive(Copy, Clone, Debug, Default)]
pub struct DefaultKeyPolicy;

/// Implements the sentinel check for a policy from its sentinels.
macro_rules! reserved_by_sentinels {
    ($k:ty) => {
        #[inline]
        fn sentinel(key: &$k) -> Option<Sentinel> {
            if <Self as KeyPolicy<$k>>::equals(key, &<Self as SentinelKeys<$k>>::empty_key()) {
                Some(Sentinel::Empty)
            } else if <Self as KeyPolicy<$k>>::equals(
                key,
                &<Self as SentinelKeys<$k>>::tombstone_key(),
            ) {
                Some(Sentinel::Tombstone)
            } else {
                None
            }
        }
    };
}

// Integral keys: the two largest values are reserved, the hash is a
// multiplicative scramble.
macro_rules! integral_policy {
    ($($t:ty),*) => {$(
        impl KeyPolicy<$t> for DefaultKeyPolicy {
            #[inline]
            fn hash_of(key: &$t) -> u64 {
                (*key as u64).wrapping_mul(37)
            }
            #[inline]
            fn equals(a: &$t, b: &$t) -> bool {
                a == b
            }
            reserved_by_sentinels!($t);
        }

        impl SentinelKeys<$t> for DefaultKeyPolicy {
            #[inline]
            fn empty_key() -> $t {
                <$t>::MAX
            }
            #[inline]
            fn tombstone_key() -> $t {
                <$t>::MAX - 1
            }
        }
    )*};
}

integral_policy!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl KeyPolicy<char> for DefaultKeyPolicy {
    #[inline]
    fn hash_of(key: &char) -> u64 {
        (*key as u64).wrapping_mul(37)
    }
    #[inline]
    fn equals(a: &char, b: &char) -> bool {
        a == b
    }
    reserved_by_sentinels!(char);
}

impl SentinelKeys<char> for DefaultKeyPolicy {
    fn empty_key() -> char {
        char::MAX
    }
    fn tombstone_key() -> char {
        '\u{10FFFE}'
    }
}

/// `bool` has no spare values, so it reserves nothing.
impl KeyPolicy<bool> for DefaultKeyPolicy {
    #[inline]
    fn hash_of(key: &bool) -> u64 {
        (*key as u64).wrapping_mul(37)
    }
    #[inline]
    fn equals(a: &bool, b: &bool) -> bool {
        a == b
    }
}

/// Low address bits guaranteed zero for a well-aligned `*const T`.
#[inline]
fn pointer_low_bits<T>() -> u32 {
    core::mem::align_of::<T>().trailing_zeros()
}

#[inline]
fn pointer_hash(addr: usize) -> u64 {
    ((addr >> 4) ^ (addr >> 9)) as u64
}

// Pointer keys: the sentinels are all-ones patterns shifted past the bits
// alignment keeps zero, so no aligned pointer can equal one.
impl<T> KeyPolicy<*const T> for DefaultKeyPolicy {
    #[inline]
    fn hash_of(key: &*const T) -> u64 {
        pointer_hash(*key as usize)
    }
    #[inline]
    fn equals(a: &*const T, b: &*const T) -> bool {
        core::ptr::eq(*a, *b)
    }
    reserved_by_sentinels!(*const T);
}

impl<T> SentinelKeys<*const T> for DefaultKeyPolicy {
    fn empty_key() -> *const T {
        (usize::MAX << pointer_low_bits::<T>()) as *const T
    }
    fn tombstone_key() -> *const T {
        ((usize::MAX - 1) << pointer_low_bits::<T>()) as *const T
    }
}

impl<T> KeyPolicy<*mut T> for DefaultKeyPolicy {
    #[inline]
    fn hash_of(key: &*mut T) -> u64 {
        pointer_hash(*key as usize)
    }
    #[inline]
    fn equals(a: &*mut T, b: &*mut T) -> bool {
        core::ptr::eq(*a, *b)
    }
    reserved_by_sentinels!(*mut T);
}

impl<T> SentinelKeys<*mut T> for DefaultKeyPolicy {
    fn empty_key() -> *mut T {
        <Self as SentinelKeys<*const T>>::empty_key().cast_mut()
    }
    fn tombstone_key() -> *mut T {
        <Self as SentinelKeys<*const T>>::tombstone_key().cast_mut()
    }
}

const EMPTY_STR_ADDR: usize = !0;
const TOMBSTONE_STR_ADDR: usize = !1;

/// A zero-length string at an address no allocation can occupy.
fn reserved_str(addr: usize) -> &'static str {
    // SAFETY: a zero-length slice only needs a non-null, aligned pointer,
    // and an empty byte sequence is valid UTF-8.
    unsafe {
        let bytes = core::slice::from_raw_parts(addr as *const u8, 0);
        core::str::from_utf8_unchecked(bytes)
    }
}

// String slices: the sentinels are empty strings told apart from real empty
// strings by address, so identity is checked before content.
impl<'a> KeyPolicy<&'a str> for DefaultKeyPolicy {
    #[inline]
    fn hash_of(key: &&'a str) -> u64 {
        hash_bytes(key.as_bytes())
    }

    fn equals(a: &&'a str, b: &&'a str) -> bool {
        let reserved_a = <Self as KeyPolicy<&str>>::sentinel(a);
        let reserved_b = <Self as KeyPolicy<&str>>::sentinel(b);
        match (reserved_a, reserved_b) {
            (None, None) => a == b,
            _ => reserved_a == reserved_b,
        }
    }

    #[inline]
    fn sentinel(key: &&'a str) -> Option<Sentinel> {
        if !key.is_empty() {
            return None;
        }
        match key.as_ptr() as usize {
            EMPTY_STR_ADDR => Some(Sentinel::Empty),
            TOMBSTONE_STR_ADDR => Some(Sentinel::Tombstone),
            _ => None,
        }
    }
}

impl<'a> SentinelKeys<&'a str> for DefaultKeyPolicy {
    fn empty_key() -> &'a str {
        reserved_str(EMPTY_STR_ADDR)
    }
    fn tombstone_key() -> &'a str {
        reserved_str(TOMBSTONE_STR_ADDR)
    }
}

/// Owned strings cannot carry a reserved address, so they reserve nothing.
impl KeyPolicy<String> for DefaultKeyPolicy {
    #[inline]
    fn hash_of(key: &String) -> u64 {
        hash_bytes(key.as_bytes())
    }
    #[inline]
    fn equals(a: &String, b: &String) -> bool {
        a == b
    }
}

/// 64-bit finalizer over two concatenated 32-bit element hashes.
#[inline]
fn pair_mix(first: u64, second: u64) -> u64 {
    let mut key = ((first & 0xffff_ffff) << 32) | (second & 0xffff_ffff);
    key = key.wrapping_add(!(key << 32));
    key ^= key >> 22;
    key = key.wrapping_add(!(key << 13));
    key ^= key >> 8;
    key = key.wrapping_add(key << 3);
    key ^= key >> 15;
    key = key.wrapping_add(!(key << 27));
    key ^= key >> 31;
    key
}

// Pairs: element-wise sentinels and equality, avalanche-combined hashes.
// A pair is reserved only when both elements are the same sentinel.
impl<A, B> KeyPolicy<(A, B)> for DefaultKeyPolicy
where
    DefaultKeyPolicy: KeyPolicy<A> + KeyPolicy<B>,
{
    #[inline]
    fn hash_of(key: &(A, B)) -> u64 {
        pair_mix(
            <Self as KeyPolicy<A>>::hash_of(&key.0),
            <Self as KeyPolicy<B>>::hash_of(&key.1),
        )
    }

    #[inline]
    fn equals(a: &(A, B), b: &(A, B)) -> bool {
        <Self as KeyPolicy<A>>::equals(&a.0, &b.0) && <Self as KeyPolicy<B>>::equals(&a.1, &b.1)
    }

    fn sentinel(key: &(A, B)) -> Option<Sentinel> {
        match (
            <Self as KeyPolicy<A>>::sentinel(&key.0),
            <Self as KeyPolicy<B>>::sentinel(&key.1),
        ) {
            (Some(first), Some(second)) if first == second => Some(first),
            _ => None,
        }
    }
}

impl<A, B> SentinelKeys<(A, B)> for DefaultKeyPolicy
where
    DefaultKeyPolicy: SentinelKeys<A> + SentinelKeys<B>,
{
    fn empty_key() -> (A, B) {
        (
            <Self as SentinelKeys<A>>::empty_key(),
            <Self as SentinelKeys<B>>::empty_key(),
        )
    }
    fn tombstone_key() -> (A, B) {
        (
            <Self as SentinelKeys<A>>::tombstone_key(),
            <Self as SentinelKeys<B>>::tombstone_key(),
        )
    }
}

/// Policy for any `K: Hash + Eq`, hashing through the fingerprint engine.
///
/// Use this for user-defined key types.
#[derive(Copy, Clone, Debug, Default)]
pub struct HashedKeys;

impl<K: Hash + Eq + ?Sized> KeyPolicy<K> for HashedKeys {
    #[inline]
    fn hash_of(key: &K) -> u64 {
        FingerprintBuildHasher::default().hash_one(key)
    }
    #[inline]
    fn equals(a: &K, b: &K) -> bool {
        a == b
    }
}

/// Policy for `K: Fingerprint + Eq`, using the key's own `hash_value`.
#[derive(Debug, Default)]
pub struct FingerprintKeys<K: ?Sized>(PhantomData<fn(&K)>);

impl<K: Fingerprint + Eq + ?Sized> KeyPolicy<K> for FingerprintKeys<K> {
    #[inline]
    fn hash_of(key: &K) -> u64 {
        key.fingerprint()
    }
    #[inline]
    fn equals(a: &K, b: &K) -> bool {
        a == b
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integral_sentinels_are_the_two_largest_values() {
        assert_eq!(<DefaultKeyPolicy as SentinelKeys<u32>>::empty_key(), u32::MAX);
        assert_eq!(<DefaultKeyPolicy as SentinelKeys<u32>>::tombstone_key(), u32::MAX - 1);
        assert_eq!(<DefaultKeyPolicy as SentinelKeys<i64>>::empty_key(), i64::MAX);
        assert!(<DefaultKeyPolicy as KeyPolicy<u8>>::is_reserved(&254));
        assert!(!<DefaultKeyPolicy as KeyPolicy<u8>>::is_reserved(&253));
        assert_eq!(<DefaultKeyPolicy as KeyPolicy<u64>>::hash_of(&2), 74);
    }

    #[test]
    fn pointer_sentinels_clear_alignment_bits() {
        let empty = <DefaultKeyPolicy as SentinelKeys<*const u64>>::empty_key();
        let tomb = <DefaultKeyPolicy as SentinelKeys<*const u64>>::tombstone_key();
        assert_eq!(empty as usize, usize::MAX << 3);
        assert_eq!(tomb as usize, (usize::MAX - 1) << 3);
        assert_ne!(empty, tomb);

        let x = 5u64;
        let p: *const u64 = &x;
        assert!(!<DefaultKeyPolicy as KeyPolicy<*const u64>>::is_reserved(&p));
        assert!(<DefaultKeyPolicy as KeyPolicy<*const u64>>::equals(&p, &p));
        let addr = p as usize;
        assert_eq!(
            <DefaultKeyPolicy as KeyPolicy<*const u64>>::hash_of(&p),
            ((addr >> 4) ^ (addr >> 9)) as u64
        );
    }

    /// Invariant: string sentinels are distinguished from real empty strings
    /// by identity, not content.
    #[test]
    fn str_sentinels_compare_by_identity() {
        type P = DefaultKeyPolicy;
        let empty = <P as SentinelKeys<&str>>::empty_key();
        let tomb = <P as SentinelKeys<&str>>::tombstone_key();
        let real = "";

        assert!(empty.is_empty() && tomb.is_empty());
        assert!(<P as KeyPolicy<&str>>::equals(&empty, &empty));
        assert!(!<P as KeyPolicy<&str>>::equals(&empty, &tomb));
        assert!(!<P as KeyPolicy<&str>>::equals(&real, &empty));
        assert!(!<P as KeyPolicy<&str>>::equals(&empty, &real));
        assert!(!<P as KeyPolicy<&str>>::equals(&real, &tomb));
        assert!(!<P as KeyPolicy<&str>>::equals(&tomb, &real));
        assert!(!<P as KeyPolicy<&str>>::equals(&tomb, &empty));
        assert_eq!(<P as KeyPolicy<&str>>::sentinel(&tomb), Some(Sentinel::Tombstone));
        assert!(<P as KeyPolicy<&str>>::equals(&real, &""));
        assert!(<P as KeyPolicy<&str>>::is_reserved(&empty));
        assert!(!<P as KeyPolicy<&str>>::is_reserved(&real));
    }

    #[test]
    fn pairs_combine_elements() {
        type P = DefaultKeyPolicy;
        let (e, t) = (
            <P as SentinelKeys<(u32, char)>>::empty_key(),
            <P as SentinelKeys<(u32, char)>>::tombstone_key(),
        );
        assert_eq!(e, (u32::MAX, char::MAX));
        assert!(<P as KeyPolicy<(u32, char)>>::is_reserved(&e));
        assert!(<P as KeyPolicy<(u32, char)>>::is_reserved(&t));
        // Only one element reserved: still a legal key.
        assert!(!<P as KeyPolicy<(u32, char)>>::is_reserved(&(u32::MAX, 'a')));
        assert_eq!(<P as KeyPolicy<(u32, char)>>::sentinel(&t), Some(Sentinel::Tombstone));

        let h1 = <P as KeyPolicy<(u32, u32)>>::hash_of(&(1, 2));
        let h2 = <P as KeyPolicy<(u32, u32)>>::hash_of(&(2, 1));
        assert_ne!(h1, h2);
        assert!(<P as KeyPolicy<(u32, u32)>>::equals(&(1, 2), &(1, 2)));
        assert!(!<P as KeyPolicy<(u32, u32)>>::equals(&(1, 2), &(1, 3)));
    }

    #[test]
    fn hashed_keys_delegate_to_eq_and_hash() {
        #[derive(Hash, PartialEq, Eq)]
        struct Point {
            x: i32,
            y: i32,
        }
        let a = Point { x: 1, y: 2 };
        let b = Point { x: 1, y: 2 };
        let c = Point { x: 2, y: 1 };
        assert!(<HashedKeys as KeyPolicy<Point>>::equals(&a, &b));
        assert_eq!(
            <HashedKeys as KeyPolicy<Point>>::hash_of(&a),
            <HashedKeys as KeyPolicy<Point>>::hash_of(&b)
        );
        assert_ne!(
            <HashedKeys as KeyPolicy<Point>>::hash_of(&a),
            <HashedKeys as KeyPolicy<Point>>::hash_of(&c)
        );
    }

    #[test]
    fn fingerprint_keys_use_hash_value() {
        let k = String::from("word");
        assert_eq!(
            <FingerprintKeys<String> as KeyPolicy<String>>::hash_of(&k),
            k.fingerprint()
        );
    }

    /// Invariant: a pair whose elements are different sentinels is neither
    /// sentinel pair, so it is a legal key.
    #[test]
    fn mixed_sentinel_pairs_are_legal_keys() {
        type P = DefaultKeyPolicy;
        let mixed = (u32::MAX, u32::MAX - 1);
        assert_eq!(<P as KeyPolicy<(u32, u32)>>::sentinel(&mixed), None);
        assert!(!<P as KeyPolicy<(u32, u32)>>::is_reserved(&mixed));
        assert!(!<P as KeyPolicy<(u32, u32)>>::is_reserved(&(u32::MAX - 1, u32::MAX)));
        assert!(<P as KeyPolicy<(u32, u32)>>::is_reserved(&(u32::MAX, u32::MAX)));

        let mut m: crate::DenseMap<(u32, u32), u32> = crate::DenseMap::new();
        let (h, inserted) = m.insert(mixed, 7);
        assert!(inserted);
        assert_eq!(h.value(&m), Some(&7));
        assert_eq!(m.get(&(u32::MAX - 1, u32::MAX)), None);

        let half: (&str, &str) = (<P as SentinelKeys<&str>>::empty_key(), "x");
        assert!(!<P as KeyPolicy<(&str, &str)>>::is_reserved(&half));
        assert_eq!(
            <P as KeyPolicy<(&str, &str)>>::hash_of(&half),
            <P as KeyPolicy<(&str, &str)>>::hash_of(&("", "x"))
        );
    }
}
