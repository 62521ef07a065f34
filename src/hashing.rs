//! Fingerprinting engine.
//!
//! A CityHash-derived 64-bit hash over byte sequences and heterogeneous
//! value lists. Inputs of at most 64 bytes are mixed directly by a
//! length-banded routine; longer inputs drive a 56-byte rolling state one
//! 64-byte chunk at a time and are finalized with the total length.
//!
//! Bytes are read little-endian, so fingerprints are identical across hosts
//! for the same seed.
//!
//! Seeding
//! - [`HashEngine`] values carry an explicit seed and never touch global
//!   state.
//! - The free functions and [`Fingerprint`] impls use the process seed. It
//!   is fixed the first time it is read; [`set_fixed_execution_seed`] may
//!   override it only before that point, which keeps every fingerprint
//!   stored in a live table stable for the rest of the process.

use crate::error::Error;
use core::hash::{BuildHasher, Hasher};
use std::sync::OnceLock;

// Primes between 2^63 and 2^64.
const K0: u64 = 0xc3a5_c85c_97cb_3127;
const K1: u64 = 0xb492_b66f_be98_f273;
const K2: u64 = 0x9ae1_6a3b_2f90_404f;
const K3: u64 = 0xc949_d7c7_509e_6557;

const SEED_PRIME: u64 = 0xff51_afd7_ed55_8ccd;

const CHUNK: usize = 64;

static EXECUTION_SEED: OnceLock<u64> = OnceLock::new();

/// The process-wide seed used by [`hash_bytes`], [`hash_combine!`] and the
/// [`Fingerprint`] impls. Fixed on first call.
pub fn execution_seed() -> u64 {
    *EXECUTION_SEED.get_or_init(|| SEED_PRIME)
}

/// Pin the process seed to `seed` for deterministic runs.
///
/// Must happen before anything has been hashed with the process seed;
/// afterwards the seed is frozen and this returns
/// [`Error::SeedAlreadyFixed`]. A `seed` of zero selects the default seed.
pub fn set_fixed_execution_seed(seed: u64) -> Result<(), Error> {
    let wanted = if seed == 0 { SEED_PRIME } else { seed };
    EXECUTION_SEED
        .set(wanted)
        .map_err(|_| Error::SeedAlreadyFixed)
}

#[inline]
fn fetch64(s: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 8];
    b.copy_from_slice(&s[at..at + 8]);
    u64::from_le_bytes(b)
}

#[inline]
fn fetch32(s: &[u8], at: usize) -> u64 {
    let mut b = [0u8; 4];
    b.copy_from_slice(&s[at..at + 4]);
    u32::from_le_bytes(b) as u64
}

#[inline]
fn shift_mix(v: u64) -> u64 {
    v ^ (v >> 47)
}

/// Murmur-inspired 128-to-64 bit mix.
#[inline]
fn hash_16_bytes(low: u64, high: u64) -> u64 {
    const MUL: u64 = 0x9ddf_ea08_eb38_2d69;
    let mut a = (low ^ high).wrapping_mul(MUL);
    a ^= a >> 47;
    let mut b = (high ^ a).wrapping_mul(MUL);
    b ^= b >> 47;
    b.wrapping_mul(MUL)
}

fn hash_1to3_bytes(s: &[u8], seed: u64) -> u64 {
    let len = s.len();
    let a = s[0] as u32;
    let b = s[len >> 1] as u32;
    let c = s[len - 1] as u32;
    let y = a.wrapping_add(b << 8);
    let z = (len as u32).wrapping_add(c << 2);
    shift_mix((y as u64).wrapping_mul(K2) ^ (z as u64).wrapping_mul(K3) ^ seed).wrapping_mul(K2)
}

fn hash_4to8_bytes(s: &[u8], seed: u64) -> u64 {
    let len = s.len();
    let a = fetch32(s, 0);
    hash_16_bytes((len as u64).wrapping_add(a << 3), seed ^ fetch32(s, len - 4))
}

fn hash_9to16_bytes(s: &[u8], seed: u64) -> u64 {
    let len = s.len();
    let a = fetch64(s, 0);
    let b = fetch64(s, len - 8);
    hash_16_bytes(seed ^ a, b.wrapping_add(len as u64).rotate_right(len as u32)) ^ b
}

fn hash_17to32_bytes(s: &[u8], seed: u64) -> u64 {
    let len = s.len();
    let a = fetch64(s, 0).wrapping_mul(K1);
    let b = fetch64(s, 8);
    let c = fetch64(s, len - 8).wrapping_mul(K2);
    let d = fetch64(s, len - 16).wrapping_mul(K0);
    hash_16_bytes(
        a.wrapping_sub(b)
            .rotate_right(43)
            .wrapping_add((c ^ seed).rotate_right(30))
            .wrapping_add(d),
        a.wrapping_add((b ^ K3).rotate_right(20))
            .wrapping_sub(c)
            .wrapping_add(len as u64)
            .wrapping_add(seed),
    )
}

fn hash_33to64_bytes(s: &[u8], seed: u64) -> u64 {
    let len = s.len();
    let mut z = fetch64(s, 24);
    let mut a = fetch64(s, 0).wrapping_add(
        (len as u64)
            .wrapping_add(fetch64(s, len - 16))
            .wrapping_mul(K0),
    );
    let mut b = a.wrapping_add(z).rotate_right(52);
    let mut c = a.rotate_right(37);
    a = a.wrapping_add(fetch64(s, 8));
    c = c.wrapping_add(a.rotate_right(7));
    a = a.wrapping_add(fetch64(s, 16));
    let vf = a.wrapping_add(z);
    let vs = b.wrapping_add(a.rotate_right(31)).wrapping_add(c);

    a = fetch64(s, 16).wrapping_add(fetch64(s, len - 32));
    z = fetch64(s, len - 8);
    b = a.wrapping_add(z).rotate_right(52);
    c = a.rotate_right(37);
    a = a.wrapping_add(fetch64(s, len - 24));
    c = c.wrapping_add(a.rotate_right(7));
    a = a.wrapping_add(fetch64(s, len - 16));
    let wf = a.wrapping_add(z);
    let ws = b.wrapping_add(a.rotate_right(31)).wrapping_add(c);

    let r = shift_mix(
        vf.wrapping_add(ws)
            .wrapping_mul(K2)
            .wrapping_add(wf.wrapping_add(vs).wrapping_mul(K0)),
    );
    shift_mix((seed ^ r.wrapping_mul(K0)).wrapping_add(vs)).wrapping_mul(K2)
}

/// Hash an input of at most 64 bytes.
fn hash_short(s: &[u8], seed: u64) -> u64 {
    debug_assert!(s.len() <= CHUNK);
    match s.len() {
        0 => K2 ^ seed,
        1..=3 => hash_1to3_bytes(s, seed),
        4..=8 => hash_4to8_bytes(s, seed),
        9..=16 => hash_9to16_bytes(s, seed),
        17..=32 => hash_17to32_bytes(s, seed),
        _ => hash_33to64_bytes(s, seed),
    }
}

/// Rolling state for inputs longer than one chunk.
#[derive(Copy, Clone, Debug, Default)]
struct HashState {
    h0: u64,
    h1: u64,
    h2: u64,
    h3: u64,
    h4: u64,
    h5: u64,
    h6: u64,
}

impl HashState {
    /// Seed the state and mix in the first chunk.
    fn create(chunk: &[u8], seed: u64) -> Self {
        let mut state = HashState {
            h0: 0,
            h1: seed,
            h2: hash_16_bytes(seed, K1),
            h3: (seed ^ K1).rotate_right(49),
            h4: seed.wrapping_mul(K1),
            h5: shift_mix(seed),
            h6: 0,
        };
        state.h6 = hash_16_bytes(state.h4, state.h5);
        state.mix(chunk);
        state
    }

    /// Mix 32 bytes into the pair `(a, b)`.
    #[inline]
    fn mix_32_bytes(s: &[u8], a: &mut u64, b: &mut u64) {
        *a = a.wrapping_add(fetch64(s, 0));
        let c = fetch64(s, 24);
        *b = b.wrapping_add(*a).wrapping_add(c).rotate_right(21);
        let d = *a;
        *a = a.wrapping_add(fetch64(s, 8)).wrapping_add(fetch64(s, 16));
        *b = b.wrapping_add(a.rotate_right(44)).wrapping_add(d);
        *a = a.wrapping_add(c);
    }

    /// Mix one full 64-byte chunk.
    fn mix(&mut self, s: &[u8]) {
        debug_assert!(s.len() >= CHUNK);
        self.h0 = self
            .h0
            .wrapping_add(self.h1)
            .wrapping_add(self.h3)
            .wrapping_add(fetch64(s, 8))
            .rotate_right(37)
            .wrapping_mul(K1);
        self.h1 = self
            .h1
            .wrapping_add(self.h4)
            .wrapping_add(fetch64(s, 48))
            .rotate_right(42)
            .wrapping_mul(K1);
        self.h0 ^= self.h6;
        self.h1 = self.h1.wrapping_add(self.h3).wrapping_add(fetch64(s, 40));
        self.h2 = self.h2.wrapping_add(self.h5).rotate_right(33).wrapping_mul(K1);
        self.h3 = self.h4.wrapping_mul(K1);
        self.h4 = self.h0.wrapping_add(self.h5);
        Self::mix_32_bytes(&s[..32], &mut self.h3, &mut self.h4);
        self.h5 = self.h2.wrapping_add(self.h6);
        self.h6 = self.h1.wrapping_add(fetch64(s, 16));
        Self::mix_32_bytes(&s[32..64], &mut self.h5, &mut self.h6);
        core::mem::swap(&mut self.h2, &mut self.h0);
    }

    fn finalize(&self, length: usize) -> u64 {
        hash_16_bytes(
            hash_16_bytes(self.h3, self.h5)
                .wrapping_add(shift_mix(self.h1).wrapping_mul(K1))
                .wrapping_add(self.h2),
            hash_16_bytes(self.h4, self.h6)
                .wrapping_add(shift_mix(length as u64).wrapping_mul(K1))
                .wrapping_add(self.h0),
        )
    }
}

fn hash_bytes_seeded(bytes: &[u8], seed: u64) -> u64 {
    let len = bytes.len();
    if len <= CHUNK {
        return hash_short(bytes, seed);
    }
    let mut state = HashState::create(&bytes[..CHUNK], seed);
    let aligned_end = len & !(CHUNK - 1);
    let mut at = CHUNK;
    while at != aligned_end {
        state.mix(&bytes[at..at + CHUNK]);
        at += CHUNK;
    }
    // A trailing partial chunk is covered by re-mixing the last 64 bytes.
    if len & (CHUNK - 1) != 0 {
        state.mix(&bytes[len - CHUNK..]);
    }
    state.finalize(len)
}

fn hash_integer_seeded(value: u64, seed: u64) -> u64 {
    let s = value.to_le_bytes();
    let a = fetch32(&s, 0);
    hash_16_bytes(seed.wrapping_add(a << 3), fetch32(&s, 4))
}

/// Hash a contiguous byte sequence with the process seed.
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    hash_bytes_seeded(bytes, execution_seed())
}

/// Hash a single integer value with the process seed.
///
/// Every integer width is widened to 64 bits first, so `hash_integer(4u8)`
/// equals `hash_integer(4u64)`.
pub fn hash_integer(value: u64) -> u64 {
    hash_integer_seeded(value, execution_seed())
}

/// The raw bytes a value contributes to a combined hash: the value itself
/// for integers and pointers, its own fingerprint otherwise.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HashableData {
    bytes: [u8; 16],
    len: u8,
}

impl HashableData {
    /// `raw` is one of the fixed widths 1, 2, 4, 8 or 16.
    pub(crate) fn from_bytes(raw: &[u8]) -> Self {
        debug_assert!(raw.len() <= 16 && raw.len().is_power_of_two());
        let mut bytes = [0u8; 16];
        bytes[..raw.len()].copy_from_slice(raw);
        Self {
            bytes,
            len: raw.len() as u8,
        }
    }

    pub fn from_u64(v: u64) -> Self {
        Self::from_bytes(&v.to_le_bytes())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes[..self.len as usize]
    }
}

/// Per-type `hash_value`.
pub trait Fingerprint {
    /// 64-bit fingerprint of `self` under the process seed.
    fn fingerprint(&self) -> u64;

    /// Bytes this value feeds into [`HashCombiner`] and
    /// [`hash_combine_range`].
    fn hashable_data(&self) -> HashableData {
        HashableData::from_u64(self.fingerprint())
    }
}

macro_rules! fingerprint_integers {
    ($($t:ty),*) => {$(
        impl Fingerprint for $t {
            #[inline]
            fn fingerprint(&self) -> u64 {
                hash_integer(*self as u64)
            }
            #[inline]
            fn hashable_data(&self) -> HashableData {
                HashableData::from_bytes(&self.to_le_bytes())
            }
        }
    )*};
}

fingerprint_integers!(u8, u16, u32, u64, usize, i8, i16, i32, i64, isize);

impl Fingerprint for bool {
    fn fingerprint(&self) -> u64 {
        hash_integer(*self as u64)
    }
    fn hashable_data(&self) -> HashableData {
        HashableData::from_bytes(&[*self as u8])
    }
}

impl Fingerprint for char {
    fn fingerprint(&self) -> u64 {
        hash_integer(*self as u64)
    }
    fn hashable_data(&self) -> HashableData {
        HashableData::from_bytes(&(*self as u32).to_le_bytes())
    }
}

impl<T: ?Sized> Fingerprint for *const T {
    fn fingerprint(&self) -> u64 {
        hash_integer(self.cast::<()>() as usize as u64)
    }
    fn hashable_data(&self) -> HashableData {
        HashableData::from_bytes(&(self.cast::<()>() as usize).to_le_bytes())
    }
}

impl<T: ?Sized> Fingerprint for *mut T {
    fn fingerprint(&self) -> u64 {
        self.cast_const().fingerprint()
    }
    fn hashable_data(&self) -> HashableData {
        self.cast_const().hashable_data()
    }
}

impl Fingerprint for str {
    fn fingerprint(&self) -> u64 {
        hash_bytes(self.as_bytes())
    }
}

impl Fingerprint for String {
    fn fingerprint(&self) -> u64 {
        self.as_str().fingerprint()
    }
}

impl<T: Fingerprint> Fingerprint for [T] {
    fn fingerprint(&self) -> u64 {
        hash_combine_range(self)
    }
}

impl<T: Fingerprint> Fingerprint for Vec<T> {
    fn fingerprint(&self) -> u64 {
        self.as_slice().fingerprint()
    }
}

impl<A: Fingerprint, B: Fingerprint> Fingerprint for (A, B) {
    fn fingerprint(&self) -> u64 {
        let mut c = HashCombiner::new();
        c.combine(&self.0);
        c.combine(&self.1);
        c.finish_code()
    }
}

impl<T: Fingerprint + ?Sized> Fingerprint for &T {
    fn fingerprint(&self) -> u64 {
        (**self).fingerprint()
    }
    fn hashable_data(&self) -> HashableData {
        (**self).hashable_data()
    }
}

/// Incremental, order-sensitive combiner over heterogeneous values.
///
/// Values are packed into a 64-byte buffer; a value straddling the end of
/// the buffer is split across two chunks so the result equals hashing the
/// concatenated bytes.
#[derive(Clone, Debug)]
pub struct HashCombiner {
    buffer: [u8; CHUNK],
    pos: usize,
    state: HashState,
    length: usize,
    seed: u64,
}

impl HashCombiner {
    /// Combiner under the process seed.
    pub fn new() -> Self {
        Self::with_seed(execution_seed())
    }

    pub fn with_seed(seed: u64) -> Self {
        Self {
            buffer: [0u8; CHUNK],
            pos: 0,
            state: HashState::default(),
            length: 0,
            seed,
        }
    }

    /// Append one value's hashable data.
    pub fn combine<T: Fingerprint + ?Sized>(&mut self, value: &T) -> &mut Self {
        let data = value.hashable_data();
        self.write_data(data.as_bytes());
        self
    }

    fn write_data(&mut self, data: &[u8]) {
        let n = data.len();
        if self.pos + n <= CHUNK {
            self.buffer[self.pos..self.pos + n].copy_from_slice(data);
            self.pos += n;
            return;
        }
        let partial = CHUNK - self.pos;
        self.buffer[self.pos..].copy_from_slice(&data[..partial]);
        self.flush_chunk();
        let rest = &data[partial..];
        self.buffer[..rest.len()].copy_from_slice(rest);
        self.pos = rest.len();
    }

    fn flush_chunk(&mut self) {
        if self.length == 0 {
            self.state = HashState::create(&self.buffer, self.seed);
        } else {
            self.state.mix(&self.buffer);
        }
        self.length += CHUNK;
        self.pos = 0;
    }

    /// The combined fingerprint of everything appended so far.
    pub fn finish_code(&self) -> u64 {
        if self.length == 0 {
            return hash_short(&self.buffer[..self.pos], self.seed);
        }
        // Rotating the stale tail in front of the fresh bytes reproduces the
        // last 64 bytes of the stream, as the contiguous path mixes them.
        let mut tail = self.buffer;
        tail.rotate_left(self.pos);
        let mut state = self.state;
        state.mix(&tail);
        state.finalize(self.length + self.pos)
    }
}

impl Default for HashCombiner {
    fn default() -> Self {
        Self::new()
    }
}

/// Hash arbitrary bytes written through the std `Hasher` interface.
impl Hasher for HashCombiner {
    fn write(&mut self, bytes: &[u8]) {
        for chunk in bytes.chunks(8) {
            if chunk.len() == 8 {
                self.write_data(chunk);
            } else {
                for b in chunk {
                    self.write_data(core::slice::from_ref(b));
                }
            }
        }
    }

    fn finish(&self) -> u64 {
        self.finish_code()
    }
}

/// Combine a heterogeneous list of values into one fingerprint.
///
/// ```
/// use densemap::hash_combine;
/// let a = hash_combine!(1u32, "two", 3u64);
/// let b = hash_combine!(1u32, "two", 3u64);
/// assert_eq!(a, b);
/// ```
#[macro_export]
macro_rules! hash_combine {
    ($($value:expr),+ $(,)?) => {{
        let mut combiner = $crate::hashing::HashCombiner::new();
        $( combiner.combine(&$value); )+
        combiner.finish_code()
    }};
}

/// Fingerprint a sequence without materializing it as one buffer.
///
/// Each element contributes its [`HashableData`]; the result equals
/// [`hash_bytes`] over the concatenation of those bytes.
pub fn hash_combine_range<I>(values: I) -> u64
where
    I: IntoIterator,
    I::Item: Fingerprint,
{
    HashEngine::global().hash_range(values)
}

/// Hashing under an explicit seed.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct HashEngine {
    seed: u64,
}

impl HashEngine {
    pub const fn with_seed(seed: u64) -> Self {
        Self { seed }
    }

    /// Engine over the process seed.
    pub fn global() -> Self {
        Self::with_seed(execution_seed())
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn hash_bytes(&self, bytes: &[u8]) -> u64 {
        hash_bytes_seeded(bytes, self.seed)
    }

    pub fn hash_integer(&self, value: u64) -> u64 {
        hash_integer_seeded(value, self.seed)
    }

    pub fn combiner(&self) -> HashCombiner {
        HashCombiner::with_seed(self.seed)
    }

    pub fn hash_range<I>(&self, values: I) -> u64
    where
        I: IntoIterator,
        I::Item: Fingerprint,
    {
        let mut values = values.into_iter();
        let mut buffer = [0u8; CHUNK];
        let mut pending: Option<HashableData> = None;

        // Elements are never split; every hashable width divides 64, so a
        // chunk is always exactly full before the next one starts.
        let mut fill = |buffer: &mut [u8; CHUNK], pending: &mut Option<HashableData>| {
            let mut pos = 0;
            loop {
                let data = match pending.take().or_else(|| values.next().map(|v| v.hashable_data())) {
                    Some(d) => d,
                    None => return (pos, true),
                };
                let bytes = data.as_bytes();
                if pos + bytes.len() > CHUNK {
                    *pending = Some(data);
                    return (pos, false);
                }
                buffer[pos..pos + bytes.len()].copy_from_slice(bytes);
                pos += bytes.len();
            }
        };

        let (pos, done) = fill(&mut buffer, &mut pending);
        if done {
            return hash_short(&buffer[..pos], self.seed);
        }
        debug_assert_eq!(pos, CHUNK);

        let mut state = HashState::create(&buffer, self.seed);
        let mut length = CHUNK;
        loop {
            let (pos, done) = fill(&mut buffer, &mut pending);
            if done && pos == 0 {
                break;
            }
            buffer.rotate_left(pos);
            state.mix(&buffer);
            length += pos;
            if done {
                break;
            }
        }
        state.finalize(length)
    }
}

impl Default for HashEngine {
    fn default() -> Self {
        Self::global()
    }
}

/// `BuildHasher` producing [`HashCombiner`]s, for plugging the engine into
/// std collections or the [`crate::HashedKeys`] policy.
#[derive(Copy, Clone, Debug, Default)]
pub struct FingerprintBuildHasher {
    engine: Option<HashEngine>,
}

impl FingerprintBuildHasher {
    pub fn with_engine(engine: HashEngine) -> Self {
        Self {
            engine: Some(engine),
        }
    }
}

impl BuildHasher for FingerprintBuildHasher {
    type Hasher = HashCombiner;

    fn build_hasher(&self) -> HashCombiner {
        self.engine.unwrap_or_else(HashEngine::global).combiner()
    }
}
