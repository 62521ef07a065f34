// The process seed can be pinned exactly once, before its first use. This
// file holds a single test so nothing else in the process reads the seed
// first.
use densemap::{execution_seed, hash_bytes, set_fixed_execution_seed, Error, HashEngine};

// Test: deterministic seeding.
// Verifies: the override takes effect for the free functions, and a second
// override after first use is refused without changing the seed.
#[test]
fn seed_is_fixed_once_then_frozen() {
    set_fixed_execution_seed(42).expect("nothing has hashed yet");
    assert_eq!(execution_seed(), 42);
    assert_eq!(hash_bytes(b"payload"), HashEngine::with_seed(42).hash_bytes(b"payload"));

    assert_eq!(set_fixed_execution_seed(43), Err(Error::SeedAlreadyFixed));
    assert_eq!(execution_seed(), 42);
}
