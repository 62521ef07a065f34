#![cfg(test)]

// Property tests for DenseMap kept inside the crate so they can call the
// internal consistency checker after every operation.

use crate::dense_map::{DenseMap, Handle};
use crate::inline_storage::InlineStorage;
use crate::key_policy::{DefaultKeyPolicy, KeyPolicy};
use crate::storage::{HeapStorage, Storage};
use hashbrown::HashMap;
use proptest::prelude::*;
use proptest::test_runner::TestCaseError;
use std::collections::BTreeSet;

// Pool-indexed operations to improve shrinking: indices shrink to earlier keys,
// pool length shrinks, and op lists shrink in length.
#[derive(Clone, Debug)]
enum OpI {
    Insert(usize, i32),
    InsertOrAssign(usize, i32),
    InsertWith(usize, i32),
    Erase(usize),
    EraseAt(usize),
    Find(usize),
    Bump(usize, i32),
    Reserve(usize),
    Clear,
    ShrinkAndClear,
    Iterate,
}

fn arb_scenario() -> impl Strategy<Value = (Vec<String>, Vec<OpI>)> {
    proptest::collection::vec("[a-z]{0,5}", 1..=40).prop_flat_map(|pool| {
        let idx = 0..pool.len();
        let op = prop_oneof![
            6 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::Insert(i, v)),
            3 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertOrAssign(i, v)),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, v)| OpI::InsertWith(i, v)),
            4 => idx.clone().prop_map(OpI::Erase),
            2 => idx.clone().prop_map(OpI::EraseAt),
            3 => idx.clone().prop_map(OpI::Find),
            2 => (idx.clone(), any::<i32>()).prop_map(|(i, d)| OpI::Bump(i, d)),
            1 => (0usize..200).prop_map(OpI::Reserve),
            1 => Just(OpI::Clear),
            1 => Just(OpI::ShrinkAndClear),
            1 => Just(OpI::Iterate),
        ];
        proptest::collection::vec(op, 1..120).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Every key collides.
struct ConstPolicy;
impl KeyPolicy<String> for ConstPolicy {
    fn hash_of(_: &String) -> u64 {
        0
    }
    fn equals(a: &String, b: &String) -> bool {
        a == b
    }
}

// Drives one scenario against a hashbrown model. Invariants checked after
// every op:
// - bookkeeping matches the buckets and every live key is reachable;
// - `len`/`is_empty` parity with the model;
// - handles to erased entries never resolve again.
fn run_state_machine<P, S>(pool: &[String], ops: Vec<OpI>) -> Result<(), TestCaseError>
where
    P: KeyPolicy<String>,
    S: Storage<String, i32>,
{
    let mut sut: DenseMap<String, i32, P, S> = DenseMap::new();
    let mut model: HashMap<String, i32> = HashMap::new();
    let mut stale: Vec<Handle> = Vec::new();

    for op in ops {
        match op {
            OpI::Insert(i, v) => {
                let k = pool[i].clone();
                let already = model.contains_key(&k);
                let (h, inserted) = sut.insert(k.clone(), v);
                prop_assert_eq!(inserted, !already, "insert must not overwrite");
                model.entry(k).or_insert(v);
                prop_assert_eq!(h.value(&sut), model.get(&pool[i]));
            }
            OpI::InsertOrAssign(i, v) => {
                let k = pool[i].clone();
                let already = model.contains_key(&k);
                let (h, inserted) = sut.insert_or_assign(k.clone(), v);
                prop_assert_eq!(inserted, !already);
                model.insert(k, v);
                prop_assert_eq!(h.value(&sut), Some(&v));
            }
            OpI::InsertWith(i, v) => {
                let k = pool[i].clone();
                let already = model.contains_key(&k);
                let mut ran = false;
                let (_, inserted) = sut.insert_with(k.clone(), || {
                    ran = true;
                    v
                });
                prop_assert_eq!(inserted, !already);
                prop_assert_eq!(ran, !already, "constructor runs only on insert");
                model.entry(k).or_insert(v);
            }
            OpI::Erase(i) => {
                let k = &pool[i];
                let h = sut.find(k);
                prop_assert_eq!(sut.erase(k), model.remove(k).is_some());
                stale.extend(h);
            }
            OpI::EraseAt(i) => {
                let k = &pool[i];
                if let Some(h) = sut.find(k) {
                    prop_assert!(sut.erase_at(h));
                    prop_assert!(model.remove(k).is_some());
                    stale.push(h);
                } else {
                    prop_assert!(!model.contains_key(k));
                }
            }
            OpI::Find(i) => {
                let k = &pool[i];
                let h = sut.find(k);
                prop_assert_eq!(h.is_some(), model.contains_key(k));
                prop_assert_eq!(sut.count(k), usize::from(h.is_some()));
                if let Some(h) = h {
                    prop_assert_eq!(h.key(&sut), Some(k));
                    prop_assert_eq!(h.value(&sut), model.get(k));
                }
            }
            OpI::Bump(i, d) => {
                let k = &pool[i];
                if let Some(h) = sut.find(k) {
                    let vr = h.value_mut(&mut sut).expect("fresh handle resolves");
                    *vr = vr.wrapping_add(d);
                    let mv = model.get_mut(k).expect("present in model");
                    *mv = mv.wrapping_add(d);
                }
            }
            OpI::Reserve(n) => {
                let before = sut.capacity();
                sut.reserve(n);
                prop_assert!(sut.capacity() >= before, "reserve never shrinks");
            }
            OpI::Clear => {
                sut.clear();
                model.clear();
                prop_assert_eq!(sut.tombstones(), 0);
            }
            OpI::ShrinkAndClear => {
                sut.shrink_and_clear();
                model.clear();
            }
            OpI::Iterate => {
                let it = sut.iter();
                prop_assert_eq!(it.len(), model.len());
                let s: BTreeSet<(String, i32)> = it.map(|(k, v)| (k.clone(), *v)).collect();
                let m: BTreeSet<(String, i32)> =
                    model.iter().map(|(k, v)| (k.clone(), *v)).collect();
                prop_assert_eq!(s, m);
            }
        }

        sut.assert_consistent();
        for &h in &stale {
            prop_assert!(h.value(&sut).is_none(), "erased handle resolved");
        }
        prop_assert_eq!(sut.len(), model.len());
        prop_assert_eq!(sut.is_empty(), model.is_empty());
    }

    for (k, v) in &model {
        prop_assert_eq!(sut.get(k), Some(v));
    }
    Ok(())
}

// Property: state-machine equivalence against hashbrown::HashMap for the
// heap-backed map.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        run_state_machine::<DefaultKeyPolicy, HeapStorage<String, i32>>(&pool, ops)?;
    }
}

// Property: the same invariants for the hybrid map, whose small pool sizes
// cross the inline/heap boundary in both directions.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_inline((pool, ops) in arb_scenario()) {
        run_state_machine::<DefaultKeyPolicy, InlineStorage<String, i32, 4>>(&pool, ops)?;
    }
}

// Property: same invariants under worst-case collisions, which stresses
// equality probing, tombstone reuse and bounded probes.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_with_collisions((pool, ops) in arb_scenario()) {
        run_state_machine::<ConstPolicy, HeapStorage<String, i32>>(&pool, ops)?;
    }
}

// Property: full occupancy of a tiny inline table under collisions still
// answers misses and promotes on the insert that overflows it.
proptest! {
    #![proptest_config(ProptestConfig { cases: 64, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine_inline_collisions((pool, ops) in arb_scenario()) {
        run_state_machine::<ConstPolicy, InlineStorage<String, i32, 2>>(&pool, ops)?;
    }
}
