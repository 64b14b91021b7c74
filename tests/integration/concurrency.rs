use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use trellis::{
    EdgeStatus, GraphConfig, GraphStore, JsonSource, MemoryStore, Num, ScalarValue, SortKey,
    TypeDictionary, Uid,
};

fn dict_json() -> &'static str {
    r#"[
        {"ty":"Person","ty_short":"Pn","attr":"siblings","dtype":"Nd","short":"S","partition":"A#G#","propagate":true,"target_ty":"Person"},
        {"ty":"Person","ty_short":"Pn","attr":"age","dtype":"I","short":"A","partition":"A#A#","nullable":true,"propagate":true}
    ]"#
}

fn graph(cfg: GraphConfig) -> GraphStore {
    let dict = Arc::new(TypeDictionary::load(&JsonSource(dict_json().to_owned())).unwrap());
    GraphStore::new(Arc::new(MemoryStore::new()), dict, cfg)
}

/// Many writers race one parent predicate. Per-item list alignment, the
/// embedded and batch capacity bounds, and the pool ceiling must all hold;
/// every child must land exactly once with its age in the same item pair as
/// its edge.
#[test]
fn concurrent_attaches_preserve_alignment_and_bounds() {
    const THREADS: usize = 4;
    const PER_THREAD: usize = 25;
    const EMBEDDED: usize = 10;
    const BATCH: usize = 50;
    const MAX_BLOCKS: usize = 4;

    let g = Arc::new(graph(
        GraphConfig::default()
            .embedded_child_nodes(EMBEDDED)
            .ovfw_batch_limit(BATCH)
            .max_ovfl_blocks(MAX_BLOCKS)
            .ovfl_blocks_grow_by(2),
    ));
    let siblings = g.dict().attr("Person", "siblings").unwrap().clone();
    let age = g.dict().attr("Person", "age").unwrap().clone();
    let parent = Uid::new();
    let sortk = SortKey::new("A#G#:S");

    let mut handles = Vec::new();
    for t in 0..THREADS {
        let g = Arc::clone(&g);
        let siblings = siblings.clone();
        let age = age.clone();
        let sortk = sortk.clone();
        handles.push(thread::spawn(move || {
            let mut mine = Vec::with_capacity(PER_THREAD);
            for i in 0..PER_THREAD {
                let child = Uid::new();
                let years = (t * PER_THREAD + i) as i64;
                let target = g.attach(&siblings, parent, &sortk, child).unwrap();
                g.propagate_child_data(
                    &age,
                    parent,
                    &sortk,
                    &target,
                    Some(ScalarValue::Int(years)),
                )
                .unwrap();
                mine.push((child, years));
            }
            mine
        }));
    }

    let mut ages: HashMap<Uid, i64> = HashMap::new();
    for handle in handles {
        for (child, years) in handle.join().unwrap() {
            assert!(ages.insert(child, years).is_none());
        }
    }
    assert_eq!(ages.len(), THREADS * PER_THREAD);

    // Every child landed exactly once.
    let mut got: Vec<Uid> = g
        .edge_children(parent, &sortk)
        .unwrap()
        .into_iter()
        .map(|(uid, status)| {
            assert_eq!(status, EdgeStatus::ChildUid);
            uid
        })
        .collect();
    got.sort();
    let mut expected: Vec<Uid> = ages.keys().copied().collect();
    expected.sort();
    assert_eq!(got, expected);

    // The embedded bound held under the race.
    let parent_item = g.fetch_data_item(parent, &sortk).unwrap().unwrap();
    parent_item.validate_alignment().unwrap();
    assert!(parent_item.cnt() <= EMBEDDED as i64);
    assert!(parent_item.edges().unwrap().children.len() <= EMBEDDED);

    let index = g.fetch_overflow_index(parent, &sortk).unwrap().unwrap();
    assert!(index.blocks().len() <= MAX_BLOCKS);
    // One pointer slot per allocated block, no duplicates.
    assert_eq!(
        parent_item.edges().unwrap().pointers.len(),
        index.blocks().len()
    );

    // Per item pair: alignment holds and the ages multiset matches the
    // children that landed there. Concurrent edge and scalar appends may
    // interleave differently, so positions are compared as multisets.
    let mut pairs: Vec<(Uid, u32)> = vec![(parent, 1)];
    for slot in index.blocks() {
        for seq in 1..=slot.seq {
            pairs.push((slot.uid, seq as u32));
        }
    }
    let mut total = 0usize;
    for (owner, seq) in pairs {
        let Some(edge_item) = g.fetch_data_item(owner, &sortk.with_seq(seq)).unwrap() else {
            continue;
        };
        edge_item.validate_alignment().unwrap();
        let children = edge_item.edges().unwrap().children;
        if owner != parent {
            assert!(children.len() <= BATCH);
            assert_eq!(edge_item.parent(), Some(parent));
        }

        let scalar_item = g
            .fetch_data_item(owner, &sortk.scalar("A").with_seq(seq))
            .unwrap();
        let (values, nulls) = match &scalar_item {
            Some(item) => item.numbers().unwrap(),
            None => (&[][..], &[][..]),
        };
        assert_eq!(children.len(), values.len());
        assert!(nulls.iter().all(|null| !*null));

        let mut expected_ages: Vec<i64> = children.iter().map(|(uid, _)| ages[uid]).collect();
        let mut actual_ages: Vec<i64> = values
            .iter()
            .map(|v| match v {
                Num::Int(a) => *a,
                Num::Float(_) => panic!("age list holds a float"),
            })
            .collect();
        expected_ages.sort();
        actual_ages.sort();
        assert_eq!(actual_ages, expected_ages);
        total += children.len();
    }
    assert_eq!(total, THREADS * PER_THREAD);
}

/// Writers racing the first overflow transition must produce exactly one
/// index item and register each allocated block exactly once.
#[test]
fn index_creation_race_produces_one_pool() {
    const THREADS: usize = 8;

    let g = Arc::new(graph(
        GraphConfig::default()
            .embedded_child_nodes(1)
            .ovfw_batch_limit(100)
            .max_ovfl_blocks(4)
            .ovfl_blocks_grow_by(2),
    ));
    let siblings = g.dict().attr("Person", "siblings").unwrap().clone();
    let parent = Uid::new();
    let sortk = SortKey::new("A#G#:S");

    // Fill the single embedded slot first so every racer takes the
    // overflow path.
    g.attach(&siblings, parent, &sortk, Uid::new()).unwrap();

    let mut handles = Vec::new();
    for _ in 0..THREADS {
        let g = Arc::clone(&g);
        let siblings = siblings.clone();
        let sortk = sortk.clone();
        handles.push(thread::spawn(move || {
            g.attach(&siblings, parent, &sortk, Uid::new()).unwrap()
        }));
    }
    for handle in handles {
        let target = handle.join().unwrap();
        assert!(!target.is_embedded());
    }

    let index = g.fetch_overflow_index(parent, &sortk).unwrap().unwrap();
    assert!(index.blocks().len() <= 4);

    let parent_item = g.fetch_data_item(parent, &sortk).unwrap().unwrap();
    let pointers = parent_item.edges().unwrap().pointers;
    assert_eq!(pointers.len(), index.blocks().len());
    let mut seen: Vec<Uid> = pointers.iter().map(|(uid, _)| *uid).collect();
    seen.sort();
    seen.dedup();
    assert_eq!(seen.len(), pointers.len(), "duplicate block registration");

    assert_eq!(g.edge_children(parent, &sortk).unwrap().len(), 1 + THREADS);
}
