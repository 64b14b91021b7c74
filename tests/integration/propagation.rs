use std::collections::HashMap;
use std::fs;
use std::sync::Arc;

use proptest::prelude::*;
use trellis::{
    EdgeStatus, GraphConfig, GraphStore, JsonSource, MemoryStore, Num, ScalarValue, SortKey,
    TypeDictionary, Uid,
};

fn dict_json() -> &'static str {
    r#"[
        {"ty":"Person","ty_short":"Pn","attr":"siblings","dtype":"Nd","short":"S","partition":"A#G#","propagate":true,"target_ty":"Person"},
        {"ty":"Person","ty_short":"Pn","attr":"age","dtype":"I","short":"A","partition":"A#A#","nullable":true,"propagate":true},
        {"ty":"Person","ty_short":"Pn","attr":"name","dtype":"S","short":"N","partition":"A#A#","propagate":true},
        {"ty":"Person","ty_short":"Pn","attr":"active","dtype":"Bl","short":"AC","partition":"A#A#","nullable":true,"propagate":true},
        {"ty":"Person","ty_short":"Pn","attr":"avatar","dtype":"B","short":"AV","partition":"A#A#","nullable":true,"propagate":true},
        {"ty":"Person","ty_short":"Pn","attr":"born","dtype":"DT","short":"D","partition":"A#A#","nullable":true,"propagate":true},
        {"ty":"Person","ty_short":"Pn","attr":"height","dtype":"F","short":"H","partition":"A#A#","nullable":true,"propagate":true}
    ]"#
}

fn load_dict() -> Arc<TypeDictionary> {
    Arc::new(TypeDictionary::load(&JsonSource(dict_json().to_owned())).unwrap())
}

fn graph(cfg: GraphConfig) -> GraphStore {
    GraphStore::new(Arc::new(MemoryStore::new()), load_dict(), cfg)
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();
}

#[test]
fn scenario_two_embedded_then_overflow() {
    init_tracing();
    let g = graph(
        GraphConfig::default()
            .embedded_child_nodes(2)
            .ovfl_blocks_grow_by(1),
    );
    let siblings = g.dict().attr("Person", "siblings").unwrap().clone();
    let age = g.dict().attr("Person", "age").unwrap().clone();
    let parent = Uid::new();
    let (c1, c2, c3) = (Uid::new(), Uid::new(), Uid::new());
    let sortk = SortKey::new("A#G#:S");

    let t1 = g.attach(&siblings, parent, &sortk, c1).unwrap();
    assert!(t1.is_embedded());
    g.propagate_child_data(&age, parent, &sortk, &t1, Some(ScalarValue::Int(30)))
        .unwrap();

    let t2 = g.attach(&siblings, parent, &sortk, c2).unwrap();
    assert!(t2.is_embedded());
    g.propagate_child_data(&age, parent, &sortk, &t2, None)
        .unwrap();

    let t3 = g.attach(&siblings, parent, &sortk, c3).unwrap();
    assert!(!t3.is_embedded());
    assert_eq!(t3.seq, 1);
    g.propagate_child_data(&age, parent, &sortk, &t3, Some(ScalarValue::Int(40)))
        .unwrap();

    // Parent predicate item: two embedded children plus one block pointer.
    let parent_item = g.fetch_data_item(parent, &sortk).unwrap().unwrap();
    assert_eq!(parent_item.cnt(), 2);
    let view = parent_item.edges().unwrap();
    assert_eq!(
        view.children,
        vec![(c1, EdgeStatus::ChildUid), (c2, EdgeStatus::ChildUid)]
    );
    assert_eq!(view.pointers, vec![(t3.uid, EdgeStatus::OvflBlockUid)]);

    // Parent scalar item: ages aligned with the embedded children, the
    // absent age as a null-marked zero.
    let ages_item = g.fetch_data_item(parent, &sortk.scalar("A")).unwrap().unwrap();
    let (values, nulls) = ages_item.numbers().unwrap();
    assert_eq!(values, &[Num::Int(30), Num::Int(0)]);
    assert_eq!(nulls, &[false, true]);

    // Overflow item: one child with its age, back-pointer to the parent.
    let ovfl = g.fetch_data_item(t3.uid, &sortk).unwrap().unwrap();
    assert_eq!(ovfl.cnt(), 1);
    assert_eq!(ovfl.edges().unwrap().children, vec![(c3, EdgeStatus::ChildUid)]);
    assert_eq!(ovfl.parent(), Some(parent));
    let ovfl_ages = g
        .fetch_data_item(t3.uid, &sortk.scalar("A"))
        .unwrap()
        .unwrap();
    let (values, nulls) = ovfl_ages.numbers().unwrap();
    assert_eq!(values, &[Num::Int(40)]);
    assert_eq!(nulls, &[false]);

    // The index lists exactly one overflow block with one reserved slot.
    let index = g.fetch_overflow_index(parent, &sortk).unwrap().unwrap();
    assert_eq!(index.blocks().len(), 1);
    assert_eq!(index.blocks()[0].uid, t3.uid);
    assert_eq!(index.blocks()[0].occ, 1);
    assert_eq!(index.blocks()[0].seq, 1);
}

#[test]
fn null_round_trip() {
    let g = graph(GraphConfig::default());
    let siblings = g.dict().attr("Person", "siblings").unwrap().clone();
    let age = g.dict().attr("Person", "age").unwrap().clone();
    let parent = Uid::new();
    let sortk = SortKey::new("A#G#:S");

    let t = g.attach(&siblings, parent, &sortk, Uid::new()).unwrap();
    g.propagate_child_data(&age, parent, &sortk, &t, None)
        .unwrap();
    let t = g.attach(&siblings, parent, &sortk, Uid::new()).unwrap();
    g.propagate_child_data(&age, parent, &sortk, &t, Some(ScalarValue::Int(52)))
        .unwrap();

    let item = g.fetch_data_item(parent, &sortk.scalar("A")).unwrap().unwrap();
    let (values, nulls) = item.numbers().unwrap();
    assert_eq!(values, &[Num::Int(0), Num::Int(52)]);
    assert_eq!(nulls, &[true, false]);
}

#[test]
fn read_after_write_returns_attached_child() {
    let g = graph(GraphConfig::default());
    let siblings = g.dict().attr("Person", "siblings").unwrap().clone();
    let parent = Uid::new();
    let child = Uid::new();
    let sortk = SortKey::new("A#G#:S");

    g.attach(&siblings, parent, &sortk, child).unwrap();
    let children = g.edge_children(parent, &sortk).unwrap();
    assert_eq!(children, vec![(child, EdgeStatus::ChildUid)]);
}

#[test]
fn scalar_kinds_route_to_their_lists() {
    let g = graph(GraphConfig::default());
    let siblings = g.dict().attr("Person", "siblings").unwrap().clone();
    let parent = Uid::new();
    let sortk = SortKey::new("A#G#:S");
    let t = g.attach(&siblings, parent, &sortk, Uid::new()).unwrap();

    let name = g.dict().attr("Person", "name").unwrap().clone();
    g.propagate_child_data(&name, parent, &sortk, &t, Some(ScalarValue::Str("fred".into())))
        .unwrap();
    let item = g.fetch_data_item(parent, &sortk.scalar("N")).unwrap().unwrap();
    let (values, nulls) = item.strings().unwrap();
    assert_eq!(values, &["fred".to_owned()]);
    assert_eq!(nulls, &[false]);

    let active = g.dict().attr("Person", "active").unwrap().clone();
    g.propagate_child_data(&active, parent, &sortk, &t, Some(ScalarValue::Bool(true)))
        .unwrap();
    let item = g.fetch_data_item(parent, &sortk.scalar("AC")).unwrap().unwrap();
    let (values, nulls) = item.booleans().unwrap();
    assert_eq!(values, &[true]);
    assert_eq!(nulls, &[false]);

    let avatar = g.dict().attr("Person", "avatar").unwrap().clone();
    g.propagate_child_data(
        &avatar,
        parent,
        &sortk,
        &t,
        Some(ScalarValue::Bytes(vec![0xDE, 0xAD])),
    )
    .unwrap();
    let item = g.fetch_data_item(parent, &sortk.scalar("AV")).unwrap().unwrap();
    let (values, nulls) = item.binaries().unwrap();
    assert_eq!(values, &[vec![0xDE, 0xAD]]);
    assert_eq!(nulls, &[false]);

    let born = g.dict().attr("Person", "born").unwrap().clone();
    g.propagate_child_data(
        &born,
        parent,
        &sortk,
        &t,
        Some(ScalarValue::DateTime("1990-04-01T00:00:00Z".into())),
    )
    .unwrap();
    let item = g.fetch_data_item(parent, &sortk.scalar("D")).unwrap().unwrap();
    let (values, nulls) = item.strings().unwrap();
    assert_eq!(values, &["1990-04-01T00:00:00Z".to_owned()]);
    assert_eq!(nulls, &[false]);

    let height = g.dict().attr("Person", "height").unwrap().clone();
    g.propagate_child_data(&height, parent, &sortk, &t, Some(ScalarValue::Float(1.82)))
        .unwrap();
    let item = g.fetch_data_item(parent, &sortk.scalar("H")).unwrap().unwrap();
    let (values, nulls) = item.numbers().unwrap();
    assert_eq!(values, &[Num::Float(1.82)]);
    assert_eq!(nulls, &[false]);
}

#[test]
fn dictionary_loads_from_json_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("dict.json");
    fs::write(&path, dict_json()).unwrap();

    let text = fs::read_to_string(&path).unwrap();
    let dict = TypeDictionary::load(&JsonSource(text)).unwrap();
    assert_eq!(dict.type_short("Person"), Some("Pn"));
    assert_eq!(dict.type_long("Pn"), Some("Person"));
    assert!(dict.attr("Person", "siblings").is_ok());
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    // After any sequence of propagations, every item pair stays positionally
    // aligned and every child's age (or null marker) reads back from the
    // slot its edge occupies.
    #[test]
    fn alignment_invariant_over_random_sequences(
        ages in proptest::collection::vec(proptest::option::of(0i64..100i64), 1..25)
    ) {
        let g = graph(
            GraphConfig::default()
                .embedded_child_nodes(3)
                .ovfw_batch_limit(4)
                .max_ovfl_blocks(2)
                .ovfl_blocks_grow_by(1),
        );
        let siblings = g.dict().attr("Person", "siblings").unwrap().clone();
        let age = g.dict().attr("Person", "age").unwrap().clone();
        let parent = Uid::new();
        let sortk = SortKey::new("A#G#:S");

        let mut expected: HashMap<Uid, Option<i64>> = HashMap::new();
        for value in &ages {
            let child = Uid::new();
            let target = g.attach(&siblings, parent, &sortk, child).unwrap();
            g.propagate_child_data(&age, parent, &sortk, &target, value.map(ScalarValue::Int))
                .unwrap();
            expected.insert(child, *value);
        }

        let mut pairs: Vec<(Uid, u32)> = vec![(parent, 1)];
        if let Some(index) = g.fetch_overflow_index(parent, &sortk).unwrap() {
            prop_assert!(index.blocks().len() <= 2);
            for slot in index.blocks() {
                for seq in 1..=slot.seq {
                    pairs.push((slot.uid, seq as u32));
                }
            }
        }

        let mut seen = 0usize;
        for (owner, seq) in pairs {
            let Some(edge_item) = g.fetch_data_item(owner, &sortk.with_seq(seq)).unwrap() else {
                continue;
            };
            edge_item.validate_alignment().unwrap();
            let children = edge_item.edges().unwrap().children;

            let scalar_item = g
                .fetch_data_item(owner, &sortk.scalar("A").with_seq(seq))
                .unwrap();
            let (values, nulls) = match &scalar_item {
                Some(item) => item.numbers().unwrap(),
                None => (&[][..], &[][..]),
            };
            prop_assert_eq!(children.len(), values.len());
            prop_assert_eq!(values.len(), nulls.len());

            for ((child, status), (value, is_null)) in
                children.iter().zip(values.iter().zip(nulls))
            {
                prop_assert_eq!(*status, EdgeStatus::ChildUid);
                prop_assert!(expected.contains_key(child));
                match expected[child] {
                    Some(a) => {
                        prop_assert_eq!(*value, Num::Int(a));
                        prop_assert!(!*is_null);
                    }
                    None => {
                        prop_assert_eq!(*value, Num::Int(0));
                        prop_assert!(*is_null);
                    }
                }
                seen += 1;
            }
        }
        prop_assert_eq!(seen, ages.len());

        let parent_item = g.fetch_data_item(parent, &sortk).unwrap().unwrap();
        prop_assert!(parent_item.cnt() <= 3);
    }
}
