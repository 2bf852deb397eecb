//! Property tests for layer merging.
//!
//! Random layer stacks are merged by the store and by a `BTreeMap` model in
//! which later layers simply overwrite earlier ones.

use std::collections::BTreeMap;

use proptest::prelude::*;
use serde_json::json;
use tessera_config::prelude::*;

/// (id index, hp) pairs; ids are drawn from a small pool to force overlap.
fn layer_strategy() -> impl Strategy<Value = Vec<(u8, i64)>> {
    prop::collection::vec((0u8..8, -100i64..100), 0..10)
}

fn to_layer(name: &str, entries: &[(u8, i64)]) -> Layer {
    let values = entries
        .iter()
        .map(|(id, hp)| json!({"id": format!("r{id}"), "hp": hp}))
        .collect();
    Layer::values(name, values)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn merge_matches_last_writer_wins_model(
        base in layer_strategy(),
        overrides in prop::collection::vec(layer_strategy(), 0..5),
    ) {
        let base_layer = to_layer("base", &base);
        let override_layers: Vec<Layer> = overrides
            .iter()
            .enumerate()
            .map(|(i, entries)| to_layer(&format!("{i:02}"), entries))
            .collect();

        let mut model: BTreeMap<String, (i64, String)> = BTreeMap::new();
        for (id, hp) in &base {
            model.insert(format!("r{id}"), (*hp, "base".to_owned()));
        }
        for (i, layer) in overrides.iter().enumerate() {
            for (id, hp) in layer {
                model.insert(format!("r{id}"), (*hp, format!("{i:02}")));
            }
        }

        let mut store = ConfigurationStore::new();
        store.load(&base_layer, &override_layers).unwrap();

        prop_assert_eq!(store.len(), model.len());
        for (id, (hp, layer)) in &model {
            let record = store.require(id).unwrap();
            prop_assert_eq!(record.get_i64("hp"), Some(*hp));
            prop_assert_eq!(record.layer(), layer.as_str());
        }
    }

    #[test]
    fn loading_twice_gives_the_same_fingerprint(
        base in layer_strategy(),
        overrides in prop::collection::vec(layer_strategy(), 0..4),
    ) {
        let base_layer = to_layer("base", &base);
        let override_layers: Vec<Layer> = overrides
            .iter()
            .enumerate()
            .map(|(i, entries)| to_layer(&format!("{i:02}"), entries))
            .collect();

        let mut first = ConfigurationStore::new();
        first.load(&base_layer, &override_layers).unwrap();
        let mut second = ConfigurationStore::new();
        second.load(&base_layer, &override_layers).unwrap();
        second.load(&base_layer, &override_layers).unwrap();

        prop_assert_eq!(first.fingerprint(), second.fingerprint());
    }
}
