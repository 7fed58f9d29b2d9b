// Property-based tests for the position map, in the spirit of the
// random-generation buffer tests: random notebooks, structural
// invariants that must hold for every one of them.

mod common;

use common::{cell, test_builder, test_config};
use cellbridge::vdoc::CellSnapshot;
use lsp_types::Position;
use proptest::prelude::*;

fn notebook(texts: &[String]) -> Vec<CellSnapshot> {
    texts
        .iter()
        .enumerate()
        .map(|(i, t)| cell(i, "python", t))
        .collect()
}

proptest! {
    // Every virtual line resolves to exactly one source region (or
    // padding), and translating back lands on the same virtual
    // position.
    #[test]
    fn round_trip_identity(texts in prop::collection::vec("[a-z0-9 =\\n]{0,40}", 1..6)) {
        let config = test_config();
        let builder = test_builder(&config);
        let regions = builder.split_cells(&notebook(&texts));
        let doc = builder.build("nb", "python", &regions, 1).unwrap();

        prop_assert!(doc.map().is_consistent());
        for line in 0..doc.map().total_lines() {
            let pos = Position { line, character: 3 };
            if let Some(src) = doc.map().to_source(pos) {
                prop_assert_eq!(doc.map().to_virtual(&src), Some(pos));
            }
        }
    }

    // Rebuilding from identical regions yields identical text and map.
    #[test]
    fn rebuild_is_deterministic(texts in prop::collection::vec("[a-z0-9 =\\n]{0,40}", 1..6)) {
        let config = test_config();
        let builder = test_builder(&config);
        let regions = builder.split_cells(&notebook(&texts));
        let one = builder.build("nb", "python", &regions, 1).unwrap();
        let two = builder.build("nb", "python", &regions, 1).unwrap();
        prop_assert_eq!(one.text(), two.text());
        prop_assert_eq!(one.map(), two.map());
    }

    // An edit inside one region leaves every earlier entry untouched
    // and keeps the map gap-free.
    #[test]
    fn edit_touches_only_later_entries(
        (texts, edited) in prop::collection::vec("[a-z0-9 \\n]{1,30}", 2..6)
            .prop_flat_map(|v| {
                let len = v.len();
                (Just(v), 0..len)
            })
    ) {
        let config = test_config();
        let builder = test_builder(&config);
        let regions = builder.split_cells(&notebook(&texts));
        let mut doc = builder.build("nb", "python", &regions, 1).unwrap();

        let target = regions[edited].id;
        let before: Vec<_> = doc.map().entries().to_vec();
        let edited_entry_idx = doc
            .map()
            .entries()
            .iter()
            .position(|e| e.source.map(|s| s.region) == Some(target))
            .unwrap();

        let new_text = format!("{}z\n", texts[edited]);
        doc.apply_region_edit(target, &new_text).unwrap();

        prop_assert!(doc.map().is_consistent());
        for (idx, entry) in doc.map().entries().iter().enumerate() {
            if idx < edited_entry_idx {
                prop_assert_eq!(*entry, before[idx]);
            }
        }
    }
}
