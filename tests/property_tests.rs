use placestore::RepositoryBuilder;
use placestore::prelude::*;
use placestore::spatial::{covering_cells, decode_bounds, encode};
use proptest::prelude::*;
use proptest::test_runner::Config as PropConfig;

const PRECISION: usize = 4;
const UNCAPPED: usize = usize::MAX;

fn latitude() -> impl Strategy<Value = f64> {
    -89.0f64..89.0
}

fn longitude() -> impl Strategy<Value = f64> {
    -179.0f64..179.0
}

/// A box of at most a few degrees, anchored at a random corner
fn small_box() -> impl Strategy<Value = BoundingBox> {
    (latitude(), longitude(), 0.01f64..2.0, 0.01f64..2.0).prop_map(|(lat, lon, h, w)| {
        BoundingBox::new(lat, lon, (lat + h).min(90.0), (lon + w).min(180.0))
    })
}

proptest! {
    #[test]
    fn encode_is_deterministic(lat in latitude(), lon in longitude(), precision in 1usize..=12) {
        let a = encode(lat, lon, precision).unwrap();
        let b = encode(lat, lon, precision).unwrap();
        prop_assert_eq!(&a, &b);
        prop_assert_eq!(a.len(), precision);
    }

    #[test]
    fn covering_contains_the_enclosed_cell(lat in latitude(), lon in longitude()) {
        let hash = encode(lat, lon, PRECISION).unwrap();
        let cell = decode_bounds(&hash).unwrap();

        let covering = covering_cells(&cell, PRECISION, UNCAPPED).unwrap();
        prop_assert!(covering.cells.contains(&hash));
        // Edge-adjacent cells may be included, nothing further away
        prop_assert!(covering.cells.len() <= 9);
        prop_assert!(!covering.is_truncated());
    }

    #[test]
    fn covering_cells_intersect_the_box(bbox in small_box()) {
        let covering = covering_cells(&bbox, PRECISION, UNCAPPED).unwrap();
        prop_assert_eq!(covering.cells.len() as u64, covering.total);

        let mut unique = covering.cells.clone();
        unique.sort();
        unique.dedup();
        prop_assert_eq!(unique.len(), covering.cells.len());

        for hash in &covering.cells {
            prop_assert!(decode_bounds(hash).unwrap().intersects(&bbox), "{} outside {:?}", hash, bbox);
        }
    }

    #[test]
    fn every_point_in_the_box_has_its_cell_covered(
        bbox in small_box(),
        fx in 0.0f64..=1.0,
        fy in 0.0f64..=1.0,
    ) {
        let lat = bbox.min_lat + (bbox.max_lat - bbox.min_lat) * fy;
        let lon = bbox.min_lon + (bbox.max_lon - bbox.min_lon) * fx;
        let covering = covering_cells(&bbox, PRECISION, UNCAPPED).unwrap();
        prop_assert!(covering.cells.contains(&encode(lat, lon, PRECISION).unwrap()));
    }
}

proptest! {
    #![proptest_config(PropConfig::with_cases(32))]

    #[test]
    fn saved_places_inside_a_box_are_found(
        bbox in small_box(),
        offsets in prop::collection::vec((0.0f64..=1.0, 0.0f64..=1.0), 1..20),
    ) {
        let repo = RepositoryBuilder::new()
            .config(Config::default().with_max_covering_cells(10_000))
            .build()
            .unwrap();

        let mut expected = Vec::new();
        for (i, (fx, fy)) in offsets.iter().enumerate() {
            let lat = bbox.min_lat + (bbox.max_lat - bbox.min_lat) * fy;
            let lon = bbox.min_lon + (bbox.max_lon - bbox.min_lon) * fx;
            let saved = repo.save(Feature::point(lat, lon, format!("Point of interest {}", i))).unwrap();
            expected.push(saved.id);
        }

        let found = repo.find_in_bounds(&bbox, 1_000).unwrap();
        prop_assert!(found.is_complete());
        for id in &expected {
            prop_assert!(found.ids().any(|found_id| found_id == id.as_str()), "missing {}", id);
        }
    }
}
