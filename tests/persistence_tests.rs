#![cfg(feature = "aof")]

use placestore::prelude::*;
use placestore::{AofStore, KvStore, RepositoryBuilder, SyncPolicy};
use std::fs::OpenOptions;
use tempfile::TempDir;

fn barcelona() -> BoundingBox {
    BoundingBox::new(41.0, 2.0, 41.5, 2.5)
}

#[test]
fn test_places_survive_reopen() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("places.aof");

    {
        let repo = PlaceRepository::open(&db_path).unwrap();
        repo.save_all((0..40).map(|i| {
            Feature::point(41.38 + i as f64 * 0.001, 2.17, format!("Tapas bar {}", i))
                .with_id(format!("tapas-{}", i))
                .with_category("gastronomy")
        }))
        .unwrap();
        repo.save(Feature::point(41.40, 2.17, "Moved bar").with_id("tapas-0"))
            .unwrap();
        repo.sync().unwrap();
    }

    let repo = PlaceRepository::open(&db_path).unwrap();
    assert_eq!(repo.count().unwrap(), 40);
    assert_eq!(repo.find_by_id("tapas-0").unwrap().unwrap().name(), "Moved bar");
    assert_eq!(repo.find_in_bounds(&barcelona(), 100).unwrap().len(), 40);
    assert_eq!(repo.search("tapas", 100).unwrap().len(), 39);
    assert_eq!(repo.get_stats().unwrap().by_category["gastronomy"], 39);
}

#[test]
fn test_torn_tail_drops_only_the_last_transaction() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("torn.aof");

    let intact_len = {
        let repo = PlaceRepository::open(&db_path).unwrap();
        repo.save(Feature::point(41.40, 2.17, "First").with_id("first"))
            .unwrap();
        let intact_len = repo.store_stats().unwrap().log_size;
        repo.save(Feature::point(41.41, 2.18, "Second").with_id("second"))
            .unwrap();
        intact_len
    };

    // Crash in the middle of writing the second transaction
    let file = OpenOptions::new().write(true).open(&db_path).unwrap();
    let full_len = file.metadata().unwrap().len();
    assert!(full_len > intact_len);
    file.set_len(full_len - 3).unwrap();
    drop(file);

    let repo = PlaceRepository::open(&db_path).unwrap();
    assert!(repo.find_by_id("first").unwrap().is_some());
    assert!(repo.find_by_id("second").unwrap().is_none());
    // No half-indexed place: the second place's index entries are gone too
    assert!(repo.search("second", 10).unwrap().is_empty());
    assert_eq!(repo.find_in_bounds(&barcelona(), 10).unwrap().len(), 1);
    assert_eq!(repo.store_stats().unwrap().log_size, intact_len);
}

#[test]
fn test_log_is_compacted() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("compact.aof");
    let config = Config::default().with_rewrite_size_threshold(4 * 1024);

    let single_frame = {
        let repo = PlaceRepository::open_with_config(&db_path, config.clone()).unwrap();
        repo.save(Feature::point(41.40, 2.17, "Food truck").with_id("truck"))
            .unwrap();
        let single_frame = repo.store_stats().unwrap().log_size;

        for i in 0..300 {
            let lon = 2.0 + (i % 50) as f64 * 0.01;
            repo.save(Feature::point(41.40, lon, "Food truck").with_id("truck"))
                .unwrap();
        }

        let log_size = repo.store_stats().unwrap().log_size;
        assert!(
            log_size < 300 * single_frame / 4,
            "log was not compacted: {} bytes",
            log_size
        );
        single_frame
    };
    assert!(single_frame > 0);

    let repo = PlaceRepository::open_with_config(&db_path, config).unwrap();
    assert_eq!(repo.count().unwrap(), 1);
    let truck = repo.find_by_id("truck").unwrap().unwrap();
    assert!((truck.representative_point().unwrap().lon - 2.49).abs() < 1e-9);
    // primary, spatial, and one search entry each for "food" and "truck"
    assert_eq!(repo.store_stats().unwrap().key_count, 4);
}

#[test]
fn test_erase_is_persisted() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("erase.aof");

    {
        let repo = PlaceRepository::open(&db_path).unwrap();
        repo.save_all((0..10).map(|i| Feature::point(41.4, 2.1 + i as f64 * 0.01, format!("Kiosk {}", i))))
            .unwrap();
        repo.remove_all().unwrap();
    }

    let repo = PlaceRepository::open(&db_path).unwrap();
    assert!(repo.is_empty().unwrap());
    assert_eq!(repo.store_stats().unwrap().key_count, 0);
}

#[test]
fn test_closed_store_refuses_operations() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("closed.aof");
    let config = Config::default().with_sync_policy(SyncPolicy::Always);

    let store = AofStore::open(&db_path, &config).unwrap();
    let repo = RepositoryBuilder::new()
        .store(store.clone())
        .config(config)
        .build()
        .unwrap();
    repo.save(Feature::point(1.0, 1.0, "Lighthouse")).unwrap();

    store.close().unwrap();
    assert!(matches!(
        repo.save(Feature::point(1.0, 1.0, "Too late")),
        Err(PlaceError::DatabaseClosed)
    ));
    assert!(matches!(store.sync(), Err(PlaceError::DatabaseClosed)));
}

#[test]
fn test_failed_compaction_keeps_commits() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("places.aof");
    // A directory in the way makes every compaction fail
    std::fs::create_dir(temp_dir.path().join("places.aof.rewrite")).unwrap();
    let config = Config::default().with_rewrite_size_threshold(1);

    {
        let repo = PlaceRepository::open_with_config(&db_path, config.clone()).unwrap();
        let saved = repo
            .save(Feature::point(41.40, 2.17, "Gelateria").with_id("g"))
            .unwrap();
        assert_eq!(saved.id, "g");
        assert!(repo.find_by_id("g").unwrap().is_some());

        let features = (0..3).map(|i| {
            Feature::point(41.39, 2.16 + i as f64 * 0.01, format!("Churreria {}", i))
                .with_id(format!("churro-{}", i))
        });
        assert_eq!(repo.save_all(features).unwrap(), 3);
        assert_eq!(repo.count().unwrap(), 4);
    }

    // The uncompacted log still replays every committed batch
    let repo = PlaceRepository::open_with_config(&db_path, config).unwrap();
    assert_eq!(repo.count().unwrap(), 4);
    assert_eq!(repo.search("churreria", 10).unwrap().len(), 3);
}
