use placestore::{BoundingBox, Cancellation, Config, Feature, FeatureCollection, PlaceRepository};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    println!("placestore - Getting Started Example");
    println!("====================================");

    // Open a repository persisted to an append-only log
    let path = std::env::temp_dir().join("placestore_getting_started.aof");
    let repo = PlaceRepository::open_with_config(&path, Config::default())?;
    println!("✓ Opened repository at {}", path.display());

    // Seed a few places only when the store is (nearly) empty
    let seed: FeatureCollection = serde_json::from_str(SEED)?;
    if repo.seed_if_sparse(seed.features, 3)? {
        println!("✓ Seeded sample places");
    } else {
        println!("✓ Repository already populated");
    }

    // Save one place on its own; re-running updates it in place
    let place = repo.save(
        Feature::point(41.4036, 2.1744, "Sagrada Família")
            .with_id("sagrada-familia")
            .with_category("culture")
            .with_tags(["gaudi", "basilica"]),
    )?;
    println!("✓ Saved {} at geohash {}", place.name(), place.geohash);

    // Bulk load with a deadline; commits happen in bounded batches
    let cafes = (0..60).map(|i| {
        Feature::point(
            41.38 + (i % 10) as f64 * 0.003,
            2.16 + (i / 10) as f64 * 0.003,
            format!("Cafe number {}", i),
        )
        .with_id(format!("cafe-{}", i))
        .with_category("gastronomy")
        .with_tags(["coffee"])
    });
    let saved = repo.save_all_with(cafes, &Cancellation::with_timeout(Duration::from_secs(10)))?;
    println!("✓ Bulk saved {} cafes", saved);

    // Bounding-box query
    let eixample = BoundingBox::new(41.37, 2.14, 41.42, 2.19);
    let found = repo.find_in_bounds(&eixample, 500)?;
    println!(
        "✓ Found {} places in the box (complete: {})",
        found.len(),
        found.is_complete()
    );

    // Category query and text search
    let culture = repo.find_by_category("culture", &eixample, 10)?;
    println!("✓ Found {} culture places", culture.len());
    for hit in repo.search("gaudi", 5)? {
        println!("  - {} {}", hit.name(), hit.to_feature_json()?["geometry"]);
    }

    let stats = repo.get_stats()?;
    println!("✓ {} places stored: {}", stats.total_places, serde_json::to_string(&stats)?);

    repo.sync()?;
    println!("\n🎉 Getting started example completed successfully!");
    Ok(())
}

const SEED: &str = r#"{
  "type": "FeatureCollection",
  "features": [
    {"type": "Feature", "id": "park-guell",
     "geometry": {"type": "Point", "coordinates": [2.1527, 41.4145]},
     "properties": {"name": "Park Güell", "category": "park", "tags": ["gaudi", "viewpoint"]}},
    {"type": "Feature", "id": "la-rambla",
     "geometry": {"type": "LineString", "coordinates": [[2.1700, 41.3870], [2.1753, 41.3766]]},
     "properties": {"name": "La Rambla", "category": "promenade"}},
    {"type": "Feature", "id": "ciutadella",
     "geometry": {"type": "Polygon", "coordinates": [[[2.183, 41.385], [2.192, 41.385], [2.192, 41.391], [2.183, 41.391], [2.183, 41.385]]]},
     "properties": {"name": "Parc de la Ciutadella", "category": "park", "opening_hours": "10:00-22:30"}}
  ]
}"#;
