//! # placestore - a geo-indexed place repository
//!
//! placestore stores points of interest ("places") as GeoJSON-shaped features in an
//! ordered key-value store and answers two kinds of query over them: everything inside a
//! bounding box, and everything matching some text.
//!
//! ## Features
//!
//! - **Geohash Indexing**: Places are indexed by the geohash of their representative point;
//!   box queries scan only the covering cells
//! - **Category Index**: "Parks near me" without a post-filter
//! - **Text Search**: Inverted token index over names, tags and categories
//! - **Consistent Indexes**: A place and all of its index entries are written in one atomic
//!   transaction, and stale entries are removed when a place changes
//! - **Bounded Transactions**: Bulk loads and erases commit in batches capped by place
//!   count and key operations
//! - **Persistent Storage**: Append-only log of committed batches with replay and compaction
//!
//! ## Quick Start
//!
//! ```rust
//! use placestore::{BoundingBox, Feature, PlaceRepository};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Create an in-memory repository
//! let repo = PlaceRepository::memory()?;
//!
//! // Save a place; id, timestamps and geohash are assigned
//! let place = repo.save(
//!     Feature::point(41.4036, 2.1744, "Sagrada Família")
//!         .with_category("culture")
//!         .with_tags(["gaudi", "church"]),
//! )?;
//! assert_eq!(place.geohash, "sp3e");
//!
//! // Bulk load in bounded transactions
//! let saved = repo.save_all(vec![
//!     Feature::point(41.4145, 2.1527, "Park Güell").with_category("park"),
//!     Feature::point(41.3851, 2.1734, "Plaça de Catalunya"),
//! ])?;
//! assert_eq!(saved, 2);
//!
//! // Bounding-box query
//! let barcelona = BoundingBox::new(41.3, 2.0, 41.5, 2.3);
//! let found = repo.find_in_bounds(&barcelona, 100)?;
//! assert!(found.is_complete());
//! assert_eq!(found.len(), 3);
//!
//! // Category query and text search
//! let parks = repo.find_by_category("park", &barcelona, 10)?;
//! assert_eq!(parks.len(), 1);
//! let gaudi = repo.search("gaudi", 10)?;
//! assert_eq!(gaudi[0].id, place.id);
//! # Ok(())
//! # }
//! ```
//!
//! ## Lines and Polygons
//!
//! ```rust
//! use placestore::{Feature, Geometry, PlaceRepository};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let repo = PlaceRepository::memory()?;
//!
//! // Positions are [lon, lat]; the place is indexed at the polygon's centroid
//! let park = Geometry::Polygon(vec![vec![
//!     vec![-73.9733, 40.7644],
//!     vec![-73.9500, 40.7644],
//!     vec![-73.9500, 40.7997],
//!     vec![-73.9733, 40.7997],
//!     vec![-73.9733, 40.7644],
//! ]]);
//! let saved = repo.save(Feature::new(park, "Central Park").with_category("park"))?;
//! let centre = saved.representative_point()?;
//! assert!((centre.lat - 40.782).abs() < 0.001);
//! # Ok(())
//! # }
//! ```
//!
//! ## Persistence
//!
//! ```rust
//! use placestore::{Feature, PlaceRepository};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let path = std::env::temp_dir().join("lib_doc_places.aof");
//! # let _ = std::fs::remove_file(&path);
//! {
//!     let repo = PlaceRepository::open(&path)?;
//!     repo.save(Feature::point(48.8584, 2.2945, "Eiffel Tower").with_id("eiffel"))?;
//!     repo.sync()?;
//! }
//!
//! // Reopening replays the log
//! let repo = PlaceRepository::open(&path)?;
//! assert!(repo.find_by_id("eiffel")?.is_some());
//! # drop(repo);
//! # std::fs::remove_file(path)?;
//! # Ok(())
//! # }
//! ```

pub mod batch;
pub mod builder;
pub mod db;
pub mod erase;
pub mod error;
pub mod geometry;
pub mod index;
pub mod keys;
#[cfg(feature = "aof")]
pub mod persistence;
pub mod ports;
pub mod query;
pub mod record;
pub mod search;
pub mod spatial;
pub mod storage;
pub mod text;
pub mod types;

// Re-export the repository and its builder
pub use builder::RepositoryBuilder;
pub use db::PlaceRepository;
pub use error::{PlaceError, Result};

// Re-export data types
pub use geometry::{Geometry, Position};
pub use record::{Feature, FeatureCollection, Properties, Record};
pub use spatial::{BoundingBox, Point};

// Re-export query results
pub use query::QueryResult;

// Re-export configuration and statistics types
pub use types::{Cancellation, Config, Coverage, PlaceStats, StoreStats, SyncPolicy};

// Re-export injected collaborators
pub use ports::{Clock, FixedClock, IdGenerator, SequentialIds, SystemClock, UlidGenerator};

// Re-export storage types for custom backends
pub use batch::{AtomicBatch, BatchOperation, CommitOutcome};
#[cfg(feature = "aof")]
pub use storage::AofStore;
pub use storage::{KvStore, MemoryStore, Versioned};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for common imports
pub mod prelude {
    pub use crate::{
        BoundingBox, Cancellation, Config, Feature, Geometry, PlaceError, PlaceRepository, Point,
        Record, Result,
    };
}
