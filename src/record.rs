//! Places as they arrive (`Feature`) and as they are stored (`Record`)

use crate::error::{PlaceError, Result};
use crate::geometry::Geometry;
use crate::ports::{Clock, IdGenerator};
use crate::spatial::{self, Point};
use crate::text;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeSet;
use std::sync::Arc;

/// The GeoJSON `"type": "Feature"` member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
enum FeatureKind {
    #[default]
    Feature,
}

/// The GeoJSON `"type": "FeatureCollection"` member
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
enum CollectionKind {
    #[default]
    FeatureCollection,
}

fn null_as_empty<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<Vec<String>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Feature properties. Members other than the ones below are kept verbatim in `extra`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Properties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    #[serde(default, deserialize_with = "null_as_empty", skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<i64>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An incoming place, GeoJSON-shaped. Only `geometry` and `properties.name` are required,
/// and they are checked by the normalizer rather than by deserialization.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type", default)]
    kind: FeatureKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[serde(default)]
    pub geometry: Option<Geometry>,

    #[serde(default)]
    pub properties: Properties,
}

impl Feature {
    pub fn new(geometry: Geometry, name: impl Into<String>) -> Self {
        Self {
            kind: FeatureKind::Feature,
            id: None,
            geometry: Some(geometry),
            properties: Properties {
                name: Some(name.into()),
                ..Properties::default()
            },
        }
    }

    /// A point feature from lat/lon order
    pub fn point(lat: f64, lon: f64, name: impl Into<String>) -> Self {
        Self::new(Geometry::point(lat, lon), name)
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.properties.category = Some(category.into());
        self
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.properties.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_property(mut self, key: impl Into<String>, value: Value) -> Self {
        self.properties.extra.insert(key.into(), value);
        self
    }
}

/// A list of features, GeoJSON `FeatureCollection` shaped.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection<T = Feature> {
    #[serde(rename = "type", default)]
    kind: CollectionKind,
    pub features: Vec<T>,
}

impl<T> FeatureCollection<T> {
    pub fn new(features: Vec<T>) -> Self {
        Self {
            kind: CollectionKind::FeatureCollection,
            features,
        }
    }
}

impl<T> From<Vec<T>> for FeatureCollection<T> {
    fn from(features: Vec<T>) -> Self {
        Self::new(features)
    }
}

/// The stored form of a place.
///
/// `geohash` is derived from the geometry's representative point on every write and is
/// never taken from caller input. `properties.name` is always present and non-empty, and
/// both timestamps are always set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    #[serde(rename = "type", default)]
    kind: FeatureKind,
    pub id: String,
    pub geometry: Geometry,
    pub properties: Properties,
    pub geohash: String,
}

impl Record {
    pub fn name(&self) -> &str {
        self.properties.name.as_deref().unwrap_or_default()
    }

    pub fn category(&self) -> Option<&str> {
        self.properties.category.as_deref()
    }

    pub fn tags(&self) -> &[String] {
        &self.properties.tags
    }

    pub fn created_at(&self) -> i64 {
        self.properties.created_at.unwrap_or_default()
    }

    pub fn updated_at(&self) -> i64 {
        self.properties.updated_at.unwrap_or_default()
    }

    /// Tokens this record is indexed under in the search index
    pub fn tokens(&self) -> BTreeSet<String> {
        text::place_tokens(
            self.name(),
            self.category(),
            self.properties.tags.iter().map(String::as_str),
        )
    }

    pub fn representative_point(&self) -> Result<Point> {
        self.geometry.representative_point()
    }

    /// Turn the record back into a feature for resubmission. Keeps the id so saving it
    /// again updates in place.
    pub fn into_feature(self) -> Feature {
        Feature {
            kind: FeatureKind::Feature,
            id: Some(self.id),
            geometry: Some(self.geometry),
            properties: self.properties,
        }
    }

    /// Render as a GeoJSON Feature, with `geohash` as a foreign member.
    pub fn to_feature_json(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }

    pub(crate) fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub(crate) fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(serde_json::from_slice(bytes)?)
    }
}

/// Validates incoming features and turns them into records.
#[derive(Clone)]
pub struct Normalizer {
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    precision: usize,
}

impl Normalizer {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>, precision: usize) -> Self {
        Self {
            clock,
            ids,
            precision,
        }
    }

    pub fn precision(&self) -> usize {
        self.precision
    }

    /// Normalize a feature.
    ///
    /// `previous` is the currently stored record with the same id, if any. Its `createdAt`
    /// survives when the feature does not carry one.
    pub fn normalize(&self, feature: Feature, previous: Option<&Record>) -> Result<Record> {
        let Feature {
            id,
            geometry,
            mut properties,
            ..
        } = feature;

        let geometry = geometry.ok_or_else(|| PlaceError::validation("feature has no geometry"))?;
        match properties.name.as_deref() {
            Some(name) if !name.trim().is_empty() => {}
            _ => return Err(PlaceError::validation("feature has no name")),
        }

        // A blank category is no category
        properties.category = properties
            .category
            .map(|category| category.trim().to_owned())
            .filter(|category| !category.is_empty());

        let point = geometry.representative_point()?;
        let geohash = spatial::encode(point.lat, point.lon, self.precision)?;

        let id = match id {
            Some(id) if !id.is_empty() => id,
            _ => self.ids.next_id(),
        };

        let now = self.clock.now_millis();
        properties.created_at = properties
            .created_at
            .or_else(|| previous.and_then(|p| p.properties.created_at))
            .or(Some(now));
        properties.updated_at = Some(now);

        Ok(Record {
            kind: FeatureKind::Feature,
            id,
            geometry,
            properties,
            geohash,
        })
    }

    /// Id the feature will be stored under, if it names one
    pub(crate) fn requested_id(feature: &Feature) -> Option<&str> {
        feature.id.as_deref().filter(|id| !id.is_empty())
    }
}
