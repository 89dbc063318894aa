//! Vector features: geometry plus attributes

mod geojson;

pub use geojson::{features_from_geojson_str, features_to_geojson_string, read_geojson, write_geojson};

use crate::error::{Error, Result};
use geo::BoundingRect;
use geo_types::{Geometry, MultiPolygon, Polygon, Rect};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

/// Attribute value types
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttributeValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl AttributeValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            AttributeValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            AttributeValue::Int(v) => Some(*v as f64),
            AttributeValue::Float(v) => Some(*v),
            _ => None,
        }
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AttributeValue::Null => write!(f, "null"),
            AttributeValue::Bool(v) => write!(f, "{v}"),
            AttributeValue::Int(v) => write!(f, "{v}"),
            AttributeValue::Float(v) => write!(f, "{v}"),
            AttributeValue::String(v) => write!(f, "{v}"),
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(v: &str) -> Self {
        AttributeValue::String(v.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(v: String) -> Self {
        AttributeValue::String(v)
    }
}

impl From<f64> for AttributeValue {
    fn from(v: f64) -> Self {
        AttributeValue::Float(v)
    }
}

impl From<i64> for AttributeValue {
    fn from(v: i64) -> Self {
        AttributeValue::Int(v)
    }
}

/// A geographic feature with geometry and attributes
#[derive(Debug, Clone)]
pub struct Feature {
    pub geometry: Option<Geometry<f64>>,
    pub properties: HashMap<String, AttributeValue>,
    pub id: Option<String>,
}

impl Feature {
    pub fn new(geometry: Geometry<f64>) -> Self {
        Self {
            geometry: Some(geometry),
            properties: HashMap::new(),
            id: None,
        }
    }

    /// Builder-style attribute setter
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn set_property(&mut self, key: impl Into<String>, value: AttributeValue) {
        self.properties.insert(key.into(), value);
    }

    pub fn get_property(&self, key: &str) -> Option<&AttributeValue> {
        self.properties.get(key)
    }

    /// Attribute rendered as text, so numeric HUC codes compare like strings
    pub fn property_string(&self, key: &str) -> Option<String> {
        match self.properties.get(key)? {
            AttributeValue::Null => None,
            value => Some(value.to_string()),
        }
    }

    /// Polygonal parts of the geometry, empty for points and lines
    pub fn polygons(&self) -> Vec<Polygon<f64>> {
        match &self.geometry {
            Some(Geometry::Polygon(p)) => vec![p.clone()],
            Some(Geometry::MultiPolygon(mp)) => mp.0.clone(),
            Some(Geometry::Rect(r)) => vec![r.to_polygon()],
            Some(Geometry::GeometryCollection(gc)) => gc
                .iter()
                .flat_map(|g| Feature::new(g.clone()).polygons())
                .collect(),
            _ => Vec::new(),
        }
    }
}

/// Collection of features
#[derive(Debug, Clone, Default)]
pub struct FeatureCollection {
    pub features: Vec<Feature>,
    /// CRS the coordinates are in, when known
    pub crs: Option<crate::crs::CRS>,
}

impl FeatureCollection {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, feature: Feature) {
        self.features.push(feature);
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Feature> {
        self.features.iter()
    }

    /// Bounding box of every geometry, `None` when there are none
    pub fn bounds(&self) -> Option<Rect<f64>> {
        self.features
            .iter()
            .filter_map(|f| f.geometry.as_ref()?.bounding_rect())
            .reduce(|a, b| {
                Rect::new(
                    (a.min().x.min(b.min().x), a.min().y.min(b.min().y)),
                    (a.max().x.max(b.max().x), a.max().y.max(b.max().y)),
                )
            })
    }

    /// Error unless every feature carries `field`
    pub fn require_field(&self, field: &str) -> Result<()> {
        match self.features.iter().position(|f| f.get_property(field).is_none()) {
            None => Ok(()),
            Some(i) => Err(Error::invalid_param(
                "field",
                field,
                format!("feature {i} has no such attribute"),
            )),
        }
    }

    /// Features whose `field` satisfies `keep`
    pub fn filter_by<F>(&self, field: &str, keep: F) -> FeatureCollection
    where
        F: Fn(&str) -> bool,
    {
        FeatureCollection {
            features: self
                .features
                .iter()
                .filter(|f| f.property_string(field).is_some_and(|v| keep(&v)))
                .cloned()
                .collect(),
            crs: self.crs.clone(),
        }
    }

    /// Group features by the value of `field` (after `key`) into one
    /// MultiPolygon feature per group.
    ///
    /// Parts are gathered, not unioned, which is enough for containment
    /// and intersection tests. Groups come out in sorted key order with
    /// the key stored under `field`.
    pub fn dissolve_by<F>(&self, field: &str, key: F) -> Result<FeatureCollection>
    where
        F: Fn(&str) -> String,
    {
        self.require_field(field)?;
        let mut groups: BTreeMap<String, Vec<Polygon<f64>>> = BTreeMap::new();
        for feature in &self.features {
            let Some(value) = feature.property_string(field) else {
                continue;
            };
            groups.entry(key(&value)).or_default().extend(feature.polygons());
        }
        let features = groups
            .into_iter()
            .map(|(k, polys)| {
                let mut f = Feature::new(Geometry::MultiPolygon(MultiPolygon(polys)))
                    .with_property(field, k.clone());
                f.id = Some(k);
                f
            })
            .collect();
        Ok(FeatureCollection {
            features,
            crs: self.crs.clone(),
        })
    }

    /// Dissolve on the raw attribute value
    pub fn dissolve(&self, field: &str) -> Result<FeatureCollection> {
        self.dissolve_by(field, str::to_string)
    }
}

impl IntoIterator for FeatureCollection {
    type Item = Feature;
    type IntoIter = std::vec::IntoIter<Feature>;

    fn into_iter(self) -> Self::IntoIter {
        self.features.into_iter()
    }
}

impl FromIterator<Feature> for FeatureCollection {
    fn from_iter<I: IntoIterator<Item = Feature>>(iter: I) -> Self {
        FeatureCollection {
            features: iter.into_iter().collect(),
            crs: None,
        }
    }
}
