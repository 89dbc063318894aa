//! GeoJSON reading and writing with `serde_json`
//!
//! Supports the geometry types watershed boundaries and pour points use:
//! Point, MultiPoint, LineString, Polygon, MultiPolygon and collections of
//! them. The legacy named `crs` member is read and written so projected
//! boundary files keep their CRS.

use crate::crs::CRS;
use crate::error::{Error, Result};
use crate::io::check_suffix;
use crate::vector::{AttributeValue, Feature, FeatureCollection};
use geo_types::{
    Coord, Geometry, GeometryCollection, LineString, MultiLineString, MultiPoint, MultiPolygon, Point, Polygon,
};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::debug;

const GEOJSON_SUFFIXES: &[&str] = &["geojson", "json"];

/// Read a GeoJSON FeatureCollection from disk
pub fn read_geojson<P: AsRef<Path>>(path: P) -> Result<FeatureCollection> {
    let path = path.as_ref();
    check_suffix(path, GEOJSON_SUFFIXES)?;
    let text = std::fs::read_to_string(path)?;
    let fc = features_from_geojson_str(&text)?;
    debug!("Read {} feature(s) from {}", fc.len(), path.display());
    Ok(fc)
}

/// Write a FeatureCollection as GeoJSON
pub fn write_geojson<P: AsRef<Path>>(features: &FeatureCollection, path: P) -> Result<()> {
    let path = path.as_ref();
    check_suffix(path, GEOJSON_SUFFIXES)?;
    std::fs::write(path, features_to_geojson_string(features)?)?;
    Ok(())
}

/// Parse a FeatureCollection, a single Feature or a bare geometry
pub fn features_from_geojson_str(text: &str) -> Result<FeatureCollection> {
    let root: Value = serde_json::from_str(text)?;
    let crs = root
        .pointer("/crs/properties/name")
        .and_then(Value::as_str)
        .and_then(parse_crs_name);

    let features = match root.get("type").and_then(Value::as_str) {
        Some("FeatureCollection") => root
            .get("features")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("FeatureCollection without a features array"))?
            .iter()
            .map(parse_feature)
            .collect::<Result<Vec<_>>>()?,
        Some("Feature") => vec![parse_feature(&root)?],
        Some(_) => vec![Feature::new(parse_geometry(&root)?)],
        None => return Err(invalid("missing GeoJSON type")),
    };

    Ok(FeatureCollection { features, crs })
}

/// Serialise a FeatureCollection to a GeoJSON string
pub fn features_to_geojson_string(features: &FeatureCollection) -> Result<String> {
    let mut root = json!({
        "type": "FeatureCollection",
        "features": features.iter().map(feature_to_value).collect::<Vec<_>>(),
    });
    if let Some(code) = features.crs.as_ref().and_then(CRS::epsg) {
        root["crs"] = json!({
            "type": "name",
            "properties": { "name": format!("urn:ogc:def:crs:EPSG::{code}") },
        });
    }
    Ok(serde_json::to_string_pretty(&root)?)
}

fn invalid(reason: &str) -> Error {
    Error::invalid_param("geojson", "", reason)
}

fn parse_crs_name(name: &str) -> Option<CRS> {
    let code = name.rsplit(':').next()?;
    if code == "CRS84" {
        return Some(CRS::wgs84());
    }
    code.parse::<u32>().ok().map(CRS::from_epsg)
}

fn parse_feature(value: &Value) -> Result<Feature> {
    let geometry = match value.get("geometry") {
        Some(Value::Null) | None => None,
        Some(g) => Some(parse_geometry(g)?),
    };
    let properties = value
        .get("properties")
        .and_then(Value::as_object)
        .map(|props| {
            props
                .iter()
                .map(|(k, v)| (k.clone(), attribute_from_value(v)))
                .collect::<HashMap<_, _>>()
        })
        .unwrap_or_default();
    let id = value.get("id").and_then(|id| match id {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    });
    Ok(Feature {
        geometry,
        properties,
        id,
    })
}

fn attribute_from_value(value: &Value) -> AttributeValue {
    match value {
        Value::Bool(b) => AttributeValue::Bool(*b),
        Value::Number(n) => match n.as_i64() {
            Some(i) => AttributeValue::Int(i),
            None => n.as_f64().map_or(AttributeValue::Null, AttributeValue::Float),
        },
        Value::String(s) => AttributeValue::String(s.clone()),
        Value::Null => AttributeValue::Null,
        other => AttributeValue::String(other.to_string()),
    }
}

fn coord(value: &Value) -> Result<Coord<f64>> {
    let arr = value
        .as_array()
        .filter(|a| a.len() >= 2)
        .ok_or_else(|| invalid("position must have at least two numbers"))?;
    match (arr[0].as_f64(), arr[1].as_f64()) {
        (Some(x), Some(y)) => Ok(Coord { x, y }),
        _ => Err(invalid("position must be numeric")),
    }
}

fn coords(value: &Value) -> Result<Vec<Coord<f64>>> {
    value
        .as_array()
        .ok_or_else(|| invalid("expected an array of positions"))?
        .iter()
        .map(coord)
        .collect()
}

fn polygon(value: &Value) -> Result<Polygon<f64>> {
    let mut rings = value
        .as_array()
        .ok_or_else(|| invalid("polygon must be an array of rings"))?
        .iter()
        .map(|r| coords(r).map(LineString::from));
    let exterior = rings
        .next()
        .transpose()?
        .ok_or_else(|| invalid("polygon has no exterior ring"))?;
    let interiors = rings.collect::<Result<Vec<_>>>()?;
    Ok(Polygon::new(exterior, interiors))
}

fn parse_geometry(value: &Value) -> Result<Geometry<f64>> {
    let kind = value
        .get("type")
        .and_then(Value::as_str)
        .ok_or_else(|| invalid("geometry without type"))?;
    if kind == "GeometryCollection" {
        let parts = value
            .get("geometries")
            .and_then(Value::as_array)
            .ok_or_else(|| invalid("GeometryCollection without geometries"))?
            .iter()
            .map(parse_geometry)
            .collect::<Result<Vec<_>>>()?;
        return Ok(Geometry::GeometryCollection(GeometryCollection(parts)));
    }

    let c = value
        .get("coordinates")
        .ok_or_else(|| invalid("geometry without coordinates"))?;
    let geometry = match kind {
        "Point" => Geometry::Point(Point(coord(c)?)),
        "MultiPoint" => Geometry::MultiPoint(MultiPoint(
            coords(c)?.into_iter().map(Point).collect(),
        )),
        "LineString" => Geometry::LineString(LineString::from(coords(c)?)),
        "MultiLineString" => Geometry::MultiLineString(MultiLineString(
            c.as_array()
                .ok_or_else(|| invalid("MultiLineString must be an array of lines"))?
                .iter()
                .map(|l| coords(l).map(LineString::from))
                .collect::<Result<Vec<_>>>()?,
        )),
        "Polygon" => Geometry::Polygon(polygon(c)?),
        "MultiPolygon" => Geometry::MultiPolygon(MultiPolygon(
            c.as_array()
                .ok_or_else(|| invalid("MultiPolygon must be an array of polygons"))?
                .iter()
                .map(polygon)
                .collect::<Result<Vec<_>>>()?,
        )),
        other => {
            return Err(Error::UnsupportedDataType(format!(
                "GeoJSON geometry type {other}"
            )))
        }
    };
    Ok(geometry)
}

fn ring_to_value(ring: &LineString<f64>) -> Value {
    Value::Array(ring.coords().map(|c| json!([c.x, c.y])).collect())
}

fn polygon_to_value(p: &Polygon<f64>) -> Value {
    let mut rings = vec![ring_to_value(p.exterior())];
    rings.extend(p.interiors().iter().map(ring_to_value));
    Value::Array(rings)
}

fn geometry_to_value(geometry: &Geometry<f64>) -> Value {
    match geometry {
        Geometry::Point(p) => json!({"type": "Point", "coordinates": [p.x(), p.y()]}),
        Geometry::MultiPoint(mp) => json!({
            "type": "MultiPoint",
            "coordinates": mp.iter().map(|p| json!([p.x(), p.y()])).collect::<Vec<_>>(),
        }),
        Geometry::LineString(ls) => json!({"type": "LineString", "coordinates": ring_to_value(ls)}),
        Geometry::Polygon(p) => json!({"type": "Polygon", "coordinates": polygon_to_value(p)}),
        Geometry::MultiPolygon(mp) => json!({
            "type": "MultiPolygon",
            "coordinates": mp.iter().map(polygon_to_value).collect::<Vec<_>>(),
        }),
        Geometry::Rect(r) => geometry_to_value(&Geometry::Polygon(r.to_polygon())),
        Geometry::GeometryCollection(gc) => json!({
            "type": "GeometryCollection",
            "geometries": gc.iter().map(geometry_to_value).collect::<Vec<_>>(),
        }),
        Geometry::Triangle(t) => geometry_to_value(&Geometry::Polygon(t.to_polygon())),
        Geometry::Line(l) => geometry_to_value(&Geometry::LineString(LineString::from(vec![l.start, l.end]))),
        Geometry::MultiLineString(mls) => json!({
            "type": "MultiLineString",
            "coordinates": mls.iter().map(ring_to_value).collect::<Vec<_>>(),
        }),
    }
}

fn feature_to_value(feature: &Feature) -> Value {
    let mut props = Map::new();
    let mut keys: Vec<_> = feature.properties.keys().collect();
    keys.sort();
    for key in keys {
        let value = match &feature.properties[key] {
            AttributeValue::Null => Value::Null,
            AttributeValue::Bool(b) => json!(b),
            AttributeValue::Int(i) => json!(i),
            AttributeValue::Float(f) => json!(f),
            AttributeValue::String(s) => json!(s),
        };
        props.insert(key.clone(), value);
    }
    let mut value = json!({
        "type": "Feature",
        "geometry": feature.geometry.as_ref().map_or(Value::Null, geometry_to_value),
        "properties": Value::Object(props),
    });
    if let Some(id) = &feature.id {
        value["id"] = json!(id);
    }
    value
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const WBD: &str = r#"{
        "type": "FeatureCollection",
        "crs": {"type": "name", "properties": {"name": "urn:ogc:def:crs:EPSG::5070"}},
        "features": [
            {"type": "Feature", "id": 7,
             "properties": {"HUC12": "101900010101", "ToHUC": "101900010102", "AreaSqKm": 41.5},
             "geometry": {"type": "Polygon", "coordinates": [[[0,0],[10,0],[10,10],[0,10],[0,0]]]}},
            {"type": "Feature",
             "properties": {"name": "outlet"},
             "geometry": {"type": "Point", "coordinates": [5.5, 2.5]}}
        ]
    }"#;

    #[test]
    fn test_parse_watershed_boundaries() {
        let fc = features_from_geojson_str(WBD).unwrap();
        assert_eq!(fc.len(), 2);
        assert_eq!(fc.crs.as_ref().and_then(CRS::epsg), Some(5070));

        let huc = &fc.features[0];
        assert_eq!(huc.id.as_deref(), Some("7"));
        assert_eq!(huc.property_string("ToHUC").as_deref(), Some("101900010102"));
        assert_eq!(huc.get_property("AreaSqKm").and_then(AttributeValue::as_f64), Some(41.5));
        assert_eq!(huc.polygons().len(), 1);

        match &fc.features[1].geometry {
            Some(Geometry::Point(p)) => assert_eq!((p.x(), p.y()), (5.5, 2.5)),
            other => panic!("expected point, got {other:?}"),
        }
    }

    #[test]
    fn test_file_round_trip_keeps_crs_and_attributes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("basins.geojson");
        let fc = features_from_geojson_str(WBD).unwrap();
        write_geojson(&fc, &path).unwrap();

        let back = read_geojson(&path).unwrap();
        assert_eq!(back.crs, fc.crs);
        assert_eq!(back.features[0].properties, fc.features[0].properties);
    }

    #[test]
    fn test_rejects_shapefile_suffix() {
        assert!(matches!(
            read_geojson("basins.shp"),
            Err(Error::UnsupportedFormat { .. })
        ));
    }

    #[test]
    fn test_bad_geometry() {
        let err = features_from_geojson_str(r#"{"type": "Polygon", "coordinates": [[1]]}"#);
        assert!(err.is_err());
    }
}
