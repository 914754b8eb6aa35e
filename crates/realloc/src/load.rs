use std::collections::{BTreeMap, HashMap, HashSet};

use geo::MultiPolygon;
use geojson::{GeoJson, JsonObject, JsonValue};
use serde::Serialize;
use tracing::warn;

use crate::config::RowFilter;
use crate::error::ReallocError;
use crate::geometry::polygon_from_rings;
use crate::model::{AttrValue, Crs, Feature, Layer};
use crate::overlay::layer_ids;

// ---------------------------------------------------------------------------
// Polygon layers
// ---------------------------------------------------------------------------

/// Parse a GeoJSON FeatureCollection into a polygon layer.
///
/// The CRS is taken from the legacy `crs` member when present, else from
/// `declared`. A file that names a different CRS than declared is rejected.
pub fn parse_geojson_layer(
    name: &str,
    text: &str,
    declared: Option<&Crs>,
) -> Result<Layer, ReallocError> {
    let parsed: GeoJson = text.parse().map_err(|e: geojson::Error| ReallocError::Parse {
        source_name: name.into(),
        message: e.to_string(),
    })?;

    let (features, foreign) = match parsed {
        GeoJson::FeatureCollection(fc) => (fc.features, fc.foreign_members),
        GeoJson::Feature(f) => (vec![f], None),
        GeoJson::Geometry(_) => {
            return Err(ReallocError::Parse {
                source_name: name.into(),
                message: "expected a FeatureCollection, found a bare geometry".into(),
            })
        }
    };

    let file_crs = foreign.as_ref().and_then(crs_member);
    let crs = match (file_crs, declared) {
        (Some(file), Some(declared)) if &file != declared => {
            return Err(ReallocError::ProjectionMismatch(format!(
                "layer '{name}' declares {file} but {declared} is configured"
            )))
        }
        (Some(file), _) => Some(file),
        (None, declared) => declared.cloned(),
    };

    let mut out = Vec::with_capacity(features.len());
    for (i, feature) in features.into_iter().enumerate() {
        let geometry = match feature.geometry {
            Some(g) => to_multipolygon(&g.value),
            None => Err("feature has no geometry".to_string()),
        }
        .map_err(|reason| ReallocError::InvalidGeometry {
            layer: name.into(),
            id: format!("#{i}"),
            reason,
        })?;

        let properties = feature
            .properties
            .unwrap_or_default()
            .into_iter()
            .map(|(k, v)| (k, json_to_attr(v)))
            .collect();

        out.push(Feature { properties, geometry });
    }

    Ok(Layer { name: name.into(), crs, features: out })
}

/// `{"crs": {"type": "name", "properties": {"name": "EPSG:3435"}}}`
fn crs_member(members: &JsonObject) -> Option<Crs> {
    let name = members.get("crs")?.get("properties")?.get("name")?.as_str()?;
    Crs::parse(name)
}

fn to_multipolygon(value: &geojson::Value) -> Result<MultiPolygon<f64>, String> {
    match value {
        geojson::Value::Polygon(rings) => Ok(MultiPolygon(vec![polygon_from_rings(rings)?])),
        geojson::Value::MultiPolygon(polygons) => {
            let polygons = polygons
                .iter()
                .map(|rings| polygon_from_rings(rings))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(MultiPolygon(polygons))
        }
        other => Err(format!("unsupported geometry type {}", geometry_kind(other))),
    }
}

fn geometry_kind(value: &geojson::Value) -> &'static str {
    match value {
        geojson::Value::Point(_) => "Point",
        geojson::Value::MultiPoint(_) => "MultiPoint",
        geojson::Value::LineString(_) => "LineString",
        geojson::Value::MultiLineString(_) => "MultiLineString",
        geojson::Value::Polygon(_) => "Polygon",
        geojson::Value::MultiPolygon(_) => "MultiPolygon",
        geojson::Value::GeometryCollection(_) => "GeometryCollection",
    }
}

fn json_to_attr(value: JsonValue) -> AttrValue {
    match value {
        JsonValue::Null => AttrValue::Null,
        JsonValue::Number(n) => n.as_f64().map_or(AttrValue::Null, AttrValue::Number),
        JsonValue::String(s) => AttrValue::Text(s),
        JsonValue::Bool(b) => AttrValue::Text(b.to_string()),
        other => AttrValue::Text(other.to_string()),
    }
}

// ---------------------------------------------------------------------------
// Attribute tables
// ---------------------------------------------------------------------------

/// A tabular census extract keyed by a tract identifier.
#[derive(Debug, Clone)]
pub struct AttributeTable {
    pub name: String,
    pub key: String,
    pub columns: Vec<String>,
    pub rows: Vec<(String, Vec<AttrValue>)>,
}

pub fn parse_attribute_table(
    name: &str,
    csv_data: &str,
    key_column: &str,
) -> Result<AttributeTable, ReallocError> {
    let parse_err =
        |e: csv::Error| ReallocError::Parse { source_name: name.into(), message: e.to_string() };

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .trim(csv::Trim::Headers)
        .from_reader(csv_data.as_bytes());

    let headers: Vec<String> =
        reader.headers().map_err(parse_err)?.iter().map(|h| h.to_string()).collect();
    let key_idx = headers.iter().position(|h| h == key_column).ok_or_else(|| {
        ReallocError::MissingColumn { table: name.into(), column: key_column.into() }
    })?;
    let columns: Vec<String> = headers.iter().filter(|h| h.as_str() != key_column).cloned().collect();

    let mut seen = HashSet::new();
    let mut rows = Vec::new();
    for (line, record) in reader.records().enumerate() {
        let record = record.map_err(parse_err)?;
        let key = record.get(key_idx).unwrap_or("").trim().to_string();
        if key.is_empty() {
            return Err(ReallocError::UndefinedValue {
                layer: name.into(),
                id: format!("row {}", line + 1),
                field: key_column.into(),
            });
        }
        if !seen.insert(key.clone()) {
            return Err(ReallocError::DuplicateKey { layer: name.into(), id: key });
        }
        let values = (0..headers.len())
            .filter(|&i| i != key_idx)
            .map(|i| AttrValue::from_cell(record.get(i).unwrap_or("")))
            .collect();
        rows.push((key, values));
    }

    Ok(AttributeTable { name: name.into(), key: key_column.into(), columns, rows })
}

/// What a join did. Unjoined rows carry counts that have no geometry to land in.
#[derive(Debug, Clone, Default, Serialize)]
pub struct JoinReport {
    pub joined: usize,
    pub features_without_data: usize,
    pub unjoined: Vec<String>,
    /// Per-column numeric totals of the unjoined rows.
    pub unjoined_totals: BTreeMap<String, f64>,
}

/// Copy the table's columns onto features whose `id_field` equals the row key.
pub fn join_attributes(
    layer: &mut Layer,
    id_field: &str,
    table: &AttributeTable,
) -> Result<JoinReport, ReallocError> {
    let ids = layer_ids(layer, id_field)?;
    let by_id: HashMap<&str, usize> =
        ids.iter().enumerate().map(|(i, id)| (id.as_str(), i)).collect();

    let mut report = JoinReport::default();
    let mut matched = vec![false; layer.features.len()];
    for (key, values) in &table.rows {
        let Some(&fi) = by_id.get(key.as_str()) else {
            report.unjoined.push(key.clone());
            for (column, value) in table.columns.iter().zip(values) {
                if let Some(n) = value.as_number() {
                    *report.unjoined_totals.entry(column.clone()).or_insert(0.0) += n;
                }
            }
            continue;
        };
        matched[fi] = true;
        report.joined += 1;
        let feature = &mut layer.features[fi];
        for (column, value) in table.columns.iter().zip(values) {
            feature.properties.insert(column.clone(), value.clone());
        }
    }
    report.features_without_data = matched.iter().filter(|m| !**m).count();

    if !report.unjoined.is_empty() {
        warn!(
            layer = %layer.name,
            table = %table.name,
            unjoined = report.unjoined.len(),
            "attribute rows without a matching feature"
        );
    }
    Ok(report)
}

/// Keep only features whose `filter.field` is one of `filter.values`.
/// Returns the number of features removed.
pub fn filter_features(layer: &mut Layer, filter: &RowFilter) -> usize {
    let before = layer.features.len();
    layer.features.retain(|f| {
        f.get(&filter.field)
            .as_key()
            .is_some_and(|v| filter.values.iter().any(|allowed| *allowed == v))
    });
    before - layer.features.len()
}
