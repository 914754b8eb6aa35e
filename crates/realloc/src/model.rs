use std::collections::BTreeMap;

use geo::MultiPolygon;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Coordinate reference system
// ---------------------------------------------------------------------------

/// Normalized CRS tag. Two layers are comparable only when their tags are equal.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Crs(String);

/// Geographic (degree-based) systems. Areas computed in these are meaningless.
const GEOGRAPHIC_EPSG: &[u32] = &[4326, 4269, 4267, 4258];

impl Crs {
    /// Parse `EPSG:3435`, `epsg:3435`, `urn:ogc:def:crs:EPSG::3435` or the CRS84 URN.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return None;
        }
        let upper = trimmed.to_ascii_uppercase();
        if upper.ends_with("CRS84") {
            return Some(Self("OGC:CRS84".into()));
        }
        if let Some(pos) = upper.find("EPSG") {
            let code: String = upper[pos + 4..]
                .trim_start_matches(':')
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            if !code.is_empty() {
                return Some(Self(format!("EPSG:{code}")));
            }
        }
        Some(Self(trimmed.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn epsg_code(&self) -> Option<u32> {
        self.0.strip_prefix("EPSG:").and_then(|c| c.parse().ok())
    }

    pub fn is_geographic(&self) -> bool {
        self.0 == "OGC:CRS84" || self.epsg_code().is_some_and(|c| GEOGRAPHIC_EPSG.contains(&c))
    }
}

impl std::fmt::Display for Crs {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for Crs {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Crs::parse(&value).ok_or_else(|| "empty CRS".to_string())
    }
}

impl From<Crs> for String {
    fn from(crs: Crs) -> Self {
        crs.0
    }
}

// ---------------------------------------------------------------------------
// Layers
// ---------------------------------------------------------------------------

/// Raw attribute value as loaded. Numeric extraction is deferred to reallocation.
#[derive(Debug, Clone, PartialEq)]
pub enum AttrValue {
    Number(f64),
    Text(String),
    Null,
}

impl AttrValue {
    /// Parse a delimited-table cell: empty → Null, numeric → Number, else Text.
    pub fn from_cell(cell: &str) -> Self {
        let cell = cell.trim();
        if cell.is_empty() {
            return Self::Null;
        }
        match cell.parse::<f64>() {
            Ok(n) if n.is_finite() => Self::Number(n),
            _ => Self::Text(cell.to_string()),
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Key form used for ids and filters. Integral numbers print without a fraction.
    pub fn as_key(&self) -> Option<String> {
        match self {
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => Some(format!("{}", *n as i64)),
            Self::Number(n) => Some(n.to_string()),
            Self::Text(s) => Some(s.clone()),
            Self::Null => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Feature {
    pub properties: BTreeMap<String, AttrValue>,
    pub geometry: MultiPolygon<f64>,
}

impl Feature {
    pub fn get(&self, field: &str) -> &AttrValue {
        self.properties.get(field).unwrap_or(&AttrValue::Null)
    }
}

/// A polygon layer: census tracts of one vintage, or the fixed neighborhood set.
#[derive(Debug, Clone)]
pub struct Layer {
    pub name: String,
    pub crs: Option<Crs>,
    pub features: Vec<Feature>,
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttributeKind {
    /// Additive count: split proportionally to area.
    Extensive,
    /// Rate, percentage or average: area-weighted mean, never summed.
    Intensive,
}

impl std::fmt::Display for AttributeKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Extensive => write!(f, "extensive"),
            Self::Intensive => write!(f, "intensive"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldSpec {
    /// Attribute name on the source layer.
    pub name: String,
    pub kind: AttributeKind,
    /// Output column name. Defaults to `name`.
    #[serde(default)]
    pub column: Option<String>,
}

impl FieldSpec {
    pub fn extensive(name: &str) -> Self {
        Self { name: name.into(), kind: AttributeKind::Extensive, column: None }
    }

    pub fn intensive(name: &str) -> Self {
        Self { name: name.into(), kind: AttributeKind::Intensive, column: None }
    }

    pub fn renamed(mut self, column: &str) -> Self {
        self.column = Some(column.into());
        self
    }

    pub fn output_column(&self) -> &str {
        self.column.as_deref().unwrap_or(&self.name)
    }
}

// ---------------------------------------------------------------------------
// Tables
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TableRow {
    pub id: String,
    pub values: Vec<Option<f64>>,
}

/// Reallocation output for one decade/year: one row per target polygon.
#[derive(Debug, Clone, Serialize)]
pub struct VintageTable {
    pub label: String,
    pub id_field: String,
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
}

impl VintageTable {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn value(&self, id: &str, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.rows.iter().find(|r| r.id == id).and_then(|r| r.values[idx])
    }
}

/// Wide table: one row per anchor id, one column per vintage variable.
#[derive(Debug, Clone, Serialize)]
pub struct MergedTable {
    pub id_field: String,
    pub columns: Vec<String>,
    pub rows: Vec<TableRow>,
    /// `(vintage label, id)` pairs discarded by the left join.
    pub dropped: Vec<(String, String)>,
}

impl MergedTable {
    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    pub fn row(&self, id: &str) -> Option<&TableRow> {
        self.rows.iter().find(|r| r.id == id)
    }

    pub fn value(&self, id: &str, column: &str) -> Option<f64> {
        let idx = self.column_index(column)?;
        self.row(id).and_then(|r| r.values[idx])
    }
}
