use thiserror::Error;

#[derive(Debug, Error)]
pub enum ReallocError {
    /// TOML parse / deserialization error.
    #[error("config parse error: {0}")]
    ConfigParse(String),
    /// Config validation error (no vintages, duplicate labels, bad references).
    #[error("config validation error: {0}")]
    ConfigValidation(String),
    /// Layers are not in one verifiable planar coordinate system.
    #[error("projection mismatch: {0}")]
    ProjectionMismatch(String),
    /// Malformed polygon. Always names the offending feature.
    #[error("layer '{layer}', feature '{id}': invalid geometry: {reason}")]
    InvalidGeometry { layer: String, id: String, reason: String },
    /// Non-unique id in a layer, attribute table or vintage table.
    #[error("layer '{layer}': duplicate key '{id}'")]
    DuplicateKey { layer: String, id: String },
    /// Missing or non-numeric value where a number was required.
    #[error("layer '{layer}', feature '{id}': undefined value for '{field}'")]
    UndefinedValue { layer: String, id: String, field: String },
    /// Extensive counts must be non-negative.
    #[error("layer '{layer}', feature '{id}': negative value {value} for extensive field '{field}'")]
    NegativeValue { layer: String, id: String, field: String, value: f64 },
    /// A rate/percentage field was used where only counts are valid.
    #[error("field '{0}' is intensive and cannot be conservation checked")]
    IntensiveAttribute(String),
    /// Field not present in a table.
    #[error("'{table}': unknown field '{field}'")]
    UnknownField { table: String, field: String },
    /// Missing required column in an attribute table.
    #[error("'{table}': missing column '{column}'")]
    MissingColumn { table: String, column: String },
    /// Output column name collides with another column.
    #[error("duplicate column '{0}'")]
    DuplicateColumn(String),
    /// Observed conservation delta differs from the expected one.
    #[error(
        "vintage '{label}', field '{field}': conservation delta {actual} does not match expected {expected}"
    )]
    ConservationMismatch { label: String, field: String, expected: f64, actual: f64 },
    /// GeoJSON / CSV parse error.
    #[error("parse error in '{source_name}': {message}")]
    Parse { source_name: String, message: String },
    /// Failure while serializing a table or report.
    #[error("export error: {0}")]
    Export(String),
}

impl ReallocError {
    /// True for errors caused by the input data rather than by configuration or IO.
    pub fn is_data_error(&self) -> bool {
        matches!(
            self,
            Self::ProjectionMismatch(_)
                | Self::InvalidGeometry { .. }
                | Self::DuplicateKey { .. }
                | Self::UndefinedValue { .. }
                | Self::NegativeValue { .. }
        )
    }
}
