//! Typed view of Exasol column data types.

use crate::transport::messages::DataType;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Exasol data type representation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "UPPERCASE")]
pub enum ExasolType {
    /// BOOLEAN type
    #[serde(rename = "BOOLEAN")]
    Boolean,

    /// CHAR(n) type
    #[serde(rename = "CHAR")]
    Char { size: u64 },

    /// VARCHAR(n) type
    #[serde(rename = "VARCHAR")]
    Varchar { size: u64 },

    /// DECIMAL(p, s) type
    #[serde(rename = "DECIMAL")]
    Decimal { precision: u32, scale: i32 },

    /// DOUBLE PRECISION type
    #[serde(rename = "DOUBLE")]
    Double,

    /// DATE type
    #[serde(rename = "DATE")]
    Date,

    /// TIMESTAMP type
    #[serde(rename = "TIMESTAMP")]
    Timestamp { with_local_time_zone: bool },

    /// INTERVAL YEAR TO MONTH
    #[serde(rename = "INTERVAL YEAR TO MONTH")]
    IntervalYearToMonth { precision: u32 },

    /// INTERVAL DAY TO SECOND
    #[serde(rename = "INTERVAL DAY TO SECOND")]
    IntervalDayToSecond { precision: u32, fraction: u32 },

    /// GEOMETRY type
    #[serde(rename = "GEOMETRY")]
    Geometry { srid: Option<i32> },

    /// HASHTYPE type (for hash values)
    #[serde(rename = "HASHTYPE")]
    Hashtype { byte_size: u64 },

    /// A type name this driver does not know
    #[serde(skip)]
    Unknown(String),
}

impl ExasolType {
    pub fn is_numeric(&self) -> bool {
        matches!(self, ExasolType::Decimal { .. } | ExasolType::Double)
    }

    /// Whether values of this type travel as JSON strings.
    pub fn is_textual(&self) -> bool {
        !matches!(
            self,
            ExasolType::Boolean | ExasolType::Decimal { .. } | ExasolType::Double
        )
    }
}

impl fmt::Display for ExasolType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExasolType::Boolean => write!(f, "BOOLEAN"),
            ExasolType::Char { size } => write!(f, "CHAR({})", size),
            ExasolType::Varchar { size } => write!(f, "VARCHAR({})", size),
            ExasolType::Decimal { precision, scale } => write!(f, "DECIMAL({},{})", precision, scale),
            ExasolType::Double => write!(f, "DOUBLE PRECISION"),
            ExasolType::Date => write!(f, "DATE"),
            ExasolType::Timestamp {
                with_local_time_zone: true,
            } => write!(f, "TIMESTAMP WITH LOCAL TIME ZONE"),
            ExasolType::Timestamp { .. } => write!(f, "TIMESTAMP"),
            ExasolType::IntervalYearToMonth { precision } => {
                write!(f, "INTERVAL YEAR({}) TO MONTH", precision)
            }
            ExasolType::IntervalDayToSecond { precision, fraction } => {
                write!(f, "INTERVAL DAY({}) TO SECOND({})", precision, fraction)
            }
            ExasolType::Geometry { srid: Some(srid) } => write!(f, "GEOMETRY({})", srid),
            ExasolType::Geometry { srid: None } => write!(f, "GEOMETRY"),
            ExasolType::Hashtype { byte_size } => write!(f, "HASHTYPE({} BYTE)", byte_size),
            ExasolType::Unknown(name) => write!(f, "{}", name),
        }
    }
}

/// Type mapper for converting between wire descriptors and [`ExasolType`].
pub struct TypeMapper;

impl TypeMapper {
    /// Interpret a wire data type descriptor.
    ///
    /// Missing size attributes fall back to the Exasol defaults; unknown type
    /// names map to [`ExasolType::Unknown`].
    pub fn from_data_type(data_type: &DataType) -> ExasolType {
        match data_type.type_name.as_str() {
            "BOOLEAN" => ExasolType::Boolean,
            "CHAR" => ExasolType::Char {
                size: data_type.size.unwrap_or(1),
            },
            "VARCHAR" => ExasolType::Varchar {
                size: data_type.size.unwrap_or(2_000_000),
            },
            "DECIMAL" => ExasolType::Decimal {
                precision: data_type.precision.unwrap_or(18),
                scale: data_type.scale.unwrap_or(0),
            },
            "DOUBLE" | "DOUBLE PRECISION" => ExasolType::Double,
            "DATE" => ExasolType::Date,
            "TIMESTAMP" => ExasolType::Timestamp {
                with_local_time_zone: data_type.with_local_time_zone.unwrap_or(false),
            },
            "TIMESTAMP WITH LOCAL TIME ZONE" => ExasolType::Timestamp {
                with_local_time_zone: true,
            },
            "INTERVAL YEAR TO MONTH" => ExasolType::IntervalYearToMonth {
                precision: data_type.precision.unwrap_or(2),
            },
            "INTERVAL DAY TO SECOND" => ExasolType::IntervalDayToSecond {
                precision: data_type.precision.unwrap_or(2),
                fraction: data_type.fraction.unwrap_or(3),
            },
            "GEOMETRY" => ExasolType::Geometry {
                srid: data_type.srid,
            },
            "HASHTYPE" => ExasolType::Hashtype {
                byte_size: data_type.size.unwrap_or(16),
            },
            other => ExasolType::Unknown(other.to_string()),
        }
    }

    /// Build the wire descriptor for a type.
    pub fn to_data_type(exasol_type: &ExasolType) -> DataType {
        match exasol_type {
            ExasolType::Boolean => DataType::named("BOOLEAN"),
            ExasolType::Char { size } => DataType {
                size: Some(*size),
                character_set: Some("UTF8".to_string()),
                ..DataType::named("CHAR")
            },
            ExasolType::Varchar { size } => DataType {
                size: Some(*size),
                character_set: Some("UTF8".to_string()),
                ..DataType::named("VARCHAR")
            },
            ExasolType::Decimal { precision, scale } => DataType {
                precision: Some(*precision),
                scale: Some(*scale),
                ..DataType::named("DECIMAL")
            },
            ExasolType::Double => DataType::named("DOUBLE"),
            ExasolType::Date => DataType::named("DATE"),
            ExasolType::Timestamp {
                with_local_time_zone,
            } => DataType {
                with_local_time_zone: Some(*with_local_time_zone),
                ..DataType::named("TIMESTAMP")
            },
            ExasolType::IntervalYearToMonth { precision } => DataType {
                precision: Some(*precision),
                ..DataType::named("INTERVAL YEAR TO MONTH")
            },
            ExasolType::IntervalDayToSecond { precision, fraction } => DataType {
                precision: Some(*precision),
                fraction: Some(*fraction),
                ..DataType::named("INTERVAL DAY TO SECOND")
            },
            ExasolType::Geometry { srid } => DataType {
                srid: *srid,
                ..DataType::named("GEOMETRY")
            },
            ExasolType::Hashtype { byte_size } => DataType {
                size: Some(*byte_size),
                ..DataType::named("HASHTYPE")
            },
            ExasolType::Unknown(name) => DataType::named(name.clone()),
        }
    }
}
