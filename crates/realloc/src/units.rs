use serde::{Deserialize, Serialize};

/// Linear unit of a planar CRS.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinearUnit {
    #[default]
    Meter,
    /// US survey foot, as used by State Plane systems.
    Foot,
}

impl LinearUnit {
    pub fn area_unit(self) -> AreaUnit {
        match self {
            Self::Meter => AreaUnit::SquareMeter,
            Self::Foot => AreaUnit::SquareFoot,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AreaUnit {
    SquareMeter,
    SquareFoot,
    SquareKilometer,
    SquareMile,
    Acre,
}

impl AreaUnit {
    /// Size of one unit in square meters.
    fn square_meters(self) -> f64 {
        // 1 US survey foot = 1200/3937 m
        const SURVEY_FOOT: f64 = 1200.0 / 3937.0;
        match self {
            Self::SquareMeter => 1.0,
            Self::SquareFoot => SURVEY_FOOT * SURVEY_FOOT,
            Self::SquareKilometer => 1.0e6,
            Self::SquareMile => (5280.0 * SURVEY_FOOT) * (5280.0 * SURVEY_FOOT),
            Self::Acre => (5280.0 * SURVEY_FOOT) * (5280.0 * SURVEY_FOOT) / 640.0,
        }
    }
}

impl std::fmt::Display for AreaUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SquareMeter => write!(f, "square_meter"),
            Self::SquareFoot => write!(f, "square_foot"),
            Self::SquareKilometer => write!(f, "square_kilometer"),
            Self::SquareMile => write!(f, "square_mile"),
            Self::Acre => write!(f, "acre"),
        }
    }
}

pub fn convert(value: f64, from: AreaUnit, to: AreaUnit) -> f64 {
    if from == to {
        return value;
    }
    value * from.square_meters() / to.square_meters()
}
