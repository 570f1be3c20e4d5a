//! ==============================================================================
//! hazard.rs - threshold rules for the newest reading
//! ==============================================================================
//!
//! rules (all comparisons strict):
//!     flood        rain < 40000 and water level < 200 and soil < 40000
//!     fire         flame present and (flame < 3500 or temp / 10 > 31)
//!     air quality  mq7 present and mq135 > 9000
//!
//! a missing input never raises an error, it just means that hazard is not
//! asserted.
//!
//! ==============================================================================

use serde::Serialize;

use crate::domain::{Metric, Reading};

pub const FLOOD_RAIN_BELOW: f64 = 40_000.0;
pub const FLOOD_WATER_LEVEL_BELOW: f64 = 200.0;
pub const FLOOD_SOIL_BELOW: f64 = 40_000.0;

pub const FIRE_FLAME_BELOW: f64 = 3_500.0;
/// compared against Temp / 10, the sensor reports tenths
pub const FIRE_TEMP_ABOVE: f64 = 31.0;

pub const AIR_MQ135_ABOVE: f64 = 9_000.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HazardVerdict {
    #[serde(rename = "Flood")]
    pub flood: bool,
    #[serde(rename = "Fire")]
    pub fire: bool,
    #[serde(rename = "Air Quality")]
    pub air_quality: bool,
}

pub fn classify(reading: &Reading) -> HazardVerdict {
    HazardVerdict {
        flood: flood(reading),
        fire: fire(reading),
        air_quality: air_quality(reading),
    }
}

fn flood(reading: &Reading) -> bool {
    match (
        reading.get(Metric::Rain),
        reading.get(Metric::WaterLevel),
        reading.get(Metric::Soil),
    ) {
        (Some(rain), Some(water), Some(soil)) => {
            rain < FLOOD_RAIN_BELOW && water < FLOOD_WATER_LEVEL_BELOW && soil < FLOOD_SOIL_BELOW
        }
        _ => false,
    }
}

fn fire(reading: &Reading) -> bool {
    let Some(flame) = reading.get(Metric::Flame) else {
        return false;
    };
    let hot = reading
        .get(Metric::Temp)
        .is_some_and(|temp| temp / 10.0 > FIRE_TEMP_ABOVE);

    flame < FIRE_FLAME_BELOW || hot
}

// MQ7 only gates: its value is never compared.
fn air_quality(reading: &Reading) -> bool {
    reading.get(Metric::Mq7).is_some()
        && reading
            .get(Metric::Mq135)
            .is_some_and(|mq135| mq135 > AIR_MQ135_ABOVE)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reading() -> Reading {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        Reading::new(ts)
    }

    fn flood_inputs(water: f64) -> Reading {
        reading()
            .with(Metric::Rain, 39_999.0)
            .with(Metric::WaterLevel, water)
            .with(Metric::Soil, 39_999.0)
    }

    #[test]
    fn test_empty_reading_is_safe() {
        assert_eq!(classify(&reading()), HazardVerdict::default());
    }

    #[test]
    fn test_flood_strict_boundary() {
        assert!(classify(&flood_inputs(199.0)).flood);
        assert!(!classify(&flood_inputs(200.0)).flood);
    }

    #[test]
    fn test_flood_needs_all_three_inputs() {
        let r = reading()
            .with(Metric::Rain, 1.0)
            .with(Metric::WaterLevel, 1.0);
        assert!(!classify(&r).flood);
    }

    #[test]
    fn test_fire_from_flame_alone() {
        let r = reading().with(Metric::Flame, 3_499.0);
        assert!(classify(&r).fire);
        let r = reading().with(Metric::Flame, 3_499.0).with(Metric::Temp, 0.0);
        assert!(classify(&r).fire);
    }

    #[test]
    fn test_fire_from_temperature_tenths() {
        let r = reading().with(Metric::Flame, 4_000.0).with(Metric::Temp, 320.0);
        assert!(classify(&r).fire);
        let r = reading().with(Metric::Flame, 4_000.0).with(Metric::Temp, 300.0);
        assert!(!classify(&r).fire);
        // 310 / 10 == 31, not above
        let r = reading().with(Metric::Flame, 4_000.0).with(Metric::Temp, 310.0);
        assert!(!classify(&r).fire);
    }

    #[test]
    fn test_fire_needs_flame_present() {
        let r = reading().with(Metric::Temp, 900.0);
        assert!(!classify(&r).fire);
    }

    #[test]
    fn test_air_quality_gated_on_mq7_presence() {
        let r = reading().with(Metric::Mq135, 9_001.0).with(Metric::Mq7, 0.0);
        assert!(classify(&r).air_quality);
        let r = reading().with(Metric::Mq135, 9_001.0);
        assert!(!classify(&r).air_quality);
        let r = reading().with(Metric::Mq135, 9_000.0).with(Metric::Mq7, 5.0);
        assert!(!classify(&r).air_quality);
    }

    #[test]
    fn test_verdict_serializes_with_display_keys() {
        let json = serde_json::to_value(HazardVerdict {
            flood: true,
            fire: false,
            air_quality: true,
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"Flood": true, "Fire": false, "Air Quality": true})
        );
    }
}
