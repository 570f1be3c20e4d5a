use std::collections::BTreeMap;

use chrono::NaiveDateTime;

/// format of the Timestamp column and of the published Timestamp series
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// the fixed sensor schema
///
/// declaration order is the column order of the record store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Metric {
    Mq7,
    Flame,
    Temp,
    Humidity,
    WaterLevel,
    Soil,
    Rain,
    Mq135,
}

impl Metric {
    pub const ALL: [Metric; 8] = [
        Metric::Mq7,
        Metric::Flame,
        Metric::Temp,
        Metric::Humidity,
        Metric::WaterLevel,
        Metric::Soil,
        Metric::Rain,
        Metric::Mq135,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// header name in the record store
    pub fn column(self) -> &'static str {
        match self {
            Metric::Mq7 => "MQ7",
            Metric::Flame => "Flame",
            Metric::Temp => "Temp",
            Metric::Humidity => "Humidity",
            Metric::WaterLevel => "WaterLevel",
            Metric::Soil => "Soil",
            Metric::Rain => "Rain",
            Metric::Mq135 => "MQ135",
        }
    }

    /// key in the published state document
    pub fn published_key(self) -> &'static str {
        match self {
            Metric::WaterLevel => "Water_Level",
            other => other.column(),
        }
    }

    /// bind a frame key to the schema
    ///
    /// nodes spell keys loosely ("MQ-135", "Water Level"), so matching ignores
    /// case and anything that is not a letter or digit.
    pub fn from_key(key: &str) -> Option<Metric> {
        let folded: String = key
            .chars()
            .filter(|c| c.is_ascii_alphanumeric())
            .map(|c| c.to_ascii_lowercase())
            .collect();

        match folded.as_str() {
            "mq7" => Some(Metric::Mq7),
            "flame" => Some(Metric::Flame),
            "temp" => Some(Metric::Temp),
            "humidity" => Some(Metric::Humidity),
            "waterlevel" => Some(Metric::WaterLevel),
            "soil" => Some(Metric::Soil),
            "rain" => Some(Metric::Rain),
            "mq135" => Some(Metric::Mq135),
            _ => None,
        }
    }
}

/// one stored sample set, stamped with the time it was ingested
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    values: [Option<f64>; 8],
    /// wall-clock ingestion time (nodes do not timestamp)
    pub timestamp: NaiveDateTime,
    /// keys outside the schema, kept verbatim and never classified
    pub extra: BTreeMap<String, String>,
}

impl Reading {
    pub fn new(timestamp: NaiveDateTime) -> Self {
        Self {
            values: [None; 8],
            timestamp,
            extra: BTreeMap::new(),
        }
    }

    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.values[metric.index()]
    }

    pub fn set(&mut self, metric: Metric, value: Option<f64>) {
        self.values[metric.index()] = value;
    }

    pub fn with(mut self, metric: Metric, value: f64) -> Self {
        self.set(metric, Some(value));
        self
    }

    pub fn values(&self) -> &[Option<f64>; 8] {
        &self.values
    }

    pub fn formatted_timestamp(&self) -> String {
        self.timestamp.format(TIMESTAMP_FORMAT).to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_aliases() {
        assert_eq!(Metric::from_key("MQ-135"), Some(Metric::Mq135));
        assert_eq!(Metric::from_key("Water Level"), Some(Metric::WaterLevel));
        assert_eq!(Metric::from_key("Water_Level"), Some(Metric::WaterLevel));
        assert_eq!(Metric::from_key("mq7"), Some(Metric::Mq7));
        assert_eq!(Metric::from_key("Pressure"), None);
        assert_eq!(Metric::from_key(""), None);
    }

    #[test]
    fn test_column_order_matches_declaration() {
        let columns: Vec<_> = Metric::ALL.iter().map(|m| m.column()).collect();
        assert_eq!(
            columns,
            ["MQ7", "Flame", "Temp", "Humidity", "WaterLevel", "Soil", "Rain", "MQ135"]
        );
        for (i, metric) in Metric::ALL.iter().enumerate() {
            assert_eq!(metric.index(), i);
        }
    }

    #[test]
    fn test_published_key_renames_water_level_only() {
        assert_eq!(Metric::WaterLevel.published_key(), "Water_Level");
        assert_eq!(Metric::Mq135.published_key(), "MQ135");
    }
}
