//! ==============================================================================
//! state.rs - in-memory view published to the dashboard
//! ==============================================================================
//!
//! this is derived state: it can always be rebuilt from the record store.
//! the aggregator is the only writer; http handlers take a read lock and
//! serialize it.
//!
//! serialized shape (GET /data):
//!
//!     {
//!       "MQ7": [..], "Flame": [..], ..., "Water_Level": [..], ..., "Timestamp": [..],
//!       "latest_values": { "MQ7": v, ..., "Water_Level": v, ... },
//!       "hazard_status": { "Flood": b, "Fire": b, "Air Quality": b }
//!     }
//!
//! ==============================================================================

use std::collections::VecDeque;
use std::sync::Arc;

use serde::ser::{Serialize, SerializeMap, Serializer};
use tokio::sync::RwLock;

use crate::domain::{Metric, Reading};
use crate::hazard::{self, HazardVerdict};

pub type SharedState = Arc<RwLock<HubState>>;

/// how many points each history series keeps
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Retention {
    #[default]
    Unbounded,
    Last(usize),
}

impl From<Option<usize>> for Retention {
    fn from(limit: Option<usize>) -> Self {
        limit.map_or(Retention::Unbounded, Retention::Last)
    }
}

/// parallel per-metric series, one entry per stored reading
#[derive(Debug, Clone, Default, PartialEq)]
pub struct History {
    series: [VecDeque<Option<f64>>; 8],
    timestamps: VecDeque<String>,
}

impl History {
    pub fn len(&self) -> usize {
        self.timestamps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }

    pub fn series(&self, metric: Metric) -> &VecDeque<Option<f64>> {
        &self.series[metric.index()]
    }

    pub fn timestamps(&self) -> &VecDeque<String> {
        &self.timestamps
    }

    fn push(&mut self, reading: &Reading, retention: Retention) {
        for metric in Metric::ALL {
            self.series[metric.index()].push_back(reading.get(metric));
        }
        self.timestamps.push_back(reading.formatted_timestamp());

        if let Retention::Last(limit) = retention {
            while self.timestamps.len() > limit {
                self.timestamps.pop_front();
                for series in &mut self.series {
                    series.pop_front();
                }
            }
        }
    }
}

impl Serialize for History {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Metric::ALL.len() + 1))?;
        for metric in Metric::ALL {
            map.serialize_entry(metric.published_key(), &self.series[metric.index()])?;
        }
        map.serialize_entry("Timestamp", &self.timestamps)?;
        map.end()
    }
}

/// newest value of every metric
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LatestValues([Option<f64>; 8]);

impl LatestValues {
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.0[metric.index()]
    }
}

impl From<&Reading> for LatestValues {
    fn from(reading: &Reading) -> Self {
        Self(*reading.values())
    }
}

impl Serialize for LatestValues {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(Metric::ALL.len()))?;
        for metric in Metric::ALL {
            map.serialize_entry(metric.published_key(), &self.0[metric.index()])?;
        }
        map.end()
    }
}

#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct HubState {
    #[serde(flatten)]
    pub history: History,
    pub latest_values: LatestValues,
    pub hazard_status: HazardVerdict,
    /// rows absorbed since startup
    #[serde(skip)]
    pub rows_ingested: usize,
    /// unix timestamp (ms) of the last tick that found new rows
    #[serde(skip)]
    pub last_update_ms: u64,
}

impl HubState {
    pub fn shared() -> SharedState {
        Arc::new(RwLock::new(Self::default()))
    }

    /// forget everything derived from the store; `rows_ingested` keeps counting
    pub fn rewind(&mut self) {
        self.history = History::default();
        self.latest_values = LatestValues::default();
        self.hazard_status = HazardVerdict::default();
    }

    /// fold newly stored readings in; the newest one drives the verdict
    ///
    /// returns the previous verdict when it changed
    pub fn absorb(&mut self, rows: &[Reading], retention: Retention) -> Option<HazardVerdict> {
        let newest = rows.last()?;
        for reading in rows {
            self.history.push(reading, retention);
        }
        self.rows_ingested += rows.len();
        self.latest_values = LatestValues::from(newest);

        let verdict = hazard::classify(newest);
        let previous = std::mem::replace(&mut self.hazard_status, verdict);
        (previous != verdict).then_some(previous)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn reading(sec: u32) -> Reading {
        let ts = NaiveDate::from_ymd_opt(2024, 5, 1)
            .unwrap()
            .and_hms_opt(10, 0, sec)
            .unwrap();
        Reading::new(ts)
    }

    #[test]
    fn test_absorb_appends_every_row_and_tracks_newest() {
        let mut state = HubState::default();
        let rows = vec![
            reading(0).with(Metric::Rain, 1.0),
            reading(1).with(Metric::Rain, 2.0).with(Metric::Mq7, 7.0),
        ];
        state.absorb(&rows, Retention::Unbounded);

        assert_eq!(state.history.len(), 2);
        assert_eq!(
            state.history.series(Metric::Rain),
            &VecDeque::from([Some(1.0), Some(2.0)])
        );
        assert_eq!(state.history.series(Metric::Mq7), &VecDeque::from([None, Some(7.0)]));
        assert_eq!(state.latest_values.get(Metric::Mq7), Some(7.0));
        assert_eq!(state.rows_ingested, 2);
    }

    #[test]
    fn test_absorb_nothing_changes_nothing() {
        let mut state = HubState::default();
        state.absorb(&[reading(0).with(Metric::Flame, 10.0)], Retention::Unbounded);
        let before = serde_json::to_value(&state).unwrap();
        assert_eq!(state.absorb(&[], Retention::Unbounded), None);
        assert_eq!(serde_json::to_value(&state).unwrap(), before);
    }

    #[test]
    fn test_retention_drops_oldest_in_lock_step() {
        let mut state = HubState::default();
        let rows: Vec<_> = (0..5).map(|i| reading(i).with(Metric::Soil, i as f64)).collect();
        state.absorb(&rows, Retention::Last(3));

        assert_eq!(state.history.len(), 3);
        assert_eq!(
            state.history.series(Metric::Soil),
            &VecDeque::from([Some(2.0), Some(3.0), Some(4.0)])
        );
        for metric in Metric::ALL {
            assert_eq!(state.history.series(metric).len(), 3);
        }
        assert_eq!(state.history.timestamps()[0], "2024-05-01 10:00:02");
    }

    #[test]
    fn test_absorb_reports_verdict_change() {
        let mut state = HubState::default();
        let changed = state.absorb(&[reading(0).with(Metric::Flame, 100.0)], Retention::Unbounded);
        assert_eq!(changed, Some(HazardVerdict::default()));
        assert!(state.hazard_status.fire);

        let unchanged = state.absorb(&[reading(1).with(Metric::Flame, 200.0)], Retention::Unbounded);
        assert_eq!(unchanged, None);
    }

    #[test]
    fn test_rewind_clears_derived_state() {
        let mut state = HubState::default();
        state.absorb(&[reading(0).with(Metric::Flame, 10.0)], Retention::Unbounded);
        state.rewind();

        assert!(state.history.is_empty());
        assert_eq!(state.latest_values.get(Metric::Flame), None);
        assert_eq!(state.hazard_status, HazardVerdict::default());
        assert_eq!(state.rows_ingested, 1);
    }

    #[test]
    fn test_document_shape() {
        let mut state = HubState::default();
        state.absorb(
            &[reading(0)
                .with(Metric::WaterLevel, 150.0)
                .with(Metric::Mq7, 1.0)
                .with(Metric::Mq135, 9_001.0)],
            Retention::Unbounded,
        );

        let doc = serde_json::to_value(&state).unwrap();
        let object = doc.as_object().unwrap();
        let mut keys: Vec<_> = object.keys().map(String::as_str).collect();
        keys.sort_unstable();
        assert_eq!(
            keys,
            [
                "Flame",
                "Humidity",
                "MQ135",
                "MQ7",
                "Rain",
                "Soil",
                "Temp",
                "Timestamp",
                "Water_Level",
                "hazard_status",
                "latest_values",
            ]
        );
        assert_eq!(doc["Water_Level"], serde_json::json!([150.0]));
        assert_eq!(doc["Temp"], serde_json::json!([null]));
        assert_eq!(doc["Timestamp"], serde_json::json!(["2024-05-01 10:00:00"]));
        assert_eq!(doc["latest_values"]["Water_Level"], serde_json::json!(150.0));
        assert_eq!(doc["latest_values"].as_object().unwrap().len(), 8);
        assert_eq!(doc["hazard_status"]["Air Quality"], serde_json::json!(true));
    }
}
