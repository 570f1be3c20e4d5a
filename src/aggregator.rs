//! ==============================================================================
//! aggregator.rs - periodic store poll feeding the published state
//! ==============================================================================
//!
//! every tick:
//!     1. read rows appended since the last cursor (first tick: whole store)
//!     2. fold them into the history series and latest values
//!     3. classify the newest reading
//!
//! a failed tick is logged and the next one tries again from the same cursor.
//! if the store file shrinks below the cursor, the published state is dropped
//! and rebuilt from the file's current contents.
//!
//! ==============================================================================

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::state::{Retention, SharedState};
use crate::store::{Cursor, RecordStore};

pub struct Aggregator {
    store: Arc<RecordStore>,
    state: SharedState,
    cursor: Cursor,
    retention: Retention,
    show_sensor_data: bool,
}

impl Aggregator {
    pub fn new(store: Arc<RecordStore>, state: SharedState, retention: Retention) -> Self {
        Self {
            store,
            state,
            cursor: Cursor::start(),
            retention,
            show_sensor_data: false,
        }
    }

    pub fn show_sensor_data(mut self, show: bool) -> Self {
        self.show_sensor_data = show;
        self
    }

    /// run one poll cycle, returning how many new rows were absorbed
    pub async fn tick(&mut self) -> Result<usize> {
        let store = self.store.clone();
        let cursor = self.cursor;
        let batch = tokio::task::spawn_blocking(move || store.read_since(cursor))
            .await
            .context("store read task failed")?
            .context("failed to read record store")?;

        self.cursor = batch.cursor;
        let count = batch.rows.len();
        if count == 0 && !batch.rewound {
            return Ok(0);
        }

        let mut state = self.state.write().await;
        if batch.rewound {
            // the store was replaced: rebuild from what it holds now
            state.rewind();
        }
        let previous = state.absorb(&batch.rows, self.retention);
        state.last_update_ms = now_ms();

        if let Some(previous) = previous {
            tracing::info!(
                ?previous,
                current = ?state.hazard_status,
                "hazard status changed"
            );
        }
        if self.show_sensor_data {
            tracing::info!(
                rows = count,
                latest = ?state.latest_values,
                hazard = ?state.hazard_status,
                "aggregated new readings"
            );
        }

        Ok(count)
    }

    /// tick forever at `period`
    pub async fn run(mut self, period: Duration) {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            interval.tick().await;
            if let Err(e) = self.tick().await {
                let error = format!("{e:#}");
                tracing::warn!(%error, "aggregator tick failed, retrying next cycle");
            }
        }
    }
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}
