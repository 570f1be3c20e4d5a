//! ==============================================================================
//! frame.rs - tolerant parser for ascii telemetry frames
//! ==============================================================================
//!
//! wire format:
//!     [UART:]key:value, key:value, ...
//!
//!     e.g. "UART:MQ-135:51234, Soil:40211, Rain:38890\n"
//!
//! rules:
//!     - only a payload that is not utf-8 is rejected as a whole
//!     - tokens are split on the FIRST colon, values may contain colons
//!     - a token without a colon or with an empty key is skipped and logged
//!     - repeated keys keep the last value, alias spellings included
//!     - numeric fields keep only their ascii digits (see `extract_digits`)
//!
//! ==============================================================================

use std::collections::BTreeMap;

use chrono::NaiveDateTime;

use crate::domain::{Metric, Reading};
use crate::error::FrameError;

/// key/value pairs recovered from one payload, in key order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frame {
    pub fields: BTreeMap<String, String>,
    /// number of tokens dropped as malformed
    pub skipped: usize,
}

#[derive(Debug, Clone)]
pub struct FrameParser {
    prefixes: Vec<String>,
}

impl Default for FrameParser {
    fn default() -> Self {
        Self::new(vec!["UART:".to_string()])
    }
}

impl FrameParser {
    pub fn new(prefixes: Vec<String>) -> Self {
        Self { prefixes }
    }

    pub fn parse(&self, raw: &[u8]) -> Result<Frame, FrameError> {
        let text = std::str::from_utf8(raw)?.trim();
        let body = self
            .prefixes
            .iter()
            .find_map(|prefix| text.strip_prefix(prefix.as_str()))
            .unwrap_or(text);

        let mut frame = Frame::default();
        for token in body.split(',') {
            let token = token.trim();
            if token.is_empty() {
                continue;
            }

            match token.split_once(':') {
                Some((key, value)) if !key.trim().is_empty() => {
                    let key = key.trim();
                    // a later spelling of the same metric replaces the earlier one
                    if let Some(metric) = Metric::from_key(key) {
                        frame
                            .fields
                            .retain(|seen, _| Metric::from_key(seen) != Some(metric));
                    }
                    frame.fields.insert(key.to_string(), value.trim().to_string());
                }
                _ => {
                    tracing::warn!(token, "skipping invalid token");
                    frame.skipped += 1;
                }
            }
        }

        Ok(frame)
    }
}

impl Frame {
    /// bind the frame to the schema, stamped with the ingestion time
    pub fn into_reading(self, timestamp: NaiveDateTime) -> Reading {
        let mut reading = Reading::new(timestamp);
        for (key, value) in self.fields {
            match Metric::from_key(&key) {
                Some(metric) => {
                    let number = extract_digits(&value);
                    if number.is_none() {
                        tracing::debug!(key, value, "field has no numeric value");
                    }
                    reading.set(metric, number);
                }
                None => {
                    reading.extra.insert(key, value);
                }
            }
        }
        reading
    }
}

/// keep the ascii digits of `value` and read them as a number
///
/// this is lossy on purpose: node firmware mixes units and signs into the
/// value, so "150 mm" gives 150, but "-5" also gives 5 and "25.5" gives 255.
/// a value with no digits at all is absent, never zero.
pub fn extract_digits(value: &str) -> Option<f64> {
    let digits: String = value.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.is_empty() {
        return None;
    }
    digits.parse::<f64>().ok().filter(|n| n.is_finite())
}
