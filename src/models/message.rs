use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Deserializer};

use super::{ConductorId, PositionSample};
use crate::watcher::{GeolocationError, PositionEvent};

/// Payload published on the position feed by a conductor's device.
#[derive(Debug, Deserialize)]
pub struct FixMessage {
    #[serde(alias = "driver_id")]
    pub conductor_id: ConductorId,
    #[serde(alias = "lat", default, deserialize_with = "parse_f64_option")]
    pub latitude: Option<f64>,
    #[serde(alias = "lng", alias = "lon", default, deserialize_with = "parse_f64_option")]
    pub longitude: Option<f64>,
    #[serde(default, deserialize_with = "parse_f64_option")]
    pub accuracy: Option<f64>,
    pub timestamp: Option<String>,
    /// Platform geolocation error code: 1 denied, 2 unavailable, 3 timeout.
    pub error_code: Option<u8>,
    pub error_message: Option<String>,
}

impl FixMessage {
    /// Converts the payload into a watcher event. Returns `None` when the
    /// message carries neither a usable fix nor a known error code.
    pub fn to_event(&self, received_at: DateTime<Utc>) -> Option<PositionEvent> {
        if let Some(code) = self.error_code {
            return GeolocationError::from_code(code).map(PositionEvent::Error);
        }

        let (latitude, longitude) = (self.latitude?, self.longitude?);
        let captured_at = self
            .timestamp
            .as_deref()
            .and_then(parse_timestamp)
            .unwrap_or(received_at);

        Some(PositionEvent::Fix(PositionSample {
            latitude,
            longitude,
            accuracy: self.accuracy,
            captured_at,
        }))
    }
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if let Ok(t) = DateTime::parse_from_rfc3339(raw) {
        return Some(t.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
        .or_else(|_| NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S"))
        .map(|t| t.and_utc())
        .ok()
}

fn parse_f64_option<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrFloat {
        String(String),
        Float(f64),
    }

    let v: Option<StringOrFloat> = Option::deserialize(deserializer)?;
    match v {
        Some(StringOrFloat::Float(f)) => Ok(Some(f)),
        Some(StringOrFloat::String(s)) => {
            if s.trim().is_empty() {
                Ok(None)
            } else {
                s.trim().parse::<f64>().map(Some).map_err(serde::de::Error::custom)
            }
        }
        None => Ok(None),
    }
}
