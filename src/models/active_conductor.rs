use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use super::ConductorId;
use crate::geo::GeoPoint;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConductorStatus {
    Available,
    Busy,
    OnTour,
    Offline,
}

impl ConductorStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConductorStatus::Available => "available",
            ConductorStatus::Busy => "busy",
            ConductorStatus::OnTour => "on_tour",
            ConductorStatus::Offline => "offline",
        }
    }
}

impl fmt::Display for ConductorStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ConductorStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "available" => Ok(ConductorStatus::Available),
            "busy" => Ok(ConductorStatus::Busy),
            "on_tour" | "on-tour" | "ontour" => Ok(ConductorStatus::OnTour),
            "offline" => Ok(ConductorStatus::Offline),
            other => Err(format!("unknown conductor status '{other}'")),
        }
    }
}

/// Row of `active_conductors`. Position columns stay NULL until the first
/// accepted fix is published.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ActiveConductor {
    pub conductor_id: ConductorId,
    pub is_active: bool,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub is_available: bool,
    pub status: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_ping: Option<DateTime<Utc>>,
}

impl ActiveConductor {
    pub fn status(&self) -> Option<ConductorStatus> {
        self.status.parse().ok()
    }

    pub fn position(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Live,
    /// Last update is older than the staleness window; treat as stopped.
    Stale,
    /// Never published a position.
    Unknown,
}

/// Directory entry: an active row joined with the conductor's display data.
#[derive(Debug, Clone, PartialEq, FromRow, Serialize)]
pub struct ActiveConductorView {
    pub conductor_id: ConductorId,
    pub name: String,
    pub whatsapp: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub is_available: bool,
    pub status: String,
    pub updated_at: Option<DateTime<Utc>>,
    pub last_ping: Option<DateTime<Utc>>,
}

impl ActiveConductorView {
    pub fn from_record(record: &ActiveConductor, name: String, whatsapp: Option<String>) -> Self {
        Self {
            conductor_id: record.conductor_id,
            name,
            whatsapp,
            latitude: record.latitude,
            longitude: record.longitude,
            accuracy: record.accuracy,
            is_available: record.is_available,
            status: record.status.clone(),
            updated_at: record.updated_at,
            last_ping: record.last_ping,
        }
    }

    pub fn status(&self) -> Option<ConductorStatus> {
        self.status.parse().ok()
    }

    pub fn position(&self) -> Option<GeoPoint> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lng)) => Some(GeoPoint::new(lat, lng)),
            _ => None,
        }
    }

    pub fn freshness(&self, now: DateTime<Utc>, stale_after: Duration) -> Freshness {
        match (self.position(), self.updated_at) {
            (Some(_), Some(updated_at)) if now - updated_at <= stale_after => Freshness::Live,
            (Some(_), Some(_)) => Freshness::Stale,
            _ => Freshness::Unknown,
        }
    }
}
