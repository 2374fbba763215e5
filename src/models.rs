//! Data models.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::Rejected;

/// A single validated fix, as decoded from one datagram
#[derive(Debug, Clone, PartialEq)]
pub struct LocationReport {
    /// Identifier of the reporting device, never empty
    pub source_id: String,
    /// Latitude in decimal degrees, within -90..=90
    pub latitude: f64,
    /// Longitude in decimal degrees, within -180..=180
    pub longitude: f64,
    /// Fix quality indicator, e.g. the GGA quality field
    pub quality: Option<u8>,
    /// Timestamp supplied by the device, passed through as is
    pub source_time: Option<String>,
}

impl LocationReport {
    /// Check the coordinate ranges; NaN never passes
    pub fn validate(&self) -> Result<(), Rejected> {
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(Rejected::LatitudeOutOfRange(self.latitude));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(Rejected::LongitudeOutOfRange(self.longitude));
        }
        Ok(())
    }
}

/// Latest known position of one source, as held by the location table
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocationRecord {
    #[serde(rename = "user_id")]
    pub source_id: String,
    pub latitude: f64,
    pub longitude: f64,
    pub quality: Option<u8>,
    /// Time the relay accepted the report
    #[serde(rename = "timestamp")]
    pub server_time: DateTime<Utc>,
    #[serde(rename = "client_time")]
    pub source_time: Option<String>,
}

impl LocationRecord {
    /// Create a record from an accepted report, stamped with the current time
    pub fn new(report: LocationReport) -> Self {
        Self::with_server_time(report, Utc::now())
    }

    pub fn with_server_time(report: LocationReport, server_time: DateTime<Utc>) -> Self {
        Self {
            source_id: report.source_id,
            latitude: report.latitude,
            longitude: report.longitude,
            quality: report.quality,
            server_time,
            source_time: report.source_time,
        }
    }
}

/// Messages pushed to viewers
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ViewerMessage {
    /// Greeting sent once right after the handshake
    Status { message: String, client_count: usize },
    /// Full snapshot of the location table
    LocationUpdate {
        timestamp: DateTime<Utc>,
        client_count: usize,
        locations: HashMap<String, LocationRecord>,
    },
}

impl ViewerMessage {
    pub fn status(message: impl Into<String>, client_count: usize) -> Self {
        Self::Status {
            message: message.into(),
            client_count,
        }
    }

    pub fn location_update(
        client_count: usize,
        locations: HashMap<String, LocationRecord>,
    ) -> Self {
        Self::LocationUpdate {
            timestamp: Utc::now(),
            client_count,
            locations,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(latitude: f64, longitude: f64) -> LocationReport {
        LocationReport {
            source_id: "client1".to_string(),
            latitude,
            longitude,
            quality: Some(4),
            source_time: None,
        }
    }

    #[test]
    fn range_bounds_are_inclusive() {
        assert!(report(90.0, 180.0).validate().is_ok());
        assert!(report(-90.0, -180.0).validate().is_ok());
        assert!(matches!(
            report(90.0001, 0.0).validate(),
            Err(Rejected::LatitudeOutOfRange(_))
        ));
        assert!(matches!(
            report(0.0, -180.5).validate(),
            Err(Rejected::LongitudeOutOfRange(_))
        ));
        assert!(report(f64::NAN, 0.0).validate().is_err());
    }

    #[test]
    fn serialize_status() {
        let json = serde_json::to_value(ViewerMessage::status("Connected to server", 2)).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "status",
                "message": "Connected to server",
                "client_count": 2
            })
        );
    }

    #[test]
    fn serialize_location_update() {
        let server_time = Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap();
        let record = LocationRecord::with_server_time(report(37.5, 127.0), server_time);
        let message = ViewerMessage::LocationUpdate {
            timestamp: server_time,
            client_count: 1,
            locations: HashMap::from([("client1".to_string(), record)]),
        };

        let json = serde_json::to_value(&message).unwrap();
        assert_eq!(json["type"], "location_update");
        assert_eq!(json["client_count"], 1);
        assert_eq!(json["timestamp"], "2025-03-01T12:00:00Z");

        let location = &json["locations"]["client1"];
        assert_eq!(location["user_id"], "client1");
        assert_eq!(location["latitude"], 37.5);
        assert_eq!(location["longitude"], 127.0);
        assert_eq!(location["quality"], 4);
        assert_eq!(location["timestamp"], "2025-03-01T12:00:00Z");
        assert!(location["client_time"].is_null());
    }
}
