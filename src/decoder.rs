//! Decoding of inbound report datagrams

use serde::Deserialize;
use serde_with::{serde_as, DefaultOnError, DisplayFromStr, PickFirst};

use crate::{errors::Rejected, models::LocationReport};

/// Datagram payload as sent by field devices
///
/// Numeric fields are accepted either as numbers or as numeric strings,
/// `null` counts as absent. A quality that is not a small non-negative
/// integer is dropped rather than failing the whole report.
#[serde_as]
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct WireReport {
    user_id: Option<String>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    latitude: Option<f64>,
    #[serde_as(as = "Option<PickFirst<(_, DisplayFromStr)>>")]
    longitude: Option<f64>,
    #[serde_as(as = "DefaultOnError<Option<PickFirst<(_, DisplayFromStr)>>>")]
    quality: Option<u8>,
    client_time: Option<String>,
}

/// Decode one datagram payload into a validated report
///
/// Missing coordinates default to `0.0`, missing quality and device time
/// stay absent. Reports outside the coordinate ranges are rejected.
pub fn decode(payload: &[u8]) -> Result<LocationReport, Rejected> {
    let wire: WireReport = serde_json::from_slice(payload).map_err(Rejected::Malformed)?;

    let source_id = match wire.user_id {
        Some(id) if !id.is_empty() => id,
        _ => return Err(Rejected::MissingSourceId),
    };

    let report = LocationReport {
        source_id,
        latitude: wire.latitude.unwrap_or(0.0),
        longitude: wire.longitude.unwrap_or(0.0),
        quality: wire.quality,
        source_time: wire.client_time,
    };

    report.validate()?;
    Ok(report)
}
