use serde::Serialize;

use crate::aqi::EnrichedReading;

pub const NO_DATA_MESSAGE: &str = "No data available";

/// Message delivered to realtime connections, tagged by `type` on the wire.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum HubMessage {
    /// First message on a new connection when a reading is known.
    Snapshot { data: EnrichedReading },
    /// A newly detected reading.
    Update { data: EnrichedReading },
    /// First message on a new connection when no reading exists anywhere.
    NoData { message: String },
}

impl HubMessage {
    pub fn no_data() -> Self {
        HubMessage::NoData {
            message: NO_DATA_MESSAGE.to_string(),
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reading::{CanonicalReading, Pollutants};
    use chrono::{TimeZone, Utc};
    use serde_json::Value;

    #[test]
    fn test_no_data_wire_format() {
        let json: Value = serde_json::from_str(&HubMessage::no_data().to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "no_data");
        assert_eq!(json["message"], NO_DATA_MESSAGE);
    }

    #[test]
    fn test_update_wire_format() {
        let reading = CanonicalReading::new(
            Utc.with_ymd_and_hms(2025, 1, 1, 0, 0, 0).unwrap(),
            Pollutants {
                pm2_5: 35.4,
                ..Default::default()
            },
        );
        let msg = HubMessage::Update {
            data: EnrichedReading::from_reading(reading),
        };
        let json: Value = serde_json::from_str(&msg.to_json().unwrap()).unwrap();
        assert_eq!(json["type"], "update");
        assert_eq!(json["data"]["timestamp"], "2025-01-01T00:00:00Z");
        assert_eq!(json["data"]["pollutants"]["pm2_5"], 35.4);
        assert_eq!(json["data"]["aqi"]["overall"], 100);
        assert_eq!(json["data"]["category"], "moderate");
    }
}
