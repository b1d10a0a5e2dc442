//! Decoded position reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One decoded tracker position, produced fresh per wire message.
///
/// Coordinates are signed decimal degrees and always finite (codecs reject
/// frames that would produce anything else). `speed` stays in the protocol's
/// native unit. `heading` carries the codec-native value - the GT-06 codec
/// emits the raw 10-bit course word (0-1023), and folding into [0,360)
/// is left to the store's last-position upsert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PositionReport {
    /// Latitude in decimal degrees
    pub latitude: f64,
    /// Longitude in decimal degrees
    pub longitude: f64,
    /// Speed in protocol-native units
    pub speed: f64,
    /// Heading in degrees (see type docs for the GT-06 caveat)
    pub heading: f64,
    /// Device-reported fix time, resolved to UTC
    pub timestamp: DateTime<Utc>,
    /// Ignition line state
    pub ignition: bool,
}

impl PositionReport {
    /// Heading folded into [0,360), the form persisted as last-known state.
    pub fn normalized_heading(&self) -> f64 {
        self.heading % 360.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn report(heading: f64) -> PositionReport {
        PositionReport {
            latitude: -23.5,
            longitude: -46.6,
            speed: 0.0,
            heading,
            timestamp: Utc.with_ymd_and_hms(2025, 8, 1, 12, 0, 0).unwrap(),
            ignition: false,
        }
    }

    #[test]
    fn heading_normalization_folds_ten_bit_course() {
        assert_eq!(report(0.0).normalized_heading(), 0.0);
        assert_eq!(report(359.0).normalized_heading(), 359.0);
        assert_eq!(report(360.0).normalized_heading(), 0.0);
        // Raw GT-06 course words above one revolution fold over
        assert_eq!(report(725.0).normalized_heading(), 5.0);
        assert_eq!(report(1023.0).normalized_heading(), 303.0);
    }
}
