//! Suntech ST300-family ASCII message codec.
//!
//! Messages are semicolon-separated fields terminated by `\r` or `\n`; the
//! first field is a fixed prefix naming the message kind. For the
//! position-bearing kinds the interesting fields sit at stable indexes:
//!
//! ```text
//! 0        1          4         5         7    8    9      10
//! ST300STT;<deviceid>;...;<YYYYMMDD>;<HH:MM:SS>;...;<lat>;<lon>;<speed>;<heading>;...;<io>
//! ```
//!
//! Ignition resolution is layered: alert/emergency messages carry an event
//! code at field 16 that can assert the ignition state outright (40 on,
//! 41 off, 3 off on battery disconnect, 7 defers to I/O); every other case
//! falls back to the trailing I/O status field where `1` means ignition-on.

use bytes::BytesMut;
use chrono::{DateTime, NaiveDate, NaiveTime, TimeZone, Utc};
use tokio_util::codec::Decoder;
use tracing::trace;

use fleet_model::PositionReport;

use crate::error::TrackSrvError;

/// Placeholder id used when NAKing a message we could not attribute
pub const UNKNOWN_DEVICE: &str = "UNKNOWN";

/// Field index of the device date (`YYYYMMDD`)
const FIELD_DATE: usize = 4;
/// Field index of the device time (`HH:MM:SS`)
const FIELD_TIME: usize = 5;
/// Field index of latitude
const FIELD_LAT: usize = 7;
/// Field index of longitude
const FIELD_LON: usize = 8;
/// Field index of speed
const FIELD_SPEED: usize = 9;
/// Field index of heading
const FIELD_HEADING: usize = 10;
/// Field index of the alert/emergency event code
const FIELD_EVENT_CODE: usize = 16;
/// Minimum field count for a position-bearing message
const MIN_POSITION_FIELDS: usize = 8;

/// Message kinds recognized by prefix.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    /// `ST300ALV` keep-alive, no position payload
    Heartbeat,
    /// `ST300GPS` / `ST300STT` periodic position/status report
    Position,
    /// `ST300CMD` response to an operator command
    CommandEcho,
    /// `ST300ALT` alert report
    Alert,
    /// `ST300EMG` emergency report
    Emergency,
    /// Anything else
    Unknown,
}

/// Identify a message by its prefix.
pub fn classify(message: &str) -> MessageKind {
    if message.starts_with("ST300ALV") {
        MessageKind::Heartbeat
    } else if message.starts_with("ST300GPS") || message.starts_with("ST300STT") {
        MessageKind::Position
    } else if message.starts_with("ST300CMD") {
        MessageKind::CommandEcho
    } else if message.starts_with("ST300ALT") {
        MessageKind::Alert
    } else if message.starts_with("ST300EMG") {
        MessageKind::Emergency
    } else {
        MessageKind::Unknown
    }
}

/// Pull the device identifier out of a recognized message.
///
/// Command echoes prepend a `Res` marker (`ST300CMD;Res;<id>;...`), shifting
/// the id one field to the right.
pub fn extract_device_id(message: &str) -> Option<String> {
    if classify(message) == MessageKind::Unknown {
        return None;
    }
    let index = if message.starts_with("ST300CMD;Res;") {
        2
    } else {
        1
    };
    let id = message.split(';').nth(index)?.trim();
    if id.is_empty() {
        None
    } else {
        Some(id.to_string())
    }
}

/// Decode a position-bearing message into a report.
///
/// Individual fields degrade gracefully (an unparsable coordinate becomes
/// 0.0, an unparsable timestamp becomes "now"), matching how the deployed
/// fleet behaves on firmware variations; only a message too short to carry
/// position fields at all fails outright.
pub fn decode(message: &str) -> Option<PositionReport> {
    let parts: Vec<&str> = message.split(';').collect();
    if parts.len() < MIN_POSITION_FIELDS {
        return None;
    }

    let field_f64 = |index: usize| -> f64 {
        parts
            .get(index)
            .and_then(|raw| raw.trim().parse::<f64>().ok())
            .unwrap_or(0.0)
    };

    let latitude = field_f64(FIELD_LAT);
    let longitude = field_f64(FIELD_LON);
    let speed = field_f64(FIELD_SPEED);
    let heading = field_f64(FIELD_HEADING);

    let kind = classify(message);
    let event_code = if matches!(kind, MessageKind::Alert | MessageKind::Emergency) {
        parts
            .get(FIELD_EVENT_CODE)
            .and_then(|raw| raw.trim().parse::<i32>().ok())
    } else {
        None
    };
    let io_status = parts
        .last()
        .and_then(|raw| raw.trim().parse::<i32>().ok());

    let ignition = match event_code {
        Some(40) => true,          // ignition-on event
        Some(41) => false,         // ignition-off event
        Some(3) => false,          // main battery disconnected
        Some(7) => io_status == Some(1), // movement/shock: trust the I/O line
        _ => io_status == Some(1),
    };

    let timestamp = match (parts.get(FIELD_DATE), parts.get(FIELD_TIME)) {
        (Some(date), Some(time)) => {
            parse_device_datetime(date, time).unwrap_or_else(|| {
                trace!(date = %date, time = %time, "unparsable device timestamp, using wall clock");
                Utc::now()
            })
        },
        _ => Utc::now(),
    };

    Some(PositionReport {
        latitude,
        longitude,
        speed,
        heading,
        timestamp,
        ignition,
    })
}

/// Combine the device's `YYYYMMDD` and `HH:MM:SS` fields into UTC.
fn parse_device_datetime(date: &str, time: &str) -> Option<DateTime<Utc>> {
    let date = NaiveDate::parse_from_str(date.trim(), "%Y%m%d").ok()?;
    let time = NaiveTime::parse_from_str(time.trim(), "%H:%M:%S").ok()?;
    Some(Utc.from_utc_datetime(&date.and_time(time)))
}

/// Acknowledgment carrying the device id.
pub fn ack(device_id: &str) -> Vec<u8> {
    format!("ST300ACK;{device_id}\r").into_bytes()
}

/// Negative acknowledgment for messages that could not be attributed.
pub fn nak() -> Vec<u8> {
    format!("ST300NAK;{UNKNOWN_DEVICE}\r").into_bytes()
}

/// Stream framer: buffers inbound bytes and splits on the first `\r` or
/// `\n`. One read may contain zero, one or many complete messages, and a
/// message may span reads; blank lines (including the `\n` of a `\r\n`
/// pair) are swallowed.
#[derive(Debug, Default)]
pub struct SuntechLineCodec;

impl Decoder for SuntechLineCodec {
    type Item = String;
    type Error = TrackSrvError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            let Some(end) = src.iter().position(|&b| b == b'\r' || b == b'\n') else {
                return Ok(None);
            };
            let line = src.split_to(end + 1);
            let text = String::from_utf8_lossy(&line[..end]);
            let trimmed = text.trim();
            if trimmed.is_empty() {
                continue;
            }
            return Ok(Some(trimmed.to_string()));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STT: &str = "ST300STT;865432109876543;04;1097;20250807;17:30:05;+0;-23.550520;-46.633308;000.000;090.00;8;1;72893;0.0;0;1";

    #[test]
    fn classify_recognizes_all_prefixes() {
        assert_eq!(classify("ST300ALV;865432109876543"), MessageKind::Heartbeat);
        assert_eq!(classify(STT), MessageKind::Position);
        assert_eq!(classify("ST300GPS;1;2;3"), MessageKind::Position);
        assert_eq!(classify("ST300CMD;Res;1;Output1;Done"), MessageKind::CommandEcho);
        assert_eq!(classify("ST300ALT;1;2"), MessageKind::Alert);
        assert_eq!(classify("ST300EMG;1;2"), MessageKind::Emergency);
        assert_eq!(classify("GARBAGE;1;2"), MessageKind::Unknown);
    }

    #[test]
    fn extract_device_id_handles_the_res_shift() {
        assert_eq!(
            extract_device_id("ST300ALV;865432109876543").as_deref(),
            Some("865432109876543")
        );
        assert_eq!(extract_device_id(STT).as_deref(), Some("865432109876543"));
        assert_eq!(
            extract_device_id("ST300CMD;Res;865432109876543;04;Output1;Done").as_deref(),
            Some("865432109876543")
        );
        assert!(extract_device_id("NOPE;123").is_none());
        assert!(extract_device_id("ST300ALV;").is_none());
    }

    #[test]
    fn decode_reads_position_fields_and_io_fallback() {
        let report = decode(STT).unwrap();
        assert!((report.latitude - -23.550520).abs() < 1e-9);
        assert!((report.longitude - -46.633308).abs() < 1e-9);
        assert_eq!(report.speed, 0.0);
        assert_eq!(report.heading, 90.0);
        assert!(report.ignition); // trailing I/O field is 1
        assert_eq!(
            report.timestamp,
            Utc.with_ymd_and_hms(2025, 8, 7, 17, 30, 5).unwrap()
        );
    }

    fn alert_with(event_code: i32, io: i32) -> String {
        format!(
            "ST300ALT;865432109876543;04;1097;20250807;17:30:05;+0;-23.550520;-46.633308;000.000;090.00;8;1;72893;0.0;0;{event_code};{io}"
        )
    }

    #[test]
    fn event_codes_override_the_io_field() {
        // Code 40: ignition forced on even with I/O reading 0
        assert!(decode(&alert_with(40, 0)).unwrap().ignition);
        // Code 41: forced off even with I/O reading 1
        assert!(!decode(&alert_with(41, 1)).unwrap().ignition);
        // Code 3 (battery disconnect): forced off
        assert!(!decode(&alert_with(3, 1)).unwrap().ignition);
        // Code 7 defers to the I/O field
        assert!(decode(&alert_with(7, 1)).unwrap().ignition);
        assert!(!decode(&alert_with(7, 0)).unwrap().ignition);
        // Unlisted codes fall back to the I/O field
        assert!(decode(&alert_with(18, 1)).unwrap().ignition);
    }

    #[test]
    fn event_code_is_ignored_outside_alert_and_emergency() {
        // A position message with "40" at field 16 must not force ignition
        let msg = "ST300STT;865432109876543;04;1097;20250807;17:30:05;+0;-23.550520;-46.633308;000.000;090.00;8;1;72893;0.0;0;40;0";
        assert!(!decode(msg).unwrap().ignition);
    }

    #[test]
    fn decode_falls_back_to_wall_clock_on_bad_timestamp() {
        let before = Utc::now();
        let msg = "ST300STT;865432109876543;04;1097;NOTADATE;17:30:05;+0;-23.550520;-46.633308;000.000;090.00;1";
        let report = decode(msg).unwrap();
        assert!(report.timestamp >= before);
        assert!(report.timestamp <= Utc::now());
    }

    #[test]
    fn decode_rejects_messages_with_too_few_fields() {
        assert!(decode("ST300STT;865432109876543;04").is_none());
        assert!(decode("ST300ALV;865432109876543").is_none());
    }

    #[test]
    fn ack_and_nak_wire_forms() {
        assert_eq!(ack("865432109876543"), b"ST300ACK;865432109876543\r");
        assert_eq!(nak(), b"ST300NAK;UNKNOWN\r");
    }

    #[test]
    fn line_codec_splits_multiple_messages_in_one_read() {
        let mut codec = SuntechLineCodec;
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"ST300ALV;111\r\nST300ALV;222\r");

        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("ST300ALV;111"));
        assert_eq!(codec.decode(&mut buf).unwrap().as_deref(), Some("ST300ALV;222"));
        assert!(codec.decode(&mut buf).unwrap().is_none());
    }

    #[test]
    fn line_codec_buffers_partial_messages_across_reads() {
        let mut codec = SuntechLineCodec;
        let mut buf = BytesMut::new();

        buf.extend_from_slice(b"ST300GPS;865432");
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(b"109876543;rest\n");
        assert_eq!(
            codec.decode(&mut buf).unwrap().as_deref(),
            Some("ST300GPS;865432109876543;rest")
        );
    }
}
