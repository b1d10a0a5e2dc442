//! GT-06 binary frame codec.
//!
//! Frame layout (all offsets 0-indexed into the whole frame):
//!
//! ```text
//! [0x78][0x78][len][type][payload ...][0x0D][0x0A]
//! ```
//!
//! `len` counts everything between itself and the trailer, so a complete
//! frame is `len + 5` bytes. Type `0x01` is a login carrying the hardware
//! identifier in bytes 4-11; types `0x12`/`0x22` carry a position/status
//! payload: date-time in bytes 4-9, big-endian raw latitude/longitude in
//! bytes 11-14 / 15-18, speed in byte 19 and a status word in bytes 20-21
//! (bits 0-9 course, bit 10 fix-valid, bit 13 ignition).
//!
//! Two quirks of the deployed fleet are preserved deliberately and pinned by
//! tests: date-time bytes are read as plain integers, not BCD, and decoded
//! coordinates are forced negative (southern/western hemisphere fleet)
//! regardless of the raw sign - a frame whose forced coordinate is not
//! strictly negative is treated as corrupt.

use bytes::{Buf, BytesMut};
use chrono::{NaiveDate, TimeZone, Utc};
use tokio_util::codec::Decoder;
use tracing::trace;

use fleet_model::PositionReport;

use crate::error::TrackSrvError;

/// Frame start marker
pub const HEADER: [u8; 2] = [0x78, 0x78];
/// Frame end marker
pub const TRAILER: [u8; 2] = [0x0D, 0x0A];

/// Login packet type
pub const MSG_LOGIN: u8 = 0x01;
/// GPS position packet type
pub const MSG_POSITION: u8 = 0x12;
/// Combined position/status packet type
pub const MSG_STATUS: u8 = 0x22;

/// Raw coordinate unit: 1/30000 of a minute of arc
const COORD_SCALE: f64 = 30000.0 * 60.0;

/// Accepted total frame length for position packets
const POSITION_FRAME_LEN: std::ops::RangeInclusive<usize> = 36..=38;
/// Accepted declared-length indicator for position packets
const POSITION_DECLARED_LEN: std::ops::RangeInclusive<u8> = 30..=35;

/// Shortest frame that can carry a login id (bytes 4-11 plus trailer)
const MIN_LOGIN_FRAME_LEN: usize = 14;

/// Packet type byte, when the frame is long enough to have one.
pub fn packet_type(frame: &[u8]) -> Option<u8> {
    frame.get(3).copied()
}

fn has_markers(frame: &[u8]) -> bool {
    frame.len() >= 6 && frame[..2] == HEADER && frame[frame.len() - 2..] == TRAILER
}

/// Extract the hardware identifier from a login frame.
///
/// Bytes 4-11 are rendered as uppercase hex with a single leading zero
/// stripped, which turns the 16-digit field into the 15-digit IMEI the
/// fleet database stores.
pub fn decode_login(frame: &[u8]) -> Option<String> {
    if !has_markers(frame) || frame.len() < MIN_LOGIN_FRAME_LEN {
        return None;
    }
    if frame[3] != MSG_LOGIN {
        return None;
    }

    let id = hex::encode_upper(&frame[4..12]);
    Some(match id.strip_prefix('0') {
        Some(stripped) => stripped.to_string(),
        None => id,
    })
}

/// Decode a position/status frame into a report.
///
/// Returns `None` on any structural failure: bad markers, a frame length
/// outside 36-38, a declared length outside 30-35, an unexpected packet
/// type, an impossible calendar date, or a forced coordinate that did not
/// come out strictly negative.
pub fn decode(frame: &[u8]) -> Option<PositionReport> {
    if !has_markers(frame) {
        return None;
    }
    if !POSITION_FRAME_LEN.contains(&frame.len()) {
        return None;
    }
    if !POSITION_DECLARED_LEN.contains(&frame[2]) {
        return None;
    }
    if frame[3] != MSG_POSITION && frame[3] != MSG_STATUS {
        return None;
    }

    // Raw integers, not BCD; garbage values fail the calendar check below
    let date = NaiveDate::from_ymd_opt(
        2000 + i32::from(frame[4]),
        u32::from(frame[5]),
        u32::from(frame[6]),
    )?;
    let time = date.and_hms_opt(
        u32::from(frame[7]),
        u32::from(frame[8]),
        u32::from(frame[9]),
    )?;
    let timestamp = Utc.from_utc_datetime(&time);

    let lat_raw = u32::from_be_bytes([frame[11], frame[12], frame[13], frame[14]]);
    let lon_raw = u32::from_be_bytes([frame[15], frame[16], frame[17], frame[18]]);
    let latitude = -(f64::from(lat_raw) / COORD_SCALE);
    let longitude = -(f64::from(lon_raw) / COORD_SCALE);
    // Also rejects -0.0 and anything non-finite
    if !(latitude < 0.0) || !(longitude < 0.0) {
        return None;
    }

    let speed = f64::from(frame[19]);
    let status = u16::from_be_bytes([frame[20], frame[21]]);
    let heading = f64::from(status & 0x03FF);
    let fix_valid = status & (1 << 10) != 0;
    let ignition = status & (1 << 13) != 0;

    if !fix_valid {
        trace!(status, "position frame without valid fix flag");
    }

    Some(PositionReport {
        latitude,
        longitude,
        speed,
        heading,
        timestamp,
        ignition,
    })
}

/// Fixed login acknowledgment.
pub fn login_ack() -> [u8; 8] {
    [0x78, 0x78, 0x05, MSG_LOGIN, 0x00, 0x00, 0x0D, 0x0A]
}

/// Position acknowledgment echoing the packet type and serial byte so the
/// device can correlate it.
pub fn position_ack(packet_type: u8, serial: u8) -> [u8; 8] {
    [0x78, 0x78, 0x05, packet_type, serial, 0x00, 0x0D, 0x0A]
}

/// Stream framer: hunts for the header, sizes the frame from the declared
/// length and hands complete frames up. Validation beyond the trailer check
/// stays in [`decode`] / [`decode_login`] so malformed frames drop a single
/// message, never the connection.
#[derive(Debug, Default)]
pub struct Gt06FrameCodec;

impl Decoder for Gt06FrameCodec {
    type Item = BytesMut;
    type Error = TrackSrvError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        loop {
            // Skip garbage until a header candidate sits at the front
            while src.len() >= 2 && src[..2] != HEADER {
                src.advance(1);
            }
            if src.len() < 3 {
                return Ok(None);
            }

            let total = usize::from(src[2]) + 5;
            if src.len() < total {
                src.reserve(total - src.len());
                return Ok(None);
            }

            if src[total - 2..total] == TRAILER {
                return Ok(Some(src.split_to(total)));
            }

            // Declared length did not land on a trailer: resync one byte in
            trace!("discarding byte while resynchronizing frame stream");
            src.advance(1);
        }
    }
}
