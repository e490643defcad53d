use log::{debug, error, warn};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum TelegramError {
    #[error("Packet has invalid length. Expected 10 or 19 fields, got {0}")]
    InvalidLength(usize),
    #[error("Expecting 'M{expected}', received '{found}'")]
    MarkerMismatch { expected: u8, found: String },
    #[error("Invalid packet: '{0}'")]
    UnrecognizedFormat(String),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChannelReading {
    pub channel: u8,
    /// Absolute pulse count since the device started, not the count of the
    /// last interval. The absolute value survives missed or duplicated
    /// telegrams, which is why accumulation works from it.
    pub pulsecount: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub device_id: String,
    pub interval: u32,
    pub channels: Vec<ChannelReading>,
}

/// Parse one line of S0PCM output.
///
/// A telegram looks like this, with 5 `M<n>` groups for a S0PCM-5 and
/// 2 groups for a S0PCM-2:
///
/// ```text
/// /8237:S0 Pulse Counter V0.6 - 30/30/30/30/30ms
/// ID:8237:I:10:M1:0:0:M2:0:0:M3:0:0:M4:0:0:M5:0:0
/// ```
///
/// Header records and empty lines are recognized but carry no reading.
pub fn parse_telegram(line: &str) -> Result<Option<Reading>, TelegramError> {
    if line.is_empty() {
        warn!("Empty packet received, this can happen during start-up");
        return Ok(None);
    }

    if line.starts_with('/') {
        debug!("Header packet: '{line}'");
        return Ok(None);
    }

    if !line.starts_with("ID:") {
        return Err(TelegramError::UnrecognizedFormat(line.to_string()));
    }

    debug!("S0PCM packet: '{line}'");

    let fields: Vec<&str> = line.split(':').collect();

    /* A S0PCM-5 sends 19 fields, a S0PCM-2 sends 10 */
    let size: u8 = match fields.len() {
        19 => 5,
        10 => 2,
        count => return Err(TelegramError::InvalidLength(count)),
    };

    let mut reading = Reading {
        device_id: fields[1].to_string(),
        interval: fields[3].parse().unwrap_or(0),
        channels: Vec::new(),
    };

    for count in 1..=size {
        match parse_channel(&fields, count) {
            Ok(channel) => reading.channels.push(channel),
            /* A bad marker skips this channel only, the rest of the
               telegram is still usable */
            Err(e) => error!("{e}"),
        }
    }

    return Ok(Some(reading));
}

fn parse_channel(fields: &[&str], count: u8) -> Result<ChannelReading, TelegramError> {
    let offset = 4 + (count as usize - 1) * 3;

    if fields[offset] != format!("M{count}") {
        return Err(TelegramError::MarkerMismatch {
            expected: count,
            found: fields[offset].to_string(),
        });
    }

    /* The second value after the marker is the total since start-up */
    let pulsecount = match fields[offset + 2].parse::<u64>() {
        Ok(pulsecount) => pulsecount,
        Err(_) => {
            error!("Cannot convert pulsecount '{}' of '{}' into an integer", fields[offset + 2], fields[offset]);
            0
        }
    };

    return Ok(ChannelReading { channel: count, pulsecount });
}
