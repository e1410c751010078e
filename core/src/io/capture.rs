//! Decoder for raw Groundhog digitizer captures.
//!
//! A capture is a 46-byte little-endian header followed by a data segment of
//! fixed-size records, each an ASCII timestamp and `spt` 64-bit samples:
//!
//! ```text
//! EF BE D0 D0 | spt i64 | pre_trig i64 | prf i64 | stack i64 | trig i16 | fs f64
//! CE FA ED FE | [timestamp][spt x i64] ... | AD DE AD DE
//! ```
//!
//! Older firmware wrote 19-byte whole-second timestamps, newer firmware
//! writes 26-byte microsecond timestamps. A capture cut short by power loss
//! has no end sentinel and usually ends in a partial record.

use std::fs;
use std::path::Path;

use chrono::{Duration, NaiveDateTime};
use log::debug;
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::dataset::{Attributes, Dataset, Fix};
use crate::io::position::zero_fixes;
use crate::prelude::{parameter_error, GhogError, GhogResult};

pub const HEADER_MAGIC: [u8; 4] = [0xEF, 0xBE, 0xD0, 0xD0];
pub const DATA_MAGIC: [u8; 4] = [0xCE, 0xFA, 0xED, 0xFE];
pub const END_SENTINEL: [u8; 4] = [0xAD, 0xDE, 0xAD, 0xDE];
/// Header length including its magic.
pub const HEADER_LEN: usize = 46;

const SECONDS_FORMATS: [&str; 2] = ["%Y-%m-%dT%H:%M:%S", "%Y-%m-%d %H:%M:%S"];

fn format_error(message: impl Into<String>) -> GhogError {
    GhogError::Format(message.into())
}

/// Acquisition settings stored in the capture header.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CaptureHeader {
    pub spt: i64,
    pub pre_trig: i64,
    pub prf: i64,
    pub stack: i64,
    pub trig: i16,
    pub fs: f64,
}

impl CaptureHeader {
    fn parse(bytes: &[u8]) -> GhogResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(format_error(format!(
                "capture is {} bytes, shorter than the {} byte header",
                bytes.len(),
                HEADER_LEN
            )));
        }
        if bytes[..4] != HEADER_MAGIC {
            return Err(format_error("missing header magic"));
        }
        let header = Self {
            spt: read_i64(&bytes[4..12]),
            pre_trig: read_i64(&bytes[12..20]),
            prf: read_i64(&bytes[20..28]),
            stack: read_i64(&bytes[28..36]),
            trig: i16::from_le_bytes([bytes[36], bytes[37]]),
            fs: f64::from_le_bytes(eight(&bytes[38..46])),
        };
        if header.spt <= 0 {
            return Err(format_error(format!("header samples per trace is {}", header.spt)));
        }
        if header.pre_trig < 0 {
            return Err(format_error(format!("header pre-trigger count is {}", header.pre_trig)));
        }
        // Bounds every record length computed from `spt` by the capture size.
        let data_len = bytes.len() - HEADER_LEN;
        let fits = usize::try_from(header.spt)
            .ok()
            .and_then(|spt| spt.checked_mul(8))
            .is_some_and(|sample_bytes| sample_bytes <= data_len);
        if !fits {
            return Err(format_error(format!(
                "header samples per trace {} do not fit in {} bytes of data",
                header.spt, data_len
            )));
        }
        Ok(header)
    }

    fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_LEN);
        bytes.extend_from_slice(&HEADER_MAGIC);
        bytes.extend_from_slice(&self.spt.to_le_bytes());
        bytes.extend_from_slice(&self.pre_trig.to_le_bytes());
        bytes.extend_from_slice(&self.prf.to_le_bytes());
        bytes.extend_from_slice(&self.stack.to_le_bytes());
        bytes.extend_from_slice(&self.trig.to_le_bytes());
        bytes.extend_from_slice(&self.fs.to_le_bytes());
        bytes
    }

    /// Dataset attributes carrying the header values.
    pub fn attributes(&self) -> Attributes {
        Attributes::acquisition(
            self.fs,
            self.pre_trig,
            self.prf,
            self.spt,
            self.stack,
            i64::from(self.trig),
        )
    }

    fn record_len(&self, width: TimestampWidth) -> usize {
        width.field_len() + 8 * self.spt as usize
    }
}

fn eight(bytes: &[u8]) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&bytes[..8]);
    out
}

fn read_i64(bytes: &[u8]) -> i64 {
    i64::from_le_bytes(eight(bytes))
}

/// Width of the per-record timestamp field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimestampWidth {
    /// `YYYY-MM-DDTHH:MM:SS.ffffff`, 26 bytes.
    Micros,
    /// `YYYY-MM-DDTHH:MM:SS`, 19 bytes.
    Seconds,
}

impl TimestampWidth {
    /// Probe order when the width has to be guessed.
    const CANDIDATES: [TimestampWidth; 2] = [TimestampWidth::Micros, TimestampWidth::Seconds];

    /// Bytes the field occupies in each record.
    pub fn field_len(self) -> usize {
        match self {
            Self::Micros => 26,
            Self::Seconds => 19,
        }
    }

    fn format(self, stamp: &NaiveDateTime) -> String {
        match self {
            Self::Micros => stamp.format("%Y-%m-%dT%H:%M:%S%.6f").to_string(),
            Self::Seconds => stamp.format("%Y-%m-%dT%H:%M:%S").to_string(),
        }
    }

    /// Whether `body` starts with a readable timestamp of this width.
    fn opens(self, body: &[u8]) -> bool {
        body.len() >= self.field_len() && self.parse(&body[..self.field_len()]).is_some()
    }

    /// Strict parse of a field of exactly this width.
    fn parse(self, field: &[u8]) -> Option<NaiveDateTime> {
        if field.len() != self.field_len() {
            return None;
        }
        let text = std::str::from_utf8(&field[..19]).ok()?;
        let whole = SECONDS_FORMATS
            .iter()
            .find_map(|format| NaiveDateTime::parse_from_str(text, format).ok())?;
        match self {
            Self::Seconds => Some(whole),
            Self::Micros => {
                let digits = &field[20..];
                if field[19] != b'.' || !digits.iter().all(u8::is_ascii_digit) {
                    return None;
                }
                let micros: i64 = std::str::from_utf8(digits).ok()?.parse().ok()?;
                Some(whole + Duration::microseconds(micros))
            }
        }
    }
}

/// What to do with a capture that has no end sentinel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TruncationPolicy {
    /// Keep every complete record and drop the partial tail.
    #[default]
    Recover,
    /// Fail with a format error.
    Reject,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DecoderConfig {
    pub truncation: TruncationPolicy,
    /// Severity of the message logged when a truncated capture is recovered.
    pub truncation_level: log::Level,
}

impl Default for DecoderConfig {
    fn default() -> Self {
        Self {
            truncation: TruncationPolicy::Recover,
            truncation_level: log::Level::Warn,
        }
    }
}

/// One trace as written by the digitizer.
#[derive(Debug, Clone, PartialEq)]
pub struct RawRecord {
    pub timestamp: NaiveDateTime,
    pub samples: Vec<i64>,
}

impl RawRecord {
    pub fn new(timestamp: NaiveDateTime, samples: Vec<i64>) -> Self {
        Self { timestamp, samples }
    }
}

/// A decoded capture.
#[derive(Debug, Clone, PartialEq)]
pub struct Capture {
    pub header: CaptureHeader,
    pub dataset: Dataset,
    /// Acquisition clock time of every trace.
    pub timestamps: Vec<NaiveDateTime>,
    pub timestamp_width: TimestampWidth,
    /// Whether the end sentinel was missing.
    pub truncated: bool,
    /// Bytes of partial record dropped from a truncated capture.
    pub discarded_bytes: usize,
}

impl Capture {
    /// Replaces the zero-filled fixes, for instance with the output of
    /// [`align_fixes`](crate::io::position::align_fixes).
    pub fn with_fixes(self, fixes: Vec<Fix>) -> GhogResult<Self> {
        let (traces, _, attrs) = self.dataset.into_parts();
        Ok(Self {
            dataset: Dataset::new(traces, fixes, attrs)?,
            ..self
        })
    }
}

/// Chooses the timestamp width of a body that ends with the sentinel.
fn width_from_record_size(header: &CaptureHeader, body: &[u8]) -> GhogResult<TimestampWidth> {
    let dividing: Vec<TimestampWidth> = TimestampWidth::CANDIDATES
        .into_iter()
        .filter(|width| body.len() % header.record_len(*width) == 0)
        .collect();
    match dividing.as_slice() {
        [] => Err(format_error(format!(
            "data segment of {} bytes is not a whole number of {} or {} byte records",
            body.len(),
            header.record_len(TimestampWidth::Micros),
            header.record_len(TimestampWidth::Seconds)
        ))),
        [width] => Ok(*width),
        [first, ..] => Ok(dividing
            .iter()
            .copied()
            .find(|width| width.opens(body))
            .unwrap_or(*first)),
    }
}

/// Chooses the timestamp width of a truncated body from its first record.
fn width_from_first_timestamp(body: &[u8]) -> Option<TimestampWidth> {
    TimestampWidth::CANDIDATES
        .into_iter()
        .find(|width| width.opens(body))
}

/// Decodes a capture held in memory.
pub fn decode(bytes: &[u8], config: &DecoderConfig) -> GhogResult<Capture> {
    let header = CaptureHeader::parse(bytes)?;
    let data = &bytes[HEADER_LEN..];
    if data.len() < DATA_MAGIC.len() || data[..4] != DATA_MAGIC {
        return Err(format_error("missing data segment magic"));
    }
    let data = &data[4..];

    let truncated = !data.ends_with(&END_SENTINEL);
    let (body, width) = if truncated {
        if config.truncation == TruncationPolicy::Reject {
            return Err(format_error("capture has no end sentinel"));
        }
        let width = width_from_first_timestamp(data)
            .ok_or_else(|| format_error("truncated capture has no complete records"))?;
        (data, width)
    } else {
        let body = &data[..data.len() - END_SENTINEL.len()];
        (body, width_from_record_size(&header, body)?)
    };

    let record_len = header.record_len(width);
    let count = body.len() / record_len;
    let discarded_bytes = body.len() - count * record_len;
    if count == 0 {
        return Err(format_error("capture has no complete records"));
    }
    if truncated {
        log::log!(
            config.truncation_level,
            "capture has no end sentinel; kept {} records and dropped {} trailing bytes",
            count,
            discarded_bytes
        );
    }

    let spt = header.spt as usize;
    let mut traces = Array2::zeros((spt, count));
    let mut timestamps = Vec::with_capacity(count);
    for (index, record) in body.chunks_exact(record_len).enumerate() {
        let (field, samples) = record.split_at(width.field_len());
        let stamp = width.parse(field).ok_or_else(|| {
            format_error(format!(
                "record {} timestamp '{}' is not a {} byte timestamp",
                index,
                String::from_utf8_lossy(field),
                width.field_len()
            ))
        })?;
        timestamps.push(stamp);
        for (row, sample) in samples.chunks_exact(8).enumerate() {
            traces[[row, index]] = read_i64(sample) as f64;
        }
    }
    debug!(
        "decoded {} records of {} samples with {:?} timestamps",
        count, spt, width
    );

    let dataset = Dataset::new(traces, zero_fixes(&timestamps), header.attributes())
        .map_err(|err| format_error(format!("header describes an invalid dataset: {}", err)))?;
    Ok(Capture {
        header,
        dataset,
        timestamps,
        timestamp_width: width,
        truncated,
        discarded_bytes,
    })
}

/// Reads and decodes a capture file.
pub fn decode_file(path: impl AsRef<Path>, config: &DecoderConfig) -> GhogResult<Capture> {
    let path = path.as_ref();
    let bytes = fs::read(path)?;
    debug!("read {} bytes from {}", bytes.len(), path.display());
    decode(&bytes, config)
}

/// Writes records in the capture format.
pub fn encode_capture(
    header: &CaptureHeader,
    records: &[RawRecord],
    width: TimestampWidth,
    with_sentinel: bool,
) -> GhogResult<Vec<u8>> {
    let spt = usize::try_from(header.spt)
        .ok()
        .filter(|spt| *spt > 0)
        .ok_or_else(|| parameter_error(format!("samples per trace must be positive, got {}", header.spt)))?;

    let mut bytes = header.to_bytes();
    bytes.extend_from_slice(&DATA_MAGIC);
    for (index, record) in records.iter().enumerate() {
        if record.samples.len() != spt {
            return Err(parameter_error(format!(
                "record {} has {} samples, header says {}",
                index,
                record.samples.len(),
                spt
            )));
        }
        bytes.extend_from_slice(width.format(&record.timestamp).as_bytes());
        for sample in &record.samples {
            bytes.extend_from_slice(&sample.to_le_bytes());
        }
    }
    if with_sentinel {
        bytes.extend_from_slice(&END_SENTINEL);
    }
    Ok(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::tests::epoch;
    use crate::validate::ValidationError;

    fn header(spt: i64) -> CaptureHeader {
        CaptureHeader {
            spt,
            pre_trig: 2,
            prf: 2000,
            stack: 1,
            trig: 50,
            fs: 25e6,
        }
    }

    fn records(count: usize, spt: usize) -> Vec<RawRecord> {
        (0..count)
            .map(|j| {
                let samples = (0..spt).map(|i| (i as i64 - 2) * (j as i64 + 1)).collect();
                RawRecord::new(epoch() + Duration::microseconds(500 * j as i64 + 17), samples)
            })
            .collect()
    }

    #[test]
    fn decodes_microsecond_capture() {
        let bytes = encode_capture(&header(4), &records(3, 4), TimestampWidth::Micros, true).unwrap();
        let capture = decode(&bytes, &DecoderConfig::default()).unwrap();
        assert_eq!(capture.timestamp_width, TimestampWidth::Micros);
        assert!(!capture.truncated);
        assert_eq!(capture.dataset.traces().dim(), (4, 3));
        assert_eq!(capture.dataset.traces()[[0, 2]], -6.0);
        assert_eq!(capture.dataset.traces()[[3, 1]], 2.0);
        assert_eq!(capture.timestamps[1], epoch() + Duration::microseconds(517));
        assert_eq!(capture.dataset.fixes()[1], Fix::unpositioned(capture.timestamps[1]));
        assert_eq!(capture.dataset.attrs().get_i64("trig").unwrap(), 50);
        assert_eq!(capture.dataset.attrs().fs().unwrap(), 25e6);
    }

    #[test]
    fn decodes_whole_second_capture() {
        let bytes = encode_capture(&header(4), &records(2, 4), TimestampWidth::Seconds, true).unwrap();
        let capture = decode(&bytes, &DecoderConfig::default()).unwrap();
        assert_eq!(capture.timestamp_width, TimestampWidth::Seconds);
        assert_eq!(capture.timestamps, vec![epoch(), epoch()]);
        assert_eq!(capture.dataset.trace_count(), 2);
    }

    #[test]
    fn rejects_malformed_headers() {
        let config = DecoderConfig::default();
        assert!(matches!(decode(&[0xEF; 20], &config), Err(GhogError::Format(_))));

        let mut bytes = encode_capture(&header(4), &records(1, 4), TimestampWidth::Micros, true).unwrap();
        bytes[0] = 0;
        assert!(matches!(decode(&bytes, &config), Err(GhogError::Format(_))));

        let mut bytes = encode_capture(&header(4), &records(1, 4), TimestampWidth::Micros, true).unwrap();
        bytes[HEADER_LEN] = 0;
        assert!(matches!(decode(&bytes, &config), Err(GhogError::Format(_))));

        let mut bytes = encode_capture(&header(4), &records(1, 4), TimestampWidth::Micros, true).unwrap();
        bytes[4..12].copy_from_slice(&0_i64.to_le_bytes());
        assert!(matches!(decode(&bytes, &config), Err(GhogError::Format(_))));

        let mut bytes = encode_capture(&header(4), &records(1, 4), TimestampWidth::Micros, true).unwrap();
        bytes[12..20].copy_from_slice(&(-1_i64).to_le_bytes());
        assert!(matches!(decode(&bytes, &config), Err(GhogError::Format(_))));
    }

    #[test]
    fn oversized_sample_count_is_a_format_error() {
        let mut bytes = header(1 << 61).to_bytes();
        bytes.extend_from_slice(&DATA_MAGIC);
        bytes.extend_from_slice(TimestampWidth::Micros.format(&epoch()).as_bytes());
        bytes.extend_from_slice(&END_SENTINEL);
        assert!(matches!(
            decode(&bytes, &DecoderConfig::default()),
            Err(GhogError::Format(_))
        ));

        bytes.truncate(bytes.len() - END_SENTINEL.len());
        assert!(matches!(
            decode(&bytes, &DecoderConfig::default()),
            Err(GhogError::Format(_))
        ));
    }

    // With one sample per trace, 918 bytes is 27 records of 34 bytes or 34 of 27.
    #[test]
    fn ambiguous_record_size_prefers_microsecond_stamps() {
        let bytes = encode_capture(&header(1), &records(27, 1), TimestampWidth::Micros, true).unwrap();
        assert_eq!(bytes.len() - HEADER_LEN - 8, 918);
        let capture = decode(&bytes, &DecoderConfig::default()).unwrap();
        assert_eq!(capture.timestamp_width, TimestampWidth::Micros);
        assert_eq!(capture.dataset.trace_count(), 27);
        assert_eq!(capture.timestamps[0], epoch() + Duration::microseconds(17));
    }

    #[test]
    fn ambiguous_record_size_falls_back_to_whole_seconds() {
        let bytes = encode_capture(&header(1), &records(34, 1), TimestampWidth::Seconds, true).unwrap();
        assert_eq!(bytes.len() - HEADER_LEN - 8, 918);
        let capture = decode(&bytes, &DecoderConfig::default()).unwrap();
        assert_eq!(capture.timestamp_width, TimestampWidth::Seconds);
        assert_eq!(capture.dataset.trace_count(), 34);
        assert_eq!(capture.dataset.traces()[[0, 33]], -68.0);
    }

    #[test]
    fn rejects_body_that_is_not_whole_records() {
        let mut bytes = encode_capture(&header(4), &records(2, 4), TimestampWidth::Micros, false).unwrap();
        bytes.extend_from_slice(&[1, 2, 3]);
        bytes.extend_from_slice(&END_SENTINEL);
        let err = decode(&bytes, &DecoderConfig::default()).unwrap_err();
        assert!(matches!(err, GhogError::Format(_)));
    }

    #[test]
    fn recovers_truncated_captures_of_either_width() {
        for width in [TimestampWidth::Micros, TimestampWidth::Seconds] {
            let mut bytes = encode_capture(&header(4), &records(3, 4), width, false).unwrap();
            bytes.extend_from_slice(&[7; 10]);
            let capture = decode(&bytes, &DecoderConfig::default()).unwrap();
            assert!(capture.truncated);
            assert_eq!(capture.timestamp_width, width);
            assert_eq!(capture.discarded_bytes, 10);
            assert_eq!(capture.dataset.trace_count(), 3);
        }
    }

    #[test]
    fn reject_policy_refuses_truncated_capture() {
        let bytes = encode_capture(&header(4), &records(3, 4), TimestampWidth::Micros, false).unwrap();
        let config = DecoderConfig {
            truncation: TruncationPolicy::Reject,
            ..Default::default()
        };
        assert!(matches!(decode(&bytes, &config), Err(GhogError::Format(_))));
    }

    #[test]
    fn truncated_capture_without_complete_records_fails() {
        let mut bytes = encode_capture(&header(4), &records(1, 4), TimestampWidth::Micros, false).unwrap();
        bytes.truncate(bytes.len() - 5);
        assert!(matches!(
            decode(&bytes, &DecoderConfig::default()),
            Err(GhogError::Format(_))
        ));

        let bytes = encode_capture(&header(4), &[], TimestampWidth::Micros, true).unwrap();
        assert!(matches!(
            decode(&bytes, &DecoderConfig::default()),
            Err(GhogError::Format(_))
        ));
    }

    #[test]
    fn unreadable_timestamp_names_its_record() {
        let mut bytes = encode_capture(&header(4), &records(3, 4), TimestampWidth::Micros, true).unwrap();
        let second = HEADER_LEN + 4 + header(4).record_len(TimestampWidth::Micros);
        bytes[second..second + 4].copy_from_slice(b"abcd");
        match decode(&bytes, &DecoderConfig::default()) {
            Err(GhogError::Format(message)) => assert!(message.contains("record 1"), "{}", message),
            other => panic!("expected a format error, got {:?}", other),
        }
    }

    #[test]
    fn decoding_is_repeatable() {
        let bytes = encode_capture(&header(8), &records(5, 8), TimestampWidth::Micros, true).unwrap();
        let config = DecoderConfig::default();
        assert_eq!(decode(&bytes, &config).unwrap(), decode(&bytes, &config).unwrap());
    }

    #[test]
    fn supplied_fixes_must_match_trace_count() {
        let bytes = encode_capture(&header(4), &records(3, 4), TimestampWidth::Micros, true).unwrap();
        let capture = decode(&bytes, &DecoderConfig::default()).unwrap();
        let err = capture.with_fixes(vec![Fix::unpositioned(epoch())]).unwrap_err();
        assert!(matches!(
            err,
            GhogError::Validation(ValidationError::FixCountMismatch { fixes: 1, traces: 3 })
        ));
    }

    #[test]
    fn decodes_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("20240419-120000.ghog");
        let bytes = encode_capture(&header(4), &records(2, 4), TimestampWidth::Micros, true).unwrap();
        std::fs::write(&path, bytes).unwrap();
        let capture = decode_file(&path, &DecoderConfig::default()).unwrap();
        assert_eq!(capture.dataset.trace_count(), 2);
    }

    #[test]
    fn decoder_config_reads_from_json() {
        let config: DecoderConfig =
            serde_json::from_str(r#"{"truncation": "reject", "truncation_level": "ERROR"}"#).unwrap();
        assert_eq!(config.truncation, TruncationPolicy::Reject);
        assert_eq!(config.truncation_level, log::Level::Error);
    }
}
