use anyhow::Context;
use chrono::{Duration, NaiveDate, NaiveDateTime};
use ghogcore::io::{encode_capture, CaptureHeader, RawRecord, TimedFix, TimestampWidth};
use ghogcore::math::geodesy::WGS84_SEMI_MAJOR_AXIS;
use rand::{rngs::StdRng, Rng, SeedableRng};
use serde::{Deserialize, Serialize};

/// Configuration for generating a synthetic capture along a straight track.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneratorConfig {
    pub traces: usize,
    pub spt: i64,
    pub pre_trig: i64,
    pub prf: i64,
    pub stack: i64,
    pub trig: i16,
    pub fs: f64,
    /// Sample row of the direct-wave impulse in every trace.
    pub impulse_sample: usize,
    pub impulse_amplitude: i64,
    /// Peak digitizer counts of uniform noise; 0 disables noise.
    pub noise: i64,
    pub seed: u64,
    /// Along-track distance between consecutive traces in metres.
    pub spacing: f64,
    pub start_lon: f64,
    pub hgt: f64,
    pub timestamp_width: TimestampWidth,
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self {
            traces: 100,
            spt: 512,
            pre_trig: 8,
            prf: 2000,
            stack: 1,
            trig: 50,
            fs: 25e6,
            impulse_sample: 8,
            impulse_amplitude: 1,
            noise: 0,
            seed: 0,
            spacing: 1.0,
            start_lon: 0.0,
            hgt: 0.0,
            timestamp_width: TimestampWidth::Micros,
        }
    }
}

/// Capture bytes plus the position stream recorded alongside them.
pub struct SyntheticCapture {
    pub bytes: Vec<u8>,
    pub positions: Vec<TimedFix>,
}

impl GeneratorConfig {
    fn header(&self) -> CaptureHeader {
        CaptureHeader {
            spt: self.spt,
            pre_trig: self.pre_trig,
            prf: self.prf,
            stack: self.stack,
            trig: self.trig,
            fs: self.fs,
        }
    }

    /// Interval between traces on the acquisition clock.
    fn trace_period(&self) -> Duration {
        let micros = 1e6 * self.stack.max(1) as f64 / self.prf.max(1) as f64;
        Duration::microseconds(micros.round() as i64)
    }

    /// Longitude step that puts consecutive equatorial fixes `spacing` apart.
    fn lon_step(&self) -> f64 {
        (2.0 * (self.spacing / (2.0 * WGS84_SEMI_MAJOR_AXIS)).asin()).to_degrees()
    }
}

fn survey_start() -> anyhow::Result<NaiveDateTime> {
    NaiveDate::from_ymd_opt(2024, 4, 19)
        .and_then(|date| date.and_hms_opt(18, 30, 0))
        .context("building synthetic survey start time")
}

fn build_records(config: &GeneratorConfig, start: NaiveDateTime) -> anyhow::Result<Vec<RawRecord>> {
    let spt = usize::try_from(config.spt).context("synthetic samples per trace must be positive")?;
    if config.impulse_sample >= spt {
        anyhow::bail!(
            "impulse sample {} lies outside the {} samples of each trace",
            config.impulse_sample,
            spt
        );
    }

    let mut rng = StdRng::seed_from_u64(config.seed);
    let period = config.trace_period();
    let records = (0..config.traces)
        .map(|trace| {
            let samples = (0..spt)
                .map(|row| {
                    let jitter = if config.noise > 0 {
                        rng.gen_range(-config.noise..=config.noise)
                    } else {
                        0
                    };
                    let impulse = if row == config.impulse_sample {
                        config.impulse_amplitude
                    } else {
                        0
                    };
                    impulse + jitter
                })
                .collect();
            RawRecord::new(start + period * trace as i32, samples)
        })
        .collect();
    Ok(records)
}

fn build_positions(config: &GeneratorConfig, start: NaiveDateTime) -> Vec<TimedFix> {
    let period = config.trace_period();
    let lon_step = config.lon_step();
    (0..config.traces)
        .map(|trace| {
            let time = start + period * trace as i32;
            TimedFix {
                time,
                utc: time,
                lon: config.start_lon + lon_step * trace as f64,
                lat: 0.0,
                hgt: config.hgt,
            }
        })
        .collect()
}

pub fn build_capture_from_config(config: &GeneratorConfig) -> anyhow::Result<SyntheticCapture> {
    let start = survey_start()?;
    let records = build_records(config, start)?;
    let bytes = encode_capture(&config.header(), &records, config.timestamp_width, true)
        .context("encoding synthetic capture")?;
    Ok(SyntheticCapture {
        bytes,
        positions: build_positions(config, start),
    })
}
