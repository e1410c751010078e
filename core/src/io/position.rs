use chrono::{Duration, NaiveDateTime};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::dataset::{utc_format, Fix};
use crate::math::interp::{interp, Boundary};
use crate::prelude::{parameter_error, GhogResult};

/// One already-parsed position report.
///
/// `time` is the acquisition computer's clock, the same clock that stamps
/// every trace; `utc` is the receiver's own time for the report.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TimedFix {
    #[serde(with = "utc_format")]
    pub time: NaiveDateTime,
    #[serde(with = "utc_format")]
    pub utc: NaiveDateTime,
    pub lon: f64,
    pub lat: f64,
    pub hgt: f64,
}

/// Fixes with no position, each stamped with its trace time.
pub fn zero_fixes(trace_times: &[NaiveDateTime]) -> Vec<Fix> {
    trace_times.iter().copied().map(Fix::unpositioned).collect()
}

fn micros_since(epoch: NaiveDateTime, time: NaiveDateTime) -> GhogResult<f64> {
    (time - epoch)
        .num_microseconds()
        .map(|micros| micros as f64)
        .ok_or_else(|| parameter_error("position stream and traces are too far apart in time"))
}

/// Interpolates a position stream onto trace times.
///
/// Position and UTC offset are linear in the shared clock; traces outside
/// the stream take the nearest report.
pub fn align_fixes(trace_times: &[NaiveDateTime], stream: &[TimedFix]) -> GhogResult<Vec<Fix>> {
    if stream.is_empty() {
        return Err(parameter_error("position stream is empty"));
    }
    let mut stream = stream.to_vec();
    stream.sort_by_key(|fix| fix.time);

    let epoch = stream[0].time;
    let last = stream[stream.len() - 1].time;
    if let (Some(first_trace), Some(last_trace)) = (trace_times.first(), trace_times.last()) {
        if epoch > *first_trace || last < *last_trace {
            warn!(
                "position stream {} .. {} does not cover traces {} .. {}",
                utc_format::to_string(&epoch),
                utc_format::to_string(&last),
                utc_format::to_string(first_trace),
                utc_format::to_string(last_trace)
            );
        }
    }

    let fix_clock = stream
        .iter()
        .map(|fix| micros_since(epoch, fix.time))
        .collect::<GhogResult<Vec<f64>>>()?;
    let trace_clock = trace_times
        .iter()
        .map(|time| micros_since(epoch, *time))
        .collect::<GhogResult<Vec<f64>>>()?;
    let utc_offsets = stream
        .iter()
        .map(|fix| micros_since(epoch, fix.utc))
        .collect::<GhogResult<Vec<f64>>>()?;

    let column = |value: fn(&TimedFix) -> f64| -> Vec<f64> {
        let values: Vec<f64> = stream.iter().map(value).collect();
        interp(&trace_clock, &fix_clock, &values, Boundary::Clamp)
    };
    let lon = column(|fix| fix.lon);
    let lat = column(|fix| fix.lat);
    let hgt = column(|fix| fix.hgt);
    let utc = interp(&trace_clock, &fix_clock, &utc_offsets, Boundary::Clamp);

    Ok((0..trace_times.len())
        .map(|i| {
            let stamp = epoch + Duration::microseconds(utc[i].round() as i64);
            Fix::new(lon[i], lat[i], hgt[i], stamp)
        })
        .collect())
}
