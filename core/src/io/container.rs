//! Grouped dataset container.
//!
//! A container is a zip archive in which every group is a path prefix holding
//! three members:
//!
//! - `<group>/rx0.npy`: traces, little-endian `f64`, C order, `[rows, cols]`
//! - `<group>/gps0.json`: fixes as `{lon, lat, hgt, utc}` records, non-finite
//!   coordinates spelled `"NaN"`, `"inf"` or `"-inf"`
//! - `<group>/attrs.json`: attributes
//!
//! Groups may nest (`proc/filtered`). Files written by older tooling are
//! repaired on load and reported with a warning.

use std::collections::BTreeSet;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::{debug, warn};
use ndarray::{Array2, ShapeBuilder};
use npyz::{DType, NpyFile, NpyWriter, Order, WriterBuilder};
use serde::Deserialize;
use tempfile::NamedTempFile;
use zip::result::ZipError;
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipArchive, ZipWriter};

use crate::dataset::{float_format, utc_format, Attributes, Dataset, Fix};
use crate::io::position::zero_fixes;
use crate::prelude::{parameter_error, GhogError, GhogResult};

pub const TRACES_MEMBER: &str = "rx0.npy";
pub const FIXES_MEMBER: &str = "gps0.json";
pub const ATTRS_MEMBER: &str = "attrs.json";
const LEGACY_TRACES_MEMBER: &str = "rx.npy";
const LEGACY_TIMES_MEMBER: &str = "time.json";
const MEMBERS: [&str; 5] = [
    TRACES_MEMBER,
    FIXES_MEMBER,
    ATTRS_MEMBER,
    LEGACY_TRACES_MEMBER,
    LEGACY_TIMES_MEMBER,
];

/// Attribute names used by older tooling and their current names.
const LEGACY_KEYS: [(&str, &str); 3] = [
    ("pre_trigger", "pre_trig"),
    ("trigger_threshold", "trig"),
    ("interval", "stack_interval"),
];

fn container_error(message: impl Into<String>) -> GhogError {
    GhogError::Container(message.into())
}

fn check_group(group: &str) -> GhogResult<()> {
    if group.is_empty() || group.split('/').any(str::is_empty) {
        return Err(parameter_error(format!("'{}' is not a valid group name", group)));
    }
    Ok(())
}

/// Group and member name of an archive entry that belongs to a group.
fn split_entry(name: &str) -> Option<(&str, &str)> {
    name.rsplit_once('/')
        .filter(|(group, member)| !group.is_empty() && MEMBERS.contains(member))
}

fn open_archive(path: &Path) -> GhogResult<ZipArchive<File>> {
    if !path.is_file() {
        return Err(container_error(format!("no container at {}", path.display())));
    }
    let file = File::open(path)?;
    ZipArchive::new(file)
        .map_err(|err| container_error(format!("{} is not a readable container: {}", path.display(), err)))
}

fn group_names(archive: &ZipArchive<File>) -> BTreeSet<String> {
    archive
        .file_names()
        .filter_map(split_entry)
        .map(|(group, _)| group.to_string())
        .collect()
}

fn read_member(archive: &mut ZipArchive<File>, name: &str) -> GhogResult<Option<Vec<u8>>> {
    match archive.by_name(name) {
        Ok(mut entry) => {
            let mut bytes = Vec::with_capacity(entry.size() as usize);
            entry.read_to_end(&mut bytes)?;
            Ok(Some(bytes))
        }
        Err(ZipError::FileNotFound) => Ok(None),
        Err(err) => Err(container_error(format!("cannot read {}: {}", name, err))),
    }
}

fn decode_traces(bytes: &[u8], name: &str) -> GhogResult<Array2<f64>> {
    let npy_error = |err: std::io::Error| container_error(format!("{}: {}", name, err));
    let npy = NpyFile::new(bytes).map_err(npy_error)?;

    let (rows, cols) = match npy.shape() {
        [rows, cols] => (*rows as usize, *cols as usize),
        other => {
            return Err(container_error(format!(
                "{} has shape {:?}, expected two axes",
                name, other
            )))
        }
    };
    let order = npy.order();
    let type_str = match npy.dtype() {
        DType::Plain(type_str) => type_str.to_string(),
        other => return Err(container_error(format!("{} has unsupported dtype {:?}", name, other))),
    };

    let values: Vec<f64> = match type_str.as_str() {
        "<f8" => npy.into_vec::<f64>().map_err(npy_error)?,
        "<i8" => {
            warn!("{} holds integer samples; widening to f64", name);
            npy.into_vec::<i64>()
                .map_err(npy_error)?
                .into_iter()
                .map(|value| value as f64)
                .collect()
        }
        other => return Err(container_error(format!("{} has unsupported dtype {}", name, other))),
    };

    let traces = match order {
        Order::C => Array2::from_shape_vec((rows, cols), values),
        Order::Fortran => {
            warn!("{} is stored in Fortran order; reordering", name);
            Array2::from_shape_vec((rows, cols).f(), values)
                .map(|traces| traces.as_standard_layout().into_owned())
        }
    };
    traces.map_err(|err| container_error(format!("{}: {}", name, err)))
}

fn encode_traces(traces: &Array2<f64>) -> GhogResult<Vec<u8>> {
    let (rows, cols) = traces.dim();
    let mut bytes = Vec::new();
    let mut writer: NpyWriter<f64, _> = npyz::WriteOptions::new()
        .default_dtype()
        .shape(&[rows as u64, cols as u64])
        .writer(&mut bytes)
        .begin_nd()?;
    writer.extend(traces.iter().copied())?;
    writer.finish()?;
    Ok(bytes)
}

/// A stored UTC value: canonical text, or legacy seconds since the Unix epoch.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredUtc {
    Text(String),
    Seconds(f64),
}

impl StoredUtc {
    /// The timestamp and whether it needed repair.
    fn resolve(&self) -> GhogResult<(NaiveDateTime, bool)> {
        match self {
            Self::Text(text) => utc_format::parse(text)
                .map(|utc| (utc, false))
                .ok_or_else(|| container_error(format!("unrecognized timestamp '{}'", text))),
            Self::Seconds(seconds) => unix_seconds(*seconds)
                .map(|utc| (utc, true))
                .ok_or_else(|| container_error(format!("timestamp {} s is out of range", seconds))),
        }
    }
}

fn unix_seconds(seconds: f64) -> Option<NaiveDateTime> {
    if !seconds.is_finite() {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1970, 1, 1)?.and_hms_opt(0, 0, 0)?;
    epoch.checked_add_signed(Duration::microseconds((seconds * 1e6).round() as i64))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StoredFix {
    // Must precede Record, which also accepts a bare array.
    Positional(
        #[serde(deserialize_with = "float_format::deserialize")] f64,
        #[serde(deserialize_with = "float_format::deserialize")] f64,
        #[serde(deserialize_with = "float_format::deserialize")] f64,
        StoredUtc,
    ),
    Record {
        #[serde(deserialize_with = "float_format::deserialize")]
        lon: f64,
        #[serde(deserialize_with = "float_format::deserialize")]
        lat: f64,
        #[serde(deserialize_with = "float_format::deserialize")]
        hgt: f64,
        utc: StoredUtc,
    },
}

fn decode_fixes(bytes: &[u8], name: &str) -> GhogResult<Vec<Fix>> {
    let stored: Vec<StoredFix> = serde_json::from_slice(bytes)
        .map_err(|err| container_error(format!("{}: {}", name, err)))?;
    let mut positional = false;
    let mut numeric_utc = false;
    let mut fixes = Vec::with_capacity(stored.len());
    for fix in &stored {
        let (lon, lat, hgt, utc) = match fix {
            StoredFix::Positional(lon, lat, hgt, utc) => {
                positional = true;
                (*lon, *lat, *hgt, utc)
            }
            StoredFix::Record { lon, lat, hgt, utc } => (*lon, *lat, *hgt, utc),
        };
        let (utc, repaired) = utc.resolve()?;
        numeric_utc |= repaired;
        fixes.push(Fix::new(lon, lat, hgt, utc));
    }
    if positional {
        warn!("{} stores fixes as positional arrays; repacking", name);
    }
    if numeric_utc {
        warn!("{} stores UTC as Unix seconds; converting to timestamps", name);
    }
    Ok(fixes)
}

fn decode_times(bytes: &[u8], name: &str) -> GhogResult<Vec<Fix>> {
    let stored: Vec<StoredUtc> = serde_json::from_slice(bytes)
        .map_err(|err| container_error(format!("{}: {}", name, err)))?;
    let times = stored
        .iter()
        .map(|utc| utc.resolve().map(|(utc, _)| utc))
        .collect::<GhogResult<Vec<_>>>()?;
    Ok(zero_fixes(&times))
}

fn decode_attrs(bytes: &[u8], name: &str) -> GhogResult<Attributes> {
    let mut attrs: Attributes = serde_json::from_slice(bytes)
        .map_err(|err| container_error(format!("{}: {}", name, err)))?;
    for (legacy, current) in LEGACY_KEYS {
        if attrs.contains_key(current) {
            continue;
        }
        if let Some(value) = attrs.remove(legacy) {
            warn!("{} uses attribute '{}'; renaming to '{}'", name, legacy, current);
            attrs.insert(current, value);
        }
    }
    Ok(attrs)
}

/// Groups present in the container at `path`, sorted.
pub fn groups(path: impl AsRef<Path>) -> GhogResult<Vec<String>> {
    let archive = open_archive(path.as_ref())?;
    Ok(group_names(&archive).into_iter().collect())
}

/// Loads one group, repairing legacy layouts.
pub fn load(path: impl AsRef<Path>, group: &str) -> GhogResult<Dataset> {
    let path = path.as_ref();
    check_group(group)?;
    let mut archive = open_archive(path)?;
    if !group_names(&archive).contains(group) {
        return Err(container_error(format!("no group '{}' in {}", group, path.display())));
    }
    let member = |name: &str| format!("{}/{}", group, name);

    let traces = if let Some(bytes) = read_member(&mut archive, &member(TRACES_MEMBER))? {
        decode_traces(&bytes, &member(TRACES_MEMBER))?
    } else if let Some(bytes) = read_member(&mut archive, &member(LEGACY_TRACES_MEMBER))? {
        warn!(
            "{} has no {}; reading traces from {}",
            path.display(),
            member(TRACES_MEMBER),
            member(LEGACY_TRACES_MEMBER)
        );
        decode_traces(&bytes, &member(LEGACY_TRACES_MEMBER))?
    } else {
        return Err(container_error(format!("group '{}' in {} has no traces", group, path.display())));
    };

    let fixes = if let Some(bytes) = read_member(&mut archive, &member(FIXES_MEMBER))? {
        decode_fixes(&bytes, &member(FIXES_MEMBER))?
    } else if let Some(bytes) = read_member(&mut archive, &member(LEGACY_TIMES_MEMBER))? {
        warn!(
            "{} has only trace times for group '{}'; positions are zero",
            path.display(),
            group
        );
        decode_times(&bytes, &member(LEGACY_TIMES_MEMBER))?
    } else {
        return Err(container_error(format!("group '{}' in {} has no fixes", group, path.display())));
    };

    let attrs = match read_member(&mut archive, &member(ATTRS_MEMBER))? {
        Some(bytes) => decode_attrs(&bytes, &member(ATTRS_MEMBER))?,
        None => {
            return Err(container_error(format!(
                "group '{}' in {} has no attributes",
                group,
                path.display()
            )))
        }
    };

    let dataset = Dataset::new(traces, fixes, attrs)?;
    debug!(
        "loaded group '{}' from {}: {} samples x {} traces",
        group,
        path.display(),
        dataset.sample_count(),
        dataset.trace_count()
    );
    Ok(dataset)
}

fn write_member<W: Write + Seek>(
    writer: &mut ZipWriter<W>,
    name: String,
    bytes: &[u8],
) -> GhogResult<()> {
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    writer
        .start_file(name.as_str(), options)
        .map_err(|err| container_error(format!("cannot write {}: {}", name, err)))?;
    writer.write_all(bytes)?;
    Ok(())
}

/// Writes `dataset` as `group`, replacing an existing group only when
/// `overwrite` is set. Other groups are carried over unchanged.
pub fn save(path: impl AsRef<Path>, group: &str, dataset: &Dataset, overwrite: bool) -> GhogResult<()> {
    let path = path.as_ref();
    check_group(group)?;
    dataset.validate()?;

    let mut existing = if path.exists() { Some(open_archive(path)?) } else { None };
    if let Some(archive) = &existing {
        if group_names(archive).contains(group) {
            if !overwrite {
                return Err(GhogError::ContainerConflict {
                    group: group.to_string(),
                    path: path.display().to_string(),
                });
            }
            debug!("replacing group '{}' in {}", group, path.display());
        }
    }

    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let mut staging = NamedTempFile::new_in(&directory)?;
    {
        let mut writer = ZipWriter::new(staging.as_file_mut());
        if let Some(archive) = existing.as_mut() {
            for index in 0..archive.len() {
                let entry = archive
                    .by_index_raw(index)
                    .map_err(|err| container_error(format!("cannot copy entry {}: {}", index, err)))?;
                let replaced = split_entry(entry.name()).map_or(false, |(owner, _)| owner == group);
                if replaced {
                    continue;
                }
                writer
                    .raw_copy_file(entry)
                    .map_err(|err| container_error(format!("cannot copy entry {}: {}", index, err)))?;
            }
        }

        let fixes = serde_json::to_vec(dataset.fixes())
            .map_err(|err| container_error(format!("cannot encode fixes: {}", err)))?;
        let attrs = serde_json::to_vec(dataset.attrs())
            .map_err(|err| container_error(format!("cannot encode attributes: {}", err)))?;
        write_member(&mut writer, format!("{}/{}", group, TRACES_MEMBER), &encode_traces(dataset.traces())?)?;
        write_member(&mut writer, format!("{}/{}", group, FIXES_MEMBER), &fixes)?;
        write_member(&mut writer, format!("{}/{}", group, ATTRS_MEMBER), &attrs)?;
        writer
            .finish()
            .map_err(|err| container_error(format!("cannot finish {}: {}", path.display(), err)))?;
    }
    drop(existing);

    staging.persist(path).map_err(|err| GhogError::Io(err.error))?;
    debug!("saved group '{}' to {}", group, path.display());
    Ok(())
}
