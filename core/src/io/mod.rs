//! Getting datasets in and out: raw digitizer captures, the grouped
//! container, and alignment of external position streams.

pub mod capture;
pub mod container;
pub mod position;

pub use capture::{
    decode, decode_file, encode_capture, Capture, CaptureHeader, DecoderConfig, RawRecord,
    TimestampWidth, TruncationPolicy,
};
pub use container::{groups, load, save};
pub use position::{align_fixes, zero_fixes, TimedFix};
