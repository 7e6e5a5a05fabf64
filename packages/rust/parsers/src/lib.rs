//! Parsers for apitrace tool output.
//!
//! - [`call`]: one dump line to a [`Call`]
//! - [`dump`]: a whole dump to frames, including multi-line shader sources
//! - [`images`]: `dump-images` manifests to an [`ImageSet`]
//! - [`retrace`]: `glretrace` JSON state to [`RetraceData`]
//! - [`trace_log`]: the trace file path from the tracer's stderr
//!
//! Parsing is best-effort throughout: unusable lines are skipped and logged,
//! never returned as errors.

pub mod call;
pub mod dump;
pub mod images;
pub mod params;
pub mod retrace;
pub mod trace_log;

pub use call::{Call, CallLine, Malformed, PartialCall, parse_call_line};
pub use dump::{DumpParser, DumpStats, Frame, TraceDump, parse_dump};
pub use images::{ImageSet, parse_image_manifest};
pub use params::Param;
pub use retrace::{
    AttrMap, AttrValue, DecodeFailure, FrameBuffer, RetraceData, decode_retrace,
    try_decode_retrace,
};
pub use trace_log::find_trace_file;
