//! MJPEG frame extraction
//!
//! Parsing only: no I/O policy, no concurrency.

mod extractor;
mod types;

pub use extractor::FrameExtractor;
pub use types::{
    ExtractorLimits, Frame, FrameHeader, TaggedFrame, CONTENT_LENGTH, START_OF_IMAGE,
};
