//! Biometric device live streaming
//!
//! Pulls MJPEG frames from capture devices and hands them to display sinks.
//! A [`StreamController`] owns at most one background worker at a time; the
//! worker negotiates a device stream, extracts frames and reports status to
//! the host through the collaborator traits in [`policy`].

pub mod config;
pub mod device;
pub mod error;
pub mod frame;
pub mod policy;
pub mod sources;
pub mod stream;

pub use config::{StartPolicy, StreamConfig};
pub use device::{ByteSource, DeviceHandle, DeviceProvider, Modality, StreamSource};
pub use error::{Result, StreamError};
pub use frame::{ExtractorLimits, Frame, FrameExtractor, TaggedFrame};
pub use policy::{Collaborators, StatusMessage};
pub use stream::{FrameSink, StreamController, WorkerReport, WorkerState};
