//! Concrete device and stream collaborators

mod devices;
mod file;
mod http;

pub use devices::StaticDeviceProvider;
pub use file::{EndpointStreamSource, FileStreamSource};
pub use http::HttpStreamSource;
