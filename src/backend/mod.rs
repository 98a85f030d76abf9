//! Backend abstraction layer
//!
//! Provides the graphics traits and types implemented by the wgpu backend and
//! by the recording headless backend used in tests.

pub mod headless;
pub mod traits;
pub mod types;
pub mod wgpu_backend;

pub use headless::{HeadlessBackend, RecordedCommand};
pub use traits::*;
pub use types::*;
