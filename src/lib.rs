//! ProjPaint — projection painting runtime.
//!
//! Paint onto a mesh through photographs taken from calibrated camera poses.
//! The crate owns the session state machine, camera selection, bounded GPU
//! image residency, the calibrated-lens projector mapping, and the
//! paint-safety heuristics; rendering and brush strokes belong to the host.

#![allow(dead_code)] // API surface kept for host integrations and future ops
#![allow(clippy::too_many_arguments)]

#[macro_use]
pub mod logger;

pub mod cache;
pub mod calibrate;
pub mod cli;
pub mod error;
pub mod gpu;
pub mod host;
pub mod io;
pub mod ops;
pub mod probe;
pub mod safety;
pub mod scene;
pub mod selector;
pub mod session;

pub use cache::ResidencyCache;
pub use calibrate::{compute_projector_parameters, ParameterBlock};
pub use error::ProjectionError;
pub use scene::{Camera, CameraId, Image, ImageId, LensModel, Scene, SensorFit};
pub use session::{ProjectionSettings, SessionController, SessionRegistry, SessionState};
