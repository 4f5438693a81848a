// ============================================================================
// HOST CONTRACTS — everything the core consumes from the surrounding tool
// ============================================================================
//
// The projection core never draws, never owns the viewport, and never edits
// mesh data directly. These traits are the full boundary: the host implements
// them over its view/input/mesh systems, tests implement them as doubles.

use nalgebra::{Matrix4, UnitQuaternion, Vector3};

use crate::calibrate::ParameterBlock;
use crate::scene::CameraId;

/// View, input and picking state, sampled once per tick.
pub trait HostBridge {
    /// True iff tool mode, paint-target image, active camera and its lens
    /// type are all valid for projection painting. Going false mid-session
    /// forces cancellation.
    fn ready(&self) -> bool;

    fn cursor_position(&self) -> (f64, f64);
    fn view_rotation(&self) -> UnitQuaternion<f64>;
    fn view_forward(&self) -> Vector3<f64>;
    fn view_position(&self) -> Vector3<f64>;
    fn view_distance(&self) -> f64;
    fn brush_radius_px(&self) -> f64;

    /// Cooperative suspension: while true the session skips cursor tracking
    /// and camera-image assignment but keeps passing input through.
    fn input_suspended(&self) -> bool;

    /// Cast a ray through the given screen point against the painted mesh.
    /// `Some(distance)` on a hit, `None` on a miss.
    fn raycast_screen(&self, point: (f64, f64)) -> Option<f64>;
}

/// Mesh-side collaborator owning the regenerable projector UV channel.
pub trait MeshUv {
    /// Bake the projector mapping into the dedicated UV channel, creating
    /// it if absent and overwriting it otherwise.
    fn create_or_replace_projector_uv(&mut self, projector: &Matrix4<f64>, aspect_scale: [f64; 2]);

    /// Drop any temporary projection data left on the mesh.
    fn clear_projector_uv(&mut self);
}

/// Render-side collaborator. Consumes the projector parameters and risk flag
/// by name; also owns the viewport visibility of camera proxy objects.
pub trait RenderSink {
    fn apply(&mut self, block: &ParameterBlock, risk: bool);

    /// Gate paint input while the safety monitor reports risk.
    fn set_paint_locked(&mut self, locked: bool);

    /// Current viewport visibility of a camera proxy; `None` when the proxy
    /// object no longer exists on the host side.
    fn proxy_visible(&self, camera: CameraId) -> Option<bool>;

    /// Returns false when the proxy no longer exists — callers restoring
    /// visibility continue with the remaining proxies.
    fn set_proxy_visible(&mut self, camera: CameraId, visible: bool) -> bool;
}
