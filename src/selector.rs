// ============================================================================
// CAMERA SELECTOR — pick the active projector camera from the viewpoint
// ============================================================================
//
// Two scoring strategies gate candidacy, then proximity decides. The raw
// similarity (quaternion or forward-vector dot product) is remapped through
// fixed calibration constants into a 0..1 tolerance space so the user-facing
// tolerance slider behaves uniformly across both strategies.

use nalgebra::{UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};

use crate::scene::{CameraId, Scene};

/// Raw-similarity remap range. These are calibration constants, not knobs:
/// they map the useful band of dot-product values onto the tolerance space.
pub const SCORE_MIN: f64 = 0.852;
pub const SCORE_MAX: f64 = 0.999;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SelectionStrategy {
    /// Full orientation match: |dot| of the view and camera rotation
    /// quaternions. Sensitive to roll as well as direction.
    OrientationSimilarity,
    /// Forward-vector match only: dot of the view and camera forward axes.
    ViewDirection,
}

/// Where the user is looking from, sampled by the session each tick.
#[derive(Clone, Copy, Debug)]
pub struct Viewpoint {
    pub position: Vector3<f64>,
    pub rotation: UnitQuaternion<f64>,
    pub forward: Vector3<f64>,
}

fn lerp(a: f64, b: f64, t: f64) -> f64 {
    a + (b - a) * t
}

/// Similarity score of one camera against the viewpoint, in tolerance space.
pub fn camera_score(
    scene: &Scene,
    id: CameraId,
    viewpoint: &Viewpoint,
    strategy: SelectionStrategy,
) -> Option<f64> {
    let camera = scene.camera(id)?;
    let raw = match strategy {
        SelectionStrategy::OrientationSimilarity => {
            let dot = viewpoint
                .rotation
                .quaternion()
                .coords
                .dot(&camera.rotation().quaternion().coords);
            dot.abs()
        }
        SelectionStrategy::ViewDirection => viewpoint.forward.dot(&camera.forward()),
    };
    Some(lerp(SCORE_MIN, SCORE_MAX, raw))
}

/// Pick the active camera for the current viewpoint.
///
/// Candidates are enabled, non-hidden cameras with a resolvable bound image
/// whose score strictly exceeds `tolerance`. Zero candidates returns `None`
/// (callers keep the previous active camera); with several, the one nearest
/// the viewpoint wins, equal distances falling back to the higher score.
pub fn pick_camera(
    scene: &Scene,
    viewpoint: &Viewpoint,
    strategy: SelectionStrategy,
    tolerance: f64,
) -> Option<CameraId> {
    let mut best: Option<(CameraId, f64, f64)> = None; // (id, distance, score)

    for id in scene.camera_ids() {
        let camera = match scene.camera(id) {
            Some(c) => c,
            None => continue,
        };
        if !camera.enabled || camera.hidden || scene.bound_image(id).is_none() {
            continue;
        }
        let score = match camera_score(scene, id, viewpoint, strategy) {
            Some(s) if s > tolerance => s,
            _ => continue,
        };
        let distance = (camera.position() - viewpoint.position).norm();

        let replace = match best {
            None => true,
            Some((_, best_dist, best_score)) => {
                distance < best_dist || (distance == best_dist && score > best_score)
            }
        };
        if replace {
            best = Some((id, distance, score));
        }
    }

    best.map(|(id, _, _)| id)
}

// ----------------------------------------------------------------------------
// Radial ordering — next/prev cycling
// ----------------------------------------------------------------------------

/// Azimuth of a camera's view axis projected onto the XY plane.
fn azimuth(forward: Vector3<f64>) -> f64 {
    (-forward.x).atan2(-forward.y)
}

/// All selectable cameras sorted by descending azimuth of their view axis.
/// This is the cyclic sequence "next"/"prev" step through.
pub fn radial_order(scene: &Scene) -> Vec<CameraId> {
    let mut ordered: Vec<(CameraId, f64)> = scene
        .camera_ids()
        .into_iter()
        .filter_map(|id| {
            let camera = scene.camera(id)?;
            if !camera.enabled || camera.hidden || scene.bound_image(id).is_none() {
                return None;
            }
            Some((id, azimuth(camera.forward())))
        })
        .collect();
    ordered.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    ordered.into_iter().map(|(id, _)| id).collect()
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CycleDirection {
    Next,
    Prev,
}

/// Step circularly through the radial ordering from the current camera,
/// wrapping at both ends. With no current camera the first ordered camera
/// is returned; an empty ordering yields `None`.
pub fn cycle_camera(
    scene: &Scene,
    current: Option<CameraId>,
    direction: CycleDirection,
) -> Option<CameraId> {
    let order = radial_order(scene);
    if order.is_empty() {
        return None;
    }
    let at = current.and_then(|c| order.iter().position(|&id| id == c));
    let next = match (at, direction) {
        (None, _) => 0,
        (Some(i), CycleDirection::Next) => (i + 1) % order.len(),
        (Some(i), CycleDirection::Prev) => (i + order.len() - 1) % order.len(),
    };
    Some(order[next])
}
