// ============================================================================
// PAINT SAFETY MONITOR — flag strokes the projection cannot support
// ============================================================================
//
// Painting through a projector goes wrong in two ways: the view drifts too
// far/oblique from the source photograph, or the brush covers more mesh than
// the photo has pixels for. Either heuristic below reduces that to a single
// boolean the controller forwards to the renderer (and, per configuration,
// uses to lock paint input).

use serde::{Deserialize, Serialize};

use crate::host::HostBridge;

/// Thresholds for both heuristics. All limits are strict upper bounds on
/// "still safe".
#[derive(Clone, Copy, Debug, Serialize, Deserialize)]
pub struct SafetyLimits {
    /// Analytic: view distance beyond which projection degrades (world units).
    pub distance_limit: f64,
    /// Analytic: on-screen brush radius budget (pixels).
    pub brush_radius_limit: f64,
    /// Analytic: average canvas dimension budget (pixels).
    pub canvas_size_limit: f64,
    /// Raycast: widest acceptable unprojected brush radius (world units).
    pub safe_world_radius: f64,
    /// Raycast sampling pattern: rings around the cursor...
    pub sample_rings: u32,
    /// ...and spokes per ring.
    pub sample_spokes: u32,
}

impl Default for SafetyLimits {
    fn default() -> Self {
        Self {
            distance_limit: 30.0,
            brush_radius_limit: 150.0,
            canvas_size_limit: 4096.0,
            safe_world_radius: 1.0,
            sample_rings: 2,
            sample_spokes: 8,
        }
    }
}

/// Combined normalized load of the three analytic factors. Risk when the
/// sum crosses 0.95: distance soaks up the whole budget on its own, while
/// brush radius and canvas size only start contributing past their limits.
pub fn analytic_risk(
    limits: &SafetyLimits,
    view_distance: f64,
    brush_radius: f64,
    canvas_average_dim: f64,
) -> bool {
    let sum = view_distance / limits.distance_limit
        + (brush_radius / limits.brush_radius_limit - 1.0)
        + (canvas_average_dim / limits.canvas_size_limit - 1.0);
    sum > 0.95
}

/// Sample the mesh under the brush footprint and compare the brush's
/// world-space extent against the safe radius.
///
/// Rays go through `sample_rings × sample_spokes` points spread radially
/// around the cursor, plus the cursor itself. Misses are ignored; with no
/// hits at all there is nothing under the brush and nothing at risk. The
/// on-screen radius unprojects through the view focal length at the average
/// hit distance.
pub fn raycast_risk(
    limits: &SafetyLimits,
    host: &dyn HostBridge,
    cursor: (f64, f64),
    brush_radius_px: f64,
    focal_length_px: f64,
) -> bool {
    let mut total = 0.0f64;
    let mut hits = 0u32;

    let mut sample = |x: f64, y: f64| {
        if let Some(distance) = host.raycast_screen((x, y)) {
            total += distance;
            hits += 1;
        }
    };

    sample(cursor.0, cursor.1);
    for ring in 1..=limits.sample_rings {
        let radius = brush_radius_px * ring as f64 / limits.sample_rings.max(1) as f64;
        for spoke in 0..limits.sample_spokes {
            let angle = std::f64::consts::TAU * spoke as f64 / limits.sample_spokes.max(1) as f64;
            sample(cursor.0 + radius * angle.cos(), cursor.1 + radius * angle.sin());
        }
    }

    if hits == 0 || focal_length_px <= 0.0 {
        return false;
    }
    let average_distance = total / hits as f64;
    let unprojected_radius = (brush_radius_px / focal_length_px).tan() * average_distance;
    unprojected_radius > limits.safe_world_radius
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::HostBridge;
    use nalgebra::{UnitQuaternion, Vector3};

    #[test]
    fn analytic_risk_at_the_documented_limits() {
        let limits = SafetyLimits {
            distance_limit: 30.0,
            brush_radius_limit: 150.0,
            canvas_size_limit: 4096.0,
            ..Default::default()
        };
        // All three factors exactly at their limits: 1.0 + 0 + 0 > 0.95
        assert!(analytic_risk(&limits, 30.0, 150.0, 4096.0));
        // Halving every input drops the sum well below the threshold
        assert!(!analytic_risk(&limits, 15.0, 75.0, 2048.0));
    }

    #[test]
    fn oversized_brush_alone_can_trip_the_analytic_check() {
        let limits = SafetyLimits::default();
        assert!(analytic_risk(&limits, 0.0, 300.0, 4096.0));
    }

    /// Host double whose mesh is a constant-depth plane covering only part
    /// of the screen.
    struct PlaneHost {
        depth: f64,
        hit_max_x: f64,
    }

    impl HostBridge for PlaneHost {
        fn ready(&self) -> bool {
            true
        }
        fn cursor_position(&self) -> (f64, f64) {
            (0.0, 0.0)
        }
        fn view_rotation(&self) -> UnitQuaternion<f64> {
            UnitQuaternion::identity()
        }
        fn view_forward(&self) -> Vector3<f64> {
            -Vector3::z()
        }
        fn view_position(&self) -> Vector3<f64> {
            Vector3::zeros()
        }
        fn view_distance(&self) -> f64 {
            self.depth
        }
        fn brush_radius_px(&self) -> f64 {
            40.0
        }
        fn input_suspended(&self) -> bool {
            false
        }
        fn raycast_screen(&self, point: (f64, f64)) -> Option<f64> {
            (point.0 <= self.hit_max_x).then_some(self.depth)
        }
    }

    #[test]
    fn raycast_risk_scales_with_hit_distance() {
        let limits = SafetyLimits {
            safe_world_radius: 0.5,
            sample_rings: 2,
            sample_spokes: 8,
            ..Default::default()
        };
        let near = PlaneHost {
            depth: 2.0,
            hit_max_x: f64::MAX,
        };
        let far = PlaneHost {
            depth: 200.0,
            hit_max_x: f64::MAX,
        };
        // 40 px brush through a 2000 px focal length: tan(0.02) ≈ 0.02
        // → 0.04 world units at depth 2, 4.0 at depth 200.
        assert!(!raycast_risk(&limits, &near, (0.0, 0.0), 40.0, 2000.0));
        assert!(raycast_risk(&limits, &far, (0.0, 0.0), 40.0, 2000.0));
    }

    #[test]
    fn all_misses_means_no_risk() {
        let limits = SafetyLimits::default();
        let host = PlaneHost {
            depth: 1e9,
            hit_max_x: f64::MIN,
        };
        assert!(!raycast_risk(&limits, &host, (0.0, 0.0), 40.0, 2000.0));
    }

    #[test]
    fn misses_do_not_drag_the_average() {
        // Half the pattern misses; the average must come only from hits.
        let limits = SafetyLimits {
            safe_world_radius: 0.5,
            sample_rings: 1,
            sample_spokes: 8,
            ..Default::default()
        };
        let host = PlaneHost {
            depth: 200.0,
            hit_max_x: 0.0, // only the left half of the pattern hits
        };
        assert!(raycast_risk(&limits, &host, (0.0, 0.0), 40.0, 2000.0));
    }
}
