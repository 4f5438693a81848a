// ============================================================================
// CALIBRATION MODEL — camera intrinsics → projector parameter block + UV map
// ============================================================================
//
// Pure functions only: everything here is a deterministic mapping from a
// camera's intrinsics and its bound image's pixel dimensions to (a) the
// parameter block the renderer consumes and (b) the projector matrix baked
// into the mesh's regenerable UV channel. No host access, no caching.

use nalgebra::Matrix4;
use serde::Serialize;

use crate::scene::{Camera, LensModel, SensorFit};

/// Renderer-consumable description of one projector.
///
/// Carries the lens tag with exactly the coefficient subset that model
/// declares — the enum makes reading an undeclared coefficient impossible.
#[derive(Clone, Debug, Serialize)]
pub struct ParameterBlock {
    pub image_width: u32,
    pub image_height: u32,
    pub focal_length_mm: f64,
    pub sensor_size_mm: f64,
    pub shift_x: f64,
    pub shift_y: f64,
    pub skew: f64,
    pub aspect_correction: f64,
    pub lens: LensModel,
}

/// Compute the renderer parameter block for a camera/image pair.
pub fn compute_projector_parameters(camera: &Camera, image_size: (u32, u32)) -> ParameterBlock {
    let fit = resolve_sensor_fit(camera.sensor_fit, image_size);
    ParameterBlock {
        image_width: image_size.0,
        image_height: image_size.1,
        focal_length_mm: camera.focal_length_mm,
        sensor_size_mm: sensor_size_for_fit(camera, fit),
        shift_x: camera.shift_x,
        shift_y: camera.shift_y,
        skew: camera.skew,
        aspect_correction: camera.aspect_correction,
        lens: camera.lens,
    }
}

/// Resolve `SensorFit::Auto` by comparing the image's axes: a landscape
/// image fits the horizontal sensor axis, a portrait one the vertical.
pub fn resolve_sensor_fit(fit: SensorFit, image_size: (u32, u32)) -> SensorFit {
    match fit {
        SensorFit::Auto => {
            if image_size.0 >= image_size.1 {
                SensorFit::Horizontal
            } else {
                SensorFit::Vertical
            }
        }
        explicit => explicit,
    }
}

fn sensor_size_for_fit(camera: &Camera, fit: SensorFit) -> f64 {
    match fit {
        SensorFit::Vertical => camera.sensor_height_mm,
        _ => camera.sensor_width_mm,
    }
}

/// Two-axis scale keeping the image's aspect ratio intact inside the unit
/// projector frustum. The fitted axis spans the frustum exactly; the other
/// axis is scaled by the (correction-adjusted) aspect ratio.
pub fn aspect_scale(camera: &Camera, image_size: (u32, u32)) -> [f64; 2] {
    let (w, h) = (image_size.0.max(1) as f64, image_size.1.max(1) as f64);
    let aspect = (w / h) * camera.aspect_correction;
    match resolve_sensor_fit(camera.sensor_fit, image_size) {
        SensorFit::Vertical => [1.0 / aspect, 1.0],
        _ => [1.0, aspect],
    }
}

/// Projector matrix mapping world space into the camera's unit UV frustum.
///
/// Cameras look down −Z in their local frame. With `f` the focal length in
/// sensor-size units and `(sx, sy)` the aspect scale, a camera-space point
/// maps to
///
/// ```text
///   u = f·sx·(x/−z) + skew·(y/−z) + 0.5 + shift_x
///   v = f·sy·(y/−z)               + 0.5 + shift_y
/// ```
///
/// expressed homogeneously (w' = −z) and composed with the inverse world
/// transform, so the result applies directly to mesh vertices.
pub fn projector_matrix(camera: &Camera, image_size: (u32, u32)) -> Matrix4<f64> {
    let fit = resolve_sensor_fit(camera.sensor_fit, image_size);
    let f = camera.focal_length_mm / sensor_size_for_fit(camera, fit).max(f64::EPSILON);
    let [sx, sy] = aspect_scale(camera, image_size);

    let cx = 0.5 + camera.shift_x;
    let cy = 0.5 + camera.shift_y;

    #[rustfmt::skip]
    let intrinsic = Matrix4::new(
        f * sx, camera.skew, -cx,  0.0,
        0.0,    f * sy,      -cy,  0.0,
        0.0,    0.0,         -1.0, 0.0,
        0.0,    0.0,         -1.0, 0.0,
    );

    intrinsic * camera.transform.inverse().to_homogeneous()
}

/// Apply a projector matrix to a world-space point, yielding UV coordinates.
/// Returns `None` for points at or behind the projector's focal plane.
pub fn project_point(matrix: &Matrix4<f64>, point: nalgebra::Vector3<f64>) -> Option<[f64; 2]> {
    let p = matrix * nalgebra::Vector4::new(point.x, point.y, point.z, 1.0);
    if p.w <= 0.0 {
        return None;
    }
    Some([p.x / p.w, p.y / p.w])
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use nalgebra::Vector3;

    fn test_camera() -> Camera {
        let mut cam = Camera::new("cam");
        cam.focal_length_mm = 36.0;
        cam.sensor_width_mm = 36.0;
        cam.sensor_height_mm = 24.0;
        cam
    }

    #[test]
    fn auto_fit_follows_image_orientation() {
        assert_eq!(
            resolve_sensor_fit(SensorFit::Auto, (1920, 1080)),
            SensorFit::Horizontal
        );
        assert_eq!(
            resolve_sensor_fit(SensorFit::Auto, (1080, 1920)),
            SensorFit::Vertical
        );
        // Square images fit horizontally
        assert_eq!(
            resolve_sensor_fit(SensorFit::Auto, (512, 512)),
            SensorFit::Horizontal
        );
        // Explicit fits pass through untouched
        assert_eq!(
            resolve_sensor_fit(SensorFit::Vertical, (1920, 1080)),
            SensorFit::Vertical
        );
    }

    #[test]
    fn aspect_scale_preserves_image_ratio() {
        let cam = test_camera();
        let [sx, sy] = aspect_scale(&cam, (2000, 1000));
        assert_relative_eq!(sx, 1.0);
        assert_relative_eq!(sy, 2.0);

        let [sx, sy] = aspect_scale(&cam, (1000, 2000));
        assert_relative_eq!(sx, 2.0);
        assert_relative_eq!(sy, 1.0);
    }

    #[test]
    fn parameter_block_carries_exact_lens_subset() {
        let mut cam = test_camera();
        cam.lens = LensModel::Brown3 {
            k1: 0.1,
            k2: -0.02,
            k3: 0.003,
        };
        let block = compute_projector_parameters(&cam, (800, 600));
        assert_eq!(block.image_width, 800);
        assert_eq!(block.image_height, 600);
        match block.lens {
            LensModel::Brown3 { k1, k2, k3 } => {
                assert_relative_eq!(k1, 0.1);
                assert_relative_eq!(k2, -0.02);
                assert_relative_eq!(k3, 0.003);
            }
            other => panic!("wrong lens forwarded: {:?}", other),
        }
    }

    #[test]
    fn vertical_fit_uses_sensor_height() {
        let cam = test_camera();
        let block = compute_projector_parameters(&cam, (1080, 1920));
        assert_relative_eq!(block.sensor_size_mm, 24.0);
        let block = compute_projector_parameters(&cam, (1920, 1080));
        assert_relative_eq!(block.sensor_size_mm, 36.0);
    }

    #[test]
    fn identity_camera_projects_axis_point_to_frustum_center() {
        // Square image so the aspect scale is 1:1, f = 1.0
        let mut cam = test_camera();
        cam.sensor_height_mm = 36.0;
        let m = projector_matrix(&cam, (1000, 1000));

        // A point straight ahead of the camera lands at the frustum center.
        let uv = project_point(&m, Vector3::new(0.0, 0.0, -5.0)).unwrap();
        assert_relative_eq!(uv[0], 0.5, epsilon = 1e-12);
        assert_relative_eq!(uv[1], 0.5, epsilon = 1e-12);

        // One focal-length off-axis at unit depth lands one frustum unit over.
        let uv = project_point(&m, Vector3::new(1.0, 0.0, -1.0)).unwrap();
        assert_relative_eq!(uv[0], 1.5, epsilon = 1e-12);

        // Points behind the camera do not project.
        assert!(project_point(&m, Vector3::new(0.0, 0.0, 1.0)).is_none());
    }

    #[test]
    fn shift_offsets_the_principal_point() {
        let mut cam = test_camera();
        cam.sensor_height_mm = 36.0;
        cam.shift_x = 0.1;
        cam.shift_y = -0.05;
        let m = projector_matrix(&cam, (1000, 1000));
        let uv = project_point(&m, Vector3::new(0.0, 0.0, -2.0)).unwrap();
        assert_relative_eq!(uv[0], 0.6, epsilon = 1e-12);
        assert_relative_eq!(uv[1], 0.45, epsilon = 1e-12);
    }
}
