// ============================================================================
// OPS — user-invoked actions over the projection scene
// ============================================================================
//
// These are the operator-style entry points the host's menus/keymaps (and the
// headless CLI) call. Every op reports how many items it affected; zero
// affected items is worth a warning to the user, never an error.

use std::path::{Path, PathBuf};

use crate::cache::ResidencyCache;
use crate::error::ProjectionError;
use crate::gpu::HeadlessBackend;
use crate::io;
use crate::log_warn;
use crate::scene::{base_name_of, CameraId, Image, ImageSource, Scene};
use crate::selector::{self, CycleDirection, SelectionStrategy, Viewpoint};

/// Outcome of one user action.
#[derive(Clone, Debug, Default)]
pub struct OpReport {
    pub affected: usize,
    pub skipped: usize,
    pub detail: String,
}

impl OpReport {
    fn new(affected: usize, skipped: usize, detail: impl Into<String>) -> Self {
        let report = Self {
            affected,
            skipped,
            detail: detail.into(),
        };
        if report.affected == 0 {
            log_warn!("{} — nothing affected", report.detail);
        }
        report
    }
}

impl std::fmt::Display for OpReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({} affected", self.detail, self.affected)?;
        if self.skipped > 0 {
            write!(f, ", {} skipped", self.skipped)?;
        }
        write!(f, ")")
    }
}

// ----------------------------------------------------------------------------
// Bind images by name
// ----------------------------------------------------------------------------

/// Expand glob patterns and literal paths into a deduplicated, ordered list.
pub fn resolve_patterns(patterns: &[String]) -> Vec<PathBuf> {
    let mut result: Vec<PathBuf> = Vec::new();

    for pattern in patterns {
        let as_path = Path::new(pattern);

        if as_path.exists() {
            // Literal path — use directly
            if !result.iter().any(|p| p.as_path() == as_path) {
                result.push(as_path.to_path_buf());
            }
            continue;
        }

        // Treat as glob pattern
        match glob::glob(pattern) {
            Ok(entries) => {
                let mut matched = false;
                for entry in entries.flatten() {
                    if !result.contains(&entry) {
                        result.push(entry);
                    }
                    matched = true;
                }
                if !matched {
                    log_warn!("pattern '{}' matched no files", pattern);
                }
            }
            Err(e) => {
                log_warn!("invalid glob '{}': {}", pattern, e);
            }
        }
    }

    result
}

/// Bind photographs to their cameras by base filename: `IMG_0042.jpg` binds
/// to the camera named `img_0042` (matching is case-insensitive and ignores
/// the extension). Files with no matching camera are counted as skipped;
/// already-bound cameras are rebound to the new file.
pub fn bind_images_by_name(scene: &mut Scene, patterns: &[String]) -> OpReport {
    let files = resolve_patterns(patterns);
    let mut bound = 0usize;
    let mut skipped = 0usize;

    for path in files {
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let base = base_name_of(&file_name);

        let targets: Vec<CameraId> = scene
            .camera_ids()
            .into_iter()
            .filter(|&id| {
                scene
                    .camera(id)
                    .map_or(false, |cam| base_name_of(&cam.name) == base)
            })
            .collect();

        if targets.is_empty() {
            skipped += 1;
            continue;
        }

        let image = scene.add_image(Image::new(file_name, ImageSource::File(path)));
        for id in targets {
            if let Some(camera) = scene.camera_mut(id) {
                camera.image = Some(image);
                bound += 1;
            }
        }
    }

    OpReport::new(bound, skipped, "bind images to cameras")
}

// ----------------------------------------------------------------------------
// Calibration import
// ----------------------------------------------------------------------------

/// Import a calibration CSV. An unsupported file (bad header) is the one
/// failure surfaced verbatim to the user, with an affected count of 0.
pub fn import_calibration(scene: &mut Scene, path: &Path) -> OpReport {
    match io::import_calibration_csv(scene, path) {
        Ok(report) => OpReport::new(
            report.updated,
            report.skipped + report.unmatched,
            format!(
                "import calibration from '{}' ({} unmatched row(s))",
                path.display(),
                report.unmatched
            ),
        ),
        Err(err @ ProjectionError::UnsupportedCalibrationFile { .. }) => {
            OpReport::new(0, 0, err.to_string())
        }
        Err(err) => OpReport::new(0, 0, format!("calibration import failed: {err}")),
    }
}

// ----------------------------------------------------------------------------
// Session validation
// ----------------------------------------------------------------------------

/// Dry-run the readiness requirements and report which cameras could
/// project right now. The detail string names the first blocker per camera,
/// which is what the user needs to fix.
pub fn validate_session(scene: &mut Scene) -> OpReport {
    // Size probing goes through a throwaway cache so memoization still works
    // without touching any GPU state.
    let mut cache = ResidencyCache::new(Box::new(HeadlessBackend::new()), 1);
    let mut ready = 0usize;
    let mut blockers: Vec<String> = Vec::new();

    if scene.paint_target.is_none() {
        blockers.push("no paint-target image".into());
    }

    for id in scene.camera_ids() {
        let Some(camera) = scene.camera(id) else {
            continue;
        };
        let name = camera.name.clone();
        if !camera.enabled {
            blockers.push(format!("camera '{name}' disabled"));
            continue;
        }
        let Some(image_id) = scene.bound_image(id) else {
            blockers.push(format!("camera '{name}' has no bound image"));
            continue;
        };
        match cache.static_size(scene, image_id) {
            Some(_) => ready += 1,
            None => blockers.push(format!("camera '{name}' image has unknown dimensions")),
        }
    }

    let detail = if blockers.is_empty() {
        "validate projection session".to_string()
    } else {
        format!("validate projection session: {}", blockers.join("; "))
    };
    OpReport::new(ready, blockers.len(), detail)
}

// ----------------------------------------------------------------------------
// Active-camera selection
// ----------------------------------------------------------------------------

/// How the user asked for a camera.
pub enum CameraPick {
    ByName(String),
    ByView {
        viewpoint: Viewpoint,
        strategy: SelectionStrategy,
        tolerance: f64,
    },
    Cycle(CycleDirection),
}

pub fn set_active_camera(scene: &mut Scene, pick: CameraPick) -> OpReport {
    let chosen = match pick {
        CameraPick::ByName(name) => {
            let base = base_name_of(&name);
            scene
                .camera_ids()
                .into_iter()
                .find(|&id| {
                    scene
                        .camera(id)
                        .map_or(false, |c| base_name_of(&c.name) == base)
                })
        }
        CameraPick::ByView {
            viewpoint,
            strategy,
            tolerance,
        } => selector::pick_camera(scene, &viewpoint, strategy, tolerance),
        CameraPick::Cycle(direction) => {
            selector::cycle_camera(scene, scene.active_camera, direction)
        }
    };

    match chosen {
        Some(id) => {
            let changed = scene.active_camera != Some(id);
            scene.active_camera = Some(id);
            OpReport::new(changed as usize, 0, "set active camera")
        }
        None => OpReport::new(0, 0, "set active camera"),
    }
}

// ----------------------------------------------------------------------------
// GPU memory
// ----------------------------------------------------------------------------

/// Evict every non-protected resident image.
pub fn free_gpu_memory(cache: &mut ResidencyCache) -> OpReport {
    let freed = cache.free_excess();
    OpReport::new(freed, 0, "free excess GPU memory")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scene::Camera;

    #[test]
    fn bind_matches_camera_stems_case_insensitively() {
        let dir = std::env::temp_dir().join("projpaint_bind_test");
        std::fs::create_dir_all(&dir).unwrap();
        let photo = dir.join("IMG_0007.png");
        std::fs::write(&photo, b"stub").unwrap();

        let mut scene = Scene::new();
        let cam = scene.add_camera(Camera::new("img_0007"));
        scene.add_camera(Camera::new("unrelated"));

        let report =
            bind_images_by_name(&mut scene, &[photo.to_string_lossy().into_owned()]);
        assert_eq!(report.affected, 1);
        assert!(scene.camera(cam).unwrap().image.is_some());

        std::fs::remove_file(&photo).ok();
    }

    #[test]
    fn bind_counts_orphan_files_as_skipped() {
        let dir = std::env::temp_dir().join("projpaint_orphan_test");
        std::fs::create_dir_all(&dir).unwrap();
        let photo = dir.join("nobody_home.png");
        std::fs::write(&photo, b"stub").unwrap();

        let mut scene = Scene::new();
        scene.add_camera(Camera::new("img_0007"));

        let report =
            bind_images_by_name(&mut scene, &[photo.to_string_lossy().into_owned()]);
        assert_eq!(report.affected, 0);
        assert_eq!(report.skipped, 1);

        std::fs::remove_file(&photo).ok();
    }

    #[test]
    fn validate_reports_blockers_per_camera() {
        let mut scene = Scene::new();
        // Ready camera
        let img = scene.add_image(Image::new(
            "a.png",
            ImageSource::Generated {
                width: 32,
                height: 32,
            },
        ));
        let mut cam = Camera::new("a");
        cam.image = Some(img);
        scene.add_camera(cam);
        scene.paint_target = Some(img);
        // Blocked camera: nothing bound
        scene.add_camera(Camera::new("b"));

        let report = validate_session(&mut scene);
        assert_eq!(report.affected, 1);
        assert_eq!(report.skipped, 1);
        assert!(report.detail.contains("'b' has no bound image"));
    }

    #[test]
    fn set_active_by_name_reports_zero_on_unknown() {
        let mut scene = Scene::new();
        scene.add_camera(Camera::new("a"));
        let report = set_active_camera(&mut scene, CameraPick::ByName("missing".into()));
        assert_eq!(report.affected, 0);
        assert!(scene.active_camera.is_none());

        let report = set_active_camera(&mut scene, CameraPick::ByName("A.jpg".into()));
        assert_eq!(report.affected, 1);
        assert!(scene.active_camera.is_some());
    }
}
