// ============================================================================
// SCENE MODEL — calibrated cameras, source images, generation-checked handles
// ============================================================================
//
// The host owns the real scene objects; this module mirrors the subset the
// projection core reads. Handles are (index, generation) pairs: removing an
// object bumps the slot's generation, so a handle held across frames simply
// stops resolving instead of dangling. Every consumer treats a failed lookup
// as "purge and continue", never as a crash.

use std::path::PathBuf;

use nalgebra::{Isometry3, UnitQuaternion, Vector3};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ----------------------------------------------------------------------------
// Handles
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CameraId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageId {
    pub(crate) index: u32,
    pub(crate) generation: u32,
}

/// One storage slot. `value: None` marks a removed object; the generation
/// only ever increases, so old handles can never alias a reused slot.
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

// ----------------------------------------------------------------------------
// Lens models
// ----------------------------------------------------------------------------

/// Distortion function family plus exactly the coefficients that family
/// defines. Consumers must never read a coefficient outside the variant —
/// the enum makes that unrepresentable.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub enum LensModel {
    /// Ideal perspective lens, no distortion term.
    Perspective,
    Division {
        k1: f64,
    },
    Brown3 {
        k1: f64,
        k2: f64,
        k3: f64,
    },
    Brown3Tangential {
        k1: f64,
        k2: f64,
        k3: f64,
        t1: f64,
        t2: f64,
    },
    Brown4 {
        k1: f64,
        k2: f64,
        k3: f64,
        k4: f64,
    },
    Brown4Tangential {
        k1: f64,
        k2: f64,
        k3: f64,
        k4: f64,
        t1: f64,
        t2: f64,
    },
}

impl LensModel {
    pub fn name(&self) -> &'static str {
        match self {
            LensModel::Perspective => "perspective",
            LensModel::Division { .. } => "division",
            LensModel::Brown3 { .. } => "brown3",
            LensModel::Brown3Tangential { .. } => "brown3+tangential",
            LensModel::Brown4 { .. } => "brown4",
            LensModel::Brown4Tangential { .. } => "brown4+tangential",
        }
    }

    /// Derive the model from solved coefficients, as calibration importers
    /// do: which of k2/k3/k4/t1/t2 are non-zero picks the family. An
    /// all-zero tail still yields `Division` — the undistorted
    /// `Perspective` model is an explicit user choice, never inferred.
    pub fn from_coefficients(k1: f64, k2: f64, k3: f64, k4: f64, t1: f64, t2: f64) -> Self {
        let tangential = t1 != 0.0 || t2 != 0.0;
        if k4 != 0.0 {
            if tangential {
                LensModel::Brown4Tangential { k1, k2, k3, k4, t1, t2 }
            } else {
                LensModel::Brown4 { k1, k2, k3, k4 }
            }
        } else if k2 != 0.0 || k3 != 0.0 {
            if tangential {
                LensModel::Brown3Tangential { k1, k2, k3, t1, t2 }
            } else {
                LensModel::Brown3 { k1, k2, k3 }
            }
        } else if tangential {
            LensModel::Brown3Tangential { k1, k2: 0.0, k3: 0.0, t1, t2 }
        } else {
            LensModel::Division { k1 }
        }
    }
}

// ----------------------------------------------------------------------------
// Cameras
// ----------------------------------------------------------------------------

/// Which sensor axis the focal length is expressed against.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorFit {
    /// Pick from the bound image: landscape → horizontal, portrait → vertical.
    Auto,
    Horizontal,
    Vertical,
}

/// A calibrated camera acting as a projector. Created and edited by the
/// host's property system; read-only to the core.
#[derive(Clone, Debug)]
pub struct Camera {
    pub name: String,
    pub transform: Isometry3<f64>,
    pub focal_length_mm: f64,
    pub sensor_width_mm: f64,
    pub sensor_height_mm: f64,
    pub sensor_fit: SensorFit,
    /// Principal-point offset, in sensor-normalized units.
    pub shift_x: f64,
    pub shift_y: f64,
    pub skew: f64,
    pub aspect_correction: f64,
    pub lens: LensModel,
    pub enabled: bool,
    pub hidden: bool,
    pub image: Option<ImageId>,
}

impl Camera {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transform: Isometry3::identity(),
            focal_length_mm: 35.0,
            sensor_width_mm: 36.0,
            sensor_height_mm: 24.0,
            sensor_fit: SensorFit::Auto,
            shift_x: 0.0,
            shift_y: 0.0,
            skew: 0.0,
            aspect_correction: 1.0,
            lens: LensModel::Perspective,
            enabled: true,
            hidden: false,
            image: None,
        }
    }

    pub fn position(&self) -> Vector3<f64> {
        self.transform.translation.vector
    }

    pub fn rotation(&self) -> UnitQuaternion<f64> {
        self.transform.rotation
    }

    /// World-space view direction. Cameras look down their local −Z axis.
    pub fn forward(&self) -> Vector3<f64> {
        self.transform.rotation * -Vector3::z()
    }
}

// ----------------------------------------------------------------------------
// Images
// ----------------------------------------------------------------------------

/// Where an image's pixels come from.
#[derive(Clone, Debug)]
pub enum ImageSource {
    /// Photograph on disk; bytes are read on demand for probing/upload.
    File(PathBuf),
    /// Bytes packed into the scene file by the host.
    Embedded(Vec<u8>),
    /// Procedurally generated (test grids, blank canvases); dimensions are
    /// declared rather than probed.
    Generated { width: u32, height: u32 },
}

/// A source photograph or paint canvas. Identity is stable for the session;
/// the dimension pair is memoized the first time it is successfully probed.
#[derive(Clone, Debug)]
pub struct Image {
    pub id: Uuid,
    pub name: String,
    pub source: ImageSource,
    pub(crate) static_size: Option<(u32, u32)>,
}

impl Image {
    pub fn new(name: impl Into<String>, source: ImageSource) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            source,
            static_size: None,
        }
    }

    /// Filename stem, lowercased, extension stripped — the key calibration
    /// importers match camera names against.
    pub fn base_name(&self) -> String {
        base_name_of(&self.name)
    }
}

/// Case-insensitive, extension-stripped base filename.
pub fn base_name_of(name: &str) -> String {
    let file = name.rsplit(['/', '\\']).next().unwrap_or(name);
    match file.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem.to_lowercase(),
        _ => file.to_lowercase(),
    }
}

// ----------------------------------------------------------------------------
// Scene storage
// ----------------------------------------------------------------------------

/// Mirror of the host scene the core operates on.
#[derive(Default)]
pub struct Scene {
    cameras: Vec<Slot<Camera>>,
    images: Vec<Slot<Image>>,
    pub active_camera: Option<CameraId>,
    /// The canvas image currently receiving painted strokes.
    pub paint_target: Option<ImageId>,
}

impl Scene {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_camera(&mut self, camera: Camera) -> CameraId {
        self.cameras.push(Slot {
            generation: 0,
            value: Some(camera),
        });
        CameraId {
            index: (self.cameras.len() - 1) as u32,
            generation: 0,
        }
    }

    pub fn add_image(&mut self, image: Image) -> ImageId {
        self.images.push(Slot {
            generation: 0,
            value: Some(image),
        });
        ImageId {
            index: (self.images.len() - 1) as u32,
            generation: 0,
        }
    }

    /// Remove a camera. Its slot's generation is bumped so held handles miss.
    pub fn remove_camera(&mut self, id: CameraId) {
        if let Some(slot) = self.cameras.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.value.is_some() {
                slot.value = None;
                slot.generation += 1;
            }
        }
        if self.active_camera == Some(id) {
            self.active_camera = None;
        }
    }

    pub fn remove_image(&mut self, id: ImageId) {
        if let Some(slot) = self.images.get_mut(id.index as usize) {
            if slot.generation == id.generation && slot.value.is_some() {
                slot.value = None;
                slot.generation += 1;
            }
        }
        if self.paint_target == Some(id) {
            self.paint_target = None;
        }
    }

    pub fn camera(&self, id: CameraId) -> Option<&Camera> {
        self.cameras
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_ref())
    }

    pub fn camera_mut(&mut self, id: CameraId) -> Option<&mut Camera> {
        self.cameras
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_mut())
    }

    pub fn image(&self, id: ImageId) -> Option<&Image> {
        self.images
            .get(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_ref())
    }

    pub fn image_mut(&mut self, id: ImageId) -> Option<&mut Image> {
        self.images
            .get_mut(id.index as usize)
            .filter(|s| s.generation == id.generation)
            .and_then(|s| s.value.as_mut())
    }

    /// Live camera handles, in storage order.
    pub fn camera_ids(&self) -> Vec<CameraId> {
        self.cameras
            .iter()
            .enumerate()
            .filter(|(_, s)| s.value.is_some())
            .map(|(i, s)| CameraId {
                index: i as u32,
                generation: s.generation,
            })
            .collect()
    }

    pub fn image_ids(&self) -> Vec<ImageId> {
        self.images
            .iter()
            .enumerate()
            .filter(|(_, s)| s.value.is_some())
            .map(|(i, s)| ImageId {
                index: i as u32,
                generation: s.generation,
            })
            .collect()
    }

    /// The image a camera would project, if both camera and image resolve.
    pub fn bound_image(&self, id: CameraId) -> Option<ImageId> {
        let image = self.camera(id)?.image?;
        self.image(image).map(|_| image)
    }
}
