// ============================================================================
// IO — image pixel loading and calibration CSV import
// ============================================================================

use std::path::Path;

use image::RgbaImage;

use crate::error::{ProjectionError, Result};
use crate::log_warn;
use crate::scene::{base_name_of, Image, ImageSource, LensModel, Scene};

/// Decode an image's pixels to RGBA8 for GPU upload.
///
/// Generated images come back as zero-filled canvases of their declared
/// dimensions; file and embedded sources go through the `image` crate.
pub fn load_rgba(img: &Image) -> Result<RgbaImage> {
    match &img.source {
        ImageSource::Generated { width, height } => {
            if *width == 0 || *height == 0 {
                return Err(ProjectionError::InvalidImage {
                    name: img.name.clone(),
                    reason: "zero dimension".into(),
                });
            }
            Ok(RgbaImage::new(*width, *height))
        }
        ImageSource::Embedded(bytes) => decode_bytes(&img.name, bytes),
        ImageSource::File(path) => {
            let bytes = std::fs::read(path)?;
            decode_bytes(&img.name, &bytes)
        }
    }
}

fn decode_bytes(name: &str, bytes: &[u8]) -> Result<RgbaImage> {
    image::load_from_memory(bytes)
        .map(|dynamic| dynamic.to_rgba8())
        .map_err(|err| ProjectionError::InvalidImage {
            name: name.to_string(),
            reason: err.to_string(),
        })
}

// ============================================================================
// CALIBRATION CSV IMPORT
// ============================================================================
//
// Photogrammetry packages export per-photo intrinsics as CSV with a header
// like:
//
//   #name,x,y,z,f,cx,cy,px,py,k1,k2,k3,k4,t1,t2
//
// Column *positions* are discovered from the header, never assumed. Each
// data row names a photograph; it matches a camera by case-insensitive,
// extension-stripped base filename (against the camera's own name or its
// bound image's). The lens model is re-derived from the imported
// coefficients' non-zero pattern.

/// Columns the import cannot do without.
const REQUIRED_COLUMNS: &[&str] = &[
    "#name", "f", "px", "py", "k1", "k2", "k3", "k4", "t1", "t2",
];

/// Outcome of one CSV import, reported to the user.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CsvImportReport {
    /// Cameras whose intrinsics were updated.
    pub updated: usize,
    /// Rows skipped as malformed (wrong field count, unparsable numbers).
    pub skipped: usize,
    /// Well-formed rows that matched no camera.
    pub unmatched: usize,
}

/// Import calibration data from a CSV file on disk.
pub fn import_calibration_csv(scene: &mut Scene, path: &Path) -> Result<CsvImportReport> {
    let text =
        std::fs::read_to_string(path).map_err(|err| ProjectionError::UnsupportedCalibrationFile {
            path: path.to_path_buf(),
            reason: err.to_string(),
        })?;
    apply_calibration_csv(scene, &text).map_err(|reason| {
        ProjectionError::UnsupportedCalibrationFile {
            path: path.to_path_buf(),
            reason,
        }
    })
}

/// Parse and apply CSV text. `Err` carries the header-level reason; row-level
/// problems only bump the report's skip counters.
pub fn apply_calibration_csv(
    scene: &mut Scene,
    text: &str,
) -> std::result::Result<CsvImportReport, String> {
    let mut lines = text.lines().enumerate();

    let (_, header) = lines
        .by_ref()
        .find(|(_, l)| !l.trim().is_empty())
        .ok_or_else(|| "empty file".to_string())?;
    let columns: Vec<String> = header
        .split(',')
        .map(|c| c.trim().to_lowercase())
        .collect();

    let col = |name: &str| -> std::result::Result<usize, String> {
        columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| format!("missing required column '{name}'"))
    };
    for required in REQUIRED_COLUMNS {
        col(required)?;
    }
    let name_col = col("#name")?;
    let f_col = col("f")?;
    let px_col = col("px")?;
    let py_col = col("py")?;
    let k_cols = [col("k1")?, col("k2")?, col("k3")?, col("k4")?];
    let t_cols = [col("t1")?, col("t2")?];

    let mut report = CsvImportReport::default();

    for (line_no, line) in lines {
        if line.trim().is_empty() {
            continue;
        }
        let fields: Vec<&str> = line.split(',').map(str::trim).collect();
        if fields.len() != columns.len() {
            let err = ProjectionError::MalformedRow {
                line: line_no + 1,
                expected: columns.len(),
                got: fields.len(),
            };
            log_warn!("{err} — skipped");
            report.skipped += 1;
            continue;
        }

        let parse = |at: usize| -> Option<f64> { fields[at].parse::<f64>().ok() };
        let numbers: Option<(f64, f64, f64, [f64; 4], [f64; 2])> = (|| {
            Some((
                parse(f_col)?,
                parse(px_col)?,
                parse(py_col)?,
                [
                    parse(k_cols[0])?,
                    parse(k_cols[1])?,
                    parse(k_cols[2])?,
                    parse(k_cols[3])?,
                ],
                [parse(t_cols[0])?, parse(t_cols[1])?],
            ))
        })();
        let (f, px, py, k, t) = match numbers {
            Some(v) => v,
            None => {
                log_warn!("calibration row {}: unparsable value — skipped", line_no + 1);
                report.skipped += 1;
                continue;
            }
        };

        let row_base = base_name_of(fields[name_col]);
        let mut matched = false;
        for id in scene.camera_ids() {
            let is_match = scene.camera(id).map_or(false, |cam| {
                base_name_of(&cam.name) == row_base
                    || cam
                        .image
                        .and_then(|img| scene.image(img))
                        .map_or(false, |img| img.base_name() == row_base)
            });
            if !is_match {
                continue;
            }
            if let Some(camera) = scene.camera_mut(id) {
                camera.focal_length_mm = f;
                camera.shift_x = px;
                camera.shift_y = py;
                camera.lens = LensModel::from_coefficients(k[0], k[1], k[2], k[3], t[0], t[1]);
                report.updated += 1;
                matched = true;
            }
        }
        if !matched {
            report.unmatched += 1;
        }
    }

    Ok(report)
}
