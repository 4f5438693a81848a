// ============================================================================
// ProjPaint CLI — headless rig inspection via command-line arguments
// ============================================================================
//
// Usage examples:
//   projpaint --photos shots/*.jpg validate
//   projpaint --photos shots/*.jpg import-csv calibration.csv
//   projpaint --photos shots/*.jpg cycle --direction prev
//   projpaint --photos shots/*.jpg residency --max-resident 2
//
// No host/UI is involved. A camera rig is reconstructed from the photo list
// (one camera per photograph, bound by filename), the requested action runs
// against it, and the per-action reports print to stdout.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{Parser, Subcommand};

use crate::cache::ResidencyCache;
use crate::gpu::HeadlessBackend;
use crate::ops::{self, CameraPick};
use crate::scene::{Camera, Image, ImageSource, Scene};
use crate::selector::{radial_order, CycleDirection};

// ============================================================================
// CLI argument definition (clap Derive)
// ============================================================================

/// ProjPaint headless projection-rig inspector.
///
/// Validate photo rigs and calibration files without opening the host tool.
#[derive(Parser, Debug)]
#[command(
    name = "projpaint",
    about = "ProjPaint headless projection-rig inspector",
    long_about = "Reconstruct a projection-painting camera rig from a set of\n\
                  photographs and run rig actions against it: validate session\n\
                  readiness, check calibration CSV coverage, preview radial\n\
                  camera cycling, and estimate GPU residency under a bound.\n\n\
                  Example:\n  \
                  projpaint --photos shots/*.jpg import-csv calibration.csv\n  \
                  projpaint --photos shots/*.jpg residency --max-resident 2"
)]
pub struct CliArgs {
    /// Photograph file(s). Glob patterns accepted (e.g. "*.jpg", "shots/*.png").
    /// Each photo becomes one calibrated camera named after its file stem.
    #[arg(short, long, required = true, num_args = 1..)]
    pub photos: Vec<String>,

    /// Print per-camera details alongside the summary report.
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Dry-run the session readiness checks over the rig.
    Validate,

    /// Import a calibration CSV and report how many cameras it covered.
    ImportCsv {
        #[arg(value_name = "FILE.csv")]
        csv: PathBuf,
    },

    /// Step the active camera through the radial ordering.
    Cycle {
        /// "next" or "prev".
        #[arg(long, default_value = "next")]
        direction: String,
        #[arg(long, default_value_t = 1)]
        steps: usize,
    },

    /// Make every photo resident under a bound and report evictions.
    Residency {
        #[arg(long, default_value_t = 4)]
        max_resident: usize,
    },
}

// ============================================================================
// Public entry point
// ============================================================================

/// Run the requested action and return an OS exit code.
/// `0` = the action affected at least one item, `1` = it affected none.
pub fn run(args: CliArgs) -> ExitCode {
    let files = ops::resolve_patterns(&args.photos);
    if files.is_empty() {
        eprintln!("error: no photographs matched the given pattern(s).");
        return ExitCode::FAILURE;
    }

    // Reconstruct the rig: one camera per photograph, bound by filename.
    let mut scene = Scene::new();
    for path in &files {
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let image = scene.add_image(Image::new(name.clone(), ImageSource::File(path.clone())));
        let mut camera = Camera::new(name);
        camera.image = Some(image);
        scene.add_camera(camera);
    }
    if args.verbose {
        println!("rig: {} camera(s) from {} photo(s)", files.len(), files.len());
    }

    let report = match args.command {
        Command::Validate => ops::validate_session(&mut scene),
        Command::ImportCsv { csv } => ops::import_calibration(&mut scene, &csv),
        Command::Cycle { direction, steps } => {
            let direction = match direction.as_str() {
                "prev" => CycleDirection::Prev,
                _ => CycleDirection::Next,
            };
            if args.verbose {
                for id in radial_order(&scene) {
                    if let Some(cam) = scene.camera(id) {
                        println!("  {}", cam.name);
                    }
                }
            }
            let mut last = ops::OpReport::default();
            for _ in 0..steps.max(1) {
                last = ops::set_active_camera(&mut scene, CameraPick::Cycle(direction));
            }
            if let Some(active) = scene.active_camera.and_then(|id| scene.camera(id)) {
                println!("active camera: {}", active.name);
            }
            last
        }
        Command::Residency { max_resident } => {
            let mut cache = ResidencyCache::new(Box::new(HeadlessBackend::new()), max_resident);
            let mut loaded = 0usize;
            for id in scene.image_ids() {
                if cache.make_resident(&scene, id) {
                    loaded += 1;
                } else if args.verbose {
                    let name = scene.image(id).map(|i| i.name.clone()).unwrap_or_default();
                    println!("  not residable: {}", name);
                }
            }
            println!(
                "{} of {} photo(s) decodable, {} resident ({} bytes), bound {}",
                loaded,
                files.len(),
                cache.resident_count(),
                cache.memory_bytes(),
                max_resident
            );
            let freed = ops::free_gpu_memory(&mut cache);
            println!("{}", freed);
            ops::OpReport {
                affected: loaded,
                skipped: files.len() - loaded,
                detail: "estimate residency".into(),
            }
        }
    };

    println!("{}", report);
    if report.affected == 0 {
        eprintln!("warning: no items were affected.");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
