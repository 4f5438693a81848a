// ============================================================================
// SESSION CONTROLLER — the projection-painting state machine
// ============================================================================
//
// One controller drives one painting session through
//
//     Idle → Listening → Active ⇄ Suspended
//                 ↑______________|   (cancellation, from any of them)
//
// The host calls `tick` from its main update loop and `cancel` from wherever
// it pleases: cancellation is idempotent, reentrant, and keeps going when
// individual host objects have already disappeared. While Listening the
// controller only polls host readiness on a coarse interval instead of
// burning work every frame.
//
// All shared mutable state (residency cache, preview cache, dirty snapshot)
// is owned by the controller and lives exactly as long as the session:
// allocated on Listening→Active, torn down on cancellation.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::cache::ResidencyCache;
use crate::calibrate;
use crate::gpu::{self, TextureBackend};
use crate::host::{HostBridge, MeshUv, RenderSink};
use crate::safety::{self, SafetyLimits};
use crate::scene::{CameraId, ImageId, LensModel, Scene, SensorFit};
use crate::selector::{self, SelectionStrategy, Viewpoint};
use crate::{log_info, log_warn};

// ----------------------------------------------------------------------------
// Settings
// ----------------------------------------------------------------------------

/// Which safety heuristic runs each tick.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum SafetyMode {
    Off,
    Analytic,
    Raycast,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProjectionSettings {
    /// Residency bound for non-protected projector images.
    pub max_resident: usize,
    pub strategy: SelectionStrategy,
    pub tolerance_full: f64,
    pub tolerance_direction: f64,
    /// Let the selector re-pick the active camera every tick.
    pub auto_camera_selection: bool,
    pub safety_mode: SafetyMode,
    /// Gate paint input entirely while the risk flag is up.
    pub lock_paint_on_risk: bool,
    pub safety: SafetyLimits,
    /// Readiness poll cadence while Listening.
    pub listen_poll_interval: Duration,
    /// Adapter preference string handed to wgpu.
    pub preferred_gpu: String,
}

impl Default for ProjectionSettings {
    fn default() -> Self {
        Self {
            max_resident: 4,
            strategy: SelectionStrategy::ViewDirection,
            tolerance_full: 0.92,
            tolerance_direction: 0.55,
            auto_camera_selection: true,
            safety_mode: SafetyMode::Analytic,
            lock_paint_on_risk: false,
            safety: SafetyLimits::default(),
            listen_poll_interval: Duration::from_millis(250),
            preferred_gpu: String::new(),
        }
    }
}

impl ProjectionSettings {
    fn tolerance(&self) -> f64 {
        match self.strategy {
            SelectionStrategy::OrientationSimilarity => self.tolerance_full,
            SelectionStrategy::ViewDirection => self.tolerance_direction,
        }
    }
}

// ----------------------------------------------------------------------------
// Dirty tracking
// ----------------------------------------------------------------------------

/// Everything whose change forces a projector UV rebuild.
#[derive(Clone, PartialEq, Debug)]
struct ProjectorSnapshot {
    camera: Option<CameraId>,
    image: Option<ImageId>,
    focal_length_mm: f64,
    lens: Option<LensModel>,
    shift: (f64, f64),
    skew: f64,
    aspect_correction: f64,
    sensor_fit: Option<SensorFit>,
}

impl ProjectorSnapshot {
    fn capture(scene: &Scene) -> Self {
        let camera = scene.active_camera.and_then(|id| scene.camera(id).map(|c| (id, c)));
        match camera {
            Some((id, cam)) => Self {
                camera: Some(id),
                image: scene.bound_image(id),
                focal_length_mm: cam.focal_length_mm,
                lens: Some(cam.lens),
                shift: (cam.shift_x, cam.shift_y),
                skew: cam.skew,
                aspect_correction: cam.aspect_correction,
                sensor_fit: Some(cam.sensor_fit),
            },
            None => Self {
                camera: None,
                image: None,
                focal_length_mm: 0.0,
                lens: None,
                shift: (0.0, 0.0),
                skew: 0.0,
                aspect_correction: 1.0,
                sensor_fit: None,
            },
        }
    }
}

/// Last-seen snapshot holder: `changed` compares, stores, and answers.
/// Replaces the per-property update callbacks a schema system would scatter.
#[derive(Default)]
pub struct PropertyTracker {
    last: Option<ProjectorSnapshot>,
}

impl PropertyTracker {
    fn changed(&mut self, current: ProjectorSnapshot) -> bool {
        let dirty = self.last.as_ref() != Some(&current);
        self.last = Some(current);
        dirty
    }

    fn reset(&mut self) {
        self.last = None;
    }
}

// ----------------------------------------------------------------------------
// Session registry
// ----------------------------------------------------------------------------

/// Token naming one logical session.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SessionToken(u64);

/// Tracks which sessions are running. Replaces a global "currently running"
/// flag so parallel logical sessions (tests, future multi-window hosts)
/// cannot trample each other through shared state.
#[derive(Default)]
pub struct SessionRegistry {
    next: u64,
    running: HashSet<SessionToken>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn register(&mut self) -> SessionToken {
        self.next += 1;
        let token = SessionToken(self.next);
        self.running.insert(token);
        token
    }

    fn release(&mut self, token: SessionToken) {
        self.running.remove(&token);
    }

    pub fn is_running(&self, token: SessionToken) -> bool {
        self.running.contains(&token)
    }

    pub fn running_count(&self) -> usize {
        self.running.len()
    }
}

// ----------------------------------------------------------------------------
// Controller
// ----------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Listening,
    Active,
    Suspended,
}

/// What provoked this tick. Pure redraws and timer pulses never pay for a
/// UV rebuild, even when the dirty snapshot has drifted — the next real
/// input tick picks the change up.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TickKind {
    Input,
    Timer,
    Redraw,
}

type BackendFactory = Box<dyn FnMut() -> Box<dyn TextureBackend>>;

pub struct SessionController {
    state: SessionState,
    settings: ProjectionSettings,
    make_backend: BackendFactory,

    cache: Option<ResidencyCache>,
    tracker: PropertyTracker,
    token: Option<SessionToken>,

    cursor: (f64, f64),
    risk: bool,
    /// True right after a UV rebuild; the renderer should redraw everything.
    pub needs_full_redraw: bool,

    /// Proxy visibility as it was before activation, for restoration.
    saved_visibility: Vec<(CameraId, bool)>,
    next_poll: Option<Instant>,
}

impl SessionController {
    /// Controller with the default backend selection (hardware, software
    /// rasterizer, headless — in that order).
    pub fn new(settings: ProjectionSettings) -> Self {
        let preferred = settings.preferred_gpu.clone();
        Self::with_backend(
            settings,
            Box::new(move || gpu::best_backend(&preferred)),
        )
    }

    /// Controller with an explicit residency backend factory. The factory
    /// runs on every activation, so a cancelled-and-restarted session gets
    /// fresh GPU state.
    pub fn with_backend(settings: ProjectionSettings, make_backend: BackendFactory) -> Self {
        Self {
            state: SessionState::Idle,
            settings,
            make_backend,
            cache: None,
            tracker: PropertyTracker::default(),
            token: None,
            cursor: (0.0, 0.0),
            risk: false,
            needs_full_redraw: false,
            saved_visibility: Vec::new(),
            next_poll: None,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn risk(&self) -> bool {
        self.risk
    }

    pub fn cursor(&self) -> (f64, f64) {
        self.cursor
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.token
    }

    /// Entries currently pinned by the protected set. Zero once cancelled.
    pub fn protected_entries(&self) -> usize {
        self.cache.as_ref().map_or(0, |c| c.protected_count())
    }

    pub fn cache(&self) -> Option<&ResidencyCache> {
        self.cache.as_ref()
    }

    /// Idle → Listening. Registers the session; a controller that is already
    /// listening or active is left alone.
    pub fn start(&mut self, registry: &mut SessionRegistry) -> bool {
        if self.state != SessionState::Idle {
            return false;
        }
        self.token = Some(registry.register());
        self.state = SessionState::Listening;
        self.next_poll = None;
        log_info!("projection session listening");
        true
    }

    /// Drag-style interactions elsewhere in the UI (repositioning a preview,
    /// scrubbing a slider) suspend cursor tracking without ending the
    /// session.
    pub fn suspend(&mut self) {
        if self.state == SessionState::Active {
            self.state = SessionState::Suspended;
        }
    }

    pub fn resume(&mut self) {
        if self.state == SessionState::Suspended {
            self.state = SessionState::Active;
        }
    }

    /// One host tick. `now` drives the listening poll cadence.
    pub fn tick(
        &mut self,
        scene: &mut Scene,
        host: &dyn HostBridge,
        mesh: &mut dyn MeshUv,
        sink: &mut dyn RenderSink,
        kind: TickKind,
        now: Instant,
    ) {
        match self.state {
            SessionState::Idle => {}
            SessionState::Listening => self.listen_tick(scene, host, sink, now),
            SessionState::Active | SessionState::Suspended => {
                self.active_tick(scene, host, mesh, sink, kind)
            }
        }
    }

    fn listen_tick(
        &mut self,
        scene: &mut Scene,
        host: &dyn HostBridge,
        sink: &mut dyn RenderSink,
        now: Instant,
    ) {
        // Coarse poll: skip frames until the interval elapses.
        if let Some(next) = self.next_poll {
            if now < next {
                return;
            }
        }
        self.next_poll = Some(now + self.settings.listen_poll_interval);

        if host.ready() {
            self.activate(scene, sink);
        }
    }

    /// Listening → Active: allocate the session-lifetime caches, hide every
    /// camera proxy except the active one (remembering what to restore),
    /// and start taking per-frame ticks.
    fn activate(&mut self, scene: &mut Scene, sink: &mut dyn RenderSink) {
        let backend = (self.make_backend)();
        self.cache = Some(ResidencyCache::new(backend, self.settings.max_resident));

        self.saved_visibility.clear();
        for id in scene.camera_ids() {
            let Some(visible) = sink.proxy_visible(id) else {
                continue;
            };
            self.saved_visibility.push((id, visible));
            let keep = scene.active_camera == Some(id);
            sink.set_proxy_visible(id, keep);
        }

        self.tracker.reset();
        self.needs_full_redraw = true;
        self.state = SessionState::Active;
        log_info!("projection session active");
    }

    fn active_tick(
        &mut self,
        scene: &mut Scene,
        host: &dyn HostBridge,
        mesh: &mut dyn MeshUv,
        sink: &mut dyn RenderSink,
        kind: TickKind,
    ) {
        // Readiness failing mid-session forces cancellation, then drops back
        // to Listening so painting resumes the moment the host recovers.
        if !host.ready() {
            log_warn!(
                "{} — cancelling projection session",
                crate::error::ProjectionError::ContextNotReady
            );
            self.teardown(scene, mesh, sink);
            self.state = SessionState::Listening;
            self.next_poll = None;
            return;
        }

        let suspended = self.state == SessionState::Suspended || host.input_suspended();

        // (1) cursor
        if !suspended {
            self.cursor = host.cursor_position();
        }

        // (2) camera auto-selection
        if self.settings.auto_camera_selection && !suspended {
            let viewpoint = Viewpoint {
                position: host.view_position(),
                rotation: host.view_rotation(),
                forward: host.view_forward(),
            };
            if let Some(picked) = selector::pick_camera(
                scene,
                &viewpoint,
                self.settings.strategy,
                self.settings.tolerance(),
            ) {
                if scene.active_camera != Some(picked) {
                    scene.active_camera = Some(picked);
                }
            }
        }

        // (3) residency for the projector image, protection for it and the
        // paint target
        let projector_image = scene.active_camera.and_then(|c| scene.bound_image(c));
        if let Some(cache) = self.cache.as_mut() {
            let mut protected: Vec<ImageId> = Vec::with_capacity(2);
            if let Some(target) = scene.paint_target {
                protected.push(target);
            }
            if let Some(img) = projector_image {
                if !protected.contains(&img) {
                    protected.push(img);
                }
            }
            cache.set_protected(scene, &protected);
            if let Some(img) = projector_image {
                cache.make_resident(scene, img);
            }
        }

        // (4) dirty tracking → UV rebuild. Redraw/timer ticks neither pay
        // for the rebuild nor consume the pending change.
        self.needs_full_redraw = false;
        if kind == TickKind::Input {
            let snapshot = ProjectorSnapshot::capture(scene);
            if self.tracker.changed(snapshot) {
                self.rebuild_uv(scene, mesh);
            }
        }

        // (5) safety → renderer
        self.risk = self.evaluate_risk(scene, host);
        if let (Some(camera_id), Some(image_id)) = (scene.active_camera, projector_image) {
            let size = self
                .cache
                .as_mut()
                .and_then(|c| c.static_size(scene, image_id));
            if let (Some(camera), Some(size)) = (scene.camera(camera_id), size) {
                let block = calibrate::compute_projector_parameters(camera, size);
                sink.apply(&block, self.risk);
            }
        }
        if self.settings.lock_paint_on_risk {
            sink.set_paint_locked(self.risk);
        }
    }

    fn rebuild_uv(&mut self, scene: &mut Scene, mesh: &mut dyn MeshUv) {
        let Some(camera_id) = scene.active_camera else {
            return;
        };
        let Some(image_id) = scene.bound_image(camera_id) else {
            return;
        };
        let Some(size) = self
            .cache
            .as_mut()
            .and_then(|c| c.static_size(scene, image_id))
        else {
            return;
        };
        let Some(camera) = scene.camera(camera_id) else {
            return;
        };

        let matrix = calibrate::projector_matrix(camera, size);
        let scale = calibrate::aspect_scale(camera, size);
        mesh.create_or_replace_projector_uv(&matrix, scale);
        self.needs_full_redraw = true;
    }

    fn evaluate_risk(&self, scene: &Scene, host: &dyn HostBridge) -> bool {
        match self.settings.safety_mode {
            SafetyMode::Off => false,
            SafetyMode::Analytic => {
                let canvas_avg = scene
                    .paint_target
                    .and_then(|id| scene.image(id))
                    .and_then(|img| img.static_size)
                    .map(|(w, h)| (w as f64 + h as f64) / 2.0)
                    .unwrap_or(0.0);
                safety::analytic_risk(
                    &self.settings.safety,
                    host.view_distance(),
                    host.brush_radius_px(),
                    canvas_avg,
                )
            }
            SafetyMode::Raycast => {
                let focal_px = scene
                    .active_camera
                    .and_then(|id| scene.camera(id))
                    .map(|cam| {
                        // Focal length in canvas-pixel units, against the
                        // fitted sensor axis.
                        let size = scene
                            .paint_target
                            .and_then(|id| scene.image(id))
                            .and_then(|img| img.static_size)
                            .unwrap_or((1920, 1080));
                        let block = calibrate::compute_projector_parameters(cam, size);
                        block.focal_length_mm / block.sensor_size_mm * size.0 as f64
                    })
                    .unwrap_or(0.0);
                safety::raycast_risk(
                    &self.settings.safety,
                    host,
                    self.cursor,
                    host.brush_radius_px(),
                    focal_px,
                )
            }
        }
    }

    /// Cancel from any state. Safe to call repeatedly, safe to call when
    /// host objects referenced at activation have since vanished — a stale
    /// proxy never stops the remaining proxies from being restored.
    pub fn cancel(
        &mut self,
        scene: &mut Scene,
        mesh: &mut dyn MeshUv,
        sink: &mut dyn RenderSink,
        registry: &mut SessionRegistry,
    ) {
        self.teardown(scene, mesh, sink);
        if let Some(token) = self.token.take() {
            registry.release(token);
        }
        if self.state != SessionState::Idle {
            log_info!("projection session cancelled");
        }
        self.state = SessionState::Idle;
        self.next_poll = None;
    }

    /// The teardown half shared by `cancel` and forced cancellation:
    /// release GPU handles, restore proxy visibility, clear mesh UV data,
    /// reset dirty tracking. Already-torn-down state is a no-op.
    fn teardown(&mut self, _scene: &mut Scene, mesh: &mut dyn MeshUv, sink: &mut dyn RenderSink) {
        if let Some(mut cache) = self.cache.take() {
            cache.clear();
        }

        let saved = std::mem::take(&mut self.saved_visibility);
        for (id, visible) in saved {
            // Continue-on-error: a renamed or deleted proxy is logged and
            // skipped, the rest are still restored.
            if !sink.set_proxy_visible(id, visible) {
                log_warn!("camera proxy vanished during restore — skipped");
            }
        }

        mesh.clear_projector_uv();
        self.tracker.reset();
        self.risk = false;
        self.needs_full_redraw = false;
        sink.set_paint_locked(false);
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calibrate::ParameterBlock;
    use crate::gpu::HeadlessBackend;
    use crate::scene::{Camera, Image, ImageSource};
    use nalgebra::{Matrix4, UnitQuaternion, Vector3};
    use std::cell::Cell;
    use std::collections::HashMap;
    use std::rc::Rc;

    // -- doubles ---------------------------------------------------------

    #[derive(Clone)]
    struct TestHost {
        ready: Rc<Cell<bool>>,
        cursor: Rc<Cell<(f64, f64)>>,
        suspended: Rc<Cell<bool>>,
        view_distance: f64,
        brush_radius: f64,
    }

    impl TestHost {
        fn new() -> Self {
            Self {
                ready: Rc::new(Cell::new(true)),
                cursor: Rc::new(Cell::new((0.0, 0.0))),
                suspended: Rc::new(Cell::new(false)),
                view_distance: 5.0,
                brush_radius: 40.0,
            }
        }
    }

    impl HostBridge for TestHost {
        fn ready(&self) -> bool {
            self.ready.get()
        }
        fn cursor_position(&self) -> (f64, f64) {
            self.cursor.get()
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
            self.view_distance
        }
        fn brush_radius_px(&self) -> f64 {
            self.brush_radius
        }
        fn input_suspended(&self) -> bool {
            self.suspended.get()
        }
        fn raycast_screen(&self, _point: (f64, f64)) -> Option<f64> {
            Some(self.view_distance)
        }
    }

    #[derive(Default)]
    struct TestMesh {
        uv_rebuilds: usize,
        has_uv: bool,
    }

    impl MeshUv for TestMesh {
        fn create_or_replace_projector_uv(&mut self, _m: &Matrix4<f64>, _s: [f64; 2]) {
            self.uv_rebuilds += 1;
            self.has_uv = true;
        }
        fn clear_projector_uv(&mut self) {
            self.has_uv = false;
        }
    }

    #[derive(Default)]
    struct TestSink {
        visibility: HashMap<CameraId, bool>,
        applied: usize,
        last_risk: Option<bool>,
        paint_locked: bool,
        /// Proxies the "host" has deleted; restoring them fails.
        dead: Vec<CameraId>,
    }

    impl RenderSink for TestSink {
        fn apply(&mut self, _block: &ParameterBlock, risk: bool) {
            self.applied += 1;
            self.last_risk = Some(risk);
        }
        fn set_paint_locked(&mut self, locked: bool) {
            self.paint_locked = locked;
        }
        fn proxy_visible(&self, camera: CameraId) -> Option<bool> {
            if self.dead.contains(&camera) {
                return None;
            }
            Some(*self.visibility.get(&camera).unwrap_or(&true))
        }
        fn set_proxy_visible(&mut self, camera: CameraId, visible: bool) -> bool {
            if self.dead.contains(&camera) {
                return false;
            }
            self.visibility.insert(camera, visible);
            true
        }
    }

    // -- fixtures --------------------------------------------------------

    fn scene_with_one_projector() -> (Scene, CameraId, ImageId) {
        let mut scene = Scene::new();
        let image = scene.add_image(Image::new(
            "shot.png",
            ImageSource::Generated {
                width: 1920,
                height: 1080,
            },
        ));
        let mut camera = Camera::new("shot");
        camera.image = Some(image);
        let camera = scene.add_camera(camera);
        scene.active_camera = Some(camera);

        let canvas = scene.add_image(Image::new(
            "canvas",
            ImageSource::Generated {
                width: 2048,
                height: 2048,
            },
        ));
        scene.paint_target = Some(canvas);
        (scene, camera, image)
    }

    fn controller(settings: ProjectionSettings) -> SessionController {
        SessionController::with_backend(settings, Box::new(|| Box::new(HeadlessBackend::new())))
    }

    fn quiet_settings() -> ProjectionSettings {
        ProjectionSettings {
            auto_camera_selection: false,
            safety_mode: SafetyMode::Off,
            listen_poll_interval: Duration::from_millis(250),
            ..Default::default()
        }
    }

    /// Drive the controller from Idle through Listening into Active.
    fn start_active(
        ctl: &mut SessionController,
        scene: &mut Scene,
        host: &TestHost,
        mesh: &mut TestMesh,
        sink: &mut TestSink,
        registry: &mut SessionRegistry,
    ) {
        assert!(ctl.start(registry));
        ctl.tick(scene, host, mesh, sink, TickKind::Timer, Instant::now());
        assert_eq!(ctl.state(), SessionState::Active);
    }

    // -- tests -----------------------------------------------------------

    #[test]
    fn listening_polls_on_a_coarse_interval() {
        let (mut scene, _, _) = scene_with_one_projector();
        let host = TestHost::new();
        host.ready.set(false);
        let mut mesh = TestMesh::default();
        let mut sink = TestSink::default();
        let mut registry = SessionRegistry::new();

        let mut ctl = controller(quiet_settings());
        assert!(ctl.start(&mut registry));

        let t0 = Instant::now();
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Timer, t0);
        assert_eq!(ctl.state(), SessionState::Listening);

        // Host becomes ready 10 ms later — but the next poll is 250 ms out,
        // so the frame in between must not activate.
        host.ready.set(true);
        ctl.tick(
            &mut scene,
            &host,
            &mut mesh,
            &mut sink,
            TickKind::Timer,
            t0 + Duration::from_millis(10),
        );
        assert_eq!(ctl.state(), SessionState::Listening);

        ctl.tick(
            &mut scene,
            &host,
            &mut mesh,
            &mut sink,
            TickKind::Timer,
            t0 + Duration::from_millis(300),
        );
        assert_eq!(ctl.state(), SessionState::Active);
    }

    #[test]
    fn start_is_rejected_while_not_idle() {
        let mut registry = SessionRegistry::new();
        let mut ctl = controller(quiet_settings());
        assert!(ctl.start(&mut registry));
        assert!(!ctl.start(&mut registry));
        assert_eq!(registry.running_count(), 1);
    }

    #[test]
    fn activation_hides_all_proxies_except_active() {
        let (mut scene, active_cam, _) = scene_with_one_projector();
        let other_cam = {
            let mut cam = Camera::new("other");
            let img = scene.add_image(Image::new(
                "other.png",
                ImageSource::Generated {
                    width: 8,
                    height: 8,
                },
            ));
            cam.image = Some(img);
            scene.add_camera(cam)
        };

        let host = TestHost::new();
        let mut mesh = TestMesh::default();
        let mut sink = TestSink::default();
        let mut registry = SessionRegistry::new();
        let mut ctl = controller(quiet_settings());
        start_active(&mut ctl, &mut scene, &host, &mut mesh, &mut sink, &mut registry);

        assert_eq!(sink.visibility.get(&active_cam), Some(&true));
        assert_eq!(sink.visibility.get(&other_cam), Some(&false));
    }

    #[test]
    fn input_tick_rebuilds_uv_only_when_snapshot_changes() {
        let (mut scene, camera, _) = scene_with_one_projector();
        let host = TestHost::new();
        let mut mesh = TestMesh::default();
        let mut sink = TestSink::default();
        let mut registry = SessionRegistry::new();
        let mut ctl = controller(quiet_settings());
        start_active(&mut ctl, &mut scene, &host, &mut mesh, &mut sink, &mut registry);

        let now = Instant::now();
        // First input tick sees a fresh tracker → one rebuild.
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Input, now);
        assert_eq!(mesh.uv_rebuilds, 1);
        assert!(ctl.needs_full_redraw);

        // Nothing changed → no rebuild.
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Input, now);
        assert_eq!(mesh.uv_rebuilds, 1);
        assert!(!ctl.needs_full_redraw);

        // Focal length edit → rebuild on the next input tick.
        scene.camera_mut(camera).unwrap().focal_length_mm = 85.0;
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Input, now);
        assert_eq!(mesh.uv_rebuilds, 2);
    }

    #[test]
    fn redraw_and_timer_ticks_never_consume_a_pending_change() {
        let (mut scene, camera, _) = scene_with_one_projector();
        let host = TestHost::new();
        let mut mesh = TestMesh::default();
        let mut sink = TestSink::default();
        let mut registry = SessionRegistry::new();
        let mut ctl = controller(quiet_settings());
        start_active(&mut ctl, &mut scene, &host, &mut mesh, &mut sink, &mut registry);

        let now = Instant::now();
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Input, now);
        assert_eq!(mesh.uv_rebuilds, 1);

        // Change while only redraw/timer ticks arrive: no rebuild yet...
        scene.camera_mut(camera).unwrap().focal_length_mm = 24.0;
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Redraw, now);
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Timer, now);
        assert_eq!(mesh.uv_rebuilds, 1);

        // ...and the change is still pending for the next input tick.
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Input, now);
        assert_eq!(mesh.uv_rebuilds, 2);
    }

    #[test]
    fn suspension_freezes_cursor_but_keeps_rendering() {
        let (mut scene, _, _) = scene_with_one_projector();
        let host = TestHost::new();
        let mut mesh = TestMesh::default();
        let mut sink = TestSink::default();
        let mut registry = SessionRegistry::new();
        let mut ctl = controller(quiet_settings());
        start_active(&mut ctl, &mut scene, &host, &mut mesh, &mut sink, &mut registry);

        let now = Instant::now();
        host.cursor.set((100.0, 50.0));
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Input, now);
        assert_eq!(ctl.cursor(), (100.0, 50.0));

        ctl.suspend();
        assert_eq!(ctl.state(), SessionState::Suspended);
        host.cursor.set((300.0, 300.0));
        let applied_before = sink.applied;
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Input, now);
        // Cursor frozen, but the parameter block still flowed to the sink.
        assert_eq!(ctl.cursor(), (100.0, 50.0));
        assert!(sink.applied > applied_before);

        ctl.resume();
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Input, now);
        assert_eq!(ctl.cursor(), (300.0, 300.0));
    }

    #[test]
    fn readiness_loss_forces_cancellation_back_to_listening() {
        let (mut scene, active_cam, _) = scene_with_one_projector();
        let host = TestHost::new();
        let mut mesh = TestMesh::default();
        let mut sink = TestSink::default();
        let mut registry = SessionRegistry::new();
        let mut ctl = controller(quiet_settings());
        start_active(&mut ctl, &mut scene, &host, &mut mesh, &mut sink, &mut registry);

        ctl.tick(
            &mut scene,
            &host,
            &mut mesh,
            &mut sink,
            TickKind::Input,
            Instant::now(),
        );
        assert!(mesh.has_uv);

        host.ready.set(false);
        ctl.tick(
            &mut scene,
            &host,
            &mut mesh,
            &mut sink,
            TickKind::Input,
            Instant::now(),
        );
        assert_eq!(ctl.state(), SessionState::Listening);
        // Full teardown happened: UV cleared, visibility restored, cache gone.
        assert!(!mesh.has_uv);
        assert_eq!(sink.visibility.get(&active_cam), Some(&true));
        assert!(ctl.cache().is_none());

        // And the session reactivates once the host recovers.
        host.ready.set(true);
        let later = Instant::now() + Duration::from_secs(1);
        ctl.tick(&mut scene, &host, &mut mesh, &mut sink, TickKind::Timer, later);
        assert_eq!(ctl.state(), SessionState::Active);
    }

    #[test]
    fn cancellation_is_idempotent_and_releases_everything() {
        let (mut scene, _, _) = scene_with_one_projector();
        let host = TestHost::new();
        let mut mesh = TestMesh::default();
        let mut sink = TestSink::default();
        let mut registry = SessionRegistry::new();
        let mut ctl = controller(quiet_settings());
        start_active(&mut ctl, &mut scene, &host, &mut mesh, &mut sink, &mut registry);
        ctl.tick(
            &mut scene,
            &host,
            &mut mesh,
            &mut sink,
            TickKind::Input,
            Instant::now(),
        );
        assert!(ctl.protected_entries() > 0);

        ctl.cancel(&mut scene, &mut mesh, &mut sink, &mut registry);
        assert_eq!(ctl.state(), SessionState::Idle);
        assert_eq!(ctl.protected_entries(), 0);
        assert_eq!(registry.running_count(), 0);
        assert!(!mesh.has_uv);

        // Second cancellation: still fine, still zero protected entries.
        ctl.cancel(&mut scene, &mut mesh, &mut sink, &mut registry);
        assert_eq!(ctl.state(), SessionState::Idle);
        assert_eq!(ctl.protected_entries(), 0);

        // The controller can start listening again afterwards.
        assert!(ctl.start(&mut registry));
    }

    #[test]
    fn stale_proxy_does_not_abort_visibility_restoration() {
        let (mut scene, active_cam, _) = scene_with_one_projector();
        let doomed = {
            let mut cam = Camera::new("doomed");
            let img = scene.add_image(Image::new(
                "doomed.png",
                ImageSource::Generated {
                    width: 8,
                    height: 8,
                },
            ));
            cam.image = Some(img);
            scene.add_camera(cam)
        };
        let survivor = {
            let mut cam = Camera::new("survivor");
            let img = scene.add_image(Image::new(
                "survivor.png",
                ImageSource::Generated {
                    width: 8,
                    height: 8,
                },
            ));
            cam.image = Some(img);
            scene.add_camera(cam)
        };

        let host = TestHost::new();
        let mut mesh = TestMesh::default();
        let mut sink = TestSink::default();
        let mut registry = SessionRegistry::new();
        let mut ctl = controller(quiet_settings());
        start_active(&mut ctl, &mut scene, &host, &mut mesh, &mut sink, &mut registry);

        // The host deletes one proxy mid-session.
        sink.dead.push(doomed);
        scene.remove_camera(doomed);

        ctl.cancel(&mut scene, &mut mesh, &mut sink, &mut registry);
        // Restoration continued past the dead proxy.
        assert_eq!(sink.visibility.get(&active_cam), Some(&true));
        assert_eq!(sink.visibility.get(&survivor), Some(&true));
    }

    #[test]
    fn analytic_risk_flows_to_the_sink_and_locks_paint() {
        let (mut scene, _, _) = scene_with_one_projector();
        // Make the canvas size known so the analytic heuristic sees it.
        let canvas = scene.paint_target.unwrap();
        scene.image_mut(canvas).unwrap().static_size = Some((4096, 4096));

        let mut host = TestHost::new();
        host.view_distance = 30.0;
        host.brush_radius = 150.0;

        let mut settings = quiet_settings();
        settings.safety_mode = SafetyMode::Analytic;
        settings.lock_paint_on_risk = true;

        let mut mesh = TestMesh::default();
        let mut sink = TestSink::default();
        let mut registry = SessionRegistry::new();
        let mut ctl = controller(settings);
        start_active(&mut ctl, &mut scene, &host, &mut mesh, &mut sink, &mut registry);

        ctl.tick(
            &mut scene,
            &host,
            &mut mesh,
            &mut sink,
            TickKind::Input,
            Instant::now(),
        );
        assert!(ctl.risk());
        assert_eq!(sink.last_risk, Some(true));
        assert!(sink.paint_locked);

        // Cancellation drops the lock.
        ctl.cancel(&mut scene, &mut mesh, &mut sink, &mut registry);
        assert!(!sink.paint_locked);
    }

    #[test]
    fn two_sessions_coexist_through_the_registry() {
        let mut registry = SessionRegistry::new();
        let mut a = controller(quiet_settings());
        let mut b = controller(quiet_settings());
        assert!(a.start(&mut registry));
        assert!(b.start(&mut registry));
        assert_eq!(registry.running_count(), 2);
        assert_ne!(a.token(), b.token());

        let (mut scene, _, _) = scene_with_one_projector();
        let mut mesh = TestMesh::default();
        let mut sink = TestSink::default();
        a.cancel(&mut scene, &mut mesh, &mut sink, &mut registry);
        assert_eq!(registry.running_count(), 1);
        assert!(registry.is_running(b.token().unwrap()));
    }

    #[test]
    fn projector_image_becomes_resident_and_protected() {
        let (mut scene, _, image) = scene_with_one_projector();
        let host = TestHost::new();
        let mut mesh = TestMesh::default();
        let mut sink = TestSink::default();
        let mut registry = SessionRegistry::new();
        let mut ctl = controller(quiet_settings());
        start_active(&mut ctl, &mut scene, &host, &mut mesh, &mut sink, &mut registry);

        ctl.tick(
            &mut scene,
            &host,
            &mut mesh,
            &mut sink,
            TickKind::Input,
            Instant::now(),
        );
        let cache = ctl.cache().unwrap();
        assert!(cache.is_resident(image));
        // Projector image + paint target
        assert_eq!(cache.protected_count(), 2);
    }
}
