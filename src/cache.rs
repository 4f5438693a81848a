// ============================================================================
// IMAGE RESIDENCY CACHE — bounded GPU residency for projector photographs
// ============================================================================
//
// A projection rig easily carries dozens of 20+ MP photographs; keeping them
// all GPU-resident is not an option. This cache bounds residency to
// `max_resident` images with LRU eviction, except for the protected set (the
// paint-target canvas and the active projector image), which is re-evaluated
// every tick and never evicted.
//
// Both this table and the preview table are owned by the session: they are
// constructed on activation and torn down on cancellation, never
// process-wide. A stale image handle anywhere in here purges the entry and
// degrades the operation to "not resident" — it never propagates.

use std::collections::HashMap;

use image::RgbaImage;
use uuid::Uuid;

use crate::error::ProjectionError;
use crate::gpu::{SlotId, TextureBackend};
use crate::io::load_rgba;
use crate::probe;
use crate::scene::{Image, ImageId, ImageSource, Scene};
use crate::{log_info, log_warn};

/// Longest edge of generated preview thumbnails, in pixels.
const PREVIEW_MAX_EDGE: u32 = 128;

struct CacheEntry {
    slot: Option<SlotId>,
    /// Monotonic touch order; higher = more recently used.
    last_touch: u64,
    protected: bool,
    /// Decoded full-resolution pixels, kept only until the preview exists
    /// (protected images hold onto theirs for the session's lifetime).
    cpu_pixels: Option<RgbaImage>,
}

pub struct ResidencyCache {
    backend: Box<dyn TextureBackend>,
    max_resident: usize,
    entries: HashMap<ImageId, CacheEntry>,
    /// Independent preview cache, keyed by stable image identity.
    previews: HashMap<Uuid, RgbaImage>,
    touch_counter: u64,
}

impl ResidencyCache {
    pub fn new(backend: Box<dyn TextureBackend>, max_resident: usize) -> Self {
        Self {
            backend,
            max_resident: max_resident.max(1),
            entries: HashMap::new(),
            previews: HashMap::new(),
            touch_counter: 0,
        }
    }

    fn next_touch(&mut self) -> u64 {
        self.touch_counter += 1;
        self.touch_counter
    }

    /// Ensure an image occupies a GPU slot, uploading and evicting as needed.
    ///
    /// Returns whether the image is resident afterwards. A stale handle or
    /// an undecodable image is a recoverable miss, never an error.
    pub fn make_resident(&mut self, scene: &Scene, id: ImageId) -> bool {
        let image = match scene.image(id) {
            Some(img) => img,
            None => {
                log_warn!("{} — purging", ProjectionError::StaleReference { kind: "image" });
                self.purge(id);
                return false;
            }
        };

        // Already resident: bump to most-recently-used and we're done.
        if self.entries.get(&id).map_or(false, |e| e.slot.is_some()) {
            let touch = self.next_touch();
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.last_touch = touch;
            }
            return true;
        }

        let pixels = match load_rgba(image) {
            Ok(px) => px,
            Err(err) => {
                log_warn!("cannot decode '{}' for upload: {}", image.name, err);
                return false;
            }
        };

        let (w, h) = pixels.dimensions();
        let slot = match self.backend.acquire(w, h, pixels.as_raw()) {
            Some(slot) => slot,
            None => {
                log_warn!("GPU refused {}x{} texture for '{}'", w, h, image.name);
                return false;
            }
        };

        let touch = self.next_touch();
        let entry = self.entries.entry(id).or_insert(CacheEntry {
            slot: None,
            last_touch: 0,
            protected: false,
            cpu_pixels: None,
        });
        entry.slot = Some(slot);
        entry.last_touch = touch;
        entry.cpu_pixels = Some(pixels);

        self.evict_over_bound();
        true
    }

    /// Evict least-recently-used non-protected residents until the bound
    /// holds again. Reaching the bound is policy, not an error.
    fn evict_over_bound(&mut self) {
        while self.resident_unprotected_count() > self.max_resident {
            let victim = self
                .entries
                .iter()
                .filter(|(_, e)| e.slot.is_some() && !e.protected)
                .min_by_key(|(_, e)| e.last_touch)
                .map(|(id, _)| *id);
            match victim {
                Some(id) => self.evict(id),
                None => break,
            }
        }
    }

    /// Release one image's GPU slot and CPU-side pixel buffer.
    fn evict(&mut self, id: ImageId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            if let Some(slot) = entry.slot.take() {
                self.backend.release(slot);
            }
            entry.cpu_pixels = None;
        }
    }

    /// Drop a stale entry entirely, releasing whatever it held.
    fn purge(&mut self, id: ImageId) {
        if let Some(entry) = self.entries.remove(&id) {
            if let Some(slot) = entry.slot {
                self.backend.release(slot);
            }
        }
    }

    /// Memoized pixel dimensions of an image.
    ///
    /// File/embedded sources are probed from their header bytes; generated
    /// images report their declared dimensions. A zero dimension counts as
    /// invalid and is *not* memoized, so a later call may retry (the host
    /// may still be writing the file).
    pub fn static_size(&mut self, scene: &mut Scene, id: ImageId) -> Option<(u32, u32)> {
        let image = scene.image(id)?;
        if let Some(size) = image.static_size {
            return Some(size);
        }

        let size = match &image.source {
            ImageSource::Generated { width, height } => Some((*width, *height)),
            ImageSource::Embedded(bytes) => probe::probe_size(bytes),
            ImageSource::File(path) => match std::fs::read(path) {
                Ok(bytes) => probe::probe_size(&bytes),
                Err(err) => {
                    log_warn!("cannot read '{}': {}", path.display(), err);
                    None
                }
            },
        };

        match size {
            Some((w, h)) if w > 0 && h > 0 => {
                if let Some(image) = scene.image_mut(id) {
                    image.static_size = Some((w, h));
                }
                Some((w, h))
            }
            _ => None,
        }
    }

    /// Small preview texture for UI use; generated at most once per image
    /// identity.
    ///
    /// Generation is deferred until the decoded buffer shows a non-zero
    /// pixel — an all-black buffer usually means the host has allocated but
    /// not yet filled the image. Once the preview exists the full-resolution
    /// CPU buffer is freed, unless the image is protected.
    pub fn preview_bitmap(&mut self, scene: &Scene, id: ImageId) -> Option<&RgbaImage> {
        let image = match scene.image(id) {
            Some(img) => img,
            None => {
                log_warn!("{} — purging", ProjectionError::StaleReference { kind: "image" });
                self.purge(id);
                return None;
            }
        };
        let identity = image.id;

        if !self.previews.contains_key(&identity) {
            let pixels = match self.entries.get(&id).and_then(|e| e.cpu_pixels.as_ref()) {
                Some(px) => px,
                None => return None,
            };
            if !pixels.as_raw().iter().any(|&b| b != 0) {
                // Nothing observable yet; try again next tick.
                return None;
            }
            let (w, h) = pixels.dimensions();
            let scale = PREVIEW_MAX_EDGE as f64 / w.max(h).max(1) as f64;
            let (tw, th) = if scale < 1.0 {
                (
                    ((w as f64 * scale) as u32).max(1),
                    ((h as f64 * scale) as u32).max(1),
                )
            } else {
                (w, h)
            };
            let thumb = image::imageops::thumbnail(pixels, tw, th);
            self.previews.insert(identity, thumb);

            if let Some(entry) = self.entries.get_mut(&id) {
                if !entry.protected {
                    entry.cpu_pixels = None;
                }
            }
        }

        self.previews.get(&identity)
    }

    /// Re-evaluate the protected set (paint target ∪ active projector
    /// image). Called every tick; protected entries are made resident and
    /// everything else becomes fair game for eviction.
    pub fn set_protected(&mut self, scene: &Scene, protected: &[ImageId]) {
        for entry in self.entries.values_mut() {
            entry.protected = false;
        }
        for &id in protected {
            if !self.make_resident(scene, id) {
                continue;
            }
            if let Some(entry) = self.entries.get_mut(&id) {
                entry.protected = true;
            }
        }
        self.evict_over_bound();
    }

    /// Evict every non-protected resident. Returns how many were freed.
    /// Backs the user-facing "free excess GPU memory" action.
    pub fn free_excess(&mut self) -> usize {
        let victims: Vec<ImageId> = self
            .entries
            .iter()
            .filter(|(_, e)| e.slot.is_some() && !e.protected)
            .map(|(id, _)| *id)
            .collect();
        for id in &victims {
            self.evict(*id);
        }
        self.backend.trim();
        if !victims.is_empty() {
            log_info!("freed {} resident projector image(s)", victims.len());
        }
        victims.len()
    }

    /// Release everything, protected or not. Session teardown only.
    pub fn clear(&mut self) {
        let ids: Vec<ImageId> = self.entries.keys().copied().collect();
        for id in ids {
            self.purge(id);
        }
        self.backend.trim();
        self.previews.clear();
    }

    pub fn is_resident(&self, id: ImageId) -> bool {
        self.entries.get(&id).map_or(false, |e| e.slot.is_some())
    }

    pub fn slot(&self, id: ImageId) -> Option<SlotId> {
        self.entries.get(&id).and_then(|e| e.slot)
    }

    pub fn resident_count(&self) -> usize {
        self.entries.values().filter(|e| e.slot.is_some()).count()
    }

    fn resident_unprotected_count(&self) -> usize {
        self.entries
            .values()
            .filter(|e| e.slot.is_some() && !e.protected)
            .count()
    }

    pub fn protected_count(&self) -> usize {
        self.entries.values().filter(|e| e.protected).count()
    }

    pub fn memory_bytes(&self) -> usize {
        self.backend.memory_bytes()
    }
}
