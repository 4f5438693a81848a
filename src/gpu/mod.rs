// ============================================================================
// GPU MODULE — texture residency backends for projector images
// ============================================================================
//
// Architecture:
//   context.rs — wgpu Device, Queue, adapter init
//   texture.rs — ProjectorTexture wrapper with full/partial upload
//   pool.rs    — texture recycling pool keyed by dimensions
//
// The residency cache never talks to wgpu directly; it goes through the
// `TextureBackend` trait so it can run against a real device, the headless
// fallback, or a counting double in tests.
// ============================================================================

pub mod context;
pub mod pool;
pub mod texture;

use std::collections::HashMap;

use crate::log_warn;
use context::GpuContext;
use pool::TexturePool;
use texture::ProjectorTexture;

/// Opaque handle to one occupied texture slot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SlotId(u64);

/// Where resident images physically live. Exactly one backend exists per
/// session; the residency cache owns it.
pub trait TextureBackend {
    /// Upload an RGBA8 pixel buffer into a new slot. `None` when the device
    /// cannot take the texture (unsupported size, out of memory).
    fn acquire(&mut self, width: u32, height: u32, data: &[u8]) -> Option<SlotId>;

    /// Free a slot. Unknown ids are ignored.
    fn release(&mut self, slot: SlotId);

    /// Drop any memory held beyond the occupied slots (recycling pools).
    /// Called on teardown and the "free GPU memory" action.
    fn trim(&mut self) {}

    /// Approximate bytes held by occupied slots.
    fn memory_bytes(&self) -> usize;
}

// ----------------------------------------------------------------------------
// wgpu-backed implementation
// ----------------------------------------------------------------------------

/// Real GPU residency: each slot is a `ProjectorTexture`, with released
/// textures recycled through the pool instead of destroyed.
pub struct WgpuBackend {
    context: GpuContext,
    pool: TexturePool,
    slots: HashMap<SlotId, ProjectorTexture>,
    next_slot: u64,
}

impl WgpuBackend {
    pub fn new(context: GpuContext) -> Self {
        Self {
            context,
            pool: TexturePool::new(),
            slots: HashMap::new(),
            next_slot: 0,
        }
    }

    pub fn texture(&self, slot: SlotId) -> Option<&ProjectorTexture> {
        self.slots.get(&slot)
    }
}

impl TextureBackend for WgpuBackend {
    fn acquire(&mut self, width: u32, height: u32, data: &[u8]) -> Option<SlotId> {
        if !self.context.supports_size(width, height) {
            log_warn!(
                "texture {}x{} exceeds device limit {} — not uploading",
                width,
                height,
                self.context.max_texture_dim
            );
            return None;
        }
        if data.len() != (width as usize) * (height as usize) * 4 {
            return None;
        }

        let recycled = self.pool.acquire(width, height);
        let texture = ProjectorTexture::new(
            &self.context.device,
            &self.context.queue,
            width,
            height,
            data,
            recycled,
        );

        let id = SlotId(self.next_slot);
        self.next_slot += 1;
        self.slots.insert(id, texture);
        Some(id)
    }

    fn release(&mut self, slot: SlotId) {
        if let Some(tex) = self.slots.remove(&slot) {
            self.pool.release(tex.texture, tex.width, tex.height);
        }
    }

    fn trim(&mut self) {
        self.pool.clear();
    }

    fn memory_bytes(&self) -> usize {
        self.slots
            .values()
            .map(|t| (t.width as usize) * (t.height as usize) * 4)
            .sum::<usize>()
            + self.pool.pooled_memory_bytes()
    }
}

// ----------------------------------------------------------------------------
// Headless fallback
// ----------------------------------------------------------------------------

/// CPU-only stand-in used when no adapter is available and by the headless
/// CLI: slots exist only as byte counts, so residency/eviction logic runs
/// unchanged without a device.
#[derive(Default)]
pub struct HeadlessBackend {
    slots: HashMap<SlotId, usize>,
    next_slot: u64,
}

impl HeadlessBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TextureBackend for HeadlessBackend {
    fn acquire(&mut self, width: u32, height: u32, data: &[u8]) -> Option<SlotId> {
        if data.len() != (width as usize) * (height as usize) * 4 {
            return None;
        }
        let id = SlotId(self.next_slot);
        self.next_slot += 1;
        self.slots.insert(id, data.len());
        Some(id)
    }

    fn release(&mut self, slot: SlotId) {
        self.slots.remove(&slot);
    }

    fn memory_bytes(&self) -> usize {
        self.slots.values().sum()
    }
}

/// Pick the best available backend: hardware, then software rasterizer,
/// then the headless byte-counting fallback.
pub fn best_backend(preferred_gpu: &str) -> Box<dyn TextureBackend> {
    match GpuContext::new(preferred_gpu) {
        Some(ctx) => Box::new(WgpuBackend::new(ctx)),
        None => {
            log_warn!("no GPU adapter available — projector textures stay CPU-side");
            Box::new(HeadlessBackend::new())
        }
    }
}
