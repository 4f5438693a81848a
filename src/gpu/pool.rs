// ============================================================================
// TEXTURE POOL — recycle GPU textures to avoid create/destroy churn
// ============================================================================

use std::collections::HashMap;

/// Key for pooled textures: (width, height).
type PoolKey = (u32, u32);

/// A pool of GPU textures keyed by dimensions.
///
/// When the residency cache evicts an image, its texture goes back into the
/// pool.  When another photo of the same size becomes resident (common —
/// shots from one calibrated rig share dimensions), we grab a texture from
/// the pool instead of allocating a new one.
///
/// This avoids the overhead of `device.create_texture` on every eviction
/// cycle and reduces driver-side memory fragmentation.
pub struct TexturePool {
    pool: HashMap<PoolKey, Vec<wgpu::Texture>>,
    /// Maximum number of textures to keep per key.
    max_per_key: usize,
}

impl TexturePool {
    pub fn new() -> Self {
        Self {
            pool: HashMap::new(),
            max_per_key: 2,
        }
    }

    /// Return a recycled texture if one exists for the given dimensions,
    /// otherwise return `None` and the caller should create a new one.
    pub fn acquire(&mut self, width: u32, height: u32) -> Option<wgpu::Texture> {
        self.pool.get_mut(&(width, height)).and_then(|v| v.pop())
    }

    /// Return a texture to the pool for future reuse.
    /// If the pool is full for this key, the texture is simply dropped.
    pub fn release(&mut self, texture: wgpu::Texture, width: u32, height: u32) {
        let entry = self.pool.entry((width, height)).or_insert_with(Vec::new);
        if entry.len() < self.max_per_key {
            entry.push(texture);
        }
        // else: texture is dropped here, freeing GPU memory
    }

    /// Drop all pooled textures (session teardown, "free GPU memory" op).
    pub fn clear(&mut self) {
        self.pool.clear();
    }

    /// Approximate GPU memory held by pooled textures (bytes).
    pub fn pooled_memory_bytes(&self) -> usize {
        self.pool
            .iter()
            .map(|((w, h), textures)| (*w as usize) * (*h as usize) * 4 * textures.len())
            .sum()
    }
}

impl Default for TexturePool {
    fn default() -> Self {
        Self::new()
    }
}
