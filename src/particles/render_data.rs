use bytemuck::{Pod, Zeroable};

use crate::particles::config::{TextureSheetAnimation, TimeMode};
use crate::particles::particle_data::ParticlePool;

/// Which attribute arrays changed since the renderer last uploaded them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DirtyAttributes {
    pub position: bool,
    pub color: bool,
    pub rotation: bool,
    pub size: bool,
    pub start_frame: bool,
    pub lifetime: bool,
    pub start_lifetime: bool,
    pub is_active: bool,
}

impl DirtyAttributes {
    pub fn all() -> Self {
        Self {
            position: true,
            color: true,
            rotation: true,
            size: true,
            start_frame: true,
            lifetime: true,
            start_lifetime: true,
            is_active: true,
        }
    }

    /// Arrays written when a particle is activated
    pub fn spawned() -> Self {
        Self::all()
    }

    /// Arrays written when a particle is deactivated
    pub fn deactivated() -> Self {
        Self {
            color: true,
            is_active: true,
            ..Self::default()
        }
    }

    /// Arrays written every frame for a living particle
    pub fn aged() -> Self {
        Self {
            position: true,
            lifetime: true,
            ..Self::default()
        }
    }

    pub fn any(&self) -> bool {
        *self != Self::default()
    }

    pub fn merge(&mut self, other: DirtyAttributes) {
        self.position |= other.position;
        self.color |= other.color;
        self.rotation |= other.rotation;
        self.size |= other.size;
        self.start_frame |= other.start_frame;
        self.lifetime |= other.lifetime;
        self.start_lifetime |= other.start_lifetime;
        self.is_active |= other.is_active;
    }
}

/// Flat per-particle arrays ready for upload, borrowed from the pool.
///
/// Inactive slots are included; the renderer hides them through `is_active`
/// or their zero opacity.
#[derive(Debug, Clone, Copy)]
pub struct AttributeView<'a> {
    /// xyz per particle
    pub position: &'a [f32],
    /// rgba per particle
    pub color: &'a [f32],
    pub rotation: &'a [f32],
    pub size: &'a [f32],
    pub start_frame: &'a [f32],
    /// Age in milliseconds
    pub lifetime: &'a [f32],
    /// Milliseconds
    pub start_lifetime: &'a [f32],
    pub is_active: &'a [bool],
}

impl<'a> AttributeView<'a> {
    pub fn new(pool: &'a ParticlePool) -> Self {
        Self {
            position: bytemuck::cast_slice(&pool.position),
            color: bytemuck::cast_slice(&pool.color),
            rotation: &pool.rotation,
            size: &pool.size,
            start_frame: &pool.start_frame,
            lifetime: &pool.lifetime,
            start_lifetime: &pool.start_lifetime,
            is_active: &pool.is_active,
        }
    }

    /// Number of slots, active or not
    pub fn len(&self) -> usize {
        self.is_active.len()
    }

    pub fn is_empty(&self) -> bool {
        self.is_active.is_empty()
    }
}

/// Uniform block for the particle shader
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct ParticleUniforms {
    /// Seconds since the host started
    pub elapsed: f32,
    pub fps: f32,
    /// Columns and rows of the texture sheet
    pub tiles: [f32; 2],
    /// 1 when frames advance at `fps`, 0 when they follow the lifetime
    pub use_fps_for_frame_index: u32,
    pub _padding: [u32; 3],
}

impl ParticleUniforms {
    pub fn new(elapsed: f32, animation: &TextureSheetAnimation) -> Self {
        Self {
            elapsed,
            fps: animation.fps,
            tiles: [animation.tiles.x as f32, animation.tiles.y as f32],
            use_fps_for_frame_index: u32::from(animation.time_mode == TimeMode::Fps),
            _padding: [0; 3],
        }
    }
}
