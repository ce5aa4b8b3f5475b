use glam::{Vec3, Vec4};
use rand::rngs::StdRng;
use rand::Rng;

use crate::particles::config::{ColorRange, ParticleSystemConfig};
use crate::particles::constants::MS_PER_SECOND;
use crate::particles::curve::CurveCache;
use crate::particles::error::Result;
use crate::particles::shape::EmitterShape;
use crate::particles::system::SystemId;
use crate::particles::update::ModifierPipeline;
use crate::particles::value::ResolvedValue;

/// Per-particle linear velocity, one speed per axis
pub struct LinearVelocityData {
    pub speed: Vec<Vec3>,
}

/// Per-particle orbital velocity around the spawn origin
pub struct OrbitalVelocityData {
    /// Radians per second around X, Y and Z
    pub speed: Vec<Vec3>,
    /// Position relative to the spawn origin, rotated every frame
    pub position_offset: Vec<Vec3>,
}

/// Fixed-size particle storage in Structure of Arrays (SOA) layout.
///
/// Slots are stable while a particle is alive and reused once it is
/// deactivated. Fields of inactive slots are stale and get overwritten by the
/// next activation.
pub struct ParticlePool {
    capacity: usize,
    active_count: usize,

    pub is_active: Vec<bool>,
    /// Milliseconds, same clock as `FrameCycle::now`
    pub creation_time: Vec<f64>,
    /// Milliseconds
    pub start_lifetime: Vec<f32>,
    /// Age in milliseconds as of the last step
    pub lifetime: Vec<f32>,

    /// In the emitter's local frame
    pub position: Vec<Vec3>,
    pub velocity: Vec<Vec3>,

    /// Radians
    pub rotation: Vec<f32>,
    pub size: Vec<f32>,
    /// RGBA, alpha is the visible opacity
    pub color: Vec<Vec4>,
    pub start_frame: Vec<f32>,

    /// Start values, multiplied by lifetime curves
    pub start_size: Vec<f32>,
    pub start_opacity: Vec<f32>,
    pub start_color_r: Vec<f32>,
    pub start_color_g: Vec<f32>,
    pub start_color_b: Vec<f32>,

    pub rotation_speed: Vec<f32>,
    pub noise_offset: Vec<f32>,

    pub linear_velocity: Option<LinearVelocityData>,
    pub orbital_velocity: Option<OrbitalVelocityData>,
}

impl ParticlePool {
    /// Create a pool with every slot allocated up front
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            active_count: 0,

            is_active: vec![false; capacity],
            creation_time: vec![0.0; capacity],
            start_lifetime: vec![0.0; capacity],
            lifetime: vec![0.0; capacity],

            position: vec![Vec3::ZERO; capacity],
            velocity: vec![Vec3::ZERO; capacity],

            rotation: vec![0.0; capacity],
            size: vec![0.0; capacity],
            color: vec![Vec4::ZERO; capacity],
            start_frame: vec![0.0; capacity],

            start_size: vec![0.0; capacity],
            start_opacity: vec![0.0; capacity],
            start_color_r: vec![0.0; capacity],
            start_color_g: vec![0.0; capacity],
            start_color_b: vec![0.0; capacity],

            rotation_speed: vec![0.0; capacity],
            noise_offset: vec![0.0; capacity],

            linear_velocity: None,
            orbital_velocity: None,
        }
    }

    pub fn with_linear_velocity(mut self) -> Self {
        self.linear_velocity = Some(LinearVelocityData {
            speed: vec![Vec3::ZERO; self.capacity],
        });
        self
    }

    pub fn with_orbital_velocity(mut self) -> Self {
        self.orbital_velocity = Some(OrbitalVelocityData {
            speed: vec![Vec3::ZERO; self.capacity],
            position_offset: vec![Vec3::ZERO; self.capacity],
        });
        self
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn active_count(&self) -> usize {
        self.active_count
    }

    pub fn is_full(&self) -> bool {
        self.active_count >= self.capacity
    }

    /// First inactive slot at or after `from`
    pub fn first_inactive(&self, from: usize) -> Option<usize> {
        if self.is_full() {
            return None;
        }
        self.is_active
            .iter()
            .skip(from)
            .position(|active| !active)
            .map(|offset| from + offset)
    }

    /// Bring a slot to life at `time`, `offset` away from the emitter.
    ///
    /// Every start value is resampled, the shape is sampled for the spawn
    /// position and direction, and the modifiers run once at `t = 0`.
    pub fn activate(&mut self, index: usize, time: f64, offset: Vec3, ctx: &mut SpawnContext<'_>) {
        if !self.is_active[index] {
            self.active_count += 1;
        }
        self.is_active[index] = true;
        self.creation_time[index] = time;
        self.lifetime[index] = 0.0;

        let template = ctx.template;
        let progress = ctx.loop_progress;
        let rng = &mut *ctx.rng;

        let start_color = template.sample_color(rng);
        self.start_color_r[index] = start_color.x;
        self.start_color_g[index] = start_color.y;
        self.start_color_b[index] = start_color.z;

        self.start_frame[index] = template.start_frame.evaluate_at_start(rng) as f32;
        self.start_lifetime[index] = (template.start_lifetime.evaluate(progress, rng) * MS_PER_SECOND) as f32;

        let opacity = template.start_opacity.evaluate(progress, rng) as f32;
        self.start_opacity[index] = opacity;
        self.color[index] = start_color.extend(opacity);

        self.rotation[index] = (template.start_rotation.evaluate(progress, rng) as f32).to_radians();

        let size = template.start_size.evaluate(progress, rng) as f32;
        self.start_size[index] = size;
        self.size[index] = size;

        ctx.modifiers.init_particle(self, index, rng);

        let speed = template.start_speed.evaluate(progress, rng) as f32;
        let sample = template.shape.spawn(rng);
        self.velocity[index] = sample.direction * speed;
        self.position[index] = offset + sample.position;
        if let Some(orbital) = self.orbital_velocity.as_mut() {
            orbital.position_offset[index] = sample.position;
        }

        ctx.modifiers.apply(self, index, 0.0, 0.0, true);
    }

    /// Retire a slot; only the flag and visible opacity are touched
    pub fn deactivate(&mut self, index: usize) {
        if self.is_active[index] {
            self.is_active[index] = false;
            self.color[index].w = 0.0;
            self.active_count -= 1;
        }
    }

    /// Deactivate everything
    pub fn clear(&mut self) {
        for index in 0..self.capacity {
            self.deactivate(index);
        }
    }
}

/// Start values of a system, resolved once at creation
pub struct ParticleTemplate {
    pub start_lifetime: ResolvedValue,
    pub start_speed: ResolvedValue,
    pub start_size: ResolvedValue,
    pub start_opacity: ResolvedValue,
    /// Degrees
    pub start_rotation: ResolvedValue,
    pub start_frame: ResolvedValue,
    pub start_color: ColorRange,
    pub shape: EmitterShape,
}

impl ParticleTemplate {
    pub fn resolve(config: &ParticleSystemConfig, owner: SystemId, cache: &mut CurveCache) -> Result<Self> {
        Ok(Self {
            start_lifetime: config.start_lifetime.resolve(owner, cache)?,
            start_speed: config.start_speed.resolve(owner, cache)?,
            start_size: config.start_size.resolve(owner, cache)?,
            start_opacity: config.start_opacity.resolve(owner, cache)?,
            start_rotation: config.start_rotation.resolve(owner, cache)?,
            start_frame: config.texture_sheet_animation.start_frame.resolve(owner, cache)?,
            start_color: config.start_color,
            shape: config.shape.clone(),
        })
    }

    /// One random ratio shared by all three channels
    fn sample_color<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec3 {
        let min = self.start_color.min.to_vec3();
        let max = self.start_color.max.to_vec3();
        if min == max {
            min
        } else {
            min.lerp(max, rng.gen::<f32>())
        }
    }
}

/// Everything `ParticlePool::activate` needs besides the pool itself
pub struct SpawnContext<'a> {
    pub template: &'a ParticleTemplate,
    pub modifiers: &'a ModifierPipeline,
    /// Normalized position within the current loop
    pub loop_progress: f64,
    pub rng: &'a mut StdRng,
}
