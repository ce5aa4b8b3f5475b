use glam::{EulerRot, Quat, Vec3};
use noise::{Fbm, MultiFractal, NoiseFn, Perlin};
use rand::Rng;

use crate::particles::config::{AxisExpressions, NoiseConfig, ParticleSystemConfig, RotationOverLifetime};
use crate::particles::constants::{
    NOISE_OFFSET_RANGE, NOISE_POSITION_SCALE, NOISE_POWER_SCALE, ROTATION_OVER_LIFETIME_SCALE,
};
use crate::particles::curve::CurveCache;
use crate::particles::error::Result;
use crate::particles::particle_data::ParticlePool;
use crate::particles::render_data::DirtyAttributes;
use crate::particles::system::SystemId;
use crate::particles::value::{CurveValue, ResolvedValue, ValueExpression};

/// Per-axis velocity source. An axis driven by a lifetime curve is sampled
/// every frame; any other axis uses the speed drawn at spawn.
pub struct AxisVelocity {
    axes: [Option<ResolvedValue>; 3],
}

impl AxisVelocity {
    fn resolve(expressions: &AxisExpressions, owner: SystemId, cache: &mut CurveCache) -> Result<Self> {
        let [x, y, z] = expressions.axes();
        let mut resolve = |axis: Option<&ValueExpression>| {
            axis.map(|expr| expr.resolve(owner, cache)).transpose()
        };
        Ok(Self {
            axes: [resolve(x)?, resolve(y)?, resolve(z)?],
        })
    }

    /// Speed drawn once at spawn
    fn initial<R: Rng + ?Sized>(&self, rng: &mut R) -> Vec3 {
        let mut speed = Vec3::ZERO;
        for (axis, value) in self.axes.iter().enumerate() {
            if let Some(value) = value {
                speed[axis] = value.evaluate_at_start(rng) as f32;
            }
        }
        speed
    }

    /// Speed at `lifetime_percent`, falling back to the stored spawn speed
    fn at(&self, stored: Vec3, lifetime_percent: f64) -> Vec3 {
        let mut speed = stored;
        for (axis, value) in self.axes.iter().enumerate() {
            if let Some(curve) = value.as_ref().and_then(ResolvedValue::lifetime_curve) {
                speed[axis] = curve.sample(lifetime_percent) as f32;
            }
        }
        speed
    }
}

/// Fractal noise displacing position, rotation and size
pub struct NoiseModifier {
    fbm: Fbm<Perlin>,
    config: NoiseConfig,
}

impl NoiseModifier {
    fn new(config: NoiseConfig, seed: u32) -> Self {
        let fbm = Fbm::<Perlin>::new(seed)
            .set_octaves(config.octaves)
            .set_frequency(config.frequency);
        Self { fbm, config }
    }

    /// Offsets along X, Y and Z for one lookup position
    fn sample(&self, lookup: f64) -> Vec3 {
        Vec3::new(
            self.fbm.get([lookup, 0.0, 0.0]) as f32,
            self.fbm.get([lookup, lookup, 0.0]) as f32,
            self.fbm.get([lookup, lookup, lookup]) as f32,
        )
    }
}

/// Everything that runs on a particle each frame after aging.
///
/// Resolved once per system; disabled modifiers are `None` and cost nothing.
pub struct ModifierPipeline {
    linear: Option<AxisVelocity>,
    orbital: Option<AxisVelocity>,
    size: Option<CurveValue>,
    opacity: Option<CurveValue>,
    color: Option<[CurveValue; 3]>,
    rotation: Option<ResolvedValue>,
    noise: Option<NoiseModifier>,
}

impl ModifierPipeline {
    pub fn resolve<R: Rng + ?Sized>(
        config: &ParticleSystemConfig,
        owner: SystemId,
        cache: &mut CurveCache,
        rng: &mut R,
    ) -> Result<Self> {
        let velocity = &config.velocity_over_lifetime;
        let linear = if velocity.is_active && !velocity.linear.is_empty() {
            Some(AxisVelocity::resolve(&velocity.linear, owner, cache)?)
        } else {
            None
        };
        let orbital = if velocity.is_active && !velocity.orbital.is_empty() {
            Some(AxisVelocity::resolve(&velocity.orbital, owner, cache)?)
        } else {
            None
        };

        let size = if config.size_over_lifetime.is_active {
            Some(config.size_over_lifetime.lifetime_curve.resolve_curve(owner, cache)?)
        } else {
            None
        };
        let opacity = if config.opacity_over_lifetime.is_active {
            Some(config.opacity_over_lifetime.lifetime_curve.resolve_curve(owner, cache)?)
        } else {
            None
        };

        let color_config = &config.color_over_lifetime;
        let color = if color_config.is_active {
            Some([
                color_config.r.resolve_curve(owner, cache)?,
                color_config.g.resolve_curve(owner, cache)?,
                color_config.b.resolve_curve(owner, cache)?,
            ])
        } else {
            None
        };

        let rotation = rotation_rate(&config.rotation_over_lifetime);

        let noise = if config.noise.is_active {
            Some(NoiseModifier::new(config.noise, rng.gen::<u32>()))
        } else {
            None
        };

        Ok(Self {
            linear,
            orbital,
            size,
            opacity,
            color,
            rotation,
            noise,
        })
    }

    /// Allocate a pool with the optional arrays these modifiers need
    pub fn create_pool(&self, capacity: usize) -> ParticlePool {
        let mut pool = ParticlePool::new(capacity);
        if self.linear.is_some() {
            pool = pool.with_linear_velocity();
        }
        if self.orbital.is_some() {
            pool = pool.with_orbital_velocity();
        }
        pool
    }

    /// Draw the per-particle modifier state for a freshly activated slot
    pub fn init_particle<R: Rng + ?Sized>(&self, pool: &mut ParticlePool, index: usize, rng: &mut R) {
        pool.rotation_speed[index] = match &self.rotation {
            Some(rate) => rate.evaluate_at_start(rng) as f32,
            None => 0.0,
        };

        pool.noise_offset[index] = match &self.noise {
            Some(noise) if noise.config.use_random_offset => rng.gen::<f32>() * NOISE_OFFSET_RANGE,
            _ => 0.0,
        };

        if let (Some(linear), Some(data)) = (&self.linear, pool.linear_velocity.as_mut()) {
            data.speed[index] = linear.initial(rng);
        }
        if let (Some(orbital), Some(data)) = (&self.orbital, pool.orbital_velocity.as_mut()) {
            data.speed[index] = orbital.initial(rng);
        }
    }

    /// Run every enabled modifier on one particle.
    ///
    /// `force` is set at spawn so attributes with a disabled curve are reset
    /// to their start values instead of keeping whatever the slot held.
    pub fn apply(&self, pool: &mut ParticlePool, index: usize, dt: f32, lifetime_percent: f64, force: bool) {
        if let Some(linear) = &self.linear {
            apply_linear_velocity(pool, index, linear, dt, lifetime_percent);
        }
        if let Some(orbital) = &self.orbital {
            apply_orbital_velocity(pool, index, orbital, dt, lifetime_percent);
        }

        match &self.size {
            Some(curve) => pool.size[index] = pool.start_size[index] * curve.sample(lifetime_percent) as f32,
            None if force => pool.size[index] = pool.start_size[index],
            None => {}
        }

        match &self.opacity {
            Some(curve) => {
                pool.color[index].w = pool.start_opacity[index] * curve.sample(lifetime_percent) as f32
            }
            None if force => pool.color[index].w = pool.start_opacity[index],
            None => {}
        }

        match &self.color {
            Some(curves) => apply_color_curves(pool, index, curves, lifetime_percent),
            None if force => {
                pool.color[index].x = pool.start_color_r[index];
                pool.color[index].y = pool.start_color_g[index];
                pool.color[index].z = pool.start_color_b[index];
            }
            None => {}
        }

        if self.rotation.is_some() {
            pool.rotation[index] += dt * pool.rotation_speed[index] * ROTATION_OVER_LIFETIME_SCALE;
        }

        if let Some(noise) = &self.noise {
            apply_noise(pool, index, noise, lifetime_percent);
        }
    }

    /// Attribute arrays `apply` writes to on a regular frame
    pub fn touched_attributes(&self) -> DirtyAttributes {
        let noise = self.noise.as_ref().map(|noise| noise.config);
        DirtyAttributes {
            position: self.linear.is_some()
                || self.orbital.is_some()
                || noise.is_some_and(|n| n.position_amount != 0.0),
            rotation: self.rotation.is_some() || noise.is_some_and(|n| n.rotation_amount != 0.0),
            size: self.size.is_some() || noise.is_some_and(|n| n.size_amount != 0.0),
            color: self.opacity.is_some() || self.color.is_some(),
            ..DirtyAttributes::default()
        }
    }
}

fn rotation_rate(config: &RotationOverLifetime) -> Option<ResolvedValue> {
    config.is_active.then_some(ResolvedValue::RandomRange {
        min: config.min,
        max: config.max,
    })
}

/// Translate along the per-axis linear velocity
pub fn apply_linear_velocity(
    pool: &mut ParticlePool,
    index: usize,
    linear: &AxisVelocity,
    dt: f32,
    lifetime_percent: f64,
) {
    let Some(data) = pool.linear_velocity.as_ref() else {
        return;
    };
    let speed = linear.at(data.speed[index], lifetime_percent);
    pool.position[index] += speed * dt;
}

/// Rotate the particle's offset from its spawn origin by this frame's angles
pub fn apply_orbital_velocity(
    pool: &mut ParticlePool,
    index: usize,
    orbital: &AxisVelocity,
    dt: f32,
    lifetime_percent: f64,
) {
    let Some(data) = pool.orbital_velocity.as_mut() else {
        return;
    };
    let speed = orbital.at(data.speed[index], lifetime_percent) * dt;
    let offset = data.position_offset[index];

    let rotated = Quat::from_euler(EulerRot::XZY, speed.x, speed.z, speed.y) * offset;
    data.position_offset[index] = rotated;
    pool.position[index] += rotated - offset;
}

/// Multiply each start channel by its curve
pub fn apply_color_curves(pool: &mut ParticlePool, index: usize, curves: &[CurveValue; 3], lifetime_percent: f64) {
    let color = &mut pool.color[index];
    color.x = pool.start_color_r[index] * curves[0].sample(lifetime_percent) as f32;
    color.y = pool.start_color_g[index] * curves[1].sample(lifetime_percent) as f32;
    color.z = pool.start_color_b[index] * curves[2].sample(lifetime_percent) as f32;
}

/// Displace by fractal noise looked up along the particle's lifetime
pub fn apply_noise(pool: &mut ParticlePool, index: usize, noise: &NoiseModifier, lifetime_percent: f64) {
    let config = noise.config;
    let lookup = (lifetime_percent + pool.noise_offset[index] as f64)
        * NOISE_POSITION_SCALE as f64
        * config.strength as f64;
    let power = NOISE_POWER_SCALE * config.strength;
    let offset = noise.sample(lookup) * power;

    if config.position_amount != 0.0 {
        pool.position[index] += offset * config.position_amount;
    }
    if config.rotation_amount != 0.0 {
        pool.rotation[index] += offset.x * config.rotation_amount;
    }
    if config.size_amount != 0.0 {
        pool.size[index] += offset.x * config.size_amount;
    }
}
