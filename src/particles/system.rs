use glam::{Quat, Vec3};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::particles::config::{ParticleSystemConfig, SimulationSpace, TimeMode};
use crate::particles::constants::MS_PER_SECOND;
use crate::particles::curve::CurveCache;
use crate::particles::emission::{BurstState, EmissionInput, EmissionState};
use crate::particles::error::Result;
use crate::particles::particle_data::{ParticlePool, ParticleTemplate, SpawnContext};
use crate::particles::render_data::{AttributeView, DirtyAttributes, ParticleUniforms};
use crate::particles::update::ModifierPipeline;

static NEXT_SYSTEM_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identifier of a particle system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SystemId(u64);

impl SystemId {
    pub fn next() -> Self {
        SystemId(NEXT_SYSTEM_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub fn raw(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SystemId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "system#{}", self.0)
    }
}

/// Per-frame timing handed in by the host loop
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FrameCycle {
    /// Milliseconds on the host clock
    pub now: f64,
    /// Seconds since the previous frame
    pub delta: f32,
    /// Seconds since the host started
    pub elapsed: f32,
}

/// World transform of the node the emitter is attached to
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EmitterTransform {
    pub position: Vec3,
    pub rotation: Quat,
}

impl Default for EmitterTransform {
    fn default() -> Self {
        Self {
            position: Vec3::ZERO,
            rotation: Quat::IDENTITY,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct UpdateEvent {
    pub delta: f32,
    pub elapsed: f32,
    /// Milliseconds since the system was created
    pub lifetime: f64,
    /// 1-based index of the current loop
    pub iteration_count: u32,
    pub active_particles: usize,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompleteEvent {
    /// Milliseconds since the system was created
    pub lifetime: f64,
}

pub type UpdateCallback = Box<dyn FnMut(&UpdateEvent) + Send>;
pub type CompleteCallback = Box<dyn FnMut(&CompleteEvent) + Send>;

/// Particle system statistics
#[derive(Debug, Default, Clone, PartialEq)]
pub struct ParticleStats {
    pub active_particles: usize,
    pub spawned_last_frame: usize,
    /// Spawn requests lost because the pool was full
    pub dropped_last_frame: usize,
    pub deactivated_last_frame: usize,
    /// Fraction of the pool in use
    pub capacity_used: f32,
}

/// One running particle effect
pub struct ParticleSystem {
    id: SystemId,
    config: ParticleSystemConfig,

    pool: ParticlePool,
    template: ParticleTemplate,
    modifiers: ModifierPipeline,
    emission: EmissionState,
    rng: StdRng,

    creation_time: f64,
    last_emission_time: f64,
    distance_from_last_emit: f32,
    lifetime: f64,

    transform: EmitterTransform,
    last_world_position: Option<Vec3>,
    last_world_rotation: Option<Quat>,
    gravity_local: Vec3,

    is_enabled: bool,
    drop_warned: bool,
    dirty: DirtyAttributes,
    stats: ParticleStats,

    on_update: Option<UpdateCallback>,
    on_complete: Option<CompleteCallback>,
}

impl ParticleSystem {
    /// Build a system created at `now` (milliseconds).
    ///
    /// Curves are registered in `cache` under the new system's id. If any
    /// part of the config fails to resolve, those registrations are undone.
    pub fn new(config: ParticleSystemConfig, now: f64, cache: &mut CurveCache) -> Result<Self> {
        config.validate()?;
        let id = SystemId::next();

        match Self::build(id, config, now, cache) {
            Ok(system) => {
                log::debug!(
                    "[ParticleSystem] Created {} with {} slots",
                    id,
                    system.pool.capacity()
                );
                Ok(system)
            }
            Err(e) => {
                cache.release(id);
                Err(e)
            }
        }
    }

    fn build(id: SystemId, config: ParticleSystemConfig, now: f64, cache: &mut CurveCache) -> Result<Self> {
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let template = ParticleTemplate::resolve(&config, id, cache)?;
        let modifiers = ModifierPipeline::resolve(&config, id, cache, &mut rng)?;
        let emission = EmissionState::resolve(&config.emission, id, cache)?;
        let pool = modifiers.create_pool(config.max_particles);

        Ok(Self {
            id,
            pool,
            template,
            modifiers,
            emission,
            rng,

            creation_time: now,
            last_emission_time: now,
            distance_from_last_emit: 0.0,
            lifetime: 0.0,

            transform: EmitterTransform::default(),
            last_world_position: None,
            last_world_rotation: None,
            gravity_local: Vec3::new(0.0, config.gravity, 0.0),

            is_enabled: true,
            drop_warned: false,
            dirty: DirtyAttributes::all(),
            stats: ParticleStats::default(),

            on_update: None,
            on_complete: None,

            config,
        })
    }

    pub fn id(&self) -> SystemId {
        self.id
    }

    pub fn config(&self) -> &ParticleSystemConfig {
        &self.config
    }

    pub fn pool(&self) -> &ParticlePool {
        &self.pool
    }

    pub fn stats(&self) -> &ParticleStats {
        &self.stats
    }

    pub fn active_particles(&self) -> usize {
        self.pool.active_count()
    }

    /// Milliseconds since creation as of the last step
    pub fn lifetime(&self) -> f64 {
        self.lifetime
    }

    pub fn creation_time(&self) -> f64 {
        self.creation_time
    }

    pub fn is_enabled(&self) -> bool {
        self.is_enabled
    }

    /// Stop emitting; living particles keep aging
    pub fn pause(&mut self) {
        self.is_enabled = false;
    }

    pub fn resume(&mut self) {
        self.is_enabled = true;
    }

    pub fn transform(&self) -> EmitterTransform {
        self.transform
    }

    /// Host-provided world transform, read by the next step
    pub fn set_transform(&mut self, transform: EmitterTransform) {
        self.transform = transform;
    }

    pub fn set_on_update<F>(&mut self, callback: F)
    where
        F: FnMut(&UpdateEvent) + Send + 'static,
    {
        self.on_update = Some(Box::new(callback));
    }

    pub fn set_on_complete<F>(&mut self, callback: F)
    where
        F: FnMut(&CompleteEvent) + Send + 'static,
    {
        self.on_complete = Some(Box::new(callback));
    }

    pub fn burst_states(&self) -> impl Iterator<Item = &BurstState> + '_ {
        self.emission.burst_states()
    }

    pub fn attributes(&self) -> AttributeView<'_> {
        AttributeView::new(&self.pool)
    }

    pub fn uniforms(&self, elapsed: f32) -> ParticleUniforms {
        ParticleUniforms::new(elapsed, &self.config.texture_sheet_animation)
    }

    /// Arrays changed since the last call
    pub fn take_dirty(&mut self) -> DirtyAttributes {
        std::mem::take(&mut self.dirty)
    }

    /// Where the host renders a particle, given the emitter's current transform
    pub fn world_position(&self, index: usize) -> Vec3 {
        self.transform.position + self.transform.rotation * self.pool.position[index]
    }

    /// Texture-sheet tile a particle currently shows
    pub fn frame_index(&self, index: usize) -> u32 {
        let animation = &self.config.texture_sheet_animation;
        let tile_count = (animation.tiles.x * animation.tiles.y).max(1);
        let age = self.pool.lifetime[index];

        let frame = match animation.time_mode {
            TimeMode::Lifetime => {
                let start_lifetime = self.pool.start_lifetime[index];
                let percent = if start_lifetime > 0.0 {
                    age / start_lifetime
                } else {
                    0.0
                };
                (percent * tile_count as f32).floor()
            }
            TimeMode::Fps => (age / MS_PER_SECOND as f32 * animation.fps).floor(),
        };

        (frame.max(0.0) as u32 + self.pool.start_frame[index].max(0.0) as u32) % tile_count
    }

    /// Release everything this system registered in `cache`
    pub fn dispose(self, cache: &mut CurveCache) {
        let evicted = cache.release(self.id);
        log::debug!(
            "[ParticleSystem] Disposed {} ({} curves evicted)",
            self.id,
            evicted
        );
    }

    /// Advance the simulation to `cycle.now`
    pub fn step(&mut self, cycle: &FrameCycle) {
        let now = cycle.now;
        let dt = cycle.delta;

        self.lifetime = now - self.creation_time;
        let duration_ms = self.config.duration as f64 * MS_PER_SECOND;
        let normalized_loop_time = if duration_ms > 0.0 {
            self.lifetime.rem_euclid(duration_ms)
        } else {
            0.0
        };
        let loop_progress = if duration_ms > 0.0 {
            (normalized_loop_time / duration_ms).clamp(0.0, 1.0)
        } else {
            0.0
        };
        let loop_index = if duration_ms > 0.0 {
            (self.lifetime / duration_ms).floor().max(0.0) as u64
        } else {
            0
        };
        self.emission.advance_loop(loop_index, self.config.looping);

        let (displacement, reframe) = self.track_transform();
        let local_displacement = self.transform.rotation.inverse() * displacement;

        let (updated, deactivated) = self.update_particles(now, dt, local_displacement, reframe);

        let mut frame_dirty = DirtyAttributes::default();
        if updated > 0 {
            frame_dirty.merge(DirtyAttributes::aged());
            frame_dirty.merge(self.modifiers.touched_attributes());
        }
        if deactivated > 0 {
            frame_dirty.merge(DirtyAttributes::deactivated());
        }

        let mut spawned = 0;
        let mut dropped = 0;
        let running = self.config.looping || self.lifetime < duration_ms;

        if self.is_enabled && running {
            if self.lifetime >= self.config.start_delay as f64 * MS_PER_SECOND {
                let input = EmissionInput {
                    now,
                    last_emission_time: self.last_emission_time,
                    distance_accumulator: self.distance_from_last_emit,
                    displacement: local_displacement,
                    normalized_loop_time,
                    loop_progress,
                    loop_index,
                    looping: self.config.looping,
                };
                (spawned, dropped) = self.emit(&input);
            } else {
                self.last_emission_time = now;
                self.distance_from_last_emit = 0.0;
            }

            if spawned > 0 {
                frame_dirty.merge(DirtyAttributes::spawned());
            }

            let event = UpdateEvent {
                delta: dt,
                elapsed: cycle.elapsed,
                lifetime: self.lifetime,
                iteration_count: loop_index as u32 + 1,
                active_particles: self.pool.active_count(),
            };
            if let Some(callback) = self.on_update.as_mut() {
                callback(&event);
            }
        } else {
            self.last_emission_time = now;
            self.distance_from_last_emit = 0.0;
            let event = CompleteEvent {
                lifetime: self.lifetime,
            };
            if let Some(callback) = self.on_complete.as_mut() {
                callback(&event);
            }
        }

        self.dirty.merge(frame_dirty);
        self.stats = ParticleStats {
            active_particles: self.pool.active_count(),
            spawned_last_frame: spawned,
            dropped_last_frame: dropped,
            deactivated_last_frame: deactivated,
            capacity_used: self.pool.active_count() as f32 / self.pool.capacity() as f32,
        };
    }

    /// Emitter displacement since the previous step, plus the rotation that
    /// maps last step's local frame onto the current one. Also keeps gravity
    /// in the local frame.
    fn track_transform(&mut self) -> (Vec3, Quat) {
        let current = self.transform;
        let displacement = match self.last_world_position {
            Some(last) => current.position - last,
            None => Vec3::ZERO,
        };
        self.distance_from_last_emit += displacement.length();

        let mut reframe = Quat::IDENTITY;
        if self.last_world_rotation != Some(current.rotation) {
            self.gravity_local = current.rotation.inverse() * Vec3::new(0.0, self.config.gravity, 0.0);
            if let Some(last) = self.last_world_rotation {
                reframe = (current.rotation.inverse() * last).normalize();
            }
        }

        self.last_world_position = Some(current.position);
        self.last_world_rotation = Some(current.rotation);
        (displacement, reframe)
    }

    /// Age, retire and move living particles. Returns (updated, deactivated).
    ///
    /// World space particles are carried against the emitter's motion: the
    /// frame change `reframe` is applied to their position, velocity and
    /// orbit offset, and the local displacement is subtracted, so their world
    /// placement is unaffected by the emitter moving or turning.
    fn update_particles(&mut self, now: f64, dt: f32, local_displacement: Vec3, reframe: Quat) -> (usize, usize) {
        let world_space = self.config.simulation_space == SimulationSpace::World;
        let rotated = world_space && reframe != Quat::IDENTITY;
        let gravity = self.gravity_local;
        let mut updated = 0;
        let mut deactivated = 0;

        for index in 0..self.pool.capacity() {
            if !self.pool.is_active[index] {
                continue;
            }

            let age = now - self.pool.creation_time[index];
            let start_lifetime = self.pool.start_lifetime[index] as f64;
            if age > start_lifetime {
                self.pool.deactivate(index);
                deactivated += 1;
                continue;
            }

            if rotated {
                self.pool.position[index] = reframe * self.pool.position[index];
                self.pool.velocity[index] = reframe * self.pool.velocity[index];
                if let Some(orbital) = self.pool.orbital_velocity.as_mut() {
                    orbital.position_offset[index] = reframe * orbital.position_offset[index];
                }
            }

            self.pool.velocity[index] -= gravity * dt;
            if world_space {
                self.pool.position[index] -= local_displacement;
            }
            let velocity = self.pool.velocity[index];
            self.pool.position[index] += velocity * dt;
            self.pool.lifetime[index] = age as f32;

            let lifetime_percent = if start_lifetime > 0.0 {
                age / start_lifetime
            } else {
                0.0
            };
            self.modifiers
                .apply(&mut self.pool, index, dt, lifetime_percent, false);
            updated += 1;
        }

        (updated, deactivated)
    }

    /// Run the scheduler and fill free slots. Returns (spawned, dropped).
    fn emit(&mut self, input: &EmissionInput) -> (usize, usize) {
        let tick = self.emission.tick(input, &mut self.rng);
        self.last_emission_time += tick.time_consumed_ms;
        if tick.distance_consumed {
            self.distance_from_last_emit = 0.0;
        }

        let requested = tick.total();
        if requested == 0 {
            return (0, 0);
        }

        let mut ctx = SpawnContext {
            template: &self.template,
            modifiers: &self.modifiers,
            loop_progress: input.loop_progress,
            rng: &mut self.rng,
        };

        let mut spawned = 0;
        let mut cursor = 0;
        for spawn in 0..requested {
            let Some(index) = self.pool.first_inactive(cursor) else {
                break;
            };
            self.pool
                .activate(index, input.now, tick.spawn_offset(spawn), &mut ctx);
            cursor = index + 1;
            spawned += 1;
        }

        let dropped = requested - spawned;
        if dropped > 0 && !self.drop_warned {
            log::warn!(
                "[ParticleSystem] {} is full ({} slots), dropping {} spawn requests",
                self.id,
                self.pool.capacity(),
                dropped
            );
            self.drop_warned = true;
        }

        (spawned, dropped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::particles::config::BurstConfig;
    use crate::particles::curve::BezierPoints;
    use crate::particles::error::ParticleError;
    use crate::particles::shape::{EmitterShape, SphereShape};
    use crate::particles::value::ValueExpression;
    use glam::UVec2;
    use std::sync::{Arc, Mutex};

    fn point_config() -> ParticleSystemConfig {
        ParticleSystemConfig {
            shape: EmitterShape::Sphere(SphereShape {
                radius: 0.0,
                radius_thickness: 1.0,
                arc: 360.0,
            }),
            start_speed: ValueExpression::constant(0.0),
            seed: Some(42),
            ..ParticleSystemConfig::default()
        }
    }

    fn frame(now: f64, delta: f32) -> FrameCycle {
        FrameCycle {
            now,
            delta,
            elapsed: (now / MS_PER_SECOND) as f32,
        }
    }

    /// Step from `from` to `to` milliseconds in `step` increments
    fn run(system: &mut ParticleSystem, from: f64, to: f64, step: f64) {
        let mut now = from;
        while now < to {
            now += step;
            system.step(&frame(now, (step / MS_PER_SECOND) as f32));
        }
    }

    #[test]
    fn test_system_ids_are_unique() {
        let a = SystemId::next();
        let b = SystemId::next();
        assert_ne!(a, b);
        assert!(a.to_string().starts_with("system#"));
    }

    #[test]
    fn test_invalid_config_rejected() {
        let mut cache = CurveCache::new();
        let config = ParticleSystemConfig {
            max_particles: 0,
            ..ParticleSystemConfig::default()
        };
        assert!(matches!(
            ParticleSystem::new(config, 0.0, &mut cache),
            Err(ParticleError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_failed_creation_releases_curves() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.start_size = ValueExpression::bezier(BezierPoints::flat(2.0), 1.0);
        config.size_over_lifetime.is_active = true;
        config.size_over_lifetime.lifetime_curve = ValueExpression::bezier(BezierPoints::new(Vec::new()), 1.0);

        assert!(matches!(
            ParticleSystem::new(config, 0.0, &mut cache),
            Err(ParticleError::EmptyBezierCurve)
        ));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_time_emission_over_one_second() {
        let mut cache = CurveCache::new();
        let mut system = ParticleSystem::new(point_config(), 0.0, &mut cache).unwrap();

        run(&mut system, 0.0, 1000.0, 1000.0 / 60.0);
        let active = system.active_particles();
        assert!((9..=11).contains(&active), "spawned {}", active);
    }

    #[test]
    fn test_particles_expire_after_start_lifetime() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.start_lifetime = ValueExpression::constant(0.5);
        config.emission.rate_over_time = ValueExpression::constant(0.0);
        config.emission.bursts = vec![BurstConfig {
            count: ValueExpression::constant(3.0),
            ..BurstConfig::default()
        }];
        let mut system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();

        system.step(&frame(0.0, 0.0));
        assert_eq!(system.active_particles(), 3);

        system.step(&frame(400.0, 0.4));
        assert_eq!(system.active_particles(), 3);
        assert_eq!(system.pool().lifetime[0], 400.0);

        system.step(&frame(600.0, 0.2));
        assert_eq!(system.active_particles(), 0);
        assert_eq!(system.stats().deactivated_last_frame, 3);
        assert!(system.pool().color.iter().all(|color| color.w == 0.0));
    }

    #[test]
    fn test_pause_stops_emission_but_particles_age() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.start_speed = ValueExpression::constant(1.0);
        config.shape = EmitterShape::Sphere(SphereShape {
            radius: 1.0,
            radius_thickness: 0.0,
            arc: 360.0,
        });
        let mut system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();

        run(&mut system, 0.0, 500.0, 100.0);
        let active = system.active_particles();
        assert!(active > 0);
        let before = system.pool().position[0];

        system.pause();
        run(&mut system, 500.0, 1000.0, 100.0);
        assert_eq!(system.active_particles(), active);
        assert_ne!(system.pool().position[0], before);

        // Time spent paused does not turn into a backlog of spawns
        system.resume();
        system.step(&frame(1100.0, 0.1));
        assert!(system.stats().spawned_last_frame <= 1);
    }

    #[test]
    fn test_distance_travelled_while_paused_is_not_emitted() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.emission.rate_over_time = ValueExpression::constant(0.0);
        config.emission.rate_over_distance = ValueExpression::constant(1.0);
        let mut system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();
        system.step(&frame(0.0, 0.0));

        system.pause();
        for step in 1..=10 {
            system.set_transform(EmitterTransform {
                position: Vec3::new(step as f32 * 10.0, 0.0, 0.0),
                rotation: Quat::IDENTITY,
            });
            system.step(&frame(step as f64 * 100.0, 0.1));
        }
        assert_eq!(system.active_particles(), 0);

        system.resume();
        system.set_transform(EmitterTransform {
            position: Vec3::new(100.5, 0.0, 0.0),
            rotation: Quat::IDENTITY,
        });
        system.step(&frame(1100.0, 0.1));
        assert_eq!(system.stats().spawned_last_frame, 0);

        system.set_transform(EmitterTransform {
            position: Vec3::new(101.5, 0.0, 0.0),
            rotation: Quat::IDENTITY,
        });
        system.step(&frame(1200.0, 0.1));
        assert_eq!(system.stats().spawned_last_frame, 1);
    }

    #[test]
    fn test_burst_rearms_when_loop_wraps_during_pause() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.duration = 5.0;
        config.start_lifetime = ValueExpression::constant(100.0);
        config.emission.rate_over_time = ValueExpression::constant(0.0);
        config.emission.bursts = vec![BurstConfig {
            count: ValueExpression::constant(5.0),
            ..BurstConfig::default()
        }];
        let mut system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();

        system.step(&frame(0.0, 0.0));
        assert_eq!(system.stats().spawned_last_frame, 5);
        system.step(&frame(4900.0, 0.1));
        assert_eq!(system.stats().spawned_last_frame, 0);

        system.pause();
        system.step(&frame(7000.0, 0.1));
        system.resume();

        // Later in the second loop than the pause point in the first
        system.step(&frame(9950.0, 0.1));
        assert_eq!(system.stats().spawned_last_frame, 5);
        assert_eq!(system.active_particles(), 10);
    }

    #[test]
    fn test_huge_burst_is_dropped_without_overflow() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.max_particles = 4;
        config.emission.rate_over_time = ValueExpression::constant(0.0);
        config.emission.bursts = vec![BurstConfig {
            count: ValueExpression::constant(1e30),
            ..BurstConfig::default()
        }];
        let mut system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();

        system.step(&frame(0.0, 0.0));
        assert_eq!(system.stats().spawned_last_frame, 4);
        assert_eq!(system.stats().dropped_last_frame, usize::MAX - 4);
    }

    #[test]
    fn test_start_delay_holds_back_emission() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.start_delay = 1.0;
        let mut system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();

        run(&mut system, 0.0, 900.0, 100.0);
        assert_eq!(system.active_particles(), 0);

        run(&mut system, 900.0, 1500.0, 100.0);
        assert!(system.active_particles() >= 4);
    }

    #[test]
    fn test_non_looping_system_completes() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.duration = 1.0;
        config.looping = false;
        let mut system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();

        let updates = Arc::new(Mutex::new(Vec::new()));
        let completions = Arc::new(Mutex::new(0));
        {
            let updates = Arc::clone(&updates);
            system.set_on_update(move |event| updates.lock().unwrap().push(*event));
            let completions = Arc::clone(&completions);
            system.set_on_complete(move |_| *completions.lock().unwrap() += 1);
        }

        run(&mut system, 0.0, 1000.0, 250.0);
        let spawned = system.active_particles();
        run(&mut system, 1000.0, 1500.0, 250.0);

        assert_eq!(updates.lock().unwrap().len(), 3);
        assert_eq!(*completions.lock().unwrap(), 3);
        assert_eq!(system.active_particles(), spawned);
        assert!(updates.lock().unwrap().iter().all(|event| event.iteration_count == 1));
    }

    #[test]
    fn test_iteration_count_advances_with_loops() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.duration = 1.0;
        let mut system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();

        let last = Arc::new(Mutex::new(None));
        {
            let last = Arc::clone(&last);
            system.set_on_update(move |event| *last.lock().unwrap() = Some(*event));
        }

        system.step(&frame(2500.0, 0.016));
        let event = last.lock().unwrap().unwrap();
        assert_eq!(event.iteration_count, 3);
        assert_eq!(event.lifetime, 2500.0);
    }

    #[test]
    fn test_gravity_follows_emitter_rotation() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.gravity = 10.0;
        config.emission.rate_over_time = ValueExpression::constant(0.0);
        config.emission.bursts = vec![BurstConfig::default()];
        let mut system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();

        system.step(&frame(0.0, 0.0));
        system.step(&frame(100.0, 0.1));
        assert!((system.pool().velocity[0] - Vec3::new(0.0, -1.0, 0.0)).length() < 1e-5);

        // Upside down, world down is local up
        system.set_transform(EmitterTransform {
            position: Vec3::ZERO,
            rotation: Quat::from_rotation_x(std::f32::consts::PI),
        });
        system.step(&frame(200.0, 0.1));
        assert!(system.pool().velocity[0].y.abs() < 1e-4);
    }

    #[test]
    fn test_world_space_particles_stay_behind() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.simulation_space = SimulationSpace::World;
        config.emission.rate_over_time = ValueExpression::constant(0.0);
        config.emission.bursts = vec![BurstConfig::default()];
        let mut system = ParticleSystem::new(config.clone(), 0.0, &mut cache).unwrap();

        system.step(&frame(0.0, 0.0));
        system.set_transform(EmitterTransform {
            position: Vec3::new(5.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
        });
        system.step(&frame(100.0, 0.1));
        assert!((system.pool().position[0] - Vec3::new(-5.0, 0.0, 0.0)).length() < 1e-5);

        // Local space particles move with the emitter
        config.simulation_space = SimulationSpace::Local;
        let mut local = ParticleSystem::new(config, 0.0, &mut cache).unwrap();
        local.step(&frame(0.0, 0.0));
        local.set_transform(EmitterTransform {
            position: Vec3::new(5.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
        });
        local.step(&frame(100.0, 0.1));
        assert_eq!(local.pool().position[0], Vec3::ZERO);
    }

    #[test]
    fn test_world_space_particles_ignore_emitter_rotation() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.simulation_space = SimulationSpace::World;
        config.start_speed = ValueExpression::constant(1.0);
        config.shape = EmitterShape::Sphere(SphereShape {
            radius: 1.0,
            radius_thickness: 0.0,
            arc: 360.0,
        });
        config.emission.rate_over_time = ValueExpression::constant(0.0);
        config.emission.bursts = vec![BurstConfig::default()];
        let mut system = ParticleSystem::new(config.clone(), 0.0, &mut cache).unwrap();

        system.step(&frame(0.0, 0.0));
        let before = system.world_position(0);
        let world_velocity = system.pool().velocity[0];

        let quarter_turn = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        system.set_transform(EmitterTransform {
            position: Vec3::ZERO,
            rotation: quarter_turn,
        });
        system.step(&frame(16.0, 0.0));
        assert!((system.world_position(0) - before).length() < 1e-5);
        assert!((quarter_turn * system.pool().velocity[0] - world_velocity).length() < 1e-5);

        // Keeps moving along its original world direction
        system.step(&frame(116.0, 0.1));
        let expected = before + world_velocity * 0.1;
        assert!((system.world_position(0) - expected).length() < 1e-5);

        // Local space particles turn with the emitter
        config.simulation_space = SimulationSpace::Local;
        let mut local = ParticleSystem::new(config, 0.0, &mut cache).unwrap();
        local.step(&frame(0.0, 0.0));
        let before = local.world_position(0);
        local.set_transform(EmitterTransform {
            position: Vec3::ZERO,
            rotation: quarter_turn,
        });
        local.step(&frame(16.0, 0.0));
        assert!((local.world_position(0) - quarter_turn * before).length() < 1e-5);
    }

    #[test]
    fn test_distance_emission_along_path() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.emission.rate_over_time = ValueExpression::constant(0.0);
        config.emission.rate_over_distance = ValueExpression::constant(1.0);
        let mut system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();

        system.step(&frame(0.0, 0.0));
        system.set_transform(EmitterTransform {
            position: Vec3::new(4.0, 0.0, 0.0),
            rotation: Quat::IDENTITY,
        });
        system.step(&frame(16.0, 0.016));

        assert_eq!(system.active_particles(), 4);
        let mut xs: Vec<f32> = system.pool().position[..4].iter().map(|p| p.x).collect();
        xs.sort_by(|a, b| a.total_cmp(b));
        for (x, expected) in xs.iter().zip([-3.0, -2.0, -1.0, 0.0]) {
            assert!((x - expected).abs() < 1e-4);
        }
    }

    #[test]
    fn test_frame_index() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.texture_sheet_animation.tiles = UVec2::new(2, 2);
        config.emission.rate_over_time = ValueExpression::constant(0.0);
        config.emission.bursts = vec![BurstConfig::default()];
        config.start_lifetime = ValueExpression::constant(1.0);
        let mut system = ParticleSystem::new(config.clone(), 0.0, &mut cache).unwrap();

        system.step(&frame(0.0, 0.0));
        assert_eq!(system.frame_index(0), 0);
        system.step(&frame(600.0, 0.6));
        assert_eq!(system.frame_index(0), 2);

        config.texture_sheet_animation.time_mode = TimeMode::Fps;
        config.texture_sheet_animation.fps = 10.0;
        config.texture_sheet_animation.start_frame = ValueExpression::constant(1.0);
        let mut fps = ParticleSystem::new(config, 0.0, &mut cache).unwrap();
        fps.step(&frame(0.0, 0.0));
        fps.step(&frame(250.0, 0.25));
        // floor(0.25 * 10) + 1 wrapped into 4 tiles
        assert_eq!(fps.frame_index(0), 3);
        assert_eq!(fps.uniforms(0.25).use_fps_for_frame_index, 1);
    }

    #[test]
    fn test_dirty_flags_are_consumed() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.emission.rate_over_time = ValueExpression::constant(0.0);
        config.emission.bursts = vec![BurstConfig::default()];
        let mut system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();

        assert_eq!(system.take_dirty(), DirtyAttributes::all());
        assert!(!system.take_dirty().any());

        system.step(&frame(0.0, 0.0));
        assert!(system.take_dirty().is_active);

        system.step(&frame(16.0, 0.016));
        let dirty = system.take_dirty();
        assert!(dirty.position && dirty.lifetime);
        assert!(!dirty.size && !dirty.is_active);
    }

    #[test]
    fn test_seeded_systems_are_reproducible() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.start_size = ValueExpression::random(0.5, 2.0);
        config.start_speed = ValueExpression::random(1.0, 3.0);

        let mut a = ParticleSystem::new(config.clone(), 0.0, &mut cache).unwrap();
        let mut b = ParticleSystem::new(config, 0.0, &mut cache).unwrap();
        run(&mut a, 0.0, 500.0, 50.0);
        run(&mut b, 0.0, 500.0, 50.0);

        assert_eq!(a.attributes().size, b.attributes().size);
        assert_eq!(a.attributes().position, b.attributes().position);
    }

    #[test]
    fn test_dispose_releases_curves() {
        let mut cache = CurveCache::new();
        let mut config = point_config();
        config.size_over_lifetime.is_active = true;
        config.size_over_lifetime.lifetime_curve = ValueExpression::bezier(BezierPoints::flat(0.5), 1.0);

        let system = ParticleSystem::new(config, 0.0, &mut cache).unwrap();
        assert_eq!(cache.len(), 1);
        system.dispose(&mut cache);
        assert!(cache.is_empty());
    }
}
