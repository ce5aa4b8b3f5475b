// Particle system integration scenarios
//
// Drive whole systems through a world the way a host render loop would and
// check the observable results: spawn counts, burst cycles, pool limits and
// attribute stability.

use earth_particles::particles::{
    BezierPoints, BurstConfig, ColorRange, Easing, EmissionConfig, EmitterShape, FrameCycle, ParticleSystemConfig,
    ParticleWorld, Rgb, SphereShape, ValueExpression,
};
use glam::Vec4;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

fn frame(now: f64, delta_ms: f64) -> FrameCycle {
    FrameCycle {
        now,
        delta: (delta_ms / 1000.0) as f32,
        elapsed: (now / 1000.0) as f32,
    }
}

fn quiet_config() -> ParticleSystemConfig {
    ParticleSystemConfig {
        seed: Some(1234),
        emission: EmissionConfig {
            rate_over_time: ValueExpression::constant(0.0),
            ..Default::default()
        },
        ..ParticleSystemConfig::default()
    }
}

#[test]
fn test_rate_over_time_spawns_ten_per_second() {
    init_logging();
    let mut world = ParticleWorld::new();
    let config = ParticleSystemConfig {
        seed: Some(7),
        emission: EmissionConfig {
            rate_over_time: ValueExpression::constant(10.0),
            ..Default::default()
        },
        ..ParticleSystemConfig::default()
    };
    let id = world.create_system(config, 0.0).unwrap();

    // Uneven frame times summing to exactly one second
    let deltas = [16.0, 17.0, 33.0, 50.0, 9.0, 75.0, 100.0, 200.0, 125.0, 41.0, 59.0, 175.0, 100.0];
    assert_eq!(deltas.iter().sum::<f64>(), 1000.0);

    let mut now = 0.0;
    let mut spawned = 0;
    for delta in deltas {
        now += delta;
        world.update(&frame(now, delta));
        spawned += world.get(id).unwrap().stats().spawned_last_frame;
    }

    assert!((9..=11).contains(&spawned), "expected about 10 spawns, got {}", spawned);
    assert_eq!(world.get(id).unwrap().active_particles(), spawned);
}

#[test]
fn test_burst_cycles_and_reset_on_loop() {
    init_logging();
    let mut world = ParticleWorld::new();
    let mut config = quiet_config();
    config.duration = 5.0;
    config.looping = true;
    config.start_lifetime = ValueExpression::constant(10.0);
    config.emission.bursts = vec![BurstConfig {
        time: 0.0,
        cycles: 3,
        interval: 1.0,
        probability: 1.0,
        count: ValueExpression::constant(5.0),
    }];
    let id = world.create_system(config, 0.0).unwrap();

    for now in [0.0, 1000.0, 2000.0] {
        world.update(&frame(now, 1000.0));
    }
    assert_eq!(world.get(id).unwrap().active_particles(), 15);

    // Rest of the first loop adds nothing
    for now in [3000.0, 4000.0, 4900.0] {
        world.update(&frame(now, 1000.0));
    }
    assert_eq!(world.get(id).unwrap().active_particles(), 15);

    // Second loop starts over
    world.update(&frame(5000.0, 100.0));
    let system = world.get(id).unwrap();
    assert_eq!(system.active_particles(), 20);
    let state = system.burst_states().next().unwrap();
    assert_eq!(state.cycles_executed, 1);
    assert!(state.probability_passed);
}

#[test]
fn test_pool_never_exceeds_max_particles() {
    init_logging();
    let mut world = ParticleWorld::new();
    let mut config = quiet_config();
    config.max_particles = 8;
    config.emission.rate_over_time = ValueExpression::constant(500.0);
    config.emission.bursts = vec![BurstConfig {
        count: ValueExpression::constant(50.0),
        ..BurstConfig::default()
    }];
    let id = world.create_system(config, 0.0).unwrap();

    world.update(&frame(0.0, 0.0));
    let stats = world.get(id).unwrap().stats().clone();
    assert_eq!(stats.active_particles, 8);
    assert_eq!(stats.spawned_last_frame, 8);
    assert_eq!(stats.dropped_last_frame, 42);
    assert_eq!(stats.capacity_used, 1.0);

    for step in 1..=20 {
        world.update(&frame(step as f64 * 16.0, 16.0));
        let system = world.get(id).unwrap();
        assert!(system.active_particles() <= 8);
        let flags = system.attributes().is_active;
        assert_eq!(flags.iter().filter(|active| **active).count(), system.active_particles());
    }
}

#[test]
fn test_inactive_color_curve_leaves_color_untouched() {
    init_logging();
    let mut world = ParticleWorld::new();
    let mut config = quiet_config();
    config.start_color = ColorRange::solid(Rgb::new(1.0, 0.0, 0.0));
    config.start_opacity = ValueExpression::constant(0.7);
    config.start_lifetime = ValueExpression::random(0.5, 1.5);
    config.emission.rate_over_time = ValueExpression::constant(30.0);
    config.color_over_lifetime.is_active = false;
    config.color_over_lifetime.r = ValueExpression::easing(Easing::Linear, 1.0);
    let id = world.create_system(config, 0.0).unwrap();

    let expected = Vec4::new(1.0, 0.0, 0.0, 0.7);
    for step in 1..=120 {
        world.update(&frame(step as f64 * 16.0, 16.0));
        let system = world.get(id).unwrap();
        let pool = system.pool();
        for index in 0..pool.capacity() {
            if pool.is_active[index] {
                assert_eq!(pool.color[index], expected, "particle {} drifted", index);
            }
        }
    }
    assert!(world.total_active_particles() > 0);
}

#[test]
fn test_sphere_shell_spawns_on_radius() {
    let mut world = ParticleWorld::new();
    let mut config = quiet_config();
    config.start_speed = ValueExpression::constant(0.0);
    config.shape = EmitterShape::Sphere(SphereShape {
        radius: 2.0,
        radius_thickness: 0.0,
        arc: 360.0,
    });
    config.emission.bursts = vec![BurstConfig {
        count: ValueExpression::constant(64.0),
        ..BurstConfig::default()
    }];
    let id = world.create_system(config, 0.0).unwrap();

    world.update(&frame(0.0, 0.0));
    let system = world.get(id).unwrap();
    let positions = system.attributes().position;
    for particle in positions.chunks_exact(3).take(64) {
        let length = (particle[0] * particle[0] + particle[1] * particle[1] + particle[2] * particle[2]).sqrt();
        assert!((length - 2.0).abs() < 1e-4, "|position| = {}", length);
    }
}

#[test]
fn test_shared_curves_across_systems() {
    init_logging();
    let mut world = ParticleWorld::new();
    let fade = BezierPoints::flat(0.25);

    let mut config = quiet_config();
    config.opacity_over_lifetime.is_active = true;
    config.opacity_over_lifetime.lifetime_curve = ValueExpression::bezier(fade.clone(), 1.0);

    let ids: Vec<_> = (0..3)
        .map(|_| world.create_system(config.clone(), 0.0).unwrap())
        .collect();
    assert_eq!(world.curves().len(), 1);
    assert_eq!(world.curves().reference_count(fade.id()), 3);

    for id in &ids {
        world.dispose(*id).unwrap();
    }
    assert_eq!(world.curves().reference_count(fade.id()), 0);
    assert!(!world.curves().contains(fade.id()));
}

#[test]
fn test_parallel_world_update() {
    init_logging();
    let mut world = ParticleWorld::new();
    let mut config = quiet_config();
    config.emission.rate_over_time = ValueExpression::constant(20.0);
    config.noise.is_active = true;
    config.noise.octaves = 3;

    for _ in 0..8 {
        world.create_system(config.clone(), 0.0).unwrap();
    }

    for step in 1..=10 {
        world.update_parallel(&frame(step as f64 * 50.0, 50.0));
    }
    assert_eq!(world.total_active_particles(), 8 * 10);
}
