use glam::Vec3;
use rand::Rng;

use crate::particles::config::{BurstConfig, EmissionConfig};
use crate::particles::constants::MS_PER_SECOND;
use crate::particles::curve::CurveCache;
use crate::particles::error::Result;
use crate::particles::system::SystemId;
use crate::particles::value::ResolvedValue;

/// Runtime state of one burst within the current loop
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct BurstState {
    pub cycles_executed: u32,
    /// `now` of the last executed cycle, in milliseconds
    pub last_cycle_time: f64,
    /// Outcome of the probability roll made on the first cycle
    pub probability_passed: bool,
}

struct Burst {
    time_ms: f64,
    interval_ms: f64,
    cycles: u32,
    probability: f64,
    count: ResolvedValue,
    state: BurstState,
}

impl Burst {
    fn resolve(config: &BurstConfig, owner: SystemId, cache: &mut CurveCache) -> Result<Self> {
        Ok(Self {
            time_ms: config.time * MS_PER_SECOND,
            interval_ms: config.interval * MS_PER_SECOND,
            cycles: config.cycles,
            probability: config.probability,
            count: config.count.resolve(owner, cache)?,
            state: BurstState::default(),
        })
    }

    fn next_cycle_time(&self) -> f64 {
        self.time_ms + self.state.cycles_executed as f64 * self.interval_ms
    }
}

/// What the scheduler needs to know about the current frame
#[derive(Debug, Clone, Copy)]
pub struct EmissionInput {
    /// Milliseconds
    pub now: f64,
    /// Milliseconds
    pub last_emission_time: f64,
    /// Emitter travel accumulated since the last distance emission
    pub distance_accumulator: f32,
    /// Emitter displacement during this frame
    pub displacement: Vec3,
    /// Milliseconds into the current loop
    pub normalized_loop_time: f64,
    /// `normalized_loop_time / duration` in `[0, 1]`
    pub loop_progress: f64,
    /// 0-based index of the current loop
    pub loop_index: u64,
    pub looping: bool,
}

/// Spawn requests for one frame
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct EmissionTick {
    pub by_time: usize,
    pub by_distance: usize,
    pub by_burst: usize,
    /// How far `last_emission_time` should advance
    pub time_consumed_ms: f64,
    /// Whether the distance accumulator should reset to zero
    pub distance_consumed: bool,
    displacement: Vec3,
}

impl EmissionTick {
    pub fn total(&self) -> usize {
        self.by_time.saturating_add(self.by_distance).saturating_add(self.by_burst)
    }

    /// Offset from the emitter for the `spawn`-th particle of this frame.
    ///
    /// Distance spawns come first and are spread evenly along the path the
    /// emitter travelled this frame, the last one landing on the emitter.
    pub fn spawn_offset(&self, spawn: usize) -> Vec3 {
        if spawn >= self.by_distance {
            return Vec3::ZERO;
        }
        let step = self.displacement / self.by_distance as f32;
        step * (spawn + 1) as f32 - self.displacement
    }
}

/// Continuous and burst emission of one system
pub struct EmissionState {
    rate_over_time: ResolvedValue,
    rate_over_distance: ResolvedValue,
    bursts: Vec<Burst>,
    loop_index: u64,
}

impl EmissionState {
    pub fn resolve(config: &EmissionConfig, owner: SystemId, cache: &mut CurveCache) -> Result<Self> {
        let bursts = config
            .bursts
            .iter()
            .map(|burst| Burst::resolve(burst, owner, cache))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            rate_over_time: config.rate_over_time.resolve(owner, cache)?,
            rate_over_distance: config.rate_over_distance.resolve(owner, cache)?,
            bursts,
            loop_index: 0,
        })
    }

    /// Record which loop the system is in. Entering a new loop of a looping
    /// system rearms every burst. Called on every step, emitting or not.
    pub fn advance_loop(&mut self, loop_index: u64, looping: bool) {
        if loop_index == self.loop_index {
            return;
        }
        self.loop_index = loop_index;
        if looping {
            for burst in &mut self.bursts {
                burst.state = BurstState::default();
            }
            log::trace!("[Emission] Loop {} started, bursts rearmed", loop_index);
        }
    }

    pub fn burst_states(&self) -> impl Iterator<Item = &BurstState> + '_ {
        self.bursts.iter().map(|burst| &burst.state)
    }

    /// Work out how many particles to spawn this frame
    pub fn tick<R: Rng + ?Sized>(&mut self, input: &EmissionInput, rng: &mut R) -> EmissionTick {
        self.advance_loop(input.loop_index, input.looping);

        let mut tick = EmissionTick {
            displacement: input.displacement,
            ..EmissionTick::default()
        };

        let elapsed = (input.now - input.last_emission_time).max(0.0);
        let rate = self.rate_over_time.evaluate(input.loop_progress, rng);
        if rate > 0.0 {
            tick.by_time = (rate * elapsed / MS_PER_SECOND).floor() as usize;
            tick.time_consumed_ms = tick.by_time as f64 * MS_PER_SECOND / rate;
        } else {
            tick.time_consumed_ms = elapsed;
        }

        let distance_rate = self.rate_over_distance.evaluate(input.loop_progress, rng);
        if distance_rate > 0.0 {
            let units = input.distance_accumulator as f64 / (1.0 / distance_rate);
            tick.by_distance = units.floor() as usize;
            tick.distance_consumed = tick.by_distance >= 1;
        }

        tick.by_burst = self.tick_bursts(input, rng);

        log::trace!(
            "[Emission] time={} distance={} burst={}",
            tick.by_time,
            tick.by_distance,
            tick.by_burst
        );
        tick
    }

    fn tick_bursts<R: Rng + ?Sized>(&mut self, input: &EmissionInput, rng: &mut R) -> usize {
        let normalized = input.normalized_loop_time;
        let mut spawned: usize = 0;

        for burst in &mut self.bursts {
            if burst.state.cycles_executed >= burst.cycles || normalized < burst.next_cycle_time() {
                continue;
            }

            if burst.state.cycles_executed == 0 {
                burst.state.probability_passed = rng.gen::<f64>() < burst.probability;
            }
            if burst.state.probability_passed {
                let count = burst.count.evaluate(input.loop_progress, rng).floor().max(0.0) as usize;
                log::debug!(
                    "[Emission] Burst cycle {}/{} emitting {} particles",
                    burst.state.cycles_executed + 1,
                    burst.cycles,
                    count
                );
                spawned = spawned.saturating_add(count);
            }
            burst.state.cycles_executed += 1;
            burst.state.last_cycle_time = input.now;
        }

        spawned
    }
}
