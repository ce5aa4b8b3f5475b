use rayon::prelude::*;
use rustc_hash::FxHashMap;

use crate::particles::config::ParticleSystemConfig;
use crate::particles::curve::CurveCache;
use crate::particles::error::{ParticleError, Result};
use crate::particles::system::{FrameCycle, ParticleSystem, SystemId};

/// Owns a set of particle systems and the curve cache they share
#[derive(Default)]
pub struct ParticleWorld {
    systems: FxHashMap<SystemId, ParticleSystem>,
    curves: CurveCache,
}

impl ParticleWorld {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create and register a system, returning its id
    pub fn create_system(&mut self, config: ParticleSystemConfig, now: f64) -> Result<SystemId> {
        let system = ParticleSystem::new(config, now, &mut self.curves)?;
        let id = system.id();
        self.systems.insert(id, system);
        log::info!("[ParticleWorld] Added {} ({} systems)", id, self.systems.len());
        Ok(id)
    }

    pub fn get(&self, id: SystemId) -> Option<&ParticleSystem> {
        self.systems.get(&id)
    }

    pub fn get_mut(&mut self, id: SystemId) -> Option<&mut ParticleSystem> {
        self.systems.get_mut(&id)
    }

    pub fn pause(&mut self, id: SystemId) -> Result<()> {
        self.system_mut(id)?.pause();
        Ok(())
    }

    pub fn resume(&mut self, id: SystemId) -> Result<()> {
        self.system_mut(id)?.resume();
        Ok(())
    }

    /// Remove a system immediately and release its curves
    pub fn dispose(&mut self, id: SystemId) -> Result<()> {
        let system = self.systems.remove(&id).ok_or(ParticleError::UnknownSystem(id))?;
        system.dispose(&mut self.curves);
        Ok(())
    }

    /// Step every system on the calling thread
    pub fn update(&mut self, cycle: &FrameCycle) {
        for system in self.systems.values_mut() {
            system.step(cycle);
        }
    }

    /// Step systems concurrently; they share no mutable state while stepping
    pub fn update_parallel(&mut self, cycle: &FrameCycle) {
        self.systems
            .par_iter_mut()
            .for_each(|(_, system)| system.step(cycle));
    }

    pub fn len(&self) -> usize {
        self.systems.len()
    }

    pub fn is_empty(&self) -> bool {
        self.systems.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = SystemId> + '_ {
        self.systems.keys().copied()
    }

    pub fn total_active_particles(&self) -> usize {
        self.systems.values().map(ParticleSystem::active_particles).sum()
    }

    pub fn curves(&self) -> &CurveCache {
        &self.curves
    }

    fn system_mut(&mut self, id: SystemId) -> Result<&mut ParticleSystem> {
        self.systems.get_mut(&id).ok_or(ParticleError::UnknownSystem(id))
    }
}
