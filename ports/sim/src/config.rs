//! Simulation parameters.

use crate::error::SimError;

#[derive(Debug, Clone)]
pub struct SimConfig {
    /// Virtual ticks per second.
    pub tick_rate_hz: u32,
    /// Tasks that may exist at once; further creations are refused.
    pub max_tasks: usize,
    /// Stacks smaller than this are refused at creation.
    pub min_stack_size: usize,
    /// Host stack reserved for each task thread.
    pub host_stack_size: usize,
    /// Wall-clock reading at tick zero, in milliseconds since the epoch.
    pub epoch_ms: u64,
}

impl Default for SimConfig {
    fn default() -> Self {
        Self {
            tick_rate_hz: 1000,
            max_tasks: 32,
            min_stack_size: 64,
            host_stack_size: 256 * 1024,
            epoch_ms: 0,
        }
    }
}

impl SimConfig {
    pub fn builder() -> SimConfigBuilder {
        SimConfigBuilder::default()
    }

    pub(crate) fn validate(&self) -> Result<(), SimError> {
        if self.tick_rate_hz == 0 {
            return Err(SimError::InvalidConfig("tick rate must be non-zero"));
        }
        if self.max_tasks == 0 {
            return Err(SimError::InvalidConfig("at least one task must be allowed"));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct SimConfigBuilder {
    config: SimConfig,
}

impl SimConfigBuilder {
    pub fn tick_rate_hz(mut self, hz: u32) -> Self {
        self.config.tick_rate_hz = hz;
        self
    }

    pub fn max_tasks(mut self, max: usize) -> Self {
        self.config.max_tasks = max;
        self
    }

    pub fn min_stack_size(mut self, bytes: usize) -> Self {
        self.config.min_stack_size = bytes;
        self
    }

    pub fn host_stack_size(mut self, bytes: usize) -> Self {
        self.config.host_stack_size = bytes;
        self
    }

    pub fn epoch_ms(mut self, ms: u64) -> Self {
        self.config.epoch_ms = ms;
        self
    }

    pub fn build(self) -> SimConfig {
        self.config
    }
}
