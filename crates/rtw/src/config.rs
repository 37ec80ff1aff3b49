//! Sizing of the shared [`crate::Rtos`] context.

/// Configuration for an [`crate::Rtos`] instance.
///
/// The arena is sized once here and never grows; every control block, stack
/// and queue storage area is carved out of it.
#[derive(Debug, Clone)]
pub struct RtosConfig {
    pub name: &'static str,
    /// Bytes available in the static arena.
    pub arena_size: usize,
    /// Bytes reserved for each task or queue control block.
    pub control_block_size: usize,
    /// Alignment every region is rounded up to. Must be a power of two.
    pub region_align: usize,
}

impl Default for RtosConfig {
    fn default() -> Self {
        Self {
            name: "RTW",
            arena_size: 24 * 1024,
            control_block_size: 96,
            region_align: 8,
        }
    }
}

impl RtosConfig {
    /// Creates a new configuration builder.
    pub fn builder() -> RtosConfigBuilder {
        RtosConfigBuilder::default()
    }
}

/// Builder for [`RtosConfig`].
#[derive(Debug, Clone, Default)]
pub struct RtosConfigBuilder {
    config: RtosConfig,
}

impl RtosConfigBuilder {
    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = name;
        self
    }

    /// Sets the total arena capacity in bytes.
    pub fn arena_size(mut self, bytes: usize) -> Self {
        self.config.arena_size = bytes;
        self
    }

    pub fn control_block_size(mut self, bytes: usize) -> Self {
        self.config.control_block_size = bytes;
        self
    }

    /// Sets region alignment; non power-of-two values are rounded up.
    pub fn region_align(mut self, align: usize) -> Self {
        self.config.region_align = align.max(1).next_power_of_two();
        self
    }

    pub fn build(self) -> RtosConfig {
        self.config
    }
}
