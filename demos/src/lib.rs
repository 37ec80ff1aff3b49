//! Shared setup for the demo binaries.

use std::sync::Arc;

use rtw::{Rtos, RtosConfig};
use rtw_port_sim::{SimConfig, SimPort};

/// Installs the logger; `RUST_LOG` overrides the default `info` level.
pub fn init_logging() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();
}

/// A simulated kernel plus the context every demo builds its objects from.
pub fn simulated(name: &'static str, sim: SimConfig) -> anyhow::Result<Arc<Rtos<SimPort>>> {
    let port = SimPort::new(sim)?;
    let config = RtosConfig::builder().name(name).build();
    Ok(Rtos::builder(port).config(config).build())
}
