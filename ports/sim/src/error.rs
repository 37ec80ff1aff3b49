use std::io;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SimError {
    #[error("invalid simulation config: {0}")]
    InvalidConfig(&'static str),
    #[error("cannot spawn task thread: {0}")]
    Spawn(#[from] io::Error),
}
