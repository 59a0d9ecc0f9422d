use std::io;

use natt_core::error::{DirectoryError, DiscoveryError, ResolutionError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("discovery: {0}")]
    Discovery(#[from] DiscoveryError),
    #[error("directory: {0}")]
    Directory(#[from] DirectoryError),
    #[error("resolution: {0}")]
    Resolution(#[from] ResolutionError),
    #[error("dial {target}: {source}")]
    Dial { target: String, source: io::Error },
    #[error("public address echo: {0}")]
    Echo(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
