use thiserror::Error;

use crate::flashing::FlashError;
use crate::probe::ProbeError;

/// The toplevel error of this crate.
#[derive(Error, Debug)]
pub enum Error {
    /// An error with the probe link occurred.
    #[error("probe interaction failed")]
    Probe(#[from] ProbeError),
    /// An error during the flashing procedure occurred.
    #[error("flash programming failed")]
    Flash(#[from] FlashError),
    /// Any other error.
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}
