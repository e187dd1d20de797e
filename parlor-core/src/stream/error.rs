use thiserror::Error;

use crate::probe::ProbeError;

use super::process::ProcessError;
use super::store::StoreError;

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("unknown media item: {0}")]
    UnknownMedia(String),
    #[error("unknown session: {0}")]
    SessionNotFound(String),
    #[error("unknown quality variant: {0}")]
    VariantNotFound(String),
    #[error("maximum concurrent transcodes reached ({0})")]
    MaxConcurrentTranscodes(usize),
    #[error("initialization segment not available for this container")]
    InitSegmentUnavailable,
    #[error("probe failed: {0}")]
    Probe(#[from] ProbeError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Process(#[from] ProcessError),
}

pub type StreamResult<T> = Result<T, StreamError>;
