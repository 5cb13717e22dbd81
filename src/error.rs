use std::io;

use thiserror::Error;

use crate::conll::CorpusError;
use crate::decode::DecodeError;
use crate::vocab::VocabError;

/// Crate-level error type.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ArcBatchError {
    #[error(transparent)]
    Corpus(#[from] CorpusError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Vocab(#[from] VocabError),
}
