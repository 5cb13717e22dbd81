//! Length-bucketed batching and constrained tree decoding for
//! dependency parsing.

pub mod bucket;

pub mod conll;

pub mod dataset;

pub mod decode;

pub mod error;

pub mod vocab;
