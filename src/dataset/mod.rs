//! Packed buckets and batch enumeration.

mod batch_iter;
pub use batch_iter::{Batch, BatchIter, BatchOrder};

mod store;
pub use store::{BucketStore, Record, TokenRow, FIELDS};
