use std::vec;

use ndarray::{s, Array2, Axis};
use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand_xorshift::XorShiftRng;

use super::store::BucketStore;

/// Enumeration order of the batches in one pass.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum BatchOrder {
    /// Stored column order, buckets in boundary order.
    InOrder,

    /// Column order within each bucket and the cross-bucket batch
    /// order are permuted by a seeded generator; identical seeds
    /// reproduce identical batch sequences.
    Shuffled { seed: u64 },
}

/// One mini-batch sliced from a bucket.
///
/// The four field arrays have shape `(bucket_width, batch_len)`.
#[derive(Debug)]
pub struct Batch {
    pub bucket: usize,
    pub columns: Vec<usize>,
    pub words: Array2<i64>,
    pub tags: Array2<i64>,
    pub heads: Array2<i64>,
    pub relations: Array2<i64>,
}

/// Iterator over the mini-batches of a [`BucketStore`].
pub struct BatchIter<'a> {
    store: &'a BucketStore,
    plan: vec::IntoIter<(usize, Vec<usize>)>,
}

impl BucketStore {
    /// Iterate over mini-batches.
    ///
    /// Each bucket is split into `max(1, tokens / batch_token_budget)`
    /// near-equal column groups, where `tokens` is the bucket width
    /// times its sentence count. The split is greedy: a batch can
    /// exceed the budget when a single bucket width is already large
    /// relative to it, and a bucket never splits into more batches
    /// than it has sentences.
    ///
    /// The store is only borrowed, so batches can be enumerated
    /// repeatedly over the same packed data.
    ///
    /// Panics when `batch_token_budget` is zero.
    pub fn batches(&self, batch_token_budget: usize, order: BatchOrder) -> BatchIter<'_> {
        assert!(batch_token_budget > 0, "Batch token budget must be positive");

        let mut rng = match order {
            BatchOrder::InOrder => None,
            BatchOrder::Shuffled { seed } => Some(XorShiftRng::seed_from_u64(seed)),
        };

        let mut plan = Vec::new();
        for (bucket, (&boundary, array)) in self
            .boundaries()
            .iter()
            .zip(self.buckets())
            .enumerate()
        {
            let count = array.shape()[1];
            let tokens = boundary * count;
            let splits = (tokens / batch_token_budget).max(1).min(count);

            let mut columns: Vec<usize> = (0..count).collect();
            if let Some(rng) = rng.as_mut() {
                columns.shuffle(rng);
            }

            for group in split_near_equal(&columns, splits) {
                plan.push((bucket, group));
            }
        }

        if let Some(rng) = rng.as_mut() {
            plan.shuffle(rng);
        }

        BatchIter {
            store: self,
            plan: plan.into_iter(),
        }
    }
}

impl<'a> Iterator for BatchIter<'a> {
    type Item = Batch;

    fn next(&mut self) -> Option<Self::Item> {
        let (bucket, columns) = self.plan.next()?;
        let array = &self.store.buckets()[bucket];

        let select = |field: usize| array.slice(s![.., .., field]).select(Axis(1), &columns);
        let words = select(0);
        let tags = select(1);
        let heads = select(2);
        let relations = select(3);

        Some(Batch {
            bucket,
            columns,
            words,
            tags,
            heads,
            relations,
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.plan.size_hint()
    }
}

/// Split `columns` into `splits` groups whose sizes differ by at most
/// one, preserving order.
fn split_near_equal(columns: &[usize], splits: usize) -> Vec<Vec<usize>> {
    let base = columns.len() / splits;
    let extra = columns.len() % splits;

    let mut groups = Vec::with_capacity(splits);
    let mut start = 0;
    for group in 0..splits {
        let size = base + usize::from(group < extra);
        groups.push(columns[start..start + size].to_vec());
        start += size;
    }

    groups
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::super::store::tests::sentence;
    use super::{split_near_equal, BatchOrder};
    use crate::dataset::BucketStore;

    fn test_store() -> BucketStore {
        let sentences = vec![
            sentence(2, 10),
            sentence(3, 20),
            sentence(3, 30),
            sentence(5, 40),
            sentence(4, 50),
            sentence(5, 60),
            sentence(4, 70),
        ];
        BucketStore::pack(sentences, &[3, 5])
    }

    fn column_multisets(store: &BucketStore, budget: usize, order: BatchOrder) -> Vec<Vec<usize>> {
        let mut per_bucket = vec![BTreeMap::new(); store.buckets().len()];
        for batch in store.batches(budget, order) {
            for &column in &batch.columns {
                *per_bucket[batch.bucket].entry(column).or_insert(0usize) += 1;
            }
        }

        per_bucket
            .into_iter()
            .map(|counts| {
                counts
                    .into_iter()
                    .flat_map(|(column, count)| std::iter::repeat(column).take(count))
                    .collect()
            })
            .collect()
    }

    #[test]
    fn every_column_is_emitted_exactly_once() {
        let store = test_store();

        for order in &[BatchOrder::InOrder, BatchOrder::Shuffled { seed: 42 }] {
            let multisets = column_multisets(&store, 7, *order);
            assert_eq!(multisets[0], vec![0, 1, 2]);
            assert_eq!(multisets[1], vec![0, 1, 2, 3]);
        }
    }

    #[test]
    fn in_order_batches_preserve_bucket_and_column_order() {
        let store = test_store();
        let batches: Vec<_> = store.batches(7, BatchOrder::InOrder).collect();

        // Bucket 0 holds 9 tokens (one batch), bucket 1 holds 20
        // (two batches of two columns).
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[0].bucket, 0);
        assert_eq!(batches[0].columns, vec![0, 1, 2]);
        assert_eq!(batches[1].bucket, 1);
        assert_eq!(batches[1].columns, vec![0, 1]);
        assert_eq!(batches[2].columns, vec![2, 3]);
    }

    #[test]
    fn batch_arrays_slice_the_selected_columns() {
        let store = test_store();
        let batch = store.batches(7, BatchOrder::InOrder).next().unwrap();

        assert_eq!(batch.words.dim(), (3, 3));
        assert_eq!(batch.tags.dim(), (3, 3));
        assert_eq!(batch.heads.dim(), (3, 3));
        assert_eq!(batch.relations.dim(), (3, 3));

        // Column 0 of bucket 0 is the length-2 sentence marked 10,
        // padded with one zero row.
        assert_eq!(batch.words.column(0).to_vec(), vec![10, 10, 0]);
        assert_eq!(batch.tags.column(0).to_vec(), vec![11, 11, 0]);
        assert_eq!(batch.heads.column(0).to_vec(), vec![0, 1, 0]);
        assert_eq!(batch.relations.column(0).to_vec(), vec![12, 12, 0]);
    }

    #[test]
    fn identical_seeds_reproduce_identical_batches() {
        let store = test_store();

        let first: Vec<_> = store
            .batches(4, BatchOrder::Shuffled { seed: 17 })
            .map(|batch| (batch.bucket, batch.columns))
            .collect();
        let second: Vec<_> = store
            .batches(4, BatchOrder::Shuffled { seed: 17 })
            .map(|batch| (batch.bucket, batch.columns))
            .collect();

        assert_eq!(first, second);
    }

    #[test]
    fn tight_budget_caps_splits_at_sentence_count() {
        let store = test_store();
        for batch in store.batches(1, BatchOrder::InOrder) {
            assert_eq!(batch.columns.len(), 1);
        }
        let n_batches = store.batches(1, BatchOrder::InOrder).count();
        assert_eq!(n_batches, store.len());
    }

    #[test]
    fn near_equal_split_sizes() {
        let columns: Vec<usize> = (0..7).collect();
        let groups = split_near_equal(&columns, 3);
        assert_eq!(groups, vec![vec![0, 1, 2], vec![3, 4], vec![5, 6]]);
    }

    #[test]
    #[should_panic(expected = "budget must be positive")]
    fn zero_budget_is_rejected() {
        test_store().batches(0, BatchOrder::InOrder).count();
    }
}
