use std::collections::BTreeMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use log::debug;
use ndarray::{s, Array2, Array3, ArrayView2};
use serde::{Deserialize, Serialize};

use crate::bucket;
use crate::conll::Reader;
use crate::error::ArcBatchError;
use crate::vocab::Vocabulary;

/// Number of fields stored per token.
pub const FIELDS: usize = 4;

/// A numericized token row: word id, tag id, head position, relation id.
pub type TokenRow = [i64; FIELDS];

/// Bucket and slot of one input sentence.
///
/// Records restore the original corpus order after batched, shuffled
/// processing.
#[derive(Clone, Copy, Debug, Deserialize, Eq, Ord, PartialEq, PartialOrd, Serialize)]
pub struct Record {
    pub bucket: usize,
    pub slot: usize,
}

/// Sentences packed into per-bucket dense arrays.
///
/// Each bucket owns an array of shape `(boundary, n_sentences, FIELDS)`
/// that is zero-padded beyond every sentence's true length. The store
/// is immutable once packed and can be read from multiple threads.
pub struct BucketStore {
    boundaries: Vec<usize>,
    buckets: Vec<Array3<i64>>,
    records: Vec<Record>,
    lens: Vec<usize>,
}

impl BucketStore {
    /// Read and pack a corpus.
    ///
    /// Numericizes every sentence with `vocab`, plans `n_buckets`
    /// boundaries over the sentence-length histogram, and packs.
    pub fn from_corpus(
        corpus: impl AsRef<Path>,
        n_buckets: usize,
        vocab: &Vocabulary,
    ) -> Result<Self, ArcBatchError> {
        let file = File::open(corpus)?;

        let mut sentences = Vec::new();
        for sentence in Reader::new(BufReader::new(file)) {
            sentences.push(vocab.numericize(&sentence?)?);
        }

        let mut histogram = BTreeMap::new();
        for sentence in &sentences {
            *histogram.entry(sentence.len()).or_insert(0) += 1;
        }

        let boundaries = bucket::plan(&histogram, n_buckets);

        Ok(Self::pack(sentences, &boundaries))
    }

    /// Pack sentences into buckets.
    ///
    /// Every sentence goes to the bucket with the smallest boundary
    /// that holds its length. Panics when a sentence is empty, when a
    /// sentence is longer than the last boundary, or when a boundary
    /// receives no sentences.
    pub fn pack(sentences: Vec<Vec<TokenRow>>, boundaries: &[usize]) -> Self {
        let mut slots: Vec<Vec<Vec<TokenRow>>> = vec![Vec::new(); boundaries.len()];
        let mut records = Vec::with_capacity(sentences.len());
        let mut lens = Vec::with_capacity(sentences.len());

        for sentence in sentences {
            assert!(!sentence.is_empty(), "Cannot pack an empty sentence");

            let bucket = boundaries
                .iter()
                .position(|&boundary| boundary >= sentence.len())
                .unwrap_or_else(|| {
                    panic!("No boundary holds a sentence of length {}", sentence.len())
                });

            lens.push(sentence.len());
            records.push(Record {
                bucket,
                slot: slots[bucket].len(),
            });
            slots[bucket].push(sentence);
        }

        let mut buckets = Vec::with_capacity(boundaries.len());
        for (&boundary, bucket_sentences) in boundaries.iter().zip(slots) {
            assert!(
                !bucket_sentences.is_empty(),
                "Bucket with boundary {} is empty",
                boundary
            );

            let mut bucket = Array3::zeros((boundary, bucket_sentences.len(), FIELDS));
            for (slot, sentence) in bucket_sentences.into_iter().enumerate() {
                let len = sentence.len();
                let rows = Array2::from(sentence);
                bucket.slice_mut(s![..len, slot, ..]).assign(&rows);
            }

            debug!("Packed bucket: {} x {}", boundary, bucket.shape()[1]);
            buckets.push(bucket);
        }

        BucketStore {
            boundaries: boundaries.to_vec(),
            buckets,
            records,
            lens,
        }
    }

    /// Bucket boundaries, in increasing order.
    pub fn boundaries(&self) -> &[usize] {
        &self.boundaries
    }

    /// The packed bucket arrays.
    pub fn buckets(&self) -> &[Array3<i64>] {
        &self.buckets
    }

    /// Bucket and slot of every input sentence, in input order.
    pub fn records(&self) -> &[Record] {
        &self.records
    }

    /// Number of packed sentences.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// The token rows of the `idx`-th input sentence.
    ///
    /// Reconstructs the sentence exactly as it was passed to
    /// [`pack`](Self::pack), without padding rows.
    pub fn sentence(&self, idx: usize) -> ArrayView2<i64> {
        let record = self.records[idx];
        self.buckets[record.bucket].slice(s![..self.lens[idx], record.slot, ..])
    }

    /// Original sentence indices in bucket-major emission order.
    ///
    /// Batched processing emits per-sentence results ordered by bucket
    /// and slot; indexing the emitted results with this sequence
    /// restores corpus order.
    pub fn emission_order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.records.len()).collect();
        order.sort_by_key(|&idx| self.records[idx]);
        order
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use ndarray::Array2;

    use super::{BucketStore, Record, TokenRow};
    use crate::conll::Reader;
    use crate::vocab::Vocabulary;

    static CORPUS: &str = "testdata/dev.conll";

    pub fn sentence(len: usize, mark: i64) -> Vec<TokenRow> {
        (0..len)
            .map(|row| [mark, mark + 1, row as i64, mark + 2])
            .collect()
    }

    #[test]
    fn packing_round_trips() {
        // One ROOT-only sentence, one of maximum length.
        let sentences = vec![
            sentence(2, 10),
            sentence(1, 20),
            sentence(5, 30),
            sentence(3, 40),
            sentence(5, 50),
        ];
        let store = BucketStore::pack(sentences.clone(), &[3, 5]);

        for (idx, sentence) in sentences.into_iter().enumerate() {
            assert_eq!(store.sentence(idx), Array2::from(sentence));
        }
    }

    #[test]
    fn records_follow_input_order() {
        let sentences = vec![sentence(5, 1), sentence(2, 2), sentence(3, 3)];
        let store = BucketStore::pack(sentences, &[3, 5]);

        assert_eq!(
            store.records(),
            &[
                Record { bucket: 1, slot: 0 },
                Record { bucket: 0, slot: 0 },
                Record { bucket: 0, slot: 1 },
            ]
        );
        assert_eq!(store.emission_order(), vec![1, 2, 0]);
    }

    #[test]
    fn padding_rows_are_zero() {
        let store = BucketStore::pack(vec![sentence(2, 7), sentence(4, 8)], &[4]);
        let bucket = &store.buckets()[0];

        assert_eq!(bucket.dim(), (4, 2, 4));
        for row in 2..4 {
            for field in 0..4 {
                assert_eq!(bucket[(row, 0, field)], 0);
            }
        }
    }

    #[test]
    #[should_panic(expected = "No boundary holds")]
    fn overlong_sentence_is_rejected() {
        BucketStore::pack(vec![sentence(6, 1), sentence(2, 2)], &[2, 4]);
    }

    #[test]
    #[should_panic(expected = "empty sentence")]
    fn empty_sentence_is_rejected() {
        BucketStore::pack(vec![Vec::new()], &[4]);
    }

    #[test]
    #[should_panic(expected = "is empty")]
    fn unused_boundary_is_rejected() {
        BucketStore::pack(vec![sentence(2, 1)], &[2, 4]);
    }

    #[test]
    fn corpus_round_trips() {
        let vocab = Vocabulary::from_corpus(CORPUS, 0, None).unwrap();
        let store = BucketStore::from_corpus(CORPUS, 2, &vocab).unwrap();

        let file = std::fs::File::open(CORPUS).unwrap();
        let expected: Vec<_> = Reader::new(std::io::BufReader::new(file))
            .map(|sentence| vocab.numericize(&sentence.unwrap()).unwrap())
            .collect();

        assert_eq!(store.len(), expected.len());
        for (idx, rows) in expected.into_iter().enumerate() {
            assert_eq!(store.sentence(idx), Array2::from(rows));
        }

        // Sentence lengths (with ROOT) are 5, 5, and 4; two buckets.
        assert_eq!(store.boundaries(), &[4, 5]);
        assert_eq!(store.emission_order(), vec![2, 0, 1]);
    }
}
