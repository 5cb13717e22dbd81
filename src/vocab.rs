//! Word, tag, and relation id spaces.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use log::info;
use ndarray::Array2;
use numberer::Numberer;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::conll::{Reader, Token};
use crate::error::ArcBatchError;

/// Reserved padding id.
pub const PAD: usize = 0;

/// Reserved id of the synthetic ROOT token.
pub const ROOT: usize = 1;

/// Reserved unknown-word/tag id.
pub const UNK: usize = 2;

/// The reserved root dependency relation.
pub const ROOT_RELATION: &str = "root";

const PAD_STR: &str = "<pad>";
const ROOT_STR: &str = "<root>";
const UNK_STR: &str = "<unk>";

#[derive(Debug, Error)]
pub enum VocabError {
    /// The relation inventory is closed once the vocabulary is built.
    #[error("Unknown dependency relation: {0}")]
    UnknownRelation(String),

    #[error("No pretrained embedding file provided")]
    MissingPretrained,

    #[error("Embedding for '{form}' has {found} components, expected {expected}")]
    DimensionMismatch {
        form: String,
        expected: usize,
        found: usize,
    },

    #[error("Illegal embedding component in line: {line}")]
    IllegalVector { line: String },

    #[error("Pretrained embedding file contains no vectors")]
    EmptyPretrained,

    #[error("Pretrained word is not in the vocabulary: {0}")]
    UnknownPretrainedWord(String),

    #[error("Pretrained embeddings have zero variance")]
    ZeroVariance,
}

/// Word, POS tag, and dependency relation id spaces.
///
/// Words and tags reserve id 0 for padding, id 1 for the synthetic ROOT
/// token, and id 2 for unknown values. Relations reserve padding at 0
/// and the root relation at 1 and have no unknown slot: the relation
/// inventory is closed once the vocabulary is built.
///
/// A word enters the vocabulary when its corpus frequency strictly
/// exceeds the configured minimum; words that only occur in the
/// pretrained embedding file are appended after the training words, so
/// that ids in `[0, words_in_train)` have trainable embeddings and ids
/// in `[words_in_train, n_words)` are pretrained-only.
#[derive(Deserialize, Serialize)]
pub struct Vocabulary {
    words: Numberer<String>,
    tags: Numberer<String>,
    relations: Numberer<String>,
    words_in_train: usize,
    pretrained: Option<PathBuf>,
}

impl Vocabulary {
    /// Build a vocabulary from a corpus.
    ///
    /// Word forms are lowercased before counting. When a pretrained
    /// embedding file is given, its words extend the vocabulary and
    /// [`pretrained_vectors`](Self::pretrained_vectors) becomes
    /// available.
    pub fn from_corpus(
        corpus: impl AsRef<Path>,
        min_occurrence: usize,
        pretrained: Option<&Path>,
    ) -> Result<Self, ArcBatchError> {
        let file = File::open(corpus)?;

        let mut word_counts: BTreeMap<String, usize> = BTreeMap::new();
        let mut tag_set = BTreeSet::new();
        let mut relation_set = BTreeSet::new();

        for sentence in Reader::new(BufReader::new(file)) {
            for token in sentence? {
                *word_counts.entry(token.form.to_lowercase()).or_insert(0) += 1;
                tag_set.insert(token.pos);
                if token.relation != ROOT_RELATION {
                    relation_set.insert(token.relation);
                }
            }
        }

        let mut words = Numberer::new(0);
        for reserved in &[PAD_STR, ROOT_STR, UNK_STR] {
            words.add((*reserved).to_owned());
        }

        // Most frequent words first; ties are broken lexicographically
        // so that identical corpora yield identical mappings.
        let mut frequent: Vec<_> = word_counts
            .into_iter()
            .filter(|&(_, count)| count > min_occurrence)
            .collect();
        frequent.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        for (word, _) in frequent {
            words.add(word);
        }

        let words_in_train = words.len();

        if let Some(path) = pretrained {
            add_pretrained_words(&mut words, path)?;
        }

        let mut tags = Numberer::new(0);
        for reserved in &[PAD_STR, ROOT_STR, UNK_STR] {
            tags.add((*reserved).to_owned());
        }
        for tag in tag_set {
            tags.add(tag);
        }

        let mut relations = Numberer::new(0);
        relations.add(PAD_STR.to_owned());
        relations.add(ROOT_RELATION.to_owned());
        for relation in relation_set {
            relations.add(relation);
        }

        info!(
            "Vocabulary: {} words ({} in training data), {} tags, {} relations",
            words.len(),
            words_in_train,
            tags.len(),
            relations.len()
        );

        Ok(Vocabulary {
            words,
            tags,
            relations,
            words_in_train,
            pretrained: pretrained.map(ToOwned::to_owned),
        })
    }

    /// Look up a word, falling back to the unknown id.
    ///
    /// The form is lowercased before lookup.
    pub fn word_id(&self, form: &str) -> usize {
        self.words.number(&form.to_lowercase()).unwrap_or(UNK)
    }

    /// Look up a sequence of words.
    pub fn word_ids<'a>(&self, forms: impl IntoIterator<Item = &'a str>) -> Vec<usize> {
        forms.into_iter().map(|form| self.word_id(form)).collect()
    }

    /// Look up a tag, falling back to the unknown id.
    pub fn tag_id(&self, tag: &str) -> usize {
        self.tags.number(&tag.to_owned()).unwrap_or(UNK)
    }

    /// Look up a sequence of tags.
    pub fn tag_ids<'a>(&self, tags: impl IntoIterator<Item = &'a str>) -> Vec<usize> {
        tags.into_iter().map(|tag| self.tag_id(tag)).collect()
    }

    /// Look up a dependency relation.
    ///
    /// An unseen relation is an error.
    pub fn relation_id(&self, relation: &str) -> Result<usize, VocabError> {
        self.relations
            .number(&relation.to_owned())
            .ok_or_else(|| VocabError::UnknownRelation(relation.to_owned()))
    }

    /// Look up a sequence of dependency relations.
    pub fn relation_ids<'a>(
        &self,
        relations: impl IntoIterator<Item = &'a str>,
    ) -> Result<Vec<usize>, VocabError> {
        relations
            .into_iter()
            .map(|relation| self.relation_id(relation))
            .collect()
    }

    /// Get the surface form of a word id.
    pub fn word(&self, id: usize) -> Option<&str> {
        self.words.value(id).map(String::as_str)
    }

    /// Get the surface form of a tag id.
    pub fn tag(&self, id: usize) -> Option<&str> {
        self.tags.value(id).map(String::as_str)
    }

    /// Get the label of a relation id.
    pub fn relation(&self, id: usize) -> Option<&str> {
        self.relations.value(id).map(String::as_str)
    }

    pub fn n_words(&self) -> usize {
        self.words.len()
    }

    pub fn n_tags(&self) -> usize {
        self.tags.len()
    }

    pub fn n_relations(&self) -> usize {
        self.relations.len()
    }

    /// Number of word ids with trainable embeddings.
    pub fn words_in_train(&self) -> usize {
        self.words_in_train
    }

    /// Numericize a corpus sentence.
    ///
    /// Prepends the synthetic ROOT row. Every row holds the word id,
    /// tag id, head position, and relation id of one token.
    pub fn numericize(&self, tokens: &[Token]) -> Result<Vec<[i64; 4]>, VocabError> {
        let mut rows = Vec::with_capacity(tokens.len() + 1);
        rows.push([ROOT as i64, ROOT as i64, 0, ROOT as i64]);

        for token in tokens {
            rows.push([
                self.word_id(&token.form) as i64,
                self.tag_id(&token.pos) as i64,
                token.head as i64,
                self.relation_id(&token.relation)? as i64,
            ]);
        }

        Ok(rows)
    }

    /// Load the pretrained embedding matrix.
    ///
    /// Returns one row per word id; rows for words absent from the
    /// pretrained file are zero. The matrix is scaled by the inverse of
    /// the population standard deviation computed over all of its
    /// entries, zero rows included.
    pub fn pretrained_vectors(&self) -> Result<Array2<f32>, ArcBatchError> {
        let path = self
            .pretrained
            .as_deref()
            .ok_or(VocabError::MissingPretrained)?;

        // Probe the dimensionality up front, so that the matrix can be
        // allocated before any vector is read.
        let dims = probe_dims(path)?;
        if dims == 0 {
            return Err(VocabError::EmptyPretrained.into());
        }

        let mut matrix = Array2::<f32>::zeros((self.n_words(), dims));
        let file = File::open(path)?;
        for line in BufReader::new(file).lines() {
            let line = line?;
            let mut fields = line.split_whitespace();
            let form = match fields.next() {
                Some(form) => form,
                None => continue,
            };

            let id = self
                .words
                .number(&form.to_owned())
                .ok_or_else(|| VocabError::UnknownPretrainedWord(form.to_owned()))?;
            for (col, field) in fields.enumerate() {
                matrix[(id, col)] = field.parse().map_err(|_| VocabError::IllegalVector {
                    line: line.to_owned(),
                })?;
            }
        }

        let std = population_std(&matrix);
        if std == 0.0 {
            return Err(VocabError::ZeroVariance.into());
        }
        matrix /= std;

        Ok(matrix)
    }
}

fn add_pretrained_words(
    words: &mut Numberer<String>,
    path: &Path,
) -> Result<(), ArcBatchError> {
    let file = File::open(path)?;
    for line in BufReader::new(file).lines() {
        let line = line?;
        if let Some(form) = line.split_whitespace().next() {
            words.add(form.to_owned());
        }
    }

    Ok(())
}

fn probe_dims(path: &Path) -> Result<usize, ArcBatchError> {
    let file = File::open(path)?;
    let mut dims = None;

    for line in BufReader::new(file).lines() {
        let line = line?;
        let mut fields = line.split_whitespace();
        let form = match fields.next() {
            Some(form) => form,
            None => continue,
        };

        let found = fields.count();
        match dims {
            None => dims = Some(found),
            Some(expected) if expected != found => {
                return Err(VocabError::DimensionMismatch {
                    form: form.to_owned(),
                    expected,
                    found,
                }
                .into())
            }
            _ => (),
        }
    }

    dims.ok_or_else(|| VocabError::EmptyPretrained.into())
}

fn population_std(matrix: &Array2<f32>) -> f32 {
    let n = matrix.len() as f32;
    let mean = matrix.sum() / n;
    let var = matrix.fold(0.0, |acc, &v| acc + (v - mean) * (v - mean)) / n;
    var.sqrt()
}
