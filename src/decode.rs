//! Constrained dependency-tree decoding.
//!
//! Scores are indexed as `scores[(dependent, head)]`; row and column 0
//! stand for the synthetic ROOT token.

use itertools::multizip;
use ndarray::ArrayView2;
use ordered_float::OrderedFloat;
use petgraph::algo::tarjan_scc;
use petgraph::graphmap::DiGraphMap;
use thiserror::Error;

use crate::vocab::{PAD, ROOT};

/// Repair attempts per token before falling back to forced resolution.
const REPAIRS_PER_TOKEN: usize = 4;

#[derive(Clone, Debug, Eq, Error, PartialEq)]
pub enum DecodeError {
    #[error("Head score matrix must be square, got {rows} x {cols}")]
    NonSquareMatrix { rows: usize, cols: usize },

    #[error("Cannot decode a sentence of length {0}")]
    SentenceTooShort(usize),

    #[error("Valid length {len} exceeds the score matrix dimension {dim}")]
    LengthOutOfBounds { len: usize, dim: usize },

    #[error("Token {0} has no non-zero head score")]
    DegenerateScores(usize),

    #[error("Expected relation scores for {expected} tokens, got {found}")]
    RelationRowMismatch { expected: usize, found: usize },

    #[error("Expected at least three relation columns, got {0}")]
    TooFewRelations(usize),

    #[error("Expected heads for {expected} tokens, got {found}")]
    HeadCountMismatch { expected: usize, found: usize },
}

/// Decode a head assignment from an arc score matrix.
///
/// `scores[(dependent, head)]` is the score for attaching `dependent`
/// to `head`; both indices run over `[0, valid_len)`. The returned
/// heads cover the dependents `[1, valid_len)` and always form a tree:
/// exactly one token attaches to ROOT, the assignment is acyclic, and
/// every head lies within the sentence.
///
/// Decoding starts from the per-row argmax with self-attachment masked
/// and greedily repairs root and cycle violations, preferring the
/// re-attachment that sacrifices the least score. When the repair
/// budget is exhausted, remaining cycles are broken by cutting the
/// lowest-margin edge in each cycle and re-attaching its dependent to
/// the root-attached token, which can never introduce a new cycle.
pub fn decode_arcs(scores: ArrayView2<f32>, valid_len: usize) -> Result<Vec<usize>, DecodeError> {
    let (rows, cols) = scores.dim();
    if rows != cols {
        return Err(DecodeError::NonSquareMatrix { rows, cols });
    }
    if valid_len < 2 {
        return Err(DecodeError::SentenceTooShort(valid_len));
    }
    if valid_len > rows {
        return Err(DecodeError::LengthOutOfBounds {
            len: valid_len,
            dim: rows,
        });
    }
    for dependent in 1..valid_len {
        if (0..valid_len).all(|head| scores[(dependent, head)] == 0.0) {
            return Err(DecodeError::DegenerateScores(dependent));
        }
    }

    // Row argmax with self-attachment masked.
    let mut heads = vec![0; valid_len];
    for dependent in 1..valid_len {
        heads[dependent] = best_head(scores, valid_len, dependent, |_| true)
            .expect("A sentence of two or more tokens has a head candidate");
    }

    resolve_roots(scores, valid_len, &mut heads);
    resolve_cycles(scores, valid_len, &mut heads);

    heads.remove(0);
    Ok(heads)
}

/// Ensure that exactly one token attaches to ROOT.
fn resolve_roots(scores: ArrayView2<f32>, valid_len: usize, heads: &mut [usize]) {
    let mut roots: Vec<usize> = (1..valid_len).filter(|&d| heads[d] == 0).collect();

    if roots.is_empty() {
        // Promote the token whose root attachment sacrifices the least
        // score relative to its current head.
        let candidate = (1..valid_len)
            .max_by_key(|&d| OrderedFloat(scores[(d, 0)] - scores[(d, heads[d])]))
            .expect("A sentence has at least one dependent");
        heads[candidate] = 0;
        return;
    }

    while roots.len() > 1 {
        // Move the least confident root attachment to its best
        // non-root head.
        let (idx, new_head) = roots
            .iter()
            .enumerate()
            .map(|(idx, &d)| {
                let alternative = best_head(scores, valid_len, d, |head| head != 0)
                    .expect("A sentence with several roots has a non-root candidate");
                (idx, alternative, scores[(d, alternative)] - scores[(d, 0)])
            })
            .max_by_key(|&(_, _, margin)| OrderedFloat(margin))
            .map(|(idx, alternative, _)| (idx, alternative))
            .expect("There is more than one root");

        heads[roots[idx]] = new_head;
        roots.swap_remove(idx);
    }
}

/// Break cycles in the head assignment.
///
/// Must run after root resolution: neither ROOT nor the root-attached
/// token can be part of a cycle, so every cycle has an escape head.
fn resolve_cycles(scores: ArrayView2<f32>, valid_len: usize, heads: &mut [usize]) {
    let mut budget = REPAIRS_PER_TOKEN * valid_len;

    loop {
        let cycles = find_cycles(heads, valid_len);
        if cycles.is_empty() {
            return;
        }

        if budget == 0 {
            force_break(scores, valid_len, heads);
            return;
        }

        for cycle in cycles {
            if budget == 0 {
                break;
            }

            // Re-attach the cycle member with the cheapest move to a
            // head outside the cycle. Re-attachment can close another
            // cycle; the next round picks that up.
            let (dependent, new_head) = cycle
                .iter()
                .map(|&d| {
                    let escape =
                        best_head(scores, valid_len, d, |head| {
                            head != 0 && !cycle.contains(&head)
                        })
                        .expect("A cycle excludes ROOT and the root-attached token");
                    (d, escape, scores[(d, escape)] - scores[(d, heads[d])])
                })
                .max_by_key(|&(_, _, margin)| OrderedFloat(margin))
                .map(|(d, escape, _)| (d, escape))
                .expect("Cycles are non-empty");

            heads[dependent] = new_head;
            budget -= 1;
        }
    }
}

/// Forced fallback: cut the lowest-margin edge in every remaining
/// cycle and re-attach its dependent to the root-attached token.
fn force_break(scores: ArrayView2<f32>, valid_len: usize, heads: &mut [usize]) {
    let root_dependent = (1..valid_len)
        .find(|&d| heads[d] == 0)
        .expect("Root resolution precedes cycle breaking");

    loop {
        let cycles = find_cycles(heads, valid_len);
        if cycles.is_empty() {
            return;
        }

        for cycle in cycles {
            let &weakest = cycle
                .iter()
                .min_by_key(|&&d| {
                    OrderedFloat(scores[(d, heads[d])] - scores[(d, root_dependent)])
                })
                .expect("Cycles are non-empty");
            heads[weakest] = root_dependent;
        }
    }
}

fn best_head<F>(
    scores: ArrayView2<f32>,
    valid_len: usize,
    dependent: usize,
    legal: F,
) -> Option<usize>
where
    F: Fn(usize) -> bool,
{
    (0..valid_len)
        .filter(|&head| head != dependent && legal(head))
        .max_by_key(|&head| OrderedFloat(scores[(dependent, head)]))
}

fn find_cycles(heads: &[usize], valid_len: usize) -> Vec<Vec<usize>> {
    let mut graph = DiGraphMap::<usize, ()>::new();
    for dependent in 1..valid_len {
        graph.add_edge(dependent, heads[dependent], ());
    }

    tarjan_scc(&graph)
        .into_iter()
        .filter(|component| component.len() > 1)
        .collect()
}

/// Decode relation labels for an already-fixed head assignment.
///
/// `scores` has one row per token of the sentence and one column per
/// relation id; row 0, the ROOT token, is ignored. `heads` is the head
/// assignment for the dependents `[1, valid_len)`, as returned by
/// [`decode_arcs`]. The padding relation is never predicted, and the
/// root relation is only a legal choice for the token attached to
/// ROOT.
pub fn decode_relations(
    scores: ArrayView2<f32>,
    heads: &[usize],
    valid_len: usize,
) -> Result<Vec<usize>, DecodeError> {
    if valid_len < 2 {
        return Err(DecodeError::SentenceTooShort(valid_len));
    }

    let (rows, n_relations) = scores.dim();
    if rows != valid_len {
        return Err(DecodeError::RelationRowMismatch {
            expected: valid_len,
            found: rows,
        });
    }
    if n_relations < 3 {
        return Err(DecodeError::TooFewRelations(n_relations));
    }
    if heads.len() != valid_len - 1 {
        return Err(DecodeError::HeadCountMismatch {
            expected: valid_len - 1,
            found: heads.len(),
        });
    }

    let mut relations = Vec::with_capacity(valid_len - 1);
    for (dependent, &head) in multizip((1..valid_len, heads)) {
        let relation = (0..n_relations)
            .filter(|&relation| relation != PAD && (head == 0 || relation != ROOT))
            .max_by_key(|&relation| OrderedFloat(scores[(dependent, relation)]))
            .expect("At least three relations leave a legal candidate");
        relations.push(relation);
    }

    Ok(relations)
}
