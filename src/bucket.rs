//! Bucket-boundary planning.

use std::collections::BTreeMap;

use ordered_float::OrderedFloat;

const MAX_ITERATIONS: usize = 100;

/// Plan bucket boundaries for a histogram of sentence lengths.
///
/// Chooses up to `n_buckets` boundaries by frequency-weighted k-means
/// clustering over the distinct lengths, minimizing the total padding
/// cost `boundary * count` summed over the buckets. Every observed
/// length maps to exactly one boundary that is at least as large;
/// boundaries are strictly increasing and the last boundary equals the
/// maximum observed length.
///
/// When there are fewer distinct lengths than requested buckets, the
/// effective bucket count collapses to the number of distinct lengths.
///
/// Panics on an empty histogram or when `n_buckets` is zero.
pub fn plan(histogram: &BTreeMap<usize, usize>, n_buckets: usize) -> Vec<usize> {
    assert!(n_buckets > 0, "Cannot plan zero buckets");

    let lengths: Vec<(usize, usize)> = histogram
        .iter()
        .filter(|&(_, &count)| count > 0)
        .map(|(&len, &count)| (len, count))
        .collect();
    assert!(
        !lengths.is_empty(),
        "Cannot plan buckets for an empty histogram"
    );

    let k = n_buckets.min(lengths.len());
    let min_len = lengths[0].0 as f64;
    let max_len = lengths[lengths.len() - 1].0 as f64;

    // Initial centers, evenly spaced across the length range.
    let mut centers: Vec<f64> = (0..k)
        .map(|i| {
            if k == 1 {
                (min_len + max_len) / 2.0
            } else {
                min_len + (max_len - min_len) * i as f64 / (k - 1) as f64
            }
        })
        .collect();

    let mut assignment = vec![0; lengths.len()];
    for _ in 0..MAX_ITERATIONS {
        let new_assignment: Vec<usize> = lengths
            .iter()
            .map(|&(len, _)| nearest_center(&centers, len))
            .collect();
        let stable = new_assignment == assignment;
        assignment = new_assignment;

        // Move each center to the frequency-weighted mean of its
        // assigned lengths; a center without assignments stays put.
        let mut sums = vec![0.0; k];
        let mut weights = vec![0.0; k];
        for (&(len, count), &cluster) in lengths.iter().zip(&assignment) {
            sums[cluster] += (len * count) as f64;
            weights[cluster] += count as f64;
        }
        for (center, (sum, weight)) in centers.iter_mut().zip(sums.into_iter().zip(weights)) {
            if weight > 0.0 {
                *center = sum / weight;
            }
        }

        if stable {
            break;
        }
    }

    // The boundary of a cluster is the largest length assigned to it.
    // Nearest-center assignment keeps clusters in contiguous length
    // ranges, so the boundaries of the non-empty clusters are strictly
    // increasing; empty clusters are dropped.
    let mut boundaries = vec![None; k];
    for (&(len, _), &cluster) in lengths.iter().zip(&assignment) {
        let boundary = boundaries[cluster].get_or_insert(len);
        *boundary = (*boundary).max(len);
    }

    boundaries.into_iter().flatten().collect()
}

fn nearest_center(centers: &[f64], len: usize) -> usize {
    centers
        .iter()
        .enumerate()
        .min_by_key(|(_, &center)| OrderedFloat((len as f64 - center).abs()))
        .map(|(idx, _)| idx)
        .expect("Centers cannot be empty")
}
