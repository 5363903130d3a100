//! Weighted selectors (spec §4.5).
//!
//! Three call sites share one weighted-draw primitive: a simple table's
//! entry pool, a composite table's source list, and a collection
//! table's merged entry pool (entries tagged with the table that
//! contributed them). Selection draws a float in `[0, totalWeight)` and
//! walks the cumulative weight; ties are broken by declaration order
//! because the walk is a linear scan over the pool in that order.

use crate::{Entry, Source, UniqueOverflowPolicy};
use rand::Rng;
use std::collections::HashSet;

pub(crate) struct Candidate<'a> {
    pub id: &'a str,
    pub entry: &'a Entry,
    pub source_table: &'a str,
}

pub(crate) enum SelectOutcome<'a> {
    Picked(Candidate<'a>),
    /// `unique` was requested, the pool is exhausted, and the document's
    /// overflow policy is `reset`: the caller should clear its
    /// used-entries set for this table and retry once.
    ResetAndRetry,
    Empty,
}

fn weighted_index(weights: &[f64], rng: &mut (impl Rng + ?Sized)) -> Option<usize> {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 {
        return None;
    }
    let draw = rng.gen_range(0.0..total);
    let mut cumulative = 0.0;
    for (i, w) in weights.iter().enumerate() {
        cumulative += w;
        if draw < cumulative {
            return Some(i);
        }
    }
    Some(weights.len() - 1)
}

/// Select one candidate from `pool`. Entries with explicit zero weight
/// are never eligible. When `unique_requested`, candidates already in
/// `exclude` are also ineligible, and an exhausted pool falls through to
/// the document's `overflow` policy.
pub(crate) fn select<'a>(
    pool: &[Candidate<'a>],
    exclude: &HashSet<String>,
    unique_requested: bool,
    overflow: UniqueOverflowPolicy,
    rng: &mut (impl Rng + ?Sized),
) -> SelectOutcome<'a> {
    let eligible: Vec<usize> = pool
        .iter()
        .enumerate()
        .filter(|(_, c)| c.entry.weight != Some(0.0) && (!unique_requested || !exclude.contains(c.id)))
        .map(|(i, _)| i)
        .collect();

    if !eligible.is_empty() {
        let weights: Vec<f64> = eligible.iter().map(|&i| pool[i].entry.weight.unwrap_or(1.0)).collect();
        if let Some(pick) = weighted_index(&weights, rng) {
            let chosen = &pool[eligible[pick]];
            return SelectOutcome::Picked(Candidate {
                id: chosen.id,
                entry: chosen.entry,
                source_table: chosen.source_table,
            });
        }
    }

    if !unique_requested {
        return SelectOutcome::Empty;
    }

    match overflow {
        UniqueOverflowPolicy::Stop => SelectOutcome::Empty,
        UniqueOverflowPolicy::Reset => SelectOutcome::ResetAndRetry,
        UniqueOverflowPolicy::Wrap => {
            let weighted: Vec<usize> =
                pool.iter().enumerate().filter(|(_, c)| c.entry.weight != Some(0.0)).map(|(i, _)| i).collect();
            let weights: Vec<f64> = weighted.iter().map(|&i| pool[i].entry.weight.unwrap_or(1.0)).collect();
            match weighted_index(&weights, rng) {
                Some(pick) => {
                    let chosen = &pool[weighted[pick]];
                    SelectOutcome::Picked(Candidate {
                        id: chosen.id,
                        entry: chosen.entry,
                        source_table: chosen.source_table,
                    })
                }
                None => SelectOutcome::Empty,
            }
        }
    }
}

/// Pick a composite source by weight (spec §4.5 "composite selector").
pub(crate) fn select_source<'a>(sources: &'a [Source], rng: &mut (impl Rng + ?Sized)) -> Option<&'a Source> {
    let weights: Vec<f64> = sources.iter().map(|s| s.weight).collect();
    weighted_index(&weights, rng).map(|i| &sources[i])
}
