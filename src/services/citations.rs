// ABOUTME: Maps model-cited source indexes back to the prompt-time source list
// ABOUTME: Out-of-range and repeated indexes are dropped without failing the reply
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Base Chat Contributors

use std::collections::BTreeSet;

use tracing::debug;

use crate::models::Source;

/// Resolve `used_source_indexes` against the sources the model was shown
///
/// The result keeps prompt order regardless of the order the model listed
/// the indexes in, and each index contributes at most once.
#[must_use]
pub fn reconcile_sources(sources: &[Source], used_source_indexes: &[i64]) -> Vec<Source> {
    let valid: BTreeSet<usize> = used_source_indexes
        .iter()
        .filter_map(|&index| usize::try_from(index).ok())
        .filter(|&index| index < sources.len())
        .collect();

    let dropped = used_source_indexes.len() - valid.len();
    if dropped > 0 {
        debug!(
            dropped,
            available = sources.len(),
            "Ignored invalid or repeated source indexes"
        );
    }

    valid.into_iter().map(|index| sources[index].clone()).collect()
}
