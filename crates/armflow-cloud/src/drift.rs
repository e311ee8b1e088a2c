//! Drift between the applied baseline and the provider's live resources

use crate::provider::{ChangeType, WhatIfChange};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Result of a drift calculation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftRecord {
    /// Ids recorded at the last successful apply
    pub declared_resource_ids: Vec<String>,

    /// Ids enumerated under the resource group; `None` if the group is gone
    pub live_resource_ids: Option<Vec<String>>,

    /// What-if entries consulted
    pub changes: Vec<WhatIfChange>,

    /// Surviving ids, in baseline order followed by what-if additions
    pub state: Vec<String>,

    pub is_drifted: bool,
}

/// Computes drift from a baseline, a live probe and a what-if preview
pub struct DriftCalculator;

impl DriftCalculator {
    /// `actual` is `None` when the resource group itself no longer exists.
    ///
    /// Ids are compared case-insensitively. A what-if `NoChange` or `Modify`
    /// entry counts as present even when the live probe misses it.
    pub fn calculate(
        initial: &[String],
        actual: Option<&[String]>,
        what_if: &[WhatIfChange],
    ) -> DriftRecord {
        let Some(actual) = actual else {
            return DriftRecord {
                declared_resource_ids: initial.to_vec(),
                live_resource_ids: None,
                changes: what_if.to_vec(),
                state: Vec::new(),
                is_drifted: true,
            };
        };

        let live: HashSet<String> = actual.iter().map(|id| normalize(id)).collect();
        let confirmed: HashSet<String> = what_if
            .iter()
            .filter(|c| c.change_type.keeps_resource())
            .map(|c| normalize(&c.resource_id))
            .collect();

        let mut seen = HashSet::new();
        let mut state = Vec::new();

        for id in initial {
            let key = normalize(id);
            if (live.contains(&key) || confirmed.contains(&key)) && seen.insert(key) {
                state.push(id.clone());
            }
        }
        for change in what_if.iter().filter(|c| c.change_type.keeps_resource()) {
            if seen.insert(normalize(&change.resource_id)) {
                state.push(change.resource_id.clone());
            }
        }

        let baseline: HashSet<String> = initial.iter().map(|id| normalize(id)).collect();
        let is_drifted = seen != baseline;

        DriftRecord {
            declared_resource_ids: initial.to_vec(),
            live_resource_ids: Some(actual.to_vec()),
            changes: what_if.to_vec(),
            state,
            is_drifted,
        }
    }
}

fn normalize(id: &str) -> String {
    id.trim_end_matches('/').to_ascii_lowercase()
}
