//! Side-by-side comparison of several mapped sites by page-type coverage

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

/// Page-type overlap between mapped domains
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompareResult {
    pub domains: Vec<String>,
    /// Page types present on every domain, ascending
    pub common_page_types: Vec<u8>,
    /// Page types seen on one domain and no other
    pub unique_per_domain: BTreeMap<String, Vec<u8>>,
    /// Jaccard similarity of page-type sets, rounded to 3 decimals
    pub similarity_matrix: BTreeMap<String, BTreeMap<String, f64>>,
}

impl CompareResult {
    pub fn similarity(&self, a: &str, b: &str) -> Option<f64> {
        self.similarity_matrix.get(a)?.get(b).copied()
    }
}

impl fmt::Display for CompareResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CompareResult(domains={:?}, common_types={})",
            self.domains,
            self.common_page_types.len()
        )
    }
}

fn jaccard(a: &BTreeSet<u8>, b: &BTreeSet<u8>) -> f64 {
    let union = a.union(b).count();
    if union == 0 {
        return 0.0;
    }
    let overlap = a.intersection(b).count();
    (overlap as f64 / union as f64 * 1000.0).round() / 1000.0
}

/// Build the comparison from each domain's observed page types
pub(crate) fn compare_page_types(sites: &[(String, BTreeSet<u8>)]) -> CompareResult {
    let common = sites
        .split_first()
        .map(|((_, first), rest)| {
            rest.iter().fold(first.clone(), |acc, (_, types)| &acc & types)
        })
        .unwrap_or_default();

    let mut unique_per_domain = BTreeMap::new();
    let mut similarity_matrix = BTreeMap::new();
    for (i, (domain, types)) in sites.iter().enumerate() {
        let others: BTreeSet<u8> = sites
            .iter()
            .enumerate()
            .filter(|(j, _)| *j != i)
            .flat_map(|(_, (_, t))| t.iter().copied())
            .collect();
        unique_per_domain.insert(domain.clone(), types.difference(&others).copied().collect());

        let row: BTreeMap<String, f64> = sites
            .iter()
            .enumerate()
            .map(|(j, (other, other_types))| {
                let score = if i == j { 1.0 } else { jaccard(types, other_types) };
                (other.clone(), score)
            })
            .collect();
        similarity_matrix.insert(domain.clone(), row);
    }

    CompareResult {
        domains: sites.iter().map(|(domain, _)| domain.clone()).collect(),
        common_page_types: common.into_iter().collect(),
        unique_per_domain,
        similarity_matrix,
    }
}
