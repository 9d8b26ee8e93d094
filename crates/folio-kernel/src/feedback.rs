//! Regeneration feedback derived from a failing verdict.
//!
//! The first attempt gets general guidance. Later attempts list the concrete
//! items that still fail, and never more of them than the attempt before, so
//! each round asks the generator for a narrower correction.

use crate::finding::{FailureClass, Finding};
use crate::structure::StructuralError;
use crate::verdict::PageVerdict;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FeedbackScope {
    General,
    Specific,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Feedback {
    pub attempt: u32,
    pub scope: FeedbackScope,
    pub instructions: Vec<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub missing: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, usize>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub structural_errors: Vec<StructuralError>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub boundary: Vec<Finding>,
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
enum ItemKey {
    Structural(String),
    Boundary(String),
    Missing(String),
    Extra(String),
}

enum Item {
    Structural(StructuralError),
    Boundary(Finding),
    Missing(String, usize),
    Extra(String, usize),
}

impl Item {
    fn key(&self) -> ItemKey {
        match self {
            Self::Structural(e) => ItemKey::Structural(structural_key(e)),
            Self::Boundary(f) => ItemKey::Boundary(f.finding_id.clone()),
            Self::Missing(token, _) => ItemKey::Missing(token.clone()),
            Self::Extra(token, _) => ItemKey::Extra(token.clone()),
        }
    }
}

fn structural_key(error: &StructuralError) -> String {
    match error.location {
        Some(at) => format!("{}@{at}", error.code),
        None => error.code.to_string(),
    }
}

impl Feedback {
    pub fn item_count(&self) -> usize {
        self.missing.len() + self.extra.len() + self.structural_errors.len() + self.boundary.len()
    }

    fn keys(&self) -> BTreeSet<ItemKey> {
        let mut keys = BTreeSet::new();
        keys.extend(self.structural_errors.iter().map(|e| ItemKey::Structural(structural_key(e))));
        keys.extend(self.boundary.iter().map(|f| ItemKey::Boundary(f.finding_id.clone())));
        keys.extend(self.missing.keys().map(|t| ItemKey::Missing(t.clone())));
        keys.extend(self.extra.keys().map(|t| ItemKey::Extra(t.clone())));
        keys
    }
}

/// Build feedback for regeneration attempt `attempt` (1-based) from the
/// verdict it has to improve on.
pub fn build_feedback(
    attempt: u32,
    previous: &PageVerdict,
    prior: Option<&Feedback>,
    max_items: usize,
) -> Feedback {
    if attempt <= 1 {
        return general(attempt, previous);
    }

    let items = failing_items(previous);
    let (candidates, limit) = match prior {
        Some(prior) if prior.scope == FeedbackScope::Specific => {
            let prior_keys = prior.keys();
            let limit = prior.item_count().saturating_sub(1).max(1).min(max_items);
            let (still, fresh): (Vec<_>, Vec<_>) =
                items.into_iter().partition(|item| prior_keys.contains(&item.key()));
            (if still.is_empty() { fresh } else { still }, limit)
        }
        _ => (items, max_items),
    };

    let mut feedback = Feedback {
        attempt,
        scope: FeedbackScope::Specific,
        instructions: Vec::new(),
        missing: BTreeMap::new(),
        extra: BTreeMap::new(),
        structural_errors: Vec::new(),
        boundary: Vec::new(),
    };
    for item in candidates.into_iter().take(limit) {
        match item {
            Item::Structural(e) => feedback.structural_errors.push(e),
            Item::Boundary(f) => feedback.boundary.push(f),
            Item::Missing(token, n) => {
                feedback.missing.insert(token, n);
            }
            Item::Extra(token, n) => {
                feedback.extra.insert(token, n);
            }
        }
    }
    feedback.instructions = specific_instructions(&feedback, previous);
    feedback
}

fn general(attempt: u32, previous: &PageVerdict) -> Feedback {
    let mut instructions = vec![
        "Reproduce all of the reference text for this page; do not summarize or omit passages."
            .to_string(),
        "Do not add text that does not appear in the reference.".to_string(),
        "Keep the required page markers and a well-formed heading hierarchy.".to_string(),
    ];
    if let Some(first) = previous.findings.iter().find(|f| f.is_error()) {
        instructions.push(format!("Previous output failed: {}", first.message));
    }
    Feedback {
        attempt,
        scope: FeedbackScope::General,
        instructions,
        missing: BTreeMap::new(),
        extra: BTreeMap::new(),
        structural_errors: Vec::new(),
        boundary: Vec::new(),
    }
}

/// Failing items in priority order: structure, boundary, then missing and
/// extra tokens by descending multiplicity.
fn failing_items(verdict: &PageVerdict) -> Vec<Item> {
    let mut items: Vec<Item> = verdict
        .structural_errors
        .iter()
        .cloned()
        .map(Item::Structural)
        .collect();
    items.extend(
        verdict
            .findings
            .iter()
            .filter(|f| {
                matches!(
                    f.class,
                    FailureClass::BoundaryMissingOpening | FailureClass::BoundaryMissingClosing
                )
            })
            .cloned()
            .map(Item::Boundary),
    );
    items.extend(by_multiplicity(&verdict.missing).map(|(t, n)| Item::Missing(t, n)));
    items.extend(by_multiplicity(&verdict.extra).map(|(t, n)| Item::Extra(t, n)));
    items
}

fn by_multiplicity(tokens: &BTreeMap<String, usize>) -> impl Iterator<Item = (String, usize)> {
    let mut sorted: Vec<(String, usize)> = tokens.iter().map(|(t, n)| (t.clone(), *n)).collect();
    sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    sorted.into_iter()
}

fn specific_instructions(feedback: &Feedback, previous: &PageVerdict) -> Vec<String> {
    let mut out = Vec::new();
    if !feedback.structural_errors.is_empty() {
        out.push("Fix each listed structural error at its location.".to_string());
    }
    if !feedback.boundary.is_empty() {
        out.push("Fix the listed unit boundary problems.".to_string());
    }
    if !feedback.missing.is_empty() {
        out.push(
            "Add the reference words listed in `missing`, with the listed number of occurrences."
                .to_string(),
        );
    }
    if !feedback.extra.is_empty() {
        out.push("Remove the words listed in `extra`; they are not in the reference.".to_string());
    }
    if out.is_empty() {
        let reason = previous
            .findings
            .iter()
            .find(|f| f.is_error())
            .map(|f| f.message.as_str())
            .unwrap_or("verification failed");
        out.push(format!("Regenerate the page; previous attempt failed: {reason}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coverage::{CoverageThresholds, compute_coverage};
    use crate::structure::{StructureRules, validate_structure};
    use crate::verdict::build_verdict;

    fn verdict(reference: &str, generated: &str) -> PageVerdict {
        let artifact = format!(
            "<div class=\"page-container\"><main class=\"page-content\"><p>{generated}</p></main></div>"
        );
        build_verdict(
            "u1/page-0001",
            &compute_coverage(reference, generated),
            &CoverageThresholds::default(),
            None,
            &validate_structure(&artifact, &StructureRules::default()),
        )
    }

    #[test]
    fn first_attempt_is_general() {
        let previous = verdict("a b c d e f g h i j", "a b");
        let feedback = build_feedback(1, &previous, None, 40);
        assert_eq!(feedback.scope, FeedbackScope::General);
        assert_eq!(feedback.item_count(), 0);
        assert!(feedback.instructions.iter().any(|i| i.contains("Previous output failed")));
    }

    #[test]
    fn later_attempts_list_failing_items() {
        let previous = verdict("alpha beta gamma delta delta epsilon zeta eta theta iota", "alpha");
        let feedback = build_feedback(2, &previous, None, 40);
        assert_eq!(feedback.scope, FeedbackScope::Specific);
        assert_eq!(feedback.missing.get("delta"), Some(&2));
        assert_eq!(feedback.item_count(), 8);
    }

    #[test]
    fn specific_feedback_narrows_every_round() {
        let first = verdict("alpha beta gamma delta epsilon zeta eta theta iota kappa", "alpha");
        let second = build_feedback(2, &first, None, 40);
        assert_eq!(second.item_count(), 9);

        // Same failure again: the still-failing set shrinks by at least one.
        let third = build_feedback(3, &first, Some(&second), 40);
        assert!(third.item_count() < second.item_count());
        assert!(third.missing.keys().all(|k| second.missing.contains_key(k)));
    }

    #[test]
    fn cap_limits_items_by_priority() {
        let previous = verdict("a a a b c", "x");
        let feedback = build_feedback(2, &previous, None, 2);
        assert_eq!(feedback.item_count(), 2);
        assert_eq!(feedback.missing.get("a"), Some(&3));
    }
}
