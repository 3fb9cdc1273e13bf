//! Disruption budget admission.
//!
//! Every budget whose selector matches the pod gets a veto:
//!
//! - `disruptionsAllowed <= 0` denies outright
//! - with `minAvailable` set, removing one more pod must not take
//!   `currentHealthy` below it
//!
//! Budgets are a snapshot taken once per campaign. They lag behind deletions,
//! so a budget can admit a pod that a fresher read would refuse.

use k8s_openapi::api::core::v1::Pod;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::{Selector, SelectorExt};
use kube::ResourceExt;
use tracing::debug;

use crate::ReconcileError;

/// Outcome of checking a pod against a budget set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BudgetVerdict {
    Allowed,

    NoDisruptionsAllowed {
        budget: String,
        disruptions_allowed: i32,
    },

    BelowMinAvailable {
        budget: String,
        current_healthy: i32,
        min_available: i32,
    },
}

impl BudgetVerdict {
    pub fn is_allowed(&self) -> bool {
        matches!(self, Self::Allowed)
    }
}

/// Check a pod against every budget; the first denial wins.
pub fn evaluate(pod: &Pod, budgets: &[PodDisruptionBudget]) -> BudgetVerdict {
    budgets
        .iter()
        .filter(|budget| selects(budget, pod))
        .map(check_budget)
        .find(|verdict| !verdict.is_allowed())
        .unwrap_or(BudgetVerdict::Allowed)
}

/// Whether the pod may be removed without violating any matching budget.
pub fn can_remove(pod: &Pod, budgets: &[PodDisruptionBudget]) -> bool {
    let verdict = evaluate(pod, budgets);
    if !verdict.is_allowed() {
        debug!(pod = %pod.name_any(), ?verdict, "Disruption budget denies removal");
    }
    verdict.is_allowed()
}

/// Whether the budget's selector matches the pod's labels.
///
/// A budget without a selector, or with one that cannot be parsed, matches
/// nothing.
pub fn selects(budget: &PodDisruptionBudget, pod: &Pod) -> bool {
    match budget_selector(budget) {
        Ok(Some(selector)) => selector.matches(pod.labels()),
        Ok(None) => false,
        Err(e) => {
            debug!(error = %e, "Ignoring disruption budget");
            false
        }
    }
}

fn budget_selector(budget: &PodDisruptionBudget) -> Result<Option<Selector>, ReconcileError> {
    let Some(label_selector) = budget.spec.as_ref().and_then(|s| s.selector.clone()) else {
        return Ok(None);
    };
    Selector::try_from(label_selector)
        .map(Some)
        .map_err(|e| ReconcileError::InvalidSelector {
            budget: budget.name_any(),
            reason: e.to_string(),
        })
}

fn check_budget(budget: &PodDisruptionBudget) -> BudgetVerdict {
    let status = budget.status.clone().unwrap_or_default();

    if status.disruptions_allowed <= 0 {
        return BudgetVerdict::NoDisruptionsAllowed {
            budget: budget.name_any(),
            disruptions_allowed: status.disruptions_allowed,
        };
    }

    if let Some(min_available) = min_available(budget) {
        if status.current_healthy - 1 < min_available {
            return BudgetVerdict::BelowMinAvailable {
                budget: budget.name_any(),
                current_healthy: status.current_healthy,
                min_available,
            };
        }
    }

    BudgetVerdict::Allowed
}

/// Resolved `minAvailable`, if the budget sets one.
///
/// Percentages resolve against `expectedPods`, rounding up. A malformed
/// value resolves to zero, which never denies.
pub fn min_available(budget: &PodDisruptionBudget) -> Option<i32> {
    let value = budget.spec.as_ref()?.min_available.as_ref()?;
    let expected = budget.status.as_ref().map_or(0, |s| s.expected_pods);

    Some(scaled_value(value, expected, true).unwrap_or_else(|e| {
        debug!(budget = %budget.name_any(), error = %e, "Treating minAvailable as 0");
        0
    }))
}

/// Resolve an int-or-percent against `total`.
pub fn scaled_value(value: &IntOrString, total: i32, round_up: bool) -> Result<i32, ReconcileError> {
    match value {
        IntOrString::Int(n) => Ok(*n),
        IntOrString::String(s) => {
            let percent: i64 = s
                .strip_suffix('%')
                .and_then(|p| p.trim().parse().ok())
                .ok_or_else(|| ReconcileError::InvalidThreshold(s.clone()))?;
            let scaled = percent * i64::from(total);
            let resolved = if round_up {
                (scaled + 99).div_euclid(100)
            } else {
                scaled.div_euclid(100)
            };
            i32::try_from(resolved).map_err(|_| ReconcileError::InvalidThreshold(s.clone()))
        }
    }
}

#[cfg(test)]
mod tests {
    use confroll_testing::{BudgetBuilder, PodBuilder};
    use rstest::rstest;

    use super::*;

    fn web_pod() -> Pod {
        PodBuilder::new("default", "web-1")
            .label("app", "web")
            .build()
    }

    #[test]
    fn test_no_budgets_allows() {
        assert!(can_remove(&web_pod(), &[]));
    }

    #[test]
    fn test_unmatched_budget_allows() {
        let budget = BudgetBuilder::new("default", "db-pdb")
            .match_label("app", "db")
            .disruptions_allowed(0)
            .build();

        assert!(can_remove(&web_pod(), &[budget]));
    }

    #[test]
    fn test_zero_disruptions_denies_regardless_of_min_available() {
        let budget = BudgetBuilder::new("default", "web-pdb")
            .match_label("app", "web")
            .disruptions_allowed(0)
            .min_available(IntOrString::Int(0))
            .current_healthy(10)
            .build();

        assert_eq!(
            evaluate(&web_pod(), &[budget]),
            BudgetVerdict::NoDisruptionsAllowed {
                budget: "web-pdb".to_string(),
                disruptions_allowed: 0,
            }
        );
    }

    #[test]
    fn test_negative_disruptions_denies() {
        let budget = BudgetBuilder::new("default", "web-pdb")
            .match_label("app", "web")
            .disruptions_allowed(-1)
            .build();

        assert!(!can_remove(&web_pod(), &[budget]));
    }

    #[rstest]
    #[case::above_threshold(5, IntOrString::Int(3), 10, true)]
    #[case::at_threshold(4, IntOrString::Int(3), 10, true)]
    #[case::would_breach(3, IntOrString::Int(3), 10, false)]
    #[case::percent_admits(6, IntOrString::String("50%".into()), 10, true)]
    #[case::percent_denies(5, IntOrString::String("50%".into()), 10, false)]
    #[case::percent_rounds_up(3, IntOrString::String("25%".into()), 10, false)]
    fn test_min_available(
        #[case] current_healthy: i32,
        #[case] min_available: IntOrString,
        #[case] expected_pods: i32,
        #[case] allowed: bool,
    ) {
        let budget = BudgetBuilder::new("default", "web-pdb")
            .match_label("app", "web")
            .disruptions_allowed(1)
            .min_available(min_available)
            .current_healthy(current_healthy)
            .expected_pods(expected_pods)
            .build();

        assert_eq!(can_remove(&web_pod(), &[budget]), allowed);
    }

    #[test]
    fn test_every_matching_budget_must_admit() {
        let lenient = BudgetBuilder::new("default", "lenient")
            .match_label("app", "web")
            .disruptions_allowed(3)
            .build();
        let strict = BudgetBuilder::new("default", "strict")
            .match_label("app", "web")
            .disruptions_allowed(1)
            .min_available(IntOrString::Int(2))
            .current_healthy(2)
            .build();

        assert!(can_remove(&web_pod(), std::slice::from_ref(&lenient)));
        assert_eq!(
            evaluate(&web_pod(), &[lenient, strict]),
            BudgetVerdict::BelowMinAvailable {
                budget: "strict".to_string(),
                current_healthy: 2,
                min_available: 2,
            }
        );
    }

    #[test]
    fn test_budget_without_selector_matches_nothing() {
        let budget = BudgetBuilder::new("default", "no-selector")
            .without_selector()
            .disruptions_allowed(0)
            .build();

        assert!(can_remove(&web_pod(), &[budget]));
    }

    #[test]
    fn test_empty_selector_matches_everything() {
        let budget = BudgetBuilder::new("default", "all")
            .disruptions_allowed(0)
            .build();

        assert!(!can_remove(&web_pod(), &[budget]));
    }

    #[test]
    fn test_budget_without_status_denies() {
        let budget = BudgetBuilder::new("default", "fresh")
            .match_label("app", "web")
            .without_status()
            .build();

        assert!(!can_remove(&web_pod(), &[budget]));
    }

    #[rstest]
    #[case(IntOrString::Int(3), 10, 3)]
    #[case(IntOrString::String("50%".into()), 10, 5)]
    #[case(IntOrString::String("30%".into()), 10, 3)]
    #[case(IntOrString::String("33%".into()), 10, 4)]
    #[case(IntOrString::String("100%".into()), 7, 7)]
    fn test_scaled_value_rounds_up(#[case] value: IntOrString, #[case] total: i32, #[case] expected: i32) {
        assert_eq!(scaled_value(&value, total, true).unwrap(), expected);
    }

    #[test]
    fn test_scaled_value_rounds_down() {
        let value = IntOrString::String("33%".into());
        assert_eq!(scaled_value(&value, 10, false).unwrap(), 3);
    }

    #[test]
    fn test_malformed_threshold() {
        assert!(scaled_value(&IntOrString::String("half".into()), 10, true).is_err());
        assert!(scaled_value(&IntOrString::String("3".into()), 10, true).is_err());

        let budget = BudgetBuilder::new("default", "web-pdb")
            .match_label("app", "web")
            .disruptions_allowed(1)
            .min_available(IntOrString::String("lots".into()))
            .current_healthy(1)
            .build();
        assert_eq!(min_available(&budget), Some(0));
        assert!(can_remove(&web_pod(), &[budget]));
    }
}
