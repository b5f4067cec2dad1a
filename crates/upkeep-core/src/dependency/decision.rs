//! Policy rules that turn candidates into decisions.

use std::cmp::Ordering;

use crate::domain::{DecisionKind, DependencyPolicy, PackageCandidate, UpdateDecision, VersionDelta};

/// Apply the ordered decision rules to one candidate, ignoring the cap.
///
/// Critical packages are always `ManualRequired`, even with an advisory.
pub fn decide(policy: &DependencyPolicy, candidate: &PackageCandidate) -> UpdateDecision {
    let (kind, reason) = if policy.is_critical(&candidate.name) {
        (
            DecisionKind::ManualRequired,
            "critical package requires manual approval".to_string(),
        )
    } else if candidate.has_security_advisory && policy.security_override {
        let severity = candidate
            .advisory_severity
            .map(|s| format!(" ({s})"))
            .unwrap_or_default();
        (
            DecisionKind::Approved,
            format!("security advisory{severity} overrides {} gate", candidate.version_delta),
        )
    } else {
        match candidate.version_delta {
            VersionDelta::Patch if policy.auto_update_patch => {
                (DecisionKind::Approved, "patch update allowed by policy".to_string())
            }
            VersionDelta::Minor if policy.auto_update_minor => {
                (DecisionKind::Approved, "minor update allowed by policy".to_string())
            }
            delta => (
                DecisionKind::Deferred,
                format!("{delta} updates are not automatic under policy"),
            ),
        }
    };

    UpdateDecision {
        candidate: candidate.clone(),
        kind,
        reason,
    }
}

/// Whether `decision` was approved by the security-override rule rather than
/// a patch/minor gate.
pub fn security_driven(policy: &DependencyPolicy, decision: &UpdateDecision) -> bool {
    decision.is_approved()
        && policy.security_override
        && decision.candidate.has_security_advisory
        && !policy.is_critical(&decision.candidate.name)
}

/// Order in which approvals claim the per-run cap: security-driven first,
/// then ascending package name.
pub fn approval_priority(
    policy: &DependencyPolicy,
    a: &UpdateDecision,
    b: &UpdateDecision,
) -> Ordering {
    security_driven(policy, b)
        .cmp(&security_driven(policy, a))
        .then_with(|| a.candidate.name.cmp(&b.candidate.name))
}

/// Decide every candidate and cap approvals at `max_updates_per_run`.
///
/// Approvals are ranked by [`approval_priority`]; those past the cap become
/// `Deferred`. Output keeps the input order.
pub fn decide_all(
    policy: &DependencyPolicy,
    candidates: &[PackageCandidate],
) -> Vec<UpdateDecision> {
    let mut decisions: Vec<UpdateDecision> =
        candidates.iter().map(|c| decide(policy, c)).collect();

    let mut approved: Vec<usize> = decisions
        .iter()
        .enumerate()
        .filter(|(_, d)| d.is_approved())
        .map(|(i, _)| i)
        .collect();

    approved.sort_by(|&a, &b| approval_priority(policy, &decisions[a], &decisions[b]));

    let cap = policy.max_updates_per_run;
    for &index in approved.iter().skip(cap) {
        let decision = &mut decisions[index];
        decision.kind = DecisionKind::Deferred;
        decision.reason = format!("exceeds max_updates_per_run ({cap})");
    }

    decisions
}
