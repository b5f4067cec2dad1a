//! Security score derivation.

use crate::domain::ScanFinding;

pub const MAX_SCORE: u8 = 100;

/// Start at 100, subtract each finding's severity penalty, floor at zero.
///
/// Depends only on the multiset of severities, so any ordering of the same
/// findings scores identically.
pub fn overall_score(findings: &[ScanFinding]) -> u8 {
    let penalty: u32 = findings.iter().map(|f| f.severity.penalty()).sum();
    u32::from(MAX_SCORE).saturating_sub(penalty) as u8
}
