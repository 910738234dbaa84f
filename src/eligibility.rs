use serde::Serialize;

use crate::model::{MeasurementInstance, SexScope, Student, Template};

/// Resolves the sex restriction in a fixed order: the instance's own
/// override, then the template's scope, then `ALL`.
pub fn effective_sex_scope(
    instance_override: Option<SexScope>,
    template_scope: Option<SexScope>,
) -> SexScope {
    instance_override.or(template_scope).unwrap_or(SexScope::All)
}

pub fn instance_sex_scope(instance: &MeasurementInstance, template: &Template) -> SexScope {
    effective_sex_scope(instance.sex_scope_override, template.sex_scope)
}

/// Active students the scope admits. Withdrawn students are never eligible.
pub fn eligible_students(scope: SexScope, roster: &[Student]) -> Vec<&Student> {
    roster
        .iter()
        .filter(|s| s.active && scope.admits(s.sex))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EligibilityCounts {
    pub active: usize,
    pub eligible: usize,
    /// Active students with no recognised sex; only `ALL` admits them.
    pub unknown_sex: usize,
    pub withdrawn: usize,
}

pub fn eligibility_counts(scope: SexScope, roster: &[Student]) -> EligibilityCounts {
    let mut counts = EligibilityCounts::default();
    for s in roster {
        if !s.active {
            counts.withdrawn += 1;
            continue;
        }
        counts.active += 1;
        if s.sex.is_none() {
            counts.unknown_sex += 1;
        }
        if scope.admits(s.sex) {
            counts.eligible += 1;
        }
    }
    counts
}
