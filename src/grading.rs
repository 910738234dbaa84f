use serde::{Deserialize, Serialize};

use crate::boundary::{BoundaryEntry, BoundaryTable};
use crate::gender::Sex;
use crate::model::Grade;

/// Why a value was left ungraded. These are expected outcomes, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnresolvedReason {
    ClassUnknown,
    SexUnknown,
    ValueOutOfRange,
    ValueMissing,
}

impl UnresolvedReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnresolvedReason::ClassUnknown => "class_unknown",
            UnresolvedReason::SexUnknown => "sex_unknown",
            UnresolvedReason::ValueOutOfRange => "value_out_of_range",
            UnresolvedReason::ValueMissing => "value_missing",
        }
    }

    pub fn parse(raw: &str) -> Option<UnresolvedReason> {
        match raw {
            "class_unknown" => Some(UnresolvedReason::ClassUnknown),
            "sex_unknown" => Some(UnresolvedReason::SexUnknown),
            "value_out_of_range" => Some(UnresolvedReason::ValueOutOfRange),
            "value_missing" => Some(UnresolvedReason::ValueMissing),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GradeResolution {
    Resolved(Grade),
    Unresolved(UnresolvedReason),
}

/// Maps a measured value to a grade using the (sex, class) slice of `table`.
///
/// Entries are tried from grade 5 down to grade 2 and the first inclusive
/// range containing `value` wins, so on overlapping ranges the higher grade
/// is returned. The template's direction plays no part here.
pub fn resolve_grade(
    value: f64,
    sex: Option<Sex>,
    class_number: Option<i64>,
    table: &BoundaryTable,
) -> GradeResolution {
    let Some(class_number) = class_number else {
        return GradeResolution::Unresolved(UnresolvedReason::ClassUnknown);
    };
    let Some(sex) = sex else {
        return GradeResolution::Unresolved(UnresolvedReason::SexUnknown);
    };

    let mut scoped: Vec<&BoundaryEntry> = table.scoped(sex, class_number).collect();
    // Stable: equal grades keep table order.
    scoped.sort_by(|a, b| b.grade.cmp(&a.grade));

    scoped
        .into_iter()
        .find(|e| e.contains(value))
        .map(|e| GradeResolution::Resolved(e.grade))
        .unwrap_or(GradeResolution::Unresolved(UnresolvedReason::ValueOutOfRange))
}

/// Leading digits of a group's class label: `"4А"` -> 4, `"10 B"` -> 10.
pub fn parse_class_number(label: &str) -> Option<i64> {
    let digits: String = label
        .trim()
        .chars()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    match digits.parse::<i64>() {
        Ok(n) if n >= 1 => Some(n),
        _ => None,
    }
}
