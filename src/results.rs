use chrono::NaiveDate;

use crate::boundary::BoundaryTable;
use crate::error::{CoreError, CoreResult};
use crate::gender::Sex;
use crate::grading::{resolve_grade, GradeResolution, UnresolvedReason};
use crate::model::{GradeCode, GradeSource, ResultRecord};

/// One submission for a (student, instance) pair or an ad-hoc entry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Submission {
    pub value: Option<f64>,
    /// `Some(GradeCode::Unset)` clears a previous manual grade.
    pub explicit_grade: Option<GradeCode>,
}

/// What the resolver needs to know about the student and instance.
#[derive(Debug, Clone, Copy)]
pub struct GradingInput<'a> {
    pub sex: Option<Sex>,
    pub class_number: Option<i64>,
    pub table: &'a BoundaryTable,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ResultWrite {
    pub value: Option<f64>,
    pub grade: GradeCode,
    pub source: GradeSource,
    pub unresolved_reason: Option<UnresolvedReason>,
    pub clears_override: bool,
}

pub fn prepare_write(submission: &Submission, input: &GradingInput<'_>) -> CoreResult<ResultWrite> {
    if let Some(v) = submission.value {
        if !v.is_finite() {
            return Err(CoreError::Validation("value must be a finite number".to_string()));
        }
    }

    if let Some(code) = submission.explicit_grade {
        if code != GradeCode::Unset {
            return Ok(ResultWrite {
                value: submission.value,
                grade: code,
                source: GradeSource::Manual,
                unresolved_reason: None,
                clears_override: false,
            });
        }
    }
    let clears_override = submission.explicit_grade == Some(GradeCode::Unset);

    let resolution = match submission.value {
        Some(v) => resolve_grade(v, input.sex, input.class_number, input.table),
        None => GradeResolution::Unresolved(UnresolvedReason::ValueMissing),
    };
    let (grade, unresolved_reason) = match resolution {
        GradeResolution::Resolved(g) => (GradeCode::Grade(g), None),
        GradeResolution::Unresolved(reason) => (GradeCode::Unset, Some(reason)),
    };
    Ok(ResultWrite {
        value: submission.value,
        grade,
        source: GradeSource::Auto,
        unresolved_reason,
        clears_override,
    })
}

/// Identity of the record a write targets. `id` is only used when no record
/// exists yet.
#[derive(Debug, Clone)]
pub struct RecordIdentity {
    pub id: String,
    pub student_id: String,
    pub instance_id: Option<String>,
    pub template_id: String,
    pub test_date: Option<NaiveDate>,
}

/// Applies a write on top of the stored record for the same pair.
///
/// The value always follows the latest write. A stored manual grade is kept
/// against automatic writes until a write explicitly clears it.
pub fn merge_write(
    existing: Option<ResultRecord>,
    write: ResultWrite,
    identity: RecordIdentity,
    now: String,
) -> ResultRecord {
    match existing {
        Some(mut rec) => {
            let keep_manual = rec.grade_source == GradeSource::Manual
                && write.source == GradeSource::Auto
                && !write.clears_override;
            rec.value = write.value;
            if !keep_manual {
                rec.grade = write.grade;
                rec.grade_source = write.source;
                rec.unresolved_reason = write.unresolved_reason;
            }
            rec.test_date = identity.test_date.or(rec.test_date);
            rec.updated_at = now;
            rec
        }
        None => ResultRecord {
            id: identity.id,
            student_id: identity.student_id,
            instance_id: identity.instance_id,
            template_id: identity.template_id,
            test_date: identity.test_date,
            value: write.value,
            grade: write.grade,
            grade_source: write.source,
            unresolved_reason: write.unresolved_reason,
            updated_at: now,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::boundary::{BoundaryEntry, BoundarySource};
    use crate::model::Grade;
    use std::collections::HashMap;

    fn table() -> BoundaryTable {
        let e = |g: u8, from: f64, to: f64| BoundaryEntry {
            grade: Grade::new(g).unwrap(),
            sex: Sex::Male,
            class_number: 4,
            from_value: from,
            to_value: to,
        };
        BoundaryTable::new(
            BoundarySource::Template,
            vec![e(5, 1.0, 6.2), e(4, 6.3, 6.8), e(3, 6.9, 7.2), e(2, 7.3, 15.0)],
        )
    }

    fn identity(id: &str) -> RecordIdentity {
        RecordIdentity {
            id: id.to_string(),
            student_id: "s1".to_string(),
            instance_id: Some("i1".to_string()),
            template_id: "t1".to_string(),
            test_date: NaiveDate::from_ymd_opt(2024, 9, 10),
        }
    }

    /// Minimal in-memory store keyed like the `results` table.
    #[derive(Default)]
    struct Book {
        rows: HashMap<(String, String), ResultRecord>,
        next_id: usize,
    }

    impl Book {
        fn submit(&mut self, sub: Submission, input: &GradingInput<'_>) -> ResultRecord {
            let write = prepare_write(&sub, input).unwrap();
            let key = ("s1".to_string(), "i1".to_string());
            self.next_id += 1;
            let existing = self.rows.get(&key).cloned();
            let rec = merge_write(
                existing,
                write,
                identity(&format!("r{}", self.next_id)),
                format!("t{}", self.next_id),
            );
            self.rows.insert(key, rec.clone());
            rec
        }
    }

    #[test]
    fn automatic_grade_and_unresolved_sentinel() {
        let t = table();
        let input = GradingInput {
            sex: Some(Sex::Male),
            class_number: Some(4),
            table: &t,
        };
        let w = prepare_write(&Submission { value: Some(6.8), explicit_grade: None }, &input).unwrap();
        assert_eq!(w.grade, GradeCode::Grade(Grade::FOUR));
        assert_eq!(w.source, GradeSource::Auto);

        let w = prepare_write(&Submission { value: Some(15.1), explicit_grade: None }, &input).unwrap();
        assert_eq!(w.grade, GradeCode::Unset);
        assert_eq!(w.unresolved_reason, Some(UnresolvedReason::ValueOutOfRange));

        let w = prepare_write(&Submission::default(), &input).unwrap();
        assert_eq!(w.unresolved_reason, Some(UnresolvedReason::ValueMissing));
    }

    #[test]
    fn explicit_grade_is_stored_verbatim() {
        let t = table();
        let input = GradingInput {
            sex: None,
            class_number: None,
            table: &t,
        };
        let w = prepare_write(
            &Submission {
                value: Some(6.8),
                explicit_grade: Some(GradeCode::Exempt),
            },
            &input,
        )
        .unwrap();
        assert_eq!(w.grade, GradeCode::Exempt);
        assert_eq!(w.source, GradeSource::Manual);
        assert_eq!(w.unresolved_reason, None);
    }

    #[test]
    fn non_finite_values_are_rejected() {
        let t = table();
        let input = GradingInput {
            sex: Some(Sex::Male),
            class_number: Some(4),
            table: &t,
        };
        let res = prepare_write(
            &Submission {
                value: Some(f64::INFINITY),
                explicit_grade: None,
            },
            &input,
        );
        assert!(matches!(res, Err(CoreError::Validation(_))));
    }

    #[test]
    fn second_submission_updates_the_same_record() {
        let t = table();
        let input = GradingInput {
            sex: Some(Sex::Male),
            class_number: Some(4),
            table: &t,
        };
        let mut book = Book::default();
        let first = book.submit(Submission { value: Some(6.8), explicit_grade: None }, &input);
        let second = book.submit(Submission { value: Some(6.1), explicit_grade: None }, &input);

        assert_eq!(book.rows.len(), 1);
        assert_eq!(second.id, first.id);
        assert_eq!(second.value, Some(6.1));
        assert_eq!(second.grade, GradeCode::Grade(Grade::FIVE));
    }

    #[test]
    fn manual_grade_survives_automatic_resubmission() {
        let t = table();
        let input = GradingInput {
            sex: Some(Sex::Male),
            class_number: Some(4),
            table: &t,
        };
        let mut book = Book::default();
        book.submit(
            Submission {
                value: Some(6.8),
                explicit_grade: Some(GradeCode::Grade(Grade::THREE)),
            },
            &input,
        );
        let rec = book.submit(Submission { value: Some(6.8), explicit_grade: None }, &input);
        assert_eq!(rec.grade, GradeCode::Grade(Grade::THREE));
        assert_eq!(rec.grade_source, GradeSource::Manual);

        let rec = book.submit(Submission { value: Some(6.0), explicit_grade: None }, &input);
        assert_eq!(rec.value, Some(6.0));
        assert_eq!(rec.grade, GradeCode::Grade(Grade::THREE));
        assert_eq!(book.rows.len(), 1);
    }

    #[test]
    fn unset_sentinel_clears_manual_grade() {
        let t = table();
        let input = GradingInput {
            sex: Some(Sex::Male),
            class_number: Some(4),
            table: &t,
        };
        let mut book = Book::default();
        book.submit(
            Submission {
                value: Some(6.8),
                explicit_grade: Some(GradeCode::Absent),
            },
            &input,
        );
        let rec = book.submit(
            Submission {
                value: Some(6.8),
                explicit_grade: Some(GradeCode::Unset),
            },
            &input,
        );
        assert_eq!(rec.grade, GradeCode::Grade(Grade::FOUR));
        assert_eq!(rec.grade_source, GradeSource::Auto);
    }
}
