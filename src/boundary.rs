use serde::Serialize;

use crate::error::{CoreError, CoreResult};
use crate::gender::Sex;
use crate::model::{Grade, MeasurementInstance};

/// One inclusive value range that maps to a grade for a (sex, class) scope.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryEntry {
    pub grade: Grade,
    pub sex: Sex,
    pub class_number: i64,
    pub from_value: f64,
    pub to_value: f64,
}

impl BoundaryEntry {
    pub fn contains(&self, value: f64) -> bool {
        value >= self.from_value && value <= self.to_value
    }

    fn overlaps(&self, other: &BoundaryEntry) -> bool {
        self.from_value <= other.to_value && other.from_value <= self.to_value
    }

    /// Configuration-time checks. Overlap with sibling entries is not an
    /// error here; see [`check_table`].
    pub fn validate(&self) -> CoreResult<()> {
        if !self.from_value.is_finite() || !self.to_value.is_finite() {
            return Err(CoreError::Validation(
                "boundary values must be finite numbers".to_string(),
            ));
        }
        if self.from_value > self.to_value {
            return Err(CoreError::Validation(format!(
                "boundary for grade {} has fromValue {} greater than toValue {}",
                self.grade, self.from_value, self.to_value
            )));
        }
        if self.class_number < 1 {
            return Err(CoreError::Validation(format!(
                "classNumber must be >= 1, got {}",
                self.class_number
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BoundarySource {
    Template,
    Instance,
}

/// Immutable set of boundary entries taken from one source.
#[derive(Debug, Clone)]
pub struct BoundaryTable {
    source: BoundarySource,
    entries: Vec<BoundaryEntry>,
}

impl BoundaryTable {
    pub fn new(source: BoundarySource, entries: Vec<BoundaryEntry>) -> Self {
        Self { source, entries }
    }

    pub fn source(&self) -> BoundarySource {
        self.source
    }

    pub fn entries(&self) -> &[BoundaryEntry] {
        &self.entries
    }

    pub fn scoped(&self, sex: Sex, class_number: i64) -> impl Iterator<Item = &BoundaryEntry> {
        self.entries
            .iter()
            .filter(move |e| e.sex == sex && e.class_number == class_number)
    }

    fn scopes(&self) -> Vec<(Sex, i64)> {
        let mut out: Vec<(Sex, i64)> = self
            .entries
            .iter()
            .map(|e| (e.sex, e.class_number))
            .collect();
        out.sort();
        out.dedup();
        out
    }
}

/// Picks the instance's private table when it opted into custom boundaries,
/// otherwise the template defaults.
pub fn effective_table(
    instance: &MeasurementInstance,
    template_defaults: Vec<BoundaryEntry>,
    instance_overrides: Vec<BoundaryEntry>,
) -> BoundaryTable {
    if instance.use_custom_boundaries {
        BoundaryTable::new(BoundarySource::Instance, instance_overrides)
    } else {
        BoundaryTable::new(BoundarySource::Template, template_defaults)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryOverlap {
    pub sex: Sex,
    pub class_number: i64,
    /// The grade that wins for values in the shared range.
    pub winning_grade: Grade,
    pub shadowed_grade: Grade,
    pub from_value: f64,
    pub to_value: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MissingGrades {
    pub sex: Sex,
    pub class_number: i64,
    pub grades: Vec<Grade>,
}

/// Advisory findings for an edit screen. None of these block saving.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoundaryAdvisory {
    pub overlaps: Vec<BoundaryOverlap>,
    pub missing_grades: Vec<MissingGrades>,
}

impl BoundaryAdvisory {
    pub fn is_clean(&self) -> bool {
        self.overlaps.is_empty() && self.missing_grades.is_empty()
    }
}

pub fn check_table(table: &BoundaryTable) -> BoundaryAdvisory {
    let mut advisory = BoundaryAdvisory::default();
    for (sex, class_number) in table.scopes() {
        let mut scoped: Vec<&BoundaryEntry> = table.scoped(sex, class_number).collect();
        scoped.sort_by(|a, b| b.grade.cmp(&a.grade));

        for (i, a) in scoped.iter().enumerate() {
            for b in &scoped[i + 1..] {
                if a.overlaps(b) {
                    advisory.overlaps.push(BoundaryOverlap {
                        sex,
                        class_number,
                        winning_grade: a.grade,
                        shadowed_grade: b.grade,
                        from_value: a.from_value.max(b.from_value),
                        to_value: a.to_value.min(b.to_value),
                    });
                }
            }
        }

        let missing: Vec<Grade> = Grade::ALL
            .iter()
            .copied()
            .filter(|g| !scoped.iter().any(|e| e.grade == *g))
            .collect();
        if !missing.is_empty() {
            advisory.missing_grades.push(MissingGrades {
                sex,
                class_number,
                grades: missing,
            });
        }
    }
    advisory
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{AcademicYear, Period};
    use chrono::NaiveDate;

    fn entry(grade: u8, sex: Sex, class_number: i64, from: f64, to: f64) -> BoundaryEntry {
        BoundaryEntry {
            grade: Grade::new(grade).unwrap(),
            sex,
            class_number,
            from_value: from,
            to_value: to,
        }
    }

    fn sprint_table() -> BoundaryTable {
        BoundaryTable::new(
            BoundarySource::Template,
            vec![
                entry(5, Sex::Male, 4, 1.0, 6.2),
                entry(4, Sex::Male, 4, 6.3, 6.8),
                entry(3, Sex::Male, 4, 6.9, 7.2),
                entry(2, Sex::Male, 4, 7.3, 15.0),
            ],
        )
    }

    #[test]
    fn clean_table_has_no_advisories() {
        assert!(check_table(&sprint_table()).is_clean());
    }

    #[test]
    fn overlap_reports_winning_grade_and_shared_range() {
        let table = BoundaryTable::new(
            BoundarySource::Template,
            vec![
                entry(5, Sex::Male, 4, 1.0, 6.3),
                entry(4, Sex::Male, 4, 6.2, 6.8),
                entry(3, Sex::Male, 4, 6.9, 7.2),
                entry(2, Sex::Male, 4, 7.3, 15.0),
            ],
        );
        let advisory = check_table(&table);
        assert_eq!(advisory.overlaps.len(), 1);
        let o = &advisory.overlaps[0];
        assert_eq!(o.winning_grade, Grade::FIVE);
        assert_eq!(o.shadowed_grade, Grade::FOUR);
        assert_eq!(o.from_value, 6.2);
        assert_eq!(o.to_value, 6.3);
        assert!(advisory.missing_grades.is_empty());
    }

    #[test]
    fn missing_grades_are_listed_per_scope() {
        let table = BoundaryTable::new(
            BoundarySource::Template,
            vec![entry(5, Sex::Female, 3, 1.0, 6.5), entry(2, Sex::Female, 3, 6.6, 20.0)],
        );
        let advisory = check_table(&table);
        assert_eq!(
            advisory.missing_grades,
            vec![MissingGrades {
                sex: Sex::Female,
                class_number: 3,
                grades: vec![Grade::FOUR, Grade::THREE],
            }]
        );
    }

    #[test]
    fn validate_rejects_inverted_and_non_finite_ranges() {
        assert!(entry(5, Sex::Male, 4, 1.0, 6.2).validate().is_ok());
        assert!(entry(5, Sex::Male, 4, 6.2, 1.0).validate().is_err());
        assert!(entry(5, Sex::Male, 4, f64::NAN, 1.0).validate().is_err());
        assert!(entry(5, Sex::Male, 0, 1.0, 2.0).validate().is_err());
    }

    #[test]
    fn effective_table_follows_custom_flag() {
        let mut instance = MeasurementInstance {
            id: "i1".into(),
            template_id: "t1".into(),
            group_id: "g1".into(),
            test_date: NaiveDate::from_ymd_opt(2024, 9, 10).unwrap(),
            period: Period::StartOfYear,
            academic_year: AcademicYear::new(2024),
            name_override: None,
            unit_override: None,
            sex_scope_override: None,
            use_custom_boundaries: false,
        };
        let defaults = vec![entry(5, Sex::Male, 4, 1.0, 6.2)];
        let overrides = vec![entry(5, Sex::Male, 4, 1.0, 6.0)];

        let t = effective_table(&instance, defaults.clone(), overrides.clone());
        assert_eq!(t.source(), BoundarySource::Template);
        assert_eq!(t.entries()[0].to_value, 6.2);

        instance.use_custom_boundaries = true;
        let t = effective_table(&instance, defaults, overrides);
        assert_eq!(t.source(), BoundarySource::Instance);
        assert_eq!(t.entries()[0].to_value, 6.0);
    }
}
