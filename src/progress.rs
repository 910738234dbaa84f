use chrono::NaiveDate;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

use crate::eligibility::{eligible_students, instance_sex_scope};
use crate::model::{
    AcademicYear, Direction, GradeCode, Group, MeasurementInstance, Period, ResultRecord, SexScope,
    Student, Template,
};

/// Deltas closer to zero than this count as unchanged.
const DELTA_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressOptions {
    pub include_intermediate: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Improved,
    Worsened,
    Unchanged,
    NoData,
}

pub fn compute_delta(start: Option<f64>, end: Option<f64>) -> Option<f64> {
    match (start, end) {
        (Some(s), Some(e)) => Some(e - s),
        _ => None,
    }
}

/// For `LOWER_IS_BETTER` a negative delta is an improvement.
pub fn classify(direction: Direction, delta: Option<f64>) -> Outcome {
    let Some(d) = delta else {
        return Outcome::NoData;
    };
    if d.abs() < DELTA_EPSILON {
        return Outcome::Unchanged;
    }
    let grew = d > 0.0;
    match (direction, grew) {
        (Direction::HigherIsBetter, true) | (Direction::LowerIsBetter, false) => Outcome::Improved,
        _ => Outcome::Worsened,
    }
}

/// Already-fetched rows the aggregator works over.
#[derive(Debug, Clone, Copy)]
pub struct ProgressData<'a> {
    pub templates: &'a [Template],
    pub instances: &'a [MeasurementInstance],
    pub students: &'a [Student],
    pub results: &'a [ResultRecord],
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InterimPoint {
    pub instance_id: String,
    pub name: Option<String>,
    pub test_date: NaiveDate,
    pub value: Option<f64>,
    pub grade: GradeCode,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentProgress {
    pub student_id: String,
    pub full_name: String,
    pub start_value: Option<f64>,
    pub end_value: Option<f64>,
    pub start_grade: GradeCode,
    pub end_grade: GradeCode,
    pub delta: Option<f64>,
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub intermediate: Vec<InterimPoint>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeCounts {
    pub improved_count: usize,
    pub worsened_count: usize,
    pub same_count: usize,
    pub no_data_count: usize,
}

impl OutcomeCounts {
    fn add(&mut self, outcome: Outcome) {
        match outcome {
            Outcome::Improved => self.improved_count += 1,
            Outcome::Worsened => self.worsened_count += 1,
            Outcome::Unchanged => self.same_count += 1,
            Outcome::NoData => self.no_data_count += 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TemplateProgress {
    pub template_id: String,
    pub template_name: String,
    pub unit: String,
    pub direction: Direction,
    pub sex_scope: SexScope,
    pub start_instance_id: String,
    pub end_instance_id: String,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub rows: Vec<StudentProgress>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<OutcomeCounts>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ReportScope {
    Group {
        #[serde(rename = "groupId")]
        group_id: String,
    },
    Student {
        #[serde(rename = "studentId")]
        student_id: String,
        #[serde(rename = "groupId")]
        group_id: String,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressReport {
    pub academic_year: AcademicYear,
    pub scope: ReportScope,
    pub templates: Vec<TemplateProgress>,
}

struct TemplatePair<'a> {
    template: &'a Template,
    start: &'a MeasurementInstance,
    end: &'a MeasurementInstance,
    interim: Vec<&'a MeasurementInstance>,
}

fn earliest<'a>(
    instances: &[&'a MeasurementInstance],
    period: Period,
) -> Option<&'a MeasurementInstance> {
    instances
        .iter()
        .copied()
        .filter(|i| i.period == period)
        .min_by(|a, b| a.test_date.cmp(&b.test_date).then_with(|| a.id.cmp(&b.id)))
}

/// Templates that have both a start and an end instance for the group and
/// year. One-sided templates are dropped here.
fn pair_instances<'a>(
    group_id: &str,
    year: AcademicYear,
    data: &ProgressData<'a>,
    opts: ProgressOptions,
) -> Vec<TemplatePair<'a>> {
    let mut by_template: BTreeMap<&str, Vec<&'a MeasurementInstance>> = BTreeMap::new();
    for inst in data.instances {
        if inst.group_id != group_id || inst.academic_year != year {
            continue;
        }
        if inst.period == Period::Regular && !opts.include_intermediate {
            continue;
        }
        by_template
            .entry(inst.template_id.as_str())
            .or_default()
            .push(inst);
    }

    let templates: HashMap<&str, &'a Template> =
        data.templates.iter().map(|t| (t.id.as_str(), t)).collect();

    let mut pairs = Vec::new();
    for (template_id, candidates) in by_template {
        let Some(template) = templates.get(template_id).copied() else {
            continue;
        };
        let (Some(start), Some(end)) = (
            earliest(&candidates, Period::StartOfYear),
            earliest(&candidates, Period::EndOfYear),
        ) else {
            continue;
        };

        let mut interim: Vec<&'a MeasurementInstance> = candidates
            .iter()
            .copied()
            .filter(|i| {
                i.period == Period::Regular
                    && i.test_date >= start.test_date
                    && i.test_date <= end.test_date
            })
            .collect();
        interim.sort_by(|a, b| a.test_date.cmp(&b.test_date).then_with(|| a.id.cmp(&b.id)));

        pairs.push(TemplatePair {
            template,
            start,
            end,
            interim,
        });
    }
    pairs.sort_by(|a, b| {
        a.template
            .name
            .cmp(&b.template.name)
            .then_with(|| a.template.id.cmp(&b.template.id))
    });
    pairs
}

struct ResultIndex<'a> {
    by_instance: HashMap<&'a str, HashMap<&'a str, &'a ResultRecord>>,
}

impl<'a> ResultIndex<'a> {
    fn new(results: &'a [ResultRecord]) -> Self {
        let mut by_instance: HashMap<&'a str, HashMap<&'a str, &'a ResultRecord>> = HashMap::new();
        for r in results {
            if let Some(instance_id) = r.instance_id.as_deref() {
                by_instance
                    .entry(instance_id)
                    .or_default()
                    .insert(r.student_id.as_str(), r);
            }
        }
        Self { by_instance }
    }

    fn get(&self, student_id: &str, instance_id: &str) -> Option<&'a ResultRecord> {
        self.by_instance
            .get(instance_id)
            .and_then(|m| m.get(student_id))
            .copied()
    }
}

fn student_row(pair: &TemplatePair<'_>, student: &Student, index: &ResultIndex<'_>) -> StudentProgress {
    let start = index.get(&student.id, &pair.start.id);
    let end = index.get(&student.id, &pair.end.id);
    let start_value = start.and_then(|r| r.value);
    let end_value = end.and_then(|r| r.value);
    let delta = compute_delta(start_value, end_value);

    let intermediate = pair
        .interim
        .iter()
        .map(|inst| {
            let rec = index.get(&student.id, &inst.id);
            InterimPoint {
                instance_id: inst.id.clone(),
                name: inst.name_override.clone(),
                test_date: inst.test_date,
                value: rec.and_then(|r| r.value),
                grade: rec.map(|r| r.grade).unwrap_or(GradeCode::Unset),
            }
        })
        .collect();

    StudentProgress {
        student_id: student.id.clone(),
        full_name: student.full_name.clone(),
        start_value,
        end_value,
        start_grade: start.map(|r| r.grade).unwrap_or(GradeCode::Unset),
        end_grade: end.map(|r| r.grade).unwrap_or(GradeCode::Unset),
        delta,
        outcome: classify(pair.template.direction, delta),
        intermediate,
    }
}

fn template_header(pair: &TemplatePair<'_>, scope: SexScope) -> TemplateProgress {
    TemplateProgress {
        template_id: pair.template.id.clone(),
        template_name: pair.template.name.clone(),
        unit: pair
            .start
            .unit_override
            .clone()
            .unwrap_or_else(|| pair.template.unit.clone()),
        direction: pair.template.direction,
        sex_scope: scope,
        start_instance_id: pair.start.id.clone(),
        end_instance_id: pair.end.id.clone(),
        start_date: pair.start.test_date,
        end_date: pair.end.test_date,
        rows: Vec::new(),
        summary: None,
    }
}

/// Whole-group report with per-template outcome counts.
pub fn group_progress(
    group: &Group,
    year: AcademicYear,
    data: &ProgressData<'_>,
    opts: ProgressOptions,
) -> ProgressReport {
    let index = ResultIndex::new(data.results);
    let roster: Vec<Student> = data
        .students
        .iter()
        .filter(|s| s.group_id == group.id)
        .cloned()
        .collect();

    let mut templates = Vec::new();
    for pair in pair_instances(&group.id, year, data, opts) {
        let scope = instance_sex_scope(pair.start, pair.template);
        let mut tp = template_header(&pair, scope);
        let mut counts = OutcomeCounts::default();
        for student in eligible_students(scope, &roster) {
            let row = student_row(&pair, student, &index);
            counts.add(row.outcome);
            tp.rows.push(row);
        }
        tp.summary = Some(counts);
        templates.push(tp);
    }

    ProgressReport {
        academic_year: year,
        scope: ReportScope::Group {
            group_id: group.id.clone(),
        },
        templates,
    }
}

/// Single-student report. Withdrawn students are still reported when asked
/// for directly; templates whose sex scope excludes the student are skipped.
pub fn student_progress(
    student: &Student,
    year: AcademicYear,
    data: &ProgressData<'_>,
    opts: ProgressOptions,
) -> ProgressReport {
    let index = ResultIndex::new(data.results);
    let mut templates = Vec::new();
    for pair in pair_instances(&student.group_id, year, data, opts) {
        let scope = instance_sex_scope(pair.start, pair.template);
        if !scope.admits(student.sex) {
            continue;
        }
        let mut tp = template_header(&pair, scope);
        tp.rows.push(student_row(&pair, student, &index));
        templates.push(tp);
    }

    ProgressReport {
        academic_year: year,
        scope: ReportScope::Student {
            student_id: student.id.clone(),
            group_id: student.group_id.clone(),
        },
        templates,
    }
}
