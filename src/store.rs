use chrono::{NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, ErrorCode, OptionalExtension, Row, Transaction, TransactionBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use crate::boundary::{check_table, effective_table, BoundaryAdvisory, BoundaryEntry, BoundarySource, BoundaryTable};
use crate::config::CalendarSettings;
use crate::eligibility::{eligibility_counts, eligible_students, instance_sex_scope, EligibilityCounts};
use crate::error::{CoreError, CoreResult};
use crate::gender::{normalize_sex, Sex};
use crate::grading::{resolve_grade, GradeResolution, UnresolvedReason};
use crate::model::{
    AcademicYear, Direction, Grade, GradeCode, GradeSource, Group, MeasurementInstance, Period,
    ResultRecord, SexScope, Student, Template,
};
use crate::progress::ProgressData;
use crate::results::{merge_write, prepare_write, GradingInput, RecordIdentity, Submission};

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn bad_column(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::from(msg))
}

fn parse_date_column(idx: usize, raw: &str) -> rusqlite::Result<NaiveDate> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|e| bad_column(idx, format!("bad date {}: {}", raw, e)))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.code == ErrorCode::ConstraintViolation
                && f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

// ---------------------------------------------------------------------------
// Templates

#[derive(Debug, Clone)]
pub struct NewTemplate {
    pub name: String,
    pub unit: String,
    pub class_from: i64,
    pub class_to: i64,
    pub direction: Direction,
    pub sex_scope: Option<SexScope>,
    pub owner_trainer_id: Option<String>,
}

const TEMPLATE_COLUMNS: &str =
    "id, name, unit, class_from, class_to, direction, sex_scope, owner_trainer_id";

fn template_from_row(r: &Row<'_>) -> rusqlite::Result<Template> {
    let direction_raw: String = r.get(5)?;
    let direction = Direction::parse(&direction_raw)
        .ok_or_else(|| bad_column(5, format!("bad direction {}", direction_raw)))?;
    let sex_scope = match r.get::<_, Option<String>>(6)? {
        Some(s) => Some(
            SexScope::parse(&s).ok_or_else(|| bad_column(6, format!("bad sex scope {}", s)))?,
        ),
        None => None,
    };
    Ok(Template {
        id: r.get(0)?,
        name: r.get(1)?,
        unit: r.get(2)?,
        class_from: r.get(3)?,
        class_to: r.get(4)?,
        direction,
        sex_scope,
        owner_trainer_id: r.get(7)?,
    })
}

pub fn insert_template(conn: &Connection, new: &NewTemplate) -> CoreResult<Template> {
    let name = new.name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation("name must not be empty".to_string()));
    }
    if new.class_from < 1 || new.class_from > new.class_to {
        return Err(CoreError::Validation(format!(
            "class range {}..{} is invalid",
            new.class_from, new.class_to
        )));
    }

    let template = Template {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        unit: new.unit.trim().to_string(),
        class_from: new.class_from,
        class_to: new.class_to,
        direction: new.direction,
        sex_scope: new.sex_scope,
        owner_trainer_id: new.owner_trainer_id.clone(),
    };
    conn.execute(
        "INSERT INTO templates(id, name, unit, class_from, class_to, direction, sex_scope, owner_trainer_id, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &template.id,
            &template.name,
            &template.unit,
            template.class_from,
            template.class_to,
            template.direction.as_str(),
            template.sex_scope.map(|s| s.as_str()),
            &template.owner_trainer_id,
            now_rfc3339(),
        ),
    )?;
    info!(template_id = %template.id, name = %template.name, "template created");
    Ok(template)
}

/// Shared templates plus the ones owned by `trainer_id`; every template
/// when no trainer is given.
pub fn list_templates(conn: &Connection, trainer_id: Option<&str>) -> CoreResult<Vec<Template>> {
    let sql = format!(
        "SELECT {} FROM templates
         WHERE ?1 IS NULL OR owner_trainer_id IS NULL OR owner_trainer_id = ?1
         ORDER BY name, id",
        TEMPLATE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([trainer_id], template_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_template(conn: &Connection, id: &str) -> CoreResult<Template> {
    let sql = format!("SELECT {} FROM templates WHERE id = ?", TEMPLATE_COLUMNS);
    conn.query_row(&sql, [id], template_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("template", id))
}

// ---------------------------------------------------------------------------
// Boundary tables

const TEMPLATE_BOUNDARIES: (&str, &str) = ("template_boundaries", "template_id");
const INSTANCE_BOUNDARIES: (&str, &str) = ("instance_boundaries", "instance_id");

fn boundary_from_row(r: &Row<'_>) -> rusqlite::Result<BoundaryEntry> {
    let grade_raw: i64 = r.get(0)?;
    let grade = u8::try_from(grade_raw)
        .ok()
        .and_then(Grade::new)
        .ok_or_else(|| bad_column(0, format!("bad grade {}", grade_raw)))?;
    let sex_raw: String = r.get(1)?;
    let sex = Sex::from_code(&sex_raw).ok_or_else(|| bad_column(1, format!("bad sex {}", sex_raw)))?;
    Ok(BoundaryEntry {
        grade,
        sex,
        class_number: r.get(2)?,
        from_value: r.get(3)?,
        to_value: r.get(4)?,
    })
}

fn load_boundaries(
    conn: &Connection,
    (table, owner_col): (&str, &str),
    owner_id: &str,
) -> CoreResult<Vec<BoundaryEntry>> {
    let sql = format!(
        "SELECT grade, sex, class_number, from_value, to_value
         FROM {}
         WHERE {} = ?
         ORDER BY sort_order",
        table, owner_col
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([owner_id], boundary_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

fn write_boundaries(
    tx: &Transaction<'_>,
    (table, owner_col): (&str, &str),
    owner_id: &str,
    entries: &[BoundaryEntry],
) -> CoreResult<()> {
    tx.execute(
        &format!("DELETE FROM {} WHERE {} = ?", table, owner_col),
        [owner_id],
    )?;
    let sql = format!(
        "INSERT INTO {}(id, {}, grade, sex, class_number, from_value, to_value, sort_order)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        table, owner_col
    );
    let mut stmt = tx.prepare(&sql)?;
    for (i, e) in entries.iter().enumerate() {
        stmt.execute((
            Uuid::new_v4().to_string(),
            owner_id,
            e.grade.value(),
            e.sex.as_code(),
            e.class_number,
            e.from_value,
            e.to_value,
            i as i64,
        ))?;
    }
    Ok(())
}

fn validate_entries(entries: &[BoundaryEntry]) -> CoreResult<()> {
    for e in entries {
        e.validate()?;
    }
    Ok(())
}

pub fn template_boundaries(conn: &Connection, template_id: &str) -> CoreResult<Vec<BoundaryEntry>> {
    load_boundaries(conn, TEMPLATE_BOUNDARIES, template_id)
}

pub fn instance_boundaries(conn: &Connection, instance_id: &str) -> CoreResult<Vec<BoundaryEntry>> {
    load_boundaries(conn, INSTANCE_BOUNDARIES, instance_id)
}

/// Replaces a template's default table. Overlaps are saved as-is and
/// reported back.
pub fn replace_template_boundaries(
    conn: &Connection,
    template_id: &str,
    entries: &[BoundaryEntry],
) -> CoreResult<BoundaryAdvisory> {
    get_template(conn, template_id)?;
    validate_entries(entries)?;

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    write_boundaries(&tx, TEMPLATE_BOUNDARIES, template_id, entries)?;
    tx.commit()?;

    let advisory = check_table(&BoundaryTable::new(BoundarySource::Template, entries.to_vec()));
    info!(
        template_id,
        entries = entries.len(),
        overlaps = advisory.overlaps.len(),
        "template boundaries replaced"
    );
    Ok(advisory)
}

/// Installs a private table on an instance, or with `None` drops it and
/// returns the instance to its template's defaults.
pub fn replace_instance_boundaries(
    conn: &Connection,
    instance_id: &str,
    entries: Option<&[BoundaryEntry]>,
) -> CoreResult<BoundaryAdvisory> {
    get_instance(conn, instance_id)?;
    if let Some(entries) = entries {
        validate_entries(entries)?;
    }

    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;
    write_boundaries(&tx, INSTANCE_BOUNDARIES, instance_id, entries.unwrap_or(&[]))?;
    tx.execute(
        "UPDATE measurement_instances SET use_custom_boundaries = ? WHERE id = ?",
        (entries.is_some() as i64, instance_id),
    )?;
    tx.commit()?;

    let advisory = match entries {
        Some(entries) => check_table(&BoundaryTable::new(BoundarySource::Instance, entries.to_vec())),
        None => BoundaryAdvisory::default(),
    };
    info!(instance_id, custom = entries.is_some(), "instance boundaries replaced");
    Ok(advisory)
}

pub fn effective_boundary_table(
    conn: &Connection,
    instance: &MeasurementInstance,
) -> CoreResult<BoundaryTable> {
    let defaults = if instance.use_custom_boundaries {
        Vec::new()
    } else {
        template_boundaries(conn, &instance.template_id)?
    };
    let overrides = if instance.use_custom_boundaries {
        instance_boundaries(conn, &instance.id)?
    } else {
        Vec::new()
    };
    Ok(effective_table(instance, defaults, overrides))
}

// ---------------------------------------------------------------------------
// Groups and students

const GROUP_COLUMNS: &str = "id, name, academic_year, class_label";

fn group_from_row(r: &Row<'_>) -> rusqlite::Result<Group> {
    let year: i64 = r.get(2)?;
    Ok(Group {
        id: r.get(0)?,
        name: r.get(1)?,
        academic_year: AcademicYear::new(year as i32),
        class_label: r.get(3)?,
    })
}

pub fn insert_group(
    conn: &Connection,
    name: &str,
    academic_year: AcademicYear,
    class_label: Option<&str>,
) -> CoreResult<Group> {
    let name = name.trim();
    if name.is_empty() {
        return Err(CoreError::Validation("name must not be empty".to_string()));
    }
    let group = Group {
        id: Uuid::new_v4().to_string(),
        name: name.to_string(),
        academic_year,
        class_label: class_label
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty()),
    };
    conn.execute(
        "INSERT INTO school_groups(id, name, academic_year, class_label) VALUES(?, ?, ?, ?)",
        (
            &group.id,
            &group.name,
            group.academic_year.start_year as i64,
            &group.class_label,
        ),
    )?;
    info!(group_id = %group.id, class_number = ?group.class_number(), "group created");
    Ok(group)
}

pub fn list_groups(conn: &Connection) -> CoreResult<Vec<Group>> {
    let sql = format!(
        "SELECT {} FROM school_groups ORDER BY academic_year DESC, name",
        GROUP_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([], group_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_group(conn: &Connection, id: &str) -> CoreResult<Group> {
    let sql = format!("SELECT {} FROM school_groups WHERE id = ?", GROUP_COLUMNS);
    conn.query_row(&sql, [id], group_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("group", id))
}

const STUDENT_COLUMNS: &str = "id, full_name, sex, group_id, active";

fn student_from_row(r: &Row<'_>) -> rusqlite::Result<Student> {
    let sex: Option<String> = r.get(2)?;
    Ok(Student {
        id: r.get(0)?,
        full_name: r.get(1)?,
        sex: sex.as_deref().and_then(Sex::from_code),
        group_id: r.get(3)?,
        active: r.get::<_, i64>(4)? != 0,
    })
}

/// `sex_token` is normalised here; unrecognised tokens store as unknown.
pub fn insert_student(
    conn: &Connection,
    group_id: &str,
    full_name: &str,
    sex_token: Option<&str>,
) -> CoreResult<Student> {
    get_group(conn, group_id)?;
    let full_name = full_name.trim();
    if full_name.is_empty() {
        return Err(CoreError::Validation("fullName must not be empty".to_string()));
    }
    let sex = sex_token.and_then(normalize_sex);
    if sex.is_none() {
        debug!(group_id, token = ?sex_token, "student sex not recognised");
    }

    let next_sort: i64 = conn.query_row(
        "SELECT COALESCE(MAX(sort_order) + 1, 0) FROM students WHERE group_id = ?",
        [group_id],
        |r| r.get(0),
    )?;
    let student = Student {
        id: Uuid::new_v4().to_string(),
        full_name: full_name.to_string(),
        sex,
        group_id: group_id.to_string(),
        active: true,
    };
    conn.execute(
        "INSERT INTO students(id, group_id, full_name, sex, active, sort_order, updated_at)
         VALUES(?, ?, ?, ?, 1, ?, ?)",
        (
            &student.id,
            &student.group_id,
            &student.full_name,
            student.sex.map(|s| s.as_code()),
            next_sort,
            now_rfc3339(),
        ),
    )?;
    Ok(student)
}

pub fn list_students(conn: &Connection, group_id: &str) -> CoreResult<Vec<Student>> {
    let sql = format!(
        "SELECT {} FROM students WHERE group_id = ? ORDER BY sort_order",
        STUDENT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([group_id], student_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_student(conn: &Connection, id: &str) -> CoreResult<Student> {
    let sql = format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS);
    conn.query_row(&sql, [id], student_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("student", id))
}

/// Withdrawing keeps every stored result.
pub fn set_student_active(conn: &Connection, id: &str, active: bool) -> CoreResult<Student> {
    let changed = conn.execute(
        "UPDATE students SET active = ?, updated_at = ? WHERE id = ?",
        (active as i64, now_rfc3339(), id),
    )?;
    if changed == 0 {
        return Err(CoreError::not_found("student", id));
    }
    get_student(conn, id)
}

// ---------------------------------------------------------------------------
// Measurement instances

#[derive(Debug, Clone)]
pub struct NewInstance {
    pub template_id: String,
    pub group_id: String,
    pub test_date: NaiveDate,
    pub period: Period,
    pub name_override: Option<String>,
    pub unit_override: Option<String>,
    pub sex_scope_override: Option<SexScope>,
}

const INSTANCE_COLUMNS: &str = "id, template_id, group_id, test_date, period, academic_year,
     name_override, unit_override, sex_scope_override, use_custom_boundaries";

fn instance_from_row(r: &Row<'_>) -> rusqlite::Result<MeasurementInstance> {
    let date_raw: String = r.get(3)?;
    let period_raw: String = r.get(4)?;
    let period = Period::parse(&period_raw)
        .ok_or_else(|| bad_column(4, format!("bad period {}", period_raw)))?;
    let year: i64 = r.get(5)?;
    let scope = match r.get::<_, Option<String>>(8)? {
        Some(s) => Some(
            SexScope::parse(&s).ok_or_else(|| bad_column(8, format!("bad sex scope {}", s)))?,
        ),
        None => None,
    };
    Ok(MeasurementInstance {
        id: r.get(0)?,
        template_id: r.get(1)?,
        group_id: r.get(2)?,
        test_date: parse_date_column(3, &date_raw)?,
        period,
        academic_year: AcademicYear::new(year as i32),
        name_override: r.get(6)?,
        unit_override: r.get(7)?,
        sex_scope_override: scope,
        use_custom_boundaries: r.get::<_, i64>(9)? != 0,
    })
}

/// Creates an instance. A second start or end instance for the same group,
/// template and academic year is rejected by the unique index and reported
/// as [`CoreError::AlreadyExists`].
pub fn insert_instance(
    conn: &Connection,
    new: &NewInstance,
    calendar: CalendarSettings,
) -> CoreResult<MeasurementInstance> {
    let template = get_template(conn, &new.template_id)?;
    let group = get_group(conn, &new.group_id)?;
    if let Some(class_number) = group.class_number() {
        if !template.applies_to_class(class_number) {
            return Err(CoreError::InvalidReference(format!(
                "template {} covers classes {}..{}, group is class {}",
                template.name, template.class_from, template.class_to, class_number
            )));
        }
    }

    let academic_year = AcademicYear::containing(new.test_date, calendar.school_year_start_month);
    if academic_year != group.academic_year {
        return Err(CoreError::InvalidReference(format!(
            "test date {} falls in {}, group {} is for {}",
            new.test_date, academic_year, group.name, group.academic_year
        )));
    }

    let instance = MeasurementInstance {
        id: Uuid::new_v4().to_string(),
        template_id: template.id,
        group_id: group.id,
        test_date: new.test_date,
        period: new.period,
        academic_year,
        name_override: new.name_override.clone(),
        unit_override: new.unit_override.clone(),
        sex_scope_override: new.sex_scope_override,
        use_custom_boundaries: false,
    };
    let inserted = conn.execute(
        "INSERT INTO measurement_instances(
            id, template_id, group_id, test_date, period, academic_year,
            name_override, unit_override, sex_scope_override, use_custom_boundaries)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, 0)",
        (
            &instance.id,
            &instance.template_id,
            &instance.group_id,
            instance.test_date.format("%Y-%m-%d").to_string(),
            instance.period.as_str(),
            instance.academic_year.start_year as i64,
            &instance.name_override,
            &instance.unit_override,
            instance.sex_scope_override.map(|s| s.as_str()),
        ),
    );
    match inserted {
        Ok(_) => {}
        Err(e) if is_unique_violation(&e) => {
            return Err(CoreError::AlreadyExists(format!(
                "{} instance for this group and template in {}",
                instance.period.as_str(),
                instance.academic_year
            )));
        }
        Err(e) => return Err(e.into()),
    }
    info!(
        instance_id = %instance.id,
        period = instance.period.as_str(),
        year = %instance.academic_year,
        "measurement instance created"
    );
    Ok(instance)
}

pub fn list_instances(
    conn: &Connection,
    group_id: &str,
    year: Option<AcademicYear>,
) -> CoreResult<Vec<MeasurementInstance>> {
    let sql = format!(
        "SELECT {} FROM measurement_instances
         WHERE group_id = ?1 AND (?2 IS NULL OR academic_year = ?2)
         ORDER BY test_date, id",
        INSTANCE_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map(
            (group_id, year.map(|y| y.start_year as i64)),
            instance_from_row,
        )?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_instance(conn: &Connection, id: &str) -> CoreResult<MeasurementInstance> {
    let sql = format!("SELECT {} FROM measurement_instances WHERE id = ?", INSTANCE_COLUMNS);
    conn.query_row(&sql, [id], instance_from_row)
        .optional()?
        .ok_or_else(|| CoreError::not_found("instance", id))
}

#[derive(Debug, Clone)]
pub struct InstanceEligibility {
    pub scope: SexScope,
    pub eligible: Vec<Student>,
    pub counts: EligibilityCounts,
}

pub fn instance_eligibility(conn: &Connection, instance_id: &str) -> CoreResult<InstanceEligibility> {
    let instance = get_instance(conn, instance_id)?;
    let template = get_template(conn, &instance.template_id)?;
    let roster = list_students(conn, &instance.group_id)?;
    let scope = instance_sex_scope(&instance, &template);
    Ok(InstanceEligibility {
        scope,
        eligible: eligible_students(scope, &roster).into_iter().cloned().collect(),
        counts: eligibility_counts(scope, &roster),
    })
}

// ---------------------------------------------------------------------------
// Results

const RESULT_COLUMNS: &str = "id, student_id, instance_id, template_id, test_date, value,
     grade_code, grade_source, unresolved_reason, updated_at";

fn result_from_row(r: &Row<'_>) -> rusqlite::Result<ResultRecord> {
    let test_date = match r.get::<_, Option<String>>(4)? {
        Some(s) => Some(parse_date_column(4, &s)?),
        None => None,
    };
    let grade_raw: String = r.get(6)?;
    let grade = GradeCode::parse(&grade_raw)
        .ok_or_else(|| bad_column(6, format!("bad grade code {}", grade_raw)))?;
    let source_raw: String = r.get(7)?;
    let grade_source = GradeSource::parse(&source_raw)
        .ok_or_else(|| bad_column(7, format!("bad grade source {}", source_raw)))?;
    let unresolved_reason = r
        .get::<_, Option<String>>(8)?
        .as_deref()
        .and_then(UnresolvedReason::parse);
    Ok(ResultRecord {
        id: r.get(0)?,
        student_id: r.get(1)?,
        instance_id: r.get(2)?,
        template_id: r.get(3)?,
        test_date,
        value: r.get(5)?,
        grade,
        grade_source,
        unresolved_reason,
        updated_at: r.get(9)?,
    })
}

fn save_result(conn: &Connection, rec: &ResultRecord) -> CoreResult<()> {
    conn.execute(
        "INSERT INTO results(id, student_id, instance_id, template_id, test_date, value,
                             grade_code, grade_source, unresolved_reason, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
           test_date = excluded.test_date,
           value = excluded.value,
           grade_code = excluded.grade_code,
           grade_source = excluded.grade_source,
           unresolved_reason = excluded.unresolved_reason,
           updated_at = excluded.updated_at",
        (
            &rec.id,
            &rec.student_id,
            &rec.instance_id,
            &rec.template_id,
            rec.test_date.map(|d| d.format("%Y-%m-%d").to_string()),
            rec.value,
            rec.grade.as_code(),
            rec.grade_source.as_str(),
            rec.unresolved_reason.map(|r| r.as_str()),
            &rec.updated_at,
        ),
    )?;
    Ok(())
}

fn find_result(conn: &Connection, student_id: &str, instance_id: &str) -> CoreResult<Option<ResultRecord>> {
    let sql = format!(
        "SELECT {} FROM results WHERE student_id = ? AND instance_id = ?",
        RESULT_COLUMNS
    );
    Ok(conn
        .query_row(&sql, (student_id, instance_id), result_from_row)
        .optional()?)
}

/// Resolves a preview grade without writing anything.
pub fn preview_grade(
    conn: &Connection,
    student_id: &str,
    instance_id: &str,
    value: f64,
) -> CoreResult<(GradeResolution, BoundarySource)> {
    let instance = get_instance(conn, instance_id)?;
    let student = get_student(conn, student_id)?;
    let group = get_group(conn, &instance.group_id)?;
    let table = effective_boundary_table(conn, &instance)?;
    let resolution = resolve_grade(value, student.sex, group.class_number(), &table);
    Ok((resolution, table.source()))
}

/// Writes the one result record for a (student, instance) pair.
///
/// The read-merge-write runs in an immediate transaction so concurrent
/// writers for the same pair serialise; the last one wins.
pub fn upsert_result(
    conn: &Connection,
    student_id: &str,
    instance_id: &str,
    submission: &Submission,
) -> CoreResult<ResultRecord> {
    let tx = Transaction::new_unchecked(conn, TransactionBehavior::Immediate)?;

    let instance = get_instance(&tx, instance_id)?;
    let student = get_student(&tx, student_id)?;
    if student.group_id != instance.group_id {
        return Err(CoreError::InvalidReference(format!(
            "student {} is not in the group of instance {}",
            student_id, instance_id
        )));
    }
    let group = get_group(&tx, &instance.group_id)?;
    let table = effective_boundary_table(&tx, &instance)?;
    let input = GradingInput {
        sex: student.sex,
        class_number: group.class_number(),
        table: &table,
    };
    let write = prepare_write(submission, &input)?;

    let existing = find_result(&tx, student_id, instance_id)?;
    let created = existing.is_none();
    let record = merge_write(
        existing,
        write,
        RecordIdentity {
            id: Uuid::new_v4().to_string(),
            student_id: student.id.clone(),
            instance_id: Some(instance.id.clone()),
            template_id: instance.template_id.clone(),
            test_date: Some(instance.test_date),
        },
        now_rfc3339(),
    );
    save_result(&tx, &record)?;
    tx.commit()?;

    debug!(
        student_id,
        instance_id,
        created,
        grade = %record.grade.as_code(),
        reason = ?record.unresolved_reason,
        "result saved"
    );
    Ok(record)
}

/// Standalone entry outside any instance, graded against the template's
/// default table. Each call creates a new record.
pub fn record_adhoc_result(
    conn: &Connection,
    student_id: &str,
    template_id: &str,
    test_date: NaiveDate,
    submission: &Submission,
) -> CoreResult<ResultRecord> {
    let student = get_student(conn, student_id)?;
    let template = get_template(conn, template_id)?;
    let group = get_group(conn, &student.group_id)?;
    let table = BoundaryTable::new(
        BoundarySource::Template,
        template_boundaries(conn, &template.id)?,
    );
    let input = GradingInput {
        sex: student.sex,
        class_number: group.class_number(),
        table: &table,
    };
    let write = prepare_write(submission, &input)?;
    let record = merge_write(
        None,
        write,
        RecordIdentity {
            id: Uuid::new_v4().to_string(),
            student_id: student.id,
            instance_id: None,
            template_id: template.id,
            test_date: Some(test_date),
        },
        now_rfc3339(),
    );
    save_result(conn, &record)?;
    info!(record_id = %record.id, student_id, template_id, "ad-hoc result recorded");
    Ok(record)
}

pub fn list_instance_results(conn: &Connection, instance_id: &str) -> CoreResult<Vec<ResultRecord>> {
    get_instance(conn, instance_id)?;
    let sql = format!(
        "SELECT {} FROM results WHERE instance_id = ? ORDER BY student_id",
        RESULT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([instance_id], result_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn list_student_results(conn: &Connection, student_id: &str) -> CoreResult<Vec<ResultRecord>> {
    get_student(conn, student_id)?;
    let sql = format!(
        "SELECT {} FROM results WHERE student_id = ? ORDER BY test_date, updated_at",
        RESULT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([student_id], result_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ---------------------------------------------------------------------------
// Progress inputs

/// Owned rows for one group and academic year.
#[derive(Debug, Clone, Default)]
pub struct ProgressInputs {
    pub templates: Vec<Template>,
    pub instances: Vec<MeasurementInstance>,
    pub students: Vec<Student>,
    pub results: Vec<ResultRecord>,
}

impl ProgressInputs {
    pub fn data(&self) -> ProgressData<'_> {
        ProgressData {
            templates: &self.templates,
            instances: &self.instances,
            students: &self.students,
            results: &self.results,
        }
    }
}

pub fn load_progress_inputs(
    conn: &Connection,
    group_id: &str,
    year: AcademicYear,
) -> CoreResult<ProgressInputs> {
    let instances = list_instances(conn, group_id, Some(year))?;
    let mut template_ids: Vec<&str> = instances.iter().map(|i| i.template_id.as_str()).collect();
    template_ids.sort();
    template_ids.dedup();
    let templates = template_ids
        .into_iter()
        .map(|id| get_template(conn, id))
        .collect::<CoreResult<Vec<_>>>()?;
    let students = list_students(conn, group_id)?;

    let sql = format!(
        "SELECT {} FROM results
         WHERE instance_id IN (
             SELECT id FROM measurement_instances WHERE group_id = ? AND academic_year = ?
         )",
        RESULT_COLUMNS
    );
    let mut stmt = conn.prepare(&sql)?;
    let results = stmt
        .query_map((group_id, year.start_year as i64), result_from_row)?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ProgressInputs {
        templates,
        instances,
        students,
        results,
    })
}
