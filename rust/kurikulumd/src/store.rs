//! Typed reads and writes over the workspace tables.
//!
//! Multi-record commands go through [`commit`], which writes the plan and
//! every changed student inside a single transaction.

use crate::error::{Error, Result};
use crate::model::{
    ApiKeyRecord, AttendanceRecord, AttendanceStatus, ClassProfile, CurriculumData,
    HolidayRecord, LearningPlan, Student,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

fn plan_from_row(row: &Row<'_>) -> rusqlite::Result<(LearningPlan, String)> {
    let curriculum_raw: String = row.get(5)?;
    Ok((
        LearningPlan {
            id: row.get(0)?,
            class_id: row.get(1)?,
            name: row.get(2)?,
            subject: row.get(3)?,
            grade: row.get(4)?,
            curriculum: CurriculumData::default(),
            created_at: row.get(6)?,
            updated_at: row.get(7)?,
        },
        curriculum_raw,
    ))
}

const PLAN_COLUMNS: &str =
    "id, class_id, name, subject, grade, curriculum_json, created_at, updated_at";

fn finish_plan((mut plan, raw): (LearningPlan, String)) -> Result<LearningPlan> {
    plan.curriculum = serde_json::from_str(&raw)?;
    Ok(plan)
}

pub fn plans_list(conn: &Connection) -> Result<Vec<LearningPlan>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM learning_plans ORDER BY created_at, id",
        PLAN_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], plan_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(finish_plan).collect()
}

pub fn plan_get(conn: &Connection, plan_id: &str) -> Result<Option<LearningPlan>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM learning_plans WHERE id = ?", PLAN_COLUMNS),
            [plan_id],
            plan_from_row,
        )
        .optional()?;
    row.map(finish_plan).transpose()
}

pub fn plan_require(conn: &Connection, plan_id: &str) -> Result<LearningPlan> {
    plan_get(conn, plan_id)?.ok_or_else(|| Error::NotFound("learning plan".to_string()))
}

pub fn plan_put(conn: &Connection, plan: &LearningPlan) -> Result<()> {
    conn.execute(
        "INSERT INTO learning_plans(id, class_id, name, subject, grade, curriculum_json, created_at, updated_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            class_id = excluded.class_id,
            name = excluded.name,
            subject = excluded.subject,
            grade = excluded.grade,
            curriculum_json = excluded.curriculum_json,
            updated_at = excluded.updated_at",
        params![
            plan.id,
            plan.class_id,
            plan.name,
            plan.subject,
            plan.grade,
            serde_json::to_string(&plan.curriculum)?,
            plan.created_at,
            plan.updated_at
        ],
    )?;
    Ok(())
}

const STUDENT_COLUMNS: &str =
    "id, class_id, name, nis, sort_order, assessments_json, summatives_json, dpl_json, hafalan_json";

fn student_from_row(row: &Row<'_>) -> rusqlite::Result<(Student, [String; 4])> {
    Ok((
        Student {
            id: row.get(0)?,
            class_id: row.get(1)?,
            name: row.get(2)?,
            nis: row.get(3)?,
            sort_order: row.get(4)?,
            assessments: Vec::new(),
            summatives: Vec::new(),
            dpl_observations: Vec::new(),
            hafalan: Vec::new(),
        },
        [row.get(5)?, row.get(6)?, row.get(7)?, row.get(8)?],
    ))
}

fn finish_student((mut s, raw): (Student, [String; 4])) -> Result<Student> {
    s.assessments = serde_json::from_str(&raw[0])?;
    s.summatives = serde_json::from_str(&raw[1])?;
    s.dpl_observations = serde_json::from_str(&raw[2])?;
    s.hafalan = serde_json::from_str(&raw[3])?;
    Ok(s)
}

pub fn students_all(conn: &Connection) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM students ORDER BY class_id, sort_order, id",
        STUDENT_COLUMNS
    ))?;
    let rows = stmt
        .query_map([], student_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(finish_student).collect()
}

pub fn students_for_class(conn: &Connection, class_id: &str) -> Result<Vec<Student>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {} FROM students WHERE class_id = ? ORDER BY sort_order, id",
        STUDENT_COLUMNS
    ))?;
    let rows = stmt
        .query_map([class_id], student_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(finish_student).collect()
}

pub fn student_get(conn: &Connection, student_id: &str) -> Result<Option<Student>> {
    let row = conn
        .query_row(
            &format!("SELECT {} FROM students WHERE id = ?", STUDENT_COLUMNS),
            [student_id],
            student_from_row,
        )
        .optional()?;
    row.map(finish_student).transpose()
}

pub fn student_require(conn: &Connection, student_id: &str) -> Result<Student> {
    student_get(conn, student_id)?.ok_or_else(|| Error::NotFound("student".to_string()))
}

pub fn student_put(conn: &Connection, s: &Student) -> Result<()> {
    conn.execute(
        "INSERT INTO students(id, class_id, name, nis, sort_order, assessments_json, summatives_json, dpl_json, hafalan_json)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            class_id = excluded.class_id,
            name = excluded.name,
            nis = excluded.nis,
            sort_order = excluded.sort_order,
            assessments_json = excluded.assessments_json,
            summatives_json = excluded.summatives_json,
            dpl_json = excluded.dpl_json,
            hafalan_json = excluded.hafalan_json",
        params![
            s.id,
            s.class_id,
            s.name,
            s.nis,
            s.sort_order,
            serde_json::to_string(&s.assessments)?,
            serde_json::to_string(&s.summatives)?,
            serde_json::to_string(&s.dpl_observations)?,
            serde_json::to_string(&s.hafalan)?
        ],
    )?;
    Ok(())
}

pub fn student_delete(conn: &Connection, student_id: &str) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    tx.execute(
        "DELETE FROM attendance_records WHERE student_id = ?",
        [student_id],
    )?;
    let n = tx.execute("DELETE FROM students WHERE id = ?", [student_id])?;
    tx.commit()?;
    Ok(n > 0)
}

pub fn next_student_sort_order(conn: &Connection, class_id: &str) -> Result<i64> {
    let max: Option<i64> = conn.query_row(
        "SELECT MAX(sort_order) FROM students WHERE class_id = ?",
        [class_id],
        |r| r.get(0),
    )?;
    Ok(max.map(|m| m + 1).unwrap_or(0))
}

/// Writes a plan together with the students a command changed, atomically.
pub fn commit(conn: &Connection, plan: Option<&LearningPlan>, students: &[&Student]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    if let Some(plan) = plan {
        plan_put(&tx, plan)?;
    }
    for s in students {
        student_put(&tx, s)?;
    }
    tx.commit()?;
    Ok(())
}

/// Deletes a plan and writes the students swept of its objectives.
pub fn plan_discard(conn: &Connection, plan_id: &str, students: &[&Student]) -> Result<bool> {
    let tx = conn.unchecked_transaction()?;
    let n = tx.execute("DELETE FROM learning_plans WHERE id = ?", [plan_id])?;
    for s in students {
        student_put(&tx, s)?;
    }
    tx.commit()?;
    Ok(n > 0)
}

/// Students in `after` that differ from their counterpart in `before`.
pub fn changed_students<'a>(before: &[Student], after: &'a [Student]) -> Vec<&'a Student> {
    after
        .iter()
        .filter(|s| before.iter().find(|b| b.id == s.id) != Some(*s))
        .collect()
}

pub fn classes_list(conn: &Connection) -> Result<Vec<ClassProfile>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, grade, academic_year FROM class_profiles ORDER BY name, id",
    )?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ClassProfile {
                id: r.get(0)?,
                name: r.get(1)?,
                grade: r.get(2)?,
                academic_year: r.get(3)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn class_exists(conn: &Connection, class_id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM class_profiles WHERE id = ?", [class_id], |r| {
            r.get::<_, i64>(0)
        })
        .optional()?
        .is_some())
}

pub fn class_put(conn: &Connection, c: &ClassProfile) -> Result<()> {
    conn.execute(
        "INSERT INTO class_profiles(id, name, grade, academic_year) VALUES(?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            grade = excluded.grade,
            academic_year = excluded.academic_year",
        params![c.id, c.name, c.grade, c.academic_year],
    )?;
    Ok(())
}

pub fn class_delete(conn: &Connection, class_id: &str) -> Result<bool> {
    Ok(conn.execute("DELETE FROM class_profiles WHERE id = ?", [class_id])? > 0)
}

fn attendance_from_row(r: &Row<'_>) -> rusqlite::Result<(AttendanceRecord, String)> {
    Ok((
        AttendanceRecord {
            id: r.get(0)?,
            student_id: r.get(1)?,
            class_id: r.get(2)?,
            date: r.get(3)?,
            status: AttendanceStatus::Hadir,
            note: r.get(5)?,
        },
        r.get(4)?,
    ))
}

fn finish_attendance((mut rec, status): (AttendanceRecord, String)) -> Result<AttendanceRecord> {
    rec.status = AttendanceStatus::parse(&status)
        .ok_or_else(|| Error::Validation(format!("unknown attendance status {}", status)))?;
    Ok(rec)
}

/// Upserts by record id; saving the same `${studentId}-${date}` again
/// replaces the earlier status.
pub fn attendance_put(conn: &Connection, rec: &AttendanceRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO attendance_records(id, student_id, class_id, date, status, note)
         VALUES(?, ?, ?, ?, ?, ?)
         ON CONFLICT(id) DO UPDATE SET
            student_id = excluded.student_id,
            class_id = excluded.class_id,
            date = excluded.date,
            status = excluded.status,
            note = excluded.note",
        params![
            rec.id,
            rec.student_id,
            rec.class_id,
            rec.date,
            rec.status.as_str(),
            rec.note
        ],
    )?;
    Ok(())
}

pub fn attendance_put_batch(conn: &Connection, records: &[AttendanceRecord]) -> Result<()> {
    let tx = conn.unchecked_transaction()?;
    for rec in records {
        attendance_put(&tx, rec)?;
    }
    tx.commit()?;
    Ok(())
}

/// Records whose date starts with `date_prefix` (a full date or `YYYY-MM`).
pub fn attendance_list(
    conn: &Connection,
    class_id: &str,
    date_prefix: &str,
) -> Result<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, class_id, date, status, note
         FROM attendance_records
         WHERE class_id = ?1 AND substr(date, 1, length(?2)) = ?2
         ORDER BY date, student_id",
    )?;
    let rows = stmt
        .query_map(params![class_id, date_prefix], attendance_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(finish_attendance).collect()
}

pub fn attendance_all(conn: &Connection) -> Result<Vec<AttendanceRecord>> {
    let mut stmt = conn.prepare(
        "SELECT id, student_id, class_id, date, status, note
         FROM attendance_records ORDER BY date, id",
    )?;
    let rows = stmt
        .query_map([], attendance_from_row)?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter().map(finish_attendance).collect()
}

pub fn holidays_list(conn: &Connection) -> Result<Vec<HolidayRecord>> {
    let mut stmt = conn.prepare("SELECT date, description FROM holidays ORDER BY date")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(HolidayRecord {
                date: r.get(0)?,
                description: r.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn holiday_put(conn: &Connection, h: &HolidayRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO holidays(date, description) VALUES(?, ?)
         ON CONFLICT(date) DO UPDATE SET description = excluded.description",
        params![h.date, h.description],
    )?;
    Ok(())
}

pub fn holiday_delete(conn: &Connection, date: &str) -> Result<bool> {
    Ok(conn.execute("DELETE FROM holidays WHERE date = ?", [date])? > 0)
}

pub fn app_state_all(conn: &Connection) -> Result<Vec<(String, serde_json::Value)>> {
    let mut stmt = conn.prepare("SELECT key, value_json FROM app_state ORDER BY key")?;
    let rows = stmt
        .query_map([], |r| Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?)))?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    rows.into_iter()
        .map(|(k, v)| Ok((k, serde_json::from_str(&v)?)))
        .collect()
}

pub fn app_state_put(conn: &Connection, key: &str, value: &serde_json::Value) -> Result<()> {
    conn.execute(
        "INSERT INTO app_state(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        params![key, serde_json::to_string(value)?],
    )?;
    Ok(())
}

pub fn api_keys_list(conn: &Connection) -> Result<Vec<ApiKeyRecord>> {
    let mut stmt = conn.prepare("SELECT user_id, key FROM api_keys ORDER BY user_id")?;
    let rows = stmt
        .query_map([], |r| {
            Ok(ApiKeyRecord {
                user_id: r.get(0)?,
                key: r.get(1)?,
            })
        })?
        .collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

pub fn api_key_get(conn: &Connection, user_id: &str) -> Result<Option<String>> {
    Ok(conn
        .query_row("SELECT key FROM api_keys WHERE user_id = ?", [user_id], |r| {
            r.get(0)
        })
        .optional()?)
}

pub fn api_key_put(conn: &Connection, rec: &ApiKeyRecord) -> Result<()> {
    conn.execute(
        "INSERT INTO api_keys(user_id, key) VALUES(?, ?)
         ON CONFLICT(user_id) DO UPDATE SET key = excluded.key",
        params![rec.user_id, rec.key],
    )?;
    Ok(())
}

pub fn api_key_delete(conn: &Connection, user_id: &str) -> Result<bool> {
    Ok(conn.execute("DELETE FROM api_keys WHERE user_id = ?", [user_id])? > 0)
}
