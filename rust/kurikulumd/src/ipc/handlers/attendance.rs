use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{opt_str, required_str, with_conn, HandlerFn};
use crate::ipc::types::{AppState, Request};
use crate::model::{AttendanceRecord, AttendanceStatus, HolidayRecord};
use crate::store;
use chrono::NaiveDate;
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::{BTreeMap, HashSet};

fn parse_date(raw: &str, key: &str) -> Result<String, HandlerErr> {
    NaiveDate::parse_from_str(raw.trim(), "%Y-%m-%d")
        .map(|d| d.format("%Y-%m-%d").to_string())
        .map_err(|_| HandlerErr::bad_params(format!("{} must be YYYY-MM-DD", key)))
}

fn parse_month_key(raw: &str) -> Result<String, HandlerErr> {
    let t = raw.trim();
    let Some((y, m)) = t.split_once('-') else {
        return Err(HandlerErr::bad_params("month must be YYYY-MM"));
    };
    let year = y
        .parse::<i32>()
        .map_err(|_| HandlerErr::bad_params("month year must be numeric"))?;
    let month = m
        .parse::<u32>()
        .map_err(|_| HandlerErr::bad_params("month must be YYYY-MM"))?;
    if !(1..=12).contains(&month) {
        return Err(HandlerErr::bad_params("month must be between 01 and 12"));
    }
    Ok(format!("{:04}-{:02}", year, month))
}

fn require_class(conn: &Connection, params: &Value) -> Result<String, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    if !store::class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    Ok(class_id)
}

/// `{classId, date, entries: [{studentId, status, note?}]}`. Saving the same
/// student and date again replaces the earlier status.
fn attendance_save_batch(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = require_class(conn, params)?;
    let date = parse_date(&required_str(params, "date")?, "date")?;
    let entries = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("entries must be an array"))?;

    let roster: HashSet<String> = store::students_for_class(conn, &class_id)?
        .into_iter()
        .map(|s| s.id)
        .collect();
    let mut records: Vec<AttendanceRecord> = Vec::with_capacity(entries.len());
    for (i, entry) in entries.iter().enumerate() {
        let student_id = required_str(entry, "studentId")?;
        if !roster.contains(&student_id) {
            return Err(HandlerErr::bad_params(format!(
                "entries[{}].studentId is not in the class",
                i
            )));
        }
        let status_raw = required_str(entry, "status")?;
        let status = AttendanceStatus::parse(&status_raw).ok_or_else(|| {
            HandlerErr::bad_params(format!(
                "entries[{}].status must be hadir, sakit, izin or alpa",
                i
            ))
        })?;
        let rec = AttendanceRecord {
            id: AttendanceRecord::key(&student_id, &date),
            student_id,
            class_id: class_id.clone(),
            date: date.clone(),
            status,
            note: opt_str(entry, "note")?,
        };
        // Last entry wins within one batch too.
        records.retain(|r| r.id != rec.id);
        records.push(rec);
    }

    store::attendance_put_batch(conn, &records)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(class_id = %class_id, date = %date, records = records.len(), "attendance saved");
    Ok(json!({ "saved": records.len() }))
}

/// `{classId, date}` or `{classId, month}`.
fn attendance_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = require_class(conn, params)?;
    let prefix = match (opt_str(params, "date")?, opt_str(params, "month")?) {
        (Some(d), None) => parse_date(&d, "date")?,
        (None, Some(m)) => parse_month_key(&m)?,
        _ => return Err(HandlerErr::bad_params("pass exactly one of date or month")),
    };
    let records = store::attendance_list(conn, &class_id, &prefix)?;
    Ok(json!({
        "records": serde_json::to_value(&records).map_err(crate::error::Error::from)?
    }))
}

/// Per-student status counts for a month. Holiday dates are not counted.
fn attendance_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = require_class(conn, params)?;
    let month = parse_month_key(&required_str(params, "month")?)?;
    let holidays: HashSet<String> = store::holidays_list(conn)?
        .into_iter()
        .filter(|h| h.date.starts_with(&month))
        .map(|h| h.date)
        .collect();
    let records = store::attendance_list(conn, &class_id, &month)?;

    let mut counts: BTreeMap<&str, BTreeMap<AttendanceStatus, u32>> = BTreeMap::new();
    let mut school_days: HashSet<&str> = HashSet::new();
    for rec in records.iter().filter(|r| !holidays.contains(&r.date)) {
        school_days.insert(rec.date.as_str());
        *counts
            .entry(rec.student_id.as_str())
            .or_default()
            .entry(rec.status)
            .or_default() += 1;
    }

    let students = store::students_for_class(conn, &class_id)?;
    let rows: Vec<Value> = students
        .iter()
        .map(|s| {
            let per = counts.get(s.id.as_str());
            let mut row = json!({ "studentId": s.id, "name": s.name });
            for status in AttendanceStatus::ALL {
                let n = per.and_then(|m| m.get(&status)).copied().unwrap_or(0);
                row[status.as_str()] = json!(n);
            }
            row
        })
        .collect();
    Ok(json!({
        "month": month,
        "schoolDays": school_days.len(),
        "holidays": holidays.len(),
        "students": rows,
    }))
}

fn holidays_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let holidays = store::holidays_list(conn)?;
    Ok(json!({
        "holidays": serde_json::to_value(&holidays).map_err(crate::error::Error::from)?
    }))
}

fn holidays_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let holiday = HolidayRecord {
        date: parse_date(&required_str(params, "date")?, "date")?,
        description: required_str(params, "description")?,
    };
    store::holiday_put(conn, &holiday)?;
    Ok(json!({ "ok": true }))
}

fn holidays_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let date = parse_date(&required_str(params, "date")?, "date")?;
    Ok(json!({ "deleted": store::holiday_delete(conn, &date)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: HandlerFn = match req.method.as_str() {
        "attendance.saveBatch" => attendance_save_batch,
        "attendance.list" => attendance_list,
        "attendance.summary" => attendance_summary,
        "holidays.list" => holidays_list,
        "holidays.upsert" => holidays_upsert,
        "holidays.delete" => holidays_delete,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
