use crate::gradebook;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    now_ms, object, opt_str, required_level, required_str, required_u32, with_conn, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Assessment, DplObservation, HafalanStatus, Student, SummativeAssessment};
use crate::session;
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, HandlerErr> {
    Ok(serde_json::to_value(v).map_err(crate::error::Error::from)?)
}

fn students_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let students = match opt_str(params, "classId")? {
        Some(class_id) => store::students_for_class(conn, &class_id)?,
        None => store::students_all(conn)?,
    };
    Ok(json!({ "students": to_value(&students)? }))
}

fn students_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let student = store::student_require(conn, &student_id)?;
    Ok(json!({ "student": to_value(&student)? }))
}

fn students_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    if !store::class_exists(conn, &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    let student = Student {
        id: Uuid::new_v4().to_string(),
        sort_order: store::next_student_sort_order(conn, &class_id)?,
        class_id,
        name: required_str(params, "name")?,
        nis: opt_str(params, "nis")?,
        assessments: Vec::new(),
        summatives: Vec::new(),
        dpl_observations: Vec::new(),
        hafalan: Vec::new(),
    };
    store::student_put(conn, &student)?;
    tracing::info!(student_id = %student.id, class_id = %student.class_id, "student created");
    Ok(json!({ "studentId": student.id }))
}

fn students_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let patch = Value::Object(object(params, "patch")?.clone());
    let mut student = store::student_require(conn, &student_id)?;
    for key in patch.as_object().into_iter().flat_map(|m| m.keys()) {
        match key.as_str() {
            "name" => student.name = required_str(&patch, "name")?,
            "nis" => student.nis = opt_str(&patch, "nis")?,
            "classId" => {
                let class_id = required_str(&patch, "classId")?;
                if !store::class_exists(conn, &class_id)? {
                    return Err(HandlerErr::not_found("class"));
                }
                if class_id != student.class_id {
                    student.sort_order = store::next_student_sort_order(conn, &class_id)?;
                    student.class_id = class_id;
                }
            }
            "sortOrder" => {
                student.sort_order = patch
                    .get("sortOrder")
                    .and_then(|v| v.as_i64())
                    .ok_or_else(|| HandlerErr::bad_params("sortOrder must be an integer"))?;
            }
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown student field: {}",
                    other
                )))
            }
        }
    }
    store::student_put(conn, &student)?;
    Ok(json!({ "ok": true }))
}

fn students_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    if !store::student_delete(conn, &student_id)? {
        return Err(HandlerErr::not_found("student"));
    }
    tracing::info!(student_id = %student_id, "student deleted");
    Ok(json!({ "ok": true }))
}

/// The objective must belong to the named plan so stray ids never reach
/// student rows.
fn require_objective(conn: &Connection, params: &Value) -> Result<String, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let tp_id = required_str(params, "tpId")?;
    let plan = store::plan_require(conn, &plan_id)?;
    if plan.curriculum.objective(&tp_id).is_none() {
        return Err(HandlerErr::not_found("objective"));
    }
    Ok(tp_id)
}

fn real_meeting(params: &Value) -> Result<u32, HandlerErr> {
    let pertemuan = required_u32(params, "pertemuan")?;
    session::check_meeting(pertemuan)?;
    Ok(pertemuan)
}

/// `{planId, tpId, pertemuan, entries: [{studentId, aspek, level, note?}]}`
fn assessments_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let tp_id = require_objective(conn, params)?;
    let pertemuan = real_meeting(params)?;
    let entries = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("entries must be an array"))?;
    let now = now_ms();

    let mut touched: Vec<Student> = Vec::new();
    for (i, entry) in entries.iter().enumerate() {
        let student_id = required_str(entry, "studentId")
            .map_err(|e| HandlerErr::bad_params(format!("entries[{}]: {}", i, e.message)))?;
        let row = Assessment {
            tp_id: tp_id.clone(),
            aspek: required_str(entry, "aspek")?,
            level: required_level(entry, "level")?,
            pertemuan,
            timestamp: now,
            note: opt_str(entry, "note")?,
        };
        let idx = match touched.iter().position(|s| s.id == student_id) {
            Some(idx) => idx,
            None => {
                touched.push(store::student_require(conn, &student_id)?);
                touched.len() - 1
            }
        };
        gradebook::upsert_assessment(&mut touched[idx], row)?;
    }

    let refs: Vec<&Student> = touched.iter().collect();
    store::commit(conn, None, &refs)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(tp_id = %tp_id, pertemuan, rows = entries.len(), students = refs.len(), "assessments recorded");
    Ok(json!({ "recorded": entries.len(), "students": refs.len() }))
}

fn assessments_list(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let tp_id = opt_str(params, "tpId")?;
    let student = store::student_require(conn, &student_id)?;
    let rows: Vec<&Assessment> = student
        .assessments
        .iter()
        .filter(|a| tp_id.as_deref().map_or(true, |tp| a.tp_id == tp))
        .collect();
    Ok(json!({ "assessments": to_value(&rows)? }))
}

/// `{studentId, input: {id?, tpId, title, score, date?}}`
fn summatives_upsert(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let input = Value::Object(object(params, "input")?.clone());
    let mut student = store::student_require(conn, &student_id)?;
    let score = input
        .get("score")
        .and_then(|v| v.as_f64())
        .ok_or_else(|| HandlerErr::bad_params("input.score must be a number"))?;
    let id = opt_str(&input, "id")?.unwrap_or_else(|| Uuid::new_v4().to_string());
    gradebook::upsert_summative(
        &mut student,
        SummativeAssessment {
            id: id.clone(),
            tp_id: required_str(&input, "tpId")?,
            title: required_str(&input, "title")?,
            score,
            date: opt_str(&input, "date")?,
            timestamp: now_ms(),
        },
    )?;
    store::student_put(conn, &student)?;
    Ok(json!({ "summativeId": id }))
}

fn summatives_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let summative_id = required_str(params, "summativeId")?;
    let mut student = store::student_require(conn, &student_id)?;
    if !gradebook::delete_summative(&mut student, &summative_id) {
        return Err(HandlerErr::not_found("summative"));
    }
    store::student_put(conn, &student)?;
    Ok(json!({ "ok": true }))
}

/// `{planId, tpId, studentId, dimension, pertemuan, level, note?}`
fn dpl_record(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let tp_id = require_objective(conn, params)?;
    let student_id = required_str(params, "studentId")?;
    let mut student = store::student_require(conn, &student_id)?;
    gradebook::upsert_dpl_observation(
        &mut student,
        DplObservation {
            tp_id,
            dimension: required_str(params, "dimension")?,
            pertemuan: real_meeting(params)?,
            level: required_level(params, "level")?,
            note: opt_str(params, "note")?,
            timestamp: now_ms(),
        },
    )?;
    store::student_put(conn, &student)?;
    Ok(json!({ "ok": true }))
}

fn hafalan_set(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let student_id = required_str(params, "studentId")?;
    let item_id = required_str(params, "itemId")?;
    let raw = required_str(params, "status")?;
    let status = HafalanStatus::parse(&raw)
        .ok_or_else(|| HandlerErr::bad_params("status must be belum, proses or hafal"))?;
    let mut student = store::student_require(conn, &student_id)?;
    gradebook::set_hafalan(&mut student, &item_id, status, now_ms());
    store::student_put(conn, &student)?;
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: HandlerFn = match req.method.as_str() {
        "students.list" => students_list,
        "students.get" => students_get,
        "students.create" => students_create,
        "students.update" => students_update,
        "students.delete" => students_delete,
        "assessments.record" => assessments_record,
        "assessments.list" => assessments_list,
        "summatives.upsert" => summatives_upsert,
        "summatives.delete" => summatives_delete,
        "dpl.record" => dpl_record,
        "hafalan.set" => hafalan_set,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
