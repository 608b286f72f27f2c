use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{object, opt_str, required_str, with_conn, HandlerFn};
use crate::ipc::types::{AppState, Request};
use crate::model::ClassProfile;
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn classes_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let classes = store::classes_list(conn)?;
    let mut out = Vec::with_capacity(classes.len());
    for c in classes {
        let student_count = store::students_for_class(conn, &c.id)?.len();
        let mut v = serde_json::to_value(&c).map_err(crate::error::Error::from)?;
        v["studentCount"] = json!(student_count);
        out.push(v);
    }
    Ok(json!({ "classes": out }))
}

fn classes_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class = ClassProfile {
        id: Uuid::new_v4().to_string(),
        name: required_str(params, "name")?,
        grade: opt_str(params, "grade")?,
        academic_year: opt_str(params, "academicYear")?,
    };
    store::class_put(conn, &class)?;
    tracing::info!(class_id = %class.id, "class created");
    Ok(json!({ "classId": class.id }))
}

fn classes_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    let patch = object(params, "patch")?;
    let mut class = store::classes_list(conn)?
        .into_iter()
        .find(|c| c.id == class_id)
        .ok_or_else(|| HandlerErr::not_found("class"))?;
    let patch = Value::Object(patch.clone());
    for key in patch.as_object().into_iter().flat_map(|m| m.keys()) {
        match key.as_str() {
            "name" => class.name = required_str(&patch, "name")?,
            "grade" => class.grade = opt_str(&patch, "grade")?,
            "academicYear" => class.academic_year = opt_str(&patch, "academicYear")?,
            other => return Err(HandlerErr::bad_params(format!("unknown class field: {}", other))),
        }
    }
    store::class_put(conn, &class)?;
    Ok(json!({ "ok": true }))
}

fn classes_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = required_str(params, "classId")?;
    if !store::students_for_class(conn, &class_id)?.is_empty() {
        return Err(HandlerErr::new(
            "invalid_state",
            "class still has students; move or delete them first",
        ));
    }
    if !store::class_delete(conn, &class_id)? {
        return Err(HandlerErr::not_found("class"));
    }
    tracing::info!(class_id = %class_id, "class deleted");
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: HandlerFn = match req.method.as_str() {
        "classes.list" => classes_list,
        "classes.create" => classes_create,
        "classes.update" => classes_update,
        "classes.delete" => classes_delete,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
