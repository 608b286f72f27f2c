use crate::db;
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::helpers::{opt_str, with_conn, HandlerFn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string())
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            let version = db::schema_version(&conn).unwrap_or_default();
            tracing::info!(path = %path.display(), schema_version = version, "workspace opened");
            state.workspace = Some(path.clone());
            state.db = Some(conn);
            ok(
                &req.id,
                json!({ "workspacePath": path.to_string_lossy(), "schemaVersion": version }),
            )
        }
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "workspace open failed");
            err(&req.id, "db_open_failed", format!("{e:?}"), None)
        }
    }
}

fn active_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let plan = db::settings_get_json(conn, db::ACTIVE_PLAN_KEY)?.unwrap_or(Value::Null);
    let class = db::settings_get_json(conn, db::ACTIVE_CLASS_KEY)?.unwrap_or(Value::Null);
    Ok(json!({ "activePlanId": plan, "activeClassId": class }))
}

fn set_or_clear(conn: &Connection, key: &str, value: Option<String>) -> anyhow::Result<()> {
    match value {
        Some(v) => db::settings_set_json(conn, key, &Value::String(v)),
        None => db::settings_delete(conn, key),
    }
}

/// Only the keys present in params are touched; null clears.
fn active_set(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    if params.get("planId").is_some() {
        let plan_id = opt_str(params, "planId")?;
        if let Some(id) = plan_id.as_deref() {
            if crate::store::plan_get(conn, id)?.is_none() {
                return Err(HandlerErr::not_found("learning plan"));
            }
        }
        set_or_clear(conn, db::ACTIVE_PLAN_KEY, plan_id)?;
    }
    if params.get("classId").is_some() {
        let class_id = opt_str(params, "classId")?;
        if let Some(id) = class_id.as_deref() {
            if !crate::store::class_exists(conn, id)? {
                return Err(HandlerErr::not_found("class"));
            }
        }
        set_or_clear(conn, db::ACTIVE_CLASS_KEY, class_id)?;
    }
    active_get(conn, params)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    match req.method.as_str() {
        "health" => return Some(handle_health(state, req)),
        "workspace.select" => return Some(handle_workspace_select(state, req)),
        _ => {}
    }
    let f: HandlerFn = match req.method.as_str() {
        "app.getActive" => active_get,
        "app.setActive" => active_set,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
