use crate::ai::{self, Generator};
use crate::ipc::error::{err, ok, HandlerErr};
use crate::ipc::handlers::setup;
use crate::ipc::types::{AppState, Request};
use crate::session::Snapshot;
use crate::store;
use rusqlite::Connection;
use serde_json::Value;

pub type HandlerFn = fn(&Connection, &Value) -> Result<Value, HandlerErr>;

/// Runs a handler against the open workspace and wraps the outcome in a
/// response envelope.
pub fn with_conn(state: &AppState, req: &Request, f: HandlerFn) -> Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    match f(conn, &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => {
            if e.code == "ai_failed" || e.code == "ai_invalid_response" {
                tracing::warn!(method = %req.method, code = e.code, message = %e.message, "generator error");
            }
            e.response(&req.id)
        }
    }
}

pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub fn required_str(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|v| v.trim().to_string())
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn opt_str(params: &Value, key: &str) -> Result<Option<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => {
            let s = v
                .as_str()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be string or null", key)))?
                .trim()
                .to_string();
            Ok(if s.is_empty() { None } else { Some(s) })
        }
    }
}

/// Raw text, preserving inner whitespace; still rejects non-strings.
pub fn required_text(params: &Value, key: &str) -> Result<String, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn opt_u32(params: &Value, key: &str) -> Result<Option<u32>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be a non-negative integer", key))),
    }
}

pub fn required_u32(params: &Value, key: &str) -> Result<u32, HandlerErr> {
    opt_u32(params, key)?.ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

pub fn required_level(params: &Value, key: &str) -> Result<u8, HandlerErr> {
    let n = required_u32(params, key)?;
    u8::try_from(n)
        .ok()
        .filter(|l| *l <= crate::gradebook::MAX_LEVEL)
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be between 0 and 4", key)))
}

pub fn opt_bool(params: &Value, key: &str, default: bool) -> Result<bool, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(default),
        Some(v) => v
            .as_bool()
            .ok_or_else(|| HandlerErr::bad_params(format!("{} must be boolean", key))),
    }
}

pub fn string_array(params: &Value, key: &str) -> Result<Vec<String>, HandlerErr> {
    match params.get(key) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(v) => {
            let arr = v
                .as_array()
                .ok_or_else(|| HandlerErr::bad_params(format!("{} must be array of strings", key)))?;
            let mut out = Vec::with_capacity(arr.len());
            for item in arr {
                let s = item
                    .as_str()
                    .ok_or_else(|| HandlerErr::bad_params(format!("{} must be array of strings", key)))?
                    .trim()
                    .to_string();
                if !s.is_empty() && !out.contains(&s) {
                    out.push(s);
                }
            }
            Ok(out)
        }
    }
}

pub fn object<'v>(params: &'v Value, key: &str) -> Result<&'v serde_json::Map<String, Value>, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_object())
        .ok_or_else(|| HandlerErr::bad_params(format!("{} must be an object", key)))
}

pub fn load_snapshot(conn: &Connection, plan_id: &str) -> Result<Snapshot, HandlerErr> {
    Ok(Snapshot {
        plan: store::plan_require(conn, plan_id)?,
        students: store::students_all(conn)?,
    })
}

/// Persists a command result: the plan plus every student that differs
/// from `before`, in one transaction. Returns how many students changed.
pub fn commit_snapshot(
    conn: &Connection,
    before: &[crate::model::Student],
    mut snap: Snapshot,
) -> Result<(Snapshot, usize), HandlerErr> {
    snap.plan.updated_at = now_ms();
    let changed = store::changed_students(before, &snap.students);
    let n = changed.len();
    store::commit(conn, Some(&snap.plan), &changed)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    Ok((snap, n))
}

pub fn generator(conn: &Connection) -> Result<Box<dyn Generator>, HandlerErr> {
    let setup = setup::ai_setup(conn)?;
    Ok(ai::build(conn, &setup)?)
}

/// Host-supplied documents go through the same validators as generator
/// output; shape errors are reported as bad params rooted at `key`.
pub fn host_shape(e: crate::error::Error, key: &str) -> HandlerErr {
    match e {
        crate::error::Error::InvalidResponse { path, message } => {
            let path = path.replacen('$', key, 1);
            let mut err = HandlerErr::bad_params(format!("{}: {}", path, message));
            err.details = Some(serde_json::json!({ "path": path }));
            err
        }
        other => other.into(),
    }
}
