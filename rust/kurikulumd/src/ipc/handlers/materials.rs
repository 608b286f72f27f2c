use crate::ai::{Assistant, MaterialRequest};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    commit_snapshot, generator, load_snapshot, opt_bool, required_str, required_u32, with_conn,
    HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::MaterialKind;
use crate::session;
use rusqlite::Connection;
use serde_json::{json, Value};

/// `{planId, tpId, pertemuan, kind, force?}`. Cached HTML is returned
/// unless `force` asks for a fresh copy.
fn materials_generate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let tp_id = required_str(params, "tpId")?;
    let pertemuan = required_u32(params, "pertemuan")?;
    let kind_raw = required_str(params, "kind")?;
    let kind = MaterialKind::parse(&kind_raw)
        .ok_or_else(|| HandlerErr::bad_params("kind must be reading, worksheet, game or quiz"))?;
    let force = opt_bool(params, "force", false)?;

    let before = load_snapshot(conn, &plan_id)?;
    let lesson = session::lesson_plan_at(&before.plan, &tp_id, pertemuan)?;
    if !force {
        if let Some(html) = lesson.materials.get(&kind) {
            return Ok(json!({ "html": html, "cached": true }));
        }
    }

    let gen = generator(conn)?;
    let html = Assistant::new(gen.as_ref()).material(&MaterialRequest {
        course: before.course(),
        objective: before.brief(&tp_id)?,
        plan: lesson.clone(),
        kind,
    })?;
    let after = session::store_material(before.clone(), &tp_id, pertemuan, kind, html.clone())?;
    commit_snapshot(conn, &before.students, after)?;
    tracing::info!(plan_id = %plan_id, tp_id = %tp_id, pertemuan, kind = kind.as_str(), "material cached");
    Ok(json!({ "html": html, "cached": false }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: HandlerFn = match req.method.as_str() {
        "materials.generate" => materials_generate,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
