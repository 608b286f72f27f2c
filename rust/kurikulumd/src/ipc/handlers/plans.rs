//! Learning plans, their objectives and rubrics, and every path that
//! regenerates the objective set.

use crate::ai::{validate, Assistant, ObjectivesRequest, RubricRequest, SequenceRequest};
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{
    commit_snapshot, generator, host_shape, load_snapshot, now_ms, object, opt_bool, opt_str,
    required_str, with_conn, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{CurriculumData, LearningObjective, LearningPlan, TeachingUnit};
use crate::reconcile::{self, ObjectiveDraft};
use crate::session::{self, Snapshot};
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Value};
use uuid::Uuid;

fn plan_json(plan: &LearningPlan) -> Result<Value, HandlerErr> {
    Ok(serde_json::to_value(plan).map_err(crate::error::Error::from)?)
}

fn plans_list(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    let plans = store::plans_list(conn)?;
    let rows: Vec<Value> = plans
        .iter()
        .map(|p| {
            json!({
                "id": p.id,
                "name": p.name,
                "classId": p.class_id,
                "subject": p.subject,
                "grade": p.grade,
                "objectiveCount": p.curriculum.objectives.len(),
                "updatedAt": p.updated_at,
            })
        })
        .collect();
    Ok(json!({ "plans": rows }))
}

fn plans_open(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let plan = store::plan_require(conn, &plan_id)?;
    Ok(json!({ "plan": plan_json(&plan)? }))
}

fn plans_create(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let class_id = opt_str(params, "classId")?;
    if let Some(id) = class_id.as_deref() {
        if !store::class_exists(conn, id)? {
            return Err(HandlerErr::not_found("class"));
        }
    }
    let now = now_ms();
    let plan = LearningPlan {
        id: Uuid::new_v4().to_string(),
        name: required_str(params, "name")?,
        class_id,
        subject: opt_str(params, "subject")?.unwrap_or_default(),
        grade: opt_str(params, "grade")?.unwrap_or_default(),
        curriculum: CurriculumData::default(),
        created_at: now,
        updated_at: now,
    };
    store::plan_put(conn, &plan)?;
    tracing::info!(plan_id = %plan.id, "learning plan created");
    Ok(json!({ "planId": plan.id }))
}

fn plans_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let patch = Value::Object(object(params, "patch")?.clone());
    let mut plan = store::plan_require(conn, &plan_id)?;
    for key in patch.as_object().into_iter().flat_map(|m| m.keys()) {
        match key.as_str() {
            "name" => plan.name = required_str(&patch, "name")?,
            "subject" => plan.subject = opt_str(&patch, "subject")?.unwrap_or_default(),
            "grade" => plan.grade = opt_str(&patch, "grade")?.unwrap_or_default(),
            "classId" => {
                let class_id = opt_str(&patch, "classId")?;
                if let Some(id) = class_id.as_deref() {
                    if !store::class_exists(conn, id)? {
                        return Err(HandlerErr::not_found("class"));
                    }
                }
                plan.class_id = class_id;
            }
            other => {
                return Err(HandlerErr::bad_params(format!(
                    "unknown plan field: {}",
                    other
                )))
            }
        }
    }
    plan.updated_at = now_ms();
    store::plan_put(conn, &plan)?;
    Ok(json!({ "ok": true }))
}

/// Removing a plan removes its objectives, so their student rows go too.
fn plans_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let before = load_snapshot(conn, &plan_id)?;
    let after = session::replace_curriculum(before.clone(), Vec::new(), Vec::new());
    let changed = store::changed_students(&before.students, &after.students);
    store::plan_discard(conn, &plan_id, &changed)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;

    let active = db::settings_get_json(conn, db::ACTIVE_PLAN_KEY)?;
    if active.as_ref().and_then(|v| v.as_str()) == Some(plan_id.as_str()) {
        db::settings_delete(conn, db::ACTIVE_PLAN_KEY)?;
    }
    tracing::info!(plan_id = %plan_id, students_changed = changed.len(), "learning plan deleted");
    Ok(json!({ "ok": true, "studentsChanged": changed.len() }))
}

fn objectives_status(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let snap = load_snapshot(conn, &plan_id)?;
    let objectives: Vec<Value> = snap
        .plan
        .curriculum
        .objectives
        .iter()
        .map(|o| {
            json!({
                "tpId": o.id,
                "description": o.description,
                "stage": session::stage(o).as_str(),
                "hasKktp": o.kktp.is_some(),
                "latestPlanMeeting": o.latest_plan().map(|p| p.pertemuan_ke),
                "adaptiveSteps": o.adaptive_steps.len(),
                "plannedSessions": o.planned_sessions.iter().map(|p| p.pertemuan).collect::<Vec<_>>(),
            })
        })
        .collect();
    Ok(json!({
        "objectives": objectives,
        "nextMeetingNumber": snap.next_meeting_number(),
        "latestMeetingNumber": snap.latest_meeting_number(),
    }))
}

fn kktp_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let tp_id = required_str(params, "tpId")?;
    let raw = params
        .get("kktp")
        .ok_or_else(|| HandlerErr::bad_params("missing kktp"))?;
    let kktp = validate::rubric(raw).map_err(|e| host_shape(e, "kktp"))?;

    let mut plan = store::plan_require(conn, &plan_id)?;
    let o = plan
        .curriculum
        .objective_mut(&tp_id)
        .ok_or_else(|| HandlerErr::not_found("objective"))?;
    o.kktp = Some(kktp);
    plan.updated_at = now_ms();
    store::plan_put(conn, &plan)?;
    tracing::info!(plan_id = %plan_id, tp_id = %tp_id, "rubric updated");
    Ok(json!({ "ok": true }))
}

fn kktp_generate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let tp_id = required_str(params, "tpId")?;
    let force = opt_bool(params, "force", false)?;
    let mut plan = store::plan_require(conn, &plan_id)?;
    let o = plan
        .curriculum
        .objective(&tp_id)
        .ok_or_else(|| HandlerErr::not_found("objective"))?;
    if o.kktp.is_some() && !force {
        return Err(HandlerErr::new(
            "invalid_state",
            "objective already has a rubric; pass force to replace it",
        ));
    }

    let gen = generator(conn)?;
    let kktp = Assistant::new(gen.as_ref()).rubric(&RubricRequest {
        course: crate::ai::Course {
            subject: plan.subject.clone(),
            grade: plan.grade.clone(),
        },
        objective: session::brief(o),
    })?;

    if let Some(o) = plan.curriculum.objective_mut(&tp_id) {
        o.kktp = Some(kktp.clone());
    }
    plan.updated_at = now_ms();
    store::plan_put(conn, &plan)?;
    tracing::info!(plan_id = %plan_id, tp_id = %tp_id, aspects = kktp.aspects.len(), "rubric generated");
    Ok(json!({ "kktp": serde_json::to_value(&kktp).map_err(crate::error::Error::from)? }))
}

fn parse_drafts(params: &Value) -> Result<Vec<ObjectiveDraft>, HandlerErr> {
    let raw = params
        .get("objectives")
        .ok_or_else(|| HandlerErr::bad_params("missing objectives"))?;
    validate::objectives(&json!({ "objectives": raw })).map_err(|e| host_shape(e, "params"))
}

/// Commits a new objective list and reports what the sweep removed.
fn commit_curriculum(
    conn: &Connection,
    method: &str,
    before: Snapshot,
    objectives: Vec<LearningObjective>,
    units: Vec<TeachingUnit>,
) -> Result<Value, HandlerErr> {
    let old_ids = before.plan.curriculum.objective_ids();
    let removed = reconcile::deleted_objective_ids(
        old_ids.iter().map(String::as_str),
        objectives.iter().map(|o| o.id.as_str()),
    );
    let after = session::replace_curriculum(before.clone(), objectives, units);
    let (after, changed) = commit_snapshot(conn, &before.students, after)?;
    let mut removed: Vec<String> = removed.into_iter().collect();
    removed.sort();
    tracing::info!(
        method,
        plan_id = %after.plan.id,
        objectives = after.plan.curriculum.objectives.len(),
        removed = removed.len(),
        students_changed = changed,
        "curriculum replaced"
    );
    Ok(json!({
        "plan": plan_json(&after.plan)?,
        "removedTpIds": removed,
        "studentsChanged": changed,
    }))
}

fn merge(before: &Snapshot, drafts: Vec<ObjectiveDraft>) -> Vec<LearningObjective> {
    reconcile::merge_objectives(&before.plan.curriculum.objectives, drafts, || {
        Uuid::new_v4().to_string()
    })
}

/// Host-edited objective list. Entries carrying an existing id keep that
/// objective's rubric, diagnostic data and adaptive log.
fn tps_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let drafts = parse_drafts(params)?;
    let before = load_snapshot(conn, &plan_id)?;
    let objectives = merge(&before, drafts);
    let units = before.plan.curriculum.units.clone();
    commit_curriculum(conn, "tps.update", before, objectives, units)
}

fn generate_objectives(
    assistant: Assistant<'_>,
    snap: &Snapshot,
    context: Option<String>,
) -> Result<Vec<LearningObjective>, HandlerErr> {
    let drafts = assistant.objectives(&ObjectivesRequest {
        course: snap.course(),
        context,
        existing: snap
            .plan
            .curriculum
            .objectives
            .iter()
            .map(session::brief)
            .collect(),
    })?;
    Ok(merge(snap, drafts))
}

fn sequence_request(snap: &Snapshot, objectives: &[LearningObjective]) -> SequenceRequest {
    SequenceRequest {
        course: snap.course(),
        objectives: objectives.iter().map(session::brief).collect(),
    }
}

fn curriculum_regenerate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let context = opt_str(params, "context")?;
    let before = load_snapshot(conn, &plan_id)?;
    let gen = generator(conn)?;
    let objectives = generate_objectives(Assistant::new(gen.as_ref()), &before, context)?;
    let units = before.plan.curriculum.units.clone();
    commit_curriculum(conn, "curriculum.regenerate", before, objectives, units)
}

/// New teaching order and unit grouping over the current objectives.
fn atp_regenerate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let before = load_snapshot(conn, &plan_id)?;
    if before.plan.curriculum.objectives.is_empty() {
        return Err(HandlerErr::new(
            "invalid_state",
            "plan has no objectives to sequence",
        ));
    }
    let gen = generator(conn)?;
    let assistant = Assistant::new(gen.as_ref());
    let req = sequence_request(&before, &before.plan.curriculum.objectives);
    let order = assistant.atp_order(&req)?;
    let units = assistant.units(&req)?;
    let objectives = session::reorder_objectives(&before.plan.curriculum.objectives, &order);
    commit_curriculum(conn, "atp.regenerate", before, objectives, units)
}

/// Objectives, order and units regenerated in one go.
fn atp_full_regenerate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let context = opt_str(params, "context")?;
    let before = load_snapshot(conn, &plan_id)?;
    let gen = generator(conn)?;
    let assistant = Assistant::new(gen.as_ref());
    let objectives = generate_objectives(assistant, &before, context)?;
    let req = sequence_request(&before, &objectives);
    let order = assistant.atp_order(&req)?;
    let units = assistant.units(&req)?;
    let objectives = session::reorder_objectives(&objectives, &order);
    commit_curriculum(conn, "atp.fullRegenerate", before, objectives, units)
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: HandlerFn = match req.method.as_str() {
        "plans.list" => plans_list,
        "plans.open" => plans_open,
        "plans.create" => plans_create,
        "plans.update" => plans_update,
        "plans.delete" => plans_delete,
        "objectives.status" => objectives_status,
        "kktp.update" => kktp_update,
        "kktp.generate" => kktp_generate,
        "tps.update" => tps_update,
        "curriculum.regenerate" => curriculum_regenerate,
        "atp.regenerate" => atp_regenerate,
        "atp.fullRegenerate" => atp_full_regenerate,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
