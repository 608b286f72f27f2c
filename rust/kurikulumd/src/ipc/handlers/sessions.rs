//! Diagnostic, lesson-plan and adaptive-step commands for one objective,
//! plus the meeting-wide session operations.

use crate::ai::{AdaptiveRequest, Assistant, DiagnosticRequest, PlanRequest, RubricRequest};
use crate::error::Error;
use crate::ipc::error::HandlerErr;
use crate::ipc::handlers::setup::planning_setup;
use crate::ipc::helpers::{
    commit_snapshot, generator, load_snapshot, now_ms, object, opt_u32, required_str,
    required_text, required_u32, string_array, with_conn, HandlerFn,
};
use crate::ipc::types::{AppState, Request};
use crate::model::{Kktp, StepDecision};
use crate::session::{self, Snapshot};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::collections::HashMap;

fn to_value<T: serde::Serialize>(v: &T) -> Result<Value, HandlerErr> {
    Ok(serde_json::to_value(v).map_err(Error::from)?)
}

/// Loads the plan snapshot and the objective id every command here needs.
fn target(conn: &Connection, params: &Value) -> Result<(Snapshot, String), HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let tp_id = required_str(params, "tpId")?;
    let snap = load_snapshot(conn, &plan_id)?;
    if snap.plan.curriculum.objective(&tp_id).is_none() {
        return Err(HandlerErr::not_found("objective"));
    }
    Ok((snap, tp_id))
}

fn objective_json(snap: &Snapshot, tp_id: &str) -> Result<Value, HandlerErr> {
    let o = snap
        .plan
        .curriculum
        .objective(tp_id)
        .ok_or_else(|| HandlerErr::not_found("objective"))?;
    let mut v = to_value(o)?;
    v["stage"] = json!(session::stage(o).as_str());
    Ok(v)
}

fn time_allocation(conn: &Connection, params: &Value) -> Result<u32, HandlerErr> {
    match opt_u32(params, "timeAllocationMinutes")? {
        Some(0) => Err(HandlerErr::bad_params(
            "timeAllocationMinutes must be positive",
        )),
        Some(m) => Ok(m),
        None => Ok(planning_setup(conn)?.default_time_allocation_minutes),
    }
}

/// Asks the generator for a diagnostic recommendation and stores it as the
/// draft.
fn diagnostic_generate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (before, tp_id) = target(conn, params)?;
    let gen = generator(conn)?;
    let recommendation = Assistant::new(gen.as_ref()).diagnostic(&DiagnosticRequest {
        course: before.course(),
        objective: before.brief(&tp_id)?,
        students: before.student_briefs(&tp_id),
    })?;
    let after = session::save_diagnostic_draft(before.clone(), &tp_id, &recommendation, now_ms())?;
    let (after, _) = commit_snapshot(conn, &before.students, after)?;
    tracing::info!(plan_id = %after.plan.id, tp_id = %tp_id, "diagnostic generated");
    Ok(json!({
        "recommendation": recommendation,
        "objective": objective_json(&after, &tp_id)?,
    }))
}

fn diagnostic_save_draft(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (before, tp_id) = target(conn, params)?;
    let recommendation = required_text(params, "recommendation")?;
    let after = session::save_diagnostic_draft(before.clone(), &tp_id, &recommendation, now_ms())?;
    let (after, _) = commit_snapshot(conn, &before.students, after)?;
    tracing::info!(plan_id = %after.plan.id, tp_id = %tp_id, "diagnostic draft saved");
    Ok(json!({ "objective": objective_json(&after, &tp_id)? }))
}

fn diagnostic_save_summary(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (before, tp_id) = target(conn, params)?;
    let summary = required_text(params, "summary")?;
    let after = session::save_diagnostic_summary(before.clone(), &tp_id, &summary, now_ms())?;
    let (after, _) = commit_snapshot(conn, &before.students, after)?;
    tracing::info!(plan_id = %after.plan.id, tp_id = %tp_id, "diagnostic summary saved");
    Ok(json!({ "objective": objective_json(&after, &tp_id)? }))
}

/// `{planId, tpId, pertemuan?, timeAllocationMinutes?}`
fn plan_generate(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (before, tp_id) = target(conn, params)?;
    session::ensure_can_generate_plan(&before.plan, &tp_id)?;
    let pertemuan = opt_u32(params, "pertemuan")?.unwrap_or_else(|| before.next_meeting_number());
    session::ensure_meeting_open(&before.plan, &tp_id, pertemuan)?;
    let minutes = time_allocation(conn, params)?;
    let threshold = planning_setup(conn)?.levels.completion_threshold;

    let previous_completion = match before.previous_objective(&tp_id)? {
        Some(prev) => before.completion(&prev.id, threshold)?,
        None => None,
    };
    let summary = before
        .plan
        .curriculum
        .objective(&tp_id)
        .and_then(|o| o.diagnostic_data.as_ref())
        .and_then(|d| d.summary.clone())
        .unwrap_or_default();

    let gen = generator(conn)?;
    let lesson = Assistant::new(gen.as_ref()).lesson_plan(&PlanRequest {
        course: before.course(),
        objective: before.brief(&tp_id)?,
        students: before.student_briefs(&tp_id),
        summary,
        time_allocation_minutes: minutes,
        pertemuan,
        previous_completion,
    })?;
    let after = session::apply_generated_plan(before.clone(), &tp_id, lesson.clone(), now_ms())?;
    let (after, _) = commit_snapshot(conn, &before.students, after)?;
    tracing::info!(plan_id = %after.plan.id, tp_id = %tp_id, pertemuan, "lesson plan generated");
    Ok(json!({
        "lessonPlan": to_value(&lesson)?,
        "objective": objective_json(&after, &tp_id)?,
    }))
}

/// `{planId, tpId, pertemuan?, timeAllocationMinutes?}`
fn adaptive_next(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (before, tp_id) = target(conn, params)?;
    session::ensure_can_step(&before.plan, &tp_id)?;
    let pertemuan = opt_u32(params, "pertemuan")?.unwrap_or_else(|| before.next_meeting_number());
    session::ensure_meeting_open(&before.plan, &tp_id, pertemuan)?;
    let minutes = time_allocation(conn, params)?;
    let latest_plan = before
        .plan
        .curriculum
        .objective(&tp_id)
        .and_then(|o| o.latest_plan())
        .cloned()
        .ok_or_else(|| HandlerErr::new("invalid_state", "objective has no lesson plan"))?;
    let next_objective = before.next_objective(&tp_id)?.map(session::brief);

    let gen = generator(conn)?;
    let (decision, rationale) = Assistant::new(gen.as_ref()).adaptive_step(&AdaptiveRequest {
        course: before.course(),
        objective: before.brief(&tp_id)?,
        students: before.student_briefs(&tp_id),
        latest_plan,
        time_allocation_minutes: minutes,
        pertemuan,
        next_objective,
    })?;
    let proceed = matches!(decision, StepDecision::Proceed);
    let after =
        session::append_adaptive_step(before.clone(), &tp_id, decision, rationale, now_ms())?;
    let (after, _) = commit_snapshot(conn, &before.students, after)?;
    tracing::info!(
        plan_id = %after.plan.id,
        tp_id = %tp_id,
        decision = if proceed { "PROCEED" } else { "INTERVENTION" },
        "adaptive step appended"
    );
    let step = after
        .plan
        .curriculum
        .objective(&tp_id)
        .and_then(|o| o.adaptive_steps.last())
        .map(to_value)
        .transpose()?;
    Ok(json!({
        "step": step,
        "objective": objective_json(&after, &tp_id)?,
    }))
}

fn sessions_plan(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (before, tp_id) = target(conn, params)?;
    let pertemuan = required_u32(params, "pertemuan")?;
    let after = session::add_planned_session(before.clone(), &tp_id, pertemuan, now_ms())?;
    let (after, _) = commit_snapshot(conn, &before.students, after)?;
    Ok(json!({ "objective": objective_json(&after, &tp_id)? }))
}

/// Deletes one meeting across the plan and every student. Without an
/// explicit `pertemuan`, the latest real meeting is removed.
fn sessions_delete_latest(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let before = load_snapshot(conn, &plan_id)?;
    let pertemuan = match opt_u32(params, "pertemuan")? {
        Some(p) => p,
        None => before
            .latest_meeting_number()
            .ok_or_else(|| HandlerErr::new("invalid_state", "no meeting to delete"))?,
    };
    let after = session::delete_formative_session(before.clone(), pertemuan);
    let (after, changed) = commit_snapshot(conn, &before.students, after)?;
    tracing::info!(plan_id = %after.plan.id, pertemuan, students_changed = changed, "meeting deleted");
    Ok(json!({
        "pertemuan": pertemuan,
        "studentsChanged": changed,
        "latestMeetingNumber": after.latest_meeting_number(),
    }))
}

fn tp_reset(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let (before, tp_id) = target(conn, params)?;
    let after = session::reset_objective_data(before.clone(), &tp_id)?;
    let (after, changed) = commit_snapshot(conn, &before.students, after)?;
    tracing::info!(plan_id = %after.plan.id, tp_id = %tp_id, students_changed = changed, "objective reset");
    Ok(json!({
        "studentsChanged": changed,
        "objective": objective_json(&after, &tp_id)?,
    }))
}

/// `results: {studentId: {tpId: passed}}`
fn parse_sync_results(
    params: &Value,
    skipped: &[String],
) -> Result<HashMap<String, HashMap<String, bool>>, HandlerErr> {
    let raw = object(params, "results")?;
    let mut out = HashMap::with_capacity(raw.len());
    for (student_id, flags) in raw {
        let flags = flags.as_object().ok_or_else(|| {
            HandlerErr::bad_params(format!("results.{} must be an object", student_id))
        })?;
        let mut parsed = HashMap::with_capacity(flags.len());
        for (tp_id, passed) in flags {
            if !skipped.contains(tp_id) {
                return Err(HandlerErr::bad_params(format!(
                    "results.{}.{} is not a skipped objective",
                    student_id, tp_id
                )));
            }
            let passed = passed.as_bool().ok_or_else(|| {
                HandlerErr::bad_params(format!("results.{}.{} must be boolean", student_id, tp_id))
            })?;
            parsed.insert(tp_id.clone(), passed);
        }
        out.insert(student_id.clone(), parsed);
    }
    Ok(out)
}

/// Generates every missing rubric concurrently. Returns only when all of
/// them succeeded; the first failure is reported and nothing is kept.
fn generate_missing_rubrics(
    assistant: Assistant<'_>,
    snap: &Snapshot,
    skipped: &[String],
) -> Result<HashMap<String, Kktp>, HandlerErr> {
    let missing = session::missing_rubrics(&snap.plan, skipped)?;
    if missing.is_empty() {
        return Ok(HashMap::new());
    }
    let course = snap.course();
    let outcomes: Vec<(String, crate::error::Result<Kktp>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = missing
            .iter()
            .map(|o| {
                let req = RubricRequest {
                    course: course.clone(),
                    objective: session::brief(o),
                };
                let tp_id = o.id.clone();
                scope.spawn(move || (tp_id, assistant.rubric(&req)))
            })
            .collect();
        handles
            .into_iter()
            .map(|h| {
                h.join().unwrap_or_else(|_| {
                    (
                        String::new(),
                        Err(Error::Generator("rubric worker panicked".to_string())),
                    )
                })
            })
            .collect()
    });

    let mut generated = HashMap::with_capacity(outcomes.len());
    for (tp_id, outcome) in outcomes {
        match outcome {
            Ok(kktp) => {
                generated.insert(tp_id, kktp);
            }
            Err(e) => {
                let mut err = HandlerErr::from(e);
                err.details = Some(json!({ "tpId": tp_id }));
                return Err(err);
            }
        }
    }
    Ok(generated)
}

/// `{planId, skippedTpIds, results}`
fn quick_sync(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let plan_id = required_str(params, "planId")?;
    let skipped = string_array(params, "skippedTpIds")?;
    if skipped.is_empty() {
        return Err(HandlerErr::bad_params("skippedTpIds must not be empty"));
    }
    let results = parse_sync_results(params, &skipped)?;
    let before = load_snapshot(conn, &plan_id)?;
    let levels = planning_setup(conn)?.levels;

    let generated = if session::missing_rubrics(&before.plan, &skipped)?.is_empty() {
        HashMap::new()
    } else {
        let gen = generator(conn)?;
        generate_missing_rubrics(Assistant::new(gen.as_ref()), &before, &skipped)?
    };
    let mut generated_ids: Vec<String> = generated.keys().cloned().collect();
    generated_ids.sort();

    let after = session::quick_sync(before.clone(), &skipped, generated, &results, levels, now_ms())?;
    let (after, changed) = commit_snapshot(conn, &before.students, after)?;
    tracing::info!(
        plan_id = %after.plan.id,
        skipped = skipped.len(),
        rubrics_generated = generated_ids.len(),
        students_changed = changed,
        "quick sync committed"
    );
    Ok(json!({
        "generatedKktpTpIds": generated_ids,
        "studentsChanged": changed,
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: HandlerFn = match req.method.as_str() {
        "diagnostic.generate" => diagnostic_generate,
        "diagnostic.saveDraft" => diagnostic_save_draft,
        "diagnostic.saveSummary" => diagnostic_save_summary,
        "plan.generate" => plan_generate,
        "adaptive.next" => adaptive_next,
        "sessions.plan" => sessions_plan,
        "sessions.deleteLatest" => sessions_delete_latest,
        "tp.reset" => tp_reset,
        "quickSync" => quick_sync,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
