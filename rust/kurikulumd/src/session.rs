//! Lesson-session lifecycle of a learning objective.
//!
//! Every command takes the current [`Snapshot`] by value and returns the
//! next one. Nothing here touches storage or the generator; handlers load
//! the snapshot, call the generator when a command needs it, and commit the
//! returned snapshot in one transaction.

use crate::ai::{Course, ObjectiveBrief, ObjectiveCompletion, StudentBrief};
use crate::error::{Error, Result};
use crate::gradebook;
use crate::model::{
    AdaptiveLessonStep, Assessment, DiagnosticData, Kktp, LearningObjective, LearningPlan,
    LessonPlan, MaterialKind, PlannedSession, StepDecision, Student, TeachingUnit, MAX_MEETING,
    SYNC_MEETING,
};
use crate::reconcile;
use std::collections::{HashMap, HashSet};

#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    pub plan: LearningPlan,
    /// Every student in the workspace; sweeps must reach all of them.
    pub students: Vec<Student>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    NoDiagnostic,
    DiagnosticDrafted,
    DiagnosticScored,
    PlanGenerated,
    AdaptiveCycle,
    /// Last adaptive step was PROCEED.
    Completed,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::NoDiagnostic => "noDiagnostic",
            Stage::DiagnosticDrafted => "diagnosticDrafted",
            Stage::DiagnosticScored => "diagnosticScored",
            Stage::PlanGenerated => "planGenerated",
            Stage::AdaptiveCycle => "adaptiveCycle",
            Stage::Completed => "completed",
        }
    }
}

pub fn stage(o: &LearningObjective) -> Stage {
    let Some(d) = o.diagnostic_data.as_ref() else {
        return Stage::NoDiagnostic;
    };
    if d.plan.is_some() {
        return match o.adaptive_steps.last() {
            None => Stage::PlanGenerated,
            Some(step) if step.is_proceed() => Stage::Completed,
            Some(_) => Stage::AdaptiveCycle,
        };
    }
    if d.summary.is_some() {
        Stage::DiagnosticScored
    } else if d.recommendation.is_some() {
        Stage::DiagnosticDrafted
    } else {
        Stage::NoDiagnostic
    }
}

/// Percentage-free pass/fail levels used when backfilling and judging
/// completion; resolved from `setup.planning`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Levels {
    pub pass: u8,
    pub fail: u8,
    pub completion_threshold: u8,
}

impl Default for Levels {
    fn default() -> Self {
        Levels {
            pass: 3,
            fail: 1,
            completion_threshold: 3,
        }
    }
}

fn objective<'p>(plan: &'p LearningPlan, tp_id: &str) -> Result<&'p LearningObjective> {
    plan.curriculum
        .objective(tp_id)
        .ok_or_else(|| Error::NotFound(format!("objective {}", tp_id)))
}

fn objective_mut<'p>(plan: &'p mut LearningPlan, tp_id: &str) -> Result<&'p mut LearningObjective> {
    plan.curriculum
        .objective_mut(tp_id)
        .ok_or_else(|| Error::NotFound(format!("objective {}", tp_id)))
}

impl Snapshot {
    fn plan_tp_ids(&self) -> HashSet<&str> {
        self.plan
            .curriculum
            .objectives
            .iter()
            .map(|o| o.id.as_str())
            .collect()
    }

    /// Students of the plan's class, or everyone when the plan has no class.
    pub fn roster(&self) -> Vec<&Student> {
        self.students
            .iter()
            .filter(|s| match &self.plan.class_id {
                Some(c) => &s.class_id == c,
                None => true,
            })
            .collect()
    }

    fn used_meetings(&self) -> impl Iterator<Item = u32> + '_ {
        let tps = self.plan_tp_ids();
        let from_plan = self
            .plan
            .curriculum
            .objectives
            .iter()
            .flat_map(|o| o.meetings());
        let from_rows: Vec<u32> = self
            .students
            .iter()
            .flat_map(|s| {
                s.assessments
                    .iter()
                    .filter(|a| tps.contains(a.tp_id.as_str()))
                    .map(|a| a.pertemuan)
                    .chain(
                        s.dpl_observations
                            .iter()
                            .filter(|o| tps.contains(o.tp_id.as_str()))
                            .map(|o| o.pertemuan),
                    )
            })
            .collect();
        from_plan.chain(from_rows)
    }

    /// Imported documents are not range-checked, so this saturates instead
    /// of overflowing; [`check_meeting`] rejects the result if it is too big.
    pub fn next_meeting_number(&self) -> u32 {
        self.used_meetings().max().unwrap_or(0).saturating_add(1)
    }

    /// Highest real meeting in use; the backfill meeting 0 never counts.
    pub fn latest_meeting_number(&self) -> Option<u32> {
        self.used_meetings().filter(|p| *p > SYNC_MEETING).max()
    }

    pub fn course(&self) -> Course {
        Course {
            subject: self.plan.subject.clone(),
            grade: self.plan.grade.clone(),
        }
    }

    pub fn brief(&self, tp_id: &str) -> Result<ObjectiveBrief> {
        Ok(brief(objective(&self.plan, tp_id)?))
    }

    pub fn student_briefs(&self, tp_id: &str) -> Vec<StudentBrief> {
        self.roster()
            .into_iter()
            .map(|s| StudentBrief {
                id: s.id.clone(),
                name: s.name.clone(),
                assessments: s
                    .assessments
                    .iter()
                    .filter(|a| a.tp_id == tp_id)
                    .cloned()
                    .collect(),
            })
            .collect()
    }

    fn neighbour(&self, tp_id: &str, offset: isize) -> Result<Option<&LearningObjective>> {
        let objectives = &self.plan.curriculum.objectives;
        let idx = objectives
            .iter()
            .position(|o| o.id == tp_id)
            .ok_or_else(|| Error::NotFound(format!("objective {}", tp_id)))?;
        Ok(idx
            .checked_add_signed(offset)
            .and_then(|i| objectives.get(i)))
    }

    pub fn previous_objective(&self, tp_id: &str) -> Result<Option<&LearningObjective>> {
        self.neighbour(tp_id, -1)
    }

    pub fn next_objective(&self, tp_id: &str) -> Result<Option<&LearningObjective>> {
        self.neighbour(tp_id, 1)
    }

    /// Who finished `tp_id`: every rubric aspect at or above the threshold
    /// at the student's latest meeting for that aspect. `None` without a
    /// rubric.
    pub fn completion(&self, tp_id: &str, threshold: u8) -> Result<Option<ObjectiveCompletion>> {
        let o = objective(&self.plan, tp_id)?;
        let Some(kktp) = o.kktp.as_ref() else {
            return Ok(None);
        };
        let mut completed = Vec::new();
        let mut not_completed = Vec::new();
        for s in self.roster() {
            let done = kktp.aspects.iter().all(|a| {
                gradebook::latest_level(s, tp_id, &a.aspek).is_some_and(|l| l >= threshold)
            });
            if done {
                completed.push(s.id.clone());
            } else {
                not_completed.push(s.id.clone());
            }
        }
        Ok(Some(ObjectiveCompletion {
            tp_id: o.id.clone(),
            description: o.description.clone(),
            completed,
            not_completed,
        }))
    }
}

pub fn brief(o: &LearningObjective) -> ObjectiveBrief {
    ObjectiveBrief {
        id: o.id.clone(),
        description: o.description.clone(),
        competencies: o.competencies.clone(),
        kktp: o.kktp.clone(),
    }
}

fn non_empty(value: &str, what: &str) -> Result<String> {
    let v = value.trim();
    if v.is_empty() {
        return Err(Error::Validation(format!("{} must not be empty", what)));
    }
    Ok(v.to_string())
}

/// Stores a diagnostic recommendation. Any earlier summary is discarded
/// since it was scored against the old draft.
pub fn save_diagnostic_draft(
    mut snap: Snapshot,
    tp_id: &str,
    recommendation: &str,
    now: i64,
) -> Result<Snapshot> {
    let recommendation = non_empty(recommendation, "recommendation")?;
    let o = objective_mut(&mut snap.plan, tp_id)?;
    if matches!(
        stage(o),
        Stage::PlanGenerated | Stage::AdaptiveCycle | Stage::Completed
    ) {
        return Err(Error::InvalidState(
            "a lesson plan already exists; reset the objective first".to_string(),
        ));
    }
    o.diagnostic_data = Some(DiagnosticData {
        recommendation: Some(recommendation),
        summary: None,
        plan: None,
        timestamp: now,
    });
    Ok(snap)
}

pub fn save_diagnostic_summary(
    mut snap: Snapshot,
    tp_id: &str,
    summary: &str,
    now: i64,
) -> Result<Snapshot> {
    let summary = non_empty(summary, "summary")?;
    let o = objective_mut(&mut snap.plan, tp_id)?;
    match stage(o) {
        Stage::DiagnosticDrafted | Stage::DiagnosticScored => {}
        Stage::NoDiagnostic => {
            return Err(Error::InvalidState(
                "save a diagnostic draft before scoring it".to_string(),
            ))
        }
        _ => {
            return Err(Error::InvalidState(
                "a lesson plan already exists; reset the objective first".to_string(),
            ))
        }
    }
    if let Some(d) = o.diagnostic_data.as_mut() {
        d.summary = Some(summary);
        d.timestamp = now;
    }
    Ok(snap)
}

pub fn ensure_can_generate_plan(plan: &LearningPlan, tp_id: &str) -> Result<()> {
    match stage(objective(plan, tp_id)?) {
        Stage::DiagnosticScored => Ok(()),
        Stage::NoDiagnostic | Stage::DiagnosticDrafted => Err(Error::InvalidState(
            "diagnostic summary is required before generating a plan".to_string(),
        )),
        _ => Err(Error::InvalidState(
            "objective already has a lesson plan".to_string(),
        )),
    }
}

/// A real meeting is numbered `1..=MAX_MEETING`; meeting 0 belongs to
/// quick sync.
pub fn check_meeting(pertemuan: u32) -> Result<()> {
    if pertemuan == SYNC_MEETING {
        return Err(Error::Validation(
            "meeting 0 is reserved for synced results".to_string(),
        ));
    }
    if pertemuan > MAX_MEETING {
        return Err(Error::Validation(format!(
            "meeting number must not exceed {}",
            MAX_MEETING
        )));
    }
    Ok(())
}

fn ensure_meeting_free(o: &LearningObjective, pertemuan: u32) -> Result<()> {
    check_meeting(pertemuan)?;
    let taken = o
        .diagnostic_data
        .as_ref()
        .and_then(|d| d.plan.as_ref())
        .into_iter()
        .chain(o.adaptive_steps.iter().filter_map(|s| s.plan()))
        .any(|p| p.pertemuan_ke == pertemuan);
    if taken {
        return Err(Error::InvalidState(format!(
            "meeting {} already has a plan for this objective",
            pertemuan
        )));
    }
    Ok(())
}

/// Checked before the generator is called so a taken or out-of-range
/// meeting costs no generation.
pub fn ensure_meeting_open(plan: &LearningPlan, tp_id: &str, pertemuan: u32) -> Result<()> {
    ensure_meeting_free(objective(plan, tp_id)?, pertemuan)
}

pub fn apply_generated_plan(
    mut snap: Snapshot,
    tp_id: &str,
    plan: LessonPlan,
    now: i64,
) -> Result<Snapshot> {
    ensure_can_generate_plan(&snap.plan, tp_id)?;
    let o = objective_mut(&mut snap.plan, tp_id)?;
    ensure_meeting_free(o, plan.pertemuan_ke)?;
    if let Some(d) = o.diagnostic_data.as_mut() {
        d.plan = Some(plan);
        d.timestamp = now;
    }
    Ok(snap)
}

pub fn ensure_can_step(plan: &LearningPlan, tp_id: &str) -> Result<()> {
    match stage(objective(plan, tp_id)?) {
        Stage::PlanGenerated | Stage::AdaptiveCycle => Ok(()),
        Stage::Completed => Err(Error::InvalidState(
            "objective already proceeded to the next one".to_string(),
        )),
        _ => Err(Error::InvalidState(
            "generate a lesson plan before adaptive steps".to_string(),
        )),
    }
}

/// Appends to the decision log. Steps are never edited afterwards.
pub fn append_adaptive_step(
    mut snap: Snapshot,
    tp_id: &str,
    decision: StepDecision,
    rationale: String,
    now: i64,
) -> Result<Snapshot> {
    ensure_can_step(&snap.plan, tp_id)?;
    let o = objective_mut(&mut snap.plan, tp_id)?;
    if let StepDecision::Intervention { plan } = &decision {
        ensure_meeting_free(o, plan.pertemuan_ke)?;
    }
    o.adaptive_steps.push(AdaptiveLessonStep {
        decision,
        rationale,
        timestamp: now,
    });
    Ok(snap)
}

pub fn add_planned_session(
    mut snap: Snapshot,
    tp_id: &str,
    pertemuan: u32,
    now: i64,
) -> Result<Snapshot> {
    check_meeting(pertemuan)?;
    let o = objective_mut(&mut snap.plan, tp_id)?;
    if !o.planned_sessions.iter().any(|p| p.pertemuan == pertemuan) {
        o.planned_sessions.push(PlannedSession {
            pertemuan,
            timestamp: now,
        });
        o.planned_sessions.sort_by_key(|p| p.pertemuan);
    }
    Ok(snap)
}

/// Clears diagnostic data and the adaptive log, and removes every
/// formative row and DPL observation of the objective from all students.
pub fn reset_objective_data(mut snap: Snapshot, tp_id: &str) -> Result<Snapshot> {
    let o = objective_mut(&mut snap.plan, tp_id)?;
    o.diagnostic_data = None;
    o.adaptive_steps.clear();
    for s in snap.students.iter_mut() {
        s.assessments.retain(|a| a.tp_id != tp_id);
        s.dpl_observations.retain(|d| d.tp_id != tp_id);
    }
    Ok(snap)
}

/// Removes everything tagged with one meeting: diagnostic plans, adaptive
/// steps carrying a plan for it, planned sessions, and the formative and
/// DPL rows of this plan's objectives.
pub fn delete_formative_session(mut snap: Snapshot, pertemuan: u32) -> Snapshot {
    let tps: HashSet<String> = snap
        .plan
        .curriculum
        .objectives
        .iter()
        .map(|o| o.id.clone())
        .collect();
    for o in snap.plan.curriculum.objectives.iter_mut() {
        if let Some(d) = o.diagnostic_data.as_mut() {
            if d.plan.as_ref().is_some_and(|p| p.pertemuan_ke == pertemuan) {
                d.plan = None;
            }
        }
        o.adaptive_steps
            .retain(|s| s.plan().map_or(true, |p| p.pertemuan_ke != pertemuan));
        o.planned_sessions.retain(|p| p.pertemuan != pertemuan);
    }
    for s in snap.students.iter_mut() {
        s.assessments
            .retain(|a| !(a.pertemuan == pertemuan && tps.contains(&a.tp_id)));
        s.dpl_observations
            .retain(|d| !(d.pertemuan == pertemuan && tps.contains(&d.tp_id)));
    }
    snap
}

/// Objectives among `skipped` that still need a generated rubric.
pub fn missing_rubrics<'p>(
    plan: &'p LearningPlan,
    skipped: &[String],
) -> Result<Vec<&'p LearningObjective>> {
    let mut out = Vec::new();
    for tp_id in skipped {
        let o = objective(plan, tp_id)?;
        if o.kktp.is_none() {
            out.push(o);
        }
    }
    Ok(out)
}

/// Backfills objectives taught before assessment started. `generated`
/// carries a rubric for every skipped objective that had none; `results`
/// maps student id to per-objective pass flags. Students without a flag for
/// an objective are left alone for it.
pub fn quick_sync(
    mut snap: Snapshot,
    skipped: &[String],
    generated: HashMap<String, Kktp>,
    results: &HashMap<String, HashMap<String, bool>>,
    levels: Levels,
    now: i64,
) -> Result<Snapshot> {
    let mut generated = generated;
    for tp_id in skipped {
        let o = objective_mut(&mut snap.plan, tp_id)?;
        if o.kktp.is_none() {
            let kktp = generated.remove(tp_id).ok_or_else(|| {
                Error::InvalidState(format!("no rubric available for objective {}", tp_id))
            })?;
            o.kktp = Some(kktp);
        }
    }

    for student_id in results.keys() {
        if !snap.students.iter().any(|s| &s.id == student_id) {
            return Err(Error::NotFound(format!("student {}", student_id)));
        }
    }

    let rubrics: Vec<(String, Vec<String>)> = skipped
        .iter()
        .filter_map(|tp_id| {
            snap.plan.curriculum.objective(tp_id).and_then(|o| {
                o.kktp.as_ref().map(|k| {
                    (
                        tp_id.clone(),
                        k.aspects.iter().map(|a| a.aspek.clone()).collect(),
                    )
                })
            })
        })
        .collect();

    for s in snap.students.iter_mut() {
        let Some(flags) = results.get(&s.id) else {
            continue;
        };
        for (tp_id, aspects) in &rubrics {
            let Some(passed) = flags.get(tp_id) else {
                continue;
            };
            let level = if *passed { levels.pass } else { levels.fail };
            for aspek in aspects {
                gradebook::upsert_assessment(
                    s,
                    Assessment {
                        tp_id: tp_id.clone(),
                        aspek: aspek.clone(),
                        level,
                        pertemuan: SYNC_MEETING,
                        timestamp: now,
                        note: None,
                    },
                )?;
            }
        }
    }
    Ok(snap)
}

/// Caches generated HTML on the plan taught at `pertemuan`.
pub fn store_material(
    mut snap: Snapshot,
    tp_id: &str,
    pertemuan: u32,
    kind: MaterialKind,
    html: String,
) -> Result<Snapshot> {
    let o = objective_mut(&mut snap.plan, tp_id)?;
    let plan = o
        .plan_for_meeting_mut(pertemuan)
        .ok_or_else(|| Error::NotFound(format!("lesson plan for meeting {}", pertemuan)))?;
    plan.materials.insert(kind, html);
    Ok(snap)
}

pub fn lesson_plan_at<'p>(
    plan: &'p LearningPlan,
    tp_id: &str,
    pertemuan: u32,
) -> Result<&'p LessonPlan> {
    let o = objective(plan, tp_id)?;
    o.adaptive_steps
        .iter()
        .rev()
        .filter_map(|s| s.plan())
        .chain(o.diagnostic_data.as_ref().and_then(|d| d.plan.as_ref()))
        .find(|p| p.pertemuan_ke == pertemuan)
        .ok_or_else(|| Error::NotFound(format!("lesson plan for meeting {}", pertemuan)))
}

/// Swaps in a new objective list and unit layout. Student rows pointing at
/// objectives that disappeared are dropped; unit membership is trimmed to the
/// objectives that remain.
pub fn replace_curriculum(
    mut snap: Snapshot,
    objectives: Vec<LearningObjective>,
    units: Vec<TeachingUnit>,
) -> Snapshot {
    let old_ids = snap.plan.curriculum.objective_ids();
    snap.students = reconcile::reconcile_deleted_objective_references(
        old_ids.iter().map(String::as_str),
        objectives.iter().map(|o| o.id.as_str()),
        &snap.students,
    );
    snap.plan.curriculum.units = reconcile::reconcile_units(&units, &objectives);
    snap.plan.curriculum.objectives = objectives;
    snap
}

/// Objectives in `order`; any not named keep their relative position at
/// the end.
pub fn reorder_objectives(objectives: &[LearningObjective], order: &[String]) -> Vec<LearningObjective> {
    let mut out: Vec<LearningObjective> = order
        .iter()
        .filter_map(|id| objectives.iter().find(|o| &o.id == id).cloned())
        .collect();
    for o in objectives {
        if !order.contains(&o.id) {
            out.push(o.clone());
        }
    }
    out
}
