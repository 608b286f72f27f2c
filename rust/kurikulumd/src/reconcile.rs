//! Referential cleanup after the objective set of a plan changes.
//!
//! Students are shared by every plan of a class, so only ids that were in
//! the old set and are missing from the new one are swept. Rows that point
//! at objectives of other plans are left alone.

use crate::model::{LearningObjective, Student, TeachingUnit};
use std::collections::{HashMap, HashSet};

pub fn deleted_objective_ids<'a, I, J>(old_ids: I, new_ids: J) -> HashSet<String>
where
    I: IntoIterator<Item = &'a str>,
    J: IntoIterator<Item = &'a str>,
{
    let keep: HashSet<&str> = new_ids.into_iter().collect();
    old_ids
        .into_iter()
        .filter(|id| !keep.contains(id))
        .map(str::to_string)
        .collect()
}

/// Drops every assessment, summative and DPL observation whose objective
/// was removed. Rows referencing surviving ids come through untouched.
pub fn reconcile_deleted_objective_references<'a, I, J>(
    old_ids: I,
    new_ids: J,
    students: &[Student],
) -> Vec<Student>
where
    I: IntoIterator<Item = &'a str>,
    J: IntoIterator<Item = &'a str>,
{
    let deleted = deleted_objective_ids(old_ids, new_ids);
    students
        .iter()
        .map(|s| strip_objectives(s, &deleted))
        .collect()
}

fn strip_objectives(student: &Student, deleted: &HashSet<String>) -> Student {
    let mut s = student.clone();
    if deleted.is_empty() {
        return s;
    }
    s.assessments.retain(|a| !deleted.contains(&a.tp_id));
    s.summatives.retain(|a| !deleted.contains(&a.tp_id));
    s.dpl_observations.retain(|o| !deleted.contains(&o.tp_id));
    s
}

/// Removes deleted objective ids from unit membership.
pub fn reconcile_units(units: &[TeachingUnit], objectives: &[LearningObjective]) -> Vec<TeachingUnit> {
    let live: HashSet<&str> = objectives.iter().map(|o| o.id.as_str()).collect();
    units
        .iter()
        .map(|u| {
            let mut u = u.clone();
            u.objective_ids.retain(|id| live.contains(id.as_str()));
            u
        })
        .collect()
}

/// A regenerated objective before it is merged into the plan. `id` is set
/// when the generator (or the host) refers to an existing objective.
#[derive(Debug, Clone, PartialEq)]
pub struct ObjectiveDraft {
    pub id: Option<String>,
    pub description: String,
    pub competencies: Vec<String>,
    pub dpl_dimensions: Vec<String>,
}

/// Builds the new objective list. Drafts that name a surviving id keep the
/// rubric, diagnostic data, adaptive log and schedule of that objective.
pub fn merge_objectives(
    old: &[LearningObjective],
    drafts: Vec<ObjectiveDraft>,
    mut new_id: impl FnMut() -> String,
) -> Vec<LearningObjective> {
    let by_id: HashMap<&str, &LearningObjective> =
        old.iter().map(|o| (o.id.as_str(), o)).collect();
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(drafts.len());
    for draft in drafts {
        let existing = draft
            .id
            .as_deref()
            .filter(|id| !seen.contains(*id))
            .and_then(|id| by_id.get(id).copied());
        let mut obj = match existing {
            Some(prev) => prev.clone(),
            None => LearningObjective::new(new_id(), String::new()),
        };
        obj.description = draft.description;
        obj.competencies = draft.competencies;
        obj.dpl_dimensions = draft.dpl_dimensions;
        seen.insert(obj.id.clone());
        out.push(obj);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Assessment, DplObservation, SummativeAssessment};

    fn assessment(tp: &str, pertemuan: u32) -> Assessment {
        Assessment {
            tp_id: tp.to_string(),
            aspek: "Pemahaman".to_string(),
            level: 3,
            pertemuan,
            timestamp: 1,
            note: None,
        }
    }

    fn student(id: &str, tps: &[&str]) -> Student {
        Student {
            id: id.to_string(),
            class_id: "c1".to_string(),
            name: id.to_uppercase(),
            nis: None,
            sort_order: 0,
            assessments: tps.iter().map(|tp| assessment(tp, 1)).collect(),
            summatives: tps
                .iter()
                .map(|tp| SummativeAssessment {
                    id: format!("sum-{}", tp),
                    tp_id: tp.to_string(),
                    title: "Ulangan".to_string(),
                    score: 80.0,
                    date: None,
                    timestamp: 1,
                })
                .collect(),
            dpl_observations: tps
                .iter()
                .map(|tp| DplObservation {
                    tp_id: tp.to_string(),
                    dimension: "Kemandirian".to_string(),
                    pertemuan: 1,
                    level: 2,
                    note: None,
                    timestamp: 1,
                })
                .collect(),
            hafalan: Vec::new(),
        }
    }

    #[test]
    fn removed_ids_are_swept_and_kept_ids_untouched() {
        let students = vec![student("a", &["tp-1", "tp-2"]), student("b", &["tp-2", "tp-3"])];
        let out = reconcile_deleted_objective_references(
            ["tp-1", "tp-2", "tp-3"],
            ["tp-2", "tp-3"],
            &students,
        );

        for s in &out {
            assert!(s.assessments.iter().all(|a| a.tp_id != "tp-1"));
            assert!(s.summatives.iter().all(|a| a.tp_id != "tp-1"));
            assert!(s.dpl_observations.iter().all(|a| a.tp_id != "tp-1"));
        }
        assert_eq!(out[0].assessments, vec![assessment("tp-2", 1)]);
        assert_eq!(out[1], students[1]);
    }

    #[test]
    fn foreign_plan_references_survive() {
        let students = vec![student("a", &["tp-1", "other-plan-tp"])];
        let out = reconcile_deleted_objective_references(["tp-1"], Vec::<&str>::new(), &students);
        assert_eq!(out[0].assessments.len(), 1);
        assert_eq!(out[0].assessments[0].tp_id, "other-plan-tp");
    }

    #[test]
    fn merge_keeps_data_of_surviving_objectives() {
        let mut kept = LearningObjective::new("tp-1".to_string(), "old".to_string());
        kept.planned_sessions.push(crate::model::PlannedSession {
            pertemuan: 2,
            timestamp: 5,
        });
        let dropped = LearningObjective::new("tp-2".to_string(), "gone".to_string());
        let mut counter = 0;
        let merged = merge_objectives(
            &[kept.clone(), dropped],
            vec![
                ObjectiveDraft {
                    id: Some("tp-1".to_string()),
                    description: "new text".to_string(),
                    competencies: vec![],
                    dpl_dimensions: vec![],
                },
                ObjectiveDraft {
                    id: None,
                    description: "fresh".to_string(),
                    competencies: vec![],
                    dpl_dimensions: vec![],
                },
            ],
            || {
                counter += 1;
                format!("gen-{}", counter)
            },
        );

        assert_eq!(merged.len(), 2);
        assert_eq!(merged[0].id, "tp-1");
        assert_eq!(merged[0].description, "new text");
        assert_eq!(merged[0].planned_sessions, kept.planned_sessions);
        assert_eq!(merged[1].id, "gen-1");
    }

    #[test]
    fn units_lose_deleted_members() {
        let objectives = vec![LearningObjective::new("tp-1".to_string(), "x".to_string())];
        let units = vec![TeachingUnit {
            id: "u1".to_string(),
            title: "Bab 1".to_string(),
            objective_ids: vec!["tp-1".to_string(), "tp-9".to_string()],
            meetings: 4,
        }];
        let out = reconcile_units(&units, &objectives);
        assert_eq!(out[0].objective_ids, vec!["tp-1".to_string()]);
    }
}
