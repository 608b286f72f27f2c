//! Runtime shape checks for generator output.

use crate::error::{Error, Result};
use crate::model::{Kktp, KktpAspect, KktpCriterion, LessonPhase, LessonPlan, StepDecision, TeachingUnit};
use crate::reconcile::ObjectiveDraft;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashSet};
use uuid::Uuid;

fn object<'v>(v: &'v Value, path: &str) -> Result<&'v Map<String, Value>> {
    v.as_object()
        .ok_or_else(|| Error::invalid_response(path, "expected object"))
}

fn array<'v>(obj: &'v Map<String, Value>, key: &str, path: &str) -> Result<&'v Vec<Value>> {
    obj.get(key)
        .and_then(|v| v.as_array())
        .ok_or_else(|| Error::invalid_response(format!("{}.{}", path, key), "expected array"))
}

fn text(obj: &Map<String, Value>, key: &str, path: &str) -> Result<String> {
    let s = obj
        .get(key)
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .ok_or_else(|| Error::invalid_response(format!("{}.{}", path, key), "expected string"))?;
    if s.is_empty() {
        return Err(Error::invalid_response(
            format!("{}.{}", path, key),
            "must not be empty",
        ));
    }
    Ok(s)
}

fn opt_text(obj: &Map<String, Value>, key: &str, path: &str) -> Result<Option<String>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .map(|s| Some(s.trim().to_string()).filter(|s| !s.is_empty()))
            .ok_or_else(|| Error::invalid_response(format!("{}.{}", path, key), "expected string")),
    }
}

fn opt_u32(obj: &Map<String, Value>, key: &str, path: &str) -> Result<Option<u32>> {
    match obj.get(key) {
        None | Some(Value::Null) => Ok(None),
        Some(v) => v
            .as_u64()
            .and_then(|n| u32::try_from(n).ok())
            .map(Some)
            .ok_or_else(|| {
                Error::invalid_response(format!("{}.{}", path, key), "expected non-negative integer")
            }),
    }
}

fn string_list(obj: &Map<String, Value>, key: &str, path: &str) -> Result<Vec<String>> {
    let Some(v) = obj.get(key).filter(|v| !v.is_null()) else {
        return Ok(Vec::new());
    };
    let arr = v
        .as_array()
        .ok_or_else(|| Error::invalid_response(format!("{}.{}", path, key), "expected array"))?;
    let mut out = Vec::with_capacity(arr.len());
    for (i, item) in arr.iter().enumerate() {
        let s = item.as_str().ok_or_else(|| {
            Error::invalid_response(format!("{}.{}[{}]", path, key, i), "expected string")
        })?;
        let s = s.trim();
        if !s.is_empty() {
            out.push(s.to_string());
        }
    }
    Ok(out)
}

/// `{"objectives": [{"id"?, "description", "competencies"?, "dplDimensions"?}]}`
pub fn objectives(v: &Value) -> Result<Vec<ObjectiveDraft>> {
    let root = object(v, "$")?;
    let items = array(root, "objectives", "$")?;
    if items.is_empty() {
        return Err(Error::invalid_response("$.objectives", "must not be empty"));
    }
    items
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let path = format!("$.objectives[{}]", i);
            let o = object(item, &path)?;
            Ok(ObjectiveDraft {
                id: opt_text(o, "id", &path)?,
                description: text(o, "description", &path)?,
                competencies: string_list(o, "competencies", &path)?,
                dpl_dimensions: string_list(o, "dplDimensions", &path)?,
            })
        })
        .collect()
}

/// Rubric with four criteria per aspect, levels 1..=4. Criteria may arrive
/// in any order; they are stored sorted.
pub fn rubric(v: &Value) -> Result<Kktp> {
    let root = object(v, "$")?;
    let kktp = parse_kktp(root, "$")?;
    Ok(kktp)
}

fn parse_kktp(root: &Map<String, Value>, path: &str) -> Result<Kktp> {
    let items = array(root, "aspects", path)?;
    if items.is_empty() {
        return Err(Error::invalid_response(
            format!("{}.aspects", path),
            "must not be empty",
        ));
    }
    let mut aspects = Vec::with_capacity(items.len());
    let mut names = HashSet::new();
    for (i, item) in items.iter().enumerate() {
        let apath = format!("{}.aspects[{}]", path, i);
        let a = object(item, &apath)?;
        let aspek = text(a, "aspek", &apath)?;
        if !names.insert(aspek.to_lowercase()) {
            return Err(Error::invalid_response(
                format!("{}.aspek", apath),
                "duplicate aspect",
            ));
        }
        let critical = match a.get("critical") {
            None | Some(Value::Null) => false,
            Some(Value::Bool(b)) => *b,
            Some(_) => {
                return Err(Error::invalid_response(
                    format!("{}.critical", apath),
                    "expected boolean",
                ))
            }
        };
        let raw = array(a, "criteria", &apath)?;
        let mut by_level: BTreeMap<u8, String> = BTreeMap::new();
        for (j, c) in raw.iter().enumerate() {
            let cpath = format!("{}.criteria[{}]", apath, j);
            let c = object(c, &cpath)?;
            let level = c
                .get("level")
                .and_then(|v| v.as_u64())
                .filter(|l| (1..=4).contains(l))
                .ok_or_else(|| {
                    Error::invalid_response(format!("{}.level", cpath), "expected level 1-4")
                })? as u8;
            let description = text(c, "description", &cpath)?;
            if by_level.insert(level, description).is_some() {
                return Err(Error::invalid_response(
                    format!("{}.level", cpath),
                    "duplicate level",
                ));
            }
        }
        if by_level.len() != 4 {
            return Err(Error::invalid_response(
                format!("{}.criteria", apath),
                "expected exactly four levels",
            ));
        }
        aspects.push(KktpAspect {
            aspek,
            critical,
            criteria: by_level
                .into_iter()
                .map(|(level, description)| KktpCriterion { level, description })
                .collect(),
        });
    }
    Ok(Kktp { aspects })
}

/// `{"recommendation": "..."}`
pub fn diagnostic(v: &Value) -> Result<String> {
    text(object(v, "$")?, "recommendation", "$")
}

/// Lesson plan body. The meeting number always comes from the caller; a
/// value echoed by the generator is ignored.
pub fn lesson_plan(v: &Value, path: &str, pertemuan: u32) -> Result<LessonPlan> {
    let root = object(v, path)?;
    let title = text(root, "title", path)?;
    let phases_raw = array(root, "phases", path)?;
    if phases_raw.is_empty() {
        return Err(Error::invalid_response(
            format!("{}.phases", path),
            "must not be empty",
        ));
    }
    let mut phases = Vec::with_capacity(phases_raw.len());
    for (i, p) in phases_raw.iter().enumerate() {
        let ppath = format!("{}.phases[{}]", path, i);
        let p = object(p, &ppath)?;
        phases.push(LessonPhase {
            name: text(p, "name", &ppath)?,
            duration_minutes: opt_u32(p, "durationMinutes", &ppath)?.unwrap_or(0),
            activities: string_list(p, "activities", &ppath)?,
        });
    }
    let duration_minutes = match opt_u32(root, "durationMinutes", path)? {
        Some(d) => d,
        None => phases.iter().map(|p| p.duration_minutes).sum(),
    };
    Ok(LessonPlan {
        pertemuan_ke: pertemuan,
        title,
        duration_minutes,
        phases,
        materials: BTreeMap::new(),
    })
}

/// `{"decision": "PROCEED" | "INTERVENTION", "rationale"?, "plan"?}`
pub fn adaptive_step(v: &Value, pertemuan: u32) -> Result<(StepDecision, String)> {
    let root = object(v, "$")?;
    let rationale = opt_text(root, "rationale", "$")?.unwrap_or_default();
    let decision = text(root, "decision", "$")?;
    match decision.to_ascii_uppercase().as_str() {
        "PROCEED" => Ok((StepDecision::Proceed, rationale)),
        "INTERVENTION" => {
            let plan_v = root
                .get("plan")
                .ok_or_else(|| Error::invalid_response("$.plan", "required for INTERVENTION"))?;
            let plan = lesson_plan(plan_v, "$.plan", pertemuan)?;
            Ok((StepDecision::Intervention { plan }, rationale))
        }
        _ => Err(Error::invalid_response(
            "$.decision",
            "expected PROCEED or INTERVENTION",
        )),
    }
}

/// `{"order": [tpId...]}`; every id must be known and appear once.
pub fn atp_order(v: &Value, known: &[&str]) -> Result<Vec<String>> {
    let root = object(v, "$")?;
    let ids = string_list(root, "order", "$")?;
    if ids.is_empty() {
        return Err(Error::invalid_response("$.order", "must not be empty"));
    }
    let mut seen = HashSet::new();
    for (i, id) in ids.iter().enumerate() {
        if !known.contains(&id.as_str()) {
            return Err(Error::invalid_response(
                format!("$.order[{}]", i),
                format!("unknown objective id {}", id),
            ));
        }
        if !seen.insert(id.as_str()) {
            return Err(Error::invalid_response(
                format!("$.order[{}]", i),
                "duplicate objective id",
            ));
        }
    }
    Ok(ids)
}

/// `{"units": [{"title", "objectiveIds", "meetings"?}]}`
pub fn units(v: &Value, known: &[&str]) -> Result<Vec<TeachingUnit>> {
    let root = object(v, "$")?;
    let items = array(root, "units", "$")?;
    let mut out = Vec::with_capacity(items.len());
    for (i, item) in items.iter().enumerate() {
        let path = format!("$.units[{}]", i);
        let u = object(item, &path)?;
        let objective_ids = string_list(u, "objectiveIds", &path)?;
        if let Some(bad) = objective_ids.iter().find(|id| !known.contains(&id.as_str())) {
            return Err(Error::invalid_response(
                format!("{}.objectiveIds", path),
                format!("unknown objective id {}", bad),
            ));
        }
        out.push(TeachingUnit {
            id: Uuid::new_v4().to_string(),
            title: text(u, "title", &path)?,
            objective_ids,
            meetings: opt_u32(u, "meetings", &path)?.unwrap_or(0),
        });
    }
    Ok(out)
}

/// `{"html": "..."}`
pub fn material(v: &Value) -> Result<String> {
    text(object(v, "$")?, "html", "$")
}
