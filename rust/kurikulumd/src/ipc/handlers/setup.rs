use crate::ai::{AiSetup, Provider};
use crate::db;
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{required_str, with_conn, HandlerFn};
use crate::ipc::types::{AppState, Request};
use crate::model::ApiKeyRecord;
use crate::session::Levels;
use crate::store;
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Planning,
    Ai,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "planning" => Some(Self::Planning),
            "ai" => Some(Self::Ai),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Planning => "setup.planning",
            Self::Ai => "setup.ai",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Planning => json!({
            "defaultTimeAllocationMinutes": 70,
            "passLevel": 3,
            "failLevel": 1,
            "completionThreshold": 3
        }),
        SetupSection::Ai => json!({
            "provider": "gemini",
            "model": "gemini-2.0-flash",
            "endpoint": "https://generativelanguage.googleapis.com/v1beta",
            "timeoutSecs": 60,
            "userId": "local",
            "fixtures": {}
        }),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_int_range(v: &Value, key: &str, min: i64, max: i64) -> Result<i64, String> {
    let n = v
        .as_i64()
        .ok_or_else(|| format!("{} must be an integer", key))?;
    if n < min || n > max {
        return Err(format!("{} must be between {} and {}", key, min, max));
    }
    Ok(n)
}

fn parse_string_max(v: &Value, key: &str, max: usize) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be a string", key))?
        .trim()
        .to_string();
    if s.is_empty() {
        return Err(format!("{} must not be empty", key));
    }
    if s.chars().count() > max {
        return Err(format!("{} must be at most {} characters", key, max));
    }
    Ok(s)
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = as_object_mut(current)?;
    for (k, v) in patch {
        match section {
            SetupSection::Planning => match k.as_str() {
                "defaultTimeAllocationMinutes" => {
                    obj.insert(k.clone(), json!(parse_int_range(v, k, 10, 600)?));
                }
                "passLevel" | "failLevel" | "completionThreshold" => {
                    obj.insert(k.clone(), json!(parse_int_range(v, k, 1, 4)?));
                }
                _ => return Err(format!("unknown planning field: {}", k)),
            },
            SetupSection::Ai => match k.as_str() {
                "provider" => {
                    let s = parse_string_max(v, k, 20)?;
                    if Provider::parse(&s).is_none() {
                        return Err("provider must be gemini or fixture".to_string());
                    }
                    obj.insert(k.clone(), Value::String(s));
                }
                "model" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 120)?));
                }
                "endpoint" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 300)?));
                }
                "timeoutSecs" => {
                    obj.insert(k.clone(), json!(parse_int_range(v, k, 5, 600)?));
                }
                "userId" => {
                    obj.insert(k.clone(), Value::String(parse_string_max(v, k, 200)?));
                }
                "fixtures" => {
                    if !v.is_object() {
                        return Err("fixtures must be an object".to_string());
                    }
                    obj.insert(k.clone(), v.clone());
                }
                _ => return Err(format!("unknown ai field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: a malformed stored value falls back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

#[derive(Debug, Clone, Copy)]
pub struct PlanningSetup {
    pub default_time_allocation_minutes: u32,
    pub levels: Levels,
}

pub fn planning_setup(conn: &Connection) -> anyhow::Result<PlanningSetup> {
    let obj = load_section(conn, SetupSection::Planning)?;
    let int = |key: &str, default: u64| obj.get(key).and_then(|v| v.as_u64()).unwrap_or(default);
    let defaults = Levels::default();
    Ok(PlanningSetup {
        default_time_allocation_minutes: int("defaultTimeAllocationMinutes", 70) as u32,
        levels: Levels {
            pass: int("passLevel", defaults.pass as u64) as u8,
            fail: int("failLevel", defaults.fail as u64) as u8,
            completion_threshold: int("completionThreshold", defaults.completion_threshold as u64)
                as u8,
        },
    })
}

pub fn ai_setup(conn: &Connection) -> anyhow::Result<AiSetup> {
    let obj = load_section(conn, SetupSection::Ai)?;
    let text = |key: &str| {
        obj.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    Ok(AiSetup {
        provider: Provider::parse(&text("provider")).unwrap_or(Provider::Gemini),
        model: text("model"),
        endpoint: text("endpoint"),
        timeout_secs: obj.get("timeoutSecs").and_then(|v| v.as_u64()).unwrap_or(60),
        user_id: text("userId"),
        fixtures: obj.get("fixtures").cloned().unwrap_or_else(|| json!({})),
    })
}

fn setup_get(conn: &Connection, _params: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({
        "planning": load_section(conn, SetupSection::Planning)?,
        "ai": load_section(conn, SetupSection::Ai)?,
    }))
}

fn setup_update(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let section_raw = required_str(params, "section")?;
    let Some(section) = SetupSection::parse(&section_raw) else {
        return Err(HandlerErr::bad_params("unknown section"));
    };
    let Some(patch_obj) = params.get("patch").and_then(|v| v.as_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut current = load_section(conn, section)?;
    merge_section_patch(section, &mut current, patch_obj).map_err(HandlerErr::bad_params)?;
    db::settings_set_json(conn, section.key(), &current)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(section = section.key(), "setup updated");
    Ok(json!({ "ok": true }))
}

fn mask(key: &str) -> String {
    let tail: String = key
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("****{}", tail)
}

fn api_keys_get(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let key = store::api_key_get(conn, &user_id)?;
    Ok(json!({
        "userId": user_id,
        "hasKey": key.is_some(),
        "masked": key.as_deref().map(mask),
    }))
}

fn api_keys_set(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    let key = required_str(params, "key")?;
    store::api_key_put(conn, &ApiKeyRecord { user_id, key })?;
    Ok(json!({ "ok": true }))
}

fn api_keys_delete(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let user_id = required_str(params, "userId")?;
    Ok(json!({ "deleted": store::api_key_delete(conn, &user_id)? }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: HandlerFn = match req.method.as_str() {
        "setup.get" => setup_get,
        "setup.update" => setup_update,
        "apiKeys.get" => api_keys_get,
        "apiKeys.set" => api_keys_set,
        "apiKeys.delete" => api_keys_delete,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
