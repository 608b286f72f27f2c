//! Whole-workspace JSON document used for export, import and backup
//! bundles. Import never merges: every store is cleared and refilled.

use crate::db;
use crate::error::{Error, Result};
use crate::model::{
    ApiKeyRecord, AttendanceRecord, ClassProfile, HolidayRecord, LearningPlan, Student,
};
use crate::store;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const EXPORT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub version: u32,
    pub exported_at: String,
    pub data: ExportData,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportData {
    #[serde(default)]
    pub learning_plans: Vec<LearningPlan>,
    #[serde(default)]
    pub class_profiles: Vec<ClassProfile>,
    #[serde(default)]
    pub master_students: Vec<Student>,
    #[serde(default)]
    pub attendance_records: Vec<AttendanceRecord>,
    #[serde(default)]
    pub holidays: Vec<HolidayRecord>,
    /// Every `app_state` entry other than the active ids.
    #[serde(default)]
    pub settings: Map<String, Value>,
    #[serde(default)]
    pub active_plan_id: Option<String>,
    #[serde(default)]
    pub active_class_id: Option<String>,
    #[serde(default)]
    pub api_keys: Vec<ApiKeyRecord>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImportCounts {
    pub learning_plans: usize,
    pub class_profiles: usize,
    pub students: usize,
    pub attendance_records: usize,
    pub holidays: usize,
}

fn active_id(value: &Value) -> Option<String> {
    value.as_str().map(str::to_string)
}

pub fn export(conn: &Connection) -> Result<ExportDocument> {
    let mut settings = Map::new();
    let mut active_plan_id = None;
    let mut active_class_id = None;
    for (key, value) in store::app_state_all(conn)? {
        match key.as_str() {
            db::ACTIVE_PLAN_KEY => active_plan_id = active_id(&value),
            db::ACTIVE_CLASS_KEY => active_class_id = active_id(&value),
            _ => {
                settings.insert(key, value);
            }
        }
    }
    Ok(ExportDocument {
        version: EXPORT_VERSION,
        exported_at: chrono::Utc::now().to_rfc3339(),
        data: ExportData {
            learning_plans: store::plans_list(conn)?,
            class_profiles: store::classes_list(conn)?,
            master_students: store::students_all(conn)?,
            attendance_records: store::attendance_all(conn)?,
            holidays: store::holidays_list(conn)?,
            settings,
            active_plan_id,
            active_class_id,
            api_keys: store::api_keys_list(conn)?,
        },
    })
}

pub fn parse(value: Value) -> Result<ExportDocument> {
    let doc: ExportDocument = serde_json::from_value(value)
        .map_err(|e| Error::Validation(format!("not an export document: {}", e)))?;
    if doc.version != EXPORT_VERSION {
        return Err(Error::Validation(format!(
            "unsupported export version {}",
            doc.version
        )));
    }
    Ok(doc)
}

/// Replaces the whole workspace with `doc` in one transaction.
pub fn import(conn: &Connection, doc: &ExportDocument) -> Result<ImportCounts> {
    let data = &doc.data;
    let tx = conn.unchecked_transaction()?;
    db::clear_all(&tx)?;
    for c in &data.class_profiles {
        store::class_put(&tx, c)?;
    }
    for p in &data.learning_plans {
        store::plan_put(&tx, p)?;
    }
    for s in &data.master_students {
        store::student_put(&tx, s)?;
    }
    for rec in &data.attendance_records {
        store::attendance_put(&tx, rec)?;
    }
    for h in &data.holidays {
        store::holiday_put(&tx, h)?;
    }
    for (key, value) in &data.settings {
        store::app_state_put(&tx, key, value)?;
    }
    if let Some(id) = &data.active_plan_id {
        store::app_state_put(&tx, db::ACTIVE_PLAN_KEY, &Value::String(id.clone()))?;
    }
    if let Some(id) = &data.active_class_id {
        store::app_state_put(&tx, db::ACTIVE_CLASS_KEY, &Value::String(id.clone()))?;
    }
    for k in &data.api_keys {
        store::api_key_put(&tx, k)?;
    }
    tx.commit()?;
    Ok(ImportCounts {
        learning_plans: data.learning_plans.len(),
        class_profiles: data.class_profiles.len(),
        students: data.master_students.len(),
        attendance_records: data.attendance_records.len(),
        holidays: data.holidays.len(),
    })
}
