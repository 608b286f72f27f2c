use crate::backup;
use crate::exchange::{self, ExportDocument, ImportCounts};
use crate::ipc::error::HandlerErr;
use crate::ipc::helpers::{opt_str, required_str, with_conn, HandlerFn};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::{json, Value};
use std::path::PathBuf;

fn io_failed(e: impl std::fmt::Display) -> HandlerErr {
    HandlerErr::new("io_failed", e.to_string())
}

fn document_value(doc: &ExportDocument) -> Result<Value, HandlerErr> {
    Ok(serde_json::to_value(doc).map_err(crate::error::Error::from)?)
}

fn counts_json(c: ImportCounts) -> Value {
    json!({
        "learningPlans": c.learning_plans,
        "classProfiles": c.class_profiles,
        "students": c.students,
        "attendanceRecords": c.attendance_records,
        "holidays": c.holidays,
    })
}

fn apply_import(conn: &Connection, raw: Value) -> Result<ImportCounts, HandlerErr> {
    let doc = exchange::parse(raw)?;
    let counts = exchange::import(conn, &doc)
        .map_err(|e| HandlerErr::new("db_update_failed", e.to_string()))?;
    tracing::info!(
        plans = counts.learning_plans,
        students = counts.students,
        classes = counts.class_profiles,
        "workspace replaced from import"
    );
    Ok(counts)
}

/// `{path?}`: writes the document to `path`, or returns it inline.
fn exchange_export(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let doc = exchange::export(conn)?;
    let value = document_value(&doc)?;
    match opt_str(params, "path")? {
        Some(path) => {
            let path = PathBuf::from(path);
            if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                std::fs::create_dir_all(parent).map_err(io_failed)?;
            }
            let text = serde_json::to_string_pretty(&value).map_err(crate::error::Error::from)?;
            std::fs::write(&path, text).map_err(io_failed)?;
            tracing::info!(path = %path.display(), "export written");
            Ok(json!({ "path": path.to_string_lossy() }))
        }
        None => Ok(json!({ "document": value })),
    }
}

/// `{path}` or `{document}`.
fn exchange_import(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let raw = match (opt_str(params, "path")?, params.get("document")) {
        (Some(path), None) => {
            let text = std::fs::read_to_string(&path).map_err(io_failed)?;
            serde_json::from_str(&text)
                .map_err(|e| HandlerErr::bad_params(format!("file is not JSON: {}", e)))?
        }
        (None, Some(doc)) => doc.clone(),
        _ => return Err(HandlerErr::bad_params("pass exactly one of path or document")),
    };
    let counts = apply_import(conn, raw)?;
    Ok(json!({ "imported": counts_json(counts) }))
}

fn backup_export_bundle(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let out_path = PathBuf::from(required_str(params, "outPath")?);
    let doc = exchange::export(conn)?;
    let summary = backup::export_bundle(&document_value(&doc)?, &out_path)
        .map_err(|e| io_failed(format!("{e:#}")))?;
    tracing::info!(path = %out_path.display(), bytes = summary.data_bytes, "backup bundle written");
    Ok(json!({
        "path": out_path.to_string_lossy(),
        "bundleFormat": summary.bundle_format,
        "sha256": summary.sha256,
    }))
}

fn backup_import_bundle(conn: &Connection, params: &Value) -> Result<Value, HandlerErr> {
    let in_path = PathBuf::from(required_str(params, "inPath")?);
    let bundle = backup::import_bundle(&in_path)
        .map_err(|e| HandlerErr::new("bad_bundle", format!("{e:#}")))?;
    let counts = apply_import(conn, bundle.document)?;
    Ok(json!({
        "bundleFormatDetected": bundle.bundle_format_detected,
        "imported": counts_json(counts),
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let f: HandlerFn = match req.method.as_str() {
        "exchange.export" => exchange_export,
        "exchange.import" => exchange_import,
        "backup.exportBundle" => backup_export_bundle,
        "backup.importBundle" => backup_import_bundle,
        _ => return None,
    };
    Some(with_conn(state, req, f))
}
