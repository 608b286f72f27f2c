mod test_support;

use serde_json::json;
use test_support::{request, request_err, request_ok, spawn_sidecar, temp_dir};

#[test]
fn router_dispatch_smoke_covers_handler_families() {
    let workspace = temp_dir("kurikulum-router-smoke");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let health = request_ok(&mut stdin, &mut reader, "1", "health", json!({}));
    assert!(health["workspacePath"].is_null());

    let code = request_err(&mut stdin, &mut reader, "2", "plans.list", json!({}));
    assert_eq!(code, "no_workspace");

    let selected = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    assert_eq!(selected["schemaVersion"], 2);

    let methods = [
        ("setup.get", json!({})),
        ("app.getActive", json!({})),
        ("classes.list", json!({})),
        ("students.list", json!({})),
        ("plans.list", json!({})),
        ("holidays.list", json!({})),
        ("exchange.export", json!({})),
        ("objectives.status", json!({ "planId": "missing" })),
        ("diagnostic.saveDraft", json!({ "planId": "missing" })),
        ("materials.generate", json!({ "planId": "missing" })),
        ("attendance.summary", json!({ "classId": "missing" })),
        ("quickSync", json!({ "planId": "missing" })),
        ("backup.importBundle", json!({})),
    ];
    for (i, (method, params)) in methods.iter().enumerate() {
        let resp = request(&mut stdin, &mut reader, &format!("m{}", i), method, params.clone());
        if resp["ok"] == false {
            assert_ne!(
                resp.pointer("/error/code").and_then(|v| v.as_str()),
                Some("not_implemented"),
                "{} was not routed",
                method
            );
        }
    }

    let code = request_err(&mut stdin, &mut reader, "x", "no.such.method", json!({}));
    assert_eq!(code, "not_implemented");

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn setup_sections_merge_defaults_and_reject_unknown_fields() {
    let workspace = temp_dir("kurikulum-setup");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let setup = request_ok(&mut stdin, &mut reader, "2", "setup.get", json!({}));
    assert_eq!(setup["planning"]["defaultTimeAllocationMinutes"], 70);
    assert_eq!(setup["planning"]["passLevel"], 3);
    assert_eq!(setup["ai"]["provider"], "gemini");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "planning", "patch": { "defaultTimeAllocationMinutes": 80 } }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "4", "setup.get", json!({}));
    assert_eq!(setup["planning"]["defaultTimeAllocationMinutes"], 80);
    assert_eq!(setup["planning"]["failLevel"], 1);

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "planning", "patch": { "colour": "red" } }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "ai", "patch": { "provider": "other" } }),
    );
    assert_eq!(code, "bad_params");

    // Gemini without a stored key fails before any network call.
    let plan = request_ok(&mut stdin, &mut reader, "7", "plans.create", json!({ "name": "P" }));
    let plan_id = plan["planId"].as_str().expect("planId").to_string();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "tps.update",
        json!({ "planId": plan_id, "objectives": [{ "id": "TP-1", "description": "x" }] }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "9",
        "kktp.generate",
        json!({ "planId": plan_id, "tpId": "TP-1" }),
    );
    assert_eq!(code, "ai_failed");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "10",
        "apiKeys.set",
        json!({ "userId": "local", "key": "abcdef123456" }),
    );
    let key = request_ok(&mut stdin, &mut reader, "11", "apiKeys.get", json!({ "userId": "local" }));
    assert_eq!(key["hasKey"], true);
    assert_eq!(key["masked"], "****3456");

    let _ = std::fs::remove_dir_all(workspace);
}
