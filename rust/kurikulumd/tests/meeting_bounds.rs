mod test_support;

use serde_json::json;
use test_support::{
    lesson, request_err, request_ok, rubric, seed_plan, select_workspace, spawn_sidecar,
    temp_dir, use_fixtures,
};

#[test]
fn out_of_range_meetings_are_rejected_and_status_keeps_working() {
    let workspace = temp_dir("kurikulum-meeting-range");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let seeded = seed_plan(&mut stdin, &mut reader, &["Gaya dan gerak"], &["Ani"]);
    let plan_id = seeded.plan_id.as_str();
    let tp = seeded.tp_ids[0].as_str();
    let ani = seeded.student_ids[0].as_str();
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "kktp.update",
        json!({ "planId": plan_id, "tpId": tp, "kktp": rubric(&["Pemahaman"]) }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "2",
        "assessments.record",
        json!({
            "planId": plan_id,
            "tpId": tp,
            "pertemuan": 4294967295u64,
            "entries": [{ "studentId": ani, "aspek": "Pemahaman", "level": 3 }]
        }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "dpl.record",
        json!({
            "planId": plan_id,
            "tpId": tp,
            "studentId": ani,
            "dimension": "Kreativitas",
            "pertemuan": 1000,
            "level": 3
        }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "sessions.plan",
        json!({ "planId": plan_id, "tpId": tp, "pertemuan": 4294967295u64 }),
    );
    assert_eq!(code, "bad_params");

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "objectives.status",
        json!({ "planId": plan_id }),
    );
    assert_eq!(status["nextMeetingNumber"], 1);
    assert!(status["latestMeetingNumber"].is_null());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assessments.record",
        json!({
            "planId": plan_id,
            "tpId": tp,
            "pertemuan": 999,
            "entries": [{ "studentId": ani, "aspek": "Pemahaman", "level": 3 }]
        }),
    );
    let status = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "objectives.status",
        json!({ "planId": plan_id }),
    );
    assert_eq!(status["latestMeetingNumber"], 999);
    assert_eq!(status["nextMeetingNumber"], 1000);

    // Meeting 1000 is past the ceiling, so the default meeting is refused too.
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "diagnostic.saveDraft",
        json!({ "planId": plan_id, "tpId": tp, "recommendation": "Kuis dorong tarik" }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "diagnostic.saveSummary",
        json!({ "planId": plan_id, "tpId": tp, "summary": "Ani: siap" }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "plan.generate",
        json!({ "planId": plan_id, "tpId": tp }),
    );
    assert_eq!(code, "bad_params");

    let health = request_ok(&mut stdin, &mut reader, "11", "health", json!({}));
    assert!(health["workspacePath"].is_string());

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn explicit_meeting_is_checked_before_generation() {
    let workspace = temp_dir("kurikulum-meeting-precheck");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let seeded = seed_plan(&mut stdin, &mut reader, &["Energi panas"], &["Ani"]);
    let plan_id = seeded.plan_id.as_str();
    let tp = seeded.tp_ids[0].as_str();

    // Any generator call fails with ai_failed, so a different code means
    // the request was refused before generation.
    use_fixtures(
        &mut stdin,
        &mut reader,
        json!({
            "lessonPlan": { "error": "generator dipanggil" },
            "adaptiveStep": { "error": "generator dipanggil" }
        }),
    );
    for (id, method, params) in [
        ("1", "diagnostic.saveDraft", json!({ "recommendation": "Tanya jawab" })),
        ("2", "diagnostic.saveSummary", json!({ "summary": "Ani: siap" })),
    ] {
        let mut params = params;
        params["planId"] = json!(plan_id);
        params["tpId"] = json!(tp);
        let _ = request_ok(&mut stdin, &mut reader, id, method, params);
    }

    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "plan.generate",
        json!({ "planId": plan_id, "tpId": tp, "pertemuan": 0 }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "plan.generate",
        json!({ "planId": plan_id, "tpId": tp, "pertemuan": 5000 }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "plan.generate",
        json!({ "planId": plan_id, "tpId": tp, "pertemuan": 1 }),
    );
    assert_eq!(code, "ai_failed");

    use_fixtures(
        &mut stdin,
        &mut reader,
        json!({
            "lessonPlan": lesson("Perpindahan panas"),
            "adaptiveStep": { "error": "generator dipanggil" }
        }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "plan.generate",
        json!({ "planId": plan_id, "tpId": tp, "pertemuan": 1 }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "adaptive.next",
        json!({ "planId": plan_id, "tpId": tp, "pertemuan": 1 }),
    );
    assert_eq!(code, "invalid_state");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "8",
        "adaptive.next",
        json!({ "planId": plan_id, "tpId": tp }),
    );
    assert_eq!(code, "ai_failed");

    let _ = std::fs::remove_dir_all(workspace);
}
