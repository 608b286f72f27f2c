mod test_support;

use serde_json::json;
use test_support::{
    lesson, objective, open_plan, request, request_err, request_ok, seed_plan, select_workspace,
    spawn_sidecar, temp_dir, use_fixtures,
};

#[test]
fn objective_moves_from_diagnostic_to_completed() {
    let workspace = temp_dir("kurikulum-lifecycle");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let seeded = seed_plan(
        &mut stdin,
        &mut reader,
        &["Menjelaskan siklus air", "Mengidentifikasi sumber air"],
        &["Ani", "Budi"],
    );
    let plan_id = seeded.plan_id.as_str();
    let tp = seeded.tp_ids[0].as_str();

    let mut remedial = lesson("Remedial siklus air");
    remedial["pertemuanKe"] = json!(9);
    use_fixtures(
        &mut stdin,
        &mut reader,
        json!({
            "diagnostic": { "recommendation": "Tes lisan awal tentang penguapan" },
            "lessonPlan": lesson("Siklus air"),
            "adaptiveStep": {
                "decision": "INTERVENTION",
                "rationale": "Budi belum memahami kondensasi",
                "plan": remedial
            }
        }),
    );

    let code = request_err(
        &mut stdin,
        &mut reader,
        "1",
        "plan.generate",
        json!({ "planId": plan_id, "tpId": tp }),
    );
    assert_eq!(code, "invalid_state");

    let generated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "diagnostic.generate",
        json!({ "planId": plan_id, "tpId": tp }),
    );
    assert_eq!(generated["recommendation"], "Tes lisan awal tentang penguapan");
    let data = &generated["objective"]["diagnosticData"];
    assert_eq!(data["recommendation"], "Tes lisan awal tentang penguapan");
    assert!(data["summary"].is_null());
    assert!(data["plan"].is_null());
    assert_eq!(generated["objective"]["stage"], "diagnosticDrafted");

    let scored = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "diagnostic.saveSummary",
        json!({ "planId": plan_id, "tpId": tp, "summary": "Ani: siap; Budi: perlu bimbingan" }),
    );
    assert_eq!(scored["objective"]["stage"], "diagnosticScored");

    let planned = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "plan.generate",
        json!({ "planId": plan_id, "tpId": tp }),
    );
    assert_eq!(planned["lessonPlan"]["pertemuanKe"], 1);
    assert_eq!(planned["lessonPlan"]["durationMinutes"], 70);
    assert_eq!(planned["objective"]["stage"], "planGenerated");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "diagnostic.saveDraft",
        json!({ "planId": plan_id, "tpId": tp, "recommendation": "ulang" }),
    );
    assert_eq!(code, "invalid_state");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "assessments.record",
        json!({
            "planId": plan_id,
            "tpId": tp,
            "pertemuan": 1,
            "entries": [{ "studentId": seeded.student_ids[1], "aspek": "Pemahaman", "level": 2 }]
        }),
    );

    let step = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "adaptive.next",
        json!({ "planId": plan_id, "tpId": tp }),
    );
    assert_eq!(step["step"]["decision"], "INTERVENTION");
    assert_eq!(step["step"]["plan"]["pertemuanKe"], 2);
    assert_eq!(step["objective"]["stage"], "adaptiveCycle");

    let status = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "objectives.status",
        json!({ "planId": plan_id }),
    );
    assert_eq!(status["nextMeetingNumber"], 3);
    assert_eq!(status["latestMeetingNumber"], 2);
    assert_eq!(status["objectives"][0]["latestPlanMeeting"], 2);
    assert_eq!(status["objectives"][1]["stage"], "noDiagnostic");

    use_fixtures(
        &mut stdin,
        &mut reader,
        json!({ "adaptiveStep": { "decision": "PROCEED", "rationale": "Semua tuntas" } }),
    );
    let step = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "adaptive.next",
        json!({ "planId": plan_id, "tpId": tp }),
    );
    assert_eq!(step["step"]["decision"], "PROCEED");
    assert_eq!(step["objective"]["stage"], "completed");

    let code = request_err(
        &mut stdin,
        &mut reader,
        "10",
        "adaptive.next",
        json!({ "planId": plan_id, "tpId": tp }),
    );
    assert_eq!(code, "invalid_state");

    let plan = open_plan(&mut stdin, &mut reader, plan_id);
    let steps = objective(&plan, tp)["adaptiveSteps"]
        .as_array()
        .expect("adaptive steps")
        .len();
    assert_eq!(steps, 2);

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn malformed_generator_output_is_reported_and_not_stored() {
    let workspace = temp_dir("kurikulum-bad-output");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let seeded = seed_plan(&mut stdin, &mut reader, &["Mengukur suhu"], &["Ani"]);
    let plan_id = seeded.plan_id.as_str();
    let tp = seeded.tp_ids[0].as_str();

    use_fixtures(
        &mut stdin,
        &mut reader,
        json!({
            "diagnostic": { "advice": "field salah" },
            "lessonPlan": { "title": "Tanpa fase" }
        }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "1",
        "diagnostic.generate",
        json!({ "planId": plan_id, "tpId": tp }),
    );
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "ai_invalid_response");
    assert_eq!(resp["error"]["details"]["path"], "$.recommendation");
    let plan = open_plan(&mut stdin, &mut reader, plan_id);
    assert!(objective(&plan, tp)["diagnosticData"].is_null());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "diagnostic.saveDraft",
        json!({ "planId": plan_id, "tpId": tp, "recommendation": "Kuis termometer" }),
    );
    let code = request_err(
        &mut stdin,
        &mut reader,
        "3",
        "diagnostic.saveSummary",
        json!({ "planId": plan_id, "tpId": tp, "summary": "   " }),
    );
    assert_eq!(code, "bad_params");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "diagnostic.saveSummary",
        json!({ "planId": plan_id, "tpId": tp, "summary": "Ani: siap" }),
    );

    let resp = request(
        &mut stdin,
        &mut reader,
        "5",
        "plan.generate",
        json!({ "planId": plan_id, "tpId": tp }),
    );
    assert_eq!(resp["error"]["code"], "ai_invalid_response");
    assert_eq!(resp["error"]["details"]["path"], "$.phases");
    let plan = open_plan(&mut stdin, &mut reader, plan_id);
    assert!(objective(&plan, tp)["diagnosticData"]["plan"].is_null());

    let code = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "sessions.plan",
        json!({ "planId": plan_id, "tpId": tp, "pertemuan": 0 }),
    );
    assert_eq!(code, "bad_params");
    let code = request_err(
        &mut stdin,
        &mut reader,
        "7",
        "diagnostic.generate",
        json!({ "planId": plan_id, "tpId": "tidak-ada" }),
    );
    assert_eq!(code, "not_found");

    let _ = std::fs::remove_dir_all(workspace);
}
