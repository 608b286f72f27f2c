mod test_support;

use serde_json::{json, Value};
use test_support::{
    objective, request, request_ok, rubric, seed_plan, select_workspace, set_objectives,
    spawn_sidecar, student, temp_dir,
};

fn tp_ids_of(rows: &Value) -> Vec<String> {
    let mut ids: Vec<String> = rows
        .as_array()
        .expect("rows")
        .iter()
        .map(|r| r["tpId"].as_str().unwrap_or_default().to_string())
        .collect();
    ids.sort();
    ids
}

#[test]
fn removed_objectives_are_swept_from_students() {
    let workspace = temp_dir("kurikulum-tps-update");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let seeded = seed_plan(
        &mut stdin,
        &mut reader,
        &["Rantai makanan", "Fotosintesis"],
        &["Ani"],
    );
    let plan_id = seeded.plan_id.as_str();
    let (tp1, tp2) = (seeded.tp_ids[0].clone(), seeded.tp_ids[1].clone());
    let ani = seeded.student_ids[0].as_str();

    let other = request_ok(
        &mut stdin,
        &mut reader,
        "o1",
        "plans.create",
        json!({ "name": "Bahasa Indonesia", "classId": seeded.class_id }),
    );
    let other_plan = other["planId"].as_str().expect("planId").to_string();
    let other_tp = set_objectives(&mut stdin, &mut reader, &other_plan, &["Membaca nyaring"])[0].clone();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "kktp.update",
        json!({ "planId": plan_id, "tpId": tp2, "kktp": rubric(&["Pemahaman"]) }),
    );
    for (id, plan, tp) in [
        ("2", plan_id, tp1.as_str()),
        ("3", plan_id, tp2.as_str()),
        ("4", other_plan.as_str(), other_tp.as_str()),
    ] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "assessments.record",
            json!({
                "planId": plan,
                "tpId": tp,
                "pertemuan": 1,
                "entries": [{ "studentId": ani, "aspek": "Pemahaman", "level": 3 }]
            }),
        );
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "summatives.upsert",
        json!({ "studentId": ani, "input": { "tpId": tp1, "title": "Kuis", "score": 70 } }),
    );

    let updated = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "tps.update",
        json!({
            "planId": plan_id,
            "objectives": [
                { "id": tp2, "description": "Fotosintesis pada tumbuhan hijau" },
                { "description": "Ekosistem sawah" }
            ]
        }),
    );
    assert_eq!(updated["removedTpIds"], json!([tp1]));
    assert_eq!(updated["studentsChanged"], 1);
    let kept = objective(&updated["plan"], &tp2);
    assert_eq!(kept["description"], "Fotosintesis pada tumbuhan hijau");
    assert!(kept["kktp"].is_object());
    let objectives = updated["plan"]["curriculum"]["objectives"]
        .as_array()
        .expect("objectives");
    assert_eq!(objectives.len(), 2);
    assert_ne!(objectives[1]["id"], json!(tp1));

    let row = student(&mut stdin, &mut reader, ani);
    let mut expected = vec![tp2.clone(), other_tp.clone()];
    expected.sort();
    assert_eq!(tp_ids_of(&row["assessments"]), expected);
    assert_eq!(row["summatives"], json!([]));

    let resp = request(
        &mut stdin,
        &mut reader,
        "7",
        "tps.update",
        json!({ "planId": plan_id, "objectives": [{ "description": "  " }] }),
    );
    assert_eq!(resp["error"]["code"], "bad_params");
    assert_eq!(resp["error"]["details"]["path"], "params.objectives[0].description");

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "8",
        "app.setActive",
        json!({ "planId": plan_id }),
    );
    let deleted = request_ok(
        &mut stdin,
        &mut reader,
        "9",
        "plans.delete",
        json!({ "planId": plan_id }),
    );
    assert_eq!(deleted["studentsChanged"], 1);
    let row = student(&mut stdin, &mut reader, ani);
    assert_eq!(tp_ids_of(&row["assessments"]), vec![other_tp.clone()]);
    let active = request_ok(&mut stdin, &mut reader, "10", "app.getActive", json!({}));
    assert!(active["activePlanId"].is_null());

    let _ = std::fs::remove_dir_all(workspace);
}
