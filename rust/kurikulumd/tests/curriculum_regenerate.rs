mod test_support;

use serde_json::{json, Value};
use test_support::{
    objective, request, request_ok, rubric, seed_plan, select_workspace, spawn_sidecar, student,
    temp_dir, use_fixtures,
};

fn ids(plan: &Value) -> Vec<String> {
    plan["curriculum"]["objectives"]
        .as_array()
        .expect("objectives")
        .iter()
        .map(|o| o["id"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[test]
fn sequencing_then_regenerating_objectives_keeps_units_consistent() {
    let workspace = temp_dir("kurikulum-atp");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let seeded = seed_plan(
        &mut stdin,
        &mut reader,
        &["Norma di rumah", "Hak dan kewajiban"],
        &["Ani"],
    );
    let plan_id = seeded.plan_id.as_str();
    let (tp1, tp2) = (seeded.tp_ids[0].clone(), seeded.tp_ids[1].clone());

    use_fixtures(
        &mut stdin,
        &mut reader,
        json!({
            "atpOrder": { "order": [tp2, tp1] },
            "units": { "units": [
                { "title": "Warga yang bertanggung jawab", "objectiveIds": [tp2, tp1], "meetings": 4 }
            ] }
        }),
    );
    let sequenced = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "atp.regenerate",
        json!({ "planId": plan_id }),
    );
    assert_eq!(ids(&sequenced["plan"]), vec![tp2.clone(), tp1.clone()]);
    assert_eq!(sequenced["removedTpIds"], json!([]));
    assert_eq!(
        sequenced["plan"]["curriculum"]["units"][0]["objectiveIds"],
        json!([tp2, tp1])
    );

    use_fixtures(
        &mut stdin,
        &mut reader,
        json!({
            "objectives": { "objectives": [
                { "id": tp2, "description": "Hak dan kewajiban di sekolah" },
                { "description": "Musyawarah kelas" }
            ] }
        }),
    );
    let regenerated = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "curriculum.regenerate",
        json!({ "planId": plan_id, "context": "fokus kelas 4" }),
    );
    assert_eq!(regenerated["removedTpIds"], json!([tp1]));
    let new_ids = ids(&regenerated["plan"]);
    assert_eq!(new_ids.len(), 2);
    assert_eq!(new_ids[0], tp2);
    assert_eq!(
        regenerated["plan"]["curriculum"]["units"][0]["objectiveIds"],
        json!([tp2])
    );

    use_fixtures(
        &mut stdin,
        &mut reader,
        json!({
            "atpOrder": { "order": ["tidak-dikenal"] },
            "units": { "units": [] }
        }),
    );
    let resp = request(
        &mut stdin,
        &mut reader,
        "3",
        "atp.regenerate",
        json!({ "planId": plan_id }),
    );
    assert_eq!(resp["error"]["code"], "ai_invalid_response");
    assert_eq!(resp["error"]["details"]["path"], "$.order[0]");

    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn full_regeneration_chains_objectives_order_and_units() {
    let workspace = temp_dir("kurikulum-atp-full");
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    select_workspace(&mut stdin, &mut reader, &workspace);
    let seeded = seed_plan(
        &mut stdin,
        &mut reader,
        &["Bagian tumbuhan", "Fungsi akar", "Fungsi daun"],
        &["Ani"],
    );
    let plan_id = seeded.plan_id.as_str();
    let (tp1, tp2, tp3) = (
        seeded.tp_ids[0].clone(),
        seeded.tp_ids[1].clone(),
        seeded.tp_ids[2].clone(),
    );
    let ani = seeded.student_ids[0].as_str();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "kktp.update",
        json!({ "planId": plan_id, "tpId": tp2, "kktp": rubric(&["Pengamatan"]) }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "diagnostic.saveDraft",
        json!({ "planId": plan_id, "tpId": tp2, "recommendation": "Amati akar tauge" }),
    );
    for (id, tp) in [("3", tp1.as_str()), ("4", tp2.as_str())] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "assessments.record",
            json!({
                "planId": plan_id,
                "tpId": tp,
                "pertemuan": 1,
                "entries": [{ "studentId": ani, "aspek": "Pengamatan", "level": 3 }]
            }),
        );
    }

    use_fixtures(
        &mut stdin,
        &mut reader,
        json!({
            "objectives": { "objectives": [
                { "id": tp3, "description": "Fungsi daun bagi tumbuhan" },
                { "id": tp2, "description": "Fungsi akar bagi tumbuhan" },
                { "description": "Perkembangbiakan tumbuhan" }
            ] },
            "atpOrder": { "order": [tp2, tp3] },
            "units": { "units": [
                { "title": "Tumbuhan di sekitar kita", "objectiveIds": [tp2, tp3], "meetings": 3 }
            ] }
        }),
    );
    let result = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "atp.fullRegenerate",
        json!({ "planId": plan_id }),
    );
    assert_eq!(result["removedTpIds"], json!([tp1]));
    assert_eq!(result["studentsChanged"], 1);

    let plan = &result["plan"];
    let order = ids(plan);
    assert_eq!(order.len(), 3);
    assert_eq!(&order[..2], &[tp2.clone(), tp3.clone()]);
    assert!(!order.contains(&tp1));
    assert_eq!(
        objective(plan, &order[2])["description"],
        "Perkembangbiakan tumbuhan"
    );

    let kept = objective(plan, &tp2);
    assert_eq!(kept["description"], "Fungsi akar bagi tumbuhan");
    assert_eq!(kept["kktp"]["aspects"][0]["aspek"], "Pengamatan");
    assert_eq!(
        kept["diagnosticData"]["recommendation"],
        "Amati akar tauge"
    );

    let units = plan["curriculum"]["units"].as_array().expect("units");
    assert_eq!(units.len(), 1);
    assert_eq!(units[0]["title"], "Tumbuhan di sekitar kita");
    assert_eq!(units[0]["objectiveIds"], json!([tp2, tp3]));
    assert_eq!(units[0]["meetings"], 3);

    let rows = student(&mut stdin, &mut reader, ani)["assessments"].clone();
    let rows = rows.as_array().expect("assessments");
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["tpId"], tp2.as_str());

    let _ = std::fs::remove_dir_all(workspace);
}
