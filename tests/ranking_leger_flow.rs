use serde_json::json;
use std::io::{BufRead, BufReader, Write};
use std::path::PathBuf;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

fn temp_dir(prefix: &str) -> PathBuf {
    let p = std::env::temp_dir().join(format!(
        "{}-{}",
        prefix,
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("clock")
            .as_nanos()
    ));
    std::fs::create_dir_all(&p).expect("create temp dir");
    p
}

fn spawn_sidecar() -> (Child, ChildStdin, BufReader<ChildStdout>) {
    let exe = env!("CARGO_BIN_EXE_pesantrend");
    let mut child = Command::new(exe)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .expect("spawn pesantrend");
    let stdin = child.stdin.take().expect("child stdin");
    let stdout = child.stdout.take().expect("child stdout");
    (child, stdin, BufReader::new(stdout))
}

fn request(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let payload = json!({
        "id": id,
        "method": method,
        "params": params,
    });
    writeln!(stdin, "{}", payload).expect("write request");
    stdin.flush().expect("flush request");

    let mut line = String::new();
    reader.read_line(&mut line).expect("read response line");
    assert!(!line.trim().is_empty(), "empty response for {}", method);
    let value: serde_json::Value = serde_json::from_str(line.trim()).expect("parse response json");
    assert_eq!(value.get("id").and_then(|v| v.as_str()), Some(id));
    value
}

fn request_ok(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    method: &str,
    params: serde_json::Value,
) -> serde_json::Value {
    let value = request(stdin, reader, id, method, params);
    assert!(
        value.get("ok").and_then(|v| v.as_bool()).unwrap_or(false),
        "{} failed: {}",
        method,
        value
    );
    value.get("result").cloned().unwrap_or_else(|| json!({}))
}

struct ClassSetup {
    kelas_id: String,
    mapel_ids: Vec<String>,
    riwayat_ids: Vec<String>,
}

/// Class on a ten-subject marhalah with three enrolled santri.
fn setup_class(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    names: &[&str],
) -> ClassSetup {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let marhalah = request_ok(
        stdin,
        reader,
        "s2",
        "marhalah.create",
        json!({ "nama": "Wustha", "urutan": 2 }),
    );
    let marhalah_id = marhalah["marhalahId"].as_str().expect("marhalahId").to_string();
    let kelas = request_ok(
        stdin,
        reader,
        "s3",
        "kelas.create",
        json!({ "marhalahId": marhalah_id, "nama": "2B", "tahunAjaran": "2024/2025" }),
    );
    let kelas_id = kelas["kelasId"].as_str().expect("kelasId").to_string();

    let mut mapel_ids = Vec::new();
    for i in 1..=10 {
        let mapel = request_ok(
            stdin,
            reader,
            &format!("m{}", i),
            "mapel.create",
            json!({ "marhalahId": marhalah_id, "nama": format!("Mapel {:02}", i), "urutan": i }),
        );
        mapel_ids.push(mapel["mapelId"].as_str().expect("mapelId").to_string());
    }

    let mut riwayat_ids = Vec::new();
    for (i, nama) in names.iter().enumerate() {
        let santri = request_ok(
            stdin,
            reader,
            &format!("n{}", i),
            "santri.create",
            json!({ "nama": nama }),
        );
        let enrolled = request_ok(
            stdin,
            reader,
            &format!("e{}", i),
            "enrollment.enroll",
            json!({
                "santriId": santri["santriId"].as_str().expect("santriId"),
                "kelasId": kelas_id
            }),
        );
        riwayat_ids.push(enrolled["riwayatId"].as_str().expect("riwayatId").to_string());
    }

    ClassSetup {
        kelas_id,
        mapel_ids,
        riwayat_ids,
    }
}

fn save_uniform_scores(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    id: &str,
    setup: &ClassSetup,
    per_santri: &[f64],
) {
    let mut entries = Vec::new();
    for (riwayat_id, nilai) in setup.riwayat_ids.iter().zip(per_santri) {
        for mapel_id in &setup.mapel_ids {
            entries.push(json!({
                "riwayatId": riwayat_id,
                "mapelId": mapel_id,
                "nilai": nilai
            }));
        }
    }
    let saved = request_ok(
        stdin,
        reader,
        id,
        "scores.saveBulk",
        json!({ "semester": 1, "entries": entries }),
    );
    assert_eq!(
        saved["saved"].as_i64(),
        Some((per_santri.len() * setup.mapel_ids.len()) as i64)
    );
}

fn rank_of<'a>(ranks: &'a serde_json::Value, riwayat_id: &str) -> &'a serde_json::Value {
    ranks
        .as_array()
        .expect("ranks")
        .iter()
        .find(|r| r["riwayatId"].as_str() == Some(riwayat_id))
        .unwrap_or_else(|| panic!("riwayat {} missing from ranks", riwayat_id))
}

#[test]
fn recompute_orders_totals_720_650_700_as_1_3_2() {
    let workspace = temp_dir("pesantren-ranking-order");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let setup = setup_class(&mut stdin, &mut reader, &workspace, &["Ahmad", "Budi", "Citra"]);

    save_uniform_scores(&mut stdin, &mut reader, "1", &setup, &[72.0, 65.0, 70.0]);

    let computed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "ranking.recompute",
        json!({ "kelasId": setup.kelas_id, "semester": 1 }),
    );
    let ranks = &computed["ranks"];

    let ahmad = rank_of(ranks, &setup.riwayat_ids[0]);
    assert_eq!(ahmad["jumlah"].as_f64(), Some(720.0));
    assert_eq!(ahmad["rataRata"].as_f64(), Some(72.0));
    assert_eq!(ahmad["peringkat"].as_i64(), Some(1));
    assert_eq!(ahmad["predikat"].as_str(), Some("Jayyid"));

    let budi = rank_of(ranks, &setup.riwayat_ids[1]);
    assert_eq!(budi["peringkat"].as_i64(), Some(3));
    assert_eq!(budi["predikat"].as_str(), Some("Maqbul"));

    let citra = rank_of(ranks, &setup.riwayat_ids[2]);
    assert_eq!(citra["peringkat"].as_i64(), Some(2));

    // Recompute on unchanged marks overwrites the cache with the same ranks.
    let again = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "ranking.recompute",
        json!({ "kelasId": setup.kelas_id, "semester": 1 }),
    );
    assert_eq!(again["ranks"], computed["ranks"]);

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn equal_averages_break_on_designated_subjects() {
    let workspace = temp_dir("pesantren-ranking-ties");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let setup = setup_class(&mut stdin, &mut reader, &workspace, &["Ahmad", "Budi"]);

    // Same total 800. Ahmad is stronger on the first subject, Budi flat.
    let mut entries = Vec::new();
    for (i, mapel_id) in setup.mapel_ids.iter().enumerate() {
        let ahmad_nilai = if i == 0 { 90.0 } else if i == 1 { 70.0 } else { 80.0 };
        entries.push(json!({
            "riwayatId": setup.riwayat_ids[0],
            "mapelId": mapel_id,
            "nilai": ahmad_nilai
        }));
        entries.push(json!({
            "riwayatId": setup.riwayat_ids[1],
            "mapelId": mapel_id,
            "nilai": 80.0
        }));
    }
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "scores.saveBulk",
        json!({ "semester": 1, "entries": entries }),
    );

    let computed = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "ranking.recompute",
        json!({
            "kelasId": setup.kelas_id,
            "semester": 1,
            "primaryMapelId": setup.mapel_ids[0],
            "secondaryMapelId": setup.mapel_ids[1]
        }),
    );
    let ahmad = rank_of(&computed["ranks"], &setup.riwayat_ids[0]);
    let budi = rank_of(&computed["ranks"], &setup.riwayat_ids[1]);
    assert_eq!(ahmad["rataRata"].as_f64(), budi["rataRata"].as_f64());
    assert_eq!(ahmad["peringkat"].as_i64(), Some(1));
    assert_eq!(budi["peringkat"].as_i64(), Some(2));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn leger_exposes_subject_columns_and_cached_ranks() {
    let workspace = temp_dir("pesantren-ranking-leger");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let setup = setup_class(&mut stdin, &mut reader, &workspace, &["Ahmad", "Budi", "Citra"]);

    save_uniform_scores(&mut stdin, &mut reader, "1", &setup, &[72.0, 65.0, 70.0]);

    // Before any recompute the rank columns are empty.
    let cold = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "ranking.leger",
        json!({ "kelasId": setup.kelas_id, "semester": 1 }),
    );
    assert!(cold["leger"]["rows"][0]["peringkat"].is_null());

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "ranking.recompute",
        json!({ "kelasId": setup.kelas_id, "semester": 1 }),
    );

    let warm = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "ranking.leger",
        json!({ "kelasId": setup.kelas_id, "semester": 1 }),
    );
    let leger = &warm["leger"];
    assert_eq!(leger["subjects"].as_array().map(|a| a.len()), Some(10));
    assert_eq!(leger["rows"].as_array().map(|a| a.len()), Some(3));
    // Roster rows come back alphabetized.
    assert_eq!(leger["rows"][0]["nama"].as_str(), Some("Ahmad"));
    assert_eq!(leger["rows"][0]["peringkat"].as_i64(), Some(1));
    assert_eq!(leger["rows"][0]["jumlah"].as_f64(), Some(720.0));
    assert_eq!(leger["rows"][1]["nama"].as_str(), Some("Budi"));
    assert_eq!(leger["rows"][1]["peringkat"].as_i64(), Some(3));

    let export = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "ranking.legerExportRows",
        json!({ "kelasId": setup.kelas_id, "semester": 1 }),
    );
    let rows = export["rows"].as_array().expect("rows");
    assert_eq!(rows.len(), 3);
    assert_eq!(rows[0]["Nama"].as_str(), Some("Ahmad"));
    assert_eq!(rows[0]["Mapel 01"].as_f64(), Some(72.0));
    assert_eq!(rows[0]["Jumlah"].as_f64(), Some(720.0));
    assert_eq!(rows[0]["Rata-rata"].as_f64(), Some(72.0));
    assert_eq!(rows[0]["Peringkat"].as_i64(), Some(1));
    assert_eq!(rows[0]["Predikat"].as_str(), Some("Jayyid"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn save_bulk_rejects_out_of_range_marks() {
    let workspace = temp_dir("pesantren-ranking-validate");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let setup = setup_class(&mut stdin, &mut reader, &workspace, &["Ahmad"]);

    let too_high = request(
        &mut stdin,
        &mut reader,
        "1",
        "scores.saveBulk",
        json!({
            "semester": 1,
            "entries": [{
                "riwayatId": setup.riwayat_ids[0],
                "mapelId": setup.mapel_ids[0],
                "nilai": 101.0
            }]
        }),
    );
    assert_eq!(too_high["ok"].as_bool(), Some(false));
    assert_eq!(too_high["error"]["code"].as_str(), Some("bad_params"));

    let negative = request(
        &mut stdin,
        &mut reader,
        "2",
        "scores.saveBulk",
        json!({
            "semester": 1,
            "entries": [{
                "riwayatId": setup.riwayat_ids[0],
                "mapelId": setup.mapel_ids[0],
                "nilai": -1.0
            }]
        }),
    );
    assert_eq!(negative["ok"].as_bool(), Some(false));

    // The rejected batch left nothing behind.
    let leger = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "ranking.leger",
        json!({ "kelasId": setup.kelas_id, "semester": 1 }),
    );
    assert!(leger["leger"]["rows"][0]["nilai"][0].is_null());

    // Saving the same cell twice keeps the last value.
    for (id, nilai) in [("4", 70.0), ("5", 95.0)] {
        let _ = request_ok(
            &mut stdin,
            &mut reader,
            id,
            "scores.saveBulk",
            json!({
                "semester": 1,
                "entries": [{
                    "riwayatId": setup.riwayat_ids[0],
                    "mapelId": setup.mapel_ids[0],
                    "nilai": nilai
                }]
            }),
        );
    }
    let reread = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "ranking.leger",
        json!({ "kelasId": setup.kelas_id, "semester": 1 }),
    );
    assert_eq!(
        reread["leger"]["rows"][0]["nilai"][0].as_f64(),
        Some(95.0)
    );

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
