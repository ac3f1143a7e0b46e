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

fn setup_santri(
    stdin: &mut ChildStdin,
    reader: &mut BufReader<ChildStdout>,
    workspace: &PathBuf,
    nama: &str,
) -> String {
    let _ = request_ok(
        stdin,
        reader,
        "s1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );
    let santri = request_ok(
        stdin,
        reader,
        "s2",
        "santri.create",
        json!({ "nama": nama, "asrama": "Al-Fath" }),
    );
    santri["santriId"].as_str().expect("santriId").to_string()
}

#[test]
fn one_open_permit_per_santri() {
    let workspace = temp_dir("pesantren-permit-single");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let santri_id = setup_santri(&mut stdin, &mut reader, &workspace, "Ahmad");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "permits.create",
        json!({
            "santriId": santri_id,
            "jenis": "PULANG",
            "rencanaPergi": "2024-05-01 08:00:00",
            "rencanaKembali": "2024-05-03 17:00:00"
        }),
    );
    assert!(created["permitId"].is_string());

    let second = request(
        &mut stdin,
        &mut reader,
        "2",
        "permits.create",
        json!({
            "santriId": santri_id,
            "jenis": "KELUAR",
            "rencanaPergi": "2024-05-02 08:00:00",
            "rencanaKembali": "2024-05-02 12:00:00"
        }),
    );
    assert_eq!(second["ok"].as_bool(), Some(false));
    assert_eq!(
        second["error"]["code"].as_str(),
        Some("permit_already_active")
    );

    let backwards = request(
        &mut stdin,
        &mut reader,
        "3",
        "permits.create",
        json!({
            "santriId": santri_id,
            "jenis": "KELUAR",
            "rencanaPergi": "2024-05-05 12:00:00",
            "rencanaKembali": "2024-05-05 08:00:00"
        }),
    );
    assert_eq!(backwards["ok"].as_bool(), Some(false));
    assert_eq!(backwards["error"]["code"].as_str(), Some("bad_params"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn on_time_return_closes_permit() {
    let workspace = temp_dir("pesantren-permit-ontime");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let santri_id = setup_santri(&mut stdin, &mut reader, &workspace, "Budi");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "permits.create",
        json!({
            "santriId": santri_id,
            "jenis": "PULANG",
            "rencanaPergi": "2024-05-01 08:00:00",
            "rencanaKembali": "2024-05-03 17:00:00"
        }),
    );
    let permit_id = created["permitId"].as_str().expect("permitId").to_string();

    let returned = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "permits.markReturn",
        json!({ "permitId": permit_id, "kembaliNyata": "2024-05-03 15:30:00" }),
    );
    assert_eq!(returned["late"].as_bool(), Some(false));
    assert_eq!(returned["status"].as_str(), Some("KEMBALI"));

    // The closed permit never reaches the overdue queue.
    let queue = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "permits.overdueQueue",
        json!({ "now": "2024-05-10 08:00:00" }),
    );
    assert_eq!(queue["entries"].as_array().map(|a| a.len()), Some(0));

    let again = request(
        &mut stdin,
        &mut reader,
        "4",
        "permits.markReturn",
        json!({ "permitId": permit_id, "kembaliNyata": "2024-05-04 10:00:00" }),
    );
    assert_eq!(again["ok"].as_bool(), Some(false));
    assert_eq!(again["error"]["code"].as_str(), Some("permit_closed"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn overdue_queue_and_telat_murni_verdict() {
    let workspace = temp_dir("pesantren-permit-telat");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let santri_id = setup_santri(&mut stdin, &mut reader, &workspace, "Citra");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "permits.create",
        json!({
            "santriId": santri_id,
            "jenis": "PULANG",
            "rencanaPergi": "2024-05-01 08:00:00",
            "rencanaKembali": "2024-05-03 17:00:00"
        }),
    );
    let permit_id = created["permitId"].as_str().expect("permitId").to_string();

    // Not overdue while the planned return is still ahead.
    let early = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "permits.overdueQueue",
        json!({ "now": "2024-05-03 10:00:00" }),
    );
    assert_eq!(early["entries"].as_array().map(|a| a.len()), Some(0));

    let overdue = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "permits.overdueQueue",
        json!({ "now": "2024-05-04 10:00:00" }),
    );
    let entries = overdue["entries"].as_array().expect("entries");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["permitId"].as_str(), Some(permit_id.as_str()));
    assert_eq!(entries[0]["sudahKembali"].as_bool(), Some(false));

    // A late return stays open pending the hearing.
    let returned = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "permits.markReturn",
        json!({ "permitId": permit_id, "kembaliNyata": "2024-05-04 09:00:00" }),
    );
    assert_eq!(returned["late"].as_bool(), Some(true));
    assert_eq!(returned["status"].as_str(), Some("AKTIF"));

    let still_queued = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "permits.overdueQueue",
        json!({ "now": "2024-05-04 10:00:00" }),
    );
    assert_eq!(
        still_queued["entries"][0]["sudahKembali"].as_bool(),
        Some(true)
    );

    let decided = request_ok(
        &mut stdin,
        &mut reader,
        "6",
        "permits.decide",
        json!({
            "permitId": permit_id,
            "verdict": "TELAT_MURNI",
            "now": "2024-05-04 10:00:00",
            "actorId": "ust-umar"
        }),
    );
    assert_eq!(decided["closed"].as_bool(), Some(true));
    assert!(decided["violationId"].is_string());

    let violations = request_ok(
        &mut stdin,
        &mut reader,
        "7",
        "violations.list",
        json!({ "santriId": santri_id }),
    );
    assert_eq!(violations["totalPoin"].as_i64(), Some(25));
    assert_eq!(
        violations["pelanggaran"][0]["kategori"].as_str(),
        Some("TELAT")
    );

    // Closed now, so a second verdict finds nothing to decide.
    let gone = request(
        &mut stdin,
        &mut reader,
        "8",
        "permits.decide",
        json!({ "permitId": permit_id, "verdict": "TELAT_MURNI", "now": "2024-05-04 11:00:00" }),
    );
    assert_eq!(gone["ok"].as_bool(), Some(false));
    assert_eq!(gone["error"]["code"].as_str(), Some("not_found"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}

#[test]
fn excused_and_mangkir_permit_verdicts() {
    let workspace = temp_dir("pesantren-permit-uzur");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();
    let santri_id = setup_santri(&mut stdin, &mut reader, &workspace, "Dedi");

    let created = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "permits.create",
        json!({
            "santriId": santri_id,
            "jenis": "KELUAR",
            "rencanaPergi": "2024-05-01 08:00:00",
            "rencanaKembali": "2024-05-01 12:00:00"
        }),
    );
    let permit_id = created["permitId"].as_str().expect("permitId").to_string();

    // MANGKIR keeps the permit open; it resurfaces in the queue.
    let skipped = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "permits.decide",
        json!({ "permitId": permit_id, "verdict": "MANGKIR", "now": "2024-05-02 08:00:00" }),
    );
    assert_eq!(skipped["closed"].as_bool(), Some(false));
    assert!(skipped["violationId"].is_null());
    let queue = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "permits.overdueQueue",
        json!({ "now": "2024-05-02 08:00:00" }),
    );
    assert_eq!(queue["entries"].as_array().map(|a| a.len()), Some(1));

    // An excused late return closes without any penalty.
    let excused = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "permits.decide",
        json!({ "permitId": permit_id, "verdict": "SAKIT_UZUR", "now": "2024-05-02 08:00:00" }),
    );
    assert_eq!(excused["closed"].as_bool(), Some(true));
    assert!(excused["violationId"].is_null());

    let violations = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "violations.list",
        json!({ "santriId": santri_id }),
    );
    assert_eq!(violations["totalPoin"].as_i64(), Some(0));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
