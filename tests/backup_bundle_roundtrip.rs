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

#[test]
fn bundle_export_import_carries_workspace_data() {
    let source = temp_dir("pesantren-bundle-src");
    let target = temp_dir("pesantren-bundle-dst");
    let bundle = source.join("backup.pesantren.zip");

    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": source.to_string_lossy() }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "marhalah.create",
        json!({ "nama": "Ula", "urutan": 1 }),
    );
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "santri.create",
        json!({ "nama": "Ahmad", "asrama": "Al-Fath" }),
    );

    let exported = request_ok(
        &mut stdin,
        &mut reader,
        "4",
        "workspace.exportBundle",
        json!({ "outPath": bundle.to_string_lossy() }),
    );
    assert_eq!(
        exported["bundleFormat"].as_str(),
        Some("pesantren-workspace-v1")
    );
    assert!(exported["dbSha256"].as_str().map(|s| s.len()) == Some(64));
    assert!(bundle.is_file());

    // Restore into a fresh workspace; the session moves onto it.
    let imported = request_ok(
        &mut stdin,
        &mut reader,
        "5",
        "workspace.importBundle",
        json!({
            "workspacePath": target.to_string_lossy(),
            "inPath": bundle.to_string_lossy()
        }),
    );
    assert_eq!(
        imported["bundleFormatDetected"].as_str(),
        Some("pesantren-workspace-v1")
    );

    let santri = request_ok(&mut stdin, &mut reader, "6", "santri.list", json!({}));
    let names: Vec<&str> = santri["santri"]
        .as_array()
        .expect("santri")
        .iter()
        .filter_map(|s| s["nama"].as_str())
        .collect();
    assert_eq!(names, vec!["Ahmad"]);
    let marhalah = request_ok(&mut stdin, &mut reader, "7", "marhalah.list", json!({}));
    assert_eq!(marhalah["marhalah"].as_array().map(|a| a.len()), Some(1));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(source);
    let _ = std::fs::remove_dir_all(target);
}

#[test]
fn import_rejects_missing_or_invalid_bundles() {
    let workspace = temp_dir("pesantren-bundle-invalid");
    let (mut child, mut stdin, mut reader) = spawn_sidecar();

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "workspace.select",
        json!({ "path": workspace.to_string_lossy() }),
    );

    let missing = request(
        &mut stdin,
        &mut reader,
        "2",
        "workspace.importBundle",
        json!({ "inPath": workspace.join("nope.zip").to_string_lossy() }),
    );
    assert_eq!(missing["ok"].as_bool(), Some(false));
    assert_eq!(missing["error"]["code"].as_str(), Some("not_found"));

    let garbage = workspace.join("garbage.zip");
    std::fs::write(&garbage, b"this is not a zip archive").expect("write garbage");
    let invalid = request(
        &mut stdin,
        &mut reader,
        "3",
        "workspace.importBundle",
        json!({ "inPath": garbage.to_string_lossy() }),
    );
    assert_eq!(invalid["ok"].as_bool(), Some(false));
    assert_eq!(invalid["error"]["code"].as_str(), Some("io_failed"));

    drop(stdin);
    let _ = child.wait();
    let _ = std::fs::remove_dir_all(workspace);
}
