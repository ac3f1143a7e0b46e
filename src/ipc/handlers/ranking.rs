use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_i64, required_str, row_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::ranking::{build_leger, leger_export_rows, recompute_class_semester, RankError};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn from_rank_err(e: RankError) -> HandlerErr {
    let code = match e.code.as_str() {
        "not_found" => "not_found",
        "db_update_failed" => "db_update_failed",
        _ => "db_query_failed",
    };
    HandlerErr {
        code,
        message: e.message,
        details: None,
    }
}

fn save_bulk(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let semester = required_i64(params, "semester")?;
    let entries = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing entries"))?;
    if entries.is_empty() {
        return Err(HandlerErr::bad_params("entries must not be empty"));
    }

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::db_update(e, "nilai_akademik"))?;
    let mut saved = 0usize;
    for entry in entries {
        let riwayat_id = required_str(entry, "riwayatId")?;
        let mapel_id = required_str(entry, "mapelId")?;
        let nilai = entry
            .get("nilai")
            .and_then(|v| v.as_f64())
            .ok_or_else(|| HandlerErr::bad_params("missing nilai"))?;
        if !(0.0..=100.0).contains(&nilai) {
            return Err(HandlerErr::bad_params(format!(
                "nilai must be between 0 and 100, got {}",
                nilai
            )));
        }
        if !row_exists(&tx, "riwayat_pendidikan", &riwayat_id)? {
            return Err(HandlerErr::not_found("riwayat not found"));
        }
        if !row_exists(&tx, "mapel", &mapel_id)? {
            return Err(HandlerErr::not_found("mapel not found"));
        }
        let id = Uuid::new_v4().to_string();
        tx.execute(
            "INSERT INTO nilai_akademik(id, riwayat_id, mapel_id, semester, nilai)
             VALUES(?, ?, ?, ?, ?)
             ON CONFLICT(riwayat_id, mapel_id, semester) DO UPDATE SET
               nilai = excluded.nilai",
            (&id, &riwayat_id, &mapel_id, semester, nilai),
        )
        .map_err(|e| HandlerErr::db_update(e, "nilai_akademik"))?;
        saved += 1;
    }
    tx.commit()
        .map_err(|e| HandlerErr::db_update(e, "nilai_akademik"))?;
    Ok(json!({ "saved": saved }))
}

fn recompute(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = required_str(params, "kelasId")?;
    let semester = required_i64(params, "semester")?;
    let primary = optional_str(params, "primaryMapelId");
    let secondary = optional_str(params, "secondaryMapelId");
    let ranks = recompute_class_semester(
        conn,
        &kelas_id,
        semester,
        primary.as_deref(),
        secondary.as_deref(),
    )
    .map_err(from_rank_err)?;
    Ok(json!({ "kelasId": kelas_id, "semester": semester, "ranks": ranks }))
}

fn leger(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = required_str(params, "kelasId")?;
    let semester = required_i64(params, "semester")?;
    let model = build_leger(conn, &kelas_id, semester).map_err(from_rank_err)?;
    Ok(json!({ "leger": model }))
}

fn leger_export(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = required_str(params, "kelasId")?;
    let semester = required_i64(params, "semester")?;
    let model = build_leger(conn, &kelas_id, semester).map_err(from_rank_err)?;
    let rows = leger_export_rows(&model);
    Ok(json!({ "rows": rows }))
}

fn dispatch(
    conn: &Connection,
    method: &str,
    params: &serde_json::Value,
) -> Option<Result<serde_json::Value, HandlerErr>> {
    match method {
        "scores.saveBulk" => Some(save_bulk(conn, params)),
        "ranking.recompute" => Some(recompute(conn, params)),
        "ranking.leger" => Some(leger(conn, params)),
        "ranking.legerExportRows" => Some(leger_export(conn, params)),
        _ => None,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("scores.") && !req.method.starts_with("ranking.") {
        return None;
    }
    let Some(conn) = state.db.as_ref() else {
        return Some(err(&req.id, "no_workspace", "select a workspace first", None));
    };
    dispatch(conn, &req.method, &req.params).map(|res| match res {
        Ok(result) => ok(&req.id, result),
        Err(error) => error.response(&req.id),
    })
}
