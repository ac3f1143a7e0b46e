use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor, optional_str, required_i64, required_str, row_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use chrono::Local;
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let santri_id = optional_str(params, "santriId");
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.santri_id, s.nama, p.kategori, p.keterangan, p.poin, p.dicatat_pada
             FROM pelanggaran p
             JOIN santri s ON s.id = p.santri_id
             WHERE (?1 IS NULL OR p.santri_id = ?1)
             ORDER BY p.dicatat_pada DESC",
        )
        .map_err(HandlerErr::db_query)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map([&santri_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "santriId": r.get::<_, String>(1)?,
                "santriNama": r.get::<_, String>(2)?,
                "kategori": r.get::<_, String>(3)?,
                "keterangan": r.get::<_, String>(4)?,
                "poin": r.get::<_, i64>(5)?,
                "dicatatPada": r.get::<_, String>(6)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    let total_poin: i64 = rows
        .iter()
        .filter_map(|v| v.get("poin").and_then(|p| p.as_i64()))
        .sum();
    Ok(json!({ "pelanggaran": rows, "totalPoin": total_poin }))
}

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let santri_id = required_str(params, "santriId")?;
    let kategori = required_str(params, "kategori")?;
    let keterangan = required_str(params, "keterangan")?;
    let poin = required_i64(params, "poin")?;
    if kategori.trim().is_empty() {
        return Err(HandlerErr::bad_params("kategori must not be empty"));
    }
    if poin < 0 {
        return Err(HandlerErr::bad_params("poin must be >= 0"));
    }
    if !row_exists(conn, "santri", &santri_id)? {
        return Err(HandlerErr::not_found("santri not found"));
    }
    let id = Uuid::new_v4().to_string();
    let dicatat_oleh = actor(params);
    let now = Local::now().naive_local().to_string();
    conn.execute(
        "INSERT INTO pelanggaran(id, santri_id, kategori, keterangan, poin, dicatat_pada, dicatat_oleh)
         VALUES(?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            &santri_id,
            kategori.trim(),
            keterangan.trim(),
            poin,
            &now,
            &dicatat_oleh,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "pelanggaran"))?;
    Ok(json!({ "pelanggaranId": id }))
}

fn dispatch(
    conn: &Connection,
    method: &str,
    params: &serde_json::Value,
) -> Option<Result<serde_json::Value, HandlerErr>> {
    match method {
        "violations.list" => Some(list(conn, params)),
        "violations.create" => Some(create(conn, params)),
        _ => None,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("violations.") {
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
