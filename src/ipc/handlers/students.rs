use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_str, row_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

const SANTRI_STATUSES: [&str; 3] = ["AKTIF", "LULUS", "KELUAR"];

fn santri_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    // Optional scope filters; the caller's role decides what it may ask for.
    let status = optional_str(params, "status");
    let asrama = optional_str(params, "asrama");
    let sql = "SELECT id, nama, asrama, kamar, sekolah_formal, status
               FROM santri
               WHERE (?1 IS NULL OR status = ?1)
                 AND (?2 IS NULL OR asrama = ?2)
               ORDER BY nama";
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::db_query)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map((&status, &asrama), |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "nama": r.get::<_, String>(1)?,
                "asrama": r.get::<_, Option<String>>(2)?,
                "kamar": r.get::<_, Option<String>>(3)?,
                "sekolahFormal": r.get::<_, Option<String>>(4)?,
                "status": r.get::<_, String>(5)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "santri": rows }))
}

fn santri_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let nama = required_str(params, "nama")?;
    if nama.trim().is_empty() {
        return Err(HandlerErr::bad_params("nama must not be empty"));
    }
    let asrama = optional_str(params, "asrama");
    let kamar = optional_str(params, "kamar");
    let sekolah_formal = optional_str(params, "sekolahFormal");
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO santri(id, nama, asrama, kamar, sekolah_formal, status)
         VALUES(?, ?, ?, ?, ?, 'AKTIF')",
        (&id, nama.trim(), &asrama, &kamar, &sekolah_formal),
    )
    .map_err(|e| HandlerErr::db_update(e, "santri"))?;
    Ok(json!({ "santriId": id }))
}

fn santri_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let santri_id = required_str(params, "santriId")?;
    if !row_exists(conn, "santri", &santri_id)? {
        return Err(HandlerErr::not_found("santri not found"));
    }
    let nama = optional_str(params, "nama");
    let asrama = optional_str(params, "asrama");
    let kamar = optional_str(params, "kamar");
    let sekolah_formal = optional_str(params, "sekolahFormal");
    conn.execute(
        "UPDATE santri SET
           nama = COALESCE(?, nama),
           asrama = COALESCE(?, asrama),
           kamar = COALESCE(?, kamar),
           sekolah_formal = COALESCE(?, sekolah_formal)
         WHERE id = ?",
        (&nama, &asrama, &kamar, &sekolah_formal, &santri_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "santri"))?;
    Ok(json!({ "ok": true }))
}

fn santri_set_status(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let santri_id = required_str(params, "santriId")?;
    let status = required_str(params, "status")?.to_ascii_uppercase();
    if !SANTRI_STATUSES.contains(&status.as_str()) {
        return Err(HandlerErr::bad_params(
            "status must be one of: AKTIF, LULUS, KELUAR",
        ));
    }
    if !row_exists(conn, "santri", &santri_id)? {
        return Err(HandlerErr::not_found("santri not found"));
    }
    conn.execute(
        "UPDATE santri SET status = ? WHERE id = ?",
        (&status, &santri_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "santri"))?;
    // Leaving the pesantren ends the active enrollment as well.
    if status != "AKTIF" {
        conn.execute(
            "UPDATE riwayat_pendidikan SET status = 'NONAKTIF'
             WHERE santri_id = ? AND status = 'AKTIF'",
            [&santri_id],
        )
        .map_err(|e| HandlerErr::db_update(e, "riwayat_pendidikan"))?;
    }
    Ok(json!({ "ok": true }))
}

fn enrollment_enroll(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let santri_id = required_str(params, "santriId")?;
    let kelas_id = required_str(params, "kelasId")?;
    if !row_exists(conn, "santri", &santri_id)? {
        return Err(HandlerErr::not_found("santri not found"));
    }
    if !row_exists(conn, "kelas", &kelas_id)? {
        return Err(HandlerErr::not_found("kelas not found"));
    }
    // At most one active enrollment per santri: a new one supersedes it.
    conn.execute(
        "UPDATE riwayat_pendidikan SET status = 'NONAKTIF'
         WHERE santri_id = ? AND status = 'AKTIF'",
        [&santri_id],
    )
    .map_err(|e| HandlerErr::db_update(e, "riwayat_pendidikan"))?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO riwayat_pendidikan(id, santri_id, kelas_id, status)
         VALUES(?, ?, ?, 'AKTIF')",
        (&id, &santri_id, &kelas_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "riwayat_pendidikan"))?;
    Ok(json!({ "riwayatId": id }))
}

fn enrollment_deactivate(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let riwayat_id = required_str(params, "riwayatId")?;
    if !row_exists(conn, "riwayat_pendidikan", &riwayat_id)? {
        return Err(HandlerErr::not_found("riwayat not found"));
    }
    conn.execute(
        "UPDATE riwayat_pendidikan SET status = 'NONAKTIF' WHERE id = ?",
        [&riwayat_id],
    )
    .map_err(|e| HandlerErr::db_update(e, "riwayat_pendidikan"))?;
    Ok(json!({ "ok": true }))
}

fn dispatch(
    conn: &Connection,
    method: &str,
    params: &serde_json::Value,
) -> Option<Result<serde_json::Value, HandlerErr>> {
    match method {
        "santri.list" => Some(santri_list(conn, params)),
        "santri.create" => Some(santri_create(conn, params)),
        "santri.update" => Some(santri_update(conn, params)),
        "santri.setStatus" => Some(santri_set_status(conn, params)),
        "enrollment.enroll" => Some(enrollment_enroll(conn, params)),
        "enrollment.deactivate" => Some(enrollment_deactivate(conn, params)),
        _ => None,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("santri.") && !req.method.starts_with("enrollment.") {
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
