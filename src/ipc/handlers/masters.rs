use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{optional_str, required_i64, required_str, row_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use uuid::Uuid;

fn marhalah_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, nama, urutan FROM marhalah ORDER BY urutan")
        .map_err(HandlerErr::db_query)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "nama": r.get::<_, String>(1)?,
                "urutan": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "marhalah": rows }))
}

fn marhalah_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let nama = required_str(params, "nama")?;
    if nama.trim().is_empty() {
        return Err(HandlerErr::bad_params("nama must not be empty"));
    }
    let urutan = required_i64(params, "urutan")?;
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO marhalah(id, nama, urutan) VALUES(?, ?, ?)",
        (&id, nama.trim(), urutan),
    )
    .map_err(|e| HandlerErr::db_update(e, "marhalah"))?;
    Ok(json!({ "marhalahId": id }))
}

fn guru_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let mut stmt = conn
        .prepare("SELECT id, nama FROM guru ORDER BY nama")
        .map_err(HandlerErr::db_query)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map([], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "nama": r.get::<_, String>(1)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "guru": rows }))
}

fn guru_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let nama = required_str(params, "nama")?;
    if nama.trim().is_empty() {
        return Err(HandlerErr::bad_params("nama must not be empty"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute("INSERT INTO guru(id, nama) VALUES(?, ?)", (&id, nama.trim()))
        .map_err(|e| HandlerErr::db_update(e, "guru"))?;
    Ok(json!({ "guruId": id }))
}

fn kelas_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let marhalah_filter = optional_str(params, "marhalahId");
    let sql = "SELECT k.id, k.nama, k.tahun_ajaran, k.marhalah_id, m.nama,
                      k.guru_shubuh, k.guru_ashar, k.guru_maghrib
               FROM kelas k
               JOIN marhalah m ON m.id = k.marhalah_id
               WHERE (?1 IS NULL OR k.marhalah_id = ?1)
               ORDER BY m.urutan, k.nama";
    let mut stmt = conn.prepare(sql).map_err(HandlerErr::db_query)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map([&marhalah_filter], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "nama": r.get::<_, String>(1)?,
                "tahunAjaran": r.get::<_, String>(2)?,
                "marhalahId": r.get::<_, String>(3)?,
                "marhalahNama": r.get::<_, String>(4)?,
                "guruShubuh": r.get::<_, Option<String>>(5)?,
                "guruAshar": r.get::<_, Option<String>>(6)?,
                "guruMaghrib": r.get::<_, Option<String>>(7)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "kelas": rows }))
}

fn kelas_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let marhalah_id = required_str(params, "marhalahId")?;
    let nama = required_str(params, "nama")?;
    let tahun_ajaran = required_str(params, "tahunAjaran")?;
    if nama.trim().is_empty() {
        return Err(HandlerErr::bad_params("nama must not be empty"));
    }
    if !row_exists(conn, "marhalah", &marhalah_id)? {
        return Err(HandlerErr::not_found("marhalah not found"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO kelas(id, marhalah_id, nama, tahun_ajaran) VALUES(?, ?, ?, ?)",
        (&id, &marhalah_id, nama.trim(), tahun_ajaran.trim()),
    )
    .map_err(|e| HandlerErr::db_update(e, "kelas"))?;
    Ok(json!({ "kelasId": id }))
}

fn kelas_set_teachers(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = required_str(params, "kelasId")?;
    if !row_exists(conn, "kelas", &kelas_id)? {
        return Err(HandlerErr::not_found("kelas not found"));
    }
    let guru_shubuh = optional_str(params, "guruShubuh");
    let guru_ashar = optional_str(params, "guruAshar");
    let guru_maghrib = optional_str(params, "guruMaghrib");
    for guru_id in [&guru_shubuh, &guru_ashar, &guru_maghrib].into_iter().flatten() {
        if !row_exists(conn, "guru", guru_id)? {
            return Err(HandlerErr::not_found(format!("guru {} not found", guru_id)));
        }
    }
    conn.execute(
        "UPDATE kelas SET guru_shubuh = ?, guru_ashar = ?, guru_maghrib = ? WHERE id = ?",
        (&guru_shubuh, &guru_ashar, &guru_maghrib, &kelas_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "kelas"))?;
    Ok(json!({ "ok": true }))
}

fn mapel_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let marhalah_id = required_str(params, "marhalahId")?;
    let mut stmt = conn
        .prepare("SELECT id, nama, urutan FROM mapel WHERE marhalah_id = ? ORDER BY urutan")
        .map_err(HandlerErr::db_query)?;
    let rows: Vec<serde_json::Value> = stmt
        .query_map([&marhalah_id], |r| {
            Ok(json!({
                "id": r.get::<_, String>(0)?,
                "nama": r.get::<_, String>(1)?,
                "urutan": r.get::<_, i64>(2)?,
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    Ok(json!({ "mapel": rows }))
}

fn mapel_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let marhalah_id = required_str(params, "marhalahId")?;
    let nama = required_str(params, "nama")?;
    let urutan = required_i64(params, "urutan")?;
    if nama.trim().is_empty() {
        return Err(HandlerErr::bad_params("nama must not be empty"));
    }
    if !row_exists(conn, "marhalah", &marhalah_id)? {
        return Err(HandlerErr::not_found("marhalah not found"));
    }
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO mapel(id, marhalah_id, nama, urutan) VALUES(?, ?, ?, ?)",
        (&id, &marhalah_id, nama.trim(), urutan),
    )
    .map_err(|e| HandlerErr::db_update(e, "mapel"))?;
    Ok(json!({ "mapelId": id }))
}

fn dispatch(
    conn: &Connection,
    method: &str,
    params: &serde_json::Value,
) -> Option<Result<serde_json::Value, HandlerErr>> {
    match method {
        "marhalah.list" => Some(marhalah_list(conn)),
        "marhalah.create" => Some(marhalah_create(conn, params)),
        "guru.list" => Some(guru_list(conn)),
        "guru.create" => Some(guru_create(conn, params)),
        "kelas.list" => Some(kelas_list(conn, params)),
        "kelas.create" => Some(kelas_create(conn, params)),
        "kelas.setTeachers" => Some(kelas_set_teachers(conn, params)),
        "mapel.list" => Some(mapel_list(conn, params)),
        "mapel.create" => Some(mapel_create(conn, params)),
        _ => None,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let prefixes = ["marhalah.", "guru.", "kelas.", "mapel."];
    if !prefixes.iter().any(|p| req.method.starts_with(p)) {
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
