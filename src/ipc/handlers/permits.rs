use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{
    actor, optional_str, parse_datetime, required_datetime, required_str, row_exists, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::rollup::{permit_is_overdue, plan_permit_verdict, PermitRow, PermitVerdict};
use chrono::{Local, NaiveDateTime};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

const PERMIT_KINDS: [&str; 2] = ["PULANG", "KELUAR"];

fn create(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let santri_id = required_str(params, "santriId")?;
    let jenis = required_str(params, "jenis")?.to_ascii_uppercase();
    if !PERMIT_KINDS.contains(&jenis.as_str()) {
        return Err(HandlerErr::bad_params("jenis must be PULANG or KELUAR"));
    }
    let rencana_pergi = required_datetime(params, "rencanaPergi")?;
    let rencana_kembali = required_datetime(params, "rencanaKembali")?;
    if rencana_kembali <= rencana_pergi {
        return Err(HandlerErr::bad_params(
            "rencanaKembali must be after rencanaPergi",
        ));
    }
    if !row_exists(conn, "santri", &santri_id)? {
        return Err(HandlerErr::not_found("santri not found"));
    }

    // Business rule: one open permit per santri at a time.
    let open_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM perizinan WHERE santri_id = ? AND status = 'AKTIF'",
            [&santri_id],
            |r| r.get(0),
        )
        .map_err(HandlerErr::db_query)?;
    if open_count > 0 {
        return Err(HandlerErr {
            code: "permit_already_active",
            message: "santri masih memiliki izin aktif".to_string(),
            details: None,
        });
    }

    let id = Uuid::new_v4().to_string();
    let dicatat_oleh = actor(params);
    conn.execute(
        "INSERT INTO perizinan(id, santri_id, jenis, rencana_pergi, rencana_kembali, status, dicatat_oleh)
         VALUES(?, ?, ?, ?, ?, 'AKTIF', ?)",
        (
            &id,
            &santri_id,
            &jenis,
            rencana_pergi.to_string(),
            rencana_kembali.to_string(),
            &dicatat_oleh,
        ),
    )
    .map_err(|e| HandlerErr::db_update(e, "perizinan"))?;
    Ok(json!({ "permitId": id }))
}

fn mark_return(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let permit_id = required_str(params, "permitId")?;
    let kembali_nyata = required_datetime(params, "kembaliNyata")?;

    let row: Option<(String, String)> = conn
        .query_row(
            "SELECT status, rencana_kembali FROM perizinan WHERE id = ?",
            [&permit_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(HandlerErr::db_query)?;
    let Some((status, rencana_kembali_raw)) = row else {
        return Err(HandlerErr::not_found("permit not found"));
    };
    if status != "AKTIF" {
        return Err(HandlerErr {
            code: "permit_closed",
            message: "permit is already closed".to_string(),
            details: None,
        });
    }
    let rencana_kembali = parse_datetime(&rencana_kembali_raw)
        .ok_or_else(|| HandlerErr::db_query("stored rencana_kembali is not a datetime"))?;

    // On-time returns close immediately. A late return keeps the permit
    // AKTIF with the actual return recorded: that is the pending-hearing
    // state, not an open permit.
    let late = kembali_nyata > rencana_kembali;
    let new_status = if late { "AKTIF" } else { "KEMBALI" };
    conn.execute(
        "UPDATE perizinan SET kembali_nyata = ?, status = ? WHERE id = ?",
        (kembali_nyata.to_string(), new_status, &permit_id),
    )
    .map_err(|e| HandlerErr::db_update(e, "perizinan"))?;
    Ok(json!({ "late": late, "status": new_status }))
}

fn load_open_permits(
    conn: &Connection,
    permit_filter: Option<&str>,
) -> Result<Vec<(PermitRow, Option<String>, String, String)>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT p.id, p.santri_id, s.nama, s.asrama, p.jenis,
                    p.rencana_pergi, p.rencana_kembali, p.kembali_nyata
             FROM perizinan p
             JOIN santri s ON s.id = p.santri_id
             WHERE p.status = 'AKTIF'
               AND (?1 IS NULL OR p.id = ?1)
             ORDER BY s.nama",
        )
        .map_err(HandlerErr::db_query)?;
    let raw = stmt
        .query_map([&permit_filter], |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, String>(6)?,
                r.get::<_, Option<String>>(7)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut out = Vec::with_capacity(raw.len());
    for (id, santri_id, nama, asrama, jenis, pergi, kembali, nyata) in raw {
        let Some(rencana_kembali) = parse_datetime(&kembali) else {
            continue;
        };
        let kembali_nyata = nyata.as_deref().and_then(parse_datetime);
        out.push((
            PermitRow {
                id,
                santri_id,
                santri_nama: nama,
                jenis,
                rencana_kembali,
                kembali_nyata,
            },
            asrama,
            pergi,
            kembali,
        ));
    }
    Ok(out)
}

fn effective_now(params: &serde_json::Value) -> Result<NaiveDateTime, HandlerErr> {
    match optional_str(params, "now") {
        Some(raw) => parse_datetime(&raw)
            .ok_or_else(|| HandlerErr::bad_params("now must be YYYY-MM-DD HH:MM(:SS)")),
        None => Ok(Local::now().naive_local()),
    }
}

fn overdue_queue(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let now = effective_now(params)?;
    let permits = load_open_permits(conn, None)?;
    let entries: Vec<serde_json::Value> = permits
        .iter()
        .filter(|(p, _, _, _)| permit_is_overdue(p.rencana_kembali, p.kembali_nyata, now))
        .map(|(p, asrama, pergi, kembali)| {
            json!({
                "permitId": p.id,
                "santriId": p.santri_id,
                "santriNama": p.santri_nama,
                "asrama": asrama,
                "jenis": p.jenis,
                "rencanaPergi": pergi,
                "rencanaKembali": kembali,
                "kembaliNyata": p.kembali_nyata.map(|t| t.to_string()),
                "sudahKembali": p.kembali_nyata.is_some(),
            })
        })
        .collect();
    Ok(json!({ "entries": entries }))
}

fn decide(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let permit_id = required_str(params, "permitId")?;
    let verdict_raw = required_str(params, "verdict")?;
    let verdict = PermitVerdict::parse(&verdict_raw).ok_or_else(|| {
        HandlerErr::bad_params("verdict must be one of: TELAT_MURNI, SAKIT_UZUR, IZIN_UZUR, MANGKIR")
    })?;
    let now = effective_now(params)?;
    let dicatat_oleh = actor(params);

    let mut permits = load_open_permits(conn, Some(&permit_id))?;
    let Some((permit, _, _, _)) = permits.pop() else {
        return Err(HandlerErr::not_found("open permit not found"));
    };
    if !permit_is_overdue(permit.rencana_kembali, permit.kembali_nyata, now) {
        return Err(HandlerErr::bad_params("permit is not overdue"));
    }

    let plan = plan_permit_verdict(verdict, &permit);

    if plan.close {
        conn.execute(
            "UPDATE perizinan SET status = 'KEMBALI' WHERE id = ?",
            [&permit.id],
        )
        .map_err(|e| HandlerErr::db_update(e, "perizinan"))?;
    }

    let mut violation_id: Option<String> = None;
    if let Some(draft) = &plan.violation {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO pelanggaran(id, santri_id, kategori, keterangan, poin, dicatat_pada, dicatat_oleh)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &permit.santri_id,
                &draft.kategori,
                &draft.keterangan,
                draft.poin,
                now.to_string(),
                &dicatat_oleh,
            ),
        )
        .map_err(|e| HandlerErr::db_update(e, "pelanggaran"))?;
        violation_id = Some(id);
    }

    Ok(json!({
        "verdict": verdict_raw.to_ascii_uppercase(),
        "closed": plan.close,
        "violationId": violation_id,
    }))
}

fn dispatch(
    conn: &Connection,
    method: &str,
    params: &serde_json::Value,
) -> Option<Result<serde_json::Value, HandlerErr>> {
    match method {
        "permits.create" => Some(create(conn, params)),
        "permits.markReturn" => Some(mark_return(conn, params)),
        "permits.overdueQueue" => Some(overdue_queue(conn, params)),
        "permits.decide" => Some(decide(conn, params)),
        _ => None,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("permits.") {
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
