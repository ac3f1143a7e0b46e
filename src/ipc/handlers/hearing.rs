use crate::codes::{AttendanceCode, Session, Verification};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor, optional_str, required_date, required_str, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::period::week_of;
use crate::rollup::{
    adjudication_queue, plan_hearing_verdict, weekly_summons, AbsenceRow, HearingVerdict,
    VerifChange,
};
use chrono::Local;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

/// Load every sparse attendance row carrying at least one absence, joined
/// with its santri. Both rollup queries start from this same raw set and
/// apply their own eligibility predicates in memory.
fn load_absence_rows(
    conn: &Connection,
    santri_id: Option<&str>,
    asrama: Option<&str>,
) -> Result<Vec<AbsenceRow>, HandlerErr> {
    let mut stmt = conn
        .prepare(
            "SELECT a.id, s.id, s.nama, s.asrama, a.tanggal,
                    a.shubuh, a.ashar, a.maghrib,
                    a.verif_shubuh, a.verif_ashar, a.verif_maghrib
             FROM absensi_harian a
             JOIN riwayat_pendidikan r ON r.id = a.riwayat_id
             JOIN santri s ON s.id = r.santri_id
             WHERE (a.shubuh = 'A' OR a.ashar = 'A' OR a.maghrib = 'A')
               AND (?1 IS NULL OR s.id = ?1)
               AND (?2 IS NULL OR s.asrama = ?2)",
        )
        .map_err(HandlerErr::db_query)?;
    let raw = stmt
        .query_map((&santri_id, &asrama), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, Option<String>>(3)?,
                r.get::<_, String>(4)?,
                [
                    r.get::<_, String>(5)?,
                    r.get::<_, String>(6)?,
                    r.get::<_, String>(7)?,
                ],
                [
                    r.get::<_, Option<String>>(8)?,
                    r.get::<_, Option<String>>(9)?,
                    r.get::<_, Option<String>>(10)?,
                ],
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut rows = Vec::with_capacity(raw.len());
    for (record_id, santri_id, santri_nama, asrama, tanggal, codes, verifs) in raw {
        let Some(tanggal) = crate::ipc::helpers::parse_date(&tanggal) else {
            continue;
        };
        let mut parsed_codes = [AttendanceCode::Hadir; 3];
        let mut parsed_verifs = [None, None, None];
        for i in 0..3 {
            parsed_codes[i] = AttendanceCode::parse(&codes[i]).unwrap_or(AttendanceCode::Hadir);
            parsed_verifs[i] = verifs[i].as_deref().and_then(Verification::parse);
        }
        rows.push(AbsenceRow {
            record_id,
            santri_id,
            santri_nama,
            asrama,
            tanggal,
            codes: parsed_codes,
            verifs: parsed_verifs,
        });
    }
    Ok(rows)
}

fn summons(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let date = required_date(params, "date")?;
    let asrama = optional_str(params, "asrama");
    let window = week_of(date);
    let rows = load_absence_rows(conn, None, asrama.as_deref())?;
    let groups = weekly_summons(&rows, &window);
    Ok(json!({ "window": window, "groups": groups }))
}

fn queue(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let asrama = optional_str(params, "asrama");
    let rows = load_absence_rows(conn, None, asrama.as_deref())?;
    let entries = adjudication_queue(&rows);
    Ok(json!({ "entries": entries }))
}

fn session_columns(session: Session) -> (&'static str, &'static str) {
    match session {
        Session::Shubuh => ("shubuh", "verif_shubuh"),
        Session::Ashar => ("ashar", "verif_ashar"),
        Session::Maghrib => ("maghrib", "verif_maghrib"),
    }
}

fn decide(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let santri_id = required_str(params, "santriId")?;
    let verdict_raw = required_str(params, "verdict")?;
    let verdict = HearingVerdict::parse(&verdict_raw).ok_or_else(|| {
        HandlerErr::bad_params(
            "verdict must be one of: ALFA_MURNI, SAKIT, IZIN, KESALAHAN, BELUM, MANGKIR",
        )
    })?;
    let dicatat_oleh = actor(params);

    let santri_exists: Option<i64> = conn
        .query_row("SELECT 1 FROM santri WHERE id = ?", [&santri_id], |r| {
            r.get(0)
        })
        .optional()
        .map_err(HandlerErr::db_query)?;
    if santri_exists.is_none() {
        return Err(HandlerErr::not_found("santri not found"));
    }

    let rows = load_absence_rows(conn, Some(&santri_id), None)?;
    let entries = adjudication_queue(&rows);
    let Some(entry) = entries.into_iter().find(|e| e.santri_id == santri_id) else {
        return Err(HandlerErr {
            code: "nothing_queued",
            message: "no unadjudicated absence sessions for this santri".to_string(),
            details: None,
        });
    };

    let plan = plan_hearing_verdict(verdict, &entry.sessions);

    // Best-effort batch: one failed session update does not roll back its
    // siblings, it is collected and reported.
    let mut failures: Vec<serde_json::Value> = Vec::new();
    let mut updated = 0_i64;
    for update in &plan.session_updates {
        let (code_col, verif_col) = session_columns(update.session);
        let sql = format!(
            "UPDATE absensi_harian SET {code} = COALESCE(?, {code}), {verif} = ? WHERE id = ?",
            code = code_col,
            verif = verif_col
        );
        let code_param = update.code.map(AttendanceCode::code);
        let verif_param = match update.verif {
            VerifChange::Clear => None,
            VerifChange::Set(v) => Some(v.code()),
        };
        match conn.execute(&sql, (code_param, verif_param, &update.record_id)) {
            Ok(_) => updated += 1,
            Err(e) => failures.push(json!({
                "recordId": update.record_id,
                "session": update.session,
                "code": "db_update_failed",
                "message": e.to_string(),
            })),
        }
    }

    // Rewriting sessions to H can leave a row indistinguishable from the
    // default; such rows must not survive.
    if verdict == HearingVerdict::Kesalahan {
        for record_id in plan
            .session_updates
            .iter()
            .map(|u| u.record_id.as_str())
            .collect::<std::collections::BTreeSet<_>>()
        {
            let res = conn.execute(
                "DELETE FROM absensi_harian
                 WHERE id = ?
                   AND shubuh = 'H' AND ashar = 'H' AND maghrib = 'H'
                   AND verif_shubuh IS NULL AND verif_ashar IS NULL AND verif_maghrib IS NULL",
                [record_id],
            );
            if let Err(e) = res {
                failures.push(json!({
                    "recordId": record_id,
                    "code": "db_update_failed",
                    "message": e.to_string(),
                }));
            }
        }
    }

    // The aggregate violation goes in only after every session update for
    // this verdict has been dispatched.
    let mut violation_id: Option<String> = None;
    if let Some(draft) = &plan.violation {
        let id = Uuid::new_v4().to_string();
        let now = Local::now().naive_local().to_string();
        let res = conn.execute(
            "INSERT INTO pelanggaran(id, santri_id, kategori, keterangan, poin, dicatat_pada, dicatat_oleh)
             VALUES(?, ?, ?, ?, ?, ?, ?)",
            (
                &id,
                &santri_id,
                &draft.kategori,
                &draft.keterangan,
                draft.poin,
                &now,
                &dicatat_oleh,
            ),
        );
        match res {
            Ok(_) => violation_id = Some(id),
            Err(e) => failures.push(json!({
                "code": "db_insert_failed",
                "message": e.to_string(),
            })),
        }
    }

    Ok(json!({
        "verdict": verdict_raw.to_ascii_uppercase(),
        "sessionCount": entry.sessions.len(),
        "updatedSessions": updated,
        "violationId": violation_id,
        "failures": failures,
    }))
}

fn dispatch(
    conn: &Connection,
    method: &str,
    params: &serde_json::Value,
) -> Option<Result<serde_json::Value, HandlerErr>> {
    match method {
        "hearing.summons" => Some(summons(conn, params)),
        "hearing.queue" => Some(queue(conn, params)),
        "hearing.decide" => Some(decide(conn, params)),
        _ => None,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("hearing.") {
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
