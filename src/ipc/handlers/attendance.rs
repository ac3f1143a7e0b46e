use crate::codes::{AttendanceCode, Session, TeacherAttendanceCode, Verification};
use crate::grid::{
    build_dense_grid, collapse_teacher_rows, is_holiday, reconcile_day, reconcile_teacher_day,
    DayPersist,
};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::{actor, optional_str, required_date, required_str, row_exists, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::period::week_of;
use chrono::{Datelike, NaiveDate};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use std::collections::HashMap;
use uuid::Uuid;

fn parse_day_codes(entry: &serde_json::Value) -> Result<[AttendanceCode; 3], HandlerErr> {
    let mut codes = [AttendanceCode::Hadir; 3];
    for (i, session) in Session::ALL.iter().enumerate() {
        let raw = entry
            .get(session.key())
            .and_then(|v| v.as_str())
            .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", session.key())))?;
        codes[i] = AttendanceCode::parse(raw).ok_or_else(|| {
            HandlerErr::bad_params(format!("{} must be one of: H, S, I, A", session.key()))
        })?;
    }
    Ok(codes)
}

fn week_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let kelas_id = required_str(params, "kelasId")?;
    let date = required_date(params, "date")?;
    if !row_exists(conn, "kelas", &kelas_id)? {
        return Err(HandlerErr::not_found("kelas not found"));
    }
    let window = week_of(date);

    let mut roster_stmt = conn
        .prepare(
            "SELECT r.id, s.nama
             FROM riwayat_pendidikan r
             JOIN santri s ON s.id = r.santri_id
             WHERE r.kelas_id = ? AND r.status = 'AKTIF'
             ORDER BY s.nama",
        )
        .map_err(HandlerErr::db_query)?;
    let roster: Vec<(String, String)> = roster_stmt
        .query_map([&kelas_id], |r| Ok((r.get(0)?, r.get(1)?)))
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut stored: HashMap<(String, NaiveDate), [String; 3]> = HashMap::new();
    let mut stored_stmt = conn
        .prepare(
            "SELECT a.riwayat_id, a.tanggal, a.shubuh, a.ashar, a.maghrib
             FROM absensi_harian a
             JOIN riwayat_pendidikan r ON r.id = a.riwayat_id
             WHERE r.kelas_id = ? AND a.tanggal BETWEEN ? AND ?",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stored_stmt
        .query_map(
            (
                &kelas_id,
                window.start.to_string(),
                window.end.to_string(),
            ),
            |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    [
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                    ],
                ))
            },
        )
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    for (riwayat_id, tanggal, codes) in rows {
        let Some(tanggal) = crate::ipc::helpers::parse_date(&tanggal) else {
            continue;
        };
        stored.insert((riwayat_id, tanggal), codes);
    }

    let grid = build_dense_grid(&roster, &window, &stored);
    Ok(json!({
        "window": window,
        "rows": grid,
    }))
}

fn save_week(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let entries = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing entries"))?;
    if entries.is_empty() {
        return Err(HandlerErr::bad_params("entries must not be empty"));
    }
    let dicatat_oleh = actor(params);

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let mut upserted = 0_i64;
    let mut deleted = 0_i64;
    for entry in entries {
        let riwayat_id = required_str(entry, "riwayatId")?;
        let tanggal = required_date(entry, "tanggal")?;
        if !row_exists(&tx, "riwayat_pendidikan", &riwayat_id)? {
            return Err(HandlerErr::not_found(format!(
                "riwayat {} not found",
                riwayat_id
            )));
        }
        let mut codes = parse_day_codes(entry)?;
        // Holiday sessions are non-applicable: whatever the client staged
        // there collapses back to the default.
        for (i, session) in Session::ALL.iter().enumerate() {
            if is_holiday(tanggal.weekday(), *session) {
                codes[i] = AttendanceCode::Hadir;
            }
        }

        let existing: Option<[Option<String>; 3]> = tx
            .query_row(
                "SELECT verif_shubuh, verif_ashar, verif_maghrib
                 FROM absensi_harian
                 WHERE riwayat_id = ? AND tanggal = ?",
                (&riwayat_id, tanggal.to_string()),
                |r| Ok([r.get(0)?, r.get(1)?, r.get(2)?]),
            )
            .optional()
            .map_err(HandlerErr::db_query)?;
        let mut existing_verifs = [None, None, None];
        if let Some(raw) = existing {
            for i in 0..3 {
                existing_verifs[i] = raw[i].as_deref().and_then(Verification::parse);
            }
        }

        match reconcile_day(codes, existing_verifs) {
            DayPersist::Delete => {
                let n = tx
                    .execute(
                        "DELETE FROM absensi_harian WHERE riwayat_id = ? AND tanggal = ?",
                        (&riwayat_id, tanggal.to_string()),
                    )
                    .map_err(|e| HandlerErr::db_update(e, "absensi_harian"))?;
                deleted += n as i64;
            }
            DayPersist::Upsert { codes, verifs } => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO absensi_harian(
                        id, riwayat_id, tanggal,
                        shubuh, ashar, maghrib,
                        verif_shubuh, verif_ashar, verif_maghrib,
                        dicatat_oleh)
                     VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(riwayat_id, tanggal) DO UPDATE SET
                       shubuh = excluded.shubuh,
                       ashar = excluded.ashar,
                       maghrib = excluded.maghrib,
                       verif_shubuh = excluded.verif_shubuh,
                       verif_ashar = excluded.verif_ashar,
                       verif_maghrib = excluded.verif_maghrib,
                       dicatat_oleh = excluded.dicatat_oleh",
                    (
                        &id,
                        &riwayat_id,
                        tanggal.to_string(),
                        codes[0].code(),
                        codes[1].code(),
                        codes[2].code(),
                        verifs[0].map(Verification::code),
                        verifs[1].map(Verification::code),
                        verifs[2].map(Verification::code),
                        &dicatat_oleh,
                    ),
                )
                .map_err(|e| HandlerErr::db_update(e, "absensi_harian"))?;
                upserted += 1;
            }
        }
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "upserted": upserted, "deleted": deleted }))
}

fn teacher_week_open(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let date = required_date(params, "date")?;
    let marhalah_filter = optional_str(params, "marhalahId");
    let window = week_of(date);

    let mut kelas_stmt = conn
        .prepare(
            "SELECT k.id, k.nama, m.nama,
                    gs.id, gs.nama, ga.id, ga.nama, gm.id, gm.nama
             FROM kelas k
             JOIN marhalah m ON m.id = k.marhalah_id
             LEFT JOIN guru gs ON gs.id = k.guru_shubuh
             LEFT JOIN guru ga ON ga.id = k.guru_ashar
             LEFT JOIN guru gm ON gm.id = k.guru_maghrib
             WHERE (?1 IS NULL OR k.marhalah_id = ?1)
             ORDER BY m.urutan, k.nama",
        )
        .map_err(HandlerErr::db_query)?;
    type KelasRow = (String, String, String, [Option<(String, String)>; 3]);
    let kelas_rows: Vec<KelasRow> = kelas_stmt
        .query_map([&marhalah_filter], |r| {
            let pick = |id_col: usize, nama_col: usize, r: &rusqlite::Row<'_>| {
                let id: Option<String> = r.get(id_col)?;
                let nama: Option<String> = r.get(nama_col)?;
                Ok::<_, rusqlite::Error>(id.zip(nama))
            };
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                [pick(3, 4, r)?, pick(5, 6, r)?, pick(7, 8, r)?],
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;

    let mut stored: HashMap<(String, NaiveDate), [String; 3]> = HashMap::new();
    let mut stored_stmt = conn
        .prepare(
            "SELECT kelas_id, tanggal, shubuh, ashar, maghrib
             FROM absensi_guru
             WHERE tanggal BETWEEN ? AND ?",
        )
        .map_err(HandlerErr::db_query)?;
    let rows = stored_stmt
        .query_map((window.start.to_string(), window.end.to_string()), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                [
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                ],
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::db_query)?;
    for (kelas_id, tanggal, codes) in rows {
        let Some(tanggal) = crate::ipc::helpers::parse_date(&tanggal) else {
            continue;
        };
        stored.insert((kelas_id, tanggal), codes);
    }

    let mut out_rows: Vec<serde_json::Value> = Vec::new();
    for (kelas_id, kelas_nama, marhalah_nama, assignments) in kelas_rows {
        for spec in collapse_teacher_rows(assignments) {
            let days: Vec<serde_json::Value> = window
                .days()
                .map(|tanggal| {
                    let codes = stored.get(&(kelas_id.clone(), tanggal));
                    let cells: Vec<serde_json::Value> = Session::ALL
                        .iter()
                        .enumerate()
                        .map(|(i, &session)| {
                            let disabled = is_holiday(tanggal.weekday(), session)
                                || !spec.sessions.contains(&session);
                            json!({
                                "session": session,
                                "disabled": disabled,
                                "value": if disabled {
                                    None
                                } else {
                                    Some(codes.map(|c| c[i].clone()).unwrap_or_else(|| "H".to_string()))
                                },
                            })
                        })
                        .collect();
                    json!({ "tanggal": tanggal, "cells": cells })
                })
                .collect();
            out_rows.push(json!({
                "kelasId": kelas_id,
                "kelasNama": kelas_nama,
                "marhalahNama": marhalah_nama,
                "guruId": spec.guru_id,
                "guruNama": spec.guru_nama,
                "sessions": spec.sessions,
                "days": days,
            }));
        }
    }

    Ok(json!({ "window": window, "rows": out_rows }))
}

fn teacher_save_week(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let entries = params
        .get("entries")
        .and_then(|v| v.as_array())
        .ok_or_else(|| HandlerErr::bad_params("missing entries"))?;
    if entries.is_empty() {
        return Err(HandlerErr::bad_params("entries must not be empty"));
    }
    let dicatat_oleh = actor(params);

    let tx = conn.unchecked_transaction().map_err(|e| HandlerErr {
        code: "db_tx_failed",
        message: e.to_string(),
        details: None,
    })?;

    let mut upserted = 0_i64;
    let mut deleted = 0_i64;
    for entry in entries {
        let kelas_id = required_str(entry, "kelasId")?;
        let tanggal = required_date(entry, "tanggal")?;
        if !row_exists(&tx, "kelas", &kelas_id)? {
            return Err(HandlerErr::not_found(format!("kelas {} not found", kelas_id)));
        }
        let mut codes = [TeacherAttendanceCode::Hadir; 3];
        for (i, session) in Session::ALL.iter().enumerate() {
            let raw = entry
                .get(session.key())
                .and_then(|v| v.as_str())
                .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", session.key())))?;
            codes[i] = TeacherAttendanceCode::parse(raw).ok_or_else(|| {
                HandlerErr::bad_params(format!(
                    "{} must be one of: H, A, S, I, B, L",
                    session.key()
                ))
            })?;
            if is_holiday(tanggal.weekday(), *session) {
                codes[i] = TeacherAttendanceCode::Hadir;
            }
        }

        match reconcile_teacher_day(codes) {
            None => {
                let n = tx
                    .execute(
                        "DELETE FROM absensi_guru WHERE kelas_id = ? AND tanggal = ?",
                        (&kelas_id, tanggal.to_string()),
                    )
                    .map_err(|e| HandlerErr::db_update(e, "absensi_guru"))?;
                deleted += n as i64;
            }
            Some(codes) => {
                let id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO absensi_guru(id, kelas_id, tanggal, shubuh, ashar, maghrib, dicatat_oleh)
                     VALUES(?, ?, ?, ?, ?, ?, ?)
                     ON CONFLICT(kelas_id, tanggal) DO UPDATE SET
                       shubuh = excluded.shubuh,
                       ashar = excluded.ashar,
                       maghrib = excluded.maghrib,
                       dicatat_oleh = excluded.dicatat_oleh",
                    (
                        &id,
                        &kelas_id,
                        tanggal.to_string(),
                        codes[0].code(),
                        codes[1].code(),
                        codes[2].code(),
                        &dicatat_oleh,
                    ),
                )
                .map_err(|e| HandlerErr::db_update(e, "absensi_guru"))?;
                upserted += 1;
            }
        }
    }

    tx.commit().map_err(|e| HandlerErr {
        code: "db_commit_failed",
        message: e.to_string(),
        details: None,
    })?;
    Ok(json!({ "upserted": upserted, "deleted": deleted }))
}

fn dispatch(
    conn: &Connection,
    method: &str,
    params: &serde_json::Value,
) -> Option<Result<serde_json::Value, HandlerErr>> {
    match method {
        "attendance.weekOpen" => Some(week_open(conn, params)),
        "attendance.saveWeek" => Some(save_week(conn, params)),
        "teacherAttendance.weekOpen" => Some(teacher_week_open(conn, params)),
        "teacherAttendance.saveWeek" => Some(teacher_save_week(conn, params)),
        _ => None,
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    if !req.method.starts_with("attendance.") && !req.method.starts_with("teacherAttendance.") {
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
