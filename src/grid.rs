use crate::codes::{AttendanceCode, Session, TeacherAttendanceCode, Verification};
use crate::period::WeekWindow;
use chrono::{Datelike, NaiveDate, Weekday};
use serde::Serialize;
use std::collections::HashMap;

/// Fixed institutional holiday rule. Not configurable: Thursday and Tuesday
/// have no maghrib session, Friday has no shubuh or ashar session.
pub fn is_holiday(day: Weekday, session: Session) -> bool {
    matches!(
        (day, session),
        (Weekday::Thu, Session::Maghrib)
            | (Weekday::Tue, Session::Maghrib)
            | (Weekday::Fri, Session::Shubuh)
            | (Weekday::Fri, Session::Ashar)
    )
}

fn idx(session: Session) -> usize {
    match session {
        Session::Shubuh => 0,
        Session::Ashar => 1,
        Session::Maghrib => 2,
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CellModel {
    pub session: Session,
    pub disabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DayCells {
    pub tanggal: NaiveDate,
    pub cells: Vec<CellModel>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GridRow {
    pub entity_id: String,
    pub display_name: String,
    pub days: Vec<DayCells>,
}

/// Dense view: every roster entry gets all 7 days and all 3 sessions, with
/// holiday cells disabled and stored deviations overlaid. The stored map is
/// sparse; a missing (entity, date) key means all-present.
pub fn build_dense_grid(
    roster: &[(String, String)],
    window: &WeekWindow,
    stored: &HashMap<(String, NaiveDate), [String; 3]>,
) -> Vec<GridRow> {
    roster
        .iter()
        .map(|(entity_id, display_name)| {
            let days = window
                .days()
                .map(|tanggal| {
                    let codes = stored.get(&(entity_id.clone(), tanggal));
                    let cells = Session::ALL
                        .iter()
                        .map(|&session| {
                            let disabled = is_holiday(tanggal.weekday(), session);
                            // A missing sparse row means all-present.
                            let value = if disabled {
                                None
                            } else {
                                Some(
                                    codes
                                        .map(|c| c[idx(session)].clone())
                                        .unwrap_or_else(|| "H".to_string()),
                                )
                            };
                            CellModel {
                                session,
                                disabled,
                                value,
                            }
                        })
                        .collect();
                    DayCells { tanggal, cells }
                })
                .collect();
            GridRow {
                entity_id: entity_id.clone(),
                display_name: display_name.clone(),
                days,
            }
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TeacherRowSpec {
    pub guru_id: Option<String>,
    pub guru_nama: Option<String>,
    pub sessions: Vec<Session>,
}

/// Collapse a class's three per-session teacher assignments into grid rows.
///
/// A teacher covering several sessions yields one row listing all of them.
/// Row order follows session order: whoever covers shubuh comes first, then
/// ashar-only, then maghrib-only. A class with no assignment at all still
/// yields one placeholder row covering every session, so the class stays
/// visible and editable.
pub fn collapse_teacher_rows(
    assignments: [Option<(String, String)>; 3],
) -> Vec<TeacherRowSpec> {
    let mut rows: Vec<TeacherRowSpec> = Vec::new();
    for (i, session) in Session::ALL.iter().enumerate() {
        let Some((guru_id, guru_nama)) = assignments[i].as_ref() else {
            continue;
        };
        if let Some(row) = rows
            .iter_mut()
            .find(|r| r.guru_id.as_deref() == Some(guru_id.as_str()))
        {
            row.sessions.push(*session);
        } else {
            rows.push(TeacherRowSpec {
                guru_id: Some(guru_id.clone()),
                guru_nama: Some(guru_nama.clone()),
                sessions: vec![*session],
            });
        }
    }
    if rows.is_empty() {
        rows.push(TeacherRowSpec {
            guru_id: None,
            guru_nama: None,
            sessions: Session::ALL.to_vec(),
        });
    }
    rows
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DayPersist {
    /// The day reverted to full default (all present, nothing pending):
    /// the sparse row must not exist.
    Delete,
    Upsert {
        codes: [AttendanceCode; 3],
        verifs: [Option<Verification>; 3],
    },
}

/// Reconcile one edited day against the stored row's verification flags.
///
/// A session re-coded away from A has nothing left to adjudicate, so its
/// flag is cleared; a session still coded A keeps whatever flag it had.
pub fn reconcile_day(
    codes: [AttendanceCode; 3],
    existing_verifs: [Option<Verification>; 3],
) -> DayPersist {
    let mut verifs = [None, None, None];
    for i in 0..3 {
        if codes[i] == AttendanceCode::Alfa {
            verifs[i] = existing_verifs[i];
        }
    }
    let all_present = codes.iter().all(|c| *c == AttendanceCode::Hadir);
    if all_present && verifs.iter().all(|v| v.is_none()) {
        DayPersist::Delete
    } else {
        DayPersist::Upsert { codes, verifs }
    }
}

/// Teacher-attendance variant of the default-present rule. Returns None when
/// the row must be deleted.
pub fn reconcile_teacher_day(
    codes: [TeacherAttendanceCode; 3],
) -> Option<[TeacherAttendanceCode; 3]> {
    if codes.iter().all(|c| *c == TeacherAttendanceCode::Hadir) {
        None
    } else {
        Some(codes)
    }
}
