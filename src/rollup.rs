use crate::codes::{AttendanceCode, Session, Verification};
use crate::period::WeekWindow;
use chrono::{NaiveDate, NaiveDateTime};
use serde::Serialize;
use std::collections::HashMap;

/// One sparse attendance row carrying at least one absence, joined with the
/// santri identity it belongs to.
#[derive(Debug, Clone)]
pub struct AbsenceRow {
    pub record_id: String,
    pub santri_id: String,
    pub santri_nama: String,
    pub asrama: Option<String>,
    pub tanggal: NaiveDate,
    pub codes: [AttendanceCode; 3],
    pub verifs: [Option<Verification>; 3],
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
pub struct SummonsEntry {
    pub santri_id: String,
    pub santri_nama: String,
    pub shubuh: i64,
    pub ashar: i64,
    pub maghrib: i64,
    pub total: i64,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SummonsGroup {
    pub asrama: String,
    pub entries: Vec<SummonsEntry>,
}

/// Weekly printing rollup. A session counts toward the tally when it is an
/// unadjudicated absence that either falls inside the target window or was
/// carried over from an earlier week with its flag still BELUM. Output is
/// grouped by dormitory and alphabetized for the printed summons.
pub fn weekly_summons(rows: &[AbsenceRow], window: &WeekWindow) -> Vec<SummonsGroup> {
    let mut per_santri: HashMap<String, (String, Option<String>, [i64; 3])> = HashMap::new();

    for row in rows {
        for session in Session::ALL {
            let i = idx(session);
            if row.codes[i] != AttendanceCode::Alfa {
                continue;
            }
            if row.verifs[i] == Some(Verification::Ok) {
                continue;
            }
            let carried_over = row.verifs[i] == Some(Verification::Belum);
            if !window.contains(row.tanggal) && !carried_over {
                continue;
            }
            let entry = per_santri
                .entry(row.santri_id.clone())
                .or_insert_with(|| (row.santri_nama.clone(), row.asrama.clone(), [0; 3]));
            entry.2[i] += 1;
        }
    }

    let mut by_asrama: HashMap<String, Vec<SummonsEntry>> = HashMap::new();
    for (santri_id, (nama, asrama, counts)) in per_santri {
        by_asrama
            .entry(asrama.unwrap_or_else(|| "-".to_string()))
            .or_default()
            .push(SummonsEntry {
                santri_id,
                santri_nama: nama,
                shubuh: counts[0],
                ashar: counts[1],
                maghrib: counts[2],
                total: counts[0] + counts[1] + counts[2],
            });
    }

    let mut groups: Vec<SummonsGroup> = by_asrama
        .into_iter()
        .map(|(asrama, mut entries)| {
            entries.sort_by(|a, b| a.santri_nama.cmp(&b.santri_nama));
            SummonsGroup { asrama, entries }
        })
        .collect();
    groups.sort_by(|a, b| a.asrama.cmp(&b.asrama));
    groups
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueSessionRef {
    pub record_id: String,
    pub tanggal: NaiveDate,
    pub session: Session,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueEntry {
    pub santri_id: String,
    pub santri_nama: String,
    pub asrama: Option<String>,
    pub sessions: Vec<QueueSessionRef>,
    pub has_belum: bool,
}

/// Hearing backlog: every absence session not yet adjudicated, grouped by
/// santri. Unlike the printing rollup this takes no window; the backlog
/// accumulates until each session is marked OK or recoded.
pub fn adjudication_queue(rows: &[AbsenceRow]) -> Vec<QueueEntry> {
    let mut per_santri: HashMap<String, QueueEntry> = HashMap::new();

    for row in rows {
        for session in Session::ALL {
            let i = idx(session);
            if row.codes[i] != AttendanceCode::Alfa {
                continue;
            }
            if row.verifs[i] == Some(Verification::Ok) {
                continue;
            }
            let entry = per_santri
                .entry(row.santri_id.clone())
                .or_insert_with(|| QueueEntry {
                    santri_id: row.santri_id.clone(),
                    santri_nama: row.santri_nama.clone(),
                    asrama: row.asrama.clone(),
                    sessions: Vec::new(),
                    has_belum: false,
                });
            entry.sessions.push(QueueSessionRef {
                record_id: row.record_id.clone(),
                tanggal: row.tanggal,
                session,
            });
            if row.verifs[i] == Some(Verification::Belum) {
                entry.has_belum = true;
            }
        }
    }

    let mut entries: Vec<QueueEntry> = per_santri.into_values().collect();
    for entry in &mut entries {
        entry
            .sessions
            .sort_by(|a, b| (a.tanggal, a.session).cmp(&(b.tanggal, b.session)));
    }
    entries.sort_by(|a, b| a.santri_nama.cmp(&b.santri_nama));
    entries
}

/// One verdict covers every queued session of a santri at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HearingVerdict {
    AlfaMurni,
    Sakit,
    Izin,
    Kesalahan,
    Belum,
    Mangkir,
}

impl HearingVerdict {
    pub fn parse(s: &str) -> Option<HearingVerdict> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALFA_MURNI" => Some(HearingVerdict::AlfaMurni),
            "SAKIT" => Some(HearingVerdict::Sakit),
            "IZIN" => Some(HearingVerdict::Izin),
            "KESALAHAN" => Some(HearingVerdict::Kesalahan),
            "BELUM" => Some(HearingVerdict::Belum),
            "MANGKIR" => Some(HearingVerdict::Mangkir),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifChange {
    Clear,
    Set(Verification),
}

#[derive(Debug, Clone)]
pub struct SessionUpdate {
    pub record_id: String,
    pub session: Session,
    /// None keeps the stored code untouched.
    pub code: Option<AttendanceCode>,
    pub verif: VerifChange,
}

#[derive(Debug, Clone)]
pub struct ViolationDraft {
    pub kategori: String,
    pub keterangan: String,
    pub poin: i64,
}

#[derive(Debug, Clone, Default)]
pub struct VerdictPlan {
    pub session_updates: Vec<SessionUpdate>,
    pub violation: Option<ViolationDraft>,
}

pub const ALFA_POIN_PER_SESI: i64 = 10;

/// Translate one hearing verdict into the mutations it implies. MANGKIR is a
/// deliberate no-op: the santri resurfaces in the next cycle's queue.
pub fn plan_hearing_verdict(
    verdict: HearingVerdict,
    sessions: &[QueueSessionRef],
) -> VerdictPlan {
    let mut sorted = sessions.to_vec();
    sorted.sort_by(|a, b| (a.tanggal, a.session).cmp(&(b.tanggal, b.session)));

    let mut plan = VerdictPlan::default();
    match verdict {
        HearingVerdict::AlfaMurni => {
            for s in &sorted {
                plan.session_updates.push(SessionUpdate {
                    record_id: s.record_id.clone(),
                    session: s.session,
                    code: None,
                    verif: VerifChange::Set(Verification::Ok),
                });
            }
            let detail = sorted
                .iter()
                .map(|s| format!("{} {}", s.tanggal, s.session.key()))
                .collect::<Vec<_>>()
                .join(", ");
            plan.violation = Some(ViolationDraft {
                kategori: "ALFA".to_string(),
                keterangan: format!("Alfa murni {} sesi: {}", sorted.len(), detail),
                poin: ALFA_POIN_PER_SESI * sorted.len() as i64,
            });
        }
        HearingVerdict::Sakit | HearingVerdict::Izin => {
            let code = if verdict == HearingVerdict::Sakit {
                AttendanceCode::Sakit
            } else {
                AttendanceCode::Izin
            };
            for s in &sorted {
                plan.session_updates.push(SessionUpdate {
                    record_id: s.record_id.clone(),
                    session: s.session,
                    code: Some(code),
                    verif: VerifChange::Clear,
                });
            }
        }
        HearingVerdict::Kesalahan => {
            for s in &sorted {
                plan.session_updates.push(SessionUpdate {
                    record_id: s.record_id.clone(),
                    session: s.session,
                    code: Some(AttendanceCode::Hadir),
                    verif: VerifChange::Clear,
                });
            }
        }
        HearingVerdict::Belum => {
            for s in &sorted {
                plan.session_updates.push(SessionUpdate {
                    record_id: s.record_id.clone(),
                    session: s.session,
                    code: None,
                    verif: VerifChange::Set(Verification::Belum),
                });
            }
        }
        HearingVerdict::Mangkir => {}
    }
    plan
}

#[derive(Debug, Clone)]
pub struct PermitRow {
    pub id: String,
    pub santri_id: String,
    pub santri_nama: String,
    pub jenis: String,
    pub rencana_kembali: NaiveDateTime,
    pub kembali_nyata: Option<NaiveDateTime>,
}

/// Overdue: never came back and the planned return has passed, or came back
/// after it.
pub fn permit_is_overdue(
    rencana_kembali: NaiveDateTime,
    kembali_nyata: Option<NaiveDateTime>,
    now: NaiveDateTime,
) -> bool {
    match kembali_nyata {
        None => now > rencana_kembali,
        Some(actual) => actual > rencana_kembali,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermitVerdict {
    TelatMurni,
    SakitUzur,
    IzinUzur,
    Mangkir,
}

impl PermitVerdict {
    pub fn parse(s: &str) -> Option<PermitVerdict> {
        match s.trim().to_ascii_uppercase().as_str() {
            "TELAT_MURNI" => Some(PermitVerdict::TelatMurni),
            "SAKIT_UZUR" => Some(PermitVerdict::SakitUzur),
            "IZIN_UZUR" => Some(PermitVerdict::IzinUzur),
            "MANGKIR" => Some(PermitVerdict::Mangkir),
            _ => None,
        }
    }
}

pub const TELAT_POIN: i64 = 25;

#[derive(Debug, Clone, Default)]
pub struct PermitPlan {
    pub close: bool,
    pub violation: Option<ViolationDraft>,
}

/// Overdue-permit mirror of the hearing verdicts: a confirmed late return
/// carries a fixed penalty, an excused one just closes the permit, and a
/// hearing no-show leaves the permit AKTIF to resurface next cycle.
pub fn plan_permit_verdict(verdict: PermitVerdict, permit: &PermitRow) -> PermitPlan {
    match verdict {
        PermitVerdict::TelatMurni => PermitPlan {
            close: true,
            violation: Some(ViolationDraft {
                kategori: "TELAT".to_string(),
                keterangan: format!(
                    "Telat kembali izin {} (rencana kembali {})",
                    permit.jenis.to_ascii_lowercase(),
                    permit.rencana_kembali
                ),
                poin: TELAT_POIN,
            }),
        },
        PermitVerdict::SakitUzur | PermitVerdict::IzinUzur => PermitPlan {
            close: true,
            violation: None,
        },
        PermitVerdict::Mangkir => PermitPlan::default(),
    }
}
