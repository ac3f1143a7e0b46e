use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::HashMap;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize)]
pub struct RankError {
    pub code: String,
    pub message: String,
}

impl RankError {
    pub fn new(code: &str, message: impl Into<String>) -> Self {
        Self {
            code: code.to_string(),
            message: message.into(),
        }
    }
}

/// Qualitative band for a final average. Thresholds are fixed.
pub fn predikat_for_average(avg: f64) -> &'static str {
    if avg >= 86.0 {
        "Mumtaz"
    } else if avg >= 76.0 {
        "Jayyid Jiddan"
    } else if avg >= 66.0 {
        "Jayyid"
    } else if avg >= 56.0 {
        "Maqbul"
    } else {
        "Rasib"
    }
}

#[derive(Debug, Clone)]
pub struct StudentScores {
    pub riwayat_id: String,
    pub santri_id: String,
    pub nama: String,
    pub by_mapel: HashMap<String, f64>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ComputedRank {
    pub riwayat_id: String,
    pub santri_id: String,
    pub nama: String,
    pub jumlah: f64,
    pub rata_rata: f64,
    pub peringkat: i64,
    pub predikat: String,
}

/// Rank a class for one semester.
///
/// The average divides by the configured subject count, not by how many
/// scores were entered; a missing score is a zero. Ties on the average break
/// on the explicitly designated primary then secondary subject (descending;
/// a santri with no score on a tie-break subject contributes 0), then on
/// name and enrollment id so repeated runs order identically. Ranks are
/// dense positions 1..N; equal averages still get distinct ranks.
pub fn compute_rankings(
    students: &[StudentScores],
    subject_count: usize,
    primary_mapel: Option<&str>,
    secondary_mapel: Option<&str>,
) -> Vec<ComputedRank> {
    let mut scored: Vec<(&StudentScores, f64, f64, f64, f64)> = students
        .iter()
        .map(|s| {
            let jumlah: f64 = s.by_mapel.values().sum();
            let rata_rata = if subject_count > 0 {
                jumlah / subject_count as f64
            } else {
                0.0
            };
            let tb1 = primary_mapel
                .and_then(|m| s.by_mapel.get(m).copied())
                .unwrap_or(0.0);
            let tb2 = secondary_mapel
                .and_then(|m| s.by_mapel.get(m).copied())
                .unwrap_or(0.0);
            (s, jumlah, rata_rata, tb1, tb2)
        })
        .collect();

    scored.sort_by(|a, b| {
        b.2.partial_cmp(&a.2)
            .unwrap_or(Ordering::Equal)
            .then_with(|| b.3.partial_cmp(&a.3).unwrap_or(Ordering::Equal))
            .then_with(|| b.4.partial_cmp(&a.4).unwrap_or(Ordering::Equal))
            .then_with(|| a.0.nama.cmp(&b.0.nama))
            .then_with(|| a.0.riwayat_id.cmp(&b.0.riwayat_id))
    });

    scored
        .into_iter()
        .enumerate()
        .map(|(pos, (s, jumlah, rata_rata, _, _))| ComputedRank {
            riwayat_id: s.riwayat_id.clone(),
            santri_id: s.santri_id.clone(),
            nama: s.nama.clone(),
            jumlah,
            rata_rata,
            peringkat: pos as i64 + 1,
            predikat: predikat_for_average(rata_rata).to_string(),
        })
        .collect()
}

fn load_class_students(
    conn: &Connection,
    kelas_id: &str,
    semester: i64,
) -> Result<(Vec<StudentScores>, usize), RankError> {
    let marhalah_id: Option<String> = conn
        .query_row(
            "SELECT marhalah_id FROM kelas WHERE id = ?",
            [kelas_id],
            |r| r.get(0),
        )
        .optional()
        .map_err(|e| RankError::new("db_query_failed", e.to_string()))?;
    let Some(marhalah_id) = marhalah_id else {
        return Err(RankError::new("not_found", "kelas not found"));
    };

    let subject_count: i64 = conn
        .query_row(
            "SELECT COUNT(*) FROM mapel WHERE marhalah_id = ?",
            [&marhalah_id],
            |r| r.get(0),
        )
        .map_err(|e| RankError::new("db_query_failed", e.to_string()))?;

    let mut stmt = conn
        .prepare(
            "SELECT r.id, s.id, s.nama
             FROM riwayat_pendidikan r
             JOIN santri s ON s.id = r.santri_id
             WHERE r.kelas_id = ? AND r.status = 'AKTIF'
             ORDER BY s.nama",
        )
        .map_err(|e| RankError::new("db_query_failed", e.to_string()))?;
    let mut students: Vec<StudentScores> = stmt
        .query_map([kelas_id], |r| {
            Ok(StudentScores {
                riwayat_id: r.get(0)?,
                santri_id: r.get(1)?,
                nama: r.get(2)?,
                by_mapel: HashMap::new(),
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| RankError::new("db_query_failed", e.to_string()))?;

    let mut by_riwayat: HashMap<String, usize> = HashMap::new();
    for (i, s) in students.iter().enumerate() {
        by_riwayat.insert(s.riwayat_id.clone(), i);
    }

    let mut score_stmt = conn
        .prepare(
            "SELECT n.riwayat_id, n.mapel_id, n.nilai
             FROM nilai_akademik n
             JOIN riwayat_pendidikan r ON r.id = n.riwayat_id
             WHERE r.kelas_id = ? AND n.semester = ?",
        )
        .map_err(|e| RankError::new("db_query_failed", e.to_string()))?;
    let rows = score_stmt
        .query_map((kelas_id, semester), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, f64>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| RankError::new("db_query_failed", e.to_string()))?;
    for (riwayat_id, mapel_id, nilai) in rows {
        if let Some(&i) = by_riwayat.get(&riwayat_id) {
            students[i].by_mapel.insert(mapel_id, nilai);
        }
    }

    Ok((students, subject_count as usize))
}

/// Recompute and persist the ranking cache for (kelas, semester). Full
/// overwrite per enrollment: the upsert replaces any prior computation.
pub fn recompute_class_semester(
    conn: &Connection,
    kelas_id: &str,
    semester: i64,
    primary_mapel: Option<&str>,
    secondary_mapel: Option<&str>,
) -> Result<Vec<ComputedRank>, RankError> {
    let (students, subject_count) = load_class_students(conn, kelas_id, semester)?;
    let ranks = compute_rankings(&students, subject_count, primary_mapel, secondary_mapel);

    for rank in &ranks {
        let id = Uuid::new_v4().to_string();
        conn.execute(
            "INSERT INTO ranking(id, riwayat_id, semester, jumlah, rata_rata, peringkat, predikat)
             VALUES(?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(riwayat_id, semester) DO UPDATE SET
               jumlah = excluded.jumlah,
               rata_rata = excluded.rata_rata,
               peringkat = excluded.peringkat,
               predikat = excluded.predikat",
            (
                &id,
                &rank.riwayat_id,
                semester,
                rank.jumlah,
                rank.rata_rata,
                rank.peringkat,
                &rank.predikat,
            ),
        )
        .map_err(|e| RankError::new("db_update_failed", e.to_string()))?;
    }

    Ok(ranks)
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegerSubject {
    pub mapel_id: String,
    pub nama: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegerRow {
    pub riwayat_id: String,
    pub santri_id: String,
    pub nama: String,
    pub nilai: Vec<Option<f64>>,
    pub jumlah: f64,
    pub rata_rata: f64,
    pub peringkat: Option<i64>,
    pub predikat: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LegerModel {
    pub kelas_id: String,
    pub kelas_nama: String,
    pub semester: i64,
    pub subjects: Vec<LegerSubject>,
    pub rows: Vec<LegerRow>,
}

/// Class-wide grade sheet: one row per enrolled santri, one column per
/// configured subject, with the cached ranking columns joined in when a
/// recompute has run.
pub fn build_leger(
    conn: &Connection,
    kelas_id: &str,
    semester: i64,
) -> Result<LegerModel, RankError> {
    let kelas_row: Option<(String, String)> = conn
        .query_row(
            "SELECT nama, marhalah_id FROM kelas WHERE id = ?",
            [kelas_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()
        .map_err(|e| RankError::new("db_query_failed", e.to_string()))?;
    let Some((kelas_nama, marhalah_id)) = kelas_row else {
        return Err(RankError::new("not_found", "kelas not found"));
    };

    let mut mapel_stmt = conn
        .prepare("SELECT id, nama FROM mapel WHERE marhalah_id = ? ORDER BY urutan")
        .map_err(|e| RankError::new("db_query_failed", e.to_string()))?;
    let subjects: Vec<LegerSubject> = mapel_stmt
        .query_map([&marhalah_id], |r| {
            Ok(LegerSubject {
                mapel_id: r.get(0)?,
                nama: r.get(1)?,
            })
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| RankError::new("db_query_failed", e.to_string()))?;

    let (students, subject_count) = load_class_students(conn, kelas_id, semester)?;

    let mut cached: HashMap<String, (i64, String)> = HashMap::new();
    let mut cache_stmt = conn
        .prepare(
            "SELECT rk.riwayat_id, rk.peringkat, rk.predikat
             FROM ranking rk
             JOIN riwayat_pendidikan r ON r.id = rk.riwayat_id
             WHERE r.kelas_id = ? AND rk.semester = ?",
        )
        .map_err(|e| RankError::new("db_query_failed", e.to_string()))?;
    let cache_rows = cache_stmt
        .query_map((kelas_id, semester), |r| {
            Ok((
                r.get::<_, String>(0)?,
                r.get::<_, i64>(1)?,
                r.get::<_, String>(2)?,
            ))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(|e| RankError::new("db_query_failed", e.to_string()))?;
    for (riwayat_id, peringkat, predikat) in cache_rows {
        cached.insert(riwayat_id, (peringkat, predikat));
    }

    let rows = students
        .iter()
        .map(|s| {
            let nilai: Vec<Option<f64>> = subjects
                .iter()
                .map(|m| s.by_mapel.get(&m.mapel_id).copied())
                .collect();
            let jumlah: f64 = s.by_mapel.values().sum();
            let rata_rata = if subject_count > 0 {
                jumlah / subject_count as f64
            } else {
                0.0
            };
            let (peringkat, predikat) = match cached.get(&s.riwayat_id) {
                Some((p, b)) => (Some(*p), Some(b.clone())),
                None => (None, None),
            };
            LegerRow {
                riwayat_id: s.riwayat_id.clone(),
                santri_id: s.santri_id.clone(),
                nama: s.nama.clone(),
                nilai,
                jumlah,
                rata_rata,
                peringkat,
                predikat,
            }
        })
        .collect();

    Ok(LegerModel {
        kelas_id: kelas_id.to_string(),
        kelas_nama,
        semester,
        subjects,
        rows,
    })
}

/// Pivot the leger into plain tabular rows (key → value maps) for the
/// spreadsheet collaborator. No file format is produced here.
pub fn leger_export_rows(model: &LegerModel) -> Vec<serde_json::Map<String, serde_json::Value>> {
    model
        .rows
        .iter()
        .map(|row| {
            let mut out = serde_json::Map::new();
            out.insert("Nama".to_string(), serde_json::json!(row.nama));
            for (i, subject) in model.subjects.iter().enumerate() {
                let value = row.nilai.get(i).copied().flatten();
                out.insert(subject.nama.clone(), serde_json::json!(value.unwrap_or(0.0)));
            }
            out.insert("Jumlah".to_string(), serde_json::json!(row.jumlah));
            out.insert("Rata-rata".to_string(), serde_json::json!(row.rata_rata));
            out.insert("Peringkat".to_string(), serde_json::json!(row.peringkat));
            out.insert("Predikat".to_string(), serde_json::json!(row.predikat));
            out
        })
        .collect()
}
