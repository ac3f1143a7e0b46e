use rusqlite::Connection;
use std::path::Path;

pub const DB_FILE_NAME: &str = "pesantren.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS marhalah(
            id TEXT PRIMARY KEY,
            nama TEXT NOT NULL,
            urutan INTEGER NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS guru(
            id TEXT PRIMARY KEY,
            nama TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS kelas(
            id TEXT PRIMARY KEY,
            marhalah_id TEXT NOT NULL,
            nama TEXT NOT NULL,
            tahun_ajaran TEXT NOT NULL,
            guru_shubuh TEXT,
            guru_ashar TEXT,
            guru_maghrib TEXT,
            FOREIGN KEY(marhalah_id) REFERENCES marhalah(id),
            FOREIGN KEY(guru_shubuh) REFERENCES guru(id),
            FOREIGN KEY(guru_ashar) REFERENCES guru(id),
            FOREIGN KEY(guru_maghrib) REFERENCES guru(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_kelas_marhalah ON kelas(marhalah_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS santri(
            id TEXT PRIMARY KEY,
            nama TEXT NOT NULL,
            asrama TEXT,
            kamar TEXT,
            sekolah_formal TEXT,
            status TEXT NOT NULL DEFAULT 'AKTIF'
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_santri_status ON santri(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS riwayat_pendidikan(
            id TEXT PRIMARY KEY,
            santri_id TEXT NOT NULL,
            kelas_id TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'AKTIF',
            FOREIGN KEY(santri_id) REFERENCES santri(id),
            FOREIGN KEY(kelas_id) REFERENCES kelas(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_riwayat_santri ON riwayat_pendidikan(santri_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_riwayat_kelas ON riwayat_pendidikan(kelas_id)",
        [],
    )?;

    // Sparse by design: a fully-present day has no row.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS absensi_harian(
            id TEXT PRIMARY KEY,
            riwayat_id TEXT NOT NULL,
            tanggal TEXT NOT NULL,
            shubuh TEXT NOT NULL DEFAULT 'H',
            ashar TEXT NOT NULL DEFAULT 'H',
            maghrib TEXT NOT NULL DEFAULT 'H',
            verif_shubuh TEXT,
            verif_ashar TEXT,
            verif_maghrib TEXT,
            dicatat_oleh TEXT,
            UNIQUE(riwayat_id, tanggal),
            FOREIGN KEY(riwayat_id) REFERENCES riwayat_pendidikan(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_absensi_harian_tanggal ON absensi_harian(tanggal)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_absensi_harian_riwayat ON absensi_harian(riwayat_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS absensi_guru(
            id TEXT PRIMARY KEY,
            kelas_id TEXT NOT NULL,
            tanggal TEXT NOT NULL,
            shubuh TEXT NOT NULL DEFAULT 'H',
            ashar TEXT NOT NULL DEFAULT 'H',
            maghrib TEXT NOT NULL DEFAULT 'H',
            dicatat_oleh TEXT,
            UNIQUE(kelas_id, tanggal),
            FOREIGN KEY(kelas_id) REFERENCES kelas(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_absensi_guru_tanggal ON absensi_guru(tanggal)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS perizinan(
            id TEXT PRIMARY KEY,
            santri_id TEXT NOT NULL,
            jenis TEXT NOT NULL,
            rencana_pergi TEXT NOT NULL,
            rencana_kembali TEXT NOT NULL,
            kembali_nyata TEXT,
            status TEXT NOT NULL DEFAULT 'AKTIF',
            dicatat_oleh TEXT,
            FOREIGN KEY(santri_id) REFERENCES santri(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_perizinan_santri ON perizinan(santri_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_perizinan_status ON perizinan(status)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS pelanggaran(
            id TEXT PRIMARY KEY,
            santri_id TEXT NOT NULL,
            kategori TEXT NOT NULL,
            keterangan TEXT NOT NULL,
            poin INTEGER NOT NULL,
            dicatat_pada TEXT NOT NULL,
            dicatat_oleh TEXT,
            FOREIGN KEY(santri_id) REFERENCES santri(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_pelanggaran_santri ON pelanggaran(santri_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS mapel(
            id TEXT PRIMARY KEY,
            marhalah_id TEXT NOT NULL,
            nama TEXT NOT NULL,
            urutan INTEGER NOT NULL,
            FOREIGN KEY(marhalah_id) REFERENCES marhalah(id),
            UNIQUE(marhalah_id, nama)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_mapel_marhalah ON mapel(marhalah_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS nilai_akademik(
            id TEXT PRIMARY KEY,
            riwayat_id TEXT NOT NULL,
            mapel_id TEXT NOT NULL,
            semester INTEGER NOT NULL,
            nilai REAL NOT NULL,
            FOREIGN KEY(riwayat_id) REFERENCES riwayat_pendidikan(id),
            FOREIGN KEY(mapel_id) REFERENCES mapel(id),
            UNIQUE(riwayat_id, mapel_id, semester)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_nilai_riwayat ON nilai_akademik(riwayat_id)",
        [],
    )?;

    // Derived cache, fully overwritten by ranking.recompute.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS ranking(
            id TEXT PRIMARY KEY,
            riwayat_id TEXT NOT NULL,
            semester INTEGER NOT NULL,
            jumlah REAL NOT NULL,
            rata_rata REAL NOT NULL,
            peringkat INTEGER NOT NULL,
            predikat TEXT NOT NULL,
            FOREIGN KEY(riwayat_id) REFERENCES riwayat_pendidikan(id),
            UNIQUE(riwayat_id, semester)
        )",
        [],
    )?;

    // Earlier workspaces predate write attribution on attendance rows.
    ensure_attendance_attribution(&conn)?;

    Ok(conn)
}

fn ensure_attendance_attribution(conn: &Connection) -> anyhow::Result<()> {
    if !table_has_column(conn, "absensi_harian", "dicatat_oleh")? {
        conn.execute("ALTER TABLE absensi_harian ADD COLUMN dicatat_oleh TEXT", [])?;
    }
    if !table_has_column(conn, "absensi_guru", "dicatat_oleh")? {
        conn.execute("ALTER TABLE absensi_guru ADD COLUMN dicatat_oleh TEXT", [])?;
    }
    Ok(())
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}
