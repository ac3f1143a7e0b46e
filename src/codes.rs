use serde::Serialize;

/// The three prayer-linked daily sessions. Order matters: it is the column
/// order of every grid and the sort order for collapsed teacher rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum Session {
    Shubuh,
    Ashar,
    Maghrib,
}

impl Session {
    pub const ALL: [Session; 3] = [Session::Shubuh, Session::Ashar, Session::Maghrib];

    pub fn key(self) -> &'static str {
        match self {
            Session::Shubuh => "shubuh",
            Session::Ashar => "ashar",
            Session::Maghrib => "maghrib",
        }
    }
}

/// Santri attendance code set. Deliberately separate from the teacher code
/// set; the two domains are never unified.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum AttendanceCode {
    #[serde(rename = "H")]
    Hadir,
    #[serde(rename = "S")]
    Sakit,
    #[serde(rename = "I")]
    Izin,
    #[serde(rename = "A")]
    Alfa,
}

impl AttendanceCode {
    pub fn code(self) -> &'static str {
        match self {
            AttendanceCode::Hadir => "H",
            AttendanceCode::Sakit => "S",
            AttendanceCode::Izin => "I",
            AttendanceCode::Alfa => "A",
        }
    }

    pub fn parse(s: &str) -> Option<AttendanceCode> {
        match s.trim().to_ascii_uppercase().as_str() {
            "H" => Some(AttendanceCode::Hadir),
            "S" => Some(AttendanceCode::Sakit),
            "I" => Some(AttendanceCode::Izin),
            "A" => Some(AttendanceCode::Alfa),
            _ => None,
        }
    }
}

/// Teacher attendance code set: adds B (substituted) and L (holiday).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TeacherAttendanceCode {
    #[serde(rename = "H")]
    Hadir,
    #[serde(rename = "A")]
    Alfa,
    #[serde(rename = "S")]
    Sakit,
    #[serde(rename = "I")]
    Izin,
    #[serde(rename = "B")]
    Badal,
    #[serde(rename = "L")]
    Libur,
}

impl TeacherAttendanceCode {
    pub fn code(self) -> &'static str {
        match self {
            TeacherAttendanceCode::Hadir => "H",
            TeacherAttendanceCode::Alfa => "A",
            TeacherAttendanceCode::Sakit => "S",
            TeacherAttendanceCode::Izin => "I",
            TeacherAttendanceCode::Badal => "B",
            TeacherAttendanceCode::Libur => "L",
        }
    }

    pub fn parse(s: &str) -> Option<TeacherAttendanceCode> {
        match s.trim().to_ascii_uppercase().as_str() {
            "H" => Some(TeacherAttendanceCode::Hadir),
            "A" => Some(TeacherAttendanceCode::Alfa),
            "S" => Some(TeacherAttendanceCode::Sakit),
            "I" => Some(TeacherAttendanceCode::Izin),
            "B" => Some(TeacherAttendanceCode::Badal),
            "L" => Some(TeacherAttendanceCode::Libur),
            _ => None,
        }
    }
}

/// Per-session adjudication marker. OK is terminal; BELUM queues the session
/// for a hearing. Absent (NULL in storage) means nothing pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Verification {
    #[serde(rename = "BELUM")]
    Belum,
    #[serde(rename = "OK")]
    Ok,
}

impl Verification {
    pub fn code(self) -> &'static str {
        match self {
            Verification::Belum => "BELUM",
            Verification::Ok => "OK",
        }
    }

    pub fn parse(s: &str) -> Option<Verification> {
        match s.trim().to_ascii_uppercase().as_str() {
            "BELUM" => Some(Verification::Belum),
            "OK" => Some(Verification::Ok),
            _ => None,
        }
    }
}
