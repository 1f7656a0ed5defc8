use chrono::NaiveDate;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Serialize;

#[derive(Debug, thiserror::Error)]
pub enum HistoryError {
    #[error("history query failed: {0}")]
    Query(#[from] rusqlite::Error),
    #[error("record {id} has unreadable {column}: {value}")]
    Corrupt {
        id: i64,
        column: &'static str,
        value: String,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Review,
    Completed,
}

impl Status {
    /// Storage and wire value.
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Review => "murojaah",
            Status::Completed => "selesai",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "murojaah" | "review" => Some(Status::Review),
            "selesai" | "completed" => Some(Status::Completed),
            _ => None,
        }
    }
}

/// One (unit, position) cell of the curriculum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Slot {
    pub unit_id: i64,
    pub position: u32,
}

impl Slot {
    pub fn new(unit_id: i64, position: u32) -> Self {
        Slot { unit_id, position }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressionRecord {
    pub id: i64,
    pub student_id: String,
    pub teacher_id: Option<String>,
    pub unit_id: i64,
    pub position: u32,
    pub date: NaiveDate,
    pub status: Status,
    pub notes: Option<String>,
}

impl ProgressionRecord {
    pub fn slot(&self) -> Slot {
        Slot::new(self.unit_id, self.position)
    }
}

/// Read side of a student's memorization history.
///
/// "Latest" always means the greatest `(date, id)`.
pub trait ProgressionHistory {
    fn latest_overall(&self, student_id: &str) -> Result<Option<ProgressionRecord>, HistoryError>;

    fn latest_at_position(
        &self,
        student_id: &str,
        unit_id: i64,
        position: u32,
    ) -> Result<Option<ProgressionRecord>, HistoryError>;

    fn latest_completed(&self, student_id: &str)
        -> Result<Option<ProgressionRecord>, HistoryError>;
}

const RECORD_COLUMNS: &str =
    "id, student_id, teacher_id, unit_id, from_ayah, record_date, status, notes";

pub struct SqliteHistory<'c> {
    conn: &'c Connection,
}

impl<'c> SqliteHistory<'c> {
    pub fn new(conn: &'c Connection) -> Self {
        SqliteHistory { conn }
    }

    fn latest_where(
        &self,
        filter: &str,
        params: impl rusqlite::Params,
    ) -> Result<Option<ProgressionRecord>, HistoryError> {
        let sql = format!(
            "SELECT {} FROM hafalan_records WHERE {} ORDER BY record_date DESC, id DESC LIMIT 1",
            RECORD_COLUMNS, filter
        );
        let raw = self
            .conn
            .query_row(&sql, params, RawRecord::from_row)
            .optional()?;
        raw.map(RawRecord::into_record).transpose()
    }

    /// All records for a student, most recent first.
    pub fn list(&self, student_id: &str, limit: i64) -> Result<Vec<ProgressionRecord>, HistoryError> {
        let sql = format!(
            "SELECT {} FROM hafalan_records WHERE student_id = ? ORDER BY record_date DESC, id DESC LIMIT ?",
            RECORD_COLUMNS
        );
        let mut stmt = self.conn.prepare(&sql)?;
        let raws = stmt
            .query_map((student_id, limit), RawRecord::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        raws.into_iter().map(RawRecord::into_record).collect()
    }

    /// Every completed slot, in curriculum order.
    pub fn completed_slots(&self, student_id: &str) -> Result<Vec<Slot>, HistoryError> {
        let mut stmt = self.conn.prepare(
            "SELECT unit_id, from_ayah
             FROM hafalan_records
             WHERE student_id = ? AND status = 'selesai'
             ORDER BY unit_id, from_ayah",
        )?;
        let rows = stmt
            .query_map([student_id], |r| Ok((r.get::<_, i64>(0)?, r.get::<_, i64>(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|(unit_id, pos)| u32::try_from(pos).ok().map(|p| Slot::new(unit_id, p)))
            .collect())
    }
}

impl ProgressionHistory for SqliteHistory<'_> {
    fn latest_overall(&self, student_id: &str) -> Result<Option<ProgressionRecord>, HistoryError> {
        self.latest_where("student_id = ?", [student_id])
    }

    fn latest_at_position(
        &self,
        student_id: &str,
        unit_id: i64,
        position: u32,
    ) -> Result<Option<ProgressionRecord>, HistoryError> {
        self.latest_where(
            "student_id = ? AND unit_id = ? AND from_ayah = ?",
            (student_id, unit_id, i64::from(position)),
        )
    }

    fn latest_completed(
        &self,
        student_id: &str,
    ) -> Result<Option<ProgressionRecord>, HistoryError> {
        self.latest_where("student_id = ? AND status = 'selesai'", [student_id])
    }
}

struct RawRecord {
    id: i64,
    student_id: String,
    teacher_id: Option<String>,
    unit_id: i64,
    from_ayah: i64,
    date: String,
    status: String,
    notes: Option<String>,
}

impl RawRecord {
    fn from_row(r: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(RawRecord {
            id: r.get(0)?,
            student_id: r.get(1)?,
            teacher_id: r.get(2)?,
            unit_id: r.get(3)?,
            from_ayah: r.get(4)?,
            date: r.get(5)?,
            status: r.get(6)?,
            notes: r.get(7)?,
        })
    }

    fn into_record(self) -> Result<ProgressionRecord, HistoryError> {
        let id = self.id;
        let status = Status::parse(&self.status).ok_or_else(|| HistoryError::Corrupt {
            id,
            column: "status",
            value: self.status.clone(),
        })?;
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d").map_err(|_| {
            HistoryError::Corrupt {
                id,
                column: "record_date",
                value: self.date.clone(),
            }
        })?;
        let position = u32::try_from(self.from_ayah).map_err(|_| HistoryError::Corrupt {
            id,
            column: "from_ayah",
            value: self.from_ayah.to_string(),
        })?;
        Ok(ProgressionRecord {
            id,
            student_id: self.student_id,
            teacher_id: self.teacher_id,
            unit_id: self.unit_id,
            position,
            date,
            status,
            notes: self.notes,
        })
    }
}
