use rusqlite::Connection;
use serde::Serialize;
use std::collections::HashMap;

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("failed to load curriculum: {0}")]
    Load(#[from] rusqlite::Error),
    #[error("curriculum unit {id} has invalid position count {count}")]
    BadPositionCount { id: i64, count: i64 },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CurriculumUnit {
    pub id: i64,
    pub code: String,
    pub name: String,
    pub position_count: u32,
}

/// Ordered, read-only view of the curriculum.
///
/// Built once per workspace and shared behind an `Arc`; every lookup the
/// progression validator needs is a map hit.
#[derive(Debug, Clone, Default)]
pub struct CurriculumCatalog {
    order: Vec<i64>,
    index_of: HashMap<i64, usize>,
    position_counts: HashMap<i64, u32>,
    units: HashMap<i64, CurriculumUnit>,
}

impl CurriculumCatalog {
    pub fn from_units(mut units: Vec<CurriculumUnit>) -> Self {
        units.sort_by_key(|u| u.id);
        let mut catalog = CurriculumCatalog::default();
        for (idx, unit) in units.into_iter().enumerate() {
            catalog.order.push(unit.id);
            catalog.index_of.insert(unit.id, idx);
            catalog.position_counts.insert(unit.id, unit.position_count);
            catalog.units.insert(unit.id, unit);
        }
        catalog
    }

    pub fn load(conn: &Connection) -> Result<Self, CatalogError> {
        let mut stmt = conn.prepare(
            "SELECT id, code, name, position_count
             FROM curriculum_units
             ORDER BY id",
        )?;
        let rows = stmt
            .query_map([], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, i64>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut units = Vec::with_capacity(rows.len());
        for (id, code, name, count) in rows {
            let position_count = u32::try_from(count)
                .ok()
                .filter(|c| *c >= 1)
                .ok_or(CatalogError::BadPositionCount { id, count })?;
            units.push(CurriculumUnit {
                id,
                code,
                name,
                position_count,
            });
        }
        Ok(Self::from_units(units))
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn units(&self) -> impl Iterator<Item = &CurriculumUnit> + '_ {
        self.order.iter().filter_map(|id| self.units.get(id))
    }

    pub fn unit(&self, unit_id: i64) -> Option<&CurriculumUnit> {
        self.units.get(&unit_id)
    }

    pub fn first_unit(&self) -> Option<&CurriculumUnit> {
        self.order.first().and_then(|id| self.units.get(id))
    }

    pub fn next_unit_after(&self, unit_id: i64) -> Option<&CurriculumUnit> {
        let idx = *self.index_of.get(&unit_id)?;
        self.order.get(idx + 1).and_then(|id| self.units.get(id))
    }

    pub fn position_count(&self, unit_id: i64) -> Option<u32> {
        self.position_counts.get(&unit_id).copied()
    }

    pub fn total_positions(&self) -> u64 {
        self.position_counts.values().map(|c| u64::from(*c)).sum()
    }
}

/// Surah names and ayah counts in mushaf order.
pub const QURAN_SURAHS: [(&str, u32); 114] = [
    ("Al-Fatihah", 7),
    ("Al-Baqarah", 286),
    ("Ali 'Imran", 200),
    ("An-Nisa'", 176),
    ("Al-Ma'idah", 120),
    ("Al-An'am", 165),
    ("Al-A'raf", 206),
    ("Al-Anfal", 75),
    ("At-Tawbah", 129),
    ("Yunus", 109),
    ("Hud", 123),
    ("Yusuf", 111),
    ("Ar-Ra'd", 43),
    ("Ibrahim", 52),
    ("Al-Hijr", 99),
    ("An-Nahl", 128),
    ("Al-Isra'", 111),
    ("Al-Kahf", 110),
    ("Maryam", 98),
    ("Ta-Ha", 135),
    ("Al-Anbiya'", 112),
    ("Al-Hajj", 78),
    ("Al-Mu'minun", 118),
    ("An-Nur", 64),
    ("Al-Furqan", 77),
    ("Ash-Shu'ara'", 227),
    ("An-Naml", 93),
    ("Al-Qasas", 88),
    ("Al-'Ankabut", 69),
    ("Ar-Rum", 60),
    ("Luqman", 34),
    ("As-Sajdah", 30),
    ("Al-Ahzab", 73),
    ("Saba'", 54),
    ("Fatir", 45),
    ("Ya-Sin", 83),
    ("As-Saffat", 182),
    ("Sad", 88),
    ("Az-Zumar", 75),
    ("Ghafir", 85),
    ("Fussilat", 54),
    ("Ash-Shura", 53),
    ("Az-Zukhruf", 89),
    ("Ad-Dukhan", 59),
    ("Al-Jathiyah", 37),
    ("Al-Ahqaf", 35),
    ("Muhammad", 38),
    ("Al-Fath", 29),
    ("Al-Hujurat", 18),
    ("Qaf", 45),
    ("Adh-Dhariyat", 60),
    ("At-Tur", 49),
    ("An-Najm", 62),
    ("Al-Qamar", 55),
    ("Ar-Rahman", 78),
    ("Al-Waqi'ah", 96),
    ("Al-Hadid", 29),
    ("Al-Mujadilah", 22),
    ("Al-Hashr", 24),
    ("Al-Mumtahanah", 13),
    ("As-Saff", 14),
    ("Al-Jumu'ah", 11),
    ("Al-Munafiqun", 11),
    ("At-Taghabun", 18),
    ("At-Talaq", 12),
    ("At-Tahrim", 12),
    ("Al-Mulk", 30),
    ("Al-Qalam", 52),
    ("Al-Haqqah", 52),
    ("Al-Ma'arij", 44),
    ("Nuh", 28),
    ("Al-Jinn", 28),
    ("Al-Muzzammil", 20),
    ("Al-Muddaththir", 56),
    ("Al-Qiyamah", 40),
    ("Al-Insan", 31),
    ("Al-Mursalat", 50),
    ("An-Naba'", 40),
    ("An-Nazi'at", 46),
    ("'Abasa", 42),
    ("At-Takwir", 29),
    ("Al-Infitar", 19),
    ("Al-Mutaffifin", 36),
    ("Al-Inshiqaq", 25),
    ("Al-Buruj", 22),
    ("At-Tariq", 17),
    ("Al-A'la", 19),
    ("Al-Ghashiyah", 26),
    ("Al-Fajr", 30),
    ("Al-Balad", 20),
    ("Ash-Shams", 15),
    ("Al-Lail", 21),
    ("Ad-Duha", 11),
    ("Ash-Sharh", 8),
    ("At-Tin", 8),
    ("Al-'Alaq", 19),
    ("Al-Qadr", 5),
    ("Al-Bayyinah", 8),
    ("Az-Zalzalah", 8),
    ("Al-'Adiyat", 11),
    ("Al-Qari'ah", 11),
    ("At-Takathur", 8),
    ("Al-'Asr", 3),
    ("Al-Humazah", 9),
    ("Al-Fil", 5),
    ("Quraysh", 4),
    ("Al-Ma'un", 7),
    ("Al-Kawthar", 3),
    ("Al-Kafirun", 6),
    ("An-Nasr", 3),
    ("Al-Masad", 5),
    ("Al-Ikhlas", 4),
    ("Al-Falaq", 5),
    ("An-Nas", 6),
];

pub fn unit_code(ordinal: usize) -> String {
    format!("{:03}", ordinal)
}

/// Replaces the stored curriculum. Ids are assigned 1..=n in the given order.
pub fn replace_units(conn: &Connection, units: &[(String, String, u32)]) -> rusqlite::Result<usize> {
    let tx = conn.unchecked_transaction()?;
    tx.execute("DELETE FROM curriculum_units", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO curriculum_units(id, code, name, position_count)
             VALUES(?, ?, ?, ?)",
        )?;
        for (i, (code, name, count)) in units.iter().enumerate() {
            stmt.execute((i as i64 + 1, code, name, i64::from(*count)))?;
        }
    }
    tx.commit()?;
    Ok(units.len())
}

pub fn seed_quran(conn: &Connection) -> rusqlite::Result<usize> {
    let units: Vec<(String, String, u32)> = QURAN_SURAHS
        .iter()
        .enumerate()
        .map(|(i, (name, ayahs))| (unit_code(i + 1), name.to_string(), *ayahs))
        .collect();
    replace_units(conn, &units)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(id: i64, name: &str, count: u32) -> CurriculumUnit {
        CurriculumUnit {
            id,
            code: unit_code(id as usize),
            name: name.to_string(),
            position_count: count,
        }
    }

    fn mem_conn() -> Connection {
        let conn = Connection::open_in_memory().expect("open memory db");
        crate::db::create_schema(&conn).expect("create schema");
        conn
    }

    #[test]
    fn navigation_follows_id_order_not_input_order() {
        let catalog = CurriculumCatalog::from_units(vec![
            unit(3, "C", 2),
            unit(1, "A", 3),
            unit(2, "B", 5),
        ]);
        assert_eq!(catalog.first_unit().map(|u| u.id), Some(1));
        assert_eq!(catalog.next_unit_after(1).map(|u| u.id), Some(2));
        assert_eq!(catalog.next_unit_after(2).map(|u| u.id), Some(3));
        assert!(catalog.next_unit_after(3).is_none());
        assert!(catalog.next_unit_after(99).is_none());
        assert_eq!(catalog.position_count(2), Some(5));
        assert_eq!(catalog.position_count(42), None);
        assert_eq!(catalog.total_positions(), 10);
    }

    #[test]
    fn empty_catalog_has_no_first_unit() {
        let catalog = CurriculumCatalog::from_units(Vec::new());
        assert!(catalog.is_empty());
        assert!(catalog.first_unit().is_none());
        assert_eq!(catalog.total_positions(), 0);
    }

    #[test]
    fn quran_seed_matches_mushaf_totals() {
        let conn = mem_conn();
        let n = seed_quran(&conn).expect("seed");
        assert_eq!(n, 114);

        let catalog = CurriculumCatalog::load(&conn).expect("load");
        assert_eq!(catalog.len(), 114);
        assert_eq!(catalog.total_positions(), 6236);

        let first = catalog.first_unit().expect("first surah");
        assert_eq!(first.code, "001");
        assert_eq!(first.name, "Al-Fatihah");
        assert_eq!(first.position_count, 7);
        assert_eq!(catalog.next_unit_after(1).map(|u| u.name.as_str()), Some("Al-Baqarah"));
        assert_eq!(catalog.unit(114).map(|u| u.code.as_str()), Some("114"));
    }

    #[test]
    fn load_rejects_zero_position_units() {
        let conn = mem_conn();
        conn.execute(
            "INSERT INTO curriculum_units(id, code, name, position_count) VALUES(1, '001', 'X', 0)",
            [],
        )
        .expect("insert");
        let res = CurriculumCatalog::load(&conn);
        assert!(matches!(
            res,
            Err(CatalogError::BadPositionCount { id: 1, count: 0 })
        ));
    }
}
