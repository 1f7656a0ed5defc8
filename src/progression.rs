//! Sequential memorization progression.
//!
//! A student's progress is a pointer moving through the curriculum slots in
//! order. Each slot goes `untouched -> review -> completed` (review optional,
//! completed terminal). The pointer only moves by completing the slot it is on,
//! and no other slot may be touched while a review elsewhere is still open.
//!
//! Nothing here writes. Callers persisting an accepted entry must re-run
//! [`validate`] inside the same write transaction that inserts it.

use crate::curriculum::CurriculumCatalog;
use crate::history::{HistoryError, ProgressionHistory, ProgressionRecord, Slot, Status};
use chrono::NaiveDate;
use serde::Serialize;
use serde_json::json;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Proposal<'a> {
    pub student_id: &'a str,
    pub unit_id: i64,
    /// Raw user input; anything outside `1..=position_count` is rejected.
    pub position: i64,
    pub status: Status,
}

/// The user-facing input a rejection is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    SurahId,
    FromAyah,
    Status,
}

impl Field {
    pub fn as_str(self) -> &'static str {
        match self {
            Field::SurahId => "surah_id",
            Field::FromAyah => "from_ayah",
            Field::Status => "status",
        }
    }
}

/// A slot resolved against the catalog so messages can name it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SlotLabel {
    pub unit_id: i64,
    pub unit_code: String,
    pub unit_name: String,
    pub position: u32,
}

impl SlotLabel {
    pub fn resolve(catalog: &CurriculumCatalog, slot: Slot) -> Self {
        let (unit_code, unit_name) = catalog
            .unit(slot.unit_id)
            .map(|u| (u.code.clone(), u.name.clone()))
            .unwrap_or_else(|| (slot.unit_id.to_string(), format!("surah #{}", slot.unit_id)));
        SlotLabel {
            unit_id: slot.unit_id,
            unit_code,
            unit_name,
            position: slot.position,
        }
    }

    #[cfg(test)]
    pub fn slot(&self) -> Slot {
        Slot::new(self.unit_id, self.position)
    }
}

impl std::fmt::Display for SlotLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({}) ayah {}", self.unit_name, self.unit_code, self.position)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection {
    InvalidPosition {
        unit_id: i64,
        position: i64,
        /// `None` when the unit itself is unknown.
        position_count: Option<u32>,
    },
    UnfinishedReview {
        pending: SlotLabel,
        record_id: i64,
    },
    AlreadyCompleted {
        slot: SlotLabel,
        record_id: i64,
        completed_on: NaiveDate,
    },
    OutOfSequence {
        expected: SlotLabel,
    },
    CurriculumComplete,
}

impl Rejection {
    pub fn field(&self) -> Field {
        match self {
            Rejection::InvalidPosition {
                position_count: None,
                ..
            } => Field::SurahId,
            Rejection::InvalidPosition { .. } => Field::FromAyah,
            Rejection::UnfinishedReview { .. } => Field::Status,
            Rejection::AlreadyCompleted { .. } => Field::Status,
            Rejection::OutOfSequence { .. } => Field::FromAyah,
            Rejection::CurriculumComplete => Field::SurahId,
        }
    }

    pub fn reason(&self) -> &'static str {
        match self {
            Rejection::InvalidPosition { .. } => "invalid_position",
            Rejection::UnfinishedReview { .. } => "unfinished_review",
            Rejection::AlreadyCompleted { .. } => "already_completed",
            Rejection::OutOfSequence { .. } => "out_of_sequence",
            Rejection::CurriculumComplete => "curriculum_complete",
        }
    }

    pub fn message(&self) -> String {
        match self {
            Rejection::InvalidPosition {
                unit_id,
                position_count: None,
                ..
            } => format!("unknown surah {}", unit_id),
            Rejection::InvalidPosition {
                position,
                position_count: Some(count),
                ..
            } => format!("ayah {} is outside 1..={}", position, count),
            Rejection::UnfinishedReview { pending, .. } => format!(
                "murojaah of {} is still open; mark it selesai before moving on",
                pending
            ),
            Rejection::AlreadyCompleted { slot, .. } => {
                format!("{} is already selesai; continue with the next ayah", slot)
            }
            Rejection::OutOfSequence { expected } => {
                format!("out of sequence; the next entry must be {}", expected)
            }
            Rejection::CurriculumComplete => {
                "every surah in the curriculum is already selesai".to_string()
            }
        }
    }

    pub fn details(&self) -> serde_json::Value {
        let mut d = json!({
            "field": self.field().as_str(),
            "reason": self.reason(),
        });
        match self {
            Rejection::InvalidPosition {
                unit_id,
                position,
                position_count,
            } => {
                d["surahId"] = json!(unit_id);
                d["fromAyah"] = json!(position);
                d["ayahCount"] = json!(position_count);
            }
            Rejection::UnfinishedReview { pending, record_id } => {
                d["pending"] = json!(pending);
                d["recordId"] = json!(record_id);
            }
            Rejection::AlreadyCompleted {
                slot,
                record_id,
                completed_on,
            } => {
                d["slot"] = json!(slot);
                d["recordId"] = json!(record_id);
                d["completedOn"] = json!(completed_on.format("%Y-%m-%d").to_string());
            }
            Rejection::OutOfSequence { expected } => {
                d["expected"] = json!(expected);
            }
            Rejection::CurriculumComplete => {}
        }
        d
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Decision {
    Accepted,
    Rejected(Rejection),
}

impl Decision {
    pub fn is_accepted(&self) -> bool {
        matches!(self, Decision::Accepted)
    }
}

/// The slot that follows the last completed one, or `None` once the whole
/// curriculum is done.
pub fn next_expected(
    catalog: &CurriculumCatalog,
    latest_completed: Option<&ProgressionRecord>,
) -> Option<Slot> {
    let Some(last) = latest_completed else {
        return catalog.first_unit().map(|u| Slot::new(u.id, 1));
    };
    match catalog.position_count(last.unit_id) {
        Some(count) if last.position < count => Some(Slot::new(last.unit_id, last.position + 1)),
        _ => catalog
            .next_unit_after(last.unit_id)
            .map(|u| Slot::new(u.id, 1)),
    }
}

pub fn validate<H>(
    catalog: &CurriculumCatalog,
    history: &H,
    proposal: &Proposal<'_>,
) -> Result<Decision, HistoryError>
where
    H: ProgressionHistory + ?Sized,
{
    let Some(count) = catalog.position_count(proposal.unit_id) else {
        return Ok(Decision::Rejected(Rejection::InvalidPosition {
            unit_id: proposal.unit_id,
            position: proposal.position,
            position_count: None,
        }));
    };
    let position = match u32::try_from(proposal.position) {
        Ok(p) if (1..=count).contains(&p) => p,
        _ => {
            return Ok(Decision::Rejected(Rejection::InvalidPosition {
                unit_id: proposal.unit_id,
                position: proposal.position,
                position_count: Some(count),
            }))
        }
    };
    let slot = Slot::new(proposal.unit_id, position);

    let latest = history.latest_overall(proposal.student_id)?;
    let at_slot = history.latest_at_position(proposal.student_id, slot.unit_id, slot.position)?;
    let last_done = history.latest_completed(proposal.student_id)?;

    if let Some(latest) = latest.as_ref() {
        if latest.status == Status::Review && latest.slot() != slot {
            return Ok(Decision::Rejected(Rejection::UnfinishedReview {
                pending: SlotLabel::resolve(catalog, latest.slot()),
                record_id: latest.id,
            }));
        }
    }

    // Once the last slot of the last unit is done nothing further is admissible,
    // including re-submissions of finished slots.
    let Some(expected) = next_expected(catalog, last_done.as_ref()) else {
        return Ok(Decision::Rejected(Rejection::CurriculumComplete));
    };

    if let Some(prev) = at_slot.as_ref() {
        return Ok(match prev.status {
            Status::Completed => Decision::Rejected(Rejection::AlreadyCompleted {
                slot: SlotLabel::resolve(catalog, slot),
                record_id: prev.id,
                completed_on: prev.date,
            }),
            // Closing a review, or reviewing the same slot again.
            Status::Review => Decision::Accepted,
        });
    }

    if expected != slot {
        return Ok(Decision::Rejected(Rejection::OutOfSequence {
            expected: SlotLabel::resolve(catalog, expected),
        }));
    }
    Ok(Decision::Accepted)
}

/// Where a student currently stands, for UIs that pre-fill the next entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Standing {
    pub pending_review: Option<SlotLabel>,
    pub next_expected: Option<SlotLabel>,
    pub last_completed: Option<ProgressionRecord>,
}

impl Standing {
    /// The slot the next submission has to target.
    pub fn target(&self) -> Option<&SlotLabel> {
        self.pending_review.as_ref().or(self.next_expected.as_ref())
    }
}

pub fn standing<H>(
    catalog: &CurriculumCatalog,
    history: &H,
    student_id: &str,
) -> Result<Standing, HistoryError>
where
    H: ProgressionHistory + ?Sized,
{
    let latest = history.latest_overall(student_id)?;
    let last_completed = history.latest_completed(student_id)?;
    let pending_review = latest
        .filter(|r| r.status == Status::Review)
        .map(|r| SlotLabel::resolve(catalog, r.slot()));
    let next_expected =
        next_expected(catalog, last_completed.as_ref()).map(|s| SlotLabel::resolve(catalog, s));
    Ok(Standing {
        pending_review,
        next_expected,
        last_completed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::curriculum::CurriculumUnit;
    use std::cell::RefCell;

    struct MemoryHistory {
        records: RefCell<Vec<ProgressionRecord>>,
        next_id: RefCell<i64>,
    }

    impl MemoryHistory {
        fn new() -> Self {
            MemoryHistory {
                records: RefCell::new(Vec::new()),
                next_id: RefCell::new(1),
            }
        }

        fn push(&self, student: &str, unit_id: i64, position: u32, status: Status, date: NaiveDate) {
            let mut id = self.next_id.borrow_mut();
            self.records.borrow_mut().push(ProgressionRecord {
                id: *id,
                student_id: student.to_string(),
                teacher_id: None,
                unit_id,
                position,
                date,
                status,
                notes: None,
            });
            *id += 1;
        }

        fn latest_by<F>(&self, student_id: &str, pred: F) -> Option<ProgressionRecord>
        where
            F: Fn(&ProgressionRecord) -> bool,
        {
            self.records
                .borrow()
                .iter()
                .filter(|r| r.student_id == student_id && pred(r))
                .max_by_key(|r| (r.date, r.id))
                .cloned()
        }
    }

    impl ProgressionHistory for MemoryHistory {
        fn latest_overall(&self, student_id: &str) -> Result<Option<ProgressionRecord>, HistoryError> {
            Ok(self.latest_by(student_id, |_| true))
        }

        fn latest_at_position(
            &self,
            student_id: &str,
            unit_id: i64,
            position: u32,
        ) -> Result<Option<ProgressionRecord>, HistoryError> {
            Ok(self.latest_by(student_id, |r| r.unit_id == unit_id && r.position == position))
        }

        fn latest_completed(
            &self,
            student_id: &str,
        ) -> Result<Option<ProgressionRecord>, HistoryError> {
            Ok(self.latest_by(student_id, |r| r.status == Status::Completed))
        }
    }

    const A: i64 = 1;
    const B: i64 = 2;

    fn day() -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 3, 1).expect("date")
    }

    fn catalog_ab() -> CurriculumCatalog {
        CurriculumCatalog::from_units(vec![
            CurriculumUnit {
                id: A,
                code: "001".into(),
                name: "A".into(),
                position_count: 3,
            },
            CurriculumUnit {
                id: B,
                code: "002".into(),
                name: "B".into(),
                position_count: 2,
            },
        ])
    }

    /// Validates and, when accepted, records the entry like the create handler does.
    fn submit(
        catalog: &CurriculumCatalog,
        history: &MemoryHistory,
        unit_id: i64,
        position: i64,
        status: Status,
    ) -> Decision {
        let proposal = Proposal {
            student_id: "s1",
            unit_id,
            position,
            status,
        };
        let decision = validate(catalog, history, &proposal).expect("validate");
        if decision.is_accepted() {
            history.push("s1", unit_id, position as u32, status, day());
        }
        decision
    }

    fn expected_of(decision: &Decision) -> Slot {
        match decision {
            Decision::Rejected(Rejection::OutOfSequence { expected }) => expected.slot(),
            other => panic!("expected OutOfSequence, got {:?}", other),
        }
    }

    #[test]
    fn two_unit_walkthrough() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();

        assert_eq!(submit(&catalog, &h, A, 1, Status::Review), Decision::Accepted);
        assert_eq!(submit(&catalog, &h, A, 1, Status::Completed), Decision::Accepted);

        let d = submit(&catalog, &h, A, 3, Status::Completed);
        assert_eq!(expected_of(&d), Slot::new(A, 2));

        assert_eq!(submit(&catalog, &h, A, 2, Status::Completed), Decision::Accepted);
        let d = submit(&catalog, &h, A, 2, Status::Completed);
        assert!(matches!(
            d,
            Decision::Rejected(Rejection::AlreadyCompleted { .. })
        ));

        let d = submit(&catalog, &h, B, 1, Status::Completed);
        assert_eq!(expected_of(&d), Slot::new(A, 3));

        assert_eq!(submit(&catalog, &h, A, 3, Status::Completed), Decision::Accepted);
        assert_eq!(submit(&catalog, &h, B, 1, Status::Completed), Decision::Accepted);
        assert_eq!(submit(&catalog, &h, B, 2, Status::Completed), Decision::Accepted);

        for p in [1, 2] {
            let d = submit(&catalog, &h, B, p, Status::Completed);
            assert_eq!(d, Decision::Rejected(Rejection::CurriculumComplete));
        }
    }

    #[test]
    fn finished_curriculum_rejects_everything_in_range() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        for (u, p) in [(A, 1), (A, 2), (A, 3), (B, 1), (B, 2)] {
            h.push("s1", u, p, Status::Completed, day());
        }
        assert_eq!(next_expected(&catalog, h.latest_completed("s1").unwrap().as_ref()), None);

        for (u, p, s) in [
            (A, 1, Status::Completed),
            (B, 2, Status::Completed),
            (B, 1, Status::Review),
        ] {
            let d = submit(&catalog, &h, u, p, s);
            assert_eq!(d, Decision::Rejected(Rejection::CurriculumComplete));
            assert_eq!(d_field(&d), "surah_id");
        }

        // Range checks still run before history is consulted.
        let d = submit(&catalog, &h, B, 3, Status::Completed);
        assert!(matches!(
            d,
            Decision::Rejected(Rejection::InvalidPosition {
                position_count: Some(2),
                ..
            })
        ));
        let d = submit(&catalog, &h, 9, 1, Status::Completed);
        assert!(matches!(
            d,
            Decision::Rejected(Rejection::InvalidPosition {
                position_count: None,
                ..
            })
        ));
    }

    fn d_field(d: &Decision) -> &'static str {
        match d {
            Decision::Rejected(r) => r.field().as_str(),
            Decision::Accepted => "",
        }
    }

    #[test]
    fn rollover_targets_first_position_of_next_unit() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        for p in 1..=3 {
            h.push("s1", A, p, Status::Completed, day());
        }
        let d = submit(&catalog, &h, A, 4, Status::Completed);
        assert_eq!(
            d,
            Decision::Rejected(Rejection::InvalidPosition {
                unit_id: A,
                position: 4,
                position_count: Some(3),
            })
        );
        assert_eq!(d_field(&d), "from_ayah");

        let d = submit(&catalog, &h, B, 2, Status::Review);
        assert_eq!(expected_of(&d), Slot::new(B, 1));
        assert_eq!(submit(&catalog, &h, B, 1, Status::Review), Decision::Accepted);
    }

    #[test]
    fn non_positive_positions_are_invalid() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        for pos in [0, -1] {
            let d = submit(&catalog, &h, A, pos, Status::Review);
            assert!(matches!(
                d,
                Decision::Rejected(Rejection::InvalidPosition { .. })
            ));
        }
        assert!(h.records.borrow().is_empty());
    }

    #[test]
    fn only_the_next_slot_is_accepted_for_either_status() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        h.push("s1", A, 1, Status::Completed, day());

        for status in [Status::Review, Status::Completed] {
            for (u, p) in [(A, 1), (A, 3), (B, 1), (B, 2)] {
                let proposal = Proposal {
                    student_id: "s1",
                    unit_id: u,
                    position: p,
                    status,
                };
                let d = validate(&catalog, &h, &proposal).expect("validate");
                assert!(!d.is_accepted(), "{:?} {},{} accepted", status, u, p);
            }
            let proposal = Proposal {
                student_id: "s1",
                unit_id: A,
                position: 2,
                status,
            };
            assert!(validate(&catalog, &h, &proposal).expect("validate").is_accepted());
        }
    }

    #[test]
    fn re_review_allowed_and_closing_review_allowed() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        assert_eq!(submit(&catalog, &h, A, 1, Status::Review), Decision::Accepted);
        assert_eq!(submit(&catalog, &h, A, 1, Status::Review), Decision::Accepted);
        assert_eq!(submit(&catalog, &h, A, 1, Status::Completed), Decision::Accepted);
        let d = submit(&catalog, &h, A, 1, Status::Completed);
        match d {
            Decision::Rejected(r @ Rejection::AlreadyCompleted { .. }) => {
                assert_eq!(r.field(), Field::Status);
                assert_eq!(r.details()["reason"], "already_completed");
                assert_eq!(r.details()["slot"]["position"], 1);
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn open_review_blocks_every_other_slot() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        h.push("s1", A, 1, Status::Completed, day());
        h.push("s1", A, 2, Status::Review, day());

        // Even the already-finished slot is reported as blocked by the open review.
        for (u, p, s) in [
            (A, 1, Status::Review),
            (A, 3, Status::Completed),
            (B, 1, Status::Review),
        ] {
            let d = submit(&catalog, &h, u, p, s);
            match d {
                Decision::Rejected(Rejection::UnfinishedReview { pending, record_id }) => {
                    assert_eq!(pending.slot(), Slot::new(A, 2));
                    assert_eq!(record_id, 2);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(submit(&catalog, &h, A, 2, Status::Review), Decision::Accepted);
        assert_eq!(submit(&catalog, &h, A, 2, Status::Completed), Decision::Accepted);
        assert_eq!(submit(&catalog, &h, A, 3, Status::Review), Decision::Accepted);
    }

    #[test]
    fn older_open_review_does_not_block_when_a_newer_entry_exists() {
        // Only the most recent record matters for the unfinished-review guard.
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        h.push("s1", A, 1, Status::Review, day());
        h.push("s1", A, 1, Status::Completed, day());
        assert_eq!(submit(&catalog, &h, A, 2, Status::Review), Decision::Accepted);
    }

    #[test]
    fn same_date_tie_breaks_on_insertion_order() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        h.push("s1", A, 1, Status::Completed, day());
        h.push("s1", A, 2, Status::Review, day());
        h.push("s1", A, 2, Status::Completed, day());
        // Latest overall is the completion (id 3), not the review (id 2).
        assert_eq!(submit(&catalog, &h, A, 3, Status::Completed), Decision::Accepted);
    }

    #[test]
    fn later_date_outranks_higher_id() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        let later = NaiveDate::from_ymd_opt(2026, 3, 5).expect("date");
        h.push("s1", A, 1, Status::Review, later);
        h.push("s1", A, 1, Status::Completed, day());
        // The review dated later is still the latest record, so A,1 is the open slot.
        let standing = standing(&catalog, &h, "s1").expect("standing");
        assert_eq!(standing.pending_review.map(|s| s.slot()), Some(Slot::new(A, 1)));
    }

    #[test]
    fn rejection_is_a_pure_function_of_inputs() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        h.push("s1", A, 1, Status::Completed, day());
        let proposal = Proposal {
            student_id: "s1",
            unit_id: B,
            position: 1,
            status: Status::Completed,
        };
        let first = validate(&catalog, &h, &proposal).expect("validate");
        let second = validate(&catalog, &h, &proposal).expect("validate");
        assert_eq!(first, second);
        assert_eq!(h.records.borrow().len(), 1);
    }

    #[test]
    fn other_students_history_is_ignored() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        h.push("s2", A, 1, Status::Review, day());
        assert_eq!(submit(&catalog, &h, A, 1, Status::Completed), Decision::Accepted);
    }

    #[test]
    fn accepted_sequence_walks_the_whole_curriculum_in_order() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        let mut guard = 0;
        loop {
            let standing = standing(&catalog, &h, "s1").expect("standing");
            let Some(next) = standing.next_expected else { break };
            assert_eq!(
                submit(&catalog, &h, next.unit_id, next.position as i64, Status::Completed),
                Decision::Accepted
            );
            guard += 1;
            assert!(guard <= 5);
        }
        let done: Vec<Slot> = h.records.borrow().iter().map(|r| r.slot()).collect();
        assert_eq!(
            done,
            vec![
                Slot::new(A, 1),
                Slot::new(A, 2),
                Slot::new(A, 3),
                Slot::new(B, 1),
                Slot::new(B, 2)
            ]
        );
    }

    #[test]
    fn empty_catalog_rejects_without_panicking() {
        let catalog = CurriculumCatalog::default();
        let h = MemoryHistory::new();
        let d = submit(&catalog, &h, 1, 1, Status::Completed);
        assert_eq!(d_field(&d), "surah_id");
        assert!(next_expected(&catalog, None).is_none());
    }

    #[test]
    fn messages_name_the_slot_to_submit() {
        let catalog = catalog_ab();
        let h = MemoryHistory::new();
        let d = submit(&catalog, &h, B, 1, Status::Completed);
        let Decision::Rejected(r) = d else {
            panic!("expected rejection")
        };
        assert_eq!(r.message(), "out of sequence; the next entry must be A (001) ayah 1");
        assert_eq!(r.details()["expected"]["unitCode"], "001");
    }
}
