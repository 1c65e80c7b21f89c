//! # Schedule Overlap Rule
//!
//! Half-open intervals `[start, end)` on one resource.
//!
//! ```text
//!   existing      |=========|
//!   new      |=======|                 starts before, ends during   → overlap
//!   new               |=======|        starts during                → overlap
//!   new        |=================|     contains existing            → overlap
//!   new            |===|               contained                    → overlap
//!   new                     |=====|    touches end (end == start)   → free
//! ```
//!
//! All four cases reduce to `existing.start < new.end && existing.end > new.start`.
//! The database resolver uses the same predicate inside its conditional insert.

use chrono::{DateTime, Utc};

use crate::error::{CoreError, CoreResult, ValidationError};
use crate::types::Appointment;

/// A booked slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Interval {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Interval {
    /// Builds an interval, rejecting empty or inverted ones.
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> CoreResult<Self> {
        if end <= start {
            return Err(ValidationError::InvalidFormat {
                field: "end".to_string(),
                reason: "must be after start".to_string(),
            }
            .into());
        }
        Ok(Interval { start, end })
    }

    #[inline]
    pub fn overlaps(&self, other: &Interval) -> bool {
        self.start < other.end && self.end > other.start
    }
}

/// Finds the first appointment that blocks `candidate` on `resource_id`.
///
/// Skips `exclude_id` (the appointment being updated), inactive rows, and
/// cancelled/no-show appointments.
pub fn find_conflict<'a>(
    existing: &'a [Appointment],
    resource_id: &str,
    candidate: Interval,
    exclude_id: Option<&str>,
) -> Option<&'a Appointment> {
    existing.iter().find(|appt| {
        appt.resource_id == resource_id
            && Some(appt.id.as_str()) != exclude_id
            && appt.active
            && appt.status.blocks_schedule()
            && Interval {
                start: appt.starts_at,
                end: appt.ends_at,
            }
            .overlaps(&candidate)
    })
}

/// [`find_conflict`] as a `Result`, for admission checks.
pub fn check_available(
    existing: &[Appointment],
    resource_id: &str,
    candidate: Interval,
    exclude_id: Option<&str>,
) -> CoreResult<()> {
    match find_conflict(existing, resource_id, candidate, exclude_id) {
        Some(conflict) => Err(CoreError::ScheduleConflict {
            resource_id: resource_id.to_string(),
            conflicting_id: conflict.id.clone(),
        }),
        None => Ok(()),
    }
}
