use chrono::NaiveDate;
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

/// Caller-side checks that need no lock: ids, range shape, past dates.
pub(crate) fn validate_request(
    resource_id: &str,
    renter_id: &str,
    start: NaiveDate,
    end: NaiveDate,
    today: NaiveDate,
    allow_past_dates: bool,
) -> Result<DateRange, EngineError> {
    if resource_id.is_empty() || resource_id.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("resource id length"));
    }
    if renter_id.is_empty() || renter_id.len() > MAX_ID_LEN {
        return Err(EngineError::LimitExceeded("renter id length"));
    }
    let invalid = |reason: &'static str| EngineError::InvalidRange { start, end, reason };

    let range = DateRange::checked(start, end).ok_or_else(|| invalid("start must be before end"))?;
    let (y, m, d) = MIN_VALID_DATE;
    let min = NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MIN);
    let (y, m, d) = MAX_VALID_DATE;
    let max = NaiveDate::from_ymd_opt(y, m, d).unwrap_or(NaiveDate::MAX);
    if start < min || end > max {
        return Err(invalid("date out of supported range"));
    }
    if range.days() > MAX_RESERVATION_DAYS {
        return Err(invalid("reservation too long"));
    }
    if !allow_past_dates && start < today {
        return Err(invalid("starts in the past"));
    }
    Ok(range)
}

/// Does any active reservation on this book overlap `range`?
pub fn has_overlap(book: &ResourceBook, range: DateRange, exclude: Option<Ulid>) -> bool {
    book.active_overlapping(range, exclude).next().is_some()
}

/// Overlap gate for writes. The caller must hold the book's write lock and keep
/// it until the dependent insert is applied.
pub(crate) fn check_no_overlap(
    book: &ResourceBook,
    range: DateRange,
    exclude: Option<Ulid>,
) -> Result<(), EngineError> {
    match book.active_overlapping(range, exclude).next() {
        Some(existing) => Err(EngineError::ResourceUnavailable {
            resource_id: book.resource_id.clone(),
            conflicting: existing.id,
        }),
        None => Ok(()),
    }
}
