//! Hard input limits. Anything above these is rejected with `LimitExceeded`.

/// Longest single reservation, in days.
pub const MAX_RESERVATION_DAYS: i64 = 366;

/// Max byte length of resource and party identifiers.
pub const MAX_ID_LEN: usize = 128;

/// Max byte length of a rejection reason.
pub const MAX_REASON_LEN: usize = 1024;

/// Max reservations (of any status) tracked per resource.
pub const MAX_RESERVATIONS_PER_RESOURCE: usize = 100_000;

/// Earliest accepted date, as (year, month, day).
pub const MIN_VALID_DATE: (i32, u32, u32) = (2000, 1, 1);

/// Latest accepted date, as (year, month, day).
pub const MAX_VALID_DATE: (i32, u32, u32) = (2100, 1, 1);
