use chrono::NaiveDateTime;

use crate::model::*;

/// Half-open intersection test for `[start_a, start_a + duration_a)` and
/// `[start_b, start_b + duration_b)`. Total: zero durations never overlap.
pub fn overlaps(
    start_a: NaiveDateTime,
    duration_a: u32,
    start_b: NaiveDateTime,
    duration_b: u32,
) -> bool {
    start_a < end_of(start_b, duration_b) && end_of(start_a, duration_a) > start_b
}

/// First active appointment of `provider_name` whose interval overlaps the candidate.
///
/// `existing` is scanned in the order given; the store hands it over sorted by
/// start then insertion, which makes the reported conflict deterministic.
pub fn find_conflict<'a, I>(
    provider_name: &str,
    start: NaiveDateTime,
    duration_minutes: u32,
    existing: I,
) -> Option<&'a Appointment>
where
    I: IntoIterator<Item = &'a Appointment>,
{
    existing.into_iter().find(|a| {
        a.provider_name == provider_name
            && a.is_active()
            && overlaps(start, duration_minutes, a.start(), a.duration_minutes)
    })
}
