/// Max bytes for patient, provider and mode text.
pub const MAX_NAME_LEN: usize = 256;

/// Longest bookable appointment.
pub const MAX_DURATION_MINUTES: u32 = 24 * 60;

/// Max appointments held by one store.
pub const MAX_APPOINTMENTS: usize = 1_000_000;

/// Max bincode payload of one WAL record. Larger length prefixes are corruption.
pub const MAX_WAL_RECORD_LEN: usize = 64 * 1024;

/// Max bytes in one protocol request line.
pub const MAX_LINE_LEN: usize = 64 * 1024;

pub const MAX_IDEMPOTENCY_KEY_LEN: usize = 128;

/// Max entries kept in the idempotency cache before new keys are refused.
pub const MAX_IDEMPOTENCY_ENTRIES: usize = 100_000;
