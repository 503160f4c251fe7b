/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Optimistic concurrency token carried by every stored record.
///
/// A record that has never been persisted has version `0`; the store
/// assigns `1` on insert and increments on every conditional write.
pub type Version = i64;
