//! Clock abstraction used by quotas and schedulers to measure reset windows.

/// Millisecond clock so window arithmetic can be faked in tests.
///
/// Readings only need to be monotonic within one clock; their origin is arbitrary.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;
}
