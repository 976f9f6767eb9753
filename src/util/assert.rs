/// Panic with an internal assertion message when the condition is false.
///
/// Reserved for invariants that only a bug in this crate or its caller can
/// violate; recoverable conditions go through [`crate::error::SyncError`].
pub fn hard_assert(condition: bool, message: impl AsRef<str>) {
    if !condition {
        panic!("{}", assertion_error(message));
    }
}

/// Build the string used when raising assertion errors.
pub fn assertion_error(message: impl AsRef<str>) -> String {
    format!(
        "docsync ({}) INTERNAL ASSERT FAILED: {}",
        env!("CARGO_PKG_VERSION"),
        message.as_ref()
    )
}
