//! Trace utilities

/// Trace category for the capture pipeline.
pub const CAPTURE: &str = "capture";
/// Trace category for effect comparison.
pub const COMPARE: &str = "compare";
/// Trace category for test registration.
pub const REGISTRY: &str = "registry";
/// Trace category for the run loop.
pub const RUNNER: &str = "runner";
