//! Metric label keys and fixed values

/// Error category, see [`crate::Error::category`]
pub const CATEGORY: &str = "category";

/// Command name (uppercased)
pub const COMMAND: &str = "command";

/// Error category recorded when no URL is configured
pub const CATEGORY_CONFIG: &str = "config";
