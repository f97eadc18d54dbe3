//! Process-wide settings.
//!
//! Everything is read from environment variables with sensible defaults so a
//! bare `maestro run` works against local providers.  The binary loads one
//! [`Settings`] at startup and passes handles down through construction —
//! there are no module-level globals.

mod schema;

pub use schema::{HttpPoolSettings, ProviderSettings, Quotas, RetrySettings, Settings};

/// Load settings from the process environment.
pub fn load() -> anyhow::Result<Settings> {
    Settings::from_lookup(|key| std::env::var(key).ok())
}
