// Modular telemetry library with folder-based feature gating. Binaries
// enable only the modules they need; `full` turns everything on.

#[cfg(feature = "context")]
pub mod context;

#[cfg(feature = "loggers")]
pub mod loggers;

#[cfg(feature = "models")]
pub mod models;

#[cfg(feature = "quota")]
pub mod quota;

#[cfg(feature = "stores")]
pub mod stores;

#[cfg(feature = "trackers")]
pub mod trackers;
