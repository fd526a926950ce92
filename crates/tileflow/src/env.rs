//! Process-wide overrides of allocation defaults.

use std::env;
use std::sync::OnceLock;

/// A truthy value makes [`crate::AllocateOptions::default`] give every shared
/// and register tensor a slot of its own.
pub(crate) const NO_SLOT_REUSE: &str = "TILEFLOW_NO_SLOT_REUSE";

static SLOT_REUSE: OnceLock<bool> = OnceLock::new();

/// Default of [`crate::AllocateOptions::reuse_slots`], read once per process.
pub(crate) fn default_slot_reuse() -> bool {
    *SLOT_REUSE.get_or_init(|| slot_reuse_for(env::var(NO_SLOT_REUSE).ok().as_deref()))
}

/// Reuse stays on unless the flag holds `1`, `true`, `yes` or `on`.
fn slot_reuse_for(flag: Option<&str>) -> bool {
    let Some(flag) = flag else {
        return true;
    };
    let flag = flag.trim().to_ascii_lowercase();
    !matches!(flag.as_str(), "1" | "true" | "yes" | "on")
}
