//! Synthetic hardware id announced to the backend.
//!
//! Same layout as the web reader's id: host OS, browser fields and a canvas
//! fingerprint. Browser fields and fingerprint are fixed placeholders.

use std::sync::LazyLock;

/// Placeholder fingerprint; sliced into the id segments.
const FINGERPRINT: &str = "ABCDEFGHIJKLMNOPQR";

const ENGINE_ID: &str = "x";
const BROWSER_ID: &str = "xx";
const VERSION_ID: &str = "00";

static HARDWARE_ID: LazyLock<String> = LazyLock::new(|| build_hardware_id(std::env::consts::OS));

/// Returns the process-wide hardware id, computed on first use.
pub fn hardware_id() -> &'static str {
    &HARDWARE_ID
}

/// Maps an OS family name to its single-character id.
fn os_id(os: &str) -> &'static str {
    match os {
        "windows" => "1",
        "macos" => "2",
        "linux" => "3",
        _ => "x",
    }
}

/// Lays out `OEBBF-VVFFF-FFFFF-FFFFF-FFFFh`.
fn build_hardware_id(os: &str) -> String {
    format!(
        "{}{}{}{}-{}{}-{}-{}-{}h",
        os_id(os),
        ENGINE_ID,
        BROWSER_ID,
        &FINGERPRINT[0..1],
        VERSION_ID,
        &FINGERPRINT[1..4],
        &FINGERPRINT[4..9],
        &FINGERPRINT[9..14],
        &FINGERPRINT[14..18],
    )
}
