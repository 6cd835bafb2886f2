pub mod capacity;
pub mod soak;

use indicatif::{ProgressBar, ProgressStyle};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tsb_store::{Logger, Store, StoreConfig, BYTES_IN_MIB};

pub const EXIT_SUCCESS: u8 = 0;
pub const EXIT_FAILURE: u8 = 1;
pub const EXIT_STORE_ERROR: u8 = 3;

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);

/// First Ctrl-C stops after the current segment; a second one exits at once.
pub fn install_signal_handler() {
    let _ = ctrlc::set_handler(move || {
        if SHUTDOWN_REQUESTED.load(Ordering::SeqCst) {
            std::process::exit(i32::from(EXIT_FAILURE));
        }
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        eprintln!("\nshutdown requested, finishing current segment...");
    });
}

pub fn shutdown_requested() -> bool {
    SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
}

/// Store events reach the terminal through the `tracing` subscriber set up in
/// `main`, so no client callback is installed.
pub fn open_store(config: &StoreConfig) -> Result<Store, String> {
    Store::new(config, Logger::tracing_only()).map_err(|e| format!("store error: {e}"))
}

pub fn json_pretty(value: &impl serde::Serialize) -> Result<String, String> {
    serde_json::to_string_pretty(value).map_err(|e| format!("JSON serialization failed: {e}"))
}

pub fn progress_bar(len: u64, msg: &str) -> ProgressBar {
    let pb = ProgressBar::new(len);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg} [{bar:32.cyan/blue}] {pos}/{len}")
            .expect("valid template")
            .progress_chars("=> ")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    pb.set_message(msg.to_owned());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

pub fn finish_ok(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✓ {msg}"));
}

pub fn finish_fail(pb: &ProgressBar, msg: &str) {
    pb.set_style(ProgressStyle::with_template("{msg}").expect("valid template"));
    pb.finish_with_message(format!("✗ {msg}"));
}

/// Bold label for human-readable key/value output.
pub fn label(text: &str) -> String {
    console::Style::new().bold().apply_to(text).to_string()
}

/// `1048576` -> `"1.0 MiB"`. Values below one MiB are shown in bytes.
pub fn format_bytes(bytes: u64) -> String {
    if bytes < BYTES_IN_MIB {
        format!("{bytes} B")
    } else if bytes < 1024 * BYTES_IN_MIB {
        format!("{:.1} MiB", bytes as f64 / BYTES_IN_MIB as f64)
    } else {
        format!("{:.1} GiB", bytes as f64 / (1024 * BYTES_IN_MIB) as f64)
    }
}
