//! Internal engine diagnostics (§9a), named `diag` at the module's use sites.
//!
//! Generalized from the teacher's `utils::debug::debug_log` family: that
//! module wrote "LOGLY"-branded lines to a dedicated debug file gated by a
//! global `internal_debug` flag. This core instead emits through `tracing`
//! (the same crate the teacher already pulls in for its own layering), so
//! diagnostics compose with whatever subscriber the host process installs
//! rather than owning a private log file. The message shapes for the two
//! conspicuous cases named in §6/§7 — compression-queue saturation and
//! adaptive threshold increases — are centralised here so every call site
//! produces identical text.

use crate::utils::size::format_size;

/// Emits the CRITICAL compression-queue-saturation diagnostic (§4.7 step 1).
pub fn compression_queue_critical(sink_name: &str, depth: usize, threshold: u64) {
    tracing::error!(
        sink = sink_name,
        depth,
        current_max_size = %format_size(threshold),
        "CRITICAL: compression queue saturated for sink '{sink_name}' (depth={depth}); \
         blocking until it drains"
    );
}

/// Emits the soft-warning diagnostic when queue depth crosses `Q_warn`.
pub fn compression_queue_warning(sink_name: &str, depth: usize, warn_threshold: usize) {
    tracing::warn!(
        sink = sink_name,
        depth,
        warn_threshold,
        "compression queue for sink '{sink_name}' crossed the soft-warning depth"
    );
}

/// Emits the ADAPTIVE INCREASE diagnostic (§4.7 step 4) to `tracing`. The
/// byte-level audit block written into the new active file (§6) is produced
/// separately by `backend::rotating_sink`; this is the out-of-band stderr
/// twin §7 requires ("surfaced via a CAPITALISED diagnostic both to standard
/// error and as an audit record in the output log file").
pub fn adaptive_increase(sink_name: &str, old_max: u64, new_max: u64) {
    tracing::error!(
        sink = sink_name,
        old_max_size = %format_size(old_max),
        new_max_size = %format_size(new_max),
        "ADAPTIVE INCREASE: doubled rotation threshold for sink '{sink_name}' from {} to {} \
         due to compression overload",
        format_size(old_max),
        format_size(new_max),
    );
}

/// Reports a transient I/O failure caught at a sink boundary (§7
/// "Propagation" — never returned to the caller, only reported and counted).
pub fn sink_io_failure(sink_name: &str, operation: &str, error: &std::io::Error) {
    tracing::error!(
        sink = sink_name,
        operation,
        error = %error,
        "I/O failure in sink '{sink_name}' during {operation}: {error}"
    );
}
