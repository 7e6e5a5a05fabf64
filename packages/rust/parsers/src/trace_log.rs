//! Tracer stderr scanning.

/// Find the trace file announced on the tracer's stderr
/// (`apitrace: tracing to /tmp/app/triangle.trace`).
pub fn find_trace_file(stderr: &str) -> Option<String> {
    stderr
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with("apitrace:") && line.contains("tracing to"))
        .and_then(|line| line.split_whitespace().last())
        .map(str::to_string)
}
