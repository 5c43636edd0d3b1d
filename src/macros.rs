/// Like `tracing::info!`, but also records how long it took from a starting time to now.
/// The starting time is a `chrono::DateTime<Local>`.
/// ```ignore
/// let time = Local::now();
/// info_time!(time, page = 3, "Processed page");
/// ```
#[macro_export]
macro_rules! info_time {
    ($time:expr, $($arg:tt)+) => {{
        let run_time = (::chrono::Local::now() - $time)
            .num_microseconds()
            .map(|n| n as f64 / 1_000_000.0)
            .unwrap_or(0.0);
        ::tracing::info!(run_time_secs = run_time, $($arg)+);
    }};
}
