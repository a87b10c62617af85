use tracing::Level;

pub fn level(log_level: &str) -> Level {
    match log_level {
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    }
}

/// Installs the JSON subscriber shared by the operator and the worker.
pub fn init(log_level: &str) {
    tracing_subscriber::FmtSubscriber::builder()
        .with_span_events(tracing_subscriber::fmt::format::FmtSpan::CLOSE)
        .with_max_level(level(log_level))
        .json()
        .init();
}
