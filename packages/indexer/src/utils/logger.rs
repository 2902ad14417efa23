use tracing_subscriber::{fmt, EnvFilter};

/// Daemon default: sync progress at info, sqlx statement logs muted
pub const DAEMON_FILTER: &str = "info,sqlx=warn";
/// Report default: only problems, so the printed summary stays readable
pub const REPORT_FILTER: &str = "warn";

/// `RUST_LOG` when it parses, otherwise the binary's default directives
fn filter_from(env_value: Option<&str>, default_directives: &str) -> EnvFilter {
    env_value
        .and_then(|value| EnvFilter::try_new(value).ok())
        .unwrap_or_else(|| EnvFilter::new(default_directives))
}

pub fn init_logger(default_directives: &str) {
    let env_value = std::env::var(EnvFilter::DEFAULT_ENV).ok();

    fmt()
        .with_env_filter(filter_from(env_value.as_deref(), default_directives))
        .with_file(true)
        .with_line_number(true)
        .with_target(true)
        .with_ansi(true)
        .init();
}
