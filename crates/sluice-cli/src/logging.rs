//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Level priority:
//! 1. `--log-level` flag (if provided)
//! 2. `SLUICE_LOG` environment variable (e.g. "info", "debug")
//! 3. default to `info`

/// Initialise the global subscriber. Call once at startup.
pub fn init_logging(cli_level: Option<&str>) {
    let level = cli_level
        .and_then(parse_level)
        .or_else(|| {
            std::env::var("SLUICE_LOG")
                .ok()
                .and_then(|s| parse_level(&s))
        })
        .unwrap_or(tracing::Level::INFO);

    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn parse_level(raw: &str) -> Option<tracing::Level> {
    match raw.trim().to_lowercase().as_str() {
        "error" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_levels_parse() {
        assert_eq!(parse_level("debug"), Some(tracing::Level::DEBUG));
        assert_eq!(parse_level("WARNING"), Some(tracing::Level::WARN));
        assert_eq!(parse_level(" info "), Some(tracing::Level::INFO));
        assert_eq!(parse_level("verbose"), None);
    }
}
