//! ABOUTME: Tracing subscriber setup for the frigem binary
//! ABOUTME: frigem crates log at the configured level while dependencies stay at warn

use std::sync::Once;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

static INIT: Once = Once::new();

/// Log targets of the frigem crates; every other target is held at `warn`
pub const FRIGEM_TARGETS: &[&str] = &["frigem", "fg_core", "fg_config", "fg_frigate", "fg_ai", "fg_bridge"];

/// How log lines are rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// JSON in production, human readable anywhere else
    pub fn for_environment(environment: &str) -> Self {
        if environment.eq_ignore_ascii_case("production") {
            LogFormat::Json
        } else {
            LogFormat::Pretty
        }
    }
}

/// Filter directives putting the frigem crates at `level`.
///
/// Keeps reqwest, hyper and rumqttc chatter out of `debug` output.
pub fn default_directives(level: &str) -> String {
    std::iter::once("warn".to_string())
        .chain(FRIGEM_TARGETS.iter().map(|target| format!("{}={}", target, level)))
        .collect::<Vec<_>>()
        .join(",")
}

fn env_filter(level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(default_directives(level)))
        .unwrap_or_else(|_| EnvFilter::new(default_directives("info")))
}

/// Initialize tracing - safe to call multiple times. `RUST_LOG` wins over `level` when set.
pub fn init_tracing(format: LogFormat, level: &str) {
    INIT.call_once(|| {
        let registry = tracing_subscriber::registry().with(env_filter(level));
        match format {
            LogFormat::Json => registry.with(fmt::layer().json()).init(),
            LogFormat::Pretty => registry.with(fmt::layer().pretty()).init(),
        }

        tracing::info!(format = ?format, level = %level, "Tracing initialized");
    });
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_follows_environment() {
        assert_eq!(LogFormat::for_environment("production"), LogFormat::Json);
        assert_eq!(LogFormat::for_environment("Production"), LogFormat::Json);
        assert_eq!(LogFormat::for_environment("development"), LogFormat::Pretty);
        assert_eq!(LogFormat::for_environment(""), LogFormat::Pretty);
    }

    #[test]
    fn test_directives_scope_level_to_frigem_crates() {
        let directives = default_directives("debug");

        assert!(directives.starts_with("warn,"));
        assert!(directives.contains("frigem=debug"));
        assert!(directives.contains("fg_bridge=debug"));
        assert!(!directives.contains("rumqttc"));
        assert!(EnvFilter::try_new(&directives).is_ok());
    }

    #[test]
    fn test_init_tracing_idempotent() {
        init_tracing(LogFormat::Pretty, "debug");
        init_tracing(LogFormat::Json, "info");
    }
}
