//! Logging setup shared by `ppcbc` and `ppcbs`. Both binaries want a
//! terminal logger writing to stderr; stdout on the server is reserved
//! for the received payload bytes.

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

/// Builds the root logger: a `sloggers` terminal logger from an inline
/// config rather than wiring up a config file, since there is nothing
/// here that needs to vary at runtime.
pub fn init() -> Logger {
    use sloggers::Config;

    let config: sloggers::LoggerConfig = serdeconv::from_toml_str(
        r#"
type = "terminal"
level = "info"
destination = "stderr"
"#,
    )
    .expect("built-in logging config must parse");

    config.build_logger().expect("failed to build logger")
}

/// A logger that discards everything, for use in tests and library
/// callers that don't want to wire up a real sink.
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}
