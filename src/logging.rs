use slog::{Drain, Logger};

/// Builds the root logger. Mirrors the teacher's `main.rs` boot sequence:
/// human-readable terminal output in development, structured JSON when
/// `RUST_ENV=production` (or any value other than "development"), always
/// wrapped in `slog_async` so logging never blocks the calling thread.
pub fn build(quiet: bool, async_drain: bool) -> Logger {
    let env = std::env::var("RUST_ENV").unwrap_or_else(|_| "development".to_owned());

    if quiet {
        return Logger::root(slog::Discard, o!());
    }

    if env == "production" {
        let drain = slog_json::Json::default(std::io::stdout()).fuse();
        return finish(drain, async_drain);
    }

    let decorator = slog_term::TermDecorator::new().build();
    let drain = slog_term::FullFormat::new(decorator).build().fuse();
    finish(drain, async_drain)
}

fn finish<D>(drain: D, async_drain: bool) -> Logger
where
    D: Drain<Ok = (), Err = slog::Never> + Send + 'static,
{
    if async_drain {
        let drain = slog_async::Async::new(drain).build().fuse();
        Logger::root(drain, o!())
    } else {
        let drain = std::sync::Mutex::new(drain).fuse();
        Logger::root(drain, o!())
    }
}

/// Prints an error and its causal chain to the log, same shape as the
/// teacher's `error_helpers::print_error`.
pub fn print_error(log: &Logger, error: &crate::errors::Error) {
    let strings = crate::errors::error_chain_strings(error);
    error!(log, "Error: {}", strings[0]);
    for s in strings.iter().skip(1) {
        error!(log, "Caused by: {}", s);
    }
}
