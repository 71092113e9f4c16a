use env_logger::Env;
use log::LevelFilter;
use once_cell::sync::OnceCell;

static LOG_LEVEL: OnceCell<LevelFilter> = OnceCell::new();

/// First value that names a level wins; `info` when none does.
fn first_level<'a>(values: impl IntoIterator<Item = Option<&'a str>>) -> LevelFilter {
    values
        .into_iter()
        .flatten()
        .find_map(|v| v.trim().parse().ok())
        .unwrap_or(LevelFilter::Info)
}

fn env_level() -> LevelFilter {
    let raindrop = std::env::var("RAINDROP_LOG").ok();
    let rust = std::env::var("RUST_LOG").ok();
    first_level([raindrop.as_deref(), rust.as_deref()])
}

/// Initialize stderr logging based on `RAINDROP_LOG`/`RUST_LOG` (default `info`).
///
/// Safe to call multiple times; the logger is installed on the first call and
/// the effective level is returned on every call.
pub fn init_logging() -> LevelFilter {
    *LOG_LEVEL.get_or_init(|| {
        let level = env_level();
        let env = Env::default().default_filter_or(level.as_str());
        // Another logger may already be installed (e.g. by a test harness).
        let _ = env_logger::Builder::from_env(env)
            .format_timestamp_millis()
            .format_module_path(true)
            .format_target(false)
            .try_init();
        level
    })
}

/// Same as [`init_logging`] but forces a level, ignoring the environment.
pub fn init_logging_with(level: LevelFilter) -> LevelFilter {
    *LOG_LEVEL.get_or_init(|| {
        let _ = env_logger::Builder::new()
            .filter_level(level)
            .format_timestamp_millis()
            .format_module_path(true)
            .try_init();
        level
    })
}
