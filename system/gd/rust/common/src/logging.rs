/// Environment variable holding the level for the `bluetooth_core` tag.
pub const LOG_LEVEL_ENV: &str = "BT_LOG_LEVEL";

/// Maps a textual tag level to a log filter. Unknown values fall back to info.
pub fn level_from_tag_value(value: &str) -> log::LevelFilter {
    match value.trim().to_ascii_lowercase().as_str() {
        "fatal" | "error" => log::LevelFilter::Error,
        "warn" => log::LevelFilter::Warn,
        "notice" | "info" => log::LevelFilter::Info,
        "debug" => log::LevelFilter::Debug,
        "verbose" => log::LevelFilter::Trace,
        _ => log::LevelFilter::Info, // default level
    }
}

fn get_log_level() -> log::LevelFilter {
    match std::env::var(LOG_LEVEL_ENV) {
        Ok(value) => level_from_tag_value(&value),
        Err(_) => log::LevelFilter::Info,
    }
}

/// Inits logging for Android
#[cfg(target_os = "android")]
pub fn init_logging() {
    android_logger::init_once(
        android_logger::Config::default().with_tag("bt").with_max_level(get_log_level()),
    );
    log::set_max_level(get_log_level())
}

/// Inits logging for host
#[cfg(not(target_os = "android"))]
pub fn init_logging() {
    env_logger::Builder::new().filter(None, get_log_level()).parse_default_env().try_init().ok();
    log::set_max_level(get_log_level())
}
