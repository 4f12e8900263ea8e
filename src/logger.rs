//! logger.rs
//! Logger setup using env_logger. The level comes from RUST_LOG.

pub fn init_logger(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp_secs()
        .init();
}
