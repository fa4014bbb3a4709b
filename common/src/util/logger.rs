use std::io::Write;

/// Installs the global logger with `default_filter` unless `RUST_LOG` is set.
pub fn init(default_filter: &str) {
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    builder.format(|buf, record| {
        writeln!(
            buf,
            "[{:<5} {}] {}",
            record.level(),
            record.target(),
            record.args()
        )
    });
    // A second call (tests, embedding) keeps the first logger.
    let _ = builder.try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_init_keeps_the_first_logger() {
        init("debug");
        init("info");
        log::info!("logger still installed");
    }
}
