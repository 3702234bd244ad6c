use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::Opts;

pub(crate) fn setup_logging(opts: &Opts) {
    let verbose_level = i64::from(opts.verbose) - i64::from(opts.quiet);

    let log_level = match verbose_level {
        -2 => Level::ERROR,
        -1 => Level::WARN,
        0 => Level::INFO,
        1 => Level::DEBUG,
        x if x > 1 => Level::TRACE,
        // Silent.
        _ => return,
    };

    FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
    tracing::debug!("Log Level: {log_level}");
}
