use std::path::Path;

use tracing::subscriber::set_global_default;
use tracing::Subscriber;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_log::LogTracer;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{EnvFilter, Registry};

use crate::config::LoggingConfig;

/// Human-readable records on stdout, plus JSON records in
/// `logging.json_file` when set. `RUST_LOG` overrides the configured level.
/// The guard must outlive the run or buffered file records are lost.
pub fn get_subscriber(logging: &LoggingConfig) -> (impl Subscriber + Send + Sync, Option<WorkerGuard>) {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));
    let fmt_layer = tracing_subscriber::fmt::Layer::new().with_target(false);

    let (json_layer, guard) = match &logging.json_file {
        Some(path) => {
            let dir = path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or(Path::new("."));
            let file = path.file_name().map_or_else(|| "vfvm.log".into(), |f| f.to_os_string());
            let appender = tracing_appender::rolling::never(dir, file);
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(tracing_subscriber::fmt::Layer::new().with_writer(writer).json()),
                Some(guard),
            )
        }
        None => (None, None),
    };

    (Registry::default().with(env_filter).with(fmt_layer).with(json_layer), guard)
}

pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) -> color_eyre::Result<()> {
    LogTracer::init()?;
    set_global_default(subscriber)?;
    Ok(())
}
