use std::path::Path;

use anyhow::Result;
use once_cell::sync::OnceCell;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_error::ErrorLayer;
use tracing_log::LogTracer;
use tracing_subscriber::filter::{LevelFilter, Targets};
use tracing_subscriber::layer::Layered;
use tracing_subscriber::reload;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, layer::SubscriberExt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;
use crate::targets::{ALL, T_MESH, T_NET, T_WIFI};

type FilteredRegistry = Layered<reload::Layer<EnvFilter, Registry>, Registry>;
type BoxedLayer = Box<dyn Layer<FilteredRegistry> + Send + Sync>;

static RELOAD: OnceCell<reload::Handle<EnvFilter, Registry>> = OnceCell::new();

/// Keeps the non-blocking file writers alive; dropping it flushes them.
pub struct LoggingGuards {
    _file_guards: Vec<WorkerGuard>,
}

pub fn init(component: &str, root: &Path, cfg: &LoggingConfig) -> Result<LoggingGuards> {
    let (filter_layer, handle) = reload::Layer::new(build_filter(cfg));
    let _ = RELOAD.set(handle);

    let mut layers: Vec<BoxedLayer> = Vec::new();
    let mut guards = Vec::new();
    let mut warn_msg: Option<String> = None;

    // Command output goes to stdout, so console logging stays on stderr.
    layers.push(
        fmt::layer()
            .with_target(true)
            .with_level(true)
            .with_line_number(true)
            .with_writer(std::io::stderr)
            .compact()
            .boxed(),
    );

    if cfg.enabled && cfg.file_logging {
        let log_dir = root.join("logs");
        match std::fs::create_dir_all(&log_dir) {
            Ok(()) => {
                let (layer, guard) = file_layer(&log_dir, &component_log_name(component), component_targets());
                layers.push(layer);
                guards.push(guard);

                for (filename, target) in [
                    ("wifi.log", T_WIFI),
                    ("net.log", T_NET),
                    ("mesh.log", T_MESH),
                ] {
                    let targets = Targets::new().with_target(target, LevelFilter::TRACE);
                    let (layer, guard) = file_layer(&log_dir, filename, targets);
                    layers.push(layer);
                    guards.push(guard);
                }
            }
            Err(err) => {
                warn_msg = Some(format!(
                    "File logging disabled ({}): {}",
                    log_dir.display(),
                    err
                ));
            }
        }
    }

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(layers)
        .with(ErrorLayer::default())
        .try_init()
        .ok();
    let _ = LogTracer::init();

    if let Some(message) = warn_msg {
        tracing::warn!("{message}");
    }

    Ok(LoggingGuards {
        _file_guards: guards,
    })
}

/// Swaps the active filter for one built from `cfg`.
pub fn apply(cfg: &LoggingConfig) -> Result<()> {
    let handle = RELOAD
        .get()
        .ok_or_else(|| anyhow::anyhow!("logging not initialized"))?;
    handle.reload(build_filter(cfg))?;
    Ok(())
}

fn build_filter(cfg: &LoggingConfig) -> EnvFilter {
    if !cfg.enabled {
        return EnvFilter::new("off");
    }
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return filter;
    }
    EnvFilter::try_new(cfg.level.clone()).unwrap_or_else(|_| EnvFilter::new("info"))
}

fn component_log_name(component: &str) -> String {
    format!("{component}.log")
}

/// The component file gets everything that is not routed to a subsystem file.
fn component_targets() -> Targets {
    ALL.iter().fold(
        Targets::new().with_default(LevelFilter::TRACE),
        |targets, target| targets.with_target(*target, LevelFilter::OFF),
    )
}

fn file_layer(log_dir: &Path, filename: &str, targets: Targets) -> (BoxedLayer, WorkerGuard) {
    let appender = tracing_appender::rolling::daily(log_dir, filename);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .compact()
        .with_writer(writer)
        .with_filter(targets)
        .boxed();
    (layer, guard)
}
