use log::{debug, LevelFilter};
use tracing_subscriber::filter::EnvFilter as TracingEnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::prelude::*;
use url::Url;

use crate::cli::command::Commands;
use crate::cli::Cli;

pub fn setup_logging(cli: Option<&Cli>) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let mut log_level = LevelFilter::Info;
    let mut loki_url: Option<String> = None;

    if let Some(cli) = cli {
        let Commands::Run {
            loki_url: cmd_loki_url,
            log_level: cmd_log_level,
            ..
        } = &cli.command;
        if let Some(url) = cmd_loki_url {
            loki_url = Some(url.clone());
        }
        if let Some(level) = cmd_log_level {
            log_level = level.parse()?;
        }
    }

    let env_filter = TracingEnvFilter::from_default_env()
        .add_directive(format!("{}", log_level).parse()?)
        .add_directive("reqwest=warn".parse()?)
        .add_directive("bollard=warn".parse()?);

    let fmt_layer = fmt::layer()
        .with_target(true)
        .with_level(true)
        .with_ansi(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_file(false)
        .with_line_number(false)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    if let Some(loki_url_str) = loki_url {
        let loki_url_parsed = Url::parse(&loki_url_str)?;

        let (loki_layer, task) = tracing_loki::builder()
            .label("app", "compute-agent")?
            .label("version", env!("CARGO_PKG_VERSION"))?
            .build_url(loki_url_parsed)?;

        tokio::spawn(task);
        registry.with(loki_layer).init();
        debug!("Logging to console and Loki at {}", loki_url_str);
    } else {
        registry.init();
    }

    Ok(())
}
