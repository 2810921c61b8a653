// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Plexsphere Inc.

//! plexd: Plexsphere node agent.

use tracing::error;
use tracing_subscriber::EnvFilter;

use plexd_daemon::{lifecycle, Config};

fn init_tracing(config: &Config) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if let Some(path) = &config.log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let file = path.file_name().map(|f| f.to_owned()).unwrap_or_else(|| "plexd.log".into());
        let appender = tracing_appender::rolling::never(dir, file);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(writer).with_ansi(false).init();
        Some(guard)
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
        None
    }
}

#[tokio::main]
async fn main() {
    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("plexd: {e}");
            std::process::exit(2);
        }
    };

    let _log_guard = init_tracing(&config);

    if let Err(e) = lifecycle::run(config).await {
        error!(error = %e, "plexd exiting on fatal error");
        std::process::exit(1);
    }
}
