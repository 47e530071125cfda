//! Tracing initialization: stderr console plus an optional rotating file.

use std::path::Path;

use tracing_subscriber::EnvFilter;

use crate::cli::FILE_GUARD;

pub fn init_tracing(json: bool, level: &str, file: Option<&Path>) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(level.to_string()));

    if let Some(path) = file {
        let dir = path.parent().unwrap_or_else(|| Path::new("."));
        let name = path.file_name().map_or_else(
            || "posture.log".to_string(),
            |n| n.to_string_lossy().into_owned(),
        );
        let appender = tracing_appender::rolling::daily(dir, name);
        let (writer, guard) = tracing_appender::non_blocking(appender);
        let _ = FILE_GUARD.set(guard);
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(writer)
            .json()
            .init();
        return;
    }

    if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .compact()
            .init();
    }
}
