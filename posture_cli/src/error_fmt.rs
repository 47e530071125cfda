//! Error presentation and the stable exit-code mapping.

use posture_core::error::{EngineError, FrameError};
use posture_storage::StorageError;
use serde_json::json;

/// Exit codes: 2 config, 3 I/O, 4 storage, 5 malformed frames, 6 engine,
/// 1 everything else.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    for cause in err.chain() {
        if cause.downcast_ref::<toml::de::Error>().is_some() {
            return 2;
        }
        if cause.downcast_ref::<std::io::Error>().is_some() {
            return 3;
        }
        if cause.downcast_ref::<StorageError>().is_some() {
            return 4;
        }
        if cause.downcast_ref::<FrameError>().is_some() {
            return 5;
        }
        if cause.downcast_ref::<EngineError>().is_some() {
            return 6;
        }
    }
    1
}

pub fn humanize(err: &eyre::Report) -> String {
    let mut out = format!("error: {err}");
    for cause in err.chain().skip(1) {
        out.push_str(&format!("\n  caused by: {cause}"));
    }
    out
}

pub fn format_error_json(err: &eyre::Report) -> String {
    json!({
        "type": "error",
        "message": err.to_string(),
        "causes": err.chain().skip(1).map(|c| c.to_string()).collect::<Vec<_>>(),
        "exitCode": exit_code_for_error(err),
    })
    .to_string()
}
