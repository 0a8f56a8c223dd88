//! TOML file loading.

use std::path::Path;

use serde_json::{Map, Value};

use super::error::ConfigError;

/// Read a TOML file into a JSON object, keeping key order.
///
/// # Errors
///
/// [`ConfigError::UnresolvablePath`] if the file does not exist,
/// [`ConfigError::Parse`] if it is not a valid TOML table.
pub fn read_table(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    if !path.is_file() {
        return Err(ConfigError::UnresolvablePath {
            path: path.to_path_buf(),
            reason: "file not found".to_string(),
        });
    }

    let parse_error = |e: config::ConfigError| ConfigError::Parse {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    let source = config::Config::builder()
        .add_source(
            config::File::from(path)
                .format(config::FileFormat::Toml)
                .required(true),
        )
        .build()
        .map_err(parse_error)?;

    source.try_deserialize().map_err(parse_error)
}
