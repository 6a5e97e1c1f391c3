//! Config sources: an explicit TOML file and `SKSTORE__*` environment variables.

use config::builder::DefaultState;
use config::{ConfigBuilder, ConfigError, Environment, File, FileFormat};
use std::path::Path;

/// Prefix of environment overrides, e.g. `SKSTORE__LAZY__THROW_ON_CYCLE=false`.
pub const ENV_PREFIX: &str = "SKSTORE";

/// Add a TOML file source. The file must exist.
pub fn add_file(
    builder: ConfigBuilder<DefaultState>,
    path: &Path,
) -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    if !path.exists() {
        return Err(ConfigError::Message(format!(
            "Configuration file not found: {}",
            path.display()
        )));
    }
    let path = path
        .to_str()
        .ok_or_else(|| ConfigError::Message(format!("Non UTF-8 config path: {}", path.display())))?;
    Ok(builder.add_source(File::new(path, FileFormat::Toml).required(true)))
}

/// Add environment overrides. Nested keys are separated by `__`.
pub fn add_environment(builder: ConfigBuilder<DefaultState>) -> ConfigBuilder<DefaultState> {
    builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("__")
            .separator("__")
            .try_parsing(true),
    )
}
