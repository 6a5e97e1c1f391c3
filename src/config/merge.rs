//! Merge rules: defaults first, then the file, then the environment.

use config::builder::DefaultState;
use config::{Config, ConfigBuilder, ConfigError};

/// Create a Config builder with the engine defaults applied.
pub fn builder_with_defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("lazy.throw_on_cycle", true)?
        .set_default("lazy.collect", false)?
        .set_default("subscriptions.deliver_empty", false)?
        .set_default("propagation.log_keys", false)?
        .set_default("logging.level", "info")?
        .set_default("logging.format", "text")?
        .set_default("logging.output", "stderr")
}
