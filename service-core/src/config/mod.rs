use crate::error::AppError;
use config::{Config, Environment, File};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};

/// Environment variable prefix shared by every marketplace binary.
pub const ENV_PREFIX: &str = "APP";

/// Load settings for the crate named `crate_dir`.
///
/// Reads `config/base.yaml` (relative to the crate directory, whether the
/// process was started from the workspace root or from the crate itself), then
/// overlays `APP__SECTION__KEY` environment variables. A `.env` file is
/// honoured if present.
pub fn load_settings<T: DeserializeOwned>(crate_dir: &str) -> Result<T, AppError> {
    dotenvy::dotenv().ok();

    let base_path = std::env::current_dir()?;
    load_from(&configuration_directory(&base_path, crate_dir), ENV_PREFIX)
}

/// Load settings from an explicit directory and environment prefix.
pub fn load_from<T: DeserializeOwned>(directory: &Path, env_prefix: &str) -> Result<T, AppError> {
    let settings = Config::builder()
        .add_source(File::from(directory.join("base.yaml")).required(false))
        .add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;

    Ok(settings.try_deserialize::<T>()?)
}

fn configuration_directory(base_path: &Path, crate_dir: &str) -> PathBuf {
    if base_path.ends_with(crate_dir) {
        base_path.join("config")
    } else {
        base_path.join(crate_dir).join("config")
    }
}
