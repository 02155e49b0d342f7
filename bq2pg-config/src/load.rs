use serde::de::DeserializeOwned;
use std::path::Path;

use crate::environment::Environment;

/// Directory, relative to the working directory, holding the configuration files.
const CONFIGURATION_DIR: &str = "configuration";

/// File loaded for every environment before the environment specific one.
const BASE_CONFIG_FILE: &str = "base.yaml";

/// Prefix of environment variables overriding file values.
const ENV_PREFIX: &str = "APP";

const ENV_PREFIX_SEPARATOR: &str = "_";

/// Separator for nested keys, e.g. `APP_APPLICATION__PORT` sets `application.port`.
const ENV_SEPARATOR: &str = "__";

/// Loads configuration from the `configuration` directory of the current working directory.
///
/// Sources are layered in this order, later ones overriding earlier ones:
/// 1. `configuration/base.yaml`
/// 2. `configuration/{environment}.yaml`, where the environment comes from `APP_ENVIRONMENT`
/// 3. environment variables prefixed with `APP_`
pub fn load_config<T>() -> Result<T, config::ConfigError>
where
    T: DeserializeOwned,
{
    let base_path = std::env::current_dir()
        .map_err(|err| config::ConfigError::Foreign(Box::new(err)))?;

    load_config_from(&base_path.join(CONFIGURATION_DIR))
}

/// Same as [`load_config`] but reads the files from `configuration_directory`.
pub fn load_config_from<T>(configuration_directory: &Path) -> Result<T, config::ConfigError>
where
    T: DeserializeOwned,
{
    let environment =
        Environment::load().map_err(|err| config::ConfigError::Foreign(Box::new(err)))?;
    let environment_filename = format!("{environment}.yaml");

    let settings = config::Config::builder()
        .add_source(config::File::from(
            configuration_directory.join(BASE_CONFIG_FILE),
        ))
        .add_source(
            config::File::from(configuration_directory.join(environment_filename))
                .required(false),
        )
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator(ENV_PREFIX_SEPARATOR)
                .separator(ENV_SEPARATOR),
        )
        .build()?;

    settings.try_deserialize::<T>()
}
