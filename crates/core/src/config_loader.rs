use std::path::Path;

use figment::{
    providers::{Env, Format, Toml},
    Figment,
};

use crate::config::AppConfig;
use crate::error::ConfigError;

/// Environment variable prefix; nested keys are separated by `__`
/// (e.g. `STRANGLE_BROKER__PASSWORD`).
pub const ENV_PREFIX: &str = "STRANGLE_";

pub struct ConfigLoader;

impl ConfigLoader {
    /// Loads configuration by merging the TOML file with environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be read or parsed, or if the
    /// merged configuration fails validation.
    pub fn load(path: impl AsRef<Path>) -> Result<AppConfig, ConfigError> {
        Self::load_with_profile(path, None)
    }

    /// Loads configuration with an optional profile overlay.
    ///
    /// The overlay lives next to the base file as `<stem>.<profile>.toml`.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be read or parsed, or if the
    /// merged configuration fails validation.
    pub fn load_with_profile(
        path: impl AsRef<Path>,
        profile: Option<&str>,
    ) -> Result<AppConfig, ConfigError> {
        let config = Self::figment(path.as_ref(), profile).extract::<AppConfig>()?;
        config.validate()?;
        Ok(config)
    }

    fn figment(path: &Path, profile: Option<&str>) -> Figment {
        let mut figment = Figment::new().merge(Toml::file(path));

        if let Some(profile) = profile {
            let stem = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or("Config");
            let overlay = path.with_file_name(format!("{stem}.{profile}.toml"));
            figment = figment.merge(Toml::file(overlay));
        }

        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }
}
