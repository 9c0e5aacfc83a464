// SPDX-License-Identifier: MIT

use std::path::Path;

use handover::{Config, Result};

/// `CONFIG_FILE` if set, else `settings.toml` in the working directory if it
/// exists, else the defaults.
pub(crate) fn load() -> Result<Config> {
    match std::env::var("CONFIG_FILE") {
        Err(_) => {
            if Path::new("settings.toml").exists() {
                Config::from_file(Path::new("settings.toml"))
            } else {
                Ok(Config::default())
            }
        }
        Ok(settings_file) => {
            log::debug!("loading configuration from {settings_file}");
            Config::from_file(Path::new(&settings_file))
        }
    }
}
