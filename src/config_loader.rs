use crate::config::Config;
use color_eyre::eyre::WrapErr;
use color_eyre::Result;
use log::info;
use std::fs::File;
use std::path::Path;

/// Load, parse and validate a YAML configuration file
pub fn load_config(config_path: &Path) -> Result<Config> {
    info!("Loading configuration from: {:?}", config_path);

    let file = File::open(config_path)
        .wrap_err_with(|| format!("Failed to open configuration {}", config_path.display()))?;

    let config: Config = serde_yaml::from_reader(file)
        .wrap_err_with(|| format!("Failed to parse configuration {}", config_path.display()))?;

    config.validate()?;

    info!(
        "Configuration covers {}-{} with networks {:?}",
        config.years.start, config.years.end, config.networks.enabled
    );
    Ok(config)
}

/// Load `config_path` when given, otherwise fall back to the defaults
pub fn load_or_default(config_path: Option<&Path>) -> Result<Config> {
    match config_path {
        Some(path) => load_config(path),
        None => {
            info!("No configuration file given; using defaults");
            Ok(Config::default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_load_config_validates() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "years:\n  start: 2010\n  end: 2012").unwrap();
        let config = load_config(file.path()).unwrap();
        assert_eq!(config.years.years(), vec![2010, 2011, 2012]);

        let mut invalid = NamedTempFile::new().unwrap();
        writeln!(invalid, "gmm:\n  lags: 0").unwrap();
        assert!(load_config(invalid.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(&dir.path().join("absent.yaml")).is_err());
        assert_eq!(load_or_default(None).unwrap(), Config::default());
    }
}
