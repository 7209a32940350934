use super::{Config, ConfigError};
use url::Url;

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        Url::parse(&self.data_plane_url).map_err(|e| {
            ConfigError::InvalidUrl(format!(
                "Invalid data plane URL '{}': {}",
                self.data_plane_url, e
            ))
        })?;

        if self.write_key.is_empty() {
            return Err(ConfigError::InvalidConfig(
                "Write key must not be empty".to_string(),
            ));
        }

        if self.max_payload_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max payload size must be greater than 0".to_string(),
            ));
        }

        if self.max_batch_size == 0 {
            return Err(ConfigError::InvalidConfig(
                "Max batch size must be greater than 0".to_string(),
            ));
        }

        if self.upload_timeout_secs == 0 || self.connection_timeout_secs == 0 {
            return Err(ConfigError::InvalidConfig(
                "Timeouts must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Config {
        Config {
            write_key: "wk".to_string(),
            ..Config::default()
        }
    }

    #[test]
    fn empty_write_key_is_rejected() {
        let config = Config::default();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidConfig(_))
        ));
    }

    #[test]
    fn bad_url_is_rejected() {
        let config = Config {
            data_plane_url: "not a url".to_string(),
            ..valid()
        };
        assert!(matches!(config.validate(), Err(ConfigError::InvalidUrl(_))));
    }

    #[test]
    fn zero_sizes_are_rejected() {
        let config = Config {
            max_payload_size: 0,
            ..valid()
        };
        assert!(config.validate().is_err());

        let config = Config {
            max_batch_size: 0,
            ..valid()
        };
        assert!(config.validate().is_err());
    }
}
