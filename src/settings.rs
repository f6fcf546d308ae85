use config::{Config, ConfigError, File};
use serde::Deserialize;

#[derive(Clone, Debug, Deserialize)]
pub struct Database {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Gateway {
    pub url: String,
    pub api_token: String,
    /// Channel whose membership gates task submissions. `None` disables
    /// the subscription gate.
    pub channel_id: Option<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Completion {
    pub url: String,
    pub api_token: String,
    pub model: String,
    pub system_prompt: String,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Extraction {
    pub url: String,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Quota {
    /// Balance granted at account creation.
    pub initial_requests: i64,
    /// Balance consumed accounts return to at the daily boundary.
    pub daily_baseline: i64,
    /// Timezone of the reset boundary, as hours east of UTC.
    pub reset_utc_offset_hours: i32,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Admin {
    pub ids: Vec<i64>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    pub database: Database,
    pub gateway: Gateway,
    pub completion: Completion,
    pub extraction: Extraction,
    pub quota: Quota,
    pub admin: Admin,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder().add_source(File::with_name(path)).build()?;

        config.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::FileFormat;

    #[test]
    fn full_config_deserializes() {
        let toml = r#"
            [database]
            url = "sqlite://solva.db"

            [gateway]
            url = "http://gateway.internal"
            api_token = "gw-token"
            channel_id = -1000123

            [completion]
            url = "http://completion.internal/v1/chat/completions"
            api_token = "ai-token"
            model = "assistant-large"
            system_prompt = "You are a helpful assistant."
            timeout_secs = 180

            [extraction]
            url = "http://extraction.internal"

            [quota]
            initial_requests = 5
            daily_baseline = 5
            reset_utc_offset_hours = 3

            [admin]
            ids = [1, 2]
        "#;

        let settings: Settings = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.quota.daily_baseline, 5);
        assert_eq!(settings.gateway.channel_id, Some(-1000123));
        assert_eq!(settings.admin.ids, vec![1, 2]);
    }
}
