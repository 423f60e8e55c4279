use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::fs;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_CONFIG_PATH: &str = "config.toml";

const DEFAULT_SYSTEM_PROMPT: &str = "You're an experienced chef specialized in mediterranean dishes with many years of experience, passionate about very short and easy recipes to make at home. Your answers contain 1600 characters maximum. You understand nothing but cooking.";
const DEFAULT_FALLBACK_REPLY: &str =
    "Sorry, I couldn't come up with an answer right now. Please try again in a moment!";

#[derive(Debug, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HTTPConfig,

    #[serde(default)]
    pub database: DatabaseConfig,

    #[serde(default)]
    pub openai: OpenAIConfig,

    #[serde(default)]
    pub twilio: TwilioConfig,
}
impl AppConfig {
    /// Reads the TOML file if one is given (or `config.toml` exists), otherwise
    /// starts from defaults. Environment overrides are applied afterwards.
    pub fn load(config_filepath: Option<PathBuf>) -> Result<Self> {
        let config_path = match config_filepath {
            Some(path) => Some(path),
            None => {
                let default_path = PathBuf::from(DEFAULT_CONFIG_PATH);
                default_path.is_file().then_some(default_path)
            }
        };

        let mut config = match config_path {
            Some(config_path) => {
                let config_content = fs::read_to_string(&config_path)
                    .with_context(|| format!("Failed to read config file: {config_path:?}"))?;

                toml::from_str::<AppConfig>(&config_content).with_context(|| {
                    format!("Failed to parse TOML config file: {config_path:?}")
                })?
            }
            None => AppConfig::default(),
        };

        config.apply_overrides(|name| std::env::var(name).ok());
        Ok(config)
    }

    /// Values that operators usually keep in the environment win over the file.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(database_url) = lookup("DATABASE_URL") {
            self.database.database_url = database_url;
        }
        if let Some(phone_number) = lookup("TWILIO_NUMBER") {
            self.twilio.phone_number = Some(phone_number);
        }
    }
}

/// Provider secrets, only ever sourced from the environment.
#[derive(Clone)]
pub struct Credentials {
    pub openai_api_key: String,
    pub twilio_account_sid: String,
    pub twilio_auth_token: String,
    pub admin_token: Option<String>,
}
impl Credentials {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |name: &'static str| {
            lookup(name)
                .filter(|value| !value.trim().is_empty())
                .ok_or_else(|| anyhow!("Missing required {name} environment variable!"))
        };

        Ok(Self {
            openai_api_key: required("OPENAI_API_KEY")?,
            twilio_account_sid: required("TWILIO_ACCOUNT_SID")?,
            twilio_auth_token: required("TWILIO_AUTH_TOKEN")?,
            admin_token: lookup("RELAY_HTTP_AUTH_TOKEN").filter(|token| !token.trim().is_empty()),
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("twilio_account_sid", &self.twilio_account_sid)
            .field("admin_token", &self.admin_token.is_some())
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HTTPConfig {
    #[serde(default = "default_http_address")]
    pub address: SocketAddr,

    #[serde(default)]
    pub tls: Option<TLSConfig>,
}
impl Default for HTTPConfig {
    fn default() -> Self {
        Self {
            address: default_http_address(),
            tls: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TLSConfig {
    #[serde(deserialize_with = "deserialize_existing_file")]
    pub certificate_path: PathBuf,

    #[serde(deserialize_with = "deserialize_existing_file")]
    pub key_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_database_url")]
    pub database_url: String,

    #[serde(default = "default_database_max_connections")]
    pub max_connections: u32,
}
impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            database_url: default_database_url(),
            max_connections: default_database_max_connections(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OpenAIConfig {
    #[serde(default = "default_openai_base_url")]
    pub base_url: String,

    #[serde(default = "default_openai_model")]
    pub model: String,

    #[serde(default = "default_system_prompt")]
    pub system_prompt: String,

    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    #[serde(default = "default_temperature")]
    pub temperature: f32,

    #[serde(default = "default_openai_timeout_secs")]
    pub timeout_secs: u64,

    /// Sent to the user when no completion could be produced. Set to an
    /// empty string to stay silent instead.
    #[serde(default = "default_fallback_reply")]
    pub fallback_reply: String,
}
impl OpenAIConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn fallback_reply(&self) -> Option<String> {
        let reply = self.fallback_reply.trim();
        (!reply.is_empty()).then(|| reply.to_string())
    }
}
impl Default for OpenAIConfig {
    fn default() -> Self {
        Self {
            base_url: default_openai_base_url(),
            model: default_openai_model(),
            system_prompt: default_system_prompt(),
            max_tokens: default_max_tokens(),
            temperature: default_temperature(),
            timeout_secs: default_openai_timeout_secs(),
            fallback_reply: default_fallback_reply(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct TwilioConfig {
    #[serde(default = "default_twilio_base_url")]
    pub base_url: String,

    /// Sandbox or business number replies are sent from, `TWILIO_NUMBER` overrides.
    #[serde(default)]
    pub phone_number: Option<String>,

    #[serde(default = "default_twilio_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_max_reply_chars")]
    pub max_reply_chars: usize,

    /// Public URL Twilio posts to. Setting it turns on signature validation.
    #[serde(default)]
    pub webhook_url: Option<String>,
}
impl TwilioConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}
impl Default for TwilioConfig {
    fn default() -> Self {
        Self {
            base_url: default_twilio_base_url(),
            phone_number: None,
            timeout_secs: default_twilio_timeout_secs(),
            max_reply_chars: default_max_reply_chars(),
            webhook_url: None,
        }
    }
}

fn default_http_address() -> SocketAddr {
    SocketAddr::new(IpAddr::V4(Ipv4Addr::new(127, 0, 0, 1)), 8000)
}
fn default_database_url() -> String {
    "conversations.db".to_string()
}
fn default_database_max_connections() -> u32 {
    10
}
fn default_openai_base_url() -> String {
    "https://api.openai.com".to_string()
}
fn default_openai_model() -> String {
    "gpt-4".to_string()
}
fn default_system_prompt() -> String {
    DEFAULT_SYSTEM_PROMPT.to_string()
}
fn default_max_tokens() -> u32 {
    200
}
fn default_temperature() -> f32 {
    0.5
}
fn default_openai_timeout_secs() -> u64 {
    30
}
fn default_fallback_reply() -> String {
    DEFAULT_FALLBACK_REPLY.to_string()
}
fn default_twilio_base_url() -> String {
    "https://api.twilio.com".to_string()
}
fn default_twilio_timeout_secs() -> u64 {
    15
}

/// WhatsApp rejects message bodies above 1600 characters.
fn default_max_reply_chars() -> usize {
    1600
}

fn deserialize_existing_file<'de, D>(deserializer: D) -> Result<PathBuf, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let path = PathBuf::deserialize(deserializer)?;
    if !path.is_file() {
        return Err(serde::de::Error::custom(format!(
            "File does not exist: {}",
            path.display()
        )));
    }
    Ok(path)
}
