use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub platform: PlatformConfig,
    pub poll: PollConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct PlatformConfig {
    pub site_url: String,
    pub api_url: Option<String>,
    pub bot_token: SecretString,
    pub bot_user_id: String,
    pub plugin_id: String,
    pub user_header: String,
    pub display_name: DisplayNamePolicy,
}

#[derive(Clone, Debug)]
pub struct PollConfig {
    pub trigger: String,
    pub default_locale: String,
    pub i18n_dir: Option<PathBuf>,
    pub assets_dir: PathBuf,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

/// How poll creators are named in posts. Voters are always shown as `@username`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayNamePolicy {
    Username,
    FullName,
    NicknameFullName,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub site_url: Option<String>,
    pub bot_token: Option<String>,
    pub bot_user_id: Option<String>,
    pub trigger: Option<String>,
    pub port: Option<u16>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://tallyho.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            platform: PlatformConfig {
                site_url: "http://localhost:8065".to_string(),
                api_url: None,
                bot_token: String::new().into(),
                bot_user_id: String::new(),
                plugin_id: "com.github.tallyho".to_string(),
                user_header: "Mattermost-User-Id".to_string(),
                display_name: DisplayNamePolicy::FullName,
            },
            poll: PollConfig {
                trigger: "poll".to_string(),
                default_locale: "en".to_string(),
                i18n_dir: None,
                assets_dir: PathBuf::from("assets"),
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for DisplayNamePolicy {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "username" => Ok(Self::Username),
            "full_name" => Ok(Self::FullName),
            "nickname_full_name" => Ok(Self::NicknameFullName),
            other => Err(ConfigError::Validation(format!(
                "unsupported display name policy `{other}` (expected username|full_name|nickname_full_name)"
            ))),
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl PlatformConfig {
    /// Base URL for REST calls; falls back to the site URL.
    pub fn api_base(&self) -> &str {
        self.api_url.as_deref().unwrap_or(&self.site_url).trim_end_matches('/')
    }

    /// Path prefix under which the platform forwards requests to this service.
    pub fn route_prefix(&self) -> String {
        format!("/plugins/{}", self.plugin_id)
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("tallyho.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(platform) = patch.platform {
            if let Some(site_url) = platform.site_url {
                self.platform.site_url = site_url;
            }
            if let Some(api_url) = platform.api_url {
                self.platform.api_url = Some(api_url);
            }
            if let Some(bot_token_value) = platform.bot_token {
                self.platform.bot_token = secret_value(bot_token_value);
            }
            if let Some(bot_user_id) = platform.bot_user_id {
                self.platform.bot_user_id = bot_user_id;
            }
            if let Some(plugin_id) = platform.plugin_id {
                self.platform.plugin_id = plugin_id;
            }
            if let Some(user_header) = platform.user_header {
                self.platform.user_header = user_header;
            }
            if let Some(display_name) = platform.display_name {
                self.platform.display_name = display_name;
            }
        }

        if let Some(poll) = patch.poll {
            if let Some(trigger) = poll.trigger {
                self.poll.trigger = trigger;
            }
            if let Some(default_locale) = poll.default_locale {
                self.poll.default_locale = default_locale;
            }
            if let Some(i18n_dir) = poll.i18n_dir {
                self.poll.i18n_dir = Some(i18n_dir);
            }
            if let Some(assets_dir) = poll.assets_dir {
                self.poll.assets_dir = assets_dir;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("TALLYHO_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("TALLYHO_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("TALLYHO_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("TALLYHO_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("TALLYHO_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("TALLYHO_PLATFORM_SITE_URL") {
            self.platform.site_url = value;
        }
        if let Some(value) = read_env("TALLYHO_PLATFORM_API_URL") {
            self.platform.api_url = Some(value);
        }
        if let Some(value) = read_env("TALLYHO_PLATFORM_BOT_TOKEN") {
            self.platform.bot_token = secret_value(value);
        }
        if let Some(value) = read_env("TALLYHO_PLATFORM_BOT_USER_ID") {
            self.platform.bot_user_id = value;
        }
        if let Some(value) = read_env("TALLYHO_PLATFORM_PLUGIN_ID") {
            self.platform.plugin_id = value;
        }
        if let Some(value) = read_env("TALLYHO_PLATFORM_USER_HEADER") {
            self.platform.user_header = value;
        }
        if let Some(value) = read_env("TALLYHO_PLATFORM_DISPLAY_NAME") {
            self.platform.display_name = value.parse()?;
        }

        if let Some(value) = read_env("TALLYHO_POLL_TRIGGER") {
            self.poll.trigger = value;
        }
        if let Some(value) = read_env("TALLYHO_POLL_DEFAULT_LOCALE") {
            self.poll.default_locale = value;
        }
        if let Some(value) = read_env("TALLYHO_POLL_I18N_DIR") {
            self.poll.i18n_dir = Some(PathBuf::from(value));
        }
        if let Some(value) = read_env("TALLYHO_POLL_ASSETS_DIR") {
            self.poll.assets_dir = PathBuf::from(value);
        }

        if let Some(value) = read_env("TALLYHO_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("TALLYHO_SERVER_PORT") {
            self.server.port = parse_u16("TALLYHO_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("TALLYHO_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_u64("TALLYHO_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        let log_level =
            read_env("TALLYHO_LOGGING_LEVEL").or_else(|| read_env("TALLYHO_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("TALLYHO_LOGGING_FORMAT").or_else(|| read_env("TALLYHO_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(site_url) = overrides.site_url {
            self.platform.site_url = site_url;
        }
        if let Some(bot_token) = overrides.bot_token {
            self.platform.bot_token = secret_value(bot_token);
        }
        if let Some(bot_user_id) = overrides.bot_user_id {
            self.platform.bot_user_id = bot_user_id;
        }
        if let Some(trigger) = overrides.trigger {
            self.poll.trigger = trigger;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_platform(&self.platform)?;
        validate_poll(&self.poll)?;
        validate_server(&self.server)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

/// Holds the active configuration. Readers take a snapshot; a reload swaps in a new value whole.
#[derive(Clone, Debug)]
pub struct ConfigHandle {
    current: Arc<RwLock<Arc<AppConfig>>>,
}

impl ConfigHandle {
    pub fn new(config: AppConfig) -> Self {
        Self { current: Arc::new(RwLock::new(Arc::new(config))) }
    }

    pub fn snapshot(&self) -> Arc<AppConfig> {
        match self.current.read() {
            Ok(guard) => Arc::clone(&guard),
            Err(poisoned) => Arc::clone(&poisoned.into_inner()),
        }
    }

    /// Validates `config` and makes it the active configuration.
    pub fn replace(&self, config: AppConfig) -> Result<(), ConfigError> {
        config.validate()?;
        let next = Arc::new(config);
        match self.current.write() {
            Ok(mut guard) => *guard = next,
            Err(poisoned) => *poisoned.into_inner() = next,
        }
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("tallyho.toml"), PathBuf::from("config/tallyho.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_platform(platform: &PlatformConfig) -> Result<(), ConfigError> {
    let urls = std::iter::once(&platform.site_url).chain(platform.api_url.as_ref());
    for url in urls {
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(ConfigError::Validation(format!(
                "platform url `{url}` must start with http:// or https://"
            )));
        }
    }

    if platform.bot_token.expose_secret().trim().is_empty() {
        return Err(ConfigError::Validation(
            "platform.bot_token is required. Create a bot account (System Console > Integrations > Bot Accounts) and copy its access token".to_string(),
        ));
    }

    if platform.bot_user_id.trim().is_empty() {
        return Err(ConfigError::Validation(
            "platform.bot_user_id is required; polls are posted as this user".to_string(),
        ));
    }

    if platform.plugin_id.trim().is_empty() || platform.plugin_id.contains('/') {
        return Err(ConfigError::Validation(
            "platform.plugin_id must be a non-empty identifier without `/`".to_string(),
        ));
    }

    if platform.user_header.trim().is_empty() {
        return Err(ConfigError::Validation(
            "platform.user_header must name the header carrying the acting user id".to_string(),
        ));
    }

    Ok(())
}

fn validate_poll(poll: &PollConfig) -> Result<(), ConfigError> {
    let trigger = poll.trigger.as_str();
    if trigger.is_empty() {
        return Err(ConfigError::Validation("poll.trigger must not be empty".to_string()));
    }
    if trigger.starts_with('/') || trigger.chars().any(char::is_whitespace) {
        return Err(ConfigError::Validation(format!(
            "poll.trigger `{trigger}` must not start with `/` or contain whitespace"
        )));
    }

    if poll.default_locale.trim().is_empty() {
        return Err(ConfigError::Validation("poll.default_locale must not be empty".to_string()));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_u16(key: &str, value: &str) -> Result<u16, ConfigError> {
    value.parse::<u16>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u32(key: &str, value: &str) -> Result<u32, ConfigError> {
    value.parse::<u32>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

fn parse_u64(key: &str, value: &str) -> Result<u64, ConfigError> {
    value.parse::<u64>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    platform: Option<PlatformPatch>,
    poll: Option<PollPatch>,
    server: Option<ServerPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct PlatformPatch {
    site_url: Option<String>,
    api_url: Option<String>,
    bot_token: Option<String>,
    bot_user_id: Option<String>,
    plugin_id: Option<String>,
    user_header: Option<String>,
    display_name: Option<DisplayNamePolicy>,
}

#[derive(Debug, Default, Deserialize)]
struct PollPatch {
    trigger: Option<String>,
    default_locale: Option<String>,
    i18n_dir: Option<PathBuf>,
    assets_dir: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}
