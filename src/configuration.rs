use std::env;
use std::env::current_dir;
use std::fmt::Display;
use std::time::Duration;

use config::Config;
use config::ConfigError;
use secrecy::ExposeSecret;
use secrecy::Secret;
use serde::Deserialize;
use serde_aux::field_attributes::deserialize_number_from_string;
use sqlx::postgres::PgConnectOptions;

use crate::domain::LeadEmail;
use crate::email_client::EmailClient;
use crate::email_client::EmailProvider;
use crate::rate_limit::RateLimiter;

/// Global configuration, loaded from `configuration/*.yaml` and `APP_*` env
/// vars. See `get_configuration`.
#[derive(Deserialize, Clone)]
pub struct Settings {
    pub application: ApplicationSettings,
    pub store: StoreSettings,
    pub database: DatabaseSettings,
    pub rate_limit: RateLimitSettings,
    pub intake: IntakeSettings,
    /// Welcome email sent to every new lead
    pub checklist_email: ChecklistEmailSettings,
    /// "New lead" email sent to the site owner
    pub notification_email: NotificationEmailSettings,
}

/// Server configuration
#[derive(Deserialize, Clone)]
pub struct ApplicationSettings {
    /// Should be localhost on dev machine, 0.0.0.0 on prod
    pub host: String,

    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,

    /// Used in email subjects and bodies
    pub product_name: String,

    /// Value of `Access-Control-Allow-Origin` on `/api/collect-lead`
    pub cors_allowed_origin: String,
}

#[derive(Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Hosted Postgres-as-a-service, through its REST API
    Rest,
    /// Direct connection, see `DatabaseSettings`
    Postgres,
}

/// Where leads are kept
#[derive(Deserialize, Clone)]
pub struct StoreSettings {
    pub backend: StoreBackend,
    /// Project url of the hosted store, e.g. `https://<project>.supabase.co`.
    /// Only read by the `rest` backend.
    pub base_url: String,
    /// Service role key; sent as both `apikey` and bearer token
    pub service_key: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

impl StoreSettings {
    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_milliseconds) }
}

/// Database configuration, only read by the `postgres` store backend
#[derive(Deserialize, Clone)]
pub struct DatabaseSettings {
    pub username: String,
    pub password: Secret<String>,
    pub host: String,

    /// Port for the postgres database, which will be different from that of the
    /// server
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub port: u16,
    pub database_name: String,

    /// Should be `true` in production.
    /// https://www.postgresql.org/docs/current/libpq-ssl.html#LIBPQ-SSL-SSLMODE-STATEMENTS
    pub require_ssl: bool,
}

impl DatabaseSettings {
    /// Return connection to a named database (declared in config file). The db
    /// password is concealed.
    pub fn connection(&self) -> PgConnectOptions {
        self.connection_without_db().database(&self.database_name)
    }

    /// Return connection to the Postgres instance (instead of a specific db),
    /// i.e. `database_name` is unset. This is typically used to init a
    /// randomised db for testing.
    pub fn connection_without_db(&self) -> PgConnectOptions {
        PgConnectOptions::new()
            .username(&self.username)
            .password(self.password.expose_secret())
            .host(&self.host)
            .port(self.port)
            .ssl_mode(match self.require_ssl {
                true => sqlx::postgres::PgSslMode::Require,
                false => sqlx::postgres::PgSslMode::Prefer,
            })
    }
}

#[derive(Deserialize, Clone)]
pub struct RateLimitSettings {
    /// Submissions admitted per client within the window
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub max_submissions: usize,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub window_seconds: u64,
    /// How often expired entries are dropped from memory
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub sweep_interval_seconds: u64,
}

impl RateLimitSettings {
    pub fn limiter(&self) -> RateLimiter {
        RateLimiter::new(self.max_submissions, Duration::from_secs(self.window_seconds))
    }

    pub fn sweep_interval(&self) -> Duration { Duration::from_secs(self.sweep_interval_seconds) }
}

/// Knobs for the spam heuristic on `/api/collect-lead`
#[derive(Deserialize, Clone, Debug)]
pub struct IntakeSettings {
    /// Whether a submission's `test_mode` flag may skip the spam heuristic.
    /// Should be `false` in production.
    pub allow_test_mode: bool,
    #[serde(default)]
    pub extra_disposable_domains: Vec<String>,
}

/// Shared by both outbound email roles
#[derive(Deserialize, Clone)]
pub struct EmailClientSettings {
    pub provider: EmailProvider,
    pub base_url: String,
    pub sender_email: String,
    #[serde(default)]
    pub sender_name: Option<String>,
    pub authorization_token: Secret<String>,
    #[serde(deserialize_with = "deserialize_number_from_string")]
    pub timeout_milliseconds: u64,
}

impl EmailClientSettings {
    pub fn sender(&self) -> Result<LeadEmail, String> { LeadEmail::parse(self.sender_email.clone()) }

    pub fn timeout(&self) -> Duration { Duration::from_millis(self.timeout_milliseconds) }

    pub fn client(&self) -> Result<EmailClient, anyhow::Error> {
        let sender = self.sender().map_err(anyhow::Error::msg)?;
        let client = EmailClient::new(
            self.provider,
            self.base_url.clone(),
            sender,
            self.sender_name.clone(),
            self.authorization_token.clone(),
            self.timeout(),
        )?;
        Ok(client)
    }
}

#[derive(Deserialize, Clone)]
pub struct ChecklistEmailSettings {
    #[serde(flatten)]
    pub delivery: EmailClientSettings,
    /// Where the checklist itself lives; linked from the welcome email
    pub checklist_url: String,
}

#[derive(Deserialize, Clone)]
pub struct NotificationEmailSettings {
    #[serde(flatten)]
    pub delivery: EmailClientSettings,
    /// The site owner's inbox
    pub recipient: String,
    /// Link to the leads table in the store's dashboard, if any
    #[serde(default)]
    pub dashboard_url: Option<String>,
}

impl NotificationEmailSettings {
    pub fn recipient(&self) -> Result<LeadEmail, String> { LeadEmail::parse(self.recipient.clone()) }
}

#[derive(Debug)]
pub enum Environment {
    Local,
    Production,
}

impl Display for Environment {
    fn fmt(
        &self,
        f: &mut std::fmt::Formatter<'_>,
    ) -> std::fmt::Result {
        write!(
            f,
            "{}",
            match self {
                Environment::Local => "local",
                Environment::Production => "production",
            }
        )?;
        Ok(())
    }
}

impl TryFrom<String> for Environment {
    type Error = String;
    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.to_lowercase().as_str() {
            "local" => Ok(Self::Local),
            "production" => Ok(Self::Production),
            e => Err(format!("Invalid environment: {e}; use `local` or `production`")),
        }
    }
}

/// Load yaml configuration files at `<project_root>/configuration`.
///
/// `base.yaml` is read first, then `{APP_ENVIRONMENT}.yaml` (default
/// `local`), then env vars, e.g. `APP_APPLICATION__PORT=5001` ->
/// `Settings.application.port`. All fields must be present after layering,
/// otherwise the server will not start.
pub fn get_configuration() -> Result<Settings, ConfigError> {
    let cfg_dir = current_dir()
        .map_err(|e| ConfigError::Foreign(Box::new(e)))?
        .join("configuration");

    let env: Environment = env::var("APP_ENVIRONMENT")
        .unwrap_or("local".to_string())
        .try_into()
        .map_err(ConfigError::Message)?;

    let settings = Config::builder()
        .add_source(config::File::from(cfg_dir.join("base.yaml")))
        .add_source(config::File::from(cfg_dir.join(format!("{env}.yaml"))))
        .add_source(
            // env vars are -always- parsed as String, `serde-aux` is required to parse other
            // types
            config::Environment::with_prefix("APP")
                .prefix_separator("_")
                .separator("__"),
        )
        .build()?;

    settings.try_deserialize::<Settings>()
}
