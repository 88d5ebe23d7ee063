use crate::constants::{DEFAULT_TASK_ID_CHARSET, DEFAULT_TASK_ID_LENGTH};
use crate::errors::ConfigError;
use crate::models::{Organization, ServiceInfo, ServiceType};
use std::time::Duration;

type Result<T> = std::result::Result<T, ConfigError>;

/// HTTP server port configuration.
#[derive(Clone, Debug)]
pub struct HttpPort(u16);

/// Timeout applied to every call made to a backend TES instance.
///
/// A hung backend must not stall the forwarding loop or a tracker, so this
/// bounds service-info lookups, submissions, fetches and cancels.
#[derive(Clone, Debug)]
pub struct HttpClientTimeout(Duration);

/// Default page size for `GET /tasks`.
#[derive(Clone, Debug)]
pub struct PageSize(usize);

impl Default for PageSize {
    fn default() -> Self {
        Self(5)
    }
}

impl TryFrom<String> for PageSize {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let size = value
            .parse::<usize>()
            .map_err(|_| ConfigError::InvalidValue {
                name: "LIST_TASKS_DEFAULT_PAGE_SIZE".to_string(),
                details: format!("not a number: {}", value),
            })?;

        if size == 0 {
            return Err(ConfigError::InvalidValue {
                name: "LIST_TASKS_DEFAULT_PAGE_SIZE".to_string(),
                details: "page size must be greater than 0".to_string(),
            });
        }

        Ok(Self(size))
    }
}

impl AsRef<usize> for PageSize {
    fn as_ref(&self) -> &usize {
        &self.0
    }
}

/// Alphabet task identifiers are drawn from. Duplicates are removed so each
/// symbol is equally likely.
#[derive(Clone, Debug)]
pub struct TaskIdCharset(Vec<char>);

impl Default for TaskIdCharset {
    fn default() -> Self {
        Self(DEFAULT_TASK_ID_CHARSET.chars().collect())
    }
}

impl TryFrom<String> for TaskIdCharset {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        let mut chars: Vec<char> = Vec::new();
        for c in value.chars() {
            if !c.is_ascii_graphic() {
                return Err(ConfigError::InvalidValue {
                    name: "TASK_ID_CHARSET".to_string(),
                    details: format!("unsupported character {:?}", c),
                });
            }
            if !chars.contains(&c) {
                chars.push(c);
            }
        }

        if chars.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "TASK_ID_CHARSET".to_string(),
                details: "charset must not be empty".to_string(),
            });
        }

        Ok(Self(chars))
    }
}

impl AsRef<[char]> for TaskIdCharset {
    fn as_ref(&self) -> &[char] {
        &self.0
    }
}

/// Task identifier generation settings.
#[derive(Clone, Debug)]
pub struct TaskIdConfig {
    pub charset: TaskIdCharset,
    pub length: usize,
    /// Number of inserts tried before giving up on finding a free identifier
    pub insert_attempts: u32,
}

impl Default for TaskIdConfig {
    fn default() -> Self {
        Self {
            charset: TaskIdCharset::default(),
            length: DEFAULT_TASK_ID_LENGTH,
            insert_attempts: 10,
        }
    }
}

impl TaskIdConfig {
    pub fn from_env() -> Result<Self> {
        let charset = {
            let env_value = optional_env("TASK_ID_CHARSET");
            if env_value.is_empty() {
                TaskIdCharset::default()
            } else {
                env_value.try_into()?
            }
        };
        let config = Self {
            charset,
            length: parse_env("TASK_ID_LENGTH", DEFAULT_TASK_ID_LENGTH)?,
            insert_attempts: parse_env("TASK_ID_INSERT_ATTEMPTS", 10)?,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.length == 0 {
            return Err(ConfigError::InvalidValue {
                name: "TASK_ID_LENGTH".to_string(),
                details: "length must be greater than 0".to_string(),
            });
        }
        if self.insert_attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "TASK_ID_INSERT_ATTEMPTS".to_string(),
                details: "at least one insert attempt is required".to_string(),
            });
        }
        Ok(())
    }
}

/// What a successful poll does to the tracker's failure counter.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TrackerResetPolicy {
    /// Only consecutive failures count against the budget
    #[default]
    Reset,
    /// Every failure over the tracker's lifetime counts
    Cumulative,
}

impl TryFrom<String> for TrackerResetPolicy {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "" | "reset" => Ok(Self::Reset),
            "cumulative" => Ok(Self::Cumulative),
            other => Err(ConfigError::InvalidValue {
                name: "POLLING_RESET_POLICY".to_string(),
                details: format!("'{}' must be 'reset' or 'cumulative'", other),
            }),
        }
    }
}

/// Settings for the background progress trackers
#[derive(Clone, Debug)]
pub struct PollingConfig {
    /// Pause between two polls of the same backend task
    pub wait: Duration,
    /// Failed polls tolerated before the task is marked SYSTEM_ERROR
    pub attempts: u32,
    pub reset_policy: TrackerResetPolicy,
    /// Buffer of the tracking job queue
    pub queue_size: usize,
    /// Trackers allowed to poll at the same time
    pub max_concurrent: usize,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            wait: Duration::from_secs(3),
            attempts: 100,
            reset_policy: TrackerResetPolicy::Reset,
            queue_size: 1000,
            max_concurrent: 100,
        }
    }
}

impl PollingConfig {
    pub fn from_env() -> Result<Self> {
        let config = Self {
            wait: Duration::from_secs(parse_env("POLLING_WAIT_SECS", 3u64)?),
            attempts: parse_env("POLLING_ATTEMPTS", 100)?,
            reset_policy: default_env("POLLING_RESET_POLICY", "reset").try_into()?,
            queue_size: parse_env("TRACKER_QUEUE_SIZE", 1000usize)?.max(10),
            max_concurrent: parse_env("TRACKER_MAX_CONCURRENT", 100usize)?.max(1),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.attempts == 0 {
            return Err(ConfigError::InvalidValue {
                name: "POLLING_ATTEMPTS".to_string(),
                details: "attempt budget must be greater than 0".to_string(),
            });
        }

        tracing::info!(
            wait_secs = self.wait.as_secs(),
            attempts = self.attempts,
            reset_policy = ?self.reset_policy,
            max_concurrent = self.max_concurrent,
            "Progress tracking configured"
        );

        Ok(())
    }
}

/// Where task documents live.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum TaskStoreType {
    #[default]
    Memory,
    Redis,
}

impl TryFrom<String> for TaskStoreType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "" | "memory" => Ok(Self::Memory),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::InvalidValue {
                name: "TASK_STORE".to_string(),
                details: format!("'{}' must be 'memory' or 'redis'", other),
            }),
        }
    }
}

/// Which queue carries tracking jobs.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum QueueAdapterType {
    #[default]
    Mpsc,
    Redis,
}

impl TryFrom<String> for QueueAdapterType {
    type Error = ConfigError;

    fn try_from(value: String) -> Result<Self> {
        match value.to_lowercase().as_str() {
            "" | "mpsc" => Ok(Self::Mpsc),
            "redis" => Ok(Self::Redis),
            other => Err(ConfigError::InvalidValue {
                name: "TRACKER_QUEUE_ADAPTER".to_string(),
                details: format!("'{}' must be 'mpsc' or 'redis'", other),
            }),
        }
    }
}

/// Storage and queue backends.
#[derive(Clone, Debug)]
pub struct StorageConfig {
    pub task_store: TaskStoreType,
    pub queue_adapter: QueueAdapterType,
    pub redis_url: Option<String>,
    /// Prefix of every task store key
    pub redis_key_prefix: String,
    /// Prefix of the tracking queue lists
    pub redis_queue_prefix: String,
    /// Name of this instance's in-flight list; random when unset
    pub redis_worker_id: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            task_store: TaskStoreType::Memory,
            queue_adapter: QueueAdapterType::Mpsc,
            redis_url: None,
            redis_key_prefix: "protes:tasks:".to_string(),
            redis_queue_prefix: "protes:queue:tracking:".to_string(),
            redis_worker_id: None,
        }
    }
}

impl StorageConfig {
    pub fn from_env() -> Result<Self> {
        let redis_url = Some(optional_env("REDIS_URL")).filter(|url| !url.is_empty());
        let redis_worker_id =
            Some(optional_env("TRACKER_QUEUE_REDIS_WORKER_ID")).filter(|id| !id.is_empty());
        let config = Self {
            task_store: optional_env("TASK_STORE").try_into()?,
            queue_adapter: optional_env("TRACKER_QUEUE_ADAPTER").try_into()?,
            redis_url,
            redis_key_prefix: default_env("REDIS_KEY_PREFIX", "protes:tasks:"),
            redis_queue_prefix: default_env("TRACKER_QUEUE_REDIS_PREFIX", "protes:queue:tracking:"),
            redis_worker_id,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.redis_url.is_none() {
            if self.task_store == TaskStoreType::Redis {
                return Err(ConfigError::RedisUrlRequired {
                    setting: "TASK_STORE".to_string(),
                });
            }
            if self.queue_adapter == QueueAdapterType::Redis {
                return Err(ConfigError::RedisUrlRequired {
                    setting: "TRACKER_QUEUE_ADAPTER".to_string(),
                });
            }
        }

        tracing::info!(
            task_store = ?self.task_store,
            queue_adapter = ?self.queue_adapter,
            "Storage configured"
        );
        Ok(())
    }
}

/// Candidate backend TES instances.
#[derive(Clone, Debug)]
pub struct TesConfig {
    pub service_list: Vec<String>,
}

impl TesConfig {
    pub fn new(service_list: Vec<String>) -> Result<Self> {
        let service_list: Vec<String> = service_list
            .into_iter()
            .map(|s| s.trim().trim_end_matches('/').to_string())
            .filter(|s| !s.is_empty())
            .collect();

        if service_list.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "TES_SERVICE_LIST".to_string(),
                details: "at least one TES instance is required".to_string(),
            });
        }

        for service in &service_list {
            let parsed = url::Url::parse(service).map_err(|e| ConfigError::InvalidServiceUrl {
                url: service.clone(),
                details: e.to_string(),
            })?;
            if !matches!(parsed.scheme(), "http" | "https") || parsed.host_str().is_none() {
                return Err(ConfigError::InvalidServiceUrl {
                    url: service.clone(),
                    details: "expected an http(s) URL with a host".to_string(),
                });
            }
        }

        Ok(Self { service_list })
    }

    pub fn from_env() -> Result<Self> {
        let raw = require_env("TES_SERVICE_LIST")?;
        Self::new(raw.split(',').map(str::to_string).collect())
    }
}

/// Ranking pipeline definition.
///
/// `slots` is ordered; each slot lists middleware names tried in order until
/// one succeeds. `MIDDLEWARES=distance,random` is one slot with a fallback,
/// `MIDDLEWARES=distance;random` is two slots that both must succeed.
#[derive(Clone, Debug)]
pub struct MiddlewareConfig {
    pub slots: Vec<Vec<String>>,
    /// Base URL of the IP geolocation service used by distance ranking
    pub geolocation_base_url: String,
}

impl Default for MiddlewareConfig {
    fn default() -> Self {
        Self {
            slots: vec![vec!["distance".to_string(), "random".to_string()]],
            geolocation_base_url: "http://ip-api.com/json".to_string(),
        }
    }
}

impl MiddlewareConfig {
    pub fn parse_slots(value: &str) -> Vec<Vec<String>> {
        value
            .split(';')
            .map(|slot| {
                slot.split(',')
                    .map(|name| name.trim().to_lowercase())
                    .filter(|name| !name.is_empty())
                    .collect::<Vec<String>>()
            })
            .filter(|slot| !slot.is_empty())
            .collect()
    }

    pub fn from_env() -> Self {
        Self {
            slots: Self::parse_slots(&default_env("MIDDLEWARES", "distance,random")),
            geolocation_base_url: default_env("GEOLOCATION_BASE_URL", "http://ip-api.com/json")
                .trim_end_matches('/')
                .to_string(),
        }
    }
}

/// How a bearer token is validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ValidationMethod {
    /// Call the issuer's userinfo endpoint with the token
    Userinfo,
}

/// Whether every configured validation method must pass or just one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum ValidationChecks {
    #[default]
    All,
    Any,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub required: bool,
    pub header_name: String,
    pub token_prefix: String,
    pub claim_issuer: String,
    pub claim_identity: String,
    pub validation_methods: Vec<ValidationMethod>,
    pub validation_checks: ValidationChecks,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            required: false,
            header_name: "Authorization".to_string(),
            token_prefix: "Bearer".to_string(),
            claim_issuer: "iss".to_string(),
            claim_identity: "sub".to_string(),
            validation_methods: vec![ValidationMethod::Userinfo],
            validation_checks: ValidationChecks::All,
        }
    }
}

impl AuthConfig {
    pub fn from_env() -> Result<Self> {
        let validation_methods = default_env("AUTH_VALIDATION_METHODS", "userinfo")
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .map(|method| match method.as_str() {
                "userinfo" => Ok(ValidationMethod::Userinfo),
                other => Err(ConfigError::InvalidValue {
                    name: "AUTH_VALIDATION_METHODS".to_string(),
                    details: format!("unsupported validation method '{}'", other),
                }),
            })
            .collect::<Result<Vec<_>>>()?;

        let validation_checks = match default_env("AUTH_VALIDATION_CHECKS", "all")
            .to_lowercase()
            .as_str()
        {
            "all" => ValidationChecks::All,
            "any" => ValidationChecks::Any,
            other => {
                return Err(ConfigError::InvalidValue {
                    name: "AUTH_VALIDATION_CHECKS".to_string(),
                    details: format!("'{}' must be 'all' or 'any'", other),
                });
            }
        };

        let config = Self {
            required: parse_bool_env("AUTH_REQUIRED", false),
            header_name: default_env("AUTH_HEADER_NAME", "Authorization"),
            token_prefix: default_env("AUTH_TOKEN_PREFIX", "Bearer"),
            claim_issuer: default_env("AUTH_CLAIM_ISSUER", "iss"),
            claim_identity: default_env("AUTH_CLAIM_IDENTITY", "sub"),
            validation_methods,
            validation_checks,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.required && self.validation_methods.is_empty() {
            return Err(ConfigError::InvalidValue {
                name: "AUTH_VALIDATION_METHODS".to_string(),
                details: "authorization is required but no validation method is set".to_string(),
            });
        }
        Ok(())
    }

    /// Number of validation methods that must pass for a token to be accepted.
    pub fn required_validations(&self) -> usize {
        match self.validation_checks {
            ValidationChecks::All => self.validation_methods.len(),
            ValidationChecks::Any => 1.min(self.validation_methods.len()),
        }
    }
}

/// Service-info metadata this instance advertises.
pub fn default_service_info() -> ServiceInfo {
    let version = version().unwrap_or_else(|_| "unknown".to_string());
    ServiceInfo {
        id: "org.ga4gh.protes".to_string(),
        name: "proTES".to_string(),
        service_type: ServiceType {
            group: "org.ga4gh".to_string(),
            artifact: "tes".to_string(),
            version: "1.1.0".to_string(),
        },
        description: Some(
            "Proxy service for distributing tasks across GA4GH TES instances".to_string(),
        ),
        organization: Organization {
            name: "proTES".to_string(),
            url: "https://github.com/elixir-cloud-aai/proTES".to_string(),
        },
        contact_url: None,
        documentation_url: None,
        created_at: None,
        updated_at: None,
        environment: None,
        version,
        storage: Vec::new(),
    }
}

fn service_info_from_env() -> Result<ServiceInfo> {
    let path = optional_env("SERVICE_INFO_PATH");
    if path.is_empty() {
        return Ok(default_service_info());
    }

    let contents =
        std::fs::read_to_string(&path).map_err(|e| ConfigError::ServiceInfoUnreadable {
            path: path.clone(),
            details: e.to_string(),
        })?;
    serde_json::from_str(&contents).map_err(|e| ConfigError::ServiceInfoUnreadable {
        path,
        details: e.to_string(),
    })
}

/// Main configuration structure for the proxy.
///
/// Built once at start-up and handed to each component; nothing reads the
/// environment after [`Config::new`] returns.
#[derive(Clone, Debug)]
pub struct Config {
    pub version: String,
    pub http_port: HttpPort,
    pub http_client_timeout: HttpClientTimeout,
    pub user_agent: String,
    pub tes: TesConfig,
    pub default_page_size: PageSize,
    pub task_id: TaskIdConfig,
    pub polling: PollingConfig,
    pub storage: StorageConfig,
    /// Keep the full forwarding log instead of only the remote task id
    pub store_logs: bool,
    pub middlewares: MiddlewareConfig,
    pub auth: AuthConfig,
    pub service_info: ServiceInfo,
}

impl Config {
    /// Creates a new configuration instance by loading values from environment variables.
    ///
    /// # Required Environment Variables
    ///
    /// - `TES_SERVICE_LIST`: comma-separated base URLs of the backend TES instances
    ///
    /// Everything else has a default.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a required variable is missing or a value
    /// fails validation.
    pub fn new() -> Result<Self> {
        let version = version()?;
        let http_port: HttpPort = default_env("HTTP_PORT", "8080").try_into()?;
        let http_client_timeout: HttpClientTimeout =
            default_env("HTTP_CLIENT_TIMEOUT", "5").try_into()?;
        let default_user_agent = format!("protes/{}", version);
        let user_agent = default_env("USER_AGENT", &default_user_agent);

        let default_page_size: PageSize = {
            let env_value = optional_env("LIST_TASKS_DEFAULT_PAGE_SIZE");
            if env_value.is_empty() {
                PageSize::default()
            } else {
                env_value.try_into()?
            }
        };

        Ok(Self {
            version,
            http_port,
            http_client_timeout,
            user_agent,
            tes: TesConfig::from_env()?,
            default_page_size,
            task_id: TaskIdConfig::from_env()?,
            polling: PollingConfig::from_env()?,
            storage: StorageConfig::from_env()?,
            store_logs: parse_bool_env("STORE_LOGS", true),
            middlewares: MiddlewareConfig::from_env(),
            auth: AuthConfig::from_env()?,
            service_info: service_info_from_env()?,
        })
    }

    /// Configuration with every optional setting at its default.
    pub fn with_defaults(service_list: Vec<String>) -> Result<Self> {
        let version = version()?;
        Ok(Self {
            user_agent: format!("protes/{}", version),
            version,
            http_port: HttpPort(8080),
            http_client_timeout: HttpClientTimeout(Duration::from_secs(5)),
            tes: TesConfig::new(service_list)?,
            default_page_size: PageSize::default(),
            task_id: TaskIdConfig::default(),
            polling: PollingConfig::default(),
            storage: StorageConfig::default(),
            store_logs: true,
            middlewares: MiddlewareConfig::default(),
            auth: AuthConfig::default(),
            service_info: default_service_info(),
        })
    }
}

fn require_env(name: &str) -> Result<String> {
    std::env::var(name).map_err(|_| ConfigError::EnvVarRequired {
        var_name: name.to_string(),
    })
}

fn optional_env(name: &str) -> String {
    std::env::var(name).unwrap_or("".to_string())
}

fn default_env(name: &str, default_value: &str) -> String {
    std::env::var(name).unwrap_or(default_value.to_string())
}

fn parse_env<T: std::str::FromStr>(name: &str, default_value: T) -> Result<T> {
    let value = optional_env(name);
    if value.is_empty() {
        return Ok(default_value);
    }
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        name: name.to_string(),
        details: format!("cannot parse '{}'", value),
    })
}

fn parse_bool_env(name: &str, default_value: bool) -> bool {
    std::env::var(name)
        .map(|v| matches!(v.to_lowercase().as_str(), "true" | "1" | "yes"))
        .unwrap_or(default_value)
}

/// Retrieves the service version from `GIT_HASH` or `CARGO_PKG_VERSION`.
pub fn version() -> Result<String> {
    option_env!("GIT_HASH")
        .or(option_env!("CARGO_PKG_VERSION"))
        .map(|val| val.to_string())
        .ok_or(ConfigError::VersionNotAvailable)
}

impl TryFrom<String> for HttpPort {
    type Error = ConfigError;
    fn try_from(value: String) -> Result<Self> {
        if value.is_empty() {
            Ok(Self(80))
        } else {
            value
                .parse::<u16>()
                .map(Self)
                .map_err(|_| ConfigError::InvalidPortNumber {
                    port: value.clone(),
                })
        }
    }
}

impl AsRef<u16> for HttpPort {
    fn as_ref(&self) -> &u16 {
        &self.0
    }
}

impl AsRef<Duration> for HttpClientTimeout {
    fn as_ref(&self) -> &Duration {
        &self.0
    }
}

impl TryFrom<String> for HttpClientTimeout {
    type Error = ConfigError;
    fn try_from(value: String) -> Result<Self> {
        if value.is_empty() {
            return Ok(Self(Duration::from_secs(5)));
        }

        match value.parse::<u64>() {
            Ok(0) | Err(_) => Err(ConfigError::InvalidTimeout {
                value: value.clone(),
            }),
            Ok(seconds) => Ok(Self(Duration::from_secs(seconds))),
        }
    }
}
