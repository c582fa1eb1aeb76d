//! Process configuration.
//!
//! Layered the usual way: compiled defaults, then an optional TOML file
//! (`outlay.toml` or `config/outlay.toml`), then `OUTLAY_*` environment
//! variables, then programmatic overrides from CLI flags. The result is
//! validated once and then treated as immutable; the permission section
//! is converted into an [`AccessPolicy`] and passed around explicitly
//! instead of living in globals.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::catalog::{Project, Source};
use crate::domain::user::UserId;
use crate::permissions::{AccessPolicy, PermissionLevel, PermissionLevels};
use crate::validate::DEFAULT_AMOUNT_CEILING;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub limits: LimitsConfig,
    pub permissions: PermissionsConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Debug)]
pub struct LimitsConfig {
    /// Upper bound for request amounts, in whole currency units.
    pub max_amount: u64,
    /// Page size for interactive listings.
    pub page_size: u32,
}

impl LimitsConfig {
    pub fn amount_ceiling(&self) -> Decimal {
        Decimal::from(self.max_amount)
    }
}

/// Raw permission configuration. Source and project keys are kept as
/// strings here so a typo is reported as a configuration error with the
/// offending key, not a silent drop; [`AppConfig::access_policy`] does
/// the typed conversion.
#[derive(Clone, Debug)]
pub struct PermissionsConfig {
    pub admin_ids: Vec<i64>,
    pub fincontrol_ids: Vec<i64>,
    pub full_access_admin_ids: Vec<i64>,
    pub source_admins: BTreeMap<String, Vec<i64>>,
    pub crypto_admins: BTreeMap<String, Vec<i64>>,
    pub create: PermissionLevel,
    pub approve: PermissionLevel,
    pub reject: PermissionLevel,
    pub edit: PermissionLevel,
    pub view_all: PermissionLevel,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
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

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
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
                url: "sqlite://outlay.db".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
            limits: LimitsConfig { max_amount: DEFAULT_AMOUNT_CEILING, page_size: 5 },
            permissions: PermissionsConfig::default(),
        }
    }
}

impl Default for PermissionsConfig {
    /// Deployment default: anyone may submit, only admins act.
    fn default() -> Self {
        Self {
            admin_ids: Vec::new(),
            fincontrol_ids: Vec::new(),
            full_access_admin_ids: Vec::new(),
            source_admins: BTreeMap::new(),
            crypto_admins: BTreeMap::new(),
            create: PermissionLevel::Everyone,
            approve: PermissionLevel::AdminsOnly,
            reject: PermissionLevel::AdminsOnly,
            edit: PermissionLevel::AdminsOnly,
            view_all: PermissionLevel::AdminsOnly,
        }
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
            let expected = options.config_path.unwrap_or_else(|| PathBuf::from("outlay.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    /// Convert the permission section into the typed policy. Fails on
    /// unknown source/project keys, which `validate` also checks.
    pub fn access_policy(&self) -> Result<AccessPolicy, ConfigError> {
        let permissions = &self.permissions;

        let mut source_admins: HashMap<Source, HashSet<UserId>> = HashMap::new();
        for (key, ids) in &permissions.source_admins {
            let source = key.parse::<Source>().map_err(|error| {
                ConfigError::Validation(format!("permissions.source_admins: {error}"))
            })?;
            source_admins.insert(source, ids.iter().copied().map(UserId).collect());
        }

        let mut crypto_admins: HashMap<Project, HashSet<UserId>> = HashMap::new();
        for (key, ids) in &permissions.crypto_admins {
            let project = key.parse::<Project>().map_err(|error| {
                ConfigError::Validation(format!("permissions.crypto_admins: {error}"))
            })?;
            crypto_admins.insert(project, ids.iter().copied().map(UserId).collect());
        }

        Ok(AccessPolicy {
            full_access: permissions.full_access_admin_ids.iter().copied().map(UserId).collect(),
            admins: permissions.admin_ids.iter().copied().map(UserId).collect(),
            fincontrol: permissions.fincontrol_ids.iter().copied().map(UserId).collect(),
            source_admins,
            crypto_admins,
            levels: PermissionLevels {
                create: permissions.create,
                approve: permissions.approve,
                reject: permissions.reject,
                edit: permissions.edit,
                view_all: permissions.view_all,
            },
        })
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

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }

        if let Some(limits) = patch.limits {
            if let Some(max_amount) = limits.max_amount {
                self.limits.max_amount = max_amount;
            }
            if let Some(page_size) = limits.page_size {
                self.limits.page_size = page_size;
            }
        }

        if let Some(permissions) = patch.permissions {
            if let Some(admin_ids) = permissions.admin_ids {
                self.permissions.admin_ids = admin_ids;
            }
            if let Some(fincontrol_ids) = permissions.fincontrol_ids {
                self.permissions.fincontrol_ids = fincontrol_ids;
            }
            if let Some(full_access_admin_ids) = permissions.full_access_admin_ids {
                self.permissions.full_access_admin_ids = full_access_admin_ids;
            }
            if let Some(source_admins) = permissions.source_admins {
                self.permissions.source_admins = source_admins;
            }
            if let Some(crypto_admins) = permissions.crypto_admins {
                self.permissions.crypto_admins = crypto_admins;
            }
            if let Some(create) = permissions.create {
                self.permissions.create = create;
            }
            if let Some(approve) = permissions.approve {
                self.permissions.approve = approve;
            }
            if let Some(reject) = permissions.reject {
                self.permissions.reject = reject;
            }
            if let Some(edit) = permissions.edit {
                self.permissions.edit = edit;
            }
            if let Some(view_all) = permissions.view_all {
                self.permissions.view_all = view_all;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("OUTLAY_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("OUTLAY_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections = parse_u32("OUTLAY_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("OUTLAY_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_u64("OUTLAY_DATABASE_TIMEOUT_SECS", &value)?;
        }

        let log_level = read_env("OUTLAY_LOGGING_LEVEL").or_else(|| read_env("OUTLAY_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("OUTLAY_LOGGING_FORMAT").or_else(|| read_env("OUTLAY_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        if let Some(value) = read_env("OUTLAY_MAX_AMOUNT") {
            self.limits.max_amount = parse_u64("OUTLAY_MAX_AMOUNT", &value)?;
        }
        if let Some(value) = read_env("OUTLAY_PAGE_SIZE") {
            self.limits.page_size = parse_u32("OUTLAY_PAGE_SIZE", &value)?;
        }

        if let Some(value) = read_env("OUTLAY_ADMIN_IDS") {
            self.permissions.admin_ids = parse_id_list("OUTLAY_ADMIN_IDS", &value)?;
        }
        if let Some(value) = read_env("OUTLAY_FINCONTROL_IDS") {
            self.permissions.fincontrol_ids = parse_id_list("OUTLAY_FINCONTROL_IDS", &value)?;
        }
        if let Some(value) = read_env("OUTLAY_FULL_ACCESS_ADMIN_IDS") {
            self.permissions.full_access_admin_ids =
                parse_id_list("OUTLAY_FULL_ACCESS_ADMIN_IDS", &value)?;
        }

        for source in Source::ALL {
            let key = format!("OUTLAY_ADMIN_SOURCE_{}", source.as_str().to_ascii_uppercase());
            if let Some(value) = read_env(&key) {
                self.permissions
                    .source_admins
                    .insert(source.as_str().to_string(), parse_id_list(&key, &value)?);
            }
        }
        for project in Project::ALL {
            let key = format!("OUTLAY_ADMIN_CRYPTO_{}", project.as_str().to_ascii_uppercase());
            if let Some(value) = read_env(&key) {
                self.permissions
                    .crypto_admins
                    .insert(project.as_str().to_string(), parse_id_list(&key, &value)?);
            }
        }

        if let Some(value) = read_env("OUTLAY_PERMISSION_CREATE") {
            self.permissions.create = parse_level("OUTLAY_PERMISSION_CREATE", &value)?;
        }
        if let Some(value) = read_env("OUTLAY_PERMISSION_APPROVE") {
            self.permissions.approve = parse_level("OUTLAY_PERMISSION_APPROVE", &value)?;
        }
        if let Some(value) = read_env("OUTLAY_PERMISSION_REJECT") {
            self.permissions.reject = parse_level("OUTLAY_PERMISSION_REJECT", &value)?;
        }
        if let Some(value) = read_env("OUTLAY_PERMISSION_EDIT") {
            self.permissions.edit = parse_level("OUTLAY_PERMISSION_EDIT", &value)?;
        }
        if let Some(value) = read_env("OUTLAY_PERMISSION_VIEW_ALL") {
            self.permissions.view_all = parse_level("OUTLAY_PERMISSION_VIEW_ALL", &value)?;
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
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_logging(&self.logging)?;
        validate_limits(&self.limits)?;
        self.access_policy().map(|_| ())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("outlay.toml"), PathBuf::from("config/outlay.toml")]
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

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn validate_limits(limits: &LimitsConfig) -> Result<(), ConfigError> {
    if limits.max_amount == 0 {
        return Err(ConfigError::Validation(
            "limits.max_amount must be greater than zero".to_string(),
        ));
    }
    if limits.page_size == 0 || limits.page_size > 50 {
        return Err(ConfigError::Validation(
            "limits.page_size must be in range 1..=50".to_string(),
        ));
    }
    Ok(())
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
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

fn parse_level(key: &str, value: &str) -> Result<PermissionLevel, ConfigError> {
    value.parse::<PermissionLevel>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

/// Comma-separated user ids, the format the legacy deployment used in
/// its environment variables.
fn parse_id_list(key: &str, value: &str) -> Result<Vec<i64>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| {
            part.parse::<i64>().map_err(|_| ConfigError::InvalidEnvOverride {
                key: key.to_string(),
                value: value.to_string(),
            })
        })
        .collect()
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    logging: Option<LoggingPatch>,
    limits: Option<LimitsPatch>,
    permissions: Option<PermissionsPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[derive(Debug, Default, Deserialize)]
struct LimitsPatch {
    max_amount: Option<u64>,
    page_size: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
struct PermissionsPatch {
    admin_ids: Option<Vec<i64>>,
    fincontrol_ids: Option<Vec<i64>>,
    full_access_admin_ids: Option<Vec<i64>>,
    source_admins: Option<BTreeMap<String, Vec<i64>>>,
    crypto_admins: Option<BTreeMap<String, Vec<i64>>>,
    create: Option<PermissionLevel>,
    approve: Option<PermissionLevel>,
    reject: Option<PermissionLevel>,
    edit: Option<PermissionLevel>,
    view_all: Option<PermissionLevel>,
}
