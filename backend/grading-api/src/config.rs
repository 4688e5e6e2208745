use serde::Deserialize;
use std::env;

pub const DEFAULT_GRADING_QUEUE: &str = "grading:tasks";
pub const DEFAULT_PROGRESS_WINDOW: usize = 10;
pub const MIN_PROGRESS_WINDOW: usize = 6;
pub const DEFAULT_CLAIM_TIMEOUT_SECS: i64 = 15 * 60;
pub const DEFAULT_PROGRESS_SWEEP_SECS: u64 = 60;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub mongo_uri: String,
    pub redis_uri: String,
    pub mongo_database: String,
    pub grading: GradingConfig,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct GradingConfig {
    /// Redis list the dispatcher pushes grading tasks onto.
    pub queue_name: String,
    /// Number of recent scores kept per (user, skill).
    pub progress_window: usize,
    /// A reviewer claim older than this may be taken over by another reviewer.
    pub claim_timeout_secs: i64,
    /// Interval of the background pass replaying undelivered progress. 0 disables it.
    pub progress_sweep_secs: u64,
}

impl Default for GradingConfig {
    fn default() -> Self {
        Self {
            queue_name: DEFAULT_GRADING_QUEUE.to_string(),
            progress_window: DEFAULT_PROGRESS_WINDOW,
            claim_timeout_secs: DEFAULT_CLAIM_TIMEOUT_SECS,
            progress_sweep_secs: DEFAULT_PROGRESS_SWEEP_SECS,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub bind_addr: String,
    /// `username:password` guarding the /metrics endpoint.
    pub metrics_auth: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:8081".to_string(),
            metrics_auth: "admin:changeme".to_string(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            mongo_uri: "mongodb://localhost:27017/?replicaSet=rs0".to_string(),
            redis_uri: "redis://127.0.0.1:6379/0".to_string(),
            mongo_database: "vstep".to_string(),
            grading: GradingConfig::default(),
            server: ServerConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, config::ConfigError> {
        // Root .env first, local .env as a fallback
        let skip_root_env = env::var("SKIP_ROOT_ENV").is_ok();
        if skip_root_env {
            dotenvy::dotenv().ok();
        } else if dotenvy::from_path("../../.env").is_err() {
            dotenvy::dotenv().ok();
        }

        let app_env = env::var("APP_ENV").unwrap_or_else(|_| "dev".to_string());

        // config/*.toml + APP__ overrides
        let settings = config::Config::builder()
            .add_source(config::File::with_name(&format!("config/{}", app_env)).required(false))
            .add_source(config::Environment::with_prefix("APP").separator("__"))
            .build()?;

        let mongo_uri = settings
            .get_string("database.mongo_uri")
            .or_else(|_| env::var("MONGO_URI"))
            .unwrap_or_else(|_| {
                if app_env == "prod" {
                    tracing::warn!("MONGO_URI not set in production, using localhost");
                }
                "mongodb://localhost:27017/?replicaSet=rs0".to_string()
            });

        let redis_uri = settings
            .get_string("redis.uri")
            .or_else(|_| env::var("REDIS_URI"))
            .unwrap_or_else(|_| {
                let host = env::var("REDIS_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
                let port = env::var("REDIS_PORT").unwrap_or_else(|_| "6379".to_string());
                match env::var("REDIS_PASSWORD") {
                    Ok(password) => format!("redis://:{}@{}:{}/0", password, host, port),
                    Err(_) => format!("redis://{}:{}/0", host, port),
                }
            });

        let mongo_database = settings
            .get_string("database.mongo_database")
            .or_else(|_| env::var("MONGO_DATABASE"))
            .unwrap_or_else(|_| "vstep".to_string());

        let defaults = GradingConfig::default();
        let queue_name = settings
            .get_string("grading.queue_name")
            .or_else(|_| env::var("GRADING_QUEUE"))
            .unwrap_or(defaults.queue_name);

        let progress_window = settings
            .get_int("grading.progress_window")
            .ok()
            .and_then(|v| usize::try_from(v).ok())
            .or_else(|| {
                env::var("PROGRESS_WINDOW")
                    .ok()
                    .and_then(|v| v.parse::<usize>().ok())
            })
            .unwrap_or(defaults.progress_window)
            .max(MIN_PROGRESS_WINDOW);

        let claim_timeout_secs = settings
            .get_int("grading.claim_timeout_secs")
            .ok()
            .or_else(|| {
                env::var("CLAIM_TIMEOUT_SECS")
                    .ok()
                    .and_then(|v| v.parse::<i64>().ok())
            })
            .filter(|v| *v > 0)
            .unwrap_or(defaults.claim_timeout_secs);

        let progress_sweep_secs = settings
            .get_int("grading.progress_sweep_secs")
            .ok()
            .and_then(|v| u64::try_from(v).ok())
            .or_else(|| {
                env::var("PROGRESS_SWEEP_SECS")
                    .ok()
                    .and_then(|v| v.parse::<u64>().ok())
            })
            .unwrap_or(defaults.progress_sweep_secs);

        let server_defaults = ServerConfig::default();
        let bind_addr = settings
            .get_string("server.bind_addr")
            .or_else(|_| env::var("BIND_ADDR"))
            .unwrap_or(server_defaults.bind_addr);

        let metrics_auth = match settings
            .get_string("server.metrics_auth")
            .or_else(|_| env::var("METRICS_AUTH"))
        {
            Ok(credentials) => credentials,
            Err(_) if app_env == "prod" => {
                return Err(config::ConfigError::Message(
                    "METRICS_AUTH must be set in production".to_string(),
                ))
            }
            Err(_) => server_defaults.metrics_auth,
        };

        Ok(Config {
            mongo_uri,
            redis_uri,
            mongo_database,
            grading: GradingConfig {
                queue_name,
                progress_window,
                claim_timeout_secs,
                progress_sweep_secs,
            },
            server: ServerConfig {
                bind_addr,
                metrics_auth,
            },
        })
    }
}
