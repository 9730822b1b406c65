//! Configuration management for the ECS scheduler.
//!
//! All settings come from `ECSS_`-prefixed environment variables with
//! sensible defaults; the task-runner cluster name is the only required
//! value.

use std::path::PathBuf;

/// Main configuration struct for the scheduler service.
#[derive(Debug, Clone)]
pub struct Config {
    /// Web server configuration
    pub server: ServerConfig,
    /// Cluster task-runner configuration
    pub runner: RunnerConfig,
    /// Job store selection
    pub store: StoreConfig,
    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Web server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Host address to bind to
    pub host: String,
    /// Port to listen on
    pub port: u16,
}

/// Cluster task-runner configuration
#[derive(Debug, Clone)]
pub struct RunnerConfig {
    /// ECS cluster to launch tasks on (required)
    pub cluster: String,
    /// Name reported as `startedBy` on launched tasks
    pub name: String,
    /// AWS region used to derive service endpoints
    pub aws_region: String,
    /// Endpoint override for all AWS-style services (local stacks)
    pub aws_endpoint: Option<String>,
}

/// Job store selection; the first configured backend wins.
#[derive(Debug, Clone, Default)]
pub struct StoreConfig {
    pub sqlite_file: Option<String>,
    pub s3_bucket: Option<String>,
    pub s3_prefix: Option<String>,
    pub dynamodb_table: Option<String>,
    pub elasticsearch_index: Option<String>,
    pub elasticsearch_hosts: Vec<String>,
    pub config_file: Option<PathBuf>,
}

/// Logging configuration
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: Option<String>,
    /// Directory for the rotating file log; stdout only when unset
    pub log_folder: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "0.0.0.0".to_string(),
                port: 5000,
            },
            runner: RunnerConfig {
                cluster: String::new(),
                name: "ecs-scheduler".to_string(),
                aws_region: "us-east-1".to_string(),
                aws_endpoint: None,
            },
            store: StoreConfig::default(),
            logging: LoggingConfig {
                level: None,
                log_folder: None,
            },
        }
    }
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(format!("ECSS_{name}"))
        .ok()
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Load configuration from `ECSS_*` environment variables.
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Some(host) = env_var("HOST") {
            config.server.host = host;
        }
        if let Some(port) = env_var("PORT") {
            if let Ok(port) = port.parse() {
                config.server.port = port;
            }
        }

        if let Some(cluster) = env_var("ECS_CLUSTER") {
            config.runner.cluster = cluster;
        }
        if let Some(name) = env_var("NAME") {
            config.runner.name = name;
        }
        if let Some(region) = env_var("AWS_REGION") {
            config.runner.aws_region = region;
        }
        config.runner.aws_endpoint = env_var("AWS_ENDPOINT");

        config.store.sqlite_file = env_var("SQLITE_FILE");
        config.store.s3_bucket = env_var("S3_BUCKET");
        config.store.s3_prefix = env_var("S3_PREFIX");
        config.store.dynamodb_table = env_var("DYNAMODB_TABLE");
        config.store.elasticsearch_index = env_var("ELASTICSEARCH_INDEX");
        if let Some(hosts) = env_var("ELASTICSEARCH_HOSTS") {
            config.store.elasticsearch_hosts = hosts
                .split(',')
                .map(|h| h.trim().to_string())
                .filter(|h| !h.is_empty())
                .collect();
        }
        config.store.config_file = env_var("CONFIG_FILE").map(PathBuf::from);

        config.logging.level = env_var("LOG_LEVEL");
        config.logging.log_folder = env_var("LOG_FOLDER").map(PathBuf::from);

        config
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), String> {
        if self.runner.cluster.is_empty() {
            return Err("ECSS_ECS_CLUSTER is required".to_string());
        }
        if self.server.port == 0 {
            return Err("Port cannot be 0".to_string());
        }
        if self.store.elasticsearch_index.is_some() && self.store.elasticsearch_hosts.is_empty() {
            return Err(
                "ECSS_ELASTICSEARCH_HOSTS is required with ECSS_ELASTICSEARCH_INDEX".to_string(),
            );
        }
        Ok(())
    }

    pub fn ecs_endpoint(&self) -> String {
        self.service_endpoint("ecs")
    }

    pub fn sqs_endpoint(&self) -> String {
        self.service_endpoint("sqs")
    }

    pub fn s3_endpoint(&self) -> String {
        self.service_endpoint("s3")
    }

    pub fn dynamodb_endpoint(&self) -> String {
        self.service_endpoint("dynamodb")
    }

    fn service_endpoint(&self, service: &str) -> String {
        match &self.runner.aws_endpoint {
            Some(endpoint) => endpoint.trim_end_matches('/').to_string(),
            None => format!("https://{service}.{}.amazonaws.com", self.runner.aws_region),
        }
    }
}
