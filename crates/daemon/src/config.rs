//! Daemon configuration: flags with environment fallbacks, read once at start

use clap::{Args, Parser, Subcommand, ValueEnum};
use scanq_api_http::HttpServerConfig;
use scanq_core::application::worker::constants::{
    DEFAULT_MAX_ATTEMPTS, DEFAULT_QUEUE, DEFAULT_TIMEOUT_SECS, MAX_TIMEOUT_SECS,
};
use scanq_core::application::{BackoffPolicy, JobDefaults, PoolConfig, RetryPolicy};
use std::time::Duration;

pub const DEFAULT_QUEUE_URL: &str = "sqlite://~/.scanq/queue.db";

#[derive(Parser, Debug)]
#[command(name = "scanqd", version, about = "scanq daemon: Control API and module workers")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    #[command(flatten)]
    pub config: DaemonConfig,
}

impl Cli {
    pub fn command(&self) -> Command {
        self.command.unwrap_or(Command::All)
    }
}

#[derive(Subcommand, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Control API only
    Serve,
    /// Worker pool only
    Worker,
    /// Control API and worker pool in one process
    All,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Args, Debug, Clone)]
pub struct DaemonConfig {
    /// Queue backend: sqlite://PATH, sqlite::memory: or memory://
    #[arg(long, env = "SCANQ_QUEUE_URL", default_value = DEFAULT_QUEUE_URL, global = true)]
    pub queue_url: String,

    #[arg(long, env = "SCANQ_QUEUE", default_value = DEFAULT_QUEUE, global = true)]
    pub queue: String,

    /// Default per-attempt timeout in seconds
    #[arg(long, env = "SCANQ_TASK_TIMEOUT", default_value_t = DEFAULT_TIMEOUT_SECS, global = true)]
    pub task_timeout: u64,

    #[arg(long, env = "SCANQ_TASK_MAX_RETRIES", default_value_t = DEFAULT_MAX_ATTEMPTS, global = true)]
    pub max_attempts: u32,

    #[arg(long, env = "SCANQ_BACKOFF_MULTIPLIER", default_value_t = 1.0, global = true)]
    pub backoff_multiplier: f64,

    /// Seconds
    #[arg(long, env = "SCANQ_BACKOFF_MIN", default_value_t = 1, global = true)]
    pub backoff_min: u64,

    /// Seconds
    #[arg(long, env = "SCANQ_BACKOFF_MAX", default_value_t = 30, global = true)]
    pub backoff_max: u64,

    #[arg(long, env = "SCANQ_WORKERS", default_value_t = 2, global = true)]
    pub workers: usize,

    #[arg(long, env = "SCANQ_WORKER_PREFIX", default_value = "scanq", global = true)]
    pub worker_prefix: String,

    #[arg(long, env = "SCANQ_HTTP_HOST", default_value = "127.0.0.1", global = true)]
    pub host: String,

    #[arg(long, env = "SCANQ_HTTP_PORT", default_value_t = 5001, global = true)]
    pub port: u16,

    #[arg(long, env = "SCANQ_RATE_LIMIT_BURST", default_value_t = 200, global = true)]
    pub rate_limit_burst: u32,

    #[arg(long, env = "SCANQ_RATE_LIMIT_RATE", default_value_t = 100, global = true)]
    pub rate_limit_rate: u32,

    #[arg(long, env = "SCANQ_LOG_FORMAT", value_enum, default_value_t = LogFormat::Pretty, global = true)]
    pub log_format: LogFormat,
}

impl DaemonConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.task_timeout == 0 || self.task_timeout > MAX_TIMEOUT_SECS {
            anyhow::bail!(
                "task timeout must be between 1 and {} seconds, got {}",
                MAX_TIMEOUT_SECS,
                self.task_timeout
            );
        }
        if self.max_attempts == 0 {
            anyhow::bail!("max attempts must be at least 1");
        }
        if self.workers == 0 {
            anyhow::bail!("worker count must be at least 1");
        }
        if !self.backoff_multiplier.is_finite() || self.backoff_multiplier < 0.0 {
            anyhow::bail!("backoff multiplier must be a non-negative number");
        }
        if self.queue.trim().is_empty() {
            anyhow::bail!("queue name must not be empty");
        }
        Ok(())
    }

    pub fn job_defaults(&self) -> JobDefaults {
        JobDefaults {
            queue: self.queue.clone(),
            timeout_secs: self.task_timeout,
            max_attempts: self.max_attempts,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            backoff: BackoffPolicy::new(
                self.backoff_multiplier,
                Duration::from_secs(self.backoff_min),
                Duration::from_secs(self.backoff_max),
            ),
        }
    }

    pub fn pool_config(&self) -> PoolConfig {
        PoolConfig {
            size: self.workers,
            queue: self.queue.clone(),
            name_prefix: self.worker_prefix.clone(),
        }
    }

    pub fn http_config(&self) -> HttpServerConfig {
        HttpServerConfig {
            host: self.host.clone(),
            port: self.port,
            rate_limit_burst: self.rate_limit_burst,
            rate_limit_rate: self.rate_limit_rate,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("scanqd").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_defaults() {
        let cli = parse(&["--queue-url", "memory://"]);
        assert_eq!(cli.command(), Command::All);

        let config = &cli.config;
        config.validate().unwrap();
        assert_eq!(config.queue, "scanq-tasks");
        assert_eq!(config.job_defaults().timeout_secs, 300);
        assert_eq!(config.retry_policy().max_attempts, 3);
        assert_eq!(config.retry_policy().backoff, BackoffPolicy::default());
        assert_eq!(config.http_config().port, 5001);
    }

    #[test]
    fn test_subcommand_with_trailing_flags() {
        let cli = parse(&["worker", "--workers", "4", "--queue", "ics"]);
        assert_eq!(cli.command(), Command::Worker);
        assert_eq!(cli.config.pool_config().size, 4);
        assert_eq!(cli.config.pool_config().queue, "ics");
    }

    #[test]
    fn test_validation() {
        assert!(parse(&["--task-timeout", "0"]).config.validate().is_err());
        assert!(parse(&["--task-timeout", "86401"]).config.validate().is_err());
        assert!(parse(&["--max-attempts", "0"]).config.validate().is_err());
        assert!(parse(&["--workers", "0"]).config.validate().is_err());
        assert!(parse(&["--backoff-multiplier=-1"]).config.validate().is_err());
    }

    #[test]
    fn test_log_format() {
        assert_eq!(parse(&["--log-format", "json"]).config.log_format, LogFormat::Json);
        assert!(Cli::try_parse_from(["scanqd", "--log-format", "xml"]).is_err());
    }
}
