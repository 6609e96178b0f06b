//! scanq CLI - command-line client for the scanq Control API

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::time::Duration;
use tabled::{Table, Tabled};

const DEFAULT_API_URL: &str = "http://127.0.0.1:5001";
const POLL_INTERVAL: Duration = Duration::from_secs(2);
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const TERMINAL_STATES: &[&str] = &["SUCCESS", "FAILED", "CANCELLED"];

#[derive(Parser)]
#[command(name = "scanq")]
#[command(about = "Submit and track scan module jobs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Control API base URL
    #[arg(long, env = "SCANQ_API_URL", default_value = DEFAULT_API_URL, global = true)]
    api_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Submit a module run
    Submit {
        /// Module key (see `scanq modules`)
        module: String,

        /// Payload as a JSON object
        #[arg(long)]
        payload: Option<String>,

        /// Shorthand for `"target"` in the payload
        #[arg(short, long)]
        target: Option<String>,

        /// Per-attempt timeout in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Poll until the job finishes
        #[arg(short, long)]
        wait: bool,
    },

    /// Show a job
    Status { job_id: String },

    /// Cancel a pending job
    Cancel { job_id: String },

    /// Queue backend health
    Health,

    /// Live workers
    Workers,

    /// Registered modules
    Modules,
}

#[derive(Debug, Deserialize)]
struct JobMeta {
    module: String,
    queue: String,
    retries: u32,
    max_attempts: u32,
    timeout: u64,
    runtime_seconds: Option<f64>,
    error: Option<String>,
    worker: Option<String>,
}

#[derive(Debug, Deserialize)]
struct JobSnapshot {
    id: String,
    status: String,
    enqueued_at: Option<String>,
    started_at: Option<String>,
    finished_at: Option<String>,
    result: Option<Value>,
    meta: JobMeta,
}

#[derive(Deserialize, Tabled)]
struct WorkerRow {
    name: String,
    state: String,
    #[tabled(display_with = "display_list")]
    queues: Vec<String>,
    #[tabled(display_with = "display_opt")]
    current_job: Option<String>,
    orphaned_calls: u64,
    #[tabled(display_with = "display_opt")]
    last_heartbeat: Option<String>,
}

#[derive(Deserialize, Tabled)]
struct ModuleRow {
    key: String,
    #[serde(rename = "async")]
    #[tabled(rename = "async")]
    is_async: bool,
    invocation: String,
    description: String,
}

fn display_opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "-".to_string())
}

fn display_list(values: &[String]) -> String {
    values.join(",")
}

/// Merge `--payload` and `--target` into one JSON object
fn build_payload(payload: Option<&str>, target: Option<&str>) -> Result<Value> {
    let mut map = match payload {
        Some(raw) => match serde_json::from_str::<Value>(raw).context("Invalid JSON payload")? {
            Value::Object(map) => map,
            other => bail!("Payload must be a JSON object, got {}", other),
        },
        None => Map::new(),
    };
    if let Some(target) = target {
        map.insert("target".to_string(), Value::String(target.to_string()));
    }
    Ok(Value::Object(map))
}

fn is_terminal(status: &str) -> bool {
    TERMINAL_STATES.contains(&status)
}

fn colored_status(status: &str) -> colored::ColoredString {
    match status {
        "SUCCESS" => status.green().bold(),
        "FAILED" => status.red().bold(),
        "RUNNING" => status.cyan().bold(),
        "CANCELLED" => status.yellow().bold(),
        _ => status.normal(),
    }
}

/// Turn an error body into a readable message
fn describe_error(status: reqwest::StatusCode, body: &Value) -> String {
    let message = body
        .get("error")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| body.to_string());
    match body.get("available").and_then(Value::as_array) {
        Some(keys) => {
            let keys: Vec<&str> = keys.iter().filter_map(Value::as_str).collect();
            format!("{} ({}); available: {}", message, status, keys.join(", "))
        }
        None => format!("{} ({})", message, status),
    }
}

struct ApiClient {
    base: String,
    http: reqwest::Client,
}

impl ApiClient {
    fn new(base: &str) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self {
            base: base.trim_end_matches('/').to_string(),
            http,
        })
    }

    async fn send(&self, request: reqwest::RequestBuilder) -> Result<Value> {
        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach the Control API at {}", self.base))?;
        let status = response.status();
        let body: Value = response.json().await.context("Failed to parse response")?;
        if !status.is_success() {
            bail!("{}", describe_error(status, &body));
        }
        Ok(body)
    }

    async fn get(&self, path: &str) -> Result<Value> {
        self.send(self.http.get(format!("{}{}", self.base, path))).await
    }

    async fn submit(&self, module: &str, payload: Value, timeout: Option<u64>) -> Result<String> {
        let mut body = json!({ "module": module, "payload": payload });
        if let Some(timeout) = timeout {
            body["timeout"] = json!(timeout);
        }
        let response = self
            .send(self.http.post(format!("{}/api/tasks", self.base)).json(&body))
            .await?;
        response["job_id"]
            .as_str()
            .map(str::to_string)
            .context("No job_id in response")
    }

    async fn status(&self, job_id: &str) -> Result<JobSnapshot> {
        let body = self.get(&format!("/api/tasks/{}", job_id)).await?;
        serde_json::from_value(body).context("Unexpected job snapshot")
    }

    async fn cancel(&self, job_id: &str) -> Result<JobSnapshot> {
        let body = self
            .send(self.http.delete(format!("{}/api/tasks/{}", self.base, job_id)))
            .await?;
        serde_json::from_value(body).context("Unexpected job snapshot")
    }
}

fn print_job(job: &JobSnapshot) {
    println!("{} {}", "Job".bold(), job.id);
    println!("  {} {}", "Status:".bold(), colored_status(&job.status));
    println!("  {} {}", "Module:".bold(), job.meta.module);
    println!("  {} {}", "Queue:".bold(), job.meta.queue);
    println!(
        "  {} {}/{}",
        "Retries:".bold(),
        job.meta.retries,
        job.meta.max_attempts.saturating_sub(1)
    );
    println!("  {} {}s", "Timeout:".bold(), job.meta.timeout);
    println!("  {} {}", "Enqueued:".bold(), display_opt(&job.enqueued_at));
    println!("  {} {}", "Started:".bold(), display_opt(&job.started_at));
    println!("  {} {}", "Finished:".bold(), display_opt(&job.finished_at));
    if let Some(runtime) = job.meta.runtime_seconds {
        println!("  {} {:.3}s", "Runtime:".bold(), runtime);
    }
    if let Some(worker) = &job.meta.worker {
        println!("  {} {}", "Worker:".bold(), worker);
    }
    if let Some(error) = &job.meta.error {
        println!("  {} {}", "Error:".bold(), error.red());
    }
    if let Some(result) = &job.result {
        println!("  {}", "Result:".bold());
        let pretty = serde_json::to_string_pretty(result).unwrap_or_else(|_| result.to_string());
        for line in pretty.lines() {
            println!("    {}", line);
        }
    }
}

async fn wait_for(client: &ApiClient, job_id: &str) -> Result<JobSnapshot> {
    let mut last_status = String::new();
    loop {
        let job = client.status(job_id).await?;
        if job.status != last_status {
            println!("  {} {}", "→".cyan(), colored_status(&job.status));
            last_status = job.status.clone();
        }
        if is_terminal(&job.status) {
            return Ok(job);
        }
        tokio::time::sleep(POLL_INTERVAL).await;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let client = ApiClient::new(&cli.api_url)?;

    match cli.command {
        Commands::Submit {
            module,
            payload,
            target,
            timeout,
            wait,
        } => {
            let payload = build_payload(payload.as_deref(), target.as_deref())?;
            let job_id = client.submit(&module, payload, timeout).await?;
            println!("{}", "✓ Job submitted".green().bold());
            println!("  {} {}", "Job ID:".bold(), job_id);

            if wait {
                println!();
                let job = wait_for(&client, &job_id).await?;
                println!();
                print_job(&job);
                if job.status == "FAILED" {
                    std::process::exit(1);
                }
            }
        }

        Commands::Status { job_id } => {
            let job = client.status(&job_id).await?;
            print_job(&job);
        }

        Commands::Cancel { job_id } => {
            let job = client.cancel(&job_id).await?;
            println!(
                "{}",
                format!("✓ Job {} {}", job.id, job.status.to_lowercase())
                    .green()
                    .bold()
            );
        }

        Commands::Health => {
            println!("{}", "Queue Health".cyan().bold());
            println!();
            match client.get("/api/health").await {
                Ok(health) => {
                    let backend = health["queueBackend"].as_str().unwrap_or("unknown");
                    let shown = if backend == "ok" {
                        backend.green()
                    } else {
                        backend.red()
                    };
                    println!("  {} {}", "API URL:".bold(), cli.api_url);
                    println!("  {} {}", "Backend:".bold(), shown);
                    if let Some(pending) = health.get("pending") {
                        println!("  {} {}", "Pending:".bold(), pending);
                    }
                    if let Some(running) = health.get("running") {
                        println!("  {} {}", "Running:".bold(), running);
                    }
                    println!("  {} {}", "Workers:".bold(), health["workers"]);
                }
                Err(e) => {
                    println!("  {} {}", "Status:".bold(), "UNREACHABLE".red());
                    println!("  {} {}", "Error:".bold(), e);
                    std::process::exit(1);
                }
            }
        }

        Commands::Workers => {
            let body = client.get("/api/health/workers").await?;
            let workers: Vec<WorkerRow> = serde_json::from_value(body["workers"].clone())
                .context("Unexpected worker listing")?;
            if workers.is_empty() {
                println!("{}", "No live workers".yellow());
            } else {
                println!("{}", Table::new(workers));
            }
        }

        Commands::Modules => {
            let body = client.get("/api/modules").await?;
            let modules: Vec<ModuleRow> = serde_json::from_value(body["modules"].clone())
                .context("Unexpected module listing")?;
            println!("{}", Table::new(modules));
        }
    }

    Ok(())
}
