// Worker constants (no magic values)
use std::time::Duration;

/// Sleep when the queue is empty
pub const IDLE_SLEEP_DURATION: Duration = Duration::from_millis(250);

/// Sleep after a backend error before polling again
pub const ERROR_RECOVERY_SLEEP_DURATION: Duration = Duration::from_secs(1);

/// How often a pool refreshes its workers' registry records
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);

/// A worker is reported alive if it heartbeated within this window
pub const WORKER_ALIVE_WINDOW_MS: i64 = 30_000;

/// Lease expiry is checked once every this many heartbeats
pub const REAP_EVERY_HEARTBEATS: u32 = 6;

/// Slack added to a job's worst-case runtime before its lease expires
pub const LEASE_GRACE_MS: i64 = 30_000;

/// Default queue name
pub const DEFAULT_QUEUE: &str = "scanq-tasks";

/// Default per-attempt timeout (seconds)
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

/// Upper bound accepted for a per-job timeout (one day)
pub const MAX_TIMEOUT_SECS: u64 = 86_400;

/// Default invocation attempts per job
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Nesting limit for submitted payloads
pub const MAX_PAYLOAD_DEPTH: usize = 32;
