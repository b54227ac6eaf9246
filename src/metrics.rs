use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

#[derive(Debug, Default)]
struct DurationStat {
    sum_seconds: f64,
    count: u64,
}

/// Counter registry for the agent/daemon, rendered in Prometheus text
/// exposition format at GET /metrics.
#[derive(Debug, Default)]
pub struct Metrics {
    agent_requests: Mutex<BTreeMap<String, u64>>,
    agent_tokens: Mutex<BTreeMap<String, u64>>,
    agent_duration: Mutex<BTreeMap<String, DurationStat>>,
    active_sessions: Mutex<BTreeMap<String, i64>>,
    transport_errors: Mutex<BTreeMap<(String, String), u64>>,
    model_usage: Mutex<BTreeMap<(String, String), u64>>,
    model_failures: Mutex<BTreeMap<(String, String), u64>>,
}

fn label(v: &str) -> String {
    if v.is_empty() {
        "unknown".to_string()
    } else {
        v.to_string()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_agent_run(&self, finish_reason: &str, duration: Duration, token_count: usize) {
        let reason = label(finish_reason);
        *self
            .agent_requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(reason.clone())
            .or_default() += 1;
        *self
            .agent_tokens
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(reason.clone())
            .or_default() += token_count as u64;
        let mut durations = self
            .agent_duration
            .lock()
            .unwrap_or_else(|p| p.into_inner());
        let stat = durations.entry(reason).or_default();
        stat.sum_seconds += duration.as_secs_f64();
        stat.count += 1;
    }

    pub fn inc_active_sessions(&self, transport: &str) {
        *self
            .active_sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(label(transport))
            .or_default() += 1;
    }

    pub fn dec_active_sessions(&self, transport: &str) {
        *self
            .active_sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry(label(transport))
            .or_default() -= 1;
    }

    pub fn record_transport_error(&self, transport: &str, reason: &str) {
        *self
            .transport_errors
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry((label(transport), label(reason)))
            .or_default() += 1;
    }

    pub fn record_model_usage(&self, role: &str, model: &str) {
        *self
            .model_usage
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry((label(role), label(model)))
            .or_default() += 1;
    }

    pub fn record_model_failure(&self, role: &str, model: &str) {
        *self
            .model_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .entry((label(role), label(model)))
            .or_default() += 1;
    }

    pub fn agent_request_count(&self, finish_reason: &str) -> u64 {
        self.agent_requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&label(finish_reason))
            .copied()
            .unwrap_or(0)
    }

    pub fn model_usage_count(&self, role: &str, model: &str) -> u64 {
        self.model_usage
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(label(role), label(model)))
            .copied()
            .unwrap_or(0)
    }

    pub fn model_failure_count(&self, role: &str, model: &str) -> u64 {
        self.model_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(label(role), label(model)))
            .copied()
            .unwrap_or(0)
    }

    pub fn transport_error_count(&self, transport: &str, reason: &str) -> u64 {
        self.transport_errors
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(label(transport), label(reason)))
            .copied()
            .unwrap_or(0)
    }

    /// Renders all collectors in Prometheus text exposition format.
    pub fn render(&self) -> String {
        let mut out = String::new();

        out.push_str("# TYPE mycodex_agent_requests_total counter\n");
        for (reason, v) in self
            .agent_requests
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
        {
            let _ = writeln!(
                out,
                "mycodex_agent_requests_total{{finish_reason=\"{reason}\"}} {v}"
            );
        }

        out.push_str("# TYPE mycodex_agent_tokens_total counter\n");
        for (reason, v) in self
            .agent_tokens
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
        {
            let _ = writeln!(
                out,
                "mycodex_agent_tokens_total{{finish_reason=\"{reason}\"}} {v}"
            );
        }

        out.push_str("# TYPE mycodex_agent_duration_seconds summary\n");
        for (reason, stat) in self
            .agent_duration
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
        {
            let _ = writeln!(
                out,
                "mycodex_agent_duration_seconds_sum{{finish_reason=\"{reason}\"}} {}",
                stat.sum_seconds
            );
            let _ = writeln!(
                out,
                "mycodex_agent_duration_seconds_count{{finish_reason=\"{reason}\"}} {}",
                stat.count
            );
        }

        out.push_str("# TYPE mycodex_transport_active_sessions gauge\n");
        for (transport, v) in self
            .active_sessions
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
        {
            let _ = writeln!(
                out,
                "mycodex_transport_active_sessions{{transport=\"{transport}\"}} {v}"
            );
        }

        out.push_str("# TYPE mycodex_transport_errors_total counter\n");
        for ((transport, reason), v) in self
            .transport_errors
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
        {
            let _ = writeln!(
                out,
                "mycodex_transport_errors_total{{transport=\"{transport}\",reason=\"{reason}\"}} {v}"
            );
        }

        out.push_str("# TYPE mycodex_model_usage_total counter\n");
        for ((role, model), v) in self
            .model_usage
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
        {
            let _ = writeln!(
                out,
                "mycodex_model_usage_total{{role=\"{role}\",model=\"{model}\"}} {v}"
            );
        }

        out.push_str("# TYPE mycodex_model_failures_total counter\n");
        for ((role, model), v) in self
            .model_failures
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .iter()
        {
            let _ = writeln!(
                out,
                "mycodex_model_failures_total{{role=\"{role}\",model=\"{model}\"}} {v}"
            );
        }

        out
    }
}
