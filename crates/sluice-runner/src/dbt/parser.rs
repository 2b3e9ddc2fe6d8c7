use crate::log::TaskLog;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Deserialize;

/// Rewrites dbt's JSON log stream into clean, progress-aware output,
/// tracking in-flight models so the log always shows what is still running.
///
/// Both wire layouts are handled: log_version 2 (flat top-level
/// code/msg/level) and log_version 3 (nested `info{}` + `data{}`).
pub(crate) struct DbtLogParser {
    log: TaskLog,
    running: Vec<RunningNode>,
    total: usize,
    finished: usize,
}

struct RunningNode {
    name: String,
    unique_id: String,
    started_at: DateTime<Utc>,
}

#[derive(Debug, Default, Deserialize)]
struct EventData {
    #[serde(default)]
    stat_line: String,
    #[serde(default)]
    status: String,
    #[serde(default)]
    execution_time: f64,
    #[serde(default)]
    total: usize,
    #[serde(default)]
    node_info: NodeInfo,
    #[serde(default)]
    msg: String,
}

#[derive(Debug, Default, Deserialize)]
struct NodeInfo {
    #[serde(default)]
    node_name: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    node_path: String,
    #[serde(default)]
    path: String,
    #[serde(default)]
    materialized: String,
    #[serde(default)]
    unique_id: String,
    #[serde(default)]
    node_started_at: String,
}

impl NodeInfo {
    fn resolved_name(&self) -> &str {
        [&self.node_name, &self.name, &self.node_path, &self.path]
            .into_iter()
            .find(|s| !s.is_empty())
            .map(String::as_str)
            .unwrap_or("")
    }
}

struct Event {
    code: String,
    msg: String,
    level: String,
    ts: DateTime<Utc>,
    data: EventData,
}

impl DbtLogParser {
    pub(crate) fn new(log: TaskLog) -> Self {
        Self {
            log,
            running: Vec::new(),
            total: 0,
            finished: 0,
        }
    }

    pub(crate) fn handle_line(&mut self, raw: &str) {
        let line = raw.trim();
        if line.is_empty() {
            return;
        }

        // Non-JSON passthrough.
        if !line.starts_with('{') {
            self.emit(line);
            return;
        }

        let Some(event) = parse_event(line) else {
            self.emit(line);
            return;
        };

        if event.level == "debug" {
            return;
        }
        self.handle_event(event);
    }

    fn emit(&self, line: &str) {
        self.log.write_line(line);
    }

    fn handle_event(&mut self, event: Event) {
        match event.code.as_str() {
            // Header info.
            "A001" => self.emit(&event.msg),
            "W006" => {
                let stat = if event.data.stat_line.is_empty() {
                    &event.msg
                } else {
                    &event.data.stat_line
                };
                self.emit(stat);
            }
            "Q026" => {
                self.emit(&event.msg);
                self.emit("");
            }

            // Node started: remember it, show it when something finishes.
            "Q033" => {
                if event.data.total > 0 {
                    self.total = event.data.total;
                }
                let started_at = parse_timestamp(&event.data.node_info.node_started_at)
                    .unwrap_or(event.ts);
                self.running.push(RunningNode {
                    name: event.data.node_info.resolved_name().to_string(),
                    unique_id: event.data.node_info.unique_id.clone(),
                    started_at,
                });
            }

            // Model completed.
            "Q012" => {
                self.finished += 1;
                let name = event.data.node_info.resolved_name().to_string();
                self.remove_running(&event.data.node_info.unique_id, &name);

                let materialized = if event.data.node_info.materialized.is_empty() {
                    String::new()
                } else {
                    format!(" {}", event.data.node_info.materialized)
                };
                let icon = if event.data.status == "error" { "✗" } else { "✓" };

                let mut line = format!(
                    "[{}/{}] {icon} {name}{materialized} ({} in {:.1}s)",
                    self.finished, self.total, event.data.status, event.data.execution_time
                );
                let still = self.running_status(event.ts);
                if !still.is_empty() {
                    line.push_str("  |  Running: ");
                    line.push_str(&still.join(", "));
                }
                self.emit(&line);
            }

            // Test completed.
            "Q035" => {
                self.finished += 1;
                let name = event.data.node_info.resolved_name().to_string();
                self.remove_running(&event.data.node_info.unique_id, &name);

                let icon = match event.data.status.as_str() {
                    "fail" | "error" => "✗",
                    "warn" => "⚠",
                    _ => "✓",
                };
                let mut line = format!(
                    "[{}/{}] {icon} {name} ({}, {:.1}s)",
                    self.finished, self.total, event.data.status, event.data.execution_time
                );
                let still = self.running_status(event.ts);
                if !still.is_empty() {
                    line.push_str("  |  Running: ");
                    line.push_str(&still.join(", "));
                }
                self.emit(&line);
            }

            // Run summary.
            "E040" => {
                self.emit("");
                self.emit(&event.msg);
            }
            "Z030" | "Z023" => self.emit(&event.msg),

            // Errors.
            "E001" | "E002" | "E003" | "E004" | "E005" => {
                let msg = if event.data.msg.is_empty() {
                    &event.msg
                } else {
                    &event.data.msg
                };
                self.emit(&format!("  ERROR: {msg}"));
            }

            // Noise.
            "I030" => {}

            _ => {
                if !event.msg.is_empty() {
                    self.emit(&event.msg);
                }
            }
        }
    }

    fn remove_running(&mut self, unique_id: &str, name: &str) {
        if let Some(idx) = self.running.iter().position(|r| {
            (!unique_id.is_empty() && r.unique_id == unique_id)
                || (!name.is_empty() && r.name == name)
        }) {
            self.running.remove(idx);
        }
    }

    fn running_status(&self, now: DateTime<Utc>) -> Vec<String> {
        self.running
            .iter()
            .filter(|r| !r.name.is_empty())
            .map(|r| {
                let elapsed = (now - r.started_at).num_seconds().max(0);
                format!("{} ({elapsed}s)", r.name)
            })
            .collect()
    }
}

fn parse_event(line: &str) -> Option<Event> {
    let value: serde_json::Value = serde_json::from_str(line).ok()?;

    let (code, msg, level, ts) = if let Some(info) = value.get("info").filter(|i| i.is_object()) {
        // log_version 3 (dbt 1.5+): nested format.
        (
            info.get("code").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            info.get("msg").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            info.get("level").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            info.get("ts").and_then(|v| v.as_str()).unwrap_or(""),
        )
    } else {
        // log_version 2 (dbt 1.3-1.4): flat format.
        (
            value.get("code").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            value.get("msg").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            value.get("level").and_then(|v| v.as_str()).unwrap_or("").to_string(),
            value.get("ts").and_then(|v| v.as_str()).unwrap_or(""),
        )
    };

    let data = value
        .get("data")
        .cloned()
        .and_then(|d| serde_json::from_value(d).ok())
        .unwrap_or_default();

    Some(Event {
        code,
        msg,
        level,
        ts: parse_timestamp(ts).unwrap_or_else(Utc::now),
        data,
    })
}

fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for format in ["%Y-%m-%dT%H:%M:%S%.fZ", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, format) {
            return Some(naive.and_utc());
        }
    }
    None
}
