use std::sync::Arc;

use serde::Serialize;
use slackbot_agent::backend::{EnvSource, ResolvedBackend};
use slackbot_agent::servers::{stdio_servers, ToolServer};
use slackbot_agent::ProcessEnv;
use slackbot_core::config::{AppConfig, LoadOptions};

use crate::commands::{current_thread_runtime, escape_json, CommandResult, EXIT_DOCTOR};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CheckStatus {
    Pass,
    Fail,
    Skipped,
}

#[derive(Debug, Serialize)]
pub struct DoctorCheck {
    pub name: String,
    pub status: CheckStatus,
    pub details: String,
}

impl DoctorCheck {
    fn new(name: impl Into<String>, status: CheckStatus, details: impl Into<String>) -> Self {
        Self { name: name.into(), status, details: details.into() }
    }
}

#[derive(Debug, Serialize)]
pub struct DoctorReport {
    pub overall_status: CheckStatus,
    pub summary: String,
    pub checks: Vec<DoctorCheck>,
}

pub fn run(json_output: bool) -> CommandResult {
    let report = build_report(&ProcessEnv);
    let exit_code = if report.overall_status == CheckStatus::Pass { 0 } else { EXIT_DOCTOR };

    if json_output {
        let output = serde_json::to_string_pretty(&report).unwrap_or_else(|error| {
            format!(
                "{{\"overall_status\":\"fail\",\"summary\":\"doctor serialization failed\",\"error\":\"{}\"}}",
                escape_json(&error.to_string())
            )
        });
        return CommandResult { exit_code, output };
    }

    CommandResult { exit_code, output: render_human(&report) }
}

pub fn build_report(env: &dyn EnvSource) -> DoctorReport {
    let mut checks = Vec::new();

    match AppConfig::load(LoadOptions::default()) {
        Ok(config) => {
            checks.push(DoctorCheck::new(
                "config_validation",
                CheckStatus::Pass,
                "configuration loaded and validated",
            ));
            checks.push(check_backend(env));
            checks.extend(check_configured_servers(&config));
        }
        Err(error) => {
            checks.push(DoctorCheck::new("config_validation", CheckStatus::Fail, error.to_string()));
            checks.push(check_backend(env));
            checks.push(DoctorCheck::new(
                "tool_servers",
                CheckStatus::Skipped,
                "skipped because configuration did not load",
            ));
        }
    }

    summarize(checks)
}

fn summarize(checks: Vec<DoctorCheck>) -> DoctorReport {
    let any_fail = checks.iter().any(|check| check.status == CheckStatus::Fail);
    let overall_status = if any_fail { CheckStatus::Fail } else { CheckStatus::Pass };
    let summary = if any_fail {
        "doctor: one or more readiness checks failed".to_string()
    } else {
        "doctor: all readiness checks passed".to_string()
    };

    DoctorReport { overall_status, summary, checks }
}

fn check_backend(env: &dyn EnvSource) -> DoctorCheck {
    match ResolvedBackend::resolve(env) {
        Ok(backend) => DoctorCheck::new(
            "backend_selection",
            CheckStatus::Pass,
            format!(
                "mode={} model={} tracing={}",
                backend.config.mode.label(),
                backend.model(),
                backend.tracing_enabled()
            ),
        ),
        Err(error) => DoctorCheck::new("backend_selection", CheckStatus::Fail, error.to_string()),
    }
}

fn check_configured_servers(config: &AppConfig) -> Vec<DoctorCheck> {
    if config.mcp_servers.is_empty() {
        return vec![DoctorCheck::new(
            "tool_servers",
            CheckStatus::Skipped,
            "no tool servers configured",
        )];
    }

    let runtime = match current_thread_runtime() {
        Ok(runtime) => runtime,
        Err(error) => {
            return vec![DoctorCheck::new(
                "tool_servers",
                CheckStatus::Fail,
                format!("failed to initialize async runtime: {error}"),
            )];
        }
    };

    runtime.block_on(check_tool_servers(&stdio_servers(&config.mcp_servers)))
}

/// Connects, lists and cleans up each server in turn, one check per server.
pub async fn check_tool_servers(servers: &[Arc<dyn ToolServer>]) -> Vec<DoctorCheck> {
    let mut checks = Vec::with_capacity(servers.len());

    for server in servers {
        let name = format!("tool_server:{}", server.name());

        if let Err(error) = server.connect().await {
            checks.push(DoctorCheck::new(name, CheckStatus::Fail, error.to_string()));
            continue;
        }

        let listed = server.list_tools().await;
        let cleanup = server.cleanup().await;

        let check = match (listed, cleanup) {
            (Ok(tools), Ok(())) => DoctorCheck::new(
                name,
                CheckStatus::Pass,
                format!("connected, {} tool(s) advertised, cleaned up", tools.len()),
            ),
            (Err(error), _) => {
                DoctorCheck::new(name, CheckStatus::Fail, format!("listing tools failed: {error}"))
            }
            (Ok(_), Err(error)) => {
                DoctorCheck::new(name, CheckStatus::Fail, format!("cleanup failed: {error}"))
            }
        };
        checks.push(check);
    }

    checks
}

fn render_human(report: &DoctorReport) -> String {
    let mut lines = Vec::new();
    lines.push(report.summary.clone());

    for check in &report.checks {
        let marker = match check.status {
            CheckStatus::Pass => "ok",
            CheckStatus::Fail => "fail",
            CheckStatus::Skipped => "skip",
        };
        lines.push(format!("- [{marker}] {}: {}", check.name, check.details));
    }

    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::{render_human, summarize, CheckStatus, DoctorCheck};

    #[test]
    fn skipped_checks_do_not_fail_the_report() {
        let report = summarize(vec![
            DoctorCheck::new("config_validation", CheckStatus::Pass, "ok"),
            DoctorCheck::new("tool_servers", CheckStatus::Skipped, "no tool servers configured"),
        ]);

        assert_eq!(report.overall_status, CheckStatus::Pass);
    }

    #[test]
    fn human_output_marks_each_check() {
        let report = summarize(vec![
            DoctorCheck::new("backend_selection", CheckStatus::Pass, "mode=direct"),
            DoctorCheck::new("tool_server:time", CheckStatus::Fail, "spawn failed"),
        ]);

        let rendered = render_human(&report);

        assert!(rendered.starts_with("doctor: one or more readiness checks failed"));
        assert!(rendered.contains("- [ok] backend_selection: mode=direct"));
        assert!(rendered.contains("- [fail] tool_server:time: spawn failed"));
    }
}
