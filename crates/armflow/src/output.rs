//! Result reporting
//!
//! stdout carries exactly one JSON line for the orchestrator; the colored
//! summary goes to stderr.

use crate::commands::Outcome;
use armflow_cloud::{CloudError, Completion, DEFAULT_POLL_INTERVAL, ErrorClass};
use colored::Colorize;
use serde_json::json;
use std::process::ExitCode;

/// EX_TEMPFAIL: re-invoke later
const EXIT_RETRY: u8 = 75;
const EXIT_FAILED: u8 = 1;

pub fn report(outcome: &Outcome) -> ExitCode {
    let line = match outcome {
        Outcome::Completed {
            operation,
            completion,
        } => {
            eprintln!(
                "{} {}",
                "✓".green(),
                format!("{} が完了しました", operation).green()
            );
            let (result, resource) = match completion {
                Completion::Resource(body) => ("resource", body.clone()),
                Completion::Absent => ("absent", serde_json::Value::Null),
                Completion::Done => ("done", serde_json::Value::Null),
            };
            json!({
                "status": "completed",
                "operation": operation,
                "result": result,
                "resource": resource,
            })
        }
        Outcome::Drift(record) => {
            if record.is_drifted {
                eprintln!("{} {}", "!".yellow(), "ドリフトを検出しました".yellow());
                for id in &record.declared_resource_ids {
                    if !record.state.iter().any(|s| s.eq_ignore_ascii_case(id)) {
                        eprintln!("  • {} {}", "missing".red(), id);
                    }
                }
            } else {
                eprintln!("{} {}", "✓".green(), "ドリフトはありません".green());
            }
            json!({
                "status": "completed",
                "operation": "pull",
                "drift": record,
            })
        }
        Outcome::RetryLater { operation, signal } => {
            eprintln!(
                "{} {}",
                "…".cyan(),
                format!(
                    "{} は処理中です。{} 秒後に再実行してください ({})",
                    operation,
                    signal.after.as_secs(),
                    signal.reason
                )
                .cyan()
            );
            json!({
                "status": "retry_later",
                "operation": operation,
                "after_secs": signal.after.as_secs(),
                "reason": signal.reason,
            })
        }
    };

    println!("{}", line);
    match outcome {
        Outcome::RetryLater { .. } => ExitCode::from(EXIT_RETRY),
        _ => ExitCode::SUCCESS,
    }
}

pub fn report_error(err: &anyhow::Error) -> ExitCode {
    let cloud = err.downcast_ref::<CloudError>();
    let class = cloud
        .map(CloudError::class)
        .unwrap_or(ErrorClass::NonRecoverable);
    let status = cloud.and_then(CloudError::status);

    eprintln!("{} {:#}", "✗ エラー:".red().bold(), err);

    let line = match class {
        ErrorClass::Recoverable => {
            let after = cloud
                .and_then(|e| e.retry_after(DEFAULT_POLL_INTERVAL))
                .unwrap_or(DEFAULT_POLL_INTERVAL);
            json!({
                "status": "failed",
                "class": "recoverable",
                "provider_status": status,
                "after_secs": after.as_secs(),
                "error": format!("{:#}", err),
            })
        }
        ErrorClass::NonRecoverable => json!({
            "status": "failed",
            "class": "non_recoverable",
            "provider_status": status,
            "error": format!("{:#}", err),
        }),
    };
    println!("{}", line);

    match class {
        ErrorClass::Recoverable => ExitCode::from(EXIT_RETRY),
        ErrorClass::NonRecoverable => ExitCode::from(EXIT_FAILED),
    }
}
