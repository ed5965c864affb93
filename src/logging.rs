//! # Structured Logging
//!
//! Environment-aware `tracing` setup plus helpers that emit one structured event
//! per queue, lock, phase, rollback and schedule operation so a single import can
//! be followed across workers by `request_id` / `orchestration_id`.

use chrono::Utc;
use std::sync::OnceLock;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};
use uuid::Uuid;

static LOGGER_INITIALIZED: OnceLock<()> = OnceLock::new();

/// Initialize structured logging once per process.
///
/// `RUST_LOG` wins when set; otherwise the level follows the environment
/// (`IMPORT_ENV`, then `APP_ENV`). `IMPORT_LOG_FORMAT=json` switches the console
/// layer to JSON lines.
pub fn init_structured_logging() {
    LOGGER_INITIALIZED.get_or_init(|| {
        let environment = get_environment();
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(get_log_level(&environment)));
        let json = std::env::var("IMPORT_LOG_FORMAT")
            .map(|v| v.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let layer = if json {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .json()
                .with_filter(filter)
                .boxed()
        } else {
            fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
                .with_ansi(true)
                .with_filter(filter)
                .boxed()
        };

        // A host application may already own the global subscriber.
        if tracing_subscriber::registry().with(layer).try_init().is_err() {
            tracing::debug!("Global tracing subscriber already initialized - keeping it");
        }

        tracing::info!(
            pid = std::process::id(),
            environment = %environment,
            json = json,
            "STRUCTURED LOGGING: initialized"
        );
    });
}

fn get_environment() -> String {
    environment_from(|key| std::env::var(key).ok())
}

fn environment_from(lookup: impl Fn(&str) -> Option<String>) -> String {
    lookup("IMPORT_ENV")
        .or_else(|| lookup("APP_ENV"))
        .unwrap_or_else(|| "development".to_string())
}

fn get_log_level(environment: &str) -> &'static str {
    match environment {
        "production" => "info",
        _ => "debug",
    }
}

pub fn log_queue_operation(operation: &str, request_id: Uuid, priority: Option<i32>, status: &str, details: Option<&str>) {
    tracing::info!(
        operation = %operation,
        request_id = %request_id,
        priority = priority,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "QUEUE_OPERATION"
    );
}

pub fn log_lock_operation(operation: &str, resource: &str, owner: Uuid, status: &str) {
    tracing::debug!(
        operation = %operation,
        resource = %resource,
        owner = %owner,
        status = %status,
        timestamp = %Utc::now().to_rfc3339(),
        "LOCK_OPERATION"
    );
}

pub fn log_phase_operation(
    orchestration_id: Uuid,
    phase: &str,
    status: &str,
    percentage: f64,
    details: Option<&str>,
) {
    tracing::info!(
        orchestration_id = %orchestration_id,
        phase = %phase,
        status = %status,
        percentage = percentage,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "PHASE_OPERATION"
    );
}

pub fn log_rollback_operation(
    orchestration_id: Uuid,
    entity_type: &str,
    action_type: &str,
    success: bool,
    error: Option<&str>,
) {
    if success {
        tracing::info!(
            orchestration_id = %orchestration_id,
            entity_type = %entity_type,
            action_type = %action_type,
            success = success,
            "ROLLBACK_OPERATION"
        );
    } else {
        tracing::error!(
            orchestration_id = %orchestration_id,
            entity_type = %entity_type,
            action_type = %action_type,
            success = success,
            error = error,
            "ROLLBACK_OPERATION"
        );
    }
}

pub fn log_schedule_operation(operation: &str, schedule_id: Uuid, status: &str, details: Option<&str>) {
    tracing::info!(
        operation = %operation,
        schedule_id = %schedule_id,
        status = %status,
        details = details,
        timestamp = %Utc::now().to_rfc3339(),
        "SCHEDULE_OPERATION"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_environment_detection_prefers_import_env() {
        let env = environment_from(|key| match key {
            "IMPORT_ENV" => Some("staging".to_string()),
            "APP_ENV" => Some("production".to_string()),
            _ => None,
        });
        assert_eq!(env, "staging");

        let env = environment_from(|key| (key == "APP_ENV").then(|| "production".to_string()));
        assert_eq!(env, "production");

        assert_eq!(environment_from(|_| None), "development");
    }

    #[test]
    fn test_log_level_mapping() {
        assert_eq!(get_log_level("test"), "debug");
        assert_eq!(get_log_level("development"), "debug");
        assert_eq!(get_log_level("production"), "info");
    }

    #[test]
    fn test_init_is_idempotent() {
        init_structured_logging();
        init_structured_logging();
    }
}
