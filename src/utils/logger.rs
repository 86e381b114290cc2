use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;

/// Structured log events for remote calls and lifecycle operations.
///
/// Activation codes must never reach these helpers unmasked; use
/// `license::codes::mask_code` first.
#[derive(Debug, Clone, Serialize)]
pub enum LogEvent {
    Operation {
        name: String,
        phase: OperationPhase,
        #[serde(skip_serializing_if = "Option::is_none")]
        context: Option<LogContext>,
    },
    Network {
        operation: String,
        status: NetworkStatus,
        duration_ms: u64,
        #[serde(skip_serializing_if = "Option::is_none")]
        details: Option<NetworkDetails>,
    },
}

#[derive(Debug, Clone, Serialize)]
pub enum OperationPhase {
    Start,
    Complete { duration_ms: u64 },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct LogContext {
    #[serde(flatten)]
    pub fields: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize)]
pub enum NetworkStatus {
    Success,
    Timeout { duration_ms: u64 },
    Failed { error: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct NetworkDetails {
    pub endpoint: String,
    pub method: String,
    pub status_code: Option<u16>,
}

pub fn log_event(event: LogEvent) {
    match event {
        LogEvent::Operation { name, phase, context } => {
            let ctx_str = context
                .filter(|c| !c.fields.is_empty())
                .map(|c| format!(" | {:?}", c.fields))
                .unwrap_or_default();
            match phase {
                OperationPhase::Start => {
                    log::info!("🚀 {} STARTING{}", name, ctx_str);
                }
                OperationPhase::Complete { duration_ms } => {
                    log::info!("✅ {} COMPLETE in {}ms{}", name, duration_ms, ctx_str);
                }
                OperationPhase::Failed { error } => {
                    log::error!("❌ {} FAILED: {}{}", name, error, ctx_str);
                }
            }
        }
        LogEvent::Network { operation, status, duration_ms, details } => {
            let detail_str = details
                .map(|d| {
                    let code = d.status_code.map(|c| format!(" -> {}", c)).unwrap_or_default();
                    format!(" | {} {}{}", d.method, d.endpoint, code)
                })
                .unwrap_or_default();
            match status {
                NetworkStatus::Success => {
                    log::info!("🌐 {} SUCCESS in {}ms{}", operation, duration_ms, detail_str);
                }
                NetworkStatus::Timeout { duration_ms: timeout } => {
                    log::warn!("⏱️ {} TIMEOUT after {}ms{}", operation, timeout, detail_str);
                }
                NetworkStatus::Failed { error } => {
                    log::warn!("❌ {} FAILED: {}{}", operation, error, detail_str);
                }
            }
        }
    }
}

/// Runs `f` and logs its start, duration and outcome. `context` is attached to every line.
pub async fn log_async_operation<F, Fut, T, E>(
    name: &str,
    context: Option<LogContext>,
    f: F,
) -> Result<T, E>
where
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let start = Instant::now();
    log_event(LogEvent::Operation {
        name: name.to_string(),
        phase: OperationPhase::Start,
        context: context.clone(),
    });

    let result = f().await;
    let phase = match &result {
        Ok(_) => OperationPhase::Complete {
            duration_ms: start.elapsed().as_millis() as u64,
        },
        Err(e) => OperationPhase::Failed {
            error: e.to_string(),
        },
    };
    log_event(LogEvent::Operation {
        name: name.to_string(),
        phase,
        context,
    });
    result
}

pub fn log_state_transition(component: &str, from_state: &str, to_state: &str, valid: bool) {
    let status = if valid { "✅ VALID" } else { "⚠️  INVALID" };
    log::info!("🔄 STATE [{}]: {} → {} ({})", component, from_state, to_state, status);
}

/// Quick context creation; skips the allocation when debug logging is off.
#[macro_export]
macro_rules! log_context {
    ($($key:expr => $value:expr),* $(,)?) => {
        {
            if log::log_enabled!(log::Level::Debug) {
                let mut context = std::collections::HashMap::new();
                $(
                    context.insert($key.to_string(), $value.to_string());
                )*
                context
            } else {
                std::collections::HashMap::new()
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_context_macro() {
        let context = log_context! {
            "operation" => "verify",
            "type" => "trial",
        };

        if log::log_enabled!(log::Level::Debug) {
            assert_eq!(context.len(), 2);
            assert_eq!(context.get("operation"), Some(&"verify".to_string()));
        } else {
            assert!(context.is_empty());
        }
    }

    #[test]
    fn test_operation_event_carries_context() {
        let mut fields = HashMap::new();
        fields.insert("code".to_string(), "HT-*-ABCDEF12".to_string());
        let event = LogEvent::Operation {
            name: "activate_license".to_string(),
            phase: OperationPhase::Start,
            context: Some(LogContext { fields }),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["Operation"]["context"]["code"], "HT-*-ABCDEF12");
        log_event(event);
    }

    #[test]
    fn test_network_event_serializes() {
        let event = LogEvent::Network {
            operation: "license verify".to_string(),
            status: NetworkStatus::Timeout { duration_ms: 30_000 },
            duration_ms: 30_000,
            details: Some(NetworkDetails {
                endpoint: "/license/verify".to_string(),
                method: "POST".to_string(),
                status_code: None,
            }),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["Network"]["operation"], "license verify");
        log_event(event);
    }

    #[test]
    fn test_log_async_operation_passes_result_through() {
        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        let ok: Result<u32, String> = rt.block_on(log_async_operation("ok", None, || async { Ok(7) }));
        assert_eq!(ok, Ok(7));

        let err: Result<u32, String> =
            rt.block_on(log_async_operation("err", None, || async { Err("boom".to_string()) }));
        assert_eq!(err, Err("boom".to_string()));
    }
}
