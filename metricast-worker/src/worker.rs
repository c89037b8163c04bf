//! Method registry and request dispatch.
//!
//! One RPC method is registered per configured composite, plus the
//! `ping` diagnostic. Dispatch validates the fixed parameters (`node`,
//! `period`, `exclude_regexp`) and the composite's declared inputs,
//! then runs the request pipeline under the bus request timeout.

use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{Map, Value as Json, json};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use metricast_composite::{CompositeEngine, CompositeRequest};
use metricast_core::cache::CacheClient;
use metricast_core::composite::CompositeSet;
use metricast_core::config::WorkerConfig;
use metricast_core::error::{DefinitionError, MetricastError, RpcError};

/// Registry owning the engine, the composite definitions, and the
/// request-level defaults.
pub struct MethodRegistry<C> {
    engine: CompositeEngine<C>,
    composites: CompositeSet,
    default_period: u64,
    request_timeout: Duration,
}

impl<C: CacheClient> MethodRegistry<C> {
    /// Build the registry from loaded definitions and config.
    pub fn new(cache: Arc<C>, composites: CompositeSet, config: &WorkerConfig) -> Self {
        let methods: Vec<&str> = composites.ids().collect();
        info!(methods = ?methods, "registering composite methods");
        Self {
            engine: CompositeEngine::new(cache),
            composites,
            default_period: config.engine.default_period,
            request_timeout: Duration::from_secs(config.bus.request_timeout_secs),
        }
    }

    /// Dispatch one request to its method handler.
    pub async fn dispatch(&self, method: &str, params: &Map<String, Json>) -> Result<Json, MetricastError> {
        if method == "ping" {
            return Ok(json!(wall_clock_secs()));
        }

        let composite = self.composites.get(method).map_err(|e| match e {
            DefinitionError::UnknownComposite { .. } => MetricastError::Rpc(RpcError::UnknownMethod {
                method: method.to_owned(),
            }),
            other => MetricastError::Definition(other),
        })?;

        // Declared required inputs must be present.
        let instance = composite.instance("default")?;
        for input in &instance.inputs {
            if input.required && !params.contains_key(&input.id) {
                return Err(RpcError::MissingParam {
                    param: input.id.clone(),
                }
                .into());
            }
        }

        let nodes = param_strings(params, "node").ok_or(RpcError::MissingParam {
            param: "node".to_owned(),
        })?;
        if nodes.is_empty() {
            return Err(RpcError::InvalidParam {
                param: "node".to_owned(),
                reason: "must name at least one host".to_owned(),
            }
            .into());
        }

        let period = match params.get("period") {
            None => self.default_period,
            Some(value) => parse_period(value).ok_or_else(|| RpcError::InvalidParam {
                param: "period".to_owned(),
                reason: format!("'{value}' is not a number"),
            })?,
        };

        let exclude_regexp = param_strings(params, "exclude_regexp").unwrap_or_default();

        let request = CompositeRequest::new(nodes)
            .with_period(period)
            .with_exclude_regexp(exclude_regexp);

        let started = std::time::Instant::now();
        let result = timeout(self.request_timeout, self.engine.execute(composite, &request))
            .await
            .map_err(|_| {
                warn!(method = %method, "request timed out");
                RpcError::Timeout {
                    secs: self.request_timeout.as_secs(),
                }
            })??;

        let rows: usize = result.values().map(Vec::len).sum();
        debug!(
            method = %method,
            hosts = request.hosts.len(),
            rows,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "request completed"
        );

        serde_json::to_value(result).map_err(|e| {
            MetricastError::Rpc(RpcError::Frame {
                reason: e.to_string(),
            })
        })
    }
}

/// Current wall clock as floating-point seconds since epoch.
fn wall_clock_secs() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

/// Read a parameter as a list of strings.
///
/// Accepts a single string, a single number, or an array of either;
/// every element is coerced to its string form.
fn param_strings(params: &Map<String, Json>, key: &str) -> Option<Vec<String>> {
    fn coerce(value: &Json) -> Option<String> {
        match value {
            Json::String(s) => Some(s.clone()),
            Json::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    match params.get(key)? {
        Json::Array(items) => Some(items.iter().filter_map(coerce).collect()),
        single => coerce(single).map(|s| vec![s]),
    }
}

/// `period`: any number, possibly wrapped in a single-element list.
fn parse_period(value: &Json) -> Option<u64> {
    match value {
        Json::Number(n) => n.as_u64().or_else(|| n.as_f64().map(|f| f as u64)),
        Json::String(s) => s.trim().parse::<u64>().ok(),
        Json::Array(items) => items.first().and_then(parse_period),
        _ => None,
    }
}
