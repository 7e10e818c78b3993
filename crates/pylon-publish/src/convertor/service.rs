//! Backend to upstream service conversion

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use pylon_common::{MAX_RESOURCE_ID_LENGTH, PylonError, bounded_id};
use pylon_persistence::{BackendConfigInfo, BackendHost, PluginBindingInfo};

use super::ConvertContext;
use super::plugin::convert_plugin_bindings;
use crate::model::apisix::{ApisixNode, ApisixService, ApisixTimeout, ApisixUpstream, PluginMap};

/// Built-in plugin carrying the stage context to the data plane
pub const STAGE_CONTEXT_PLUGIN: &str = "pylon-stage-context";

/// Host used for a backend node left blank
pub const PLACEHOLDER_HOST: &str = "0.0.0.1";

const ALLOWED_SCHEMES: [&str; 4] = ["http", "https", "grpc", "grpcs"];

pub fn service_id(stage_id: i64, backend_id: i64) -> String {
    bounded_id(
        &format!("stage-{}-backend-{}", stage_id, backend_id),
        MAX_RESOURCE_ID_LENGTH,
    )
}

fn default_port(scheme: &str) -> u16 {
    match scheme {
        "https" | "grpcs" => 443,
        _ => 80,
    }
}

/// Split `host[:port]`, accepting bracketed IPv6 literals
fn split_host_port(host: &str, scheme: &str) -> Result<(String, u16), PylonError> {
    let invalid = || PylonError::InvalidBackend(format!("invalid host '{}'", host));

    if let Some(rest) = host.strip_prefix('[') {
        let (address, tail) = rest.split_once(']').ok_or_else(invalid)?;
        let port = match tail.strip_prefix(':') {
            Some(port) => port.parse().map_err(|_| invalid())?,
            None if tail.is_empty() => default_port(scheme),
            None => return Err(invalid()),
        };
        return Ok((format!("[{}]", address), port));
    }

    match host.rsplit_once(':') {
        // more than one colon without brackets is a bare IPv6 address
        Some((name, _)) if name.contains(':') => Ok((host.to_string(), default_port(scheme))),
        Some((name, port)) => Ok((name.to_string(), port.parse().map_err(|_| invalid())?)),
        None => Ok((host.to_string(), default_port(scheme))),
    }
}

fn node(host: &BackendHost, scheme: &str) -> Result<ApisixNode, PylonError> {
    let address = host.host.trim();
    let (host_name, port) = if address.is_empty() {
        (PLACEHOLDER_HOST.to_string(), default_port(scheme))
    } else {
        split_host_port(address, scheme)?
    };
    Ok(ApisixNode {
        host: host_name,
        port,
        weight: host.weight,
    })
}

/// The one scheme every host of a backend uses
fn upstream_scheme(backend: &BackendConfigInfo) -> Result<String, PylonError> {
    let mut scheme: Option<String> = None;
    for host in &backend.config.hosts {
        let host_scheme = host.scheme.trim().to_lowercase();
        if !ALLOWED_SCHEMES.contains(&host_scheme.as_str()) {
            return Err(PylonError::InvalidUpstreamScheme {
                scheme: host.scheme.clone(),
                host: host.host.clone(),
            });
        }
        match &scheme {
            Some(existing) if *existing != host_scheme => {
                return Err(PylonError::InvalidBackend(format!(
                    "backend '{}' mixes schemes {} and {}",
                    backend.backend_name, existing, host_scheme
                )));
            }
            Some(_) => {}
            None => scheme = Some(host_scheme),
        }
    }
    scheme.ok_or_else(|| {
        PylonError::InvalidBackend(format!("backend '{}' has no hosts", backend.backend_name))
    })
}

/// Plugin the data plane reads the gateway and stage context from
pub fn stage_context_plugin(ctx: &ConvertContext<'_>) -> serde_json::Value {
    serde_json::json!({
        "gateway_name": ctx.gateway.name,
        "stage_name": ctx.stage.name,
        "jwt_private_key": ctx
            .jwt_key
            .map(|key| BASE64.encode(key.private_key.as_bytes()))
            .unwrap_or_default(),
        "auth_config": ctx.auth_config.cloned().unwrap_or_else(|| serde_json::json!({})),
        "vars": ctx.stage.vars,
    })
}

/// One service per backend with configured hosts. Every service carries
/// the stage context plugin and the stage's plugins.
pub fn convert_services(
    ctx: &ConvertContext<'_>,
    backends: &[BackendConfigInfo],
    stage_plugins: &[PluginBindingInfo],
) -> Result<Vec<ApisixService>, PylonError> {
    let mut plugins: PluginMap = convert_plugin_bindings(stage_plugins)?;
    plugins.insert(STAGE_CONTEXT_PLUGIN.to_string(), stage_context_plugin(ctx));

    backends
        .iter()
        .filter(|backend| !backend.config.hosts.is_empty())
        .map(|backend| {
            let scheme = upstream_scheme(backend)?;
            let nodes = backend
                .config
                .hosts
                .iter()
                .map(|host| node(host, &scheme))
                .collect::<Result<Vec<_>, _>>()?;
            let timeout = &backend.config.timeout;

            Ok(ApisixService {
                id: service_id(ctx.stage.id, backend.backend_id),
                name: backend.backend_name.clone(),
                labels: ctx.labels(),
                upstream: ApisixUpstream {
                    lb_type: backend.config.load_balance.clone(),
                    scheme,
                    nodes,
                    timeout: ApisixTimeout {
                        connect: timeout.connect,
                        send: timeout.send,
                        read: timeout.read,
                    },
                },
                plugins: plugins.clone(),
            })
        })
        .collect()
}
