//! Resource to route conversion

use std::collections::HashMap;
use std::sync::LazyLock;

use pylon_common::PylonError;
use pylon_persistence::PluginBindingInfo;
use regex::{Captures, Regex};

use super::ConvertContext;
use super::plugin::convert_plugin_bindings;
use crate::model::ResourceData;
use crate::model::apisix::{ApisixRoute, ApisixTimeout};

/// Built-in plugin describing the matched resource
pub const RESOURCE_CONTEXT_PLUGIN: &str = "pylon-resource-context";

/// Built-in plugin rewriting the request for the backend
pub const PROXY_REWRITE_PLUGIN: &str = "pylon-proxy-rewrite";

/// Subpath routes rank below exact routes; longer paths rank higher
pub const SUBPATH_PRIORITY_BASE: i32 = -1000;

const ANY_METHOD: &str = "ANY";

static PATH_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{([^/{}]+)\}").expect("Invalid regex pattern"));

static COLON_PARAM: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r":[^/]+").expect("Invalid regex pattern"));

static STAGE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\{env\.([A-Za-z0-9_]+)\}").expect("Invalid regex pattern"));

/// Rewrite `{param}` segments to `:param`
pub fn to_route_path(path: &str) -> String {
    PATH_PARAM.replace_all(path, ":$1").into_owned()
}

/// Priority of a subpath route: the base plus the length of the path with a
/// leading slash and every `:param` counted as one character.
pub fn subpath_priority(path: &str) -> i32 {
    let normalized = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    };
    let weighted = COLON_PARAM.replace_all(&normalized, "_");
    SUBPATH_PRIORITY_BASE + weighted.chars().count() as i32
}

/// Substitute `{env.NAME}` stage vars
pub fn render_stage_vars(
    template: &str,
    vars: &std::collections::BTreeMap<String, String>,
) -> Result<String, PylonError> {
    let mut missing = None;
    let rendered = STAGE_VAR.replace_all(template, |caps: &Captures| {
        let name = &caps[1];
        match vars.get(name) {
            Some(value) => value.clone(),
            None => {
                missing.get_or_insert_with(|| name.to_string());
                String::new()
            }
        }
    });
    match missing {
        Some(name) => Err(PylonError::MissingStageVar(name)),
        None => Ok(rendered.into_owned()),
    }
}

fn route_id(ctx: &ConvertContext<'_>, resource: &ResourceData) -> String {
    ctx.scoped_id(&resource.id.to_string())
}

fn resource_context_plugin(resource: &ResourceData) -> serde_json::Value {
    serde_json::json!({
        "resource_id": resource.id,
        "resource_name": resource.name,
        "is_public": resource.is_public,
        "app_verified_required": resource.auth_config.app_verified_required,
        "auth_verified_required": resource.auth_config.auth_verified_required,
        "resource_perm_required": resource.auth_config.resource_perm_required,
    })
}

fn proxy_rewrite_plugin(
    ctx: &ConvertContext<'_>,
    resource: &ResourceData,
) -> Result<serde_json::Value, PylonError> {
    let uri = render_stage_vars(&resource.proxy.path, &ctx.stage.vars)?;
    Ok(serde_json::json!({
        "uri": uri,
        "method": resource.proxy.method,
        "match_subpath": resource.proxy.match_subpath,
    }))
}

/// One route per resource.
///
/// `service_ids` maps backend ids to the id of the service converted for
/// them; a resource whose backend has no service cannot be routed.
pub fn convert_routes(
    ctx: &ConvertContext<'_>,
    resources: &[ResourceData],
    resource_plugins: &HashMap<i64, Vec<PluginBindingInfo>>,
    service_ids: &HashMap<i64, String>,
) -> Result<Vec<ApisixRoute>, PylonError> {
    resources
        .iter()
        .map(|resource| convert_route(ctx, resource, resource_plugins, service_ids))
        .collect()
}

fn convert_route(
    ctx: &ConvertContext<'_>,
    resource: &ResourceData,
    resource_plugins: &HashMap<i64, Vec<PluginBindingInfo>>,
    service_ids: &HashMap<i64, String>,
) -> Result<ApisixRoute, PylonError> {
    let service_id = service_ids
        .get(&resource.proxy.backend_id)
        .cloned()
        .ok_or_else(|| {
            PylonError::InvalidBackend(format!(
                "resource '{}' uses backend {} which has no hosts on stage {}",
                resource.name, resource.proxy.backend_id, ctx.stage.name
            ))
        })?;

    let path = to_route_path(&resource.path);
    let (uris, priority) = if resource.match_subpath {
        let subpath = format!("{}/*", path.trim_end_matches('/'));
        let priority = subpath_priority(&path);
        (vec![path, subpath], Some(priority))
    } else {
        (vec![path], None)
    };

    let methods = if resource.method.eq_ignore_ascii_case(ANY_METHOD) {
        Vec::new()
    } else {
        vec![resource.method.to_uppercase()]
    };

    let mut plugins = match resource_plugins.get(&resource.id) {
        Some(bindings) => convert_plugin_bindings(bindings)?,
        None => Default::default(),
    };
    plugins.insert(
        RESOURCE_CONTEXT_PLUGIN.to_string(),
        resource_context_plugin(resource),
    );
    plugins.insert(
        PROXY_REWRITE_PLUGIN.to_string(),
        proxy_rewrite_plugin(ctx, resource)?,
    );

    Ok(ApisixRoute {
        id: route_id(ctx, resource),
        name: resource.name.clone(),
        uris,
        methods,
        priority,
        enable_websocket: resource.enable_websocket,
        service_id,
        timeout: resource.proxy.timeout.map(ApisixTimeout::uniform),
        labels: ctx.labels(),
        plugins,
        status: 1,
    })
}
