//! Plugin config conversion
//!
//! Plugin configs are stored as YAML in the shape operators edit. A
//! dispatch table keyed by plugin type code turns each into the shape the
//! data plane expects; types without an entry pass through unchanged.

use std::collections::{BTreeMap, HashSet};

use pylon_common::PylonError;
use pylon_persistence::PluginBindingInfo;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::model::apisix::PluginMap;

pub const RATE_LIMIT: &str = "pylon-rate-limit";
pub const IP_RESTRICTION: &str = "pylon-ip-restriction";
pub const HEADER_REWRITE: &str = "pylon-header-rewrite";
pub const CORS: &str = "pylon-cors";

type ConvertFn = fn(Value) -> Result<Value, PylonError>;

const CONVERTORS: &[(&str, ConvertFn)] = &[
    (RATE_LIMIT, convert_rate_limit),
    (IP_RESTRICTION, convert_ip_restriction),
    (HEADER_REWRITE, convert_header_rewrite),
    (CORS, convert_cors),
];

fn convertor_for(type_code: &str) -> Option<ConvertFn> {
    CONVERTORS
        .iter()
        .find(|(code, _)| *code == type_code)
        .map(|(_, convert)| *convert)
}

/// Parse a plugin's YAML and convert it for the data plane.
///
/// Blank YAML is an empty config; anything but a mapping is rejected.
pub fn convert_plugin(type_code: &str, yaml: &str) -> Result<Value, PylonError> {
    let parsed: Value = if yaml.trim().is_empty() {
        Value::Object(Map::new())
    } else {
        serde_yaml::from_str(yaml)
            .map_err(|e| PylonError::invalid_plugin_config(type_code, e.to_string()))?
    };
    let config = match parsed {
        Value::Null => Value::Object(Map::new()),
        Value::Object(_) => parsed,
        _ => {
            return Err(PylonError::invalid_plugin_config(
                type_code,
                "config must be a mapping",
            ));
        }
    };

    match convertor_for(type_code) {
        Some(convert) => convert(config),
        None => Ok(config),
    }
}

/// Convert a deduplicated binding list into a plugin map keyed by type code
pub fn convert_plugin_bindings(bindings: &[PluginBindingInfo]) -> Result<PluginMap, PylonError> {
    bindings
        .iter()
        .map(|b| Ok((b.type_code.clone(), convert_plugin(&b.type_code, &b.yaml)?)))
        .collect()
}

fn invalid(type_code: &str, reason: impl std::fmt::Display) -> PylonError {
    PylonError::invalid_plugin_config(type_code, reason.to_string())
}

// ----------------------------------------------------------------------
// rate limit
// ----------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Rate {
    tokens: u64,
    period: u64,
}

#[derive(Deserialize)]
struct SpecialRate {
    tokens: u64,
    period: u64,
    app_code: String,
}

#[derive(Deserialize)]
struct Rates {
    default: Rate,
    #[serde(default)]
    specials: Vec<SpecialRate>,
}

#[derive(Deserialize)]
struct RateLimitConfig {
    rates: Rates,
}

/// Key of the rate applied to apps without a special rate
pub const DEFAULT_RATE_KEY: &str = "__default";

fn convert_rate_limit(config: Value) -> Result<Value, PylonError> {
    let config: RateLimitConfig =
        serde_json::from_value(config).map_err(|e| invalid(RATE_LIMIT, e))?;

    let mut rates: BTreeMap<String, Vec<Rate>> = BTreeMap::new();
    rates.insert(DEFAULT_RATE_KEY.to_string(), vec![config.rates.default]);

    for special in config.rates.specials {
        if special.app_code.is_empty() {
            return Err(invalid(RATE_LIMIT, "special rate without app_code"));
        }
        if rates.contains_key(&special.app_code) {
            return Err(PylonError::DuplicateAppCode(special.app_code));
        }
        rates.insert(
            special.app_code,
            vec![Rate {
                tokens: special.tokens,
                period: special.period,
            }],
        );
    }

    Ok(serde_json::json!({ "rates": rates }))
}

// ----------------------------------------------------------------------
// ip restriction
// ----------------------------------------------------------------------

/// Flatten a string or list of strings into unique entries. Entries are
/// separated by newlines, commas or whitespace; `#` starts a comment.
fn ip_entries(value: Option<&Value>) -> Result<Vec<String>, PylonError> {
    let chunks: Vec<&str> = match value {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::String(s)) => vec![s.as_str()],
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| invalid(IP_RESTRICTION, "list entries must be strings"))
            })
            .collect::<Result<_, _>>()?,
        Some(_) => {
            return Err(invalid(
                IP_RESTRICTION,
                "whitelist and blacklist must be a string or a list",
            ));
        }
    };

    let mut seen = HashSet::new();
    let mut entries = Vec::new();
    for line in chunks.iter().flat_map(|chunk| chunk.lines()) {
        let content = line.split('#').next().unwrap_or_default();
        for entry in content
            .split(|c: char| c == ',' || c.is_whitespace())
            .filter(|e| !e.is_empty())
        {
            if seen.insert(entry) {
                entries.push(entry.to_string());
            }
        }
    }
    Ok(entries)
}

fn convert_ip_restriction(config: Value) -> Result<Value, PylonError> {
    let whitelist = ip_entries(config.get("whitelist"))?;
    let blacklist = ip_entries(config.get("blacklist"))?;

    match (whitelist.is_empty(), blacklist.is_empty()) {
        (false, true) => Ok(serde_json::json!({ "whitelist": whitelist })),
        (true, false) => Ok(serde_json::json!({ "blacklist": blacklist })),
        (true, true) => Err(invalid(
            IP_RESTRICTION,
            "one of whitelist or blacklist is required",
        )),
        (false, false) => Err(invalid(
            IP_RESTRICTION,
            "whitelist and blacklist are mutually exclusive",
        )),
    }
}

// ----------------------------------------------------------------------
// header rewrite
// ----------------------------------------------------------------------

#[derive(Deserialize)]
struct HeaderValue {
    key: String,
    #[serde(default)]
    value: String,
}

#[derive(Deserialize)]
struct HeaderKey {
    key: String,
}

#[derive(Deserialize)]
struct HeaderRewriteConfig {
    #[serde(default)]
    set: Vec<HeaderValue>,
    #[serde(default)]
    remove: Vec<HeaderKey>,
}

fn convert_header_rewrite(config: Value) -> Result<Value, PylonError> {
    let config: HeaderRewriteConfig =
        serde_json::from_value(config).map_err(|e| invalid(HEADER_REWRITE, e))?;

    let set: BTreeMap<String, String> = config
        .set
        .into_iter()
        .map(|h| (h.key, h.value))
        .collect();
    let remove: Vec<String> = config.remove.into_iter().map(|h| h.key).collect();

    Ok(serde_json::json!({ "set": set, "remove": remove }))
}

// ----------------------------------------------------------------------
// cors
// ----------------------------------------------------------------------

const CORS_LIST_FIELDS: [&str; 4] = [
    "allow_origins",
    "allow_methods",
    "allow_headers",
    "expose_headers",
];

fn convert_cors(mut config: Value) -> Result<Value, PylonError> {
    let Some(fields) = config.as_object_mut() else {
        return Err(invalid(CORS, "config must be a mapping"));
    };

    for field in CORS_LIST_FIELDS {
        let Some(Value::Array(items)) = fields.get(field) else {
            continue;
        };
        let joined = items
            .iter()
            .map(|item| {
                item.as_str()
                    .ok_or_else(|| invalid(CORS, format!("{} entries must be strings", field)))
            })
            .collect::<Result<Vec<&str>, _>>()?
            .join(",");
        fields.insert(field.to_string(), Value::String(joined));
    }

    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_type_passes_through() {
        let converted = convert_plugin("pylon-custom", "a: 1\nb: [x, y]").unwrap();
        assert_eq!(converted, serde_json::json!({"a": 1, "b": ["x", "y"]}));
    }

    #[test]
    fn test_blank_yaml_is_empty_config() {
        assert_eq!(
            convert_plugin("pylon-custom", "  \n").unwrap(),
            serde_json::json!({})
        );
        assert_eq!(convert_plugin("pylon-custom", "~").unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_non_mapping_rejected() {
        let err = convert_plugin("pylon-custom", "- a\n- b").unwrap_err();
        assert!(matches!(err, PylonError::InvalidPluginConfig { .. }));
    }

    #[test]
    fn test_rate_limit() {
        let yaml = r#"
rates:
  default:
    tokens: 100
    period: 60
  specials:
    - tokens: 10
      period: 1
      app_code: app-a
"#;
        let converted = convert_plugin(RATE_LIMIT, yaml).unwrap();
        assert_eq!(
            converted,
            serde_json::json!({
                "rates": {
                    "__default": [{"tokens": 100, "period": 60}],
                    "app-a": [{"tokens": 10, "period": 1}]
                }
            })
        );
    }

    #[test]
    fn test_rate_limit_duplicate_app_code() {
        let yaml = r#"
rates:
  default: {tokens: 100, period: 60}
  specials:
    - {tokens: 10, period: 1, app_code: app-a}
    - {tokens: 20, period: 1, app_code: app-a}
"#;
        let err = convert_plugin(RATE_LIMIT, yaml).unwrap_err();
        assert!(matches!(err, PylonError::DuplicateAppCode(code) if code == "app-a"));
    }

    #[test]
    fn test_rate_limit_requires_default() {
        let err = convert_plugin(RATE_LIMIT, "rates:\n  specials: []").unwrap_err();
        assert!(err.is_configuration_error());
        assert!(matches!(err, PylonError::InvalidPluginConfig { .. }));
    }

    #[test]
    fn test_ip_restriction_string_is_normalized() {
        let yaml = "whitelist: |\n  1.1.1.1, 2.2.2.2\n  # office\n  10.0.0.0/8 1.1.1.1 # dup\n";
        let converted = convert_plugin(IP_RESTRICTION, yaml).unwrap();
        assert_eq!(
            converted,
            serde_json::json!({"whitelist": ["1.1.1.1", "2.2.2.2", "10.0.0.0/8"]})
        );
    }

    #[test]
    fn test_ip_restriction_list() {
        let yaml = "blacklist:\n  - 3.3.3.3\n  - '4.4.4.4,3.3.3.3'\n";
        let converted = convert_plugin(IP_RESTRICTION, yaml).unwrap();
        assert_eq!(
            converted,
            serde_json::json!({"blacklist": ["3.3.3.3", "4.4.4.4"]})
        );
    }

    #[test]
    fn test_ip_restriction_requires_exactly_one_list() {
        assert!(convert_plugin(IP_RESTRICTION, "whitelist: ''").is_err());
        assert!(convert_plugin(IP_RESTRICTION, "whitelist: 1.1.1.1\nblacklist: 2.2.2.2").is_err());
        assert!(convert_plugin(IP_RESTRICTION, "whitelist: '# only a comment'").is_err());
    }

    #[test]
    fn test_header_rewrite() {
        let yaml = "set:\n  - {key: X-Env, value: prod}\nremove:\n  - {key: X-Debug}\n";
        let converted = convert_plugin(HEADER_REWRITE, yaml).unwrap();
        assert_eq!(
            converted,
            serde_json::json!({"set": {"X-Env": "prod"}, "remove": ["X-Debug"]})
        );
    }

    #[test]
    fn test_cors_lists_are_joined() {
        let yaml = "allow_origins: ['https://a.example', 'https://b.example']\nallow_methods: '*'\nmax_age: 600\n";
        let converted = convert_plugin(CORS, yaml).unwrap();
        assert_eq!(converted["allow_origins"], "https://a.example,https://b.example");
        assert_eq!(converted["allow_methods"], "*");
        assert_eq!(converted["max_age"], 600);
    }

    #[test]
    fn test_convert_bindings_keyed_by_type() {
        let binding = PluginBindingInfo {
            id: 1,
            gateway_id: 1,
            scope: pylon_common::Scope::Stage(1),
            config_id: 1,
            config_name: "cors".to_string(),
            type_code: CORS.to_string(),
            yaml: "allow_origins: '*'".to_string(),
            source: pylon_common::BindingSource::Direct,
            updated_time: 1,
        };
        let plugins = convert_plugin_bindings(&[binding]).unwrap();
        assert_eq!(plugins[CORS]["allow_origins"], "*");
    }
}
