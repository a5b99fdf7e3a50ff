//! AJAX / network-call detection over script text.
//!
//! Only enriches: nothing here decides severity or verdicts.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};

use super::catalogue::{CallRole, Capability, Catalogue};

/// Endpoint recorded when the URL argument is not a string literal.
pub const DYNAMIC_ENDPOINT: &str = "dynamic/unresolved";

/// How far past a call an options-object `url:` property is looked for.
const URL_PROPERTY_WINDOW: usize = 400;

static LITERAL_ARGUMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"^\s*,?\s*(?:'([^'\r\n]*)'|"([^"\r\n]*)"|`([^`$]*)`)\s*[,)]"#).unwrap()
});

static URL_PROPERTY: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"\burl\s*:\s*(?:'([^'\r\n]*)'|"([^"\r\n]*)"|`([^`$]*)`)\s*[,}\r\n]"#).unwrap()
});

/// A first argument that is a function, or no argument at all.
static CALLBACK_ARGUMENT: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^\s*(?:\)|function\b|async\b|\([^()]*\)\s*=>|[\w$]+\s*=>)").unwrap()
});

/// One matched call signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DetectedCall {
    /// Catalogue entry name.
    pub pattern: String,
    /// 1-based line in the source file.
    pub line: usize,
    pub is_triggering: bool,
    pub role: CallRole,
    pub capability: Capability,
    /// Literal target for triggering calls, else [`DYNAMIC_ENDPOINT`].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// Matched text, capped.
    pub snippet: String,
}

/// Detect every catalogued call in `text`, which starts at `first_line`.
///
/// Each catalogue entry matches independently, so one line may yield several
/// calls. Results are ordered by position, then by catalogue order.
pub fn detect_calls(text: &str, first_line: usize, catalogue: &Catalogue) -> Vec<DetectedCall> {
    let mut found: Vec<(usize, usize, DetectedCall)> = Vec::new();

    for (order, pattern) in catalogue.ajax.iter().enumerate() {
        for m in pattern.regex.find_iter(text) {
            let line = first_line + text[..m.start()].matches('\n').count();
            let rest = &text[m.end()..];
            if pattern.rejects_callback && CALLBACK_ARGUMENT.is_match(rest) {
                continue;
            }

            let endpoint = match pattern.role {
                CallRole::Request => {
                    Some(literal_endpoint(rest).unwrap_or_else(|| DYNAMIC_ENDPOINT.to_string()))
                }
                _ => None,
            };
            let capability = refine_capability(pattern.capability, endpoint.as_deref());

            found.push((
                m.start(),
                order,
                DetectedCall {
                    pattern: pattern.name.to_string(),
                    line,
                    is_triggering: pattern.role.is_triggering(),
                    role: pattern.role,
                    capability,
                    endpoint,
                    snippet: m.as_str().chars().take(100).collect(),
                },
            ));
        }
    }

    found.sort_by_key(|(offset, order, _)| (*offset, *order));
    found.into_iter().map(|(_, _, call)| call).collect()
}

/// Literal URL directly after the call, or in a nearby `url:` option.
fn literal_endpoint(rest: &str) -> Option<String> {
    if let Some(caps) = LITERAL_ARGUMENT.captures(rest) {
        return first_group(&caps);
    }

    let window_end = rest
        .char_indices()
        .map(|(i, _)| i)
        .find(|&i| i >= URL_PROPERTY_WINDOW)
        .unwrap_or(rest.len());
    let window = &rest[..window_end];
    // An options object must open right at the call.
    if !window.trim_start().starts_with('{') {
        return None;
    }
    URL_PROPERTY
        .captures(window)
        .and_then(|caps| first_group(&caps))
}

fn first_group(caps: &regex::Captures) -> Option<String> {
    (1..=3)
        .find_map(|i| caps.get(i))
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Generic data calls that fetch markup, scripts or styles inject them.
fn refine_capability(capability: Capability, endpoint: Option<&str>) -> Capability {
    if capability != Capability::DataExchange {
        return capability;
    }
    let Some(endpoint) = endpoint.filter(|e| *e != DYNAMIC_ENDPOINT) else {
        return capability;
    };
    let path = endpoint
        .split(['?', '#'])
        .next()
        .unwrap_or(endpoint)
        .to_ascii_lowercase();
    if path.ends_with(".js") {
        Capability::ScriptInjection
    } else if path.ends_with(".css") {
        Capability::StyleInjection
    } else if path.ends_with(".html") || path.ends_with(".htm") {
        Capability::UiInjection
    } else {
        capability
    }
}

/// Capabilities of triggering calls, deduplicated in first-seen order.
pub fn triggering_capabilities(calls: &[DetectedCall]) -> Vec<Capability> {
    let mut out = Vec::new();
    for call in calls.iter().filter(|c| c.is_triggering) {
        if !out.contains(&call.capability) {
            out.push(call.capability);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn detect(text: &str) -> Vec<DetectedCall> {
        let catalogue = Catalogue::new().unwrap();
        detect_calls(text, 1, &catalogue)
    }

    #[test]
    fn test_fetch_literal() {
        let calls = detect("fetch('/api/user')");
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_triggering);
        assert_eq!(calls[0].capability, Capability::DataExchange);
        assert_eq!(calls[0].endpoint.as_deref(), Some("/api/user"));
    }

    #[test]
    fn test_xhr_construction_alone_not_triggering() {
        let calls = detect("var xhr = new XMLHttpRequest();");
        assert_eq!(calls.len(), 1);
        assert!(!calls[0].is_triggering);
        assert_eq!(calls[0].role, CallRole::Construction);
        assert_eq!(calls[0].endpoint, None);
    }

    #[test]
    fn test_xhr_open_triggers() {
        let calls = detect("var x = new XMLHttpRequest();\nx.open('GET', '/api/items');\nx.send();");
        let open = calls.iter().find(|c| c.pattern == "xhr.open").unwrap();
        assert!(open.is_triggering);
        assert_eq!(open.line, 2);
        assert_eq!(open.endpoint.as_deref(), Some("/api/items"));
    }

    #[test]
    fn test_concatenated_url_is_dynamic() {
        let calls = detect("fetch(base + '/users')");
        assert_eq!(calls[0].endpoint.as_deref(), Some(DYNAMIC_ENDPOINT));
        let calls = detect("fetch(`${base}/users`)");
        assert_eq!(calls[0].endpoint.as_deref(), Some(DYNAMIC_ENDPOINT));
    }

    #[test]
    fn test_jquery_ajax_url_option() {
        let calls = detect("$.ajax({\n  type: 'POST',\n  url: '/Orders/Save',\n  data: form\n});");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].endpoint.as_deref(), Some("/Orders/Save"));
    }

    #[test]
    fn test_capabilities() {
        let calls = detect(
            "$('#panel').load('/partials/cart.html');\n$.getScript('/js/extra.js');\nnavigator.sendBeacon('/t', data);\n$.get('/theme.css');",
        );
        let caps: Vec<Capability> = calls.iter().map(|c| c.capability).collect();
        assert_eq!(
            caps,
            vec![
                Capability::UiInjection,
                Capability::ScriptInjection,
                Capability::Telemetry,
                Capability::StyleInjection,
            ]
        );
    }

    #[test]
    fn test_load_event_binding_not_a_request() {
        assert!(detect("$(window).load(function () { init(); });").is_empty());
        assert!(detect("$(window).load(() => init());").is_empty());
        assert!(detect("$(img).load();").is_empty());

        let calls = detect("$('#cart').load(cartUrl);");
        assert_eq!(calls.len(), 1);
        assert!(calls[0].is_triggering);
        assert_eq!(calls[0].endpoint.as_deref(), Some(DYNAMIC_ENDPOINT));
    }

    #[test]
    fn test_configuration_not_counted() {
        let calls = detect("$.ajaxSetup({ cache: false });");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].role, CallRole::Configuration);
        assert!(triggering_capabilities(&calls).is_empty());
    }

    #[test]
    fn test_one_line_many_calls() {
        let calls = detect("fetch('/a'); fetch('/b'); axios.get('/c');");
        let endpoints: Vec<_> = calls.iter().filter_map(|c| c.endpoint.clone()).collect();
        assert_eq!(endpoints, vec!["/a", "/b", "/c"]);
        assert_eq!(triggering_capabilities(&calls), vec![Capability::DataExchange]);
    }
}
