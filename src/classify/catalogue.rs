//! Pattern catalogues for the AJAX detector and the risk classifier.
//!
//! Built once per run and shared read-only across workers. Every table is
//! ordered; matching order is table order.

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

// ============ Call Taxonomy ============

/// Whether a matched call actually puts a request on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CallRole {
    /// Initiates a network request.
    Request,
    /// Sets options or global hooks for later requests.
    Configuration,
    /// Builds a transport object without sending anything.
    Construction,
}

impl CallRole {
    pub fn is_triggering(&self) -> bool {
        matches!(self, Self::Request)
    }
}

/// What a network call does for the page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Capability {
    DataExchange,
    UiInjection,
    ScriptInjection,
    StyleInjection,
    Telemetry,
}

use CallRole::{Configuration, Construction, Request};
use Capability::{DataExchange, ScriptInjection, Telemetry, UiInjection};

/// (name, pattern, role, capability)
const AJAX_TABLE: &[(&str, &str, CallRole, Capability)] = &[
    // Browser transports
    ("fetch", r"\bfetch\s*\(", Request, DataExchange),
    ("xhr.open", r#"\.open\s*\(\s*['"](?:GET|POST|PUT|DELETE|PATCH|HEAD)['"]"#, Request, DataExchange),
    ("xhr.new", r"\bnew\s+XMLHttpRequest\s*\(", Construction, DataExchange),
    ("xhr.activex", r"\bnew\s+ActiveXObject\s*\(", Construction, DataExchange),
    ("xhr.onreadystatechange", r"\bonreadystatechange\s*=", Configuration, DataExchange),
    ("xhr.header", r"\.setRequestHeader\s*\(", Configuration, DataExchange),
    ("fetch.construct", r"\bnew\s+(?:Headers|Request)\s*\(", Construction, DataExchange),
    ("formdata", r"\bnew\s+FormData\b", Construction, DataExchange),
    ("websocket", r"\bnew\s+WebSocket\s*\(", Request, DataExchange),
    ("eventsource", r"\bnew\s+EventSource\s*\(", Request, DataExchange),
    ("beacon", r"\bnavigator\s*\.\s*sendBeacon\s*\(", Request, Telemetry),
    ("pixel.image", r"\bnew\s+Image\s*\(", Construction, Telemetry),
    // jQuery
    ("jquery.getScript", r"(?:\$|\bjQuery)\s*\.\s*getScript\s*\(", Request, ScriptInjection),
    ("jquery.ajax", r"(?:\$|\bjQuery)\s*\.\s*(?:ajax|get|post|getJSON)\s*\(", Request, DataExchange),
    ("jquery.load", r"\.load\s*\(", Request, UiInjection),
    ("jquery.setup", r"(?:\$|\bjQuery)\s*\.\s*(?:ajaxSetup|ajaxPrefilter|ajaxTransport)\s*\(", Configuration, DataExchange),
    ("jquery.globalEvent", r"\.ajax(?:Start|Send|Success|Error|Complete|Stop)\s*\(", Configuration, DataExchange),
    ("jquery.jsonp", r#"\bdataType\s*:\s*['"]jsonp['"]"#, Configuration, ScriptInjection),
    // Other client libraries
    ("axios", r"\baxios(?:\s*\.\s*(?:get|post|put|delete|patch|head|request))?\s*\(", Request, DataExchange),
    ("superagent", r"\bsuperagent\s*\.\s*(?:get|post|put|del|delete|patch)\s*\(", Request, DataExchange),
    ("angular.http", r"\$http\s*(?:\.\s*(?:get|post|put|delete|jsonp|patch))?\s*\(", Request, DataExchange),
    ("angular.httpClient", r"\bthis\s*\.\s*http\s*\.\s*(?:get|post|put|delete|patch)\s*\(", Request, DataExchange),
    ("prototype.ajax", r"\bnew\s+Ajax\s*\.\s*(?:Request|Updater)\s*\(", Request, DataExchange),
    ("socketio", r"\bio\s*\(", Request, DataExchange),
    ("signalr.builder", r"\bHubConnectionBuilder\b", Construction, DataExchange),
    ("signalr.start", r"\b(?:hubConnection|connection)\s*\.\s*start\s*\(", Request, DataExchange),
    // Server-framework RPC
    ("aspnet.pageMethods", r"\bPageMethods\s*\.\s*\w+\s*\(", Request, DataExchange),
    ("aspnet.postback", r"\b__doPostBack\s*\(", Request, UiInjection),
    ("aspnet.webRequest", r"\bSys\s*\.\s*Net\s*\.\s*WebRequest\s*\(", Construction, DataExchange),
    ("aspnet.pageRequestManager", r"\bSys\s*\.\s*WebForms\s*\.\s*PageRequestManager\b", Configuration, UiInjection),
];

/// Entries whose method name is shared with an event-binding overload
/// (`$(window).load(function () {...})`). A callback or empty first argument
/// means no request.
const CALLBACK_OVERLOADED: &[&str] = &["jquery.load"];

// ============ Severity Families ============

/// High: server templating or server objects evaluated as code.
const HIGH_SEVERITY: &[(&str, &str)] = &[
    ("razor.model", r"@Model\."),
    ("webforms.model", r"<%[=:#]?\s*Model\."),
    ("webforms.codeNugget", r"<%\s"),
    ("webforms.binding", r"<%#"),
    ("razor.codeBlock", r"@\{"),
    ("razor.control", r"@(?:if|for|foreach|while|switch)\b"),
    ("response.write", r"\bResponse\s*\.\s*Write\s*\("),
    ("php", r"<\?(?:php\b|=)"),
    ("template.interpolation", r"\{\{.*?\}\}"),
];

/// Medium: routing helpers and view-bag style config accessors.
const MEDIUM_SEVERITY: &[(&str, &str)] = &[
    ("razor.url", r"@Url\."),
    ("razor.html", r"@Html\."),
    ("razor.viewBag", r"@(?:ViewBag|ViewData|TempData)\."),
    ("webforms.helper", r"<%[=:]\s*(?:Url|ResolveUrl|ResolveClientUrl|ViewBag|ViewData|Html)\b"),
    ("webforms.clientId", r"\.ClientID\b"),
    ("request.params", r"\bRequest\s*\.\s*(?:Form|QueryString|Params)\b"),
];

/// Low: scalar interpolation that can be replaced by a data attribute.
const LOW_SEVERITY: &[(&str, &str)] = &[
    ("webforms.expression", r"<%[=:]"),
    ("razor.datetime", r"@DateTime\."),
    ("datetime", r"\bDateTime\s*\.\s*(?:Now|Today|UtcNow)\b"),
];

// ============ Density and Dynamic Code ============

const DOM_WRITE_SINK: &str =
    r"\bdocument\s*\.\s*write(?:ln)?\s*\(|\.(?:inner|outer)HTML\s*\+?=[^=]|\.insertAdjacentHTML\s*\(";

const CONTROL_FLOW: &str = r"\b(?:function|if|for|while|switch)\b|=>";

const EVENT_REGISTRATION: &str =
    r#"\.addEventListener\s*\(|\.attachEvent\s*\(|\.on\s*\(\s*['"]"#;

const SELECTOR_BIND: &str =
    r#"\bdocument\s*\.\s*(?:getElementById|querySelector(?:All)?|getElementsBy\w+)\s*\(|(?:\$|\bjQuery)\s*\(\s*['"]"#;

/// Dynamic-code idioms worth flagging to a reviewer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicPattern {
    DomSink,
    JsSink,
    DynamicLoad,
    DynamicCss,
    CssInJs,
}

const DYNAMIC_TABLE: &[(DynamicPattern, &str)] = &[
    (DynamicPattern::DomSink, DOM_WRITE_SINK),
    (
        DynamicPattern::JsSink,
        r#"\beval\s*\(|\bnew\s+Function\s*\(|\bset(?:Timeout|Interval)\s*\(\s*['"]|\bimport\s*\("#,
    ),
    (
        DynamicPattern::DynamicLoad,
        r#"\.(?:src|href)\s*=[^=]|\bcreateElement\s*\(\s*['"](?:script|link)['"]"#,
    ),
    (
        DynamicPattern::DynamicCss,
        r#"\.style\s*\.\s*\w+\s*=[^=]|\.style\s*\[\s*['"][^'"]+['"]\s*\]\s*=|\.cssText\s*=|\.setProperty\s*\(|\.insertRule\s*\(|\.addRule\s*\(|setAttribute\s*\(\s*['"]style['"]|\.classList\s*\.\s*(?:add|remove|toggle|replace)\s*\(|\bnew\s+CSSStyleSheet\s*\(|\badoptedStyleSheets\b|\bcreateElement\s*\(\s*['"]style['"]"#,
    ),
    (DynamicPattern::CssInJs, r"\bstyled\s*\.\s*\w+|\bcss`|\bstyled\s*\("),
];

// ============ Catalogue ============

pub struct AjaxPattern {
    pub name: &'static str,
    pub regex: Regex,
    pub role: CallRole,
    pub capability: Capability,
    /// Skip matches whose first argument is a callback.
    pub rejects_callback: bool,
}

pub struct SeverityPattern {
    pub name: &'static str,
    pub regex: Regex,
}

/// Every compiled table the detector and classifier consult.
pub struct Catalogue {
    pub ajax: Vec<AjaxPattern>,
    pub high: Vec<SeverityPattern>,
    pub medium: Vec<SeverityPattern>,
    pub low: Vec<SeverityPattern>,
    pub dom_write_sink: Regex,
    pub control_flow: Regex,
    pub event_registration: Regex,
    pub selector_bind: Regex,
    pub dynamic: Vec<(DynamicPattern, Regex)>,
}

fn compile(pattern: &str) -> Result<Regex, regex::Error> {
    RegexBuilder::new(pattern).case_insensitive(true).build()
}

fn compile_family(table: &[(&'static str, &str)]) -> Result<Vec<SeverityPattern>, regex::Error> {
    table
        .iter()
        .map(|&(name, pattern)| {
            Ok(SeverityPattern {
                name,
                regex: compile(pattern)?,
            })
        })
        .collect()
}

impl Catalogue {
    pub fn new() -> Result<Self, regex::Error> {
        let ajax = AJAX_TABLE
            .iter()
            .map(|&(name, pattern, role, capability)| {
                Ok(AjaxPattern {
                    name,
                    regex: compile(pattern)?,
                    role,
                    capability,
                    rejects_callback: CALLBACK_OVERLOADED.contains(&name),
                })
            })
            .collect::<Result<Vec<_>, regex::Error>>()?;

        let dynamic = DYNAMIC_TABLE
            .iter()
            .map(|&(kind, pattern)| Ok((kind, compile(pattern)?)))
            .collect::<Result<Vec<_>, regex::Error>>()?;

        Ok(Self {
            ajax,
            high: compile_family(HIGH_SEVERITY)?,
            medium: compile_family(MEDIUM_SEVERITY)?,
            low: compile_family(LOW_SEVERITY)?,
            dom_write_sink: compile(DOM_WRITE_SINK)?,
            // Keywords are matched case-sensitively so prose like "If" in
            // comments does not inflate the score.
            control_flow: Regex::new(CONTROL_FLOW)?,
            event_registration: compile(EVENT_REGISTRATION)?,
            selector_bind: compile(SELECTOR_BIND)?,
            dynamic,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_catalogue_compiles() {
        let catalogue = Catalogue::new().unwrap();
        assert_eq!(catalogue.ajax.len(), AJAX_TABLE.len());
        assert_eq!(catalogue.dynamic.len(), 5);
    }

    #[test]
    fn test_only_requests_trigger() {
        assert!(CallRole::Request.is_triggering());
        assert!(!CallRole::Configuration.is_triggering());
        assert!(!CallRole::Construction.is_triggering());
    }

    #[test]
    fn test_severity_families_are_disjoint_on_samples() {
        let catalogue = Catalogue::new().unwrap();
        let hits = |family: &[SeverityPattern], text: &str| family.iter().any(|p| p.regex.is_match(text));
        assert!(hits(&catalogue.high, "var x = <%= Model.Id %>;"));
        assert!(hits(&catalogue.medium, "location = '@Url.Action(\"Index\")';"));
        assert!(!hits(&catalogue.high, "location = '@Url.Action(\"Index\")';"));
        assert!(hits(&catalogue.low, "var d = '<%= DateTime.Now %>';"));
        assert!(!hits(&catalogue.high, "var d = '<%= DateTime.Now %>';"));
    }
}
