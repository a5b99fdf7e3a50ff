//! Risk classification of extracted blocks.
//!
//! ## Architecture
//!
//! ```text
//! classify/
//! ├── mod.rs        - Scores, severity, the verdict table
//! ├── catalogue.rs  - Compiled pattern tables, built once per run
//! └── ajax.rs       - Network-call detection and endpoint capture
//! ```

pub mod ajax;
pub mod catalogue;

use serde::{Deserialize, Serialize};

use crate::extract::{BlockKind, CodeBlock};

pub use ajax::{detect_calls, triggering_capabilities, DetectedCall, DYNAMIC_ENDPOINT};
pub use catalogue::{CallRole, Capability, Catalogue, DynamicPattern};

// ============ Result Types ============

/// How much a block depends on server-side rendering.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum ServerSeverity {
    None,
    Low,
    Medium,
    High,
}

/// Whether a block can be moved to an external file as-is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SafetyVerdict {
    Ready,
    NeedsRewrite,
    Blocked,
}

/// Reviewer-facing refinement of the verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Recommendation {
    /// Ready and substantive.
    Extract,
    /// Ready but thin glue code, better merged into a shared file.
    Consolidate,
    Rewrite,
    Retain,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Complexity {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Functionality {
    #[serde(rename = "Data/Network")]
    DataNetwork,
    FormValidation,
    UiInteraction,
    DataVisualization,
    VisualEffects,
    GeneralLogic,
}

/// Classification attached 1:1 to a [`CodeBlock`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub logic_density_score: i64,
    pub server_severity: ServerSeverity,
    /// Catalogue names of the markers that set the severity.
    #[serde(default)]
    pub severity_markers: Vec<String>,
    pub ajax_capabilities: Vec<Capability>,
    pub safety_verdict: SafetyVerdict,
    pub recommendation: Recommendation,
    pub complexity: Complexity,
    pub functionality: Functionality,
    #[serde(default)]
    pub dynamic_patterns: Vec<DynamicPattern>,
    pub rationale: String,
}

// ============ Verdict Table ============

/// The safety decision table. No other code path assigns a verdict.
///
/// | severity   | handler or DOM-write sink | verdict      |
/// |------------|---------------------------|--------------|
/// | High       | any                       | Blocked      |
/// | Medium     | any                       | NeedsRewrite |
/// | Low / None | true                      | NeedsRewrite |
/// | Low / None | false                     | Ready        |
pub fn verdict_for(severity: ServerSeverity, handler_or_sink: bool) -> SafetyVerdict {
    match (severity, handler_or_sink) {
        (ServerSeverity::High, _) => SafetyVerdict::Blocked,
        (ServerSeverity::Medium, _) => SafetyVerdict::NeedsRewrite,
        (_, true) => SafetyVerdict::NeedsRewrite,
        (_, false) => SafetyVerdict::Ready,
    }
}

pub fn recommendation_for(verdict: SafetyVerdict, density: i64) -> Recommendation {
    match verdict {
        SafetyVerdict::Blocked => Recommendation::Retain,
        SafetyVerdict::NeedsRewrite => Recommendation::Rewrite,
        SafetyVerdict::Ready if density >= 2 => Recommendation::Extract,
        SafetyVerdict::Ready => Recommendation::Consolidate,
    }
}

// ============ Classifier ============

/// Classify one block given the calls detected in it.
pub fn classify(block: &CodeBlock, calls: &[DetectedCall], catalogue: &Catalogue) -> ClassificationResult {
    let text = block.raw_text.as_str();
    let scripted = block.kind.is_script();

    let (server_severity, severity_markers) = server_severity(text, catalogue);
    let has_sink = scripted && catalogue.dom_write_sink.is_match(text);
    let is_handler = block.kind == BlockKind::EventHandlerAttribute;

    let safety_verdict = verdict_for(server_severity, is_handler || has_sink);
    let logic_density_score = if scripted {
        logic_density(text, calls, catalogue)
    } else {
        0
    };

    let dynamic_patterns = if scripted {
        catalogue
            .dynamic
            .iter()
            .filter(|(_, re)| re.is_match(text))
            .map(|(kind, _)| *kind)
            .collect()
    } else {
        Vec::new()
    };

    let rationale = rationale(
        safety_verdict,
        server_severity,
        &severity_markers,
        is_handler,
        has_sink,
    );

    ClassificationResult {
        logic_density_score,
        server_severity,
        severity_markers,
        ajax_capabilities: triggering_capabilities(calls),
        safety_verdict,
        recommendation: recommendation_for(safety_verdict, logic_density_score),
        complexity: complexity(logic_density_score),
        functionality: functionality(text, calls),
        dynamic_patterns,
        rationale,
    }
}

/// First family matched in High, Medium, Low order wins.
pub fn server_severity(text: &str, catalogue: &Catalogue) -> (ServerSeverity, Vec<String>) {
    let families = [
        (ServerSeverity::High, &catalogue.high),
        (ServerSeverity::Medium, &catalogue.medium),
        (ServerSeverity::Low, &catalogue.low),
    ];
    for (level, family) in families {
        let markers: Vec<String> = family
            .iter()
            .filter(|p| p.regex.is_match(text))
            .map(|p| p.name.to_string())
            .collect();
        if !markers.is_empty() {
            return (level, markers);
        }
    }
    (ServerSeverity::None, Vec::new())
}

/// +2 per control-flow or function keyword, +1 per triggering call or event
/// registration, -2 per bare selector-and-bind when nothing else scored.
pub fn logic_density(text: &str, calls: &[DetectedCall], catalogue: &Catalogue) -> i64 {
    let keywords = catalogue.control_flow.find_iter(text).count() as i64;
    let registrations = catalogue.event_registration.find_iter(text).count() as i64;
    let triggering = calls.iter().filter(|c| c.is_triggering).count() as i64;

    let mut score = 2 * keywords + triggering + registrations;
    if score < 2 {
        let selectors = catalogue.selector_bind.find_iter(text).count() as i64;
        score -= 2 * selectors;
    }
    score
}

fn complexity(density: i64) -> Complexity {
    match density {
        d if d >= 5 => Complexity::High,
        d if d >= 2 => Complexity::Medium,
        _ => Complexity::Low,
    }
}

fn functionality(text: &str, calls: &[DetectedCall]) -> Functionality {
    let lower = text.to_ascii_lowercase();
    let has = |needles: &[&str]| needles.iter().any(|n| lower.contains(n));

    if calls.iter().any(|c| c.is_triggering) {
        Functionality::DataNetwork
    } else if has(&["validate", "regex", "return false"]) {
        Functionality::FormValidation
    } else if has(&["click", "hover", "on("]) {
        Functionality::UiInteraction
    } else if has(&["chart", "graph"]) {
        Functionality::DataVisualization
    } else if has(&["style", "class", "show()", "hide()"]) {
        Functionality::VisualEffects
    } else {
        Functionality::GeneralLogic
    }
}

fn rationale(
    verdict: SafetyVerdict,
    severity: ServerSeverity,
    markers: &[String],
    is_handler: bool,
    has_sink: bool,
) -> String {
    let marker_list = markers.join(", ");
    match verdict {
        SafetyVerdict::Blocked => {
            format!("server-rendered code ({}); keep in the view", marker_list)
        }
        SafetyVerdict::NeedsRewrite if severity == ServerSeverity::Medium => format!(
            "uses server helpers ({}); pass values through data attributes first",
            marker_list
        ),
        SafetyVerdict::NeedsRewrite if is_handler => {
            "inline event handler; bind with addEventListener first".to_string()
        }
        SafetyVerdict::NeedsRewrite if has_sink => {
            "writes raw markup into the DOM; replace the sink first".to_string()
        }
        SafetyVerdict::NeedsRewrite => "needs manual rewrite".to_string(),
        SafetyVerdict::Ready => "no server dependencies".to_string(),
    }
}
