//! Recipe data model.
//!
//! A `Recipe` is immutable for the lifetime of a single execution: the Workflow
//! Orchestrator never mutates one, only the Memory Store's per-trigger state.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Closed set of logical types a `Variable` or rendered `Output` can carry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstillFormat {
    /// UTF-8 text with no further semantic meaning.
    String,
    /// IEEE-754 double.
    Number,
    /// Whole number.
    Integer,
    Boolean,
    Null,
    /// Binary, MIME-sniffed and rewritten to a `data:` URI by the Input Validator.
    Image,
    Audio,
    Video,
    /// Free-form text distinguished from `string` only for UI hinting; same validation.
    Text,
    /// `array:<inner>`, e.g. `array:string`. The inner format is carried separately.
    Array(Box<InstillFormat>),
    Object,
}

impl InstillFormat {
    /// Parses the wire representation, including the `array:<inner>` compound form.
    pub fn parse(raw: &str) -> Option<Self> {
        if let Some(inner) = raw.strip_prefix("array:") {
            return Self::parse(inner).map(|f| InstillFormat::Array(Box::new(f)));
        }
        Some(match raw {
            "string" => InstillFormat::String,
            "number" => InstillFormat::Number,
            "integer" => InstillFormat::Integer,
            "boolean" => InstillFormat::Boolean,
            "null" => InstillFormat::Null,
            "image" => InstillFormat::Image,
            "audio" => InstillFormat::Audio,
            "video" => InstillFormat::Video,
            "text" => InstillFormat::Text,
            "object" => InstillFormat::Object,
            _ => return None,
        })
    }

    /// True for the three binary-carrying formats that get MIME-sniffed and rewritten
    /// into `data:` URIs by the Input Validator.
    pub fn is_binary(&self) -> bool {
        matches!(
            self,
            InstillFormat::Image | InstillFormat::Audio | InstillFormat::Video
        )
    }
}

/// A single declared pipeline input.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Variable {
    pub name: String,
    #[serde(rename = "instillFormat")]
    pub instill_format: String,
    #[serde(rename = "acceptFormats", default)]
    pub accept_formats: Vec<String>,
    #[serde(default)]
    pub default: Option<Value>,
    /// JSONPath expressions used to extract this variable's value from an inbound
    /// event payload (`HandleNamespacePipelineEventByID`).
    #[serde(default)]
    pub listen: Vec<String>,
}

/// One node in the recipe's DAG: an operator (in-process) or connector (remote call).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Component {
    pub id: String,
    #[serde(rename = "definitionName")]
    pub definition_name: String,
    pub configuration: Value,
    #[serde(default)]
    pub condition: Option<String>,
    /// Optional `onError: continue` escape hatch: a failed best-effort component does
    /// not propagate `upstream-failed` to its dependents.
    #[serde(default, rename = "onError")]
    pub on_error: Option<String>,
}

impl Component {
    pub fn is_connector(&self) -> bool {
        self.definition_name.starts_with("connector-definitions/")
    }

    pub fn is_operator(&self) -> bool {
        self.definition_name.starts_with("operator-definitions/")
    }

    pub fn best_effort(&self) -> bool {
        self.on_error.as_deref() == Some("continue")
    }
}

/// A declared pipeline output: a name bound to a template expression.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Output {
    pub name: String,
    pub value: String,
}

/// Event- and cron-trigger declarations (the recipe's `On` block).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct On {
    #[serde(default)]
    pub events: Vec<String>,
    #[serde(default)]
    pub cron: Vec<String>,
}

/// The full, immutable recipe for one pipeline.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Recipe {
    #[serde(default)]
    pub variable: Vec<Variable>,
    #[serde(default)]
    pub output: Vec<Output>,
    #[serde(default)]
    pub component: Vec<Component>,
    #[serde(default)]
    pub on: Option<On>,
}

impl Recipe {
    pub fn component(&self, id: &str) -> Option<&Component> {
        self.component.iter().find(|c| c.id == id)
    }
}
