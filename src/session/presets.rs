//! Persona presets for the library's voice widgets.

use crate::defaults;
use crate::error::{Result, VoxdeskError};
use crate::session::config::{SessionConfig, ToolDeclaration};
use crate::session::tools::ToolRegistry;
use serde_json::{Value, json};
use std::fmt;
use std::str::FromStr;

/// One configured voice widget.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Preset {
    /// General live assistant.
    Assistant,
    /// Circulation and reference desk.
    ReferenceDesk,
    /// Open-access portal voice search, with catalogue tools.
    OpenAccess,
    /// Live tutor for one book.
    Tutor { title: String },
    /// Visual telemetry monitor fed with camera stills.
    VisualMonitor,
}

impl Preset {
    pub const NAMES: &'static [&'static str] = &[
        "assistant",
        "reference-desk",
        "open-access",
        "tutor",
        "visual-monitor",
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Preset::Assistant => "assistant",
            Preset::ReferenceDesk => "reference-desk",
            Preset::OpenAccess => "open-access",
            Preset::Tutor { .. } => "tutor",
            Preset::VisualMonitor => "visual-monitor",
        }
    }

    pub fn persona(&self) -> String {
        match self {
            Preset::Assistant => {
                "You are a highly efficient real-time assistant. Be brief and human-like.".to_string()
            }
            Preset::ReferenceDesk => "You are an Intelligent Reference Desk Assistant. \
                 Help users find resources, explain policies, and support learning. \
                 Be professional, academic, and supportive."
                .to_string(),
            Preset::OpenAccess => "You are the Knowledge Summoner. Assist users in finding \
                 consortium journals and academic papers."
                .to_string(),
            Preset::Tutor { title } => format!(
                "You are an expert academic tutor for the book \"{}\". Use the user's voice \
                 input to explain concepts, clarify chapters, and encourage critical thinking. \
                 Be supportive and scholarly.",
                title
            ),
            Preset::VisualMonitor => "You are an Industrial Visual Monitor.".to_string(),
        }
    }

    pub fn voice(&self) -> Option<&'static str> {
        match self {
            Preset::Assistant => Some("Puck"),
            Preset::ReferenceDesk => Some("Kore"),
            Preset::OpenAccess => Some("Charon"),
            Preset::Tutor { .. } | Preset::VisualMonitor => None,
        }
    }

    /// Session configuration for this preset, on top of `base`.
    pub fn apply(&self, base: SessionConfig) -> SessionConfig {
        let mut config = base.with_persona(self.persona());
        config.voice = self.voice().map(str::to_string);
        match self {
            Preset::Assistant => config.with_transcription(true, true).with_transcript_capacity(5),
            Preset::ReferenceDesk => config.with_transcription(true, true).with_transcript_capacity(7),
            Preset::OpenAccess | Preset::Tutor { .. } => config.with_transcription(false, false),
            Preset::VisualMonitor => config
                .with_transcription(false, true)
                .with_transcript_capacity(defaults::VISION_REPORT_CAPACITY),
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        self.apply(SessionConfig::default())
    }

    /// Client-side tools for this preset.
    pub fn tools(&self) -> ToolRegistry {
        match self {
            Preset::OpenAccess => catalogue_tools(),
            _ => ToolRegistry::new(),
        }
    }
}

impl fmt::Display for Preset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Preset::Tutor { title } => write!(f, "tutor ({})", title),
            other => f.write_str(other.name()),
        }
    }
}

impl FromStr for Preset {
    type Err = VoxdeskError;

    /// Accepts the preset names; `tutor:<title>` picks the book.
    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        if let Some(title) = s.strip_prefix("tutor:") {
            return Ok(Preset::Tutor {
                title: title.trim().to_string(),
            });
        }
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "assistant" => Ok(Preset::Assistant),
            "reference-desk" => Ok(Preset::ReferenceDesk),
            "open-access" => Ok(Preset::OpenAccess),
            "tutor" => Ok(Preset::Tutor {
                title: "the current book".to_string(),
            }),
            "visual-monitor" => Ok(Preset::VisualMonitor),
            other => Err(VoxdeskError::ConfigInvalidValue {
                key: "session.preset".to_string(),
                message: format!(
                    "unknown preset '{}', expected one of: {}",
                    other,
                    Preset::NAMES.join(", ")
                ),
            }),
        }
    }
}

fn string_arg(args: &Value, key: &str) -> String {
    args.get(key)
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string()
}

fn catalogue_tools() -> ToolRegistry {
    ToolRegistry::new()
        .register(
            ToolDeclaration::new(
                "find_academic_resources",
                "Find academic resources by topic.",
                json!({
                    "type": "object",
                    "properties": {
                        "topic": {
                            "type": "string",
                            "description": "The research topic to find resources for."
                        }
                    },
                    "required": ["topic"]
                }),
            ),
            |args: &Value| {
                let topic = string_arg(args, "topic");
                log::info!("catalogue search requested for '{}'", topic);
                json!({ "result": format!("Searching the consortium catalogue for {}...", topic) })
            },
        )
        .register(
            ToolDeclaration::new(
                "filter_academic_resources",
                "Filter existing academic resources.",
                json!({
                    "type": "object",
                    "properties": {
                        "resourceType": {
                            "type": "string",
                            "description": "Type of resource (Journal, eBook, Archive, Database)."
                        }
                    }
                }),
            ),
            |args: &Value| {
                let kind = string_arg(args, "resourceType");
                if kind.is_empty() {
                    json!({ "result": "Showing all resource types." })
                } else {
                    json!({ "result": format!("Filtering results to {} resources.", kind) })
                }
            },
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_names() {
        assert_eq!("assistant".parse::<Preset>().unwrap(), Preset::Assistant);
        assert_eq!("reference_desk".parse::<Preset>().unwrap(), Preset::ReferenceDesk);
        assert_eq!("Open-Access".parse::<Preset>().unwrap(), Preset::OpenAccess);
        assert_eq!(
            "tutor: Things Fall Apart".parse::<Preset>().unwrap(),
            Preset::Tutor {
                title: "Things Fall Apart".to_string()
            }
        );
        assert!("radio".parse::<Preset>().is_err());
    }

    #[test]
    fn test_assistant_and_reference_desk_configs() {
        let assistant = Preset::Assistant.session_config();
        assert_eq!(assistant.voice.as_deref(), Some("Puck"));
        assert!(assistant.input_transcription && assistant.output_transcription);
        assert_eq!(assistant.transcript_capacity, 5);

        let desk = Preset::ReferenceDesk.session_config();
        assert_eq!(desk.voice.as_deref(), Some("Kore"));
        assert_eq!(desk.transcript_capacity, 7);
    }

    #[test]
    fn test_tutor_persona_names_the_book() {
        let tutor = Preset::Tutor {
            title: "Nervous Conditions".to_string(),
        };
        let config = tutor.session_config();
        assert!(config.persona.contains("\"Nervous Conditions\""));
        assert_eq!(config.voice, None);
        assert!(!config.input_transcription);
    }

    #[test]
    fn test_visual_monitor_transcribes_output_only() {
        let config = Preset::VisualMonitor.session_config();
        assert!(!config.input_transcription);
        assert!(config.output_transcription);
        assert_eq!(config.transcript_capacity, 10);
    }

    #[test]
    fn test_open_access_tools_answer() {
        let tools = Preset::OpenAccess.tools();
        assert_eq!(tools.len(), 2);

        let found = tools
            .invoke("find_academic_resources", &json!({"topic": "soil science"}))
            .unwrap();
        assert!(found["result"].as_str().unwrap().contains("soil science"));

        let filtered = tools
            .invoke("filter_academic_resources", &json!({"resourceType": "Journal"}))
            .unwrap();
        assert!(filtered["result"].as_str().unwrap().contains("Journal"));

        assert!(Preset::Assistant.tools().is_empty());
    }
}
