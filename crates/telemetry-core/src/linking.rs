//! Linking metadata: the identifier set correlating log events with
//! traces and the owning service.

use crate::config::AgentConfig;
use serde::Serialize;

/// Correlation attributes attached to every forwarded log event.
///
/// `trace_id`/`span_id` are populated only when resolved under an
/// active transaction; outside any traced unit of work they are
/// genuinely absent rather than zero-valued, so consumers can tell
/// "untraced" apart from "traced but unresolved".
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct LinkingMetadata {
    #[serde(rename = "entity.name")]
    pub entity_name: String,
    #[serde(rename = "entity.guid")]
    pub entity_guid: String,
    pub hostname: String,
    #[serde(rename = "trace.id", skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
    #[serde(rename = "span.id", skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
}

impl LinkingMetadata {
    pub fn service(
        entity_name: impl Into<String>,
        entity_guid: impl Into<String>,
        hostname: impl Into<String>,
    ) -> Self {
        Self {
            entity_name: entity_name.into(),
            entity_guid: entity_guid.into(),
            hostname: hostname.into(),
            trace_id: None,
            span_id: None,
        }
    }

    /// Render the local-decoration suffix appended to log lines when
    /// local decorating is enabled. The entity name is percent-encoded
    /// because it may contain pipe or space characters unsafe in the
    /// composed string. Absent trace/span ids render as empty
    /// segments.
    pub fn decoration_blob(&self) -> String {
        format!(
            " APM-LINKING|{}|{}|{}|{}|{}|",
            self.entity_guid,
            self.hostname,
            self.trace_id.as_deref().unwrap_or(""),
            self.span_id.as_deref().unwrap_or(""),
            urlencoding::encode(&self.entity_name)
        )
    }
}

/// Produces the stable service-level identifiers, filling in trace
/// context when the caller resolves one.
#[derive(Debug, Clone)]
pub struct LinkingMetadataProvider {
    entity_name: String,
    entity_guid: String,
    hostname: String,
}

impl LinkingMetadataProvider {
    pub fn from_config(config: &AgentConfig) -> Self {
        Self {
            entity_name: config.app_name.clone(),
            entity_guid: config.entity_guid.clone(),
            hostname: config.hostname.clone(),
        }
    }

    pub fn service_metadata(&self) -> LinkingMetadata {
        LinkingMetadata::service(
            self.entity_name.clone(),
            self.entity_guid.clone(),
            self.hostname.clone(),
        )
    }

    pub fn with_trace(&self, trace_id: String, span_id: Option<String>) -> LinkingMetadata {
        let mut metadata = self.service_metadata();
        metadata.trace_id = Some(trace_id);
        metadata.span_id = span_id;
        metadata
    }
}
