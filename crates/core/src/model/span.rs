use serde::{Deserialize, Serialize};

use crate::error::{Result, TracefinError};
use crate::model::completion::Property;

pub const TAG_HTTP_METHOD: &str = "http.method";
pub const TAG_HTTP_STATUS_CODE: &str = "http.status_code";
pub const TAG_HTTP_URL: &str = "http.url";
pub const TAG_ERROR: &str = "error";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EndpointRole {
    Client,
    Server,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: Option<String>,
    pub service_name: Option<String>,
    pub role: EndpointRole,
}

/// A timestamped event marker within a span, e.g. a network boundary marker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub timestamp_us: i64,
    pub value: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tag {
    pub key: String,
    pub value: String,
}

/// One recorded operation within a trace. Immutable once stored; the trace it
/// belongs to keeps accumulating spans from independent producers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Span {
    pub id: String,
    pub trace_id: String,
    #[serde(default)]
    pub parent_id: Option<String>,
    pub timestamp_us: i64,
    #[serde(default)]
    pub duration_us: i64,
    #[serde(default)]
    pub annotations: Vec<Annotation>,
    #[serde(default)]
    pub tags: Vec<Tag>,
    #[serde(default)]
    pub endpoint: Option<Endpoint>,
}

impl Span {
    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    pub fn service(&self) -> Option<&str> {
        self.endpoint
            .as_ref()
            .and_then(|e| e.service_name.as_deref())
    }

    pub fn host(&self) -> Option<&str> {
        self.endpoint.as_ref().and_then(|e| e.host.as_deref())
    }

    pub fn is_client(&self) -> bool {
        matches!(
            self.endpoint.as_ref().map(|e| e.role),
            Some(EndpointRole::Client)
        )
    }

    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|t| t.key == key)
            .map(|t| t.value.as_str())
    }

    /// End of the span's own measured interval.
    pub fn end_us(&self) -> i64 {
        self.timestamp_us + self.duration_us
    }

    pub fn last_annotation_us(&self) -> Option<i64> {
        self.annotations.iter().map(|a| a.timestamp_us).max()
    }

    /// Key/value properties this span contributes to trace aggregation.
    pub fn properties(&self) -> Vec<Property> {
        self.tags
            .iter()
            .map(|t| Property {
                name: t.key.clone(),
                value: t.value.clone(),
            })
            .collect()
    }

    /// Rejects spans that cannot participate in correlation. Such spans are
    /// dropped at ingest, never retried.
    pub fn validate(&self) -> Result<()> {
        if self.id.is_empty() {
            return Err(TracefinError::InvalidArgument("span id is empty".into()));
        }
        if self.trace_id.is_empty() {
            return Err(TracefinError::InvalidArgument(format!(
                "span {} has no trace id",
                self.id
            )));
        }
        if self.timestamp_us <= 0 {
            return Err(TracefinError::InvalidArgument(format!(
                "span {} has no timestamp",
                self.id
            )));
        }
        if self.duration_us < 0 {
            return Err(TracefinError::InvalidArgument(format!(
                "span {} has negative duration",
                self.id
            )));
        }
        Ok(())
    }

    /// Scheme and path of the span's `http.url` tag, when present.
    pub fn url_parts(&self) -> Option<(String, String)> {
        let url = self.tag(TAG_HTTP_URL)?;
        let (scheme, rest) = url.split_once("://")?;
        let path = match rest.find('/') {
            Some(idx) => rest[idx..].to_string(),
            None => "/".to_string(),
        };
        Some((scheme.to_string(), path))
    }
}
