//! Globus Search ingest envelopes: `GMetaEntry` for one record, `GIngest` for a list.

use crate::error::{MdfError, Result};
use crate::namespace::NamespaceMapper;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const DEFAULT_GMETA_VERSION: &str = "2016-11-09";
pub const DEFAULT_COMMUNITY: &str = "Materials Data Facility";

/// Short key of the community tag injected into every entry's content.
pub const COMMUNITY_KEY: &str = "mdf-publish.publication.community";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GMetaEntry {
    #[serde(rename = "@datatype")]
    pub datatype: String,
    #[serde(rename = "@version")]
    pub version: String,
    pub subject: String,
    pub visible_to: Vec<String>,
    pub content: Map<String, Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GMetaList {
    #[serde(rename = "@datatype")]
    pub datatype: String,
    #[serde(rename = "@version")]
    pub version: String,
    pub gmeta: Vec<GMetaEntry>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GIngest {
    #[serde(rename = "@datatype")]
    pub datatype: String,
    #[serde(rename = "@version")]
    pub version: String,
    pub ingest_type: String,
    pub ingest_data: GMetaList,
}

impl GIngest {
    pub fn len(&self) -> usize {
        self.ingest_data.gmeta.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ingest_data.gmeta.is_empty()
    }

    pub fn to_value(&self) -> Result<Value> {
        Ok(serde_json::to_value(self)?)
    }
}

#[derive(Clone, Debug)]
pub struct EnvelopeFormatter {
    version: String,
    community_key: String,
    community: String,
}

impl Default for EnvelopeFormatter {
    fn default() -> Self {
        Self::new(DEFAULT_GMETA_VERSION, DEFAULT_COMMUNITY)
    }
}

impl EnvelopeFormatter {
    pub fn new(version: impl Into<String>, community: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            community_key: NamespaceMapper::new().namespace_key(COMMUNITY_KEY),
            community: community.into(),
        }
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Wrap one record. The record must carry a top-level `subject` string and a
    /// non-empty `acl` list; both are lifted out of the content.
    pub fn format_entry(&self, record: Value) -> Result<GMetaEntry> {
        let mut content = match record {
            Value::Object(map) => map,
            other => return Err(MdfError::invalid_envelope(format!("record is not an object: {other}"))),
        };

        let subject = match content.remove("subject") {
            Some(Value::String(s)) if !s.trim().is_empty() => s,
            Some(other) => return Err(MdfError::invalid_envelope(format!("subject is not a URI string: {other}"))),
            None => return Err(MdfError::invalid_envelope("missing subject")),
        };

        let visible_to = match content.remove("acl") {
            Some(Value::Array(list)) if !list.is_empty() => list
                .into_iter()
                .map(|v| match v {
                    Value::String(s) if !s.is_empty() => Ok(s),
                    other => Err(MdfError::invalid_envelope(format!("acl entry for {subject} is not a principal: {other}"))),
                })
                .collect::<Result<Vec<_>>>()?,
            Some(other) => return Err(MdfError::invalid_envelope(format!("acl for {subject} must be a non-empty list: {other}"))),
            None => return Err(MdfError::invalid_envelope(format!("missing acl for {subject}"))),
        };

        content.insert(self.community_key.clone(), Value::String(self.community.clone()));

        Ok(GMetaEntry {
            datatype: "GMetaEntry".into(),
            version: self.version.clone(),
            subject,
            visible_to,
            content,
        })
    }

    pub fn format_list(&self, entries: Vec<GMetaEntry>) -> GIngest {
        GIngest {
            datatype: "GIngest".into(),
            version: self.version.clone(),
            ingest_type: "GMetaList".into(),
            ingest_data: GMetaList {
                datatype: "GMetaList".into(),
                version: self.version.clone(),
                gmeta: entries,
            },
        }
    }
}
