//! Versioned metadata schemas: compiled from JSON-Schema documents whose property
//! descriptions carry a `REQ|RCM|OPT|INTERNAL|Undefined:` requirement prefix.

use crate::error::{MdfError, Result};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::fs;
use std::path::Path;
use std::sync::OnceLock;

/// Schema versions compiled into the binary: (version, dataset schema, record schema).
const EMBEDDED: &[(&str, &str, &str)] = &[(
    "0.3.0",
    include_str!("../schemas/0.3.0/dataset.json"),
    include_str!("../schemas/0.3.0/record.json"),
)];

pub const DEFAULT_SCHEMA_VERSION: &str = "0.3.0";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SchemaKind {
    Dataset,
    Record,
}

impl fmt::Display for SchemaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchemaKind::Dataset => f.write_str("dataset"),
            SchemaKind::Record => f.write_str("record"),
        }
    }
}

/// Requirement level encoded in a property's description prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FieldLevel {
    Required,
    Recommended,
    Optional,
    /// Written by the validator itself; never accepted from a converter.
    Internal,
    /// Reserved; never accepted from a converter.
    Undefined,
}

impl FieldLevel {
    fn from_description(desc: &str) -> Option<Self> {
        static PREFIX: OnceLock<Regex> = OnceLock::new();
        let re = PREFIX.get_or_init(|| {
            Regex::new(r"^\s*(REQ|RCM|OPT|INTERNAL|Undefined)\s*:").expect("static regex")
        });
        let caps = re.captures(desc)?;
        Some(match &caps[1] {
            "REQ" => FieldLevel::Required,
            "RCM" => FieldLevel::Recommended,
            "OPT" => FieldLevel::Optional,
            "INTERNAL" => FieldLevel::Internal,
            _ => FieldLevel::Undefined,
        })
    }

    fn is_forbidden(self) -> bool {
        matches!(self, FieldLevel::Internal | FieldLevel::Undefined)
    }
}

/// One problem found while validating, addressed by a dotted path such as
/// `links.landing_page` or `author[1].email`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FieldIssue {
    pub path: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<Value>,
}

impl FieldIssue {
    pub fn new(path: impl Into<String>, message: impl Into<String>) -> Self {
        Self { path: path.into(), message: message.into(), value: None }
    }

    pub fn with_value(mut self, value: &Value) -> Self {
        self.value = Some(value.clone());
        self
    }
}

impl fmt::Display for FieldIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let path = if self.path.is_empty() { "(root)" } else { &self.path };
        write!(f, "{path}: {}", self.message)?;
        if let Some(v) = &self.value {
            write!(f, " (got {v})")?;
        }
        Ok(())
    }
}

/// Outcome of validating one object.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub errors: Vec<FieldIssue>,
    pub warnings: Vec<FieldIssue>,
}

impl ValidationReport {
    pub fn ok(&self) -> bool {
        self.errors.is_empty()
    }

    /// Strict mode: every warning becomes an error.
    pub fn promote_warnings(mut self) -> Self {
        self.errors.append(&mut self.warnings);
        self
    }

    pub fn warning_paths(&self) -> Vec<&str> {
        self.warnings.iter().map(|w| w.path.as_str()).collect()
    }

    pub fn error_paths(&self) -> Vec<&str> {
        self.errors.iter().map(|e| e.path.as_str()).collect()
    }

    fn error(&mut self, issue: FieldIssue) {
        self.errors.push(issue);
    }

    fn warn(&mut self, issue: FieldIssue) {
        self.warnings.push(issue);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum JsonType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
    Null,
}

impl JsonType {
    fn parse(s: &str) -> Option<Self> {
        Some(match s {
            "string" => JsonType::String,
            "integer" => JsonType::Integer,
            "number" => JsonType::Number,
            "boolean" => JsonType::Boolean,
            "array" => JsonType::Array,
            "object" => JsonType::Object,
            "null" => JsonType::Null,
            _ => return None,
        })
    }

    fn matches(self, v: &Value) -> bool {
        match self {
            JsonType::String => v.is_string(),
            JsonType::Integer => v.is_i64() || v.is_u64(),
            JsonType::Number => v.is_number(),
            JsonType::Boolean => v.is_boolean(),
            JsonType::Array => v.is_array(),
            JsonType::Object => v.is_object(),
            JsonType::Null => v.is_null(),
        }
    }

    fn name(self) -> &'static str {
        match self {
            JsonType::String => "string",
            JsonType::Integer => "integer",
            JsonType::Number => "number",
            JsonType::Boolean => "boolean",
            JsonType::Array => "array",
            JsonType::Object => "object",
            JsonType::Null => "null",
        }
    }
}

/// What to do with object keys the schema does not list.
#[derive(Clone, Debug)]
enum Extra {
    Allow,
    Warn,
    Validate(Box<FieldSpec>),
}

/// A compiled schema node.
#[derive(Clone, Debug)]
struct FieldSpec {
    level: FieldLevel,
    types: Vec<JsonType>,
    uri: bool,
    min_items: Option<usize>,
    items: Option<Box<FieldSpec>>,
    properties: Vec<(String, FieldSpec)>,
    extra: Extra,
}

impl FieldSpec {
    fn compile(node: &Value, path: &str, level: FieldLevel) -> Result<Self> {
        let obj = node
            .as_object()
            .ok_or_else(|| MdfError::config(format!("schema node '{path}' is not an object")))?;

        let types = match obj.get("type") {
            None => Vec::new(),
            Some(Value::String(s)) => vec![parse_type(s, path)?],
            Some(Value::Array(list)) => list
                .iter()
                .map(|t| t.as_str().ok_or_else(|| bad_type(path)).and_then(|s| parse_type(s, path)))
                .collect::<Result<_>>()?,
            Some(_) => return Err(bad_type(path)),
        };

        let mut properties = Vec::new();
        if let Some(props) = obj.get("properties").and_then(Value::as_object) {
            for (name, child) in props {
                let child_path = join(path, name);
                let desc = child.get("description").and_then(Value::as_str).unwrap_or("");
                let child_level = FieldLevel::from_description(desc).ok_or_else(|| {
                    MdfError::config(format!(
                        "schema property '{child_path}' lacks a REQ/RCM/OPT/INTERNAL/Undefined description prefix"
                    ))
                })?;
                properties.push((name.clone(), FieldSpec::compile(child, &child_path, child_level)?));
            }
        }

        let items = match obj.get("items") {
            Some(items) => Some(Box::new(FieldSpec::compile(items, &format!("{path}[]"), FieldLevel::Optional)?)),
            None => None,
        };

        let extra = match obj.get("additionalProperties") {
            Some(Value::Bool(false)) => Extra::Warn,
            Some(ap @ Value::Object(_)) => {
                Extra::Validate(Box::new(FieldSpec::compile(ap, &join(path, "*"), FieldLevel::Optional)?))
            }
            _ => Extra::Allow,
        };

        Ok(Self {
            level,
            types,
            uri: obj.get("format").and_then(Value::as_str) == Some("uri"),
            min_items: obj.get("minItems").and_then(Value::as_u64).map(|n| n as usize),
            items,
            properties,
            extra,
        })
    }

    /// Flatten into (path, level) pairs; array items and extra keys use `[]` and `*`.
    fn collect_levels(&self, path: &str, out: &mut Vec<(String, FieldLevel)>) {
        for (name, child) in &self.properties {
            let child_path = join(path, name);
            out.push((child_path.clone(), child.level));
            child.collect_levels(&child_path, out);
        }
        if let Some(items) = &self.items {
            items.collect_levels(path, out);
        }
        if let Extra::Validate(spec) = &self.extra {
            spec.collect_levels(&join(path, "*"), out);
        }
    }

    fn check(&self, value: &Value, path: &str, report: &mut ValidationReport) {
        if !self.types.is_empty() && !self.types.iter().any(|t| t.matches(value)) {
            let expected = self.types.iter().map(|t| t.name()).collect::<Vec<_>>().join(" or ");
            report.error(FieldIssue::new(path, format!("expected {expected}")).with_value(value));
            return;
        }

        match value {
            Value::String(s) if self.uri && !s.is_empty() && !looks_like_uri(s) => {
                report.error(FieldIssue::new(path, "expected a URI").with_value(value));
            }
            Value::Array(list) => {
                if let Some(min) = self.min_items {
                    if list.len() < min {
                        report.error(
                            FieldIssue::new(path, format!("expected at least {min} item(s)")).with_value(value),
                        );
                    }
                }
                if let Some(items) = &self.items {
                    for (i, item) in list.iter().enumerate() {
                        items.check(item, &format!("{path}[{i}]"), report);
                    }
                }
            }
            Value::Object(map) => self.check_object(map, path, report),
            _ => {}
        }
    }

    fn check_object(&self, map: &Map<String, Value>, path: &str, report: &mut ValidationReport) {
        for (name, spec) in &self.properties {
            let child_path = join(path, name);
            let supplied = map.get(name);

            if spec.level.is_forbidden() {
                if let Some(v) = supplied {
                    report.error(
                        FieldIssue::new(&child_path, "reserved field may not be supplied").with_value(v),
                    );
                }
                continue;
            }

            match supplied {
                Some(v) if !is_blank(v) => spec.check(v, &child_path, report),
                missing => {
                    match spec.level {
                        FieldLevel::Required => {
                            let issue = FieldIssue::new(&child_path, "missing required field");
                            report.error(match missing {
                                Some(v) => issue.with_value(v),
                                None => issue,
                            });
                        }
                        FieldLevel::Recommended => {
                            report.warn(FieldIssue::new(&child_path, "missing recommended field"));
                        }
                        _ => {}
                    }
                    // Blank but present still gets type-checked (e.g. an empty record ACL).
                    if let (Some(v), false) = (missing, spec.level == FieldLevel::Required) {
                        spec.check(v, &child_path, report);
                    }
                }
            }
        }

        for (key, v) in map {
            if self.properties.iter().any(|(name, _)| name == key) {
                continue;
            }
            let child_path = join(path, key);
            match &self.extra {
                Extra::Allow => {}
                Extra::Warn => report.warn(FieldIssue::new(&child_path, "unknown field")),
                Extra::Validate(spec) => spec.check(v, &child_path, report),
            }
        }
    }
}

#[derive(Debug)]
struct CompiledSchema {
    root: FieldSpec,
    levels: Vec<(String, FieldLevel)>,
}

impl CompiledSchema {
    fn compile(doc: &Value, kind: SchemaKind) -> Result<Self> {
        let root = FieldSpec::compile(doc, "", FieldLevel::Required)
            .map_err(|e| MdfError::config(format!("{kind} schema: {e}")))?;
        let mut levels = Vec::new();
        root.collect_levels("", &mut levels);
        Ok(Self { root, levels })
    }

    fn fields_at(&self, level: FieldLevel) -> Vec<String> {
        self.levels.iter().filter(|(_, l)| *l == level).map(|(p, _)| p.clone()).collect()
    }
}

/// Dataset and record schemas for one metadata version.
#[derive(Debug)]
pub struct SchemaRegistry {
    version: String,
    dataset: CompiledSchema,
    record: CompiledSchema,
}

impl SchemaRegistry {
    /// Load a schema version compiled into the binary.
    pub fn load(version: &str) -> Result<Self> {
        let (_, dataset, record) = EMBEDDED
            .iter()
            .find(|(v, _, _)| *v == version)
            .ok_or_else(|| MdfError::config(format!("unknown schema version '{version}'")))?;
        Self::from_values(version, &serde_json::from_str(dataset)?, &serde_json::from_str(record)?)
    }

    /// Load `<dir>/<version>/dataset.json` and `<dir>/<version>/record.json`.
    pub fn from_dir(dir: &Path, version: &str) -> Result<Self> {
        let read = |name: &str| -> Result<Value> {
            let path = dir.join(version).join(name);
            let text = fs::read_to_string(&path)
                .map_err(|e| MdfError::config(format!("read schema {}: {e}", path.display())))?;
            Ok(serde_json::from_str(&text)?)
        };
        Self::from_values(version, &read("dataset.json")?, &read("record.json")?)
    }

    pub fn from_values(version: &str, dataset: &Value, record: &Value) -> Result<Self> {
        Ok(Self {
            version: version.to_string(),
            dataset: CompiledSchema::compile(dataset, SchemaKind::Dataset)?,
            record: CompiledSchema::compile(record, SchemaKind::Record)?,
        })
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    pub fn validate(&self, obj: &Value, kind: SchemaKind) -> ValidationReport {
        let mut report = ValidationReport::default();
        match obj {
            Value::Object(map) => self.schema(kind).root.check_object(map, "", &mut report),
            other => report.error(FieldIssue::new("", format!("{kind} metadata must be an object")).with_value(other)),
        }
        report
    }

    pub fn required_fields(&self, kind: SchemaKind) -> Vec<String> {
        self.schema(kind).fields_at(FieldLevel::Required)
    }

    pub fn recommended_fields(&self, kind: SchemaKind) -> Vec<String> {
        self.schema(kind).fields_at(FieldLevel::Recommended)
    }

    pub fn optional_fields(&self, kind: SchemaKind) -> Vec<String> {
        self.schema(kind).fields_at(FieldLevel::Optional)
    }

    fn schema(&self, kind: SchemaKind) -> &CompiledSchema {
        match kind {
            SchemaKind::Dataset => &self.dataset,
            SchemaKind::Record => &self.record,
        }
    }
}

/// Present-but-empty counts as missing: null, blank strings, empty lists and objects.
pub fn is_blank(v: &Value) -> bool {
    match v {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
        _ => false,
    }
}

fn looks_like_uri(s: &str) -> bool {
    static URI: OnceLock<Regex> = OnceLock::new();
    URI.get_or_init(|| Regex::new(r"^[A-Za-z][A-Za-z0-9+.\-]*:\S+$").expect("static regex"))
        .is_match(s)
}

fn join(prefix: &str, name: &str) -> String {
    if prefix.is_empty() {
        name.to_string()
    } else {
        format!("{prefix}.{name}")
    }
}

fn parse_type(s: &str, path: &str) -> Result<JsonType> {
    JsonType::parse(s).ok_or_else(|| MdfError::config(format!("schema node '{path}' has unknown type '{s}'")))
}

fn bad_type(path: &str) -> MdfError {
    MdfError::config(format!("schema node '{path}' has a malformed type"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::load(DEFAULT_SCHEMA_VERSION).unwrap()
    }

    fn header() -> Value {
        json!({
            "title": "T",
            "acl": ["public"],
            "source_name": "s1",
            "data_contact": {"given_name": "A", "family_name": "B", "email": "a@b.org"},
            "citation": ["c"],
            "links": {"landing_page": "http://x/1"},
            "data_contributor": [{"given_name": "C", "family_name": "D", "email": "c@d.org"}]
        })
    }

    #[test]
    fn description_prefixes_are_parsed() {
        assert_eq!(FieldLevel::from_description("REQ: x"), Some(FieldLevel::Required));
        assert_eq!(FieldLevel::from_description("  RCM:"), Some(FieldLevel::Recommended));
        assert_eq!(FieldLevel::from_description("Undefined: later"), Some(FieldLevel::Undefined));
        assert_eq!(FieldLevel::from_description("something else"), None);
    }

    #[test]
    fn field_sets_are_disjoint_and_nested() {
        let reg = registry();
        let req = reg.required_fields(SchemaKind::Dataset);
        let rcm = reg.recommended_fields(SchemaKind::Dataset);
        for f in ["title", "acl", "source_name", "data_contact", "links", "links.landing_page", "data_contributor"] {
            assert!(req.contains(&f.to_string()), "{f} should be required");
        }
        assert_eq!(rcm, vec!["citation".to_string()]);
        assert!(req.iter().all(|f| !rcm.contains(f)));
        assert!(reg.optional_fields(SchemaKind::Dataset).contains(&"links.*.globus_endpoint".to_string()));

        let rec_req = reg.required_fields(SchemaKind::Record);
        assert!(rec_req.contains(&"title".to_string()));
        assert!(rec_req.contains(&"links.landing_page".to_string()));
    }

    #[test]
    fn minimal_header_is_clean() {
        let report = registry().validate(&header(), SchemaKind::Dataset);
        assert!(report.ok(), "{:?}", report.errors);
        assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    }

    #[test]
    fn missing_recommended_is_a_warning_and_strict_promotes_it() {
        let mut h = header();
        h.as_object_mut().unwrap().remove("citation");
        let report = registry().validate(&h, SchemaKind::Dataset);
        assert!(report.ok());
        assert_eq!(report.warning_paths(), vec!["citation"]);

        let strict = report.promote_warnings();
        assert!(!strict.ok());
        assert_eq!(strict.error_paths(), vec!["citation"]);
    }

    #[test]
    fn blank_required_values_are_errors() {
        let mut h = header();
        h["title"] = json!("   ");
        h["links"]["landing_page"] = json!("");
        let report = registry().validate(&h, SchemaKind::Dataset);
        let paths = report.error_paths();
        assert!(paths.contains(&"title"));
        assert!(paths.contains(&"links.landing_page"));
    }

    #[test]
    fn empty_acl_is_rejected() {
        let mut h = header();
        h["acl"] = json!([]);
        let report = registry().validate(&h, SchemaKind::Dataset);
        assert_eq!(report.error_paths(), vec!["acl"]);

        let rec = json!({"title": "R", "acl": [], "links": {"landing_page": "http://x/r"}});
        let report = registry().validate(&rec, SchemaKind::Record);
        assert_eq!(report.error_paths(), vec!["acl"]);
    }

    #[test]
    fn type_errors_carry_path_and_value() {
        let mut h = header();
        h["year"] = json!("twenty");
        h["data_contributor"][0]["email"] = json!(7);
        let report = registry().validate(&h, SchemaKind::Dataset);
        let year = report.errors.iter().find(|e| e.path == "year").unwrap();
        assert_eq!(year.value, Some(json!("twenty")));
        assert!(report.error_paths().contains(&"data_contributor[0].email"));
    }

    #[test]
    fn internal_and_undefined_fields_are_errors() {
        let mut h = header();
        h["source_id"] = json!("abc");
        h["ingest_date"] = json!("2020");
        let report = registry().validate(&h, SchemaKind::Dataset);
        assert_eq!(report.error_paths(), vec!["source_id", "ingest_date"]);
    }

    #[test]
    fn unknown_keys_warn_and_data_locations_validate() {
        let mut h = header();
        h["flavour"] = json!("mint");
        h["links"]["globus"] = json!({"globus_endpoint": "ep", "path": "/data"});
        h["links"]["broken"] = json!({"http_host": "https://host"});
        let report = registry().validate(&h, SchemaKind::Dataset);
        assert_eq!(report.warning_paths(), vec!["flavour"]);
        assert_eq!(report.error_paths(), vec!["links.broken.path"]);
    }

    #[test]
    fn non_uri_landing_page_is_rejected() {
        let rec = json!({"title": "R", "links": {"landing_page": "not a url"}});
        let report = registry().validate(&rec, SchemaKind::Record);
        assert_eq!(report.error_paths(), vec!["links.landing_page"]);
    }

    #[test]
    fn non_object_metadata_is_rejected() {
        let report = registry().validate(&json!(["nope"]), SchemaKind::Record);
        assert!(!report.ok());
        assert_eq!(report.errors[0].path, "");
    }

    #[test]
    fn unknown_version_is_a_config_error() {
        assert!(matches!(SchemaRegistry::load("9.9.9"), Err(MdfError::Config(_))));
    }
}
