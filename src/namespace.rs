//! Key namespacing for the search index: `mdf-base.title` becomes
//! `http://globus.org/publication-schemas/mdf-base/0.1#title` on the way in and
//! goes back on the way out.

use serde_json::{Map, Value};

/// Namespace for keys that carry no recognised prefix.
pub const DEFAULT_NAMESPACE: &str = "http://materialsdatafacility.org/schemas/mdf-default/0.3";

/// (short prefix, namespace). Longer prefixes first so `mdf-base.` wins over `mdf.`.
const NAMESPACES: &[(&str, &str)] = &[
    ("mdf-publish.", "http://globus.org/publish-terms/"),
    ("mdf-base.", "http://globus.org/publication-schemas/mdf-base/0.1"),
    ("mdf.", "http://materialsdatafacility.org/schemas/mdf/0.3"),
    ("dc.", "http://datacite.org/schema/kernel-3"),
];

/// Pure mapping between short keys and fully namespaced keys.
#[derive(Clone, Copy, Debug, Default)]
pub struct NamespaceMapper;

impl NamespaceMapper {
    pub fn new() -> Self {
        Self
    }

    /// Namespaced form of a single key.
    pub fn namespace_key(&self, key: &str) -> String {
        if split_namespaced(key).is_some() {
            return key.to_string();
        }
        for (prefix, ns) in NAMESPACES {
            if let Some(local) = key.strip_prefix(prefix) {
                return format!("{ns}#{local}");
            }
        }
        format!("{DEFAULT_NAMESPACE}#{key}")
    }

    /// Short form of a single key; keys outside the table pass through.
    pub fn strip_key(&self, key: &str) -> String {
        match split_namespaced(key) {
            Some((None, local)) => local.to_string(),
            Some((Some(prefix), local)) => format!("{prefix}{local}"),
            None => key.to_string(),
        }
    }

    /// Recursively namespace every object key.
    pub fn add_namespace(&self, v: &Value) -> Value {
        self.rewrite(v, &|k| self.namespace_key(k))
    }

    /// Recursively strip namespaces from every object key.
    pub fn remove_namespace(&self, v: &Value) -> Value {
        self.rewrite(v, &|k| self.strip_key(k))
    }

    fn rewrite(&self, v: &Value, f: &dyn Fn(&str) -> String) -> Value {
        match v {
            Value::Object(map) => {
                let mut out = Map::with_capacity(map.len());
                for (k, child) in map {
                    out.insert(f(k), self.rewrite(child, f));
                }
                Value::Object(out)
            }
            Value::Array(list) => Value::Array(list.iter().map(|x| self.rewrite(x, f)).collect()),
            other => other.clone(),
        }
    }
}

/// Recognise `<namespace>#<local>`: `Some((Some(prefix), local))` for table
/// entries, `Some((None, local))` for the default namespace.
fn split_namespaced(key: &str) -> Option<(Option<&'static str>, &str)> {
    let (ns, local) = key.split_once('#')?;
    if ns == DEFAULT_NAMESPACE {
        return Some((None, local));
    }
    NAMESPACES
        .iter()
        .find(|(_, known)| *known == ns)
        .map(|(prefix, _)| (Some(*prefix), local))
}
