use serde_json::Value;

/// `links.landing_page` as a string, if present.
pub fn landing_page(v: &Value) -> Option<&str> {
    v.get("links")
        .and_then(|l| l.get("landing_page"))
        .and_then(|x| x.as_str())
}

/// The raw `acl` value, if present.
pub fn acl_of(v: &Value) -> Option<&Value> {
    v.get("acl")
}

/// `acl` as a non-empty list of strings; anything else is `None`.
pub fn acl_list(v: &Value) -> Option<Vec<String>> {
    let list = v.get("acl")?.as_array()?;
    let out: Vec<String> = list.iter().filter_map(|x| x.as_str().map(str::to_string)).collect();
    (!out.is_empty() && out.len() == list.len()).then_some(out)
}

/// `source_name` from a dataset header.
pub fn source_name(v: &Value) -> Option<&str> {
    v.get("source_name").and_then(|x| x.as_str())
}
