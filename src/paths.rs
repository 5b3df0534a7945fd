use regex::Regex;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use walkdir::WalkDir;

pub const FEEDSTOCK_SUFFIX: &str = "_all.json";

/// `<dir>/<source_name>_all.json`
pub fn feedstock_path(dir: &Path, source_name: &str) -> PathBuf {
    dir.join(format!("{source_name}{FEEDSTOCK_SUFFIX}"))
}

/// Lock file guarding exclusive writes to a feedstock.
pub fn lock_path(feedstock: &Path) -> PathBuf {
    let mut name = feedstock.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".lock");
    feedstock.with_file_name(name)
}

/// Source names must be usable as file name stems.
pub fn is_valid_source_name(name: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9_.\-]*$").expect("static regex"))
        .is_match(name)
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FeedstockJob {
    pub source_name: String,
    pub path: PathBuf,
}

/// All `<source>_all.json` files directly under `dir`, sorted by source name.
pub fn discover_feedstocks(dir: &Path) -> Vec<FeedstockJob> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^(.+)_all\.json$").expect("static regex"));

    let mut jobs = Vec::new();
    if !dir.exists() {
        return jobs;
    }
    for ent in WalkDir::new(dir).min_depth(1).max_depth(1).into_iter().flatten() {
        if !ent.file_type().is_file() {
            continue;
        }
        if let Some(name) = ent.file_name().to_str() {
            if let Some(caps) = re.captures(name) {
                jobs.push(FeedstockJob { source_name: caps[1].to_string(), path: ent.path().to_path_buf() });
            }
        }
    }
    jobs.sort_by(|a, b| a.source_name.cmp(&b.source_name));
    jobs
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn naming_conventions() {
        let p = feedstock_path(Path::new("/fs"), "oqmd");
        assert_eq!(p, PathBuf::from("/fs/oqmd_all.json"));
        assert_eq!(lock_path(&p), PathBuf::from("/fs/oqmd_all.json.lock"));
        assert!(is_valid_source_name("nist_xps-db.v2"));
        assert!(!is_valid_source_name("../escape"));
        assert!(!is_valid_source_name(""));
    }

    #[test]
    fn discovery_skips_locks_and_other_files() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("b_all.json"), "{}\n").unwrap();
        fs::write(dir.path().join("a_all.json"), "{}\n").unwrap();
        fs::write(dir.path().join("a_all.json.lock"), "").unwrap();
        fs::write(dir.path().join("notes.txt"), "").unwrap();
        let names: Vec<String> = discover_feedstocks(dir.path()).into_iter().map(|j| j.source_name).collect();
        assert_eq!(names, vec!["a", "b"]);
        assert!(discover_feedstocks(&dir.path().join("missing")).is_empty());
    }
}
