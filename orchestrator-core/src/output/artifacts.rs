//! Artifact extraction: pulls concrete, verifiable evidence out of raw
//! agent output so the summarizer can be told to preserve it verbatim.

use regex::Regex;
use std::sync::OnceLock;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Artifacts {
    pub commit_hashes: Vec<String>,
    pub urls: Vec<String>,
    pub changed_files: Vec<String>,
    pub test_results: Vec<String>,
    pub errors: Vec<String>,
}

impl Artifacts {
    pub fn is_empty(&self) -> bool {
        self.commit_hashes.is_empty()
            && self.urls.is_empty()
            && self.changed_files.is_empty()
            && self.test_results.is_empty()
            && self.errors.is_empty()
    }
}

fn dedup_preserve_order(items: Vec<String>) -> Vec<String> {
    let mut seen = std::collections::HashSet::new();
    items
        .into_iter()
        .filter(|item| seen.insert(item.clone()))
        .collect()
}

fn commit_hash_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:commit|pushed|merged|created)\b[^\n]{0,20}?\b([0-9a-f]{7,40})\b")
            .unwrap()
    })
}

fn bare_hash_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b([0-9a-f]{7,12})\b\s").unwrap())
}

fn url_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"https?://[^\s\]\)"'>]+"#).unwrap())
}

fn changed_file_phrase_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\b(?:modified|created|deleted|renamed|changed):\s*(\S+)").unwrap()
    })
}

fn porcelain_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\s*[MADR]\s+(\S+)").unwrap())
}

fn test_result_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)\d+\s+passed(?:,\s*\d+\s+(?:failed|error|errors|warning|warnings|skipped))*")
            .unwrap()
    })
}

fn error_line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?mi)^.*\berror\b.*$").unwrap())
}

const MAX_ERROR_LINES: usize = 5;

/// Extract the four artifact families independently, deduplicated
/// preserving first-seen order.
pub fn extract(text: &str) -> Artifacts {
    let mut commit_hashes: Vec<String> = commit_hash_regex()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    commit_hashes.extend(
        bare_hash_regex()
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string())),
    );

    let urls = url_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();

    let mut changed_files: Vec<String> = changed_file_phrase_regex()
        .captures_iter(text)
        .filter_map(|c| c.get(1).map(|m| m.as_str().to_string()))
        .collect();
    changed_files.extend(
        porcelain_line_regex()
            .captures_iter(text)
            .filter_map(|c| c.get(1).map(|m| m.as_str().to_string())),
    );

    let test_results = test_result_regex()
        .find_iter(text)
        .map(|m| m.as_str().to_string())
        .collect();

    let errors = error_line_regex()
        .find_iter(text)
        .take(MAX_ERROR_LINES)
        .map(|m| m.as_str().trim().to_string())
        .collect();

    Artifacts {
        commit_hashes: dedup_preserve_order(commit_hashes),
        urls: dedup_preserve_order(urls),
        changed_files: dedup_preserve_order(changed_files),
        test_results: dedup_preserve_order(test_results),
        errors,
    }
}
