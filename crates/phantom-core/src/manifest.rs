//! `plugin.yml` handling

use once_cell::sync::Lazy;
use regex::Regex;

/// Name of the plugin descriptor entry
pub const PLUGIN_YML: &str = "plugin.yml";

/// Bridge package used when the plugin name is unusable
pub const FALLBACK_PACKAGE: &str = "phantom/folia/runtime";

const SUPPORTED_LINE: &str = "folia-supported: true";

static NAME_LINE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^name:[ \t]*(.*?)[ \t\r]*$").expect("name regex is valid"));

static SUPPORTED: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*folia-supported:.*$").expect("capability regex is valid"));

/// The top-level `name:` value, quotes stripped
pub fn plugin_name(yml: &str) -> Option<String> {
    let raw = NAME_LINE.captures(yml)?.get(1)?.as_str();
    let name = raw
        .strip_prefix('"')
        .and_then(|s| s.strip_suffix('"'))
        .or_else(|| raw.strip_prefix('\'').and_then(|s| s.strip_suffix('\'')))
        .unwrap_or(raw)
        .trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Bridge package for a plugin: the lowercased name restricted to
/// `[a-z0-9]`, then `/folia/runtime`
pub fn bridge_package(name: Option<&str>) -> String {
    let safe: String = name
        .unwrap_or_default()
        .to_lowercase()
        .chars()
        .filter(|c| c.is_ascii_lowercase() || c.is_ascii_digit())
        .collect();
    if safe.is_empty() {
        FALLBACK_PACKAGE.to_string()
    } else {
        format!("{}/folia/runtime", safe)
    }
}

/// Whether the descriptor already declares support
pub fn is_folia_supported(yml: &str) -> bool {
    yml.lines()
        .any(|line| line.trim().eq_ignore_ascii_case(SUPPORTED_LINE))
}

/// Declare support. The first capability line is rewritten, later ones are
/// removed, and one is appended when there was none.
pub fn mark_supported(yml: &str) -> String {
    if !SUPPORTED.is_match(yml) {
        return format!("{}\n{}\n", yml.trim_end(), SUPPORTED_LINE);
    }
    let mut first = true;
    let mut out = String::with_capacity(yml.len());
    for line in yml.split_inclusive('\n') {
        let body = line.trim_end_matches(['\n', '\r']);
        if SUPPORTED.is_match(body) {
            if first {
                out.push_str(SUPPORTED_LINE);
                out.push_str(&line[body.len()..]);
                first = false;
            }
            continue;
        }
        out.push_str(line);
    }
    out
}
