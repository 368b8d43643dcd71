use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Keyword lists used to classify a scan target. `heavy` is checked before `static`.
///
/// A missing list deserializes to its built-in default.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct KeywordSet {
    pub heavy: Vec<String>,
    #[serde(rename = "static")]
    pub static_sites: Vec<String>,
}

impl Default for KeywordSet {
    fn default() -> Self {
        default_keywords()
    }
}

/// Parse keyword file content into a deduplicated `KeywordSet`.
///
/// Supported formats per line:
/// - `heavy: shop, store, stream`
/// - `static: docs, blog`
/// - comments: everything after `#` is ignored
/// - whitespace and blank lines are ignored
///
/// A category may appear on several lines; its keywords accumulate in order.
pub fn parse_keywords_str(s: &str) -> Result<KeywordSet> {
    let mut set = KeywordSet {
        heavy: Vec::new(),
        static_sites: Vec::new(),
    };

    for (idx, raw_line) in s.lines().enumerate() {
        let line_no = idx + 1;
        let line = raw_line.split('#').next().map(str::trim).unwrap_or("");
        if line.is_empty() {
            continue;
        }

        let Some((category, list)) = line.split_once(':') else {
            bail!("line {line_no}: expected `<category>: <keyword>, ...`, got: {line}");
        };
        let bucket = match category.trim() {
            "heavy" => &mut set.heavy,
            "static" => &mut set.static_sites,
            other => bail!("line {line_no}: unknown category: {other}"),
        };

        for kw in list.split(',') {
            let kw = kw.trim();
            if kw.is_empty() {
                bail!("line {line_no}: empty keyword in list: {}", list.trim());
            }
            if !bucket.iter().any(|k| k == kw) {
                bucket.push(kw.to_string());
            }
        }
    }

    Ok(set)
}

/// Load keyword lists from a file path. Errors if the file cannot be read or parsed.
pub fn load_keywords_from_path(path: impl AsRef<Path>) -> Result<KeywordSet> {
    let content = fs::read_to_string(path.as_ref())
        .with_context(|| format!("failed to read keywords file: {}", path.as_ref().display()))?;
    parse_keywords_str(&content)
}

/// Load keyword lists from a file, or return the built-in lists if missing, invalid or empty.
pub fn load_keywords_or_default(path: impl AsRef<Path>) -> KeywordSet {
    match load_keywords_from_path(&path) {
        Ok(set) if !set.heavy.is_empty() || !set.static_sites.is_empty() => set,
        Ok(_) => default_keywords(),
        Err(e) => {
            tracing::warn!(error = %e, "falling back to built-in keyword lists");
            default_keywords()
        }
    }
}

/// Built-in keyword lists: traffic-intensive site types and low-dynamism site types.
pub fn default_keywords() -> KeywordSet {
    const HEAVY: &[&str] = &["shop", "store", "stream", "video", "news", "social"];
    const STATIC: &[&str] = &["docs", "blog", "wiki", "portfolio", "landing"];
    KeywordSet {
        heavy: HEAVY.iter().map(|s| s.to_string()).collect(),
        static_sites: STATIC.iter().map(|s| s.to_string()).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_both_categories() {
        let input = "heavy: shop, store\nstatic: docs\n";
        let set = parse_keywords_str(input).unwrap();
        assert_eq!(set.heavy, vec!["shop", "store"]);
        assert_eq!(set.static_sites, vec!["docs"]);
    }

    #[test]
    fn repeated_category_accumulates_and_dedups() {
        let input = "heavy: shop\nheavy: store, shop\n";
        let set = parse_keywords_str(input).unwrap();
        assert_eq!(set.heavy, vec!["shop", "store"]);
        assert!(set.static_sites.is_empty());
    }

    #[test]
    fn unknown_category_errors_with_line() {
        let err = parse_keywords_str("\nmedium: forum\n").unwrap_err();
        assert!(err.to_string().contains("line 2"));
    }

    #[test]
    fn missing_colon_errors() {
        assert!(parse_keywords_str("heavy shop\n").is_err());
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let set = load_keywords_or_default("/nonexistent/keywords.txt");
        assert_eq!(set, default_keywords());
    }

    #[test]
    fn defaults_cover_shop_and_docs() {
        let d = default_keywords();
        assert!(d.heavy.iter().any(|k| k == "shop"));
        assert!(d.static_sites.iter().any(|k| k == "docs"));
    }
}
