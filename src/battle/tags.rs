use regex::Regex;
use std::collections::HashMap;
use std::sync::OnceLock;

fn tag_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"(?s)<([A-Za-z_][A-Za-z0-9_]*)>(.*?)</([A-Za-z_][A-Za-z0-9_]*)>")
            .unwrap_or_else(|e| panic!("invalid tag pattern: {}", e))
    })
}

/// Extracts `<name>content</name>` pairs. Content is trimmed; when a tag
/// appears more than once the last occurrence wins.
pub fn parse_tags(text: &str) -> HashMap<String, String> {
    let mut tags = HashMap::new();
    let mut rest = text;

    while let Some(caps) = tag_pattern().captures(rest) {
        let (Some(whole), Some(open), Some(body), Some(close)) =
            (caps.get(0), caps.get(1), caps.get(2), caps.get(3))
        else {
            break;
        };

        if open.as_str() == close.as_str() {
            tags.insert(open.as_str().to_string(), body.as_str().trim().to_string());
            rest = &rest[whole.end()..];
        } else {
            // Mismatched pair: resume just past the opening tag.
            rest = &rest[open.end()..];
        }
    }

    tags
}
