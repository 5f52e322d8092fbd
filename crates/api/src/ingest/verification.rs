//! Verification code extraction
//!
//! Pulls the one-time code out of an SMS body so the dashboard can show it
//! without the operator reading the whole message. Patterns are tried in
//! order; explicit "code" phrasings win over bare digit runs.

use std::sync::OnceLock;

use regex::Regex;

const PATTERNS: &[&str] = &[
    r"验证码是[:：]\s*([0-9]{4,6})",
    r"验证码为[:：]\s*([0-9]{4,6})",
    r"验证码[:：]\s*([0-9]{4,6})",
    r"校验码[:：]?\s*([0-9]{4,6})",
    r"动态码[:：]?\s*([0-9]{4,6})",
    r"(?i)code\s*is\s*[:：]?\s*([0-9]{4,6})",
    r"(?i)code[:：]\s*([0-9]{4,6})",
    // Bare 6-digit then 4-digit runs, bounded by non-ASCII-word characters
    r"(?:^|[^0-9A-Za-z_])([0-9]{6})(?:$|[^0-9A-Za-z_])",
    r"(?:^|[^0-9A-Za-z_])([0-9]{4})(?:$|[^0-9A-Za-z_])",
];

fn patterns() -> &'static [Regex] {
    static COMPILED: OnceLock<Vec<Regex>> = OnceLock::new();
    COMPILED.get_or_init(|| {
        PATTERNS
            .iter()
            .filter_map(|p| match Regex::new(p) {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::error!(pattern = %p, error = %e, "Invalid verification code pattern");
                    None
                }
            })
            .collect()
    })
}

/// First verification code found in `content`, if any
pub fn extract_verification_code(content: &str) -> Option<String> {
    patterns().iter().find_map(|re| {
        re.captures(content)
            .and_then(|caps| caps.get(1))
            .map(|m| m.as_str().to_string())
    })
}
