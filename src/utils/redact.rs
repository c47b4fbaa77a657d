// Scrubbing for anything that may echo a credential back at us
// (server replies, subprocess stderr, SDK error chains).

const MASK: &str = "***";

/// Replaces every occurrence of each non-empty secret in `text`.
pub fn redact(text: &str, secrets: &[&str]) -> String {
    let mut out = text.to_string();
    for secret in secrets.iter().filter(|s| !s.is_empty()) {
        out = out.replace(secret, MASK);
    }
    out
}

pub fn mask(secret: &str) -> &'static str {
    if secret.is_empty() { "" } else { MASK }
}
