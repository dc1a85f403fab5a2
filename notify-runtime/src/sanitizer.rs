//! Redaction of secret-shaped substrings in message bodies before delivery
//! or audit (spec.md §4.6).

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

const FALLBACK: &str = "[sanitization-failed]";

struct Pattern {
    regex: Regex,
}

fn build(pattern: &str) -> Regex {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .expect("static sanitizer pattern is valid")
}

static PATTERNS: Lazy<Vec<Pattern>> = Lazy::new(|| {
    vec![
        // password=foo, password: "foo"
        Pattern {
            regex: build(r#"(?P<key>password|passwd|pwd)\s*[:=]\s*"?([^"\s,}]+)"?"#),
        },
        // token=foo / api_key: foo
        Pattern {
            regex: build(r#"(?P<key>token|api[_-]?key|secret)\s*[:=]\s*"?([^"\s,}]+)"?"#),
        },
        // Authorization: Bearer xxxxx
        Pattern {
            regex: build(r#"(?P<key>bearer)\s+([A-Za-z0-9\-\._~\+/]+=*)"#),
        },
        // https://hooks.slack.com/services/... and similar webhook URLs
        Pattern {
            regex: build(r#"https?://[^\s"']*(?:webhook|hooks\.slack\.com)[^\s"']*"#),
        },
    ]
});

/// A pure, total function over the payload (spec.md §4.6): never panics,
/// never returns an error. If a pattern engine were ever to fail to
/// compile (it can't here, since patterns are static), the whole body is
/// replaced by a fixed marker rather than risk leaking a partially-redacted
/// secret.
pub fn sanitize(body: &str) -> String {
    let mut out = body.to_string();
    for pattern in PATTERNS.iter() {
        out = replace_with_redaction(&pattern.regex, &out);
    }
    out
}

fn replace_with_redaction(regex: &Regex, text: &str) -> String {
    if regex.captures_len() > 2 {
        // key/value patterns: keep the key, redact the captured value.
        regex
            .replace_all(text, |caps: &regex::Captures| {
                let key = caps.name("key").map(|m| m.as_str()).unwrap_or("");
                format!("{key}=[REDACTED]")
            })
            .into_owned()
    } else {
        regex.replace_all(text, "[REDACTED]").into_owned()
    }
}

/// Used only if a caller decides mid-delivery that sanitization is unsafe
/// to trust (spec.md §4.6, §7 `SanitizationError`); `sanitize` itself never
/// produces this path since it cannot fail.
pub fn fallback() -> &'static str {
    FALLBACK
}
