//! Deterministic cleanup of raw rewrite-service responses.
//!
//! Even a well-prompted model occasionally wraps its whole reply in a code
//! fence despite being told not to, and the change log arrives under any of
//! several header spellings. These rules are cheap string/regex passes kept
//! out of the prompt so the prompt stays focused on *what to fix*, not on
//! response formatting edge-cases. Each rule is independently testable.

use once_cell::sync::Lazy;
use regex::Regex;

// ── Rule 1: strip one enclosing code fence ───────────────────────────────

static RE_OUTER_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:markdown|md)?\s*\n(.*?)```\s*$").unwrap());

/// Remove one enclosing ```markdown fence if the entire response was
/// wrapped. Inner fences are untouched.
pub fn strip_outer_fence(input: &str) -> String {
    match RE_OUTER_FENCE.captures(input.trim()) {
        Some(caps) => caps[1].trim().to_string(),
        None => input.trim().to_string(),
    }
}

// ── Rule 2: split corrected body from change log ─────────────────────────

/// Recognized change-log section headers, first match wins. Matching is
/// case-insensitive. Order matters: the plain `## Change Log` spellings are
/// checked before the `---`-separated form.
static CHANGE_LOG_HEADERS: Lazy<[Regex; 4]> = Lazy::new(|| {
    [
        Regex::new(r"(?i)\n## Change Log\s*\n").unwrap(),
        Regex::new(r"(?i)\n## Changelog\s*\n").unwrap(),
        Regex::new(r"(?i)\n## Changes\s*\n").unwrap(),
        Regex::new(r"(?i)\n---\s*\n# Change Log\s*\n?").unwrap(),
    ]
});

static RE_TRAILING_FENCE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n?```\s*$").unwrap());

/// Split a response into `(corrected_body, change_log)`.
///
/// Absence of any recognized header means the whole response is the
/// corrected body and the change log is empty.
pub fn split_change_log(response: &str) -> (String, String) {
    for re in CHANGE_LOG_HEADERS.iter() {
        if let Some(m) = re.find(response) {
            let body = response[..m.start()].trim_end().to_string();
            let mut log = response[m.end()..].trim().to_string();
            // A fence that opened around the whole response may close after
            // the change log; drop the stray closer.
            log = RE_TRAILING_FENCE.replace(&log, "").trim().to_string();
            return (body, log);
        }
    }
    (response.to_string(), String::new())
}

// ── Tests ────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fence() {
        let input = "```markdown\n# Title\nBody\n```";
        assert_eq!(strip_outer_fence(input), "# Title\nBody");
    }

    #[test]
    fn strips_bare_fence() {
        let input = "```\ncontent\n```";
        assert_eq!(strip_outer_fence(input), "content");
    }

    #[test]
    fn unfenced_passthrough() {
        assert_eq!(strip_outer_fence("plain text"), "plain text");
    }

    #[test]
    fn inner_fences_survive() {
        let input = "before\n```yaml\na: 1\n```\nafter";
        assert_eq!(strip_outer_fence(input), input);
    }

    #[test]
    fn splits_on_change_log_header() {
        let input = "corrected body\n\n## Change Log\n- fixed a typo\n";
        let (body, log) = split_change_log(input);
        assert_eq!(body, "corrected body");
        assert_eq!(log, "- fixed a typo");
    }

    #[test]
    fn header_match_is_case_insensitive() {
        let input = "body\n## CHANGELOG\n- item";
        let (body, log) = split_change_log(input);
        assert_eq!(body, "body");
        assert_eq!(log, "- item");
    }

    #[test]
    fn accepts_separator_form() {
        let input = "body\n---\n# Change Log\n- merged E002 into E001";
        let (body, log) = split_change_log(input);
        assert_eq!(body, "body");
        assert!(log.contains("merged E002"));
    }

    #[test]
    fn no_header_means_empty_log() {
        let (body, log) = split_change_log("just the body");
        assert_eq!(body, "just the body");
        assert!(log.is_empty());
    }

    #[test]
    fn stray_trailing_fence_dropped_from_log() {
        let input = "body\n## Changes\n- item\n```";
        let (_, log) = split_change_log(input);
        assert_eq!(log, "- item");
    }
}
