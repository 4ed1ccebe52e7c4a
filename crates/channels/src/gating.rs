//! Sender allow-list shared by every channel.

use serde::{Deserialize, Serialize};

/// Set of sender identifiers authorized to talk to a channel.
///
/// An empty list means everyone is allowed (open policy), not no one.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AllowList(Vec<String>);

impl AllowList {
    pub fn new(entries: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self(
            entries
                .into_iter()
                .map(Into::into)
                .map(|e: String| e.trim().to_string())
                .filter(|e| !e.is_empty())
                .collect(),
        )
    }

    /// True when no restriction is configured.
    pub fn is_open(&self) -> bool {
        self.0.is_empty()
    }

    pub fn entries(&self) -> &[String] {
        &self.0
    }

    pub fn permits(&self, sender_id: &str) -> bool {
        is_allowed(sender_id, &self.0)
    }
}

/// Check if a sender is allowed to interact with the bot.
///
/// An empty allowlist means everyone is allowed (open policy).
/// Entries are matched case-insensitively against the sender ID and support
/// glob-style `*` wildcards. Compound IDs such as `uuid|+15550001` match when
/// any non-empty part is listed.
pub fn is_allowed(sender_id: &str, allowlist: &[String]) -> bool {
    if allowlist.is_empty() {
        return true;
    }
    if matches_any(sender_id, allowlist) {
        return true;
    }
    sender_id.contains('|')
        && sender_id
            .split('|')
            .filter(|part| !part.is_empty())
            .any(|part| matches_any(part, allowlist))
}

fn matches_any(candidate: &str, allowlist: &[String]) -> bool {
    let candidate = candidate.to_lowercase();
    allowlist.iter().any(|pattern| {
        let pat = pattern.to_lowercase();
        if pat.contains('*') {
            glob_match(&pat, &candidate)
        } else {
            pat == candidate
        }
    })
}

/// Glob matching with `*` standing for any sequence of chars, including none.
///
/// On a mismatch the most recent `*` absorbs one more byte and matching
/// resumes, so a segment that also occurs earlier in `text` still anchors at
/// the end.
fn glob_match(pattern: &str, text: &str) -> bool {
    let (pat, txt) = (pattern.as_bytes(), text.as_bytes());
    let (mut p, mut t) = (0, 0);
    // Position of the last `*` seen and the text index it was tried at.
    let mut star: Option<(usize, usize)> = None;

    while t < txt.len() {
        if p < pat.len() && pat[p] == b'*' {
            star = Some((p, t));
            p += 1;
        } else if p < pat.len() && pat[p] == txt[t] {
            p += 1;
            t += 1;
        } else if let Some((star_p, star_t)) = star {
            p = star_p + 1;
            t = star_t + 1;
            star = Some((star_p, t));
        } else {
            return false;
        }
    }
    pat[p..].iter().all(|&b| b == b'*')
}
