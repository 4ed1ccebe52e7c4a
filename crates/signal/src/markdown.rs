//! Markdown to Signal styled text.
//!
//! signal-cli's `styled` text mode understands `**bold**`, `*italic*`,
//! `~strikethrough~` and `` `monospace` ``. Everything else is flattened to
//! plain text. Code spans and fenced blocks are copied through untouched.

/// Convert markdown to Signal styled text.
///
/// Plain text passes through unchanged. Leading block markers are stripped
/// until none remain, so converting the output again does not peel off
/// another layer.
pub fn markdown_to_signal(md: &str) -> String {
    let mut out = String::with_capacity(md.len());
    for fragment in split_fences(md) {
        match fragment {
            Fragment::Text(text) => render_block_text(text, &mut out),
            Fragment::Fence(code) => {
                out.push_str("```\n");
                out.push_str(code);
                if !code.is_empty() && !code.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str("```");
            },
        }
    }
    out
}

// ── Fenced code blocks ──────────────────────────────────────────────────────

enum Fragment<'a> {
    Text(&'a str),
    Fence(&'a str),
}

/// Split on closed ```` ``` ```` fences. An unclosed fence stays text.
fn split_fences(md: &str) -> Vec<Fragment<'_>> {
    let mut fragments = Vec::new();
    let mut rest = md;
    while let Some(open) = rest.find("```") {
        let after_open = &rest[open + 3..];
        // Optional info string (language tag) and the newline after it.
        let tag_len = after_open
            .find(|c: char| !(c.is_alphanumeric() || c == '_'))
            .unwrap_or(after_open.len());
        let mut body = &after_open[tag_len..];
        if let Some(stripped) = body.strip_prefix('\n') {
            body = stripped;
        }
        let Some(close) = body.find("```") else {
            break;
        };
        if open > 0 {
            fragments.push(Fragment::Text(&rest[..open]));
        }
        fragments.push(Fragment::Fence(&body[..close]));
        rest = &body[close + 3..];
    }
    if !rest.is_empty() {
        fragments.push(Fragment::Text(rest));
    }
    fragments
}

// ── Line-level rules ────────────────────────────────────────────────────────

fn render_block_text(text: &str, out: &mut String) {
    for (i, line) in text.split('\n').enumerate() {
        if i > 0 {
            out.push('\n');
        }
        let line = strip_block_markers(line);
        let line = match bullet_item(line) {
            Some(item) => {
                out.push_str("• ");
                item
            },
            None => line,
        };
        render_inline(line, out);
    }
}

/// `> > ## Title` → `Title`.
fn strip_block_markers(mut line: &str) -> &str {
    loop {
        let next = strip_blockquote(strip_header(line));
        if next.len() == line.len() {
            return line;
        }
        line = next;
    }
}

/// `## Title` → `Title`.
fn strip_header(line: &str) -> &str {
    let hashes = line.chars().take_while(|c| *c == '#').count();
    if !(1..=6).contains(&hashes) {
        return line;
    }
    let rest = &line[hashes..];
    let body = rest.trim_start();
    if body.len() < rest.len() && !body.is_empty() {
        body
    } else {
        line
    }
}

/// `> quote` → `quote`.
fn strip_blockquote(line: &str) -> &str {
    match line.strip_prefix('>') {
        Some(rest) => rest.trim_start(),
        None => line,
    }
}

/// `- item` / `* item` → `item`.
fn bullet_item(line: &str) -> Option<&str> {
    let rest = line.strip_prefix('-').or_else(|| line.strip_prefix('*'))?;
    let item = rest.trim_start();
    (item.len() < rest.len()).then_some(item)
}

// ── Inline rules ────────────────────────────────────────────────────────────

fn render_inline(line: &str, out: &mut String) {
    let chars: Vec<char> = line.chars().collect();
    let mut i = 0;
    while i < chars.len() {
        let c = chars[i];
        let prev = i.checked_sub(1).map(|p| chars[p]);

        match c {
            '`' => {
                if let Some(end) = find_char(&chars, i + 1, '`').filter(|e| *e > i + 1) {
                    out.extend(&chars[i..=end]);
                    i = end + 1;
                    continue;
                }
            },
            '[' => {
                if let Some((label, url, next)) = parse_link(&chars, i) {
                    render_inline(&label, out);
                    out.push_str(" (");
                    out.push_str(&url);
                    out.push(')');
                    i = next;
                    continue;
                }
            },
            '*' | '_' | '~' if chars.get(i + 1) == Some(&c) => {
                if let Some(end) = find_pair(&chars, i + 2, c).filter(|e| *e > i + 2) {
                    let inner: String = chars[i + 2..end].iter().collect();
                    let marker = if c == '~' {
                        "~"
                    } else {
                        "**"
                    };
                    out.push_str(marker);
                    render_inline(&inner, out);
                    out.push_str(marker);
                    i = end + 2;
                    continue;
                }
            },
            '*' | '_' if !prev.is_some_and(|p| p.is_alphanumeric() || p == '*') => {
                if let Some(end) = find_italic_end(&chars, i + 1, c) {
                    let inner: String = chars[i + 1..end].iter().collect();
                    out.push('*');
                    render_inline(&inner, out);
                    out.push('*');
                    i = end + 1;
                    continue;
                }
            },
            _ => {},
        }
        out.push(c);
        i += 1;
    }
}

fn find_char(chars: &[char], from: usize, needle: char) -> Option<usize> {
    (from..chars.len()).find(|&j| chars[j] == needle)
}

/// Index of the next doubled `marker` at or after `from`.
fn find_pair(chars: &[char], from: usize, marker: char) -> Option<usize> {
    (from..chars.len().saturating_sub(1)).find(|&j| chars[j] == marker && chars[j + 1] == marker)
}

/// Closing marker of a single-character emphasis span: no marker inside and
/// not followed by a word character.
fn find_italic_end(chars: &[char], from: usize, marker: char) -> Option<usize> {
    let end = find_char(chars, from, marker)?;
    if end == from {
        return None;
    }
    if chars[from..end].contains(&'*') {
        return None;
    }
    let next = chars.get(end + 1);
    if next.is_some_and(|n| n.is_alphanumeric() || *n == '*') {
        return None;
    }
    Some(end)
}

/// `[label](url)` starting at `start`; returns label, url and the index after `)`.
fn parse_link(chars: &[char], start: usize) -> Option<(String, String, usize)> {
    let close_label = find_char(chars, start + 1, ']')?;
    if close_label == start + 1 || chars.get(close_label + 1) != Some(&'(') {
        return None;
    }
    let close_url = find_char(chars, close_label + 2, ')')?;
    if close_url == close_label + 2 {
        return None;
    }
    let label = chars[start + 1..close_label].iter().collect();
    let url = chars[close_label + 2..close_url].iter().collect();
    Some((label, url, close_url + 1))
}
