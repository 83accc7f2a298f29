// SPDX-License-Identifier: MIT OR Apache-2.0
//! Section extraction and line-level key/value recognition shared by the
//! Markdown recognizers.

/// Return the body of the named section: everything after the heading line
/// up to (but not including) the next all-caps heading-like line, or the
/// end of `text`.
pub fn find_section<'a>(text: &'a str, heading: &str) -> Option<&'a str> {
    let upper_text = text.to_uppercase();
    let upper_heading = heading.to_uppercase();
    let start_idx = upper_text.find(&upper_heading)?;

    let after_heading = &text[start_idx..];
    let newline_pos = after_heading.find('\n').unwrap_or(after_heading.len());
    let body = &after_heading[newline_pos..];

    let mut end = body.len();
    for (i, line) in body.lines().enumerate() {
        if i == 0 {
            continue;
        }
        let trimmed = line.trim();
        if is_heading_line(trimmed) {
            end = body.find(line).unwrap_or(body.len());
            break;
        }
    }
    Some(&body[..end])
}

fn is_heading_line(line: &str) -> bool {
    line.len() > 3
        && line
            .chars()
            .all(|c| c.is_ascii_uppercase() || c == ' ' || c == ':')
        && line.chars().any(|c| c.is_ascii_uppercase())
}

/// `key: value` and `- key: value` lines. Bullet (`* **KEY:**`) lines are
/// deliberately skipped so this recognizer never shadows the bullet one.
pub fn parse_colon_lines(section: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in section.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('*') {
            continue;
        }
        let trimmed = trimmed.strip_prefix("- ").unwrap_or(trimmed);
        if let Some((key, value)) = trimmed.split_once(':') {
            pairs.push((normalize_key(key), value.trim().to_string()));
        }
    }
    pairs
}

/// `* **KEY:** value` lines.
pub fn parse_bullet_lines(section: &str) -> Vec<(String, String)> {
    let mut pairs = Vec::new();
    for line in section.lines() {
        let trimmed = line.trim();
        let Some(rest) = trimmed.strip_prefix('*') else {
            continue;
        };
        let rest = rest.trim_start();
        let Some(rest) = rest.strip_prefix("**") else {
            continue;
        };
        let Some((key, tail)) = rest.split_once("**") else {
            continue;
        };
        let value = tail.trim_start_matches(':').trim();
        pairs.push((normalize_key(key), value.to_string()));
    }
    pairs
}

fn normalize_key(key: &str) -> String {
    key.chars()
        .filter(|c| c.is_ascii_alphanumeric())
        .flat_map(|c| c.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn find_section_stops_at_next_heading() {
        let text = "VERIFICATION SUMMARY\nkey: value\n\nOTHER SECTION\nmore: stuff\n";
        let section = find_section(text, "VERIFICATION SUMMARY").unwrap();
        assert!(section.contains("key: value"));
        assert!(!section.contains("more: stuff"));
    }

    #[test]
    fn colon_lines_skip_bullet_lines() {
        let pairs = parse_colon_lines("* **Discrepant Positions:** 3\nTotal: 10");
        assert_eq!(pairs, vec![("total".to_string(), "10".to_string())]);
    }

    #[test]
    fn bullet_lines_parse_bold_key() {
        let pairs = parse_bullet_lines("* **Discrepant Positions:** 3\nTotal: 10");
        assert_eq!(
            pairs,
            vec![("discrepantpositions".to_string(), "3".to_string())]
        );
    }
}
