//! Markdown helpers: safe filenames and highlight sections.

/// Map a book title to a filesystem-safe file stem.
///
/// Characters outside `[A-Za-z0-9._- ]` become spaces, whitespace runs
/// collapse to one space, and the result is trimmed. An empty result becomes
/// `"untitled"`. Distinct titles may map to the same stem.
pub fn sanitize_filename(title: &str) -> String {
    let replaced: String = title
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-' | ' ') {
                c
            } else {
                ' '
            }
        })
        .collect();
    let collapsed = replaced.split_whitespace().collect::<Vec<_>>().join(" ");
    if collapsed.is_empty() {
        "untitled".to_string()
    } else {
        collapsed
    }
}

/// Expand `{title}`, `{author}` and `{location}` in a heading template.
/// Absent values render as `unknown`.
pub fn render_heading(
    template: &str,
    title: &str,
    author: Option<&str>,
    location: Option<&str>,
) -> String {
    template
        .replace("{title}", title)
        .replace("{author}", author.unwrap_or("unknown"))
        .replace("{location}", location.unwrap_or("unknown"))
        .trim()
        .to_string()
}

/// Render one highlight as a Markdown section:
///
/// ```text
/// ## Location 120-122
///
/// > highlighted text
///
/// **Note:** attached note
/// ```
pub fn render_highlight_section(
    heading: &str,
    text: &str,
    note: Option<&str>,
) -> String {
    let mut section = String::new();
    if !heading.is_empty() {
        section.push_str("## ");
        section.push_str(heading);
        section.push('\n');
    }
    if !text.is_empty() {
        if !section.is_empty() {
            section.push('\n');
        }
        section.push_str(&blockquote(text));
    }
    if let Some(note) = note {
        if !section.is_empty() {
            section.push('\n');
        }
        section.push_str("**Note:** ");
        section.push_str(note);
        section.push('\n');
    }
    section
}

fn blockquote(text: &str) -> String {
    text.lines()
        .map(|line| {
            if line.trim().is_empty() {
                ">\n".to_string()
            } else {
                format!("> {}\n", line)
            }
        })
        .collect()
}
