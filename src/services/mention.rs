//! `@name` autocomplete for the story prompt editor.
//!
//! Cursor positions are byte offsets into the text and must fall on char
//! boundaries.

use crate::core::state::Character;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Mention {
    /// Offset of the `@`.
    pub start: usize,
    /// Text typed after the `@`, up to the cursor.
    pub query: String,
}

/// Finds an `@` token ending at `cursor`. The token starts after the nearest
/// space or newline before the cursor.
pub fn find_mention(text: &str, cursor: usize) -> Option<Mention> {
    let cursor = cursor.min(text.len());
    if !text.is_char_boundary(cursor) {
        return None;
    }
    let before = &text[..cursor];
    let start = before.rfind([' ', '\n']).map(|i| i + 1).unwrap_or(0);
    let query = before[start..].strip_prefix('@')?;
    Some(Mention {
        start,
        query: query.to_string(),
    })
}

/// Selected characters whose name contains the query, ignoring case.
pub fn suggest<'a>(mention: &Mention, selected: &'a [Character]) -> Vec<&'a Character> {
    let query = mention.query.to_lowercase();
    selected
        .iter()
        .filter(|c| c.name.to_lowercase().contains(&query))
        .collect()
}

/// Replaces the token with `name` and a trailing space. Returns the new text
/// and the cursor position right after the inserted space.
pub fn apply_mention(text: &str, mention: &Mention, cursor: usize, name: &str) -> (String, usize) {
    let start = mention.start.min(text.len());
    let cursor = cursor.clamp(start, text.len());
    let new_text = format!("{}{} {}", &text[..start], name, &text[cursor..]);
    (new_text, start + name.len() + 1)
}
