/// Cuts `note` down to at most `max_chars` characters after trimming surrounding
/// whitespace.
pub(crate) fn truncate_note(note: &str, max_chars: usize) -> &str {
    let note = note.trim();
    match note.char_indices().nth(max_chars) {
        Some((end, _)) => &note[..end],
        None => note,
    }
}

/// Notes are sticky: an empty incoming note keeps the previous one.
pub(crate) fn merge_note(previous: &str, incoming: &str) -> String {
    if incoming.is_empty() {
        previous.to_string()
    } else {
        incoming.to_string()
    }
}
