/// Filename stem used until (or instead of) a generated title.
pub const DEFAULT_TITLE: &str = "story";

/// Turn a model-suggested title into a safe filename stem.
///
/// Lowercases, turns whitespace runs into single hyphens and drops anything
/// outside `[a-z0-9-]`. Returns `None` when nothing usable is left.
pub fn sanitize_title(raw: &str) -> Option<String> {
    let lowered = raw.trim().to_lowercase();
    let mut stem = String::with_capacity(lowered.len());
    let mut in_space = false;

    for ch in lowered.chars() {
        if ch.is_whitespace() {
            if !in_space {
                stem.push('-');
            }
            in_space = true;
            continue;
        }
        in_space = false;
        if ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' {
            stem.push(ch);
        }
    }

    let stem = stem.trim_matches('-');
    if stem.is_empty() {
        None
    } else {
        Some(stem.to_string())
    }
}
