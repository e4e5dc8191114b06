//! Local file names for fetched resources.

/// Used when neither the job nor the URL yields a usable name.
const FALLBACK_NAME: &str = "download.bin";

/// Longest name most Linux filesystems accept (NAME_MAX).
const NAME_MAX: usize = 255;

/// Pick the output file name: an explicit `requested` name wins, otherwise the
/// last path segment of `target`. Either way the result is safe to join onto a
/// directory.
pub fn output_name(target: &str, requested: Option<&str>) -> String {
    let candidate = requested
        .map(str::to_string)
        .or_else(|| last_segment(target))
        .map(|raw| sanitize(&raw))
        .unwrap_or_default();
    match candidate.as_str() {
        "" | "." | ".." => FALLBACK_NAME.to_string(),
        _ => candidate,
    }
}

fn last_segment(target: &str) -> Option<String> {
    let parsed = url::Url::parse(target).ok()?;
    let segment = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    Some(segment.to_string())
}

/// Replace separators and control characters with `_` (runs collapsed), trim
/// leading/trailing dots, blanks and underscores, and cap the byte length.
fn sanitize(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        let bad = matches!(c, '/' | '\\' | '\0' | ' ' | '\t') || c.is_control();
        if bad {
            if !out.ends_with('_') {
                out.push('_');
            }
        } else {
            out.push(c);
        }
    }
    let trimmed = out.trim_matches(|c| matches!(c, '.' | '_' | ' '));
    let mut end = trimmed.len().min(NAME_MAX);
    while !trimmed.is_char_boundary(end) {
        end -= 1;
    }
    trimmed[..end].to_string()
}
