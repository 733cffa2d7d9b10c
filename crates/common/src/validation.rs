/// Replace every character outside `[A-Za-z0-9]` with `_`.
///
/// Used for attachment names derived from camera names and media group
/// names, which may contain arbitrary user-supplied text.
pub fn sanitize_filename(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect()
}

/// Build a download attachment name from a camera name and a media file
/// base name, keeping the original extension intact.
pub fn pretty_attachment_name(camera_name: &str, filename: &str) -> String {
    let base = filename.rsplit('/').next().unwrap_or(filename);
    format!("{}_{}", camera_name, base)
}
