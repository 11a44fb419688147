//! Output-directory hygiene: filename scrubbing and stale partial cleanup.

use std::io;
use std::path::Path;

/// Characters not allowed in output base filenames on any supported platform.
const FORBIDDEN: &[char] = &['\\', '/', ':', '*', '?', '"', '<', '>', '|'];

/// Replace runs of forbidden filename characters with a single underscore.
pub fn sanitize_filename(base: &str) -> String {
    let mut out = String::with_capacity(base.len());
    let mut in_run = false;
    for ch in base.chars() {
        if FORBIDDEN.contains(&ch) {
            if !in_run {
                out.push('_');
                in_run = true;
            }
        } else {
            out.push(ch);
            in_run = false;
        }
    }
    out
}

/// Delete `*.part` files in `dir` whose name carries `[<media_id>]`.
///
/// A partial left behind by an interrupted attempt can no longer match the
/// server's byte ranges once the remote stream rotates; resuming against it
/// yields range-not-satisfiable errors, so the retry path removes it first.
/// Returns the number of files removed.
pub fn purge_stale_partials(dir: &Path, media_id: &str) -> io::Result<usize> {
    if media_id.is_empty() {
        return Ok(0);
    }
    let tag = format!("[{media_id}]");
    let mut removed = 0;
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else { continue };
        if name.contains(&tag) && name.ends_with(".part") {
            if std::fs::remove_file(entry.path()).is_ok() {
                removed += 1;
            }
        }
    }
    Ok(removed)
}
