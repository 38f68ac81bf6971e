use crate::error::AppError;
use crate::response::HttpResponse;
use crate::upload::is_staging_name;
use crate::utils::{html_escape, percent_encode_segment, strip_query};
use humansize::{format_size, BINARY};
use log::{debug, info, warn};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

/// Resolves a GET target against the canonical server `root`.
///
/// The target is percent-decoded and walked segment by segment. A `..` that
/// would climb above the root rejects the whole target, and so does a
/// canonical path (after following symlinks) that is not inside the root.
/// Temporary files of uploads in progress are never resolved. Returns `None`
/// for anything that does not name an existing entity under the root.
pub fn resolve_target(root: &Path, target: &str) -> Option<PathBuf> {
    let path = strip_query(target);
    let decoded = match urlencoding::decode(path) {
        Ok(decoded) => decoded,
        Err(_) => {
            warn!("Request target is not valid UTF-8 after decoding: '{path}'");
            return None;
        }
    };

    let mut resolved = root.to_path_buf();
    let mut depth = 0usize;
    for segment in decoded.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                if depth == 0 {
                    warn!("Potential path traversal attempt: '{target}'");
                    return None;
                }
                resolved.pop();
                depth -= 1;
            }
            s if s.contains(['\\', '\0']) => {
                warn!("Rejecting suspicious path segment in '{target}'");
                return None;
            }
            s if is_staging_name(s) => {
                debug!("Refusing to serve in-progress upload '{target}'");
                return None;
            }
            s => {
                resolved.push(s);
                depth += 1;
            }
        }
    }

    let canonical = resolved.canonicalize().ok()?;
    if !canonical.starts_with(root) {
        warn!(
            "Path escapes served root: '{}' (root: '{}')",
            canonical.display(),
            root.display()
        );
        return None;
    }
    Some(canonical)
}

/// One child of a listed directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryEntry {
    pub display_name: String,
    pub href: String,
    pub is_dir: bool,
    pub size: u64,
}

/// Joins a listing's parent path and a child name with exactly one separator.
///
/// `/` + `a` gives `/a`, `/docs` + `a` gives `/docs/a`. Repeated leading
/// slashes are collapsed so an href never turns into a `//host` reference.
pub fn child_href(parent: &str, child: &str) -> String {
    let collapsed;
    let parent = if parent.starts_with("//") {
        collapsed = format!("/{}", parent.trim_start_matches('/'));
        collapsed.as_str()
    } else {
        parent
    };
    if parent.ends_with('/') {
        format!("{parent}{child}")
    } else {
        format!("{parent}/{child}")
    }
}

/// Reads the immediate children of `dir`, directories first, then by name.
pub fn read_entries(dir: &Path, request_path: &str) -> Result<Vec<DirectoryEntry>, AppError> {
    let parent = strip_query(request_path);
    let mut entries = Vec::new();

    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name().to_string_lossy().into_owned();
        if is_staging_name(&name) {
            continue;
        }
        // Follows symlinks; a dangling link is still listed as a file.
        let metadata = fs::metadata(entry.path()).or_else(|_| entry.metadata())?;

        entries.push(DirectoryEntry {
            href: child_href(parent, &percent_encode_segment(&name)),
            display_name: name,
            is_dir: metadata.is_dir(),
            size: metadata.len(),
        });
    }

    entries.sort_by(|a, b| {
        b.is_dir
            .cmp(&a.is_dir)
            .then_with(|| a.display_name.to_lowercase().cmp(&b.display_name.to_lowercase()))
    });

    Ok(entries)
}

/// Renders the listing page. Subdirectories get a bold-italic label.
pub fn render_listing(request_path: &str, entries: &[DirectoryEntry]) -> String {
    let title = html_escape(strip_query(request_path));
    let mut html = format!(
        "<html><head><meta charset=\"utf-8\"><title>Index of {title}</title></head>\n\
         <body><h1>Directory Listing</h1>\n<ul>\n"
    );

    for entry in entries {
        let name = html_escape(&entry.display_name);
        let href = html_escape(&entry.href);
        if entry.is_dir {
            html.push_str(&format!(
                "<li><a href=\"{href}\"><b><i>{name}</i></b></a></li>\n"
            ));
        } else {
            html.push_str(&format!(
                "<li><a href=\"{href}\">{name}</a> <small>({})</small></li>\n",
                format_size(entry.size, BINARY)
            ));
        }
    }

    html.push_str("</ul></body></html>\n");
    html
}

/// Serves a directory listing as an HTML page.
///
/// The directory is read before anything is written, so a failure to read it
/// surfaces as [`AppError::NotFound`] and the caller can still answer 404.
pub fn serve_directory<W: Write + ?Sized>(
    out: &mut W,
    path: &Path,
    request_path: &str,
    log_prefix: &str,
) -> Result<(), AppError> {
    info!("{} serve_directory started for: '{}'", log_prefix, path.display());

    let entries = read_entries(path, request_path).map_err(|e| {
        warn!("{} Unable to read directory '{}': {e}", log_prefix, path.display());
        AppError::NotFound
    })?;
    debug!("{} Listing {} entries", log_prefix, entries.len());

    let html = render_listing(request_path, &entries);
    HttpResponse::ok().with_html().send(out, html.as_bytes(), log_prefix)?;

    info!("{} serve_directory finished for: '{}'", log_prefix, path.display());
    Ok(())
}
