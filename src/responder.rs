use crate::error::AppError;
use crate::mime::{classify, MimeVerdict};
use crate::response::HttpResponse;
use crate::utils::{copy_in_chunks, html_escape};
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::Utc;
use log::{debug, error, info, warn};
use mime_guess::Mime;
use std::fs::File;
use std::io::{prelude::*, BufReader, ErrorKind};
use std::path::Path;

/// Serves a regular file, picking the body encoding from its content type.
///
/// The file is opened before anything is written; if that fails the result is
/// [`AppError::NotFound`] and the connection is still clean for a 404.
pub fn serve_file<W: Write + ?Sized>(
    out: &mut W,
    path: &Path,
    chunk_size: usize,
    log_prefix: &str,
) -> Result<(), AppError> {
    info!("{} serve_file started for: '{}'", log_prefix, path.display());
    let file = File::open(path).map_err(|e| {
        warn!("{} Unable to open '{}': {e}", log_prefix, path.display());
        AppError::NotFound
    })?;

    let classification = classify(path);
    debug!(
        "{} Classified '{}' as {:?} ({})",
        log_prefix,
        path.display(),
        classification.verdict,
        classification.mime
    );

    let result = match classification.verdict {
        MimeVerdict::Text => send_text(out, file),
        MimeVerdict::Image => send_image(out, file, &classification.mime),
        MimeVerdict::Binary => send_attachment(out, file, path, &classification.mime, chunk_size),
    };

    match result {
        Ok(()) => {
            info!("{} serve_file finished for: '{}'", log_prefix, path.display());
            Ok(())
        }
        Err(e) => {
            error!("{} Aborted response for '{}': {e}", log_prefix, path.display());
            Err(e)
        }
    }
}

/// Renders a text file line by line inside a preformatted block.
fn send_text<W: Write + ?Sized>(out: &mut W, file: File) -> Result<(), AppError> {
    HttpResponse::ok().with_html().write_head(out)?;
    out.write_all(b"<html><body><h1>File Content</h1>\n<pre><b>\n")?;

    let mut reader = BufReader::new(file);
    let mut line = Vec::new();
    loop {
        line.clear();
        if reader.read_until(b'\n', &mut line)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&line);
        writeln!(out, "{}", html_escape(text.trim_end_matches(['\r', '\n'])))?;
    }

    out.write_all(b"</b></pre>\n</body></html>\n")?;
    out.flush()?;
    Ok(())
}

/// Inlines an image as a base64 data URI. The whole file is held in memory.
fn send_image<W: Write + ?Sized>(out: &mut W, mut file: File, mime: &Mime) -> Result<(), AppError> {
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)?;
    let encoded = STANDARD.encode(&bytes);

    HttpResponse::ok().with_html().write_head(out)?;
    write!(
        out,
        "<html><body><h1>File Content</h1>\n<img src=\"data:{mime};base64,{encoded}\" alt=\"Image\" />\n</body></html>\n"
    )?;
    out.flush()?;
    Ok(())
}

/// Streams the file as an attachment in `chunk_size` chunks.
///
/// Exactly `Content-Length` bytes are sent. A file that shrinks while being
/// streamed aborts the response with `UnexpectedEof`.
fn send_attachment<W: Write + ?Sized>(
    out: &mut W,
    file: File,
    path: &Path,
    mime: &Mime,
    chunk_size: usize,
) -> Result<(), AppError> {
    let size = file.metadata()?.len();
    let filename = path
        .file_name()
        .map(|name| disposition_filename(&name.to_string_lossy()))
        .unwrap_or_default();

    HttpResponse::ok()
        .add_header("Date", Utc::now().format("%a, %d %b %Y %H:%M:%S GMT"))
        .add_header("Content-Type", mime)
        .add_header("Content-Length", size)
        .add_header(
            "Content-Disposition",
            format!("attachment; filename=\"{filename}\""),
        )
        .write_head(out)?;

    let sent = copy_in_chunks(&mut file.take(size), out, chunk_size)?;
    out.flush()?;

    if sent != size {
        return Err(AppError::Io(std::io::Error::new(
            ErrorKind::UnexpectedEof,
            format!("sent {sent} of {size} bytes"),
        )));
    }
    Ok(())
}

/// Quotes a file name for `Content-Disposition`. Control characters are
/// dropped so a name can never break out of its header line.
pub fn disposition_filename(name: &str) -> String {
    let mut quoted = String::with_capacity(name.len());
    for c in name.chars().filter(|c| !c.is_control()) {
        if c == '"' || c == '\\' {
            quoted.push('\\');
        }
        quoted.push(c);
    }
    quoted
}
