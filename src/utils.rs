use std::io::{self, ErrorKind, Read, Write};

/// Copies everything `reader` yields into `writer`, `chunk_size` bytes at a time.
///
/// Only `Ok(0)` ends the copy: that is the reader's end-of-stream, which for a
/// socket means the peer has shut down its write half. Interrupted reads are
/// retried. Returns the number of bytes copied.
pub fn copy_in_chunks<R, W>(reader: &mut R, writer: &mut W, chunk_size: usize) -> io::Result<u64>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buffer = vec![0; chunk_size.max(1)];
    let mut copied = 0u64;
    loop {
        let bytes_read = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        writer.write_all(&buffer[..bytes_read])?;
        copied += bytes_read as u64;
    }
    Ok(copied)
}

/// Drops any `?query` or `#fragment` suffix from a request target.
pub fn strip_query(target: &str) -> &str {
    target.split(['?', '#']).next().unwrap_or(target)
}

// Percent-encodes a single path segment for use in an href.
pub fn percent_encode_segment(segment: &str) -> String {
    urlencoding::encode(segment).into_owned()
}

/// Simple HTML entity escaping
pub fn html_escape(input: &str) -> String {
    input
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
        .replace('\'', "&#x27;")
}
