use crate::error::AppError;
use crate::fs::{resolve_target, serve_directory};
use crate::responder::serve_file;
use crate::response::send_not_found;
use crate::server::ServerConfig;
use crate::upload::{receive_upload, UploadTarget};
use log::{debug, error, warn};
use std::io::{prelude::*, BufReader, BufWriter};
use std::net::{Shutdown, TcpStream};
use std::time::Duration;

/// Longest request line accepted, terminator included.
pub const MAX_REQUEST_LINE: usize = 8 * 1024;

const LINGER_TIMEOUT: Duration = Duration::from_secs(1);
const LINGER_DRAIN_LIMIT: u64 = 64 * 1024;

/// A well-formed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// `GET <target> <version>`
    Get { target: String, version: String },
    /// `UPLOAD <fileName>`
    Upload { file_name: String },
}

/// Splits a request line on whitespace and checks the token count for its
/// method. Anything else, unknown methods included, is a bad request.
pub fn parse_request_line(line: &str) -> Result<Request, AppError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        ["GET", target, version] => Ok(Request::Get {
            target: (*target).to_string(),
            version: (*version).to_string(),
        }),
        ["UPLOAD", file_name] => Ok(Request::Upload {
            file_name: (*file_name).to_string(),
        }),
        _ => Err(AppError::BadRequest),
    }
}

/// Reads the first line of a connection without its line terminator.
///
/// `Ok(None)` means the peer closed before sending anything. Nothing past the
/// first `\n` is consumed from `reader`, so an upload body that arrived in the
/// same packet stays buffered for the receiver.
pub fn read_request_line<R: BufRead + ?Sized>(reader: &mut R) -> Result<Option<String>, AppError> {
    let mut line = Vec::new();
    let limit = (MAX_REQUEST_LINE + 1) as u64;
    let read = (&mut *reader).take(limit).read_until(b'\n', &mut line)?;
    if read == 0 {
        return Ok(None);
    }
    if line.len() > MAX_REQUEST_LINE {
        return Err(AppError::BadRequest);
    }
    while matches!(line.last(), Some(b'\n' | b'\r')) {
        line.pop();
    }
    Ok(Some(String::from_utf8_lossy(&line).into_owned()))
}

/// Handles a single client connection.
///
/// The connection is shut down when this returns, whatever the outcome.
pub fn handle_client(
    stream: TcpStream,
    config: &ServerConfig,
    log_prefix: &str,
) -> Result<(), AppError> {
    if let Some(timeout) = config.read_timeout {
        stream.set_read_timeout(Some(timeout))?;
    }

    let mut reader = BufReader::new(&stream);
    let mut writer = BufWriter::new(&stream);
    let result = dispatch(&mut reader, &mut writer, config, log_prefix);

    if let Err(e) = writer.flush() {
        debug!("{log_prefix} Failed to flush connection: {e}");
    }
    drop(writer);
    linger_close(&stream, reader, log_prefix);
    result
}

/// Shuts down the write half, then discards whatever the peer still sends
/// (trailing request headers, usually) so closing the socket does not reset
/// the connection under a response the peer has not read yet.
fn linger_close<R: Read>(stream: &TcpStream, reader: R, log_prefix: &str) {
    if let Err(e) = stream.shutdown(Shutdown::Write) {
        debug!("{log_prefix} Failed to shut down connection: {e}");
        return;
    }
    if stream.set_read_timeout(Some(LINGER_TIMEOUT)).is_ok() {
        let _ = std::io::copy(&mut reader.take(LINGER_DRAIN_LIMIT), &mut std::io::sink());
    }
}

/// Reads one request line from `reader` and writes at most one response to
/// `writer`.
pub fn dispatch<R, W>(
    reader: &mut R,
    writer: &mut W,
    config: &ServerConfig,
    log_prefix: &str,
) -> Result<(), AppError>
where
    R: BufRead + ?Sized,
    W: Write + ?Sized,
{
    let line = match read_request_line(reader) {
        Ok(Some(line)) => line,
        Ok(None) => {
            debug!("{log_prefix} Connection closed before a request line arrived");
            return send_not_found(writer, log_prefix);
        }
        Err(AppError::BadRequest) => {
            warn!("{log_prefix} Request line exceeds {MAX_REQUEST_LINE} bytes");
            return send_not_found(writer, log_prefix);
        }
        Err(e) => return Err(e),
    };
    debug!("{log_prefix} Request line: {line}");

    match parse_request_line(&line) {
        Ok(Request::Get { target, .. }) => serve_get(writer, config, &target, log_prefix),
        Ok(Request::Upload { file_name }) => {
            let target = UploadTarget::new(&file_name, &config.upload_dir).map_err(|e| {
                warn!("{log_prefix} Rejected upload: {e}");
                e
            })?;
            receive_upload(
                reader,
                &target,
                config.chunk_size,
                config.collision_policy,
                log_prefix,
            )
            .map_err(|e| {
                error!("{log_prefix} Upload of '{file_name}' failed: {e}");
                e
            })?;
            Ok(())
        }
        Err(_) => {
            warn!("{log_prefix} Malformed request line: '{line}'");
            send_not_found(writer, log_prefix)
        }
    }
}

fn serve_get<W: Write + ?Sized>(
    writer: &mut W,
    config: &ServerConfig,
    target: &str,
    log_prefix: &str,
) -> Result<(), AppError> {
    let Some(path) = resolve_target(&config.root, target) else {
        warn!("{log_prefix} No resource for target '{target}'");
        return send_not_found(writer, log_prefix);
    };

    let result = if path.is_dir() {
        serve_directory(writer, &path, target, log_prefix)
    } else {
        serve_file(writer, &path, config.chunk_size, log_prefix)
    };

    match result {
        Err(AppError::NotFound) => send_not_found(writer, log_prefix),
        other => other,
    }
}
