use crate::error::AppError;
use crate::mime::is_determinable;
use crate::upload::validate_file_name;
use crate::utils::copy_in_chunks;
use log::{debug, info, warn};
use std::fs::File;
use std::io::{prelude::*, BufWriter, ErrorKind};
use std::net::{Shutdown, TcpStream};
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use threadpool::ThreadPool;

pub const DEFAULT_CLIENT_CHUNK_SIZE: usize = 128;

type UploadResultSender = mpsc::Sender<(PathBuf, Result<u64, AppError>)>;

/// Parses one interactive command of the form `upload <fileName>`.
///
/// The verb is matched case-insensitively and the file name is resolved
/// against `base_dir`. Anything other than exactly two tokens is rejected.
pub fn parse_command(line: &str, base_dir: &Path) -> Result<PathBuf, AppError> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    match tokens.as_slice() {
        [verb, file_name] if verb.eq_ignore_ascii_case("upload") => {
            Ok(base_dir.join(file_name))
        }
        _ => Err(AppError::InvalidCommand(line.trim().to_string())),
    }
}

/// Sends files to a server with the `UPLOAD` verb, one connection per file.
#[derive(Debug, Clone)]
pub struct UploadClient {
    server: String,
    chunk_size: usize,
}

impl UploadClient {
    pub fn new(server: impl Into<String>) -> Self {
        Self {
            server: server.into(),
            chunk_size: DEFAULT_CLIENT_CHUNK_SIZE,
        }
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// Checks that `path` can be uploaded and returns the name it is sent as.
    pub fn check_uploadable(path: &Path) -> Result<String, AppError> {
        let name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .ok_or_else(|| AppError::InvalidFileName(path.display().to_string()))?;
        validate_file_name(&name)?;
        if !is_determinable(path) {
            return Err(AppError::UnknownContentType(name));
        }
        Ok(name)
    }

    /// Uploads one file and returns the number of content bytes sent.
    ///
    /// After sending, the write half is shut down to mark the end of the file
    /// and the call waits for the server to close the connection, which
    /// happens once the upload has been stored.
    pub fn upload_file(&self, path: &Path) -> Result<u64, AppError> {
        let name = Self::check_uploadable(path)?;
        let mut file = File::open(path)?;

        let stream = TcpStream::connect(&self.server)?;
        debug!("Connected to {} for '{}'", self.server, name);

        let mut writer = BufWriter::new(&stream);
        write!(writer, "UPLOAD {name}\r\n")?;
        let sent = copy_in_chunks(&mut file, &mut writer, self.chunk_size)?;
        writer.flush()?;
        drop(writer);
        stream.shutdown(Shutdown::Write)?;

        wait_for_close(&stream)?;
        info!("File '{}' uploaded ({} bytes)", name, sent);
        Ok(sent)
    }

    /// Uploads every file concurrently, each on its own connection, using at
    /// most `threads` workers. Results come back in completion order.
    pub fn upload_all(
        &self,
        paths: Vec<PathBuf>,
        threads: usize,
    ) -> Vec<(PathBuf, Result<u64, AppError>)> {
        let pool = ThreadPool::new(threads.max(1));
        let (tx, rx) = mpsc::channel();

        for path in paths {
            self.spawn_upload(&pool, &tx, path);
        }
        drop(tx);

        rx.iter().collect()
    }

    fn spawn_upload(&self, pool: &ThreadPool, tx: &UploadResultSender, path: PathBuf) {
        let client = self.clone();
        let tx = tx.clone();
        pool.execute(move || {
            let result = client.upload_file(&path);
            if let Err(ref e) = result {
                warn!("Upload of '{}' failed: {e}", path.display());
            }
            let _ = tx.send((path, result));
        });
    }

    /// Reads `upload <fileName>` commands from `input` until end-of-stream.
    ///
    /// Each accepted file is uploaded on the pool as soon as its command is
    /// read, so a slow upload never holds up the next command. Malformed
    /// commands and files that cannot be uploaded are reported on `out` and
    /// skipped. Returns the results of the uploads that were started, once
    /// all of them have finished.
    pub fn run_commands<R: BufRead, W: Write>(
        &self,
        input: R,
        out: &mut W,
        base_dir: &Path,
        threads: usize,
    ) -> Vec<(PathBuf, Result<u64, AppError>)> {
        let pool = ThreadPool::new(threads.max(1));
        let (tx, rx) = mpsc::channel();

        for line in input.lines() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    warn!("Stopped reading commands: {e}");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let path = match parse_command(&line, base_dir) {
                Ok(path) => path,
                Err(e) => {
                    let _ = writeln!(out, "{e}");
                    continue;
                }
            };
            if !path.is_file() {
                let _ = writeln!(out, "{}: no such file", path.display());
                continue;
            }
            if let Err(e) = Self::check_uploadable(&path) {
                let _ = writeln!(out, "{}: {e}", path.display());
                continue;
            }

            debug!("Queueing upload of '{}'", path.display());
            self.spawn_upload(&pool, &tx, path);
        }
        drop(tx);

        rx.iter().collect()
    }
}

// The server never answers an upload; its close is the completion signal.
fn wait_for_close(mut stream: &TcpStream) -> Result<(), AppError> {
    let mut buffer = [0u8; 64];
    loop {
        match stream.read(&mut buffer) {
            Ok(0) => return Ok(()),
            Ok(n) => debug!("Ignoring {n} unexpected bytes from server"),
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) if e.kind() == ErrorKind::ConnectionReset => return Ok(()),
            Err(e) => return Err(AppError::Io(e)),
        }
    }
}
