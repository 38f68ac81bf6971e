use crate::upload::CollisionPolicy;
use clap::Parser;
use std::path::PathBuf;

// Command-line interface of the server binary.
#[derive(Parser, Debug, Clone)]
#[command(
    version,
    long_about = "A small file-transfer server speaking a line-oriented, HTTP-flavoured protocol.\n `GET <path> <version>` serves files and directory listings from the served directory:\n text files are rendered inside a preformatted block, images are inlined as base64 data URIs\n and everything else is sent as an attachment.\n `UPLOAD <name>` followed by raw bytes stores a file in the upload directory; the upload ends\n when the sender closes its side of the connection.\n Every failure to match a request is answered with 404 Not Found.\n",
    about = "A file-transfer server with GET downloads and UPLOAD streaming."
)]
pub struct Cli {
    /// Directory served as the root for GET requests
    #[arg(short, long, default_value = ".")]
    pub directory: PathBuf,

    /// Host address to listen on (e.g., "127.0.0.1" for local, "0.0.0.0" for everyone on the network)
    #[arg(short, long, default_value = "127.0.0.1")]
    pub listen: String,

    /// Port number to listen on
    #[arg(short, long, default_value_t = 5104)]
    pub port: u16,

    /// Directory, relative to the served root, that receives uploads. Created on first upload.
    #[arg(short, long, default_value = "uploaded")]
    pub upload_dir: PathBuf,

    /// Chunk size in bytes used when streaming attachments and receiving uploads
    #[arg(short, long, default_value_t = 32)]
    pub chunk_size: usize,

    /// What to do when an upload targets a file name that already exists
    #[arg(long, value_enum, default_value_t = CollisionPolicy::Replace)]
    pub on_collision: CollisionPolicy,

    /// Read timeout in seconds for client connections. No timeout when unset.
    #[arg(long)]
    pub read_timeout: Option<u64>,

    /// Enable verbose logging for debugging (log level: debug)
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Enable more detailed logging (log level: info)
    #[arg(long, default_value_t = false)]
    pub detailed_logging: bool,
}

/// Command-line interface of the upload client binary.
#[derive(Parser, Debug, Clone)]
#[command(
    version,
    about = "Uploads files to an upl_sv server, one connection per file."
)]
pub struct ClientCli {
    /// Address of the server to upload to
    #[arg(short, long, default_value = "127.0.0.1:5104")]
    pub server: String,

    /// Chunk size in bytes used when sending file contents
    #[arg(short, long, default_value_t = 128)]
    pub chunk_size: usize,

    /// Number of uploads running at the same time
    #[arg(short, long, default_value_t = 4)]
    pub threads: usize,

    /// Enable verbose logging (log level: debug)
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,

    /// Files to upload. When none are given, `upload <fileName>` commands are
    /// read from standard input until end-of-file.
    pub files: Vec<PathBuf>,
}
