/// # upl_sv
///
/// A small file-transfer server speaking a line-oriented, HTTP-flavoured
/// protocol: `GET` downloads files and directory listings, `UPLOAD` streams a
/// file into the upload directory.
///
/// The `run` function initializes logging and starts the server based on
/// command-line arguments. `run_client` does the same for the upload client.
pub mod cli;
pub mod client;
pub mod error;
pub mod fs;
pub mod http;
pub mod mime;
pub mod responder;
pub mod response;
pub mod server;
pub mod upload;
pub mod utils;

#[cfg(test)]
mod tests;

use crate::cli::{Cli, ClientCli};
use crate::client::UploadClient;
use clap::Parser;
use log::error;
use std::path::Path;

fn init_logging(verbose: bool, detailed_logging: bool) {
    let log_level = if verbose {
        "debug"
    } else if detailed_logging {
        "info"
    } else {
        "warn"
    };

    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(log_level)).init();
    log::debug!("Log level set to: {log_level}");
}

/// Initializes the logger, parses command-line arguments, and starts the server.
///
/// If the server returns an error, it is logged and the process exits.
pub fn run() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.detailed_logging);

    if let Err(e) = server::run_server(cli, None, None) {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}

/// Entry point of the upload client.
///
/// Uploads every file given on the command line concurrently, or, without
/// file arguments, reads `upload <fileName>` commands from standard input and
/// resolves each name against the working directory. Exits non-zero if any
/// upload failed.
pub fn run_client() {
    let cli = ClientCli::parse();
    init_logging(cli.verbose, true);

    let client = UploadClient::new(cli.server).with_chunk_size(cli.chunk_size);
    let results = if cli.files.is_empty() {
        let stdin = std::io::stdin();
        let mut stdout = std::io::stdout();
        client.run_commands(stdin.lock(), &mut stdout, Path::new("."), cli.threads)
    } else {
        client.upload_all(cli.files, cli.threads)
    };

    let mut failed = false;
    for (path, result) in results {
        match result {
            Ok(bytes) => println!("{}: uploaded {bytes} bytes", path.display()),
            Err(e) => {
                error!("{}: {e}", path.display());
                failed = true;
            }
        }
    }

    if failed {
        std::process::exit(1);
    }
}
