use crate::client::{parse_command, UploadClient};
use crate::error::AppError;
use crate::fs::{child_href, read_entries, render_listing, resolve_target};
use crate::http::{dispatch, parse_request_line, read_request_line, Request, MAX_REQUEST_LINE};
use crate::mime::{classify, is_determinable, MimeVerdict};
use crate::responder::disposition_filename;
use crate::response::NOT_FOUND_BODY;
use crate::server::ServerConfig;
use crate::upload::{
    candidate_name, receive_upload, validate_file_name, CollisionPolicy, UploadTarget,
    TEMP_FILE_PREFIX,
};
use crate::utils::{copy_in_chunks, html_escape, strip_query};
use std::fs::{self, File};
use std::io::{self, Cursor, Read, Write};
use std::path::{Path, PathBuf};
use tempfile::{tempdir, TempDir};

fn test_config(dir: &TempDir, chunk_size: usize) -> ServerConfig {
    let root = dir.path().canonicalize().unwrap();
    ServerConfig {
        upload_dir: root.join("uploaded"),
        root,
        chunk_size,
        collision_policy: CollisionPolicy::Replace,
        read_timeout: None,
    }
}

fn run_request(config: &ServerConfig, request: &[u8]) -> (Result<(), AppError>, Vec<u8>) {
    let mut reader = Cursor::new(request.to_vec());
    let mut out = Vec::new();
    let result = dispatch(&mut reader, &mut out, config, "TEST");
    (result, out)
}

fn split_response(raw: &[u8]) -> (String, Vec<u8>) {
    let split = raw
        .windows(4)
        .position(|w| w == b"\r\n\r\n")
        .expect("response has a header terminator");
    (
        String::from_utf8_lossy(&raw[..split]).into_owned(),
        raw[split + 4..].to_vec(),
    )
}

fn header_value<'a>(head: &'a str, name: &str) -> Option<&'a str> {
    head.lines()
        .filter_map(|line| line.split_once(": "))
        .find(|(key, _)| key.eq_ignore_ascii_case(name))
        .map(|(_, value)| value)
}

/// Yields at most one byte per read and reports every other read as
/// interrupted, like a slow socket.
struct TrickleReader {
    data: Vec<u8>,
    pos: usize,
    interrupt: bool,
}

impl Read for TrickleReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.interrupt = !self.interrupt;
        if self.interrupt {
            return Err(io::Error::new(io::ErrorKind::Interrupted, "again"));
        }
        if self.pos >= self.data.len() || buf.is_empty() {
            return Ok(0);
        }
        buf[0] = self.data[self.pos];
        self.pos += 1;
        Ok(1)
    }
}

#[test]
fn test_parse_request_line() {
    assert_eq!(
        parse_request_line("GET /docs/a.txt HTTP/1.1").unwrap(),
        Request::Get {
            target: "/docs/a.txt".to_string(),
            version: "HTTP/1.1".to_string()
        }
    );
    assert_eq!(
        parse_request_line("UPLOAD note.txt").unwrap(),
        Request::Upload {
            file_name: "note.txt".to_string()
        }
    );
    assert!(parse_request_line("GET /").is_err());
    assert!(parse_request_line("GET / HTTP/1.0 extra").is_err());
    assert!(parse_request_line("UPLOAD").is_err());
    assert!(parse_request_line("UPLOAD a b").is_err());
    assert!(parse_request_line("POST / HTTP/1.0").is_err());
    assert!(parse_request_line("get / HTTP/1.0").is_err());
    assert!(parse_request_line("").is_err());
}

#[test]
fn test_read_request_line_leaves_body_buffered() {
    let mut reader = Cursor::new(b"UPLOAD a.bin\r\n\x00\x01rest".to_vec());
    let line = read_request_line(&mut reader).unwrap();
    assert_eq!(line.as_deref(), Some("UPLOAD a.bin"));

    let mut rest = Vec::new();
    reader.read_to_end(&mut rest).unwrap();
    assert_eq!(rest, b"\x00\x01rest");
}

#[test]
fn test_read_request_line_eof_and_limit() {
    let mut empty = Cursor::new(Vec::new());
    assert!(read_request_line(&mut empty).unwrap().is_none());

    let mut long = Cursor::new(vec![b'a'; MAX_REQUEST_LINE + 10]);
    assert!(matches!(
        read_request_line(&mut long),
        Err(AppError::BadRequest)
    ));
}

#[test]
fn test_child_href() {
    assert_eq!(child_href("/", "c"), "/c");
    assert_eq!(child_href("/docs", "c"), "/docs/c");
    assert_eq!(child_href("/docs/", "c"), "/docs/c");
    assert_eq!(child_href("/a/b", "c.txt"), "/a/b/c.txt");
    assert_eq!(child_href("//", "docs"), "/docs");
    assert_eq!(child_href("///docs", "c"), "/docs/c");
    assert_eq!(child_href("//docs//", "c"), "/docs//c");
}

#[test]
fn test_resolve_target_contains_paths() {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    fs::create_dir(root.join("sub")).unwrap();
    File::create(root.join("sub").join("f.txt")).unwrap();
    File::create(root.join("a b.txt")).unwrap();

    assert_eq!(resolve_target(&root, "/"), Some(root.clone()));
    assert_eq!(
        resolve_target(&root, "/sub/f.txt"),
        Some(root.join("sub").join("f.txt"))
    );
    assert_eq!(
        resolve_target(&root, "/sub/../sub/./f.txt?download=1"),
        Some(root.join("sub").join("f.txt"))
    );
    assert_eq!(
        resolve_target(&root, "/a%20b.txt"),
        Some(root.join("a b.txt"))
    );
    assert_eq!(resolve_target(&root, "/../etc/passwd"), None);
    assert_eq!(resolve_target(&root, "/sub/../../"), None);
    assert_eq!(resolve_target(&root, "/%2e%2e/x"), None);
    assert_eq!(resolve_target(&root, "/missing.xyz"), None);
}

#[cfg(unix)]
#[test]
fn test_resolve_target_rejects_symlink_escape() {
    let outside = tempdir().unwrap();
    File::create(outside.path().join("secret.txt")).unwrap();
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    std::os::unix::fs::symlink(outside.path(), root.join("link")).unwrap();

    assert_eq!(resolve_target(&root, "/link/secret.txt"), None);
}

#[test]
fn test_in_progress_uploads_are_hidden() {
    let dir = tempdir().unwrap();
    let root = dir.path().canonicalize().unwrap();
    let staging = format!("{TEMP_FILE_PREFIX}a1B2c3");
    fs::write(root.join(&staging), "PARTIAL-").unwrap();
    fs::write(root.join("done.txt"), "complete").unwrap();

    assert_eq!(resolve_target(&root, &format!("/{staging}")), None);
    assert_eq!(resolve_target(&root, &format!("/./{staging}?x=1")), None);
    assert_eq!(
        resolve_target(&root, "/done.txt"),
        Some(root.join("done.txt"))
    );

    let entries = read_entries(&root, "/").unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.display_name.as_str()).collect();
    assert_eq!(names, ["done.txt"]);

    let config = test_config(&dir, 32);
    let (result, raw) = run_request(&config, format!("GET /{staging} HTTP/1.0\r\n").as_bytes());
    result.unwrap();
    assert!(raw.starts_with(b"HTTP/1.0 404 Not Found"));
}

#[test]
fn test_classify() {
    assert_eq!(classify(Path::new("a.txt")).verdict, MimeVerdict::Text);
    assert_eq!(classify(Path::new("page.html")).verdict, MimeVerdict::Text);
    assert_eq!(classify(Path::new("pic.png")).verdict, MimeVerdict::Image);
    assert_eq!(classify(Path::new("pic.JPG")).verdict, MimeVerdict::Image);
    assert_eq!(classify(Path::new("a.zip")).verdict, MimeVerdict::Binary);

    let unknown = classify(Path::new("data.unknownext"));
    assert_eq!(unknown.verdict, MimeVerdict::Binary);
    assert_eq!(unknown.mime.essence_str(), "application/octet-stream");
    let bare = classify(Path::new("README"));
    assert_eq!(bare.verdict, MimeVerdict::Binary);

    assert!(is_determinable(Path::new("a.txt")));
    assert!(!is_determinable(Path::new("data.unknownext")));
}

#[test]
fn test_validate_file_name() {
    assert!(validate_file_name("note.txt").is_ok());
    assert!(validate_file_name(".hidden").is_ok());
    let staging = format!("{TEMP_FILE_PREFIX}x.txt");
    for bad in [
        "",
        ".",
        "..",
        "../x",
        "a/b",
        "/abs",
        "a\\b",
        "a b",
        "nul\0",
        "bell\x07.txt",
        staging.as_str(),
    ] {
        assert!(
            matches!(validate_file_name(bad), Err(AppError::InvalidFileName(_))),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn test_candidate_name() {
    assert_eq!(candidate_name("note.txt", 0), "note.txt");
    assert_eq!(candidate_name("note.txt", 1), "note-1.txt");
    assert_eq!(candidate_name("archive.tar.gz", 2), "archive.tar-2.gz");
    assert_eq!(candidate_name("README", 3), "README-3");
}

#[test]
fn test_copy_in_chunks_retries_interrupted_reads() {
    let data: Vec<u8> = (0..=255u8).collect();
    let mut reader = TrickleReader {
        data: data.clone(),
        pos: 0,
        interrupt: false,
    };
    let mut out = Vec::new();
    let copied = copy_in_chunks(&mut reader, &mut out, 32).unwrap();
    assert_eq!(copied, 256);
    assert_eq!(out, data);
}

#[test]
fn test_helpers() {
    assert_eq!(strip_query("/a.txt?x=1#top"), "/a.txt");
    assert_eq!(strip_query("/a.txt"), "/a.txt");
    assert_eq!(html_escape("<a href=\"x\">&</a>"), "&lt;a href=&quot;x&quot;&gt;&amp;&lt;/a&gt;");
}

#[test]
fn test_listing_entries_and_markup() {
    let dir = tempdir().unwrap();
    File::create(dir.path().join("b.txt")).unwrap();
    File::create(dir.path().join("A file.txt")).unwrap();
    fs::create_dir(dir.path().join("zdir")).unwrap();

    let entries = read_entries(dir.path(), "/share").unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.display_name.as_str()).collect();
    assert_eq!(names, ["zdir", "A file.txt", "b.txt"]);
    assert_eq!(entries[0].href, "/share/zdir");
    assert_eq!(entries[1].href, "/share/A%20file.txt");

    let html = render_listing("/share", &entries);
    assert!(html.contains("<li><a href=\"/share/zdir\"><b><i>zdir</i></b></a></li>"));
    assert!(html.contains("<a href=\"/share/b.txt\">b.txt</a>"));
    assert!(html.starts_with("<html>"));
}

#[test]
fn test_dispatch_text_file() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("poem.txt"), "first line\nsecond <line>\r\nlast").unwrap();
    let config = test_config(&dir, 32);

    let (result, raw) = run_request(&config, b"GET /poem.txt HTTP/1.0\r\n\r\n");
    result.unwrap();
    let (head, body) = split_response(&raw);
    let body = String::from_utf8(body).unwrap();

    assert!(head.starts_with("HTTP/1.0 200 OK"));
    assert_eq!(header_value(&head, "Content-Type"), Some("text/html; charset=utf-8"));
    assert!(body.contains("<pre><b>\nfirst line\nsecond &lt;line&gt;\nlast\n</b></pre>"));
}

#[test]
fn test_dispatch_image_file() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("dot.png"), [0x89, b'P', b'N', b'G']).unwrap();
    let config = test_config(&dir, 32);

    let (result, raw) = run_request(&config, b"GET /dot.png HTTP/1.0\r\n");
    result.unwrap();
    let (head, body) = split_response(&raw);
    let body = String::from_utf8(body).unwrap();

    assert!(head.starts_with("HTTP/1.0 200 OK"));
    assert!(body.contains("<img src=\"data:image/png;base64,iVBORw==\" alt=\"Image\" />"));
}

#[test]
fn test_dispatch_binary_content_length_matches_body() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir, 32);

    for size in [0usize, 1, 32, 33, 100] {
        let name = format!("blob{size}.bin");
        let data: Vec<u8> = (0..size).map(|i| (i * 7 % 256) as u8).collect();
        fs::write(dir.path().join(&name), &data).unwrap();

        let request = format!("GET /{name} HTTP/1.0\r\n");
        let (result, raw) = run_request(&config, request.as_bytes());
        result.unwrap();
        let (head, body) = split_response(&raw);

        assert!(head.starts_with("HTTP/1.0 200 OK"));
        assert_eq!(header_value(&head, "Content-Length"), Some(size.to_string().as_str()));
        assert_eq!(
            header_value(&head, "Content-Disposition"),
            Some(format!("attachment; filename=\"{name}\"").as_str())
        );
        assert_eq!(
            header_value(&head, "Content-Type"),
            Some("application/octet-stream")
        );
        assert_eq!(body, data, "body mismatch for size {size}");
    }
}

#[test]
fn test_disposition_filename() {
    assert_eq!(disposition_filename("plain.bin"), "plain.bin");
    assert_eq!(disposition_filename("say \"hi\".bin"), "say \\\"hi\\\".bin");
    assert_eq!(disposition_filename("back\\slash.bin"), "back\\\\slash.bin");
    assert_eq!(
        disposition_filename("evil\r\nSet-Cookie: x=1.bin"),
        "evilSet-Cookie: x=1.bin"
    );
}

#[cfg(unix)]
#[test]
fn test_dispatch_attachment_name_cannot_inject_headers() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("evil\r\nSet-Cookie: x=1.bin"), b"\x00\x01").unwrap();
    let config = test_config(&dir, 32);

    let (result, raw) = run_request(
        &config,
        b"GET /evil%0D%0ASet-Cookie%3A%20x%3D1.bin HTTP/1.0\r\n",
    );
    result.unwrap();
    let (head, body) = split_response(&raw);

    assert!(head.starts_with("HTTP/1.0 200 OK"));
    assert!(
        !head.lines().any(|line| line.starts_with("Set-Cookie")),
        "header injected: {head:?}"
    );
    assert_eq!(
        header_value(&head, "Content-Disposition"),
        Some("attachment; filename=\"evilSet-Cookie: x=1.bin\"")
    );
    assert_eq!(body, b"\x00\x01");
}

#[test]
fn test_dispatch_not_found_cases() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir, 32);

    for request in [
        &b"GET /missing.xyz HTTP/1.0\r\n"[..],
        b"GET /missing.xyz\r\n",
        b"DELETE /x HTTP/1.0\r\n",
        b"GET /../../etc/passwd HTTP/1.0\r\n",
        b"",
    ] {
        let (result, raw) = run_request(&config, request);
        result.unwrap();
        let (head, body) = split_response(&raw);
        assert!(head.starts_with("HTTP/1.0 404 Not Found"), "{head}");
        assert_eq!(body, NOT_FOUND_BODY.as_bytes());
    }
}

#[test]
fn test_dispatch_upload_writes_nothing_back() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir, 32);
    let payload: Vec<u8> = (0..200u8).collect();

    let mut request = b"UPLOAD data.bin\r\n".to_vec();
    request.extend_from_slice(&payload);
    let (result, raw) = run_request(&config, &request);

    result.unwrap();
    assert!(raw.is_empty());
    assert_eq!(fs::read(config.upload_dir.join("data.bin")).unwrap(), payload);
}

#[test]
fn test_dispatch_upload_rejects_unsafe_name() {
    let dir = tempdir().unwrap();
    let config = test_config(&dir, 32);

    let (result, raw) = run_request(&config, b"UPLOAD ../escape.txt\r\nhello");
    assert!(matches!(result, Err(AppError::InvalidFileName(_))));
    assert!(raw.is_empty());
    assert!(!dir.path().join("escape.txt").exists());
    assert!(!config.upload_dir.exists());
}

#[test]
fn test_receive_upload_collision_policies() {
    let dir = tempdir().unwrap();
    let target = UploadTarget::new("note.txt", dir.path()).unwrap();
    fs::write(target.path(), b"original").unwrap();

    let rejected = receive_upload(
        &mut Cursor::new(b"rejected".to_vec()),
        &target,
        4,
        CollisionPolicy::Reject,
        "TEST",
    );
    assert!(matches!(rejected, Err(AppError::UploadCollision(_))));
    assert_eq!(fs::read(target.path()).unwrap(), b"original");

    let (renamed, _) = receive_upload(
        &mut Cursor::new(b"second".to_vec()),
        &target,
        4,
        CollisionPolicy::Rename,
        "TEST",
    )
    .unwrap();
    assert_eq!(renamed, dir.path().join("note-1.txt"));
    assert_eq!(fs::read(&renamed).unwrap(), b"second");

    let (replaced, bytes) = receive_upload(
        &mut Cursor::new(b"newest".to_vec()),
        &target,
        4,
        CollisionPolicy::Replace,
        "TEST",
    )
    .unwrap();
    assert_eq!(replaced, target.path());
    assert_eq!(bytes, 6);
    assert_eq!(fs::read(target.path()).unwrap(), b"newest");

    // No temporary files are left behind.
    let leftovers: Vec<_> = fs::read_dir(dir.path())
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .filter(|name| name.starts_with('.'))
        .collect();
    assert!(leftovers.is_empty(), "{leftovers:?}");
}

#[test]
fn test_receive_upload_failure_leaves_no_file() {
    struct FailingReader;
    impl Read for FailingReader {
        fn read(&mut self, _buf: &mut [u8]) -> io::Result<usize> {
            Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"))
        }
    }

    let dir = tempdir().unwrap();
    let upload_dir = dir.path().join("uploaded");
    let target = UploadTarget::new("partial.bin", &upload_dir).unwrap();

    let result = receive_upload(&mut FailingReader, &target, 32, CollisionPolicy::Replace, "TEST");
    assert!(matches!(result, Err(AppError::Io(_))));
    assert!(upload_dir.is_dir());
    assert_eq!(fs::read_dir(&upload_dir).unwrap().count(), 0);
}

#[test]
fn test_server_config_validation() {
    use crate::cli::Cli;
    use clap::Parser;

    let dir = tempdir().unwrap();
    let mut file = File::create(dir.path().join("plain.txt")).unwrap();
    writeln!(file, "x").unwrap();
    let root = dir.path().to_str().unwrap();

    let cli = Cli::parse_from(["upl_sv", "--directory", root, "--on-collision", "rename"]);
    let config = ServerConfig::from_cli(&cli).unwrap();
    assert_eq!(config.upload_dir, dir.path().canonicalize().unwrap().join("uploaded"));
    assert_eq!(config.chunk_size, 32);
    assert_eq!(config.collision_policy, CollisionPolicy::Rename);
    assert!(config.read_timeout.is_none());

    let cli = Cli::parse_from(["upl_sv", "--directory", root, "--chunk-size", "0"]);
    assert!(matches!(
        ServerConfig::from_cli(&cli),
        Err(AppError::InvalidConfig(_))
    ));

    let plain = dir.path().join("plain.txt");
    let cli = Cli::parse_from(["upl_sv", "--directory", plain.to_str().unwrap()]);
    assert!(matches!(
        ServerConfig::from_cli(&cli),
        Err(AppError::DirectoryNotFound(_))
    ));
}

#[test]
fn test_parse_command() {
    let base = Path::new("./");
    assert_eq!(
        parse_command("upload note.txt", base).unwrap(),
        PathBuf::from("./note.txt")
    );
    assert_eq!(
        parse_command("  UPLOAD   pic.png \r", base).unwrap(),
        PathBuf::from("./pic.png")
    );
    for bad in ["upload", "note.txt", "upload a.txt b.txt", "send a.txt", ""] {
        assert!(
            matches!(parse_command(bad, base), Err(AppError::InvalidCommand(_))),
            "{bad:?} should be rejected"
        );
    }
}

#[test]
fn test_run_commands_reports_rejected_lines() {
    let dir = tempdir().unwrap();
    fs::write(dir.path().join("data.unknownext"), "x").unwrap();
    // Nothing listens here; no upload may be attempted.
    let client = UploadClient::new("127.0.0.1:1");

    let input = Cursor::new("bogus\n\nupload\nupload missing.txt\nupload data.unknownext\n");
    let mut out = Vec::new();
    let results = client.run_commands(input, &mut out, dir.path(), 2);

    assert!(results.is_empty());
    let messages = String::from_utf8(out).unwrap();
    let lines: Vec<&str> = messages.lines().collect();
    assert_eq!(lines.len(), 4, "{messages}");
    assert!(lines[0].contains("Invalid command: 'bogus'"));
    assert!(lines[1].contains("Invalid command: 'upload'"));
    assert!(lines[2].ends_with("missing.txt: no such file"));
    assert!(lines[3].contains("cannot be determined"));
}

#[test]
fn test_client_cli_without_files_reads_commands() {
    use crate::cli::ClientCli;
    use clap::Parser;

    let cli = ClientCli::parse_from(["upl_client"]);
    assert!(cli.files.is_empty());
    assert_eq!(cli.server, "127.0.0.1:5104");

    let cli = ClientCli::parse_from(["upl_client", "-t", "2", "a.txt", "b.png"]);
    assert_eq!(cli.files, [PathBuf::from("a.txt"), PathBuf::from("b.png")]);
    assert_eq!(cli.threads, 2);
}
