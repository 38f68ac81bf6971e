use crate::error::AppError;
use log::{debug, error};
use std::io::prelude::*;

pub const SERVER_NAME: &str = "upl_sv/0.1.0";

/// Fixed body of every 404 response.
pub const NOT_FOUND_BODY: &str = "<html><body><h1>404: Page Not Found</h1></body></html>";

/// Status line and headers of an HTTP/1.0 response.
///
/// Bodies are written by the caller after [`HttpResponse::write_head`], or in
/// one go with [`HttpResponse::send`] when the body is already in memory.
pub struct HttpResponse {
    pub status_code: u16,
    pub status_text: String,
    pub headers: Vec<(String, String)>,
}

impl HttpResponse {
    pub fn new(status_code: u16, status_text: &str) -> Self {
        Self {
            status_code,
            status_text: status_text.to_string(),
            headers: vec![
                ("Server".to_string(), SERVER_NAME.to_string()),
                ("Connection".to_string(), "close".to_string()),
            ],
        }
    }

    pub fn ok() -> Self {
        Self::new(200, "OK")
    }

    pub fn not_found() -> Self {
        Self::new(404, "Not Found")
    }

    pub fn with_html(self) -> Self {
        self.add_header("Content-Type", "text/html; charset=utf-8")
    }

    pub fn add_header(mut self, name: &str, value: impl ToString) -> Self {
        self.headers.push((name.to_string(), value.to_string()));
        self
    }

    /// Writes the status line, headers and the blank separator line.
    pub fn write_head<W: Write + ?Sized>(&self, out: &mut W) -> std::io::Result<()> {
        let mut head = format!("HTTP/1.0 {} {}\r\n", self.status_code, self.status_text);
        for (name, value) in &self.headers {
            head.push_str(&format!("{name}: {value}\r\n"));
        }
        head.push_str("\r\n");
        out.write_all(head.as_bytes())
    }

    /// Sends the head with a `Content-Length` for `body`, then the body itself.
    pub fn send<W: Write + ?Sized>(
        self,
        out: &mut W,
        body: &[u8],
        log_prefix: &str,
    ) -> Result<(), AppError> {
        debug!(
            "{} Sending response - Status: {}, Body Length: {}",
            log_prefix,
            self.status_code,
            body.len()
        );

        let response = self.add_header("Content-Length", body.len());
        response.write_head(out).map_err(|e| {
            error!("{log_prefix} Failed to write response headers: {e}");
            AppError::Io(e)
        })?;

        if !body.is_empty() {
            out.write_all(body).map_err(|e| {
                error!("{log_prefix} Failed to write response body: {e}");
                AppError::Io(e)
            })?;
        }

        out.flush().map_err(|e| {
            error!("{log_prefix} Failed to flush response: {e}");
            AppError::Io(e)
        })?;

        Ok(())
    }
}

/// Answers with the fixed 404 page.
pub fn send_not_found<W: Write + ?Sized>(out: &mut W, log_prefix: &str) -> Result<(), AppError> {
    HttpResponse::not_found()
        .with_html()
        .send(out, NOT_FOUND_BODY.as_bytes(), log_prefix)
}
