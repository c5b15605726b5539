//! Minimal HTTP/1.1 framing
//!
//! One request per connection: request line, headers up to the first empty
//! line (only `Content-Length` is kept), then for `POST` up to
//! `Content-Length` body bytes. Responses are always JSON with an exact
//! `Content-Length` and `Connection: close`.

use core::fmt::Write as _;

use embedded_io_async::{Read, Write};
use heapless::String;

/// Request head plus body must fit in this many bytes
pub const MAX_REQUEST_SIZE: usize = 2048;

/// Longest request path we keep
pub const MAX_PATH_LEN: usize = 128;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
    Other,
}

impl Method {
    fn parse(token: &str) -> Self {
        match token {
            "GET" => Method::Get,
            "POST" => Method::Post,
            _ => Method::Other,
        }
    }
}

/// A parsed request; the body borrows the connection buffer
#[derive(Debug)]
pub struct Request<'b> {
    pub method: Method,
    pub path: String<MAX_PATH_LEN>,
    pub content_length: usize,
    pub body: &'b [u8],
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadError<E> {
    /// Peer closed the connection without sending anything
    Closed,
    /// Request line or headers could not be understood
    Malformed,
    Io(E),
}

struct Head {
    method: Method,
    path: String<MAX_PATH_LEN>,
    content_length: usize,
}

/// Read one request from `conn` into `buf`.
///
/// A body shorter than the declared `Content-Length` is returned as-is; the
/// JSON decoder downstream reports it.
pub async fn read_request<'b, R: Read>(
    conn: &mut R,
    buf: &'b mut [u8],
) -> Result<Request<'b>, ReadError<R::Error>> {
    let mut total = 0usize;

    // Read until we see the end of headers or the buffer is full.
    let head_end = loop {
        if let Some(end) = find_head_end(&buf[..total]) {
            break end;
        }
        if total == buf.len() {
            return Err(ReadError::Malformed);
        }
        let n = conn.read(&mut buf[total..]).await.map_err(ReadError::Io)?;
        if n == 0 {
            if total == 0 {
                return Err(ReadError::Closed);
            }
            // Peer half-closed right after the headers.
            break total;
        }
        total += n;
    };

    let head = parse_head(&buf[..head_end]).ok_or(ReadError::Malformed)?;

    let mut body_end = head_end;
    if head.method == Method::Post {
        let wanted = head_end.saturating_add(head.content_length).min(buf.len());
        while total < wanted {
            let n = conn.read(&mut buf[total..wanted]).await.map_err(ReadError::Io)?;
            if n == 0 {
                break;
            }
            total += n;
        }
        body_end = total.min(wanted);
    }

    Ok(Request {
        method: head.method,
        path: head.path,
        content_length: head.content_length,
        body: &buf[head_end..body_end],
    })
}

/// Index just past the blank line ending the head, if it has arrived
fn find_head_end(data: &[u8]) -> Option<usize> {
    data.iter().enumerate().find_map(|(i, &byte)| {
        if byte != b'\n' {
            return None;
        }
        let rest = &data[i + 1..];
        if rest.starts_with(b"\r\n") {
            Some(i + 3)
        } else if rest.starts_with(b"\n") {
            Some(i + 2)
        } else {
            None
        }
    })
}

fn parse_head(head: &[u8]) -> Option<Head> {
    let text = core::str::from_utf8(head).ok()?;
    let mut lines = text.split('\n').map(|line| line.trim_end_matches('\r'));

    let request_line = lines.next().unwrap_or("");
    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return None;
    };
    let path = String::try_from(path).ok()?;

    let mut content_length = 0usize;
    for line in lines {
        if line.trim().is_empty() {
            break;
        }
        let Some((key, value)) = line.split_once(':') else {
            continue;
        };
        if key.trim().eq_ignore_ascii_case("content-length") {
            content_length = value.trim().parse::<usize>().ok()?;
        }
    }

    Some(Head {
        method: Method::parse(method),
        path,
        content_length,
    })
}

/// Reason phrase for the status line; unknown codes fall back to "OK"
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        202 => "Accepted",
        204 => "No Content",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        415 => "Unsupported Media Type",
        500 => "Internal Server Error",
        _ => "OK",
    }
}

pub async fn write_response<W: Write>(
    conn: &mut W,
    status: u16,
    body: &[u8],
) -> Result<(), W::Error> {
    let mut head: String<160> = String::new();
    // The longest head is well under the capacity.
    let _ = core::write!(
        &mut head,
        "HTTP/1.1 {} {}\r\n\
         Content-Type: application/json\r\n\
         Content-Length: {}\r\n\
         Connection: close\r\n\
         \r\n",
        status,
        reason_phrase(status),
        body.len()
    );
    conn.write_all(head.as_bytes()).await?;
    conn.write_all(body).await?;
    conn.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::convert::Infallible;
    use embassy_futures::block_on;

    /// Hands out the scripted chunks one `read` at a time.
    struct Script {
        chunks: Vec<&'static [u8]>,
        written: Vec<u8>,
    }

    impl Script {
        fn new(chunks: &[&'static [u8]]) -> Self {
            Self {
                chunks: chunks.iter().rev().copied().collect(),
                written: Vec::new(),
            }
        }
    }

    impl embedded_io_async::ErrorType for Script {
        type Error = Infallible;
    }

    impl Read for Script {
        async fn read(&mut self, buf: &mut [u8]) -> Result<usize, Infallible> {
            let Some(chunk) = self.chunks.pop() else {
                return Ok(0);
            };
            let n = chunk.len().min(buf.len());
            buf[..n].copy_from_slice(&chunk[..n]);
            if n < chunk.len() {
                self.chunks.push(&chunk[n..]);
            }
            Ok(n)
        }
    }

    impl Write for Script {
        async fn write(&mut self, buf: &[u8]) -> Result<usize, Infallible> {
            self.written.extend_from_slice(buf);
            Ok(buf.len())
        }
    }

    fn parse(chunks: &[&'static [u8]]) -> Result<(Method, Vec<u8>, Vec<u8>), ReadError<Infallible>> {
        let mut conn = Script::new(chunks);
        let mut buf = [0u8; MAX_REQUEST_SIZE];
        block_on(read_request(&mut conn, &mut buf))
            .map(|req| (req.method, req.path.as_bytes().to_vec(), req.body.to_vec()))
    }

    #[test]
    fn parses_get_without_body() {
        let (method, path, body) = parse(&[b"GET /sensor HTTP/1.1\r\nHost: x\r\n\r\n"]).unwrap();
        assert_eq!(method, Method::Get);
        assert_eq!(path, b"/sensor");
        assert!(body.is_empty());
    }

    #[test]
    fn reads_post_body_across_chunks() {
        let (method, path, body) = parse(&[
            b"POST /tone HTTP/1.1\r\ncontent-LENGTH: 12\r",
            b"\n\r\n{\"freq\":",
            b"440}",
        ])
        .unwrap();
        assert_eq!(method, Method::Post);
        assert_eq!(path, b"/tone");
        assert_eq!(body, b"{\"freq\":440}");
    }

    #[test]
    fn short_body_is_passed_through() {
        let (_, _, body) =
            parse(&[b"POST /tone HTTP/1.1\r\nContent-Length: 40\r\n\r\n{\"freq\":"]).unwrap();
        assert_eq!(body, b"{\"freq\":");
    }

    #[test]
    fn body_stops_at_content_length() {
        let (_, _, body) =
            parse(&[b"POST /cancel HTTP/1.1\r\nContent-Length: 2\r\n\r\n{}garbage"]).unwrap();
        assert_eq!(body, b"{}");
    }

    #[test]
    fn accepts_bare_newlines() {
        let (method, path, _) = parse(&[b"PUT /sensor HTTP/1.1\nX: y\n\n"]).unwrap();
        assert_eq!(method, Method::Other);
        assert_eq!(path, b"/sensor");
    }

    #[test]
    fn get_ignores_declared_body() {
        let (_, _, body) =
            parse(&[b"GET /health HTTP/1.1\r\nContent-Length: 5\r\n\r\n"]).unwrap();
        assert!(body.is_empty());
    }

    #[test]
    fn empty_connection_is_closed() {
        assert_eq!(parse(&[]).unwrap_err(), ReadError::Closed);
    }

    #[test]
    fn request_line_needs_method_and_path() {
        assert_eq!(parse(&[b"GET\r\n\r\n"]).unwrap_err(), ReadError::Malformed);
    }

    #[test]
    fn bad_content_length_is_malformed() {
        assert_eq!(
            parse(&[b"POST /tone HTTP/1.1\r\nContent-Length: lots\r\n\r\n"]).unwrap_err(),
            ReadError::Malformed
        );
    }

    #[test]
    fn response_framing_is_exact() {
        let mut conn = Script::new(&[]);
        block_on(write_response(&mut conn, 202, b"{\"status\":\"canceled\"}")).unwrap();
        assert_eq!(
            conn.written,
            b"HTTP/1.1 202 Accepted\r\n\
              Content-Type: application/json\r\n\
              Content-Length: 21\r\n\
              Connection: close\r\n\
              \r\n\
              {\"status\":\"canceled\"}"
        );
    }

    #[test]
    fn unknown_status_falls_back_to_ok() {
        assert_eq!(reason_phrase(418), "OK");
        assert_eq!(reason_phrase(405), "Method Not Allowed");
    }
}
