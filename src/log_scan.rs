use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::VecDeque;
use tokio::io::{AsyncRead, AsyncReadExt};

/// Longest raw agent message carried inside an error.
pub const MAX_CAPTURED_OUTPUT: usize = 10_000;

static READY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"starting web service.*addr=(\d+\.\d+\.\d+\.\d+:\d+)").unwrap()
});

const IN_USE_MARKER: &str = "address already in use";

/// What a line of agent stdout says about startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StartupSignal {
    /// The web service is up; carries the `http://ip:port` endpoint.
    Ready(String),
    /// The agent could not bind; carries the truncated raw line.
    BindConflict(String),
}

/// Match one chunk of agent stdout against the ready and bind-conflict patterns.
/// The ready pattern wins if both appear.
pub fn scan_startup_output(chunk: &str) -> Option<StartupSignal> {
    if let Some(caps) = READY_RE.captures(chunk) {
        return Some(StartupSignal::Ready(format!("http://{}", &caps[1])));
    }
    if chunk.contains(IN_USE_MARKER) {
        return Some(StartupSignal::BindConflict(truncate_output(chunk)));
    }
    None
}

/// Cap raw agent output at [`MAX_CAPTURED_OUTPUT`] characters.
pub fn truncate_output(raw: &str) -> String {
    raw.chars().take(MAX_CAPTURED_OUTPUT).collect()
}

const READ_CHUNK: usize = 4096;

/// Splits agent output into lines with fixed-size reads.
///
/// Bytes are decoded lossily, so invalid UTF-8 never stops the stream. A line
/// longer than [`MAX_CAPTURED_OUTPUT`] bytes is emitted at that length and the
/// rest of it, up to the next newline, is dropped.
pub struct OutputLines<R> {
    reader: R,
    buf: Box<[u8]>,
    partial: Vec<u8>,
    /// Discarding the tail of an over-long line.
    overflowed: bool,
    lines: VecDeque<String>,
    eof: bool,
}

impl<R: AsyncRead + Unpin> OutputLines<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            buf: vec![0u8; READ_CHUNK].into_boxed_slice(),
            partial: Vec::new(),
            overflowed: false,
            lines: VecDeque::new(),
            eof: false,
        }
    }

    /// Next line without its newline, or `None` at end of stream.
    ///
    /// Cancel safe: the only await point is a single `read`.
    pub async fn next_line(&mut self) -> std::io::Result<Option<String>> {
        loop {
            if let Some(line) = self.lines.pop_front() {
                return Ok(Some(line));
            }
            if self.eof {
                if self.partial.is_empty() {
                    return Ok(None);
                }
                let line = String::from_utf8_lossy(&self.partial).into_owned();
                self.partial.clear();
                return Ok(Some(line));
            }
            let n = self.reader.read(&mut self.buf).await?;
            if n == 0 {
                self.eof = true;
            } else {
                self.feed(n);
            }
        }
    }

    fn feed(&mut self, n: usize) {
        let Self {
            buf,
            partial,
            overflowed,
            lines,
            ..
        } = self;

        for piece in buf[..n].split_inclusive(|&b| b == b'\n') {
            let (body, ends_line) = match piece.split_last() {
                Some((b'\n', body)) => (body, true),
                _ => (piece, false),
            };

            if !*overflowed {
                let room = MAX_CAPTURED_OUTPUT - partial.len();
                partial.extend_from_slice(&body[..body.len().min(room)]);
                if body.len() > room {
                    lines.push_back(String::from_utf8_lossy(partial).into_owned());
                    partial.clear();
                    *overflowed = true;
                }
            }

            if ends_line {
                if !*overflowed {
                    lines.push_back(String::from_utf8_lossy(partial).into_owned());
                    partial.clear();
                }
                *overflowed = false;
            }
        }
    }
}
