//! Frame extraction from a downstream server's stdout stream.
//!
//! Real-world MCP servers interleave log lines, stack traces, and the
//! occasional HTML error page into stdout, and may pretty-print responses
//! across several lines. The buffer tolerates all of that: non-frame lines
//! are dropped at debug level, and a frame is only surfaced once its braces
//! balance.

/// Line prefixes that are known log noise even though some open with `[`.
const NOISE_PREFIXES: &[&str] = &[
    "[ERROR]", "[WARN]", "[INFO]", "[DEBUG]", "Error:", "Warning:", "<!DOCTYPE", "<html",
];

/// Accumulates stdout chunks and drains complete frame candidates.
///
/// A candidate opens with `{` or `[` after leading whitespace. A `{`-opening
/// segment whose braces have not yet balanced is retained until a later chunk
/// closes it (pretty-printed frames); an unbalanced `[`-opening line is
/// treated as noise once its line completes, since responses are objects.
/// Candidates are syntactic: the transport still has to parse them and match
/// their id against the pending table.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    buf: String,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk of stdout and return every frame candidate it completes.
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buf.push_str(chunk);
        let mut frames = Vec::new();

        loop {
            let skip = self.buf.len() - self.buf.trim_start().len();
            if skip > 0 {
                self.buf.drain(..skip);
            }
            if self.buf.is_empty() {
                break;
            }

            let first = self.buf.as_bytes()[0];
            let opens_frame = (first == b'{' || first == b'[') && !self.starts_with_noise();
            if !opens_frame {
                match self.buf.find('\n') {
                    Some(nl) => {
                        tracing::debug!(
                            line = %self.buf[..nl].trim_end(),
                            "discarding non-frame stdout line"
                        );
                        self.buf.drain(..=nl);
                        continue;
                    }
                    // Partial noise line; wait for the rest.
                    None => break,
                }
            }

            match balanced_end(&self.buf) {
                Some(end) => {
                    let frame: String = self.buf.drain(..end).collect();
                    frames.push(frame);
                }
                None => {
                    if first == b'[' {
                        if let Some(nl) = self.buf.find('\n') {
                            tracing::debug!(
                                line = %self.buf[..nl].trim_end(),
                                "discarding unbalanced bracket line"
                            );
                            self.buf.drain(..=nl);
                            continue;
                        }
                    }
                    // Incomplete object segment; wait for more data.
                    break;
                }
            }
        }

        frames
    }

    /// Drop any buffered partial data. Called on transport close.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    fn starts_with_noise(&self) -> bool {
        NOISE_PREFIXES.iter().any(|p| self.buf.starts_with(p))
    }
}

/// Byte offset one past the point where the segment's top-level brace and
/// bracket counts return to zero, scanning past double-quoted strings and
/// backslash escapes. `None` if the segment has not balanced yet.
fn balanced_end(s: &str) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, b) in s.bytes().enumerate() {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            b'{' | b'[' => depth += 1,
            b'}' | b']' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(i + 1);
                }
            }
            _ => {}
        }
    }
    None
}
