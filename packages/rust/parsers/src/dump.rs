//! Dump stream parser.
//!
//! Turns the output of `apitrace dump -v --color=never` into frames of
//! calls. A blank line closes the current frame, `//` lines are comments,
//! and multi-line shader sources are stitched back into a single call.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::call::{Call, CallLine, PartialCall, is_shader_terminator, parse_call_line};

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One rendering unit: the calls between two blank lines.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Frame {
    pub id: usize,
    pub calls: Vec<Call>,
}

/// A parsed dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceDump {
    pub frames: Vec<Frame>,
}

impl TraceDump {
    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }
}

/// Line counters collected while parsing, for logging.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DumpStats {
    pub calls: usize,
    pub comments: usize,
    pub malformed: usize,
    /// Shader sources still open when the input ended.
    pub unterminated: usize,
}

enum State {
    Normal,
    InShaderSource { call: PartialCall, source: String },
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Incremental dump parser, fed one line at a time.
pub struct DumpParser {
    frames: Vec<Frame>,
    current: Frame,
    state: State,
    stats: DumpStats,
}

impl Default for DumpParser {
    fn default() -> Self {
        Self::new()
    }
}

impl DumpParser {
    pub fn new() -> Self {
        Self {
            frames: Vec::new(),
            current: Frame::default(),
            state: State::Normal,
            stats: DumpStats::default(),
        }
    }

    pub fn stats(&self) -> DumpStats {
        self.stats
    }

    /// Feed one line (without its trailing newline).
    pub fn push_line(&mut self, line: &str) {
        match std::mem::replace(&mut self.state, State::Normal) {
            State::Normal => self.normal_line(line),
            State::InShaderSource { call, mut source } => {
                if is_shader_terminator(line) {
                    self.push_call(call.finish(&source, line));
                } else {
                    source.push_str(line);
                    source.push_str("\\n");
                    self.state = State::InShaderSource { call, source };
                }
            }
        }
    }

    fn normal_line(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            let next = Frame {
                id: self.current.id + 1,
                calls: Vec::new(),
            };
            self.frames.push(std::mem::replace(&mut self.current, next));
            return;
        }
        if line.starts_with("//") {
            self.stats.comments += 1;
            return;
        }

        match parse_call_line(line) {
            Ok(CallLine::Complete(call)) => self.push_call(call),
            Ok(CallLine::ShaderSource(call)) => {
                self.state = State::InShaderSource {
                    call,
                    source: String::new(),
                };
            }
            Err(reason) => {
                self.stats.malformed += 1;
                debug!(%reason, line, "skipping malformed dump line");
            }
        }
    }

    fn push_call(&mut self, call: Call) {
        self.stats.calls += 1;
        self.current.calls.push(call);
    }

    /// End of input. Frames not closed by a blank line are dropped, as is a
    /// shader source that never saw its terminator.
    pub fn finish(mut self) -> (TraceDump, DumpStats) {
        if let State::InShaderSource { call, .. } = &self.state {
            self.stats.unterminated += 1;
            warn!(
                marker = call.marker_index(),
                "dump ended inside a shader source; dropping the call"
            );
        }
        (
            TraceDump {
                frames: self.frames,
            },
            self.stats,
        )
    }
}

/// Parse a whole dump.
pub fn parse_dump(text: &str) -> TraceDump {
    let mut parser = DumpParser::new();
    for line in text.lines() {
        parser.push_line(line);
    }
    let (dump, stats) = parser.finish();
    debug!(
        frames = dump.len(),
        calls = stats.calls,
        malformed = stats.malformed,
        comments = stats.comments,
        "parsed dump"
    );
    dump
}
