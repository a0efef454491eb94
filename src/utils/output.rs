/// Bounded Output Sink
/// Append-only capture of printed lines with inclusive caps and a sentinel.
use crate::config::types::{LimitKind, OutputIntegrity, Policy, OUTPUT_LIMIT_SENTINEL};

/// Output limits configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutputLimits {
    /// Maximum lines, sentinel included
    pub max_lines: usize,
    /// Maximum bytes across all lines, sentinel included
    pub max_bytes: usize,
}

impl Default for OutputLimits {
    fn default() -> Self {
        OutputLimits {
            max_lines: 1000,     // 1000 lines
            max_bytes: 100_000, // 100 KB
        }
    }
}

impl From<&Policy> for OutputLimits {
    fn from(policy: &Policy) -> Self {
        OutputLimits {
            max_lines: policy.max_output_lines,
            max_bytes: policy.max_output_bytes,
        }
    }
}

/// What happened to one line handed to the sink
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SinkWrite {
    /// Line stored as-is
    Appended,
    /// Cap reached by this line; the sentinel took its place
    Truncated(LimitKind),
    /// Sink already truncated; line discarded
    Dropped,
}

/// Append-only line buffer. Never rolled back.
///
/// The sentinel always fits: a content line is accepted only if one line slot
/// and `OUTPUT_LIMIT_SENTINEL.len()` bytes remain after it.
#[derive(Debug, Clone)]
pub struct OutputSink {
    limits: OutputLimits,
    lines: Vec<String>,
    bytes: usize,
    integrity: OutputIntegrity,
}

impl OutputSink {
    pub fn new(limits: OutputLimits) -> Self {
        Self {
            limits,
            lines: Vec::new(),
            bytes: 0,
            integrity: OutputIntegrity::Complete,
        }
    }

    /// Append one line, enforcing caps before the append
    pub fn push_line(&mut self, line: String) -> SinkWrite {
        if self.is_truncated() {
            return SinkWrite::Dropped;
        }

        let reserved_bytes = OUTPUT_LIMIT_SENTINEL.len();
        if self.lines.len() + 1 >= self.limits.max_lines {
            self.seal(OutputIntegrity::TruncatedByLineLimit);
            return SinkWrite::Truncated(LimitKind::OutputLines);
        }
        if self.bytes + line.len() + reserved_bytes > self.limits.max_bytes {
            self.seal(OutputIntegrity::TruncatedByByteLimit);
            return SinkWrite::Truncated(LimitKind::OutputBytes);
        }

        self.bytes += line.len();
        self.lines.push(line);
        SinkWrite::Appended
    }

    fn seal(&mut self, integrity: OutputIntegrity) {
        self.integrity = integrity;
        self.bytes += OUTPUT_LIMIT_SENTINEL.len();
        self.lines.push(OUTPUT_LIMIT_SENTINEL.to_string());
        log::debug!(
            "output sealed after {} lines / {} bytes ({})",
            self.lines.len(),
            self.bytes,
            integrity
        );
    }

    pub fn is_truncated(&self) -> bool {
        self.integrity != OutputIntegrity::Complete
    }

    /// Limit that caused truncation, if any
    pub fn tripped_limit(&self) -> Option<LimitKind> {
        match self.integrity {
            OutputIntegrity::Complete => None,
            OutputIntegrity::TruncatedByLineLimit => Some(LimitKind::OutputLines),
            OutputIntegrity::TruncatedByByteLimit => Some(LimitKind::OutputBytes),
        }
    }

    pub fn integrity(&self) -> OutputIntegrity {
        self.integrity
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn byte_count(&self) -> usize {
        self.bytes
    }

    pub fn limits(&self) -> OutputLimits {
        self.limits
    }

    /// Cumulative copy for step snapshots
    pub fn snapshot(&self) -> Vec<String> {
        self.lines.clone()
    }
}
