/// Source Screening
///
/// A conservative static filter run before any engine work: a size cap and a
/// case-insensitive regex denylist. It is best-effort only. Capability removal
/// and the runtime guards are the real boundary.
use crate::config::types::{ErrorInfo, LimitKind, Policy, Result, SandboxError};
use regex::{Regex, RegexBuilder};

/// Why a source was refused. `pattern_index` is for audit logs, never for users.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScreenRejection {
    pub error: ErrorInfo,
    pub pattern_index: Option<usize>,
}

/// Compiled source screen for one policy
#[derive(Debug, Clone)]
pub struct SourceScreen {
    max_source_bytes: usize,
    patterns: Vec<Regex>,
}

impl SourceScreen {
    /// Compile the policy's patterns once
    pub fn compile(policy: &Policy) -> Result<Self> {
        let patterns = policy
            .banned_source_patterns
            .iter()
            .enumerate()
            .map(|(index, pattern)| {
                RegexBuilder::new(pattern)
                    .case_insensitive(true)
                    .build()
                    .map_err(|e| {
                        SandboxError::Config(format!(
                            "banned_source_patterns[{}] failed to compile: {}",
                            index, e
                        ))
                    })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            max_source_bytes: policy.max_source_bytes,
            patterns,
        })
    }

    /// Pure check: size first, then the denylist
    pub fn check(&self, source: &str) -> std::result::Result<(), ScreenRejection> {
        if source.len() > self.max_source_bytes {
            return Err(ScreenRejection {
                error: ErrorInfo::resource_limit(
                    LimitKind::SourceBytes,
                    self.max_source_bytes as u64,
                ),
                pattern_index: None,
            });
        }

        if let Some(index) = self.patterns.iter().position(|re| re.is_match(source)) {
            return Err(ScreenRejection {
                error: ErrorInfo::policy_violation(),
                pattern_index: Some(index),
            });
        }

        Ok(())
    }

    pub fn pattern_count(&self) -> usize {
        self.patterns.len()
    }
}
