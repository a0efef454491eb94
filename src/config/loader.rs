/// Policy loading from JSON files and preset envelopes
use crate::config::presets::{get_presets, PolicyPresets};
use crate::config::types::{Policy, Result, SandboxError};
use std::path::Path;

/// Default policy file looked up in the working directory
pub const DEFAULT_POLICY_FILE: &str = "luabox.json";

impl Policy {
    /// Load a policy from a JSON file. Missing fields take their defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            SandboxError::Config(format!("Failed to read policy file {:?}: {}", path, e))
        })?;

        let policy: Policy = serde_json::from_str(&content).map_err(|e| {
            SandboxError::Config(format!("Failed to parse policy JSON {:?}: {}", path, e))
        })?;

        log::debug!("Loaded policy from {:?} ({})", path, policy.fingerprint());
        Ok(policy)
    }

    /// Policy of a registered preset envelope
    pub fn from_preset(id: &str) -> Result<Self> {
        get_presets()
            .get(id)
            .map(|envelope| envelope.to_policy())
            .ok_or_else(|| SandboxError::Config(format!("Unknown policy preset: {}", id)))
    }

    /// `./luabox.json` when present, otherwise the default preset
    pub fn load_default() -> Result<Self> {
        let policy_path = std::env::current_dir()
            .map_err(|e| SandboxError::Config(format!("Failed to get current directory: {}", e)))?
            .join(DEFAULT_POLICY_FILE);

        if policy_path.exists() {
            return Self::load_from_file(policy_path);
        }

        log::debug!(
            "{} not found, using preset {}",
            DEFAULT_POLICY_FILE,
            PolicyPresets::DEFAULT_ID
        );
        Self::from_preset(PolicyPresets::DEFAULT_ID)
    }
}

/// Resolve the effective policy: an explicit file wins over a preset.
pub fn resolve_policy(preset: Option<&str>, file: Option<&Path>) -> Result<Policy> {
    match (file, preset) {
        (Some(path), Some(id)) => {
            log::warn!(
                "Both policy file and preset '{}' given; using file {:?}",
                id,
                path
            );
            Policy::load_from_file(path)
        }
        (Some(path), None) => Policy::load_from_file(path),
        (None, Some(id)) => Policy::from_preset(id),
        (None, None) => Policy::load_default(),
    }
}
