/// Policy Envelopes
///
/// Policy envelopes are explicit, immutable and versioned presets. Each one
/// bundles a complete [`Policy`] plus a human-readable purpose, so a run can
/// record exactly which limits it was judged under.
use crate::config::types::Policy;
use std::collections::HashMap;
use std::sync::OnceLock;

/// Versioned policy envelope
#[derive(Debug, Clone)]
pub struct PolicyEnvelope {
    /// Envelope ID (e.g., "classroom-v1")
    pub id: String,
    /// Human-readable name
    pub name: String,
    /// Version of this envelope
    pub version: String,
    /// What the envelope is meant for
    pub purpose: String,
    /// Complete policy carried by this envelope
    pub policy: Policy,
}

impl PolicyEnvelope {
    /// Copy of the envelope's policy, ready to hand to an executor
    pub fn to_policy(&self) -> Policy {
        log::info!("Applied policy envelope: {} ({})", self.id, self.name);
        self.policy.clone()
    }

    /// Get envelope metadata for result recording
    pub fn get_metadata(&self) -> HashMap<String, String> {
        let mut metadata = HashMap::new();
        metadata.insert("envelope_id".to_string(), self.id.clone());
        metadata.insert("envelope_name".to_string(), self.name.clone());
        metadata.insert("envelope_version".to_string(), self.version.clone());
        metadata.insert("policy_fingerprint".to_string(), self.policy.fingerprint());
        metadata
    }
}

/// Policy preset registry
pub struct PolicyPresets {
    envelopes: HashMap<String, PolicyEnvelope>,
}

impl PolicyPresets {
    /// Identifier of the envelope used when nothing else is requested
    pub const DEFAULT_ID: &'static str = "classroom-v1";

    /// Create new preset registry with default envelopes
    pub fn new() -> Self {
        let mut presets = Self {
            envelopes: HashMap::new(),
        };

        presets.register_classroom_v1();
        presets.register_visualizer_v1();
        presets.register_strict_v1();

        presets
    }

    /// Lesson playground defaults
    fn register_classroom_v1(&mut self) {
        let envelope = PolicyEnvelope {
            id: "classroom-v1".to_string(),
            name: "Classroom".to_string(),
            version: "1.0.0".to_string(),
            purpose: "Interactive lesson execution with cooperative checkpoints".to_string(),
            policy: Policy::default(),
        };
        self.envelopes.insert(envelope.id.clone(), envelope);
    }

    /// Step-debugger: recording every line costs time, so the clock is looser
    fn register_visualizer_v1(&mut self) {
        let policy = Policy {
            max_wall_clock_millis: 5000,
            max_output_lines: 500,
            max_output_bytes: 50_000,
            ..Policy::default()
        };
        let envelope = PolicyEnvelope {
            id: "visualizer-v1".to_string(),
            name: "Step Visualizer".to_string(),
            version: "1.0.0".to_string(),
            purpose: "Stepwise recording for the execution slider".to_string(),
            policy,
        };
        self.envelopes.insert(envelope.id.clone(), envelope);
    }

    /// Batch checking of submissions: preemptive and fail-closed
    fn register_strict_v1(&mut self) {
        let policy = Policy {
            max_memory_bytes: Some(16 * 1024 * 1024), // 16MB
            instruction_check_interval: Some(1000),
            fail_on_output_overflow: true,
            ..Policy::default()
        };
        let envelope = PolicyEnvelope {
            id: "strict-v1".to_string(),
            name: "Strict".to_string(),
            version: "1.0.0".to_string(),
            purpose: "Unattended checks with instruction-count preemption".to_string(),
            policy,
        };
        self.envelopes.insert(envelope.id.clone(), envelope);
    }

    /// Get envelope by ID
    pub fn get(&self, id: &str) -> Option<&PolicyEnvelope> {
        self.envelopes.get(id)
    }

    /// List all envelopes, sorted by ID
    pub fn list(&self) -> Vec<&PolicyEnvelope> {
        let mut envelopes: Vec<&PolicyEnvelope> = self.envelopes.values().collect();
        envelopes.sort_by(|a, b| a.id.cmp(&b.id));
        envelopes
    }

    /// Check if envelope exists
    pub fn has(&self, id: &str) -> bool {
        self.envelopes.contains_key(id)
    }
}

impl Default for PolicyPresets {
    fn default() -> Self {
        Self::new()
    }
}

/// Global preset registry
pub fn get_presets() -> &'static PolicyPresets {
    static PRESETS: OnceLock<PolicyPresets> = OnceLock::new();
    PRESETS.get_or_init(PolicyPresets::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_presets_creation() {
        let presets = PolicyPresets::new();
        assert!(presets.has("classroom-v1"));
        assert!(presets.has("visualizer-v1"));
        assert!(presets.has("strict-v1"));
        assert!(!presets.has("cpp17-v1"));
    }

    #[test]
    fn test_default_envelope_is_policy_default() {
        let presets = PolicyPresets::new();
        let classroom = presets.get(PolicyPresets::DEFAULT_ID).unwrap();
        assert_eq!(classroom.to_policy(), Policy::default());
    }

    #[test]
    fn test_list_sorted() {
        let presets = PolicyPresets::new();
        let ids: Vec<&str> = presets.list().iter().map(|e| e.id.as_str()).collect();
        assert_eq!(ids, vec!["classroom-v1", "strict-v1", "visualizer-v1"]);
    }

    #[test]
    fn test_envelope_metadata() {
        let presets = PolicyPresets::new();
        let strict = presets.get("strict-v1").unwrap();
        let metadata = strict.get_metadata();

        assert_eq!(metadata.get("envelope_id").unwrap(), "strict-v1");
        assert_eq!(metadata.get("envelope_version").unwrap(), "1.0.0");
        assert_eq!(
            metadata.get("policy_fingerprint").unwrap(),
            &strict.policy.fingerprint()
        );
    }

    #[test]
    fn test_strict_envelope() {
        let presets = PolicyPresets::new();
        let strict = presets.get("strict-v1").unwrap();
        assert_eq!(strict.policy.instruction_check_interval, Some(1000));
        assert!(strict.policy.fail_on_output_overflow);
        assert_eq!(strict.policy.max_memory_bytes, Some(16 * 1024 * 1024));
    }

    #[test]
    fn test_envelopes_have_distinct_fingerprints() {
        let presets = PolicyPresets::new();
        let fingerprints: std::collections::HashSet<String> =
            presets.list().iter().map(|e| e.policy.fingerprint()).collect();
        assert_eq!(fingerprints.len(), 3);
    }

    #[test]
    fn test_global_presets() {
        let presets = get_presets();
        assert!(presets.has("classroom-v1"));
    }
}
