//! Engine configuration.
//!
//! Deserialized from the `[system]` / `[k8s]` / `[injection]` /
//! `[rate_limiting]` / `[algo]` / `[debugging]` sections of the config
//! file; every section has workable defaults so a minimal file is enough
//! to boot.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub system: SystemSection,
    pub k8s: K8sSection,
    pub injection: InjectionSection,
    pub rate_limiting: RateLimitingSection,
    pub algo: AlgoSection,
    pub debugging: DebuggingSection,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            system: SystemSection::default(),
            k8s: K8sSection::default(),
            injection: InjectionSection::default(),
            rate_limiting: RateLimitingSection::default(),
            algo: AlgoSection::default(),
            debugging: DebuggingSection::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SystemSection {
    /// Deployment mode tag (`dev`, `staging`, `prod`).
    pub env_mode: String,
    /// IANA timezone used when rendering wall-clock fields.
    pub timezone: String,
    /// Consumer worker cap, shared across processes via the store.
    pub max_concurrency: i32,
}

impl Default for SystemSection {
    fn default() -> Self {
        Self {
            env_mode: "dev".into(),
            timezone: "UTC".into(),
            max_concurrency: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct K8sSection {
    /// The controller's own namespace (jobs and their pods live here).
    pub namespace: String,
    /// Label value identifying this application's cluster objects.
    pub app_id: String,
    /// Volume mount path given to benchmark and algorithm jobs.
    pub job_volume_mount: String,
    /// The environment namespace pool available for pedestal restarts.
    pub chaos_namespaces: Vec<String>,
}

impl Default for K8sSection {
    fn default() -> Self {
        Self {
            namespace: "faultline".into(),
            app_id: "faultline".into(),
            job_volume_mount: "/data".into(),
            chaos_namespaces: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct InjectionSection {
    /// Allow re-running a fault spec that already has an injection row.
    pub enable_duplicate: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitingSection {
    /// How long an executor polls for a token before rescheduling, in
    /// seconds.
    pub token_wait_timeout: u64,
    pub max_restart_pedestal: i64,
    pub max_build_container: i64,
    pub max_algo_execution: i64,
}

impl Default for RateLimitingSection {
    fn default() -> Self {
        Self {
            token_wait_timeout: 600,
            max_restart_pedestal: 4,
            max_build_container: 2,
            max_algo_execution: 8,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AlgoSection {
    /// Name of the anomaly-detector algorithm; its result collection
    /// gates the RCA fan-out.
    pub detector: String,
}

impl Default for AlgoSection {
    fn default() -> Self {
        Self {
            detector: "detector".into(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebuggingSection {
    /// Keep failed cluster resources around for inspection.
    pub enabled: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_toml_gets_defaults() {
        let cfg: EngineConfig = toml::from_str("").expect("empty config parses");
        assert_eq!(cfg.system.max_concurrency, 20);
        assert_eq!(cfg.rate_limiting.token_wait_timeout, 600);
        assert_eq!(cfg.algo.detector, "detector");
        assert!(!cfg.debugging.enabled);
    }

    #[test]
    fn partial_section_overrides() {
        let cfg: EngineConfig = toml::from_str(
            "[rate_limiting]\nmax_restart_pedestal = 1\n\n[k8s]\nchaos_namespaces = [\"ts0\", \"ts1\"]\n",
        )
        .expect("partial config parses");
        assert_eq!(cfg.rate_limiting.max_restart_pedestal, 1);
        // Untouched keys keep defaults.
        assert_eq!(cfg.rate_limiting.max_algo_execution, 8);
        assert_eq!(cfg.k8s.chaos_namespaces, vec!["ts0", "ts1"]);
    }
}
