//! Seams for the build and install primitives.
//!
//! Image builds and pedestal installs are external collaborators; the
//! executors talk to them through these object-safe traits so tests can
//! substitute in-memory fakes.

use std::path::Path;

use anyhow::Result;
use async_trait::async_trait;

use super::payloads::{BuildOptions, PedestalRef};

/// Builds and pushes a container image from a source tree.
#[async_trait]
pub trait BuildPrimitive: Send + Sync {
    async fn build_and_push(
        &self,
        image_ref: &str,
        source_path: &Path,
        options: &BuildOptions,
    ) -> Result<()>;
}

/// Installs a pedestal release into a namespace (`helm install` style).
///
/// `ns_index` is the numeric suffix of the target namespace; installers
/// template per-namespace parameters (node ports, hostnames) from it.
#[async_trait]
pub trait PedestalInstaller: Send + Sync {
    async fn install(
        &self,
        namespace: &str,
        ns_index: u32,
        pedestal: &PedestalRef,
    ) -> Result<()>;
}

/// Numeric suffix of a namespace name (`ts3` -> 3). Namespaces without
/// one template as index 0.
pub fn namespace_index(name: &str) -> u32 {
    let digits: String = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.chars().rev().collect::<String>().parse().unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn namespace_index_parses_suffix() {
        assert_eq!(namespace_index("ts0"), 0);
        assert_eq!(namespace_index("ts12"), 12);
        assert_eq!(namespace_index("bench-3"), 3);
        assert_eq!(namespace_index("nodigits"), 0);
    }
}
