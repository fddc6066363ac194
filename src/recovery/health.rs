// Health Checks - storage free space and threshold classification

use super::types::HealthStatus;
use crate::config::RecoveryConfig;
use crate::{Result, SafeguardError};
use std::path::{Path, PathBuf};
use sysinfo::Disks;

/// Free-space source for the storage health check
pub trait DiskSpaceSource: Send + Sync {
    /// Fraction of the volume holding `path` that is free, in `0.0..=1.0`
    fn free_ratio(&self, path: &Path) -> Result<f64>;
}

/// Reads mounted disks through `sysinfo`
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemDiskSpace;

impl DiskSpaceSource for SystemDiskSpace {
    fn free_ratio(&self, path: &Path) -> Result<f64> {
        let target = existing_ancestor(path);
        let disks = Disks::new_with_refreshed_list();

        let disk = disks
            .list()
            .iter()
            .filter(|d| target.starts_with(d.mount_point()))
            .max_by_key(|d| d.mount_point().as_os_str().len())
            .ok_or_else(|| {
                SafeguardError::NotFound(format!("no mounted volume holds {}", path.display()))
            })?;

        if disk.total_space() == 0 {
            return Err(SafeguardError::InvalidState(format!(
                "volume {} reports zero capacity",
                disk.mount_point().display()
            )));
        }
        Ok(disk.available_space() as f64 / disk.total_space() as f64)
    }
}

/// Fixed ratio, for tests and environments without disk access
#[derive(Debug, Clone, Copy)]
pub struct FixedDiskSpace(pub f64);

impl DiskSpaceSource for FixedDiskSpace {
    fn free_ratio(&self, _path: &Path) -> Result<f64> {
        Ok(self.0)
    }
}

fn existing_ancestor(path: &Path) -> PathBuf {
    let absolute = std::fs::canonicalize(path)
        .or_else(|_| std::env::current_dir().map(|cwd| cwd.join(path)))
        .unwrap_or_else(|_| path.to_path_buf());

    let mut current = absolute.as_path();
    loop {
        if current.exists() {
            return current.to_path_buf();
        }
        match current.parent() {
            Some(parent) => current = parent,
            None => return absolute.clone(),
        }
    }
}

/// Map a free-space ratio to a health status
pub fn classify_storage(free_ratio: f64, config: &RecoveryConfig) -> HealthStatus {
    if free_ratio < config.storage_critical_free_ratio {
        HealthStatus::Critical
    } else if free_ratio < config.storage_degraded_free_ratio {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

/// No configured secondaries counts as degraded: failover is impossible
pub fn classify_network(reachable: usize, total: usize, config: &RecoveryConfig) -> HealthStatus {
    if total == 0 {
        return HealthStatus::Degraded;
    }
    if reachable == 0 {
        return HealthStatus::Critical;
    }
    if (reachable as f64 / total as f64) < config.network_degraded_reachable_ratio {
        HealthStatus::Degraded
    } else {
        HealthStatus::Healthy
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_storage_thresholds() {
        let config = RecoveryConfig::default();
        assert_eq!(classify_storage(0.04, &config), HealthStatus::Critical);
        assert_eq!(classify_storage(0.10, &config), HealthStatus::Degraded);
        assert_eq!(classify_storage(0.15, &config), HealthStatus::Healthy);
    }

    #[test]
    fn test_network_thresholds() {
        let config = RecoveryConfig::default();
        assert_eq!(classify_network(0, 3, &config), HealthStatus::Critical);
        assert_eq!(classify_network(1, 3, &config), HealthStatus::Degraded);
        assert_eq!(classify_network(2, 4, &config), HealthStatus::Healthy);
        assert_eq!(classify_network(0, 0, &config), HealthStatus::Degraded);
    }

    #[test]
    fn test_existing_ancestor_for_missing_path() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("not").join("yet");
        let resolved = existing_ancestor(&missing);
        assert!(resolved.exists());
        assert!(missing.starts_with(&resolved));
    }
}
