//! Point-in-time host reads: CPU, memory (sysinfo) and disk (statvfs)

use std::sync::Mutex;

use super::CollectorError;

const BYTES_PER_MB: u64 = 1024 * 1024;

/// Disk space for the filesystem holding a path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DiskUsage {
    pub total_bytes: u64,
    pub free_bytes: u64,
}

impl DiskUsage {
    pub fn free_mb(&self) -> u64 {
        self.free_bytes / BYTES_PER_MB
    }

    pub fn used_percent(&self) -> f64 {
        if self.total_bytes == 0 {
            return 0.0;
        }
        let used = self.total_bytes.saturating_sub(self.free_bytes);
        used as f64 / self.total_bytes as f64 * 100.0
    }
}

/// Shared sysinfo handle.
///
/// CPU usage is computed between two refreshes, so the very first read
/// after construction reports 0%.
pub struct SystemReader {
    system: Mutex<sysinfo::System>,
}

impl SystemReader {
    pub fn new() -> Self {
        let mut system = sysinfo::System::new();
        system.refresh_cpu();
        system.refresh_memory();
        Self {
            system: Mutex::new(system),
        }
    }

    fn with_system<T>(&self, f: impl FnOnce(&mut sysinfo::System) -> T) -> T {
        let mut guard = match self.system.lock() {
            Ok(g) => g,
            Err(poisoned) => {
                tracing::warn!("System reader lock poisoned, recovering");
                poisoned.into_inner()
            }
        };
        f(&mut guard)
    }

    /// Global CPU usage (0-100)
    pub fn cpu_usage_percent(&self) -> f64 {
        self.with_system(|sys| {
            sys.refresh_cpu();
            f64::from(sys.global_cpu_info().cpu_usage())
        })
    }

    /// Used memory as a percentage of total (0-100)
    pub fn memory_used_percent(&self) -> Result<f64, CollectorError> {
        let (total, used) = self.with_system(|sys| {
            sys.refresh_memory();
            (sys.total_memory(), sys.used_memory())
        });
        if total == 0 {
            return Err(CollectorError::Unavailable("total memory reported as 0".to_string()));
        }
        Ok(used as f64 / total as f64 * 100.0)
    }
}

impl Default for SystemReader {
    fn default() -> Self {
        Self::new()
    }
}

/// Disk usage for the filesystem holding `path`
#[allow(unsafe_code)]
pub fn disk_usage(path: &str) -> Result<DiskUsage, CollectorError> {
    use std::mem::MaybeUninit;

    let c_path = std::ffi::CString::new(path)
        .map_err(|e| CollectorError::Unavailable(format!("invalid path {}: {}", path, e)))?;
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    let result = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };

    if result == 0 {
        let stat = unsafe { stat.assume_init() };
        let block = stat.f_frsize as u64;
        Ok(DiskUsage {
            total_bytes: (stat.f_blocks as u64).saturating_mul(block),
            free_bytes: (stat.f_bavail as u64).saturating_mul(block),
        })
    } else {
        Err(CollectorError::Unavailable(format!(
            "statvfs failed for {}: {}",
            path,
            std::io::Error::last_os_error()
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disk_usage_root() {
        let usage = disk_usage("/").unwrap();
        assert!(usage.total_bytes > 0);
        assert!(usage.free_bytes <= usage.total_bytes);
        let pct = usage.used_percent();
        assert!((0.0..=100.0).contains(&pct));
    }

    #[test]
    fn test_disk_usage_missing_path() {
        assert!(disk_usage("/definitely/not/a/real/path").is_err());
    }

    #[test]
    fn test_memory_percent_in_range() {
        let reader = SystemReader::new();
        let pct = reader.memory_used_percent().unwrap();
        assert!((0.0..=100.0).contains(&pct));
    }

    #[test]
    fn test_used_percent_empty_fs() {
        let usage = DiskUsage { total_bytes: 0, free_bytes: 0 };
        assert_eq!(usage.used_percent(), 0.0);
    }
}
