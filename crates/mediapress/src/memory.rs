use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Host memory at a point in time, in bytes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

impl MemorySnapshot {
    pub fn capture() -> Self {
        let mut system = System::new();
        system.refresh_memory();
        Self {
            used_bytes: system.used_memory(),
            total_bytes: system.total_memory(),
        }
    }

    /// Signed change in used memory since `earlier`
    pub fn delta_from(&self, earlier: &MemorySnapshot) -> i64 {
        self.used_bytes as i64 - earlier.used_bytes as i64
    }
}
