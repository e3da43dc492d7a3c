//! Resolved configuration overrides and boot-time product information.
//!
//! The memory manager never reads configuration storage itself. Whoever owns
//! the persisted settings resolves them into a [`ConfigOverrides`] map before
//! Phase0 and hands it over together with a [`BootConfig`].

use alloc::collections::BTreeMap;
use core::fmt;

/// Well-known override keys.
pub mod keys {
    /// Session image sub-region size, MiB.
    pub const SESSION_IMAGE_SIZE: &str = "SessionImageSize";
    /// Session view sub-region size, MiB.
    pub const SESSION_VIEW_SIZE: &str = "SessionViewSize";
    /// Session pool sub-region size, MiB.
    pub const SESSION_POOL_SIZE: &str = "SessionPoolSize";
    /// System-wide mapped view size, MiB.
    pub const SYSTEM_VIEW_SIZE: &str = "SystemViewSize";
    /// Paged pool size, bytes.
    pub const PAGED_POOL_SIZE: &str = "PagedPoolSize";
    /// Initial nonpaged pool size, bytes.
    pub const NON_PAGED_POOL_SIZE: &str = "NonPagedPoolSize";
    /// Maximum nonpaged pool size, bytes.
    pub const NON_PAGED_POOL_QUOTA: &str = "NonPagedPoolQuota";
    /// Number of system PTEs.
    pub const SYSTEM_PAGES: &str = "SystemPages";
    /// Low-memory event threshold, MiB.
    pub const LOW_MEMORY_THRESHOLD: &str = "LowMemoryThreshold";
    /// High-memory event threshold, MiB.
    pub const HIGH_MEMORY_THRESHOLD: &str = "HighMemoryThreshold";
    /// Non-zero to lock paged pool into non-pageable memory.
    pub const LOCK_PAGED_POOL: &str = "LockPagedPool";
    /// Prototype PTE allocation fragment, KiB.
    pub const ALLOCATION_FRAGMENT: &str = "AllocationFragment";
    /// Pool percentage after which pool is considered exhausted.
    pub const POOL_USAGE_MAXIMUM: &str = "PoolUsageMaximum";
}

/// A single resolved override.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Override {
    /// Absent, or written as `0`: use the computed default.
    Default,
    /// Written as `-1` (or its 32-bit unsigned spelling): as large as allowed.
    Maximum,
    Value(u64),
}

impl Override {
    /// Raw value written as 0xFFFF_FFFF by 32-bit producers.
    const MAXIMUM_U32: i64 = u32::MAX as i64;

    #[must_use]
    pub const fn from_raw(raw: i64) -> Self {
        match raw {
            0 => Self::Default,
            -1 | Self::MAXIMUM_U32 => Self::Maximum,
            v if v < 0 => Self::Default,
            #[allow(clippy::cast_sign_loss)]
            v => Self::Value(v as u64),
        }
    }

    /// The explicit value, if one was given.
    #[inline]
    #[must_use]
    pub const fn value(self) -> Option<u64> {
        match self {
            Self::Value(v) => Some(v),
            _ => None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn is_default(self) -> bool {
        matches!(self, Self::Default)
    }

    #[inline]
    #[must_use]
    pub const fn is_maximum(self) -> bool {
        matches!(self, Self::Maximum)
    }
}

impl fmt::Display for Override {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("default"),
            Self::Maximum => f.write_str("maximum"),
            Self::Value(v) => write!(f, "{v}"),
        }
    }
}

/// Sparse map of already-resolved configuration values.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    values: BTreeMap<&'static str, i64>,
}

impl ConfigOverrides {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            values: BTreeMap::new(),
        }
    }

    /// Builder-style [`insert`](Self::insert).
    #[must_use]
    pub fn with(mut self, key: &'static str, raw: i64) -> Self {
        self.insert(key, raw);
        self
    }

    pub fn insert(&mut self, key: &'static str, raw: i64) {
        self.values.insert(key, raw);
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Override {
        self.values
            .get(key)
            .copied()
            .map_or(Override::Default, Override::from_raw)
    }

    /// Whether a flag-style key is set to anything but `0`.
    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.values.get(key).is_some_and(|v| *v != 0)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// Installed product flavor.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default)]
pub enum ProductType {
    #[default]
    Workstation,
    LanManServer,
    Server,
}

impl ProductType {
    /// Anything but a workstation.
    #[inline]
    #[must_use]
    pub const fn is_server(self) -> bool {
        !matches!(self, Self::Workstation)
    }
}

/// Target architecture. Selects the paging depth and the constant layout.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Architecture {
    /// 32-bit, two-level paging.
    X86,
    /// 32-bit with physical address extension, three-level paging.
    X86Pae,
    /// 64-bit, four-level paging.
    Amd64,
}

impl Architecture {
    #[inline]
    #[must_use]
    pub const fn is_64bit(self) -> bool {
        matches!(self, Self::Amd64)
    }

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::X86 => "x86",
            Self::X86Pae => "x86-pae",
            Self::Amd64 => "amd64",
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Non-map boot configuration.
#[derive(Debug, Clone)]
pub struct BootConfig {
    pub architecture: Architecture,
    pub product: ProductType,
    /// Multi-user terminal services are enabled.
    pub terminal_services: bool,
    pub overrides: ConfigOverrides,
}

impl BootConfig {
    #[must_use]
    pub const fn new(architecture: Architecture) -> Self {
        Self {
            architecture,
            product: ProductType::Workstation,
            terminal_services: false,
            overrides: ConfigOverrides::new(),
        }
    }

    #[must_use]
    pub fn with_product(mut self, product: ProductType) -> Self {
        self.product = product;
        self
    }

    #[must_use]
    pub fn with_overrides(mut self, overrides: ConfigOverrides) -> Self {
        self.overrides = overrides;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_resolution() {
        let overrides = ConfigOverrides::new()
            .with(keys::PAGED_POOL_SIZE, -1)
            .with(keys::SYSTEM_PAGES, 0xFFFF_FFFF)
            .with(keys::SESSION_POOL_SIZE, 0)
            .with(keys::SESSION_VIEW_SIZE, 48);

        assert_eq!(overrides.get(keys::PAGED_POOL_SIZE), Override::Maximum);
        assert_eq!(overrides.get(keys::SYSTEM_PAGES), Override::Maximum);
        assert_eq!(overrides.get(keys::SESSION_POOL_SIZE), Override::Default);
        assert_eq!(overrides.get(keys::SESSION_VIEW_SIZE), Override::Value(48));
        assert_eq!(overrides.get(keys::SESSION_IMAGE_SIZE), Override::Default);
    }

    #[test]
    fn other_negatives_mean_default() {
        assert_eq!(Override::from_raw(-7), Override::Default);
    }

    #[test]
    fn flags() {
        let overrides = ConfigOverrides::new().with(keys::LOCK_PAGED_POOL, 1);
        assert!(overrides.flag(keys::LOCK_PAGED_POOL));
        assert!(!ConfigOverrides::new().flag(keys::LOCK_PAGED_POOL));
    }

    #[test]
    fn product_types() {
        assert!(!ProductType::Workstation.is_server());
        assert!(ProductType::LanManServer.is_server());
        assert!(ProductType::Server.is_server());
    }
}
