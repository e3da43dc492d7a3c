//! Session space sizing and placement.
//!
//! Session space is carved into four sized sub-regions, the working-set
//! allowance ending in the session structure. From the top:
//!
//! ```text
//!  session end ┬──────────────────────┐
//!              │ image                │  sized first, anchored at the end
//!              ├──────────────────────┤
//!              │ session structure    │  64 KiB
//!              ├──────────────────────┤
//!              │ working set          │
//!              ├──────────────────────┤
//!              │ view                 │
//!              ├──────────────────────┤
//!              │ pool                 │
//!  session base┴──────────────────────┘
//! ```
//!
//! With the 3 GB user-space bias the same four regions are laid out from the
//! base upward (pool, view, working set, image) inside the system cache window.

use super::arch::{ArchConstants, SESSION_STRUCT_SIZE};
use crate::config::{ConfigOverrides, Override, ProductType, keys};
use kernel_memory_addresses::{MIB, VirtualAddress, VirtualRange, round_up_to};

/// Final session space placement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct SessionLayout {
    pub range: VirtualRange,
    pub pool: VirtualRange,
    pub view: VirtualRange,
    /// Session working set list.
    pub working_set: VirtualRange,
    /// Per-session control structure, directly below the image.
    pub session_struct: VirtualRange,
    pub image: VirtualRange,
}

impl SessionLayout {
    #[inline]
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.range.len()
    }

    /// Page-directory entries that session space occupies.
    #[inline]
    #[must_use]
    pub const fn page_tables(&self, pde_span: u64) -> u64 {
        self.range.len() / pde_span
    }
}

/// Sub-region sizes in bytes, before placement.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub(super) struct SessionSizes {
    pub image: u64,
    pub working_set: u64,
    pub view: u64,
    pub pool: u64,
}

impl SessionSizes {
    pub(super) const fn total(&self) -> u64 {
        self.image + self.working_set + self.view + self.pool
    }

    pub(super) const fn defaults(c: &ArchConstants) -> Self {
        Self {
            image: c.session_image_default,
            working_set: c.session_ws_default,
            view: c.session_view_default,
            pool: c.session_pool_default,
        }
    }

    /// Size each sub-region from its override.
    ///
    /// `view_share` is the part of the session maximum already handed to
    /// system-wide views (32-bit only).
    pub(super) fn from_overrides(
        c: &ArchConstants,
        overrides: &ConfigOverrides,
        product: ProductType,
        view_share: u64,
    ) -> Self {
        let mut sizes = Self::defaults(c);
        let budget = c.session_maximum_total.saturating_sub(view_share);

        sizes.image = resize(
            c,
            keys::SESSION_IMAGE_SIZE,
            overrides.get(keys::SESSION_IMAGE_SIZE),
            c.session_image_default,
            budget,
            sizes.total(),
        );
        sizes.view = resize(
            c,
            keys::SESSION_VIEW_SIZE,
            overrides.get(keys::SESSION_VIEW_SIZE),
            c.session_view_default,
            budget,
            sizes.total(),
        );

        let pool_request = overrides.get(keys::SESSION_POOL_SIZE);
        sizes.pool = if pool_request.is_default() && !c.is_64bit() && product.is_server() {
            // Servers use real session pool; take twice the default if it fits.
            let doubled = 2 * c.session_pool_default;
            let room = budget.saturating_sub(sizes.total());
            if room >= doubled {
                doubled
            } else {
                c.session_pool_default
            }
        } else {
            resize(
                c,
                keys::SESSION_POOL_SIZE,
                pool_request,
                c.session_pool_default,
                budget,
                sizes.total(),
            )
        };

        debug_assert!(sizes.total() <= budget.max(c.session_default_total()));
        sizes
    }

    /// Place the regions downward from `end`.
    pub(super) fn place_below(&self, end: u64) -> Option<SessionLayout> {
        let image_start = end.checked_sub(self.image)?;
        let view_end = image_start.checked_sub(self.working_set)?;
        let view_start = view_end.checked_sub(self.view)?;
        let pool_start = view_start.checked_sub(self.pool)?;
        let struct_start = image_start.checked_sub(SESSION_STRUCT_SIZE)?;
        Some(SessionLayout {
            range: span(pool_start, end)?,
            pool: span(pool_start, view_start)?,
            view: span(view_start, view_end)?,
            working_set: span(view_end, struct_start)?,
            session_struct: span(struct_start, image_start)?,
            image: span(image_start, end)?,
        })
    }

    /// Place the regions upward from `base`.
    pub(super) fn place_above(&self, base: u64) -> Option<SessionLayout> {
        let view_start = base.checked_add(self.pool)?;
        let ws_start = view_start.checked_add(self.view)?;
        let end = base.checked_add(self.total())?;
        let image_start = end.checked_sub(self.image)?;
        let struct_start = image_start.checked_sub(SESSION_STRUCT_SIZE)?;
        Some(SessionLayout {
            range: span(base, end)?,
            pool: span(base, view_start)?,
            view: span(view_start, ws_start)?,
            working_set: span(ws_start, struct_start)?,
            session_struct: span(struct_start, image_start)?,
            image: span(image_start, end)?,
        })
    }
}

/// Resolve one MiB-valued sub-region override.
///
/// Values below one PDE keep the default. Others are rounded up to a PDE
/// multiple and capped at what the rest of session space leaves over; the
/// `Maximum` sentinel, or a value that rounds to nothing, takes that cap.
fn resize(
    c: &ArchConstants,
    key: &str,
    request: Override,
    default: u64,
    budget: u64,
    current_total: u64,
) -> u64 {
    let pde_mib = c.pde_mib();
    let requested_mib = match request {
        Override::Default => return default,
        Override::Value(v) if v < pde_mib => return default,
        Override::Value(v) => round_up_to(v, pde_mib).unwrap_or(0),
        Override::Maximum => 0,
    };

    let Some(cap_mib) = current_total
        .checked_sub(default)
        .and_then(|others| budget.checked_sub(others))
        .map(|bytes| bytes / MIB)
    else {
        log::warn!("{key}: session budget already exhausted, keeping default");
        return default;
    };

    let mib = if requested_mib == 0 || requested_mib > cap_mib {
        cap_mib
    } else {
        requested_mib
    };
    if mib == 0 {
        log::warn!("{key}: no room left, keeping default");
        return default;
    }

    log::debug!("{key}: {request} MiB requested, {mib} MiB used");
    mib * MIB
}

fn span(start: u64, end: u64) -> Option<VirtualRange> {
    VirtualRange::new(VirtualAddress::new(start), VirtualAddress::new(end))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layout::arch::{AMD64, X86};

    #[test]
    fn defaults_fill_48_mib_on_x86() {
        let sizes = SessionSizes::from_overrides(&X86, &ConfigOverrides::new(), ProductType::Workstation, 16 * MIB);
        assert_eq!(sizes, SessionSizes::defaults(&X86));
        let layout = sizes.place_below(X86.session_space_end).unwrap();
        assert_eq!(layout.range.start().as_u64(), 0xC000_0000 - 48 * MIB);
        assert_eq!(layout.image.start().as_u64(), 0xC000_0000 - 8 * MIB);
        assert_eq!(layout.view.end(), layout.working_set.start());
        assert_eq!(layout.page_tables(X86.pde_span), 12);
    }

    #[test]
    fn session_structure_follows_working_set() {
        for c in [&X86, &AMD64] {
            let sizes = SessionSizes::defaults(c);
            for layout in [
                sizes.place_below(c.session_space_end).unwrap(),
                sizes.place_above(0xD000_0000).unwrap(),
            ] {
                assert_eq!(layout.working_set.len(), c.session_ws_default - SESSION_STRUCT_SIZE);
                assert_eq!(layout.session_struct.len(), SESSION_STRUCT_SIZE);
                assert_eq!(layout.working_set.end(), layout.session_struct.start());
                assert_eq!(layout.session_struct.end(), layout.image.start());
            }
        }
    }

    #[test]
    fn overrides_round_to_pde_and_adjust_total() {
        let overrides = ConfigOverrides::new()
            .with(keys::SESSION_VIEW_SIZE, 30)
            .with(keys::SESSION_IMAGE_SIZE, 2);
        let sizes = SessionSizes::from_overrides(&X86, &overrides, ProductType::Workstation, 16 * MIB);
        assert_eq!(sizes.image, 8 * MIB, "below one PDE keeps the default");
        assert_eq!(sizes.view, 32 * MIB);
        assert_eq!(sizes.total(), 60 * MIB);
    }

    #[test]
    fn maximum_takes_remaining_budget() {
        let overrides = ConfigOverrides::new().with(keys::SESSION_VIEW_SIZE, -1);
        let sizes = SessionSizes::from_overrides(&X86, &overrides, ProductType::Workstation, 16 * MIB);
        // 512 - 16 of system views - (8 + 4 + 16) of the other regions.
        assert_eq!(sizes.view, 468 * MIB);
        assert_eq!(sizes.total(), 496 * MIB);
    }

    #[test]
    fn oversized_request_is_capped() {
        let overrides = ConfigOverrides::new().with(keys::SESSION_POOL_SIZE, 100_000);
        let sizes = SessionSizes::from_overrides(&AMD64, &overrides, ProductType::Workstation, 0);
        assert_eq!(sizes.total(), AMD64.session_maximum_total);
    }

    #[test]
    fn x86_servers_double_session_pool() {
        let sizes = SessionSizes::from_overrides(&X86, &ConfigOverrides::new(), ProductType::Server, 16 * MIB);
        assert_eq!(sizes.pool, 32 * MIB);

        let amd64 = SessionSizes::from_overrides(&AMD64, &ConfigOverrides::new(), ProductType::Server, 0);
        assert_eq!(amd64.pool, AMD64.session_pool_default);
    }

    #[test]
    fn upward_placement() {
        let layout = SessionSizes::defaults(&X86).place_above(0xD000_0000).unwrap();
        assert_eq!(layout.pool.start().as_u64(), 0xD000_0000);
        assert_eq!(layout.view.start(), layout.pool.end());
        assert_eq!(layout.image.end(), layout.range.end());
        assert_eq!(layout.total(), 48 * MIB);
    }
}
