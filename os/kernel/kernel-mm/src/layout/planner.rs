//! The Layout Planner.
//!
//! [`plan`] turns memory size, the architecture and the override map into an
//! [`AddressSpaceLayout`]. Overrides that are out of range are clamped or
//! replaced with defaults; only arithmetic that would leave a region with no
//! address space at all is reported as an error.

use super::arch::{ArchConstants, BOOT_IMAGE_SLACK, Platform};
use super::session::SessionSizes;
use super::{
    AddressSpaceLayout, LayoutError, NonPagedPoolLayout, RegionKind, SystemPtes, UserSpaceSplit,
};
use crate::cartographer::PhysicalMemoryMap;
use crate::config::{BootConfig, ConfigOverrides, Override, ProductType, keys};
use crate::size_class::MM_MEDIUM_SYSTEM;
use kernel_info::boot::BootHandoff;
use kernel_memory_addresses::{MIB, PageSize, Size4K, VirtualAddress, VirtualRange, round_up_to};
use kernel_vmem::PagingDepth;

const KIB: u64 = 1024;
const GIB: u64 = 1024 * MIB;

/// Everything the planner needs to know about the machine.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub struct LayoutInputs {
    pub total_pages: u64,
    pub free_pages: u64,
    pub boot_image_bytes: u64,
    pub virtual_bias: bool,
    /// `USERVA=` from the load options, in MiB.
    pub user_va_limit_mb: Option<u64>,
    pub product: ProductType,
    pub terminal_services: bool,
}

impl LayoutInputs {
    #[must_use]
    pub fn new(total_pages: u64, free_pages: u64) -> Self {
        Self {
            total_pages,
            free_pages,
            ..Self::default()
        }
    }

    #[must_use]
    pub fn gather(handoff: &BootHandoff<'_>, map: &PhysicalMemoryMap, config: &BootConfig) -> Self {
        Self {
            total_pages: map.total_pages(),
            free_pages: map.free_pages(),
            boot_image_bytes: handoff.boot_image_bytes(),
            virtual_bias: handoff.virtual_bias,
            user_va_limit_mb: handoff.user_va_limit_mb(),
            product: config.product,
            terminal_services: config.terminal_services,
        }
    }
}

/// Compute the address space layout for platform `P`.
///
/// # Errors
/// A region has no address space left once the regions before it are placed.
pub fn plan<P: Platform>(inputs: &LayoutInputs, overrides: &ConfigOverrides) -> Result<AddressSpaceLayout, LayoutError> {
    let c = P::CONSTANTS;
    let bias = inputs.virtual_bias && !c.is_64bit();
    if inputs.virtual_bias && c.is_64bit() {
        log::warn!("3 GB user space requested on {}; ignored", c.architecture);
    }

    let boot_image =
        round_up_to(inputs.boot_image_bytes, c.pde_span).ok_or(LayoutError::Exhausted(RegionKind::BootImage))?;

    let view_size = system_view_size(c, overrides.get(keys::SYSTEM_VIEW_SIZE), bias);
    let view_share = if c.is_64bit() { 0 } else { view_size };
    let sizes = if bias {
        SessionSizes::defaults(c)
    } else {
        SessionSizes::from_overrides(c, overrides, inputs.product, view_share)
    };
    log::debug!(
        "session: image {} KiB, view {} KiB, pool {} KiB, system views {} KiB",
        sizes.image / KIB,
        sizes.view / KIB,
        sizes.pool / KIB,
        view_size / KIB
    );

    let mut split = UserSpaceSplit::architected(c);
    let mut cache_max_pages = (c.system_cache_end - c.system_cache_start) >> Size4K::SHIFT;
    let mut paged_pool_start = c.paged_pool_start;
    let mut boot_image_range = None;

    let (session, system_view) = if c.is_64bit() {
        let session = sizes
            .place_below(c.session_space_end)
            .ok_or(LayoutError::Exhausted(RegionKind::SessionSpace))?;
        let view = span(c.lowest_nonpaged_system_start - view_size, c.lowest_nonpaged_system_start)
            .ok_or(LayoutError::Exhausted(RegionKind::SystemView))?;
        (session, view)
    } else {
        if overrides.get(keys::PAGED_POOL_SIZE).is_maximum() && !bias {
            let stolen = round_up_to(cache_max_pages / 3, c.ptes_per_page).unwrap_or(0);
            cache_max_pages -= stolen;
            paged_pool_start -= stolen << Size4K::SHIFT;
            log::debug!("paged pool maximum requested: {stolen} pages moved from the system cache");
        }

        let user_va = inputs
            .user_va_limit_mb
            .and_then(|mb| round_up_to(mb, c.pde_mib()))
            .unwrap_or(0);

        if bias {
            if boot_image > BOOT_IMAGE_SLACK {
                paged_pool_start += boot_image - BOOT_IMAGE_SLACK;
            }
            let growth = if 2048 < user_va && user_va < 3072 {
                ((user_va - 2048) * MIB).max(boot_image)
            } else {
                GIB
            };
            grow_user_space(&mut split, growth, c);

            cache_max_pages = cache_max_pages
                .checked_sub((boot_image + sizes.total() + view_size) >> Size4K::SHIFT)
                .ok_or(LayoutError::Exhausted(RegionKind::SystemCache))?;
            let session = sizes
                .place_above(c.system_cache_start + (cache_max_pages << Size4K::SHIFT))
                .ok_or(LayoutError::Exhausted(RegionKind::SessionSpace))?;
            let view = VirtualRange::from_len(session.range.end(), view_size)
                .ok_or(LayoutError::Exhausted(RegionKind::SystemView))?;
            boot_image_range = span(c.system_cache_end - boot_image, c.system_cache_end);
            (session, view)
        } else {
            if (64..2048).contains(&user_va) {
                shrink_user_space(&mut split, c.system_range_start - user_va * MIB, c);
            }
            let session = sizes
                .place_below(c.session_space_end)
                .ok_or(LayoutError::Exhausted(RegionKind::SessionSpace))?;
            let view = VirtualRange::new(
                session
                    .range
                    .start()
                    .checked_sub(view_size)
                    .ok_or(LayoutError::Exhausted(RegionKind::SystemView))?,
                session.range.start(),
            )
            .ok_or(LayoutError::Exhausted(RegionKind::SystemView))?;
            (session, view)
        }
    };

    let cache_pages = if c.is_64bit() {
        system_cache_pages_64(inputs.total_pages, cache_max_pages)
    } else {
        cache_max_pages
    };
    let system_cache = VirtualRange::from_len(VirtualAddress::new(c.system_cache_start), cache_pages << Size4K::SHIFT)
        .ok_or(LayoutError::Exhausted(RegionKind::SystemCache))?;

    let pool_end = if c.is_64bit() {
        system_view.start().as_u64()
    } else {
        c.lowest_nonpaged_system_start
    };
    let pool_len = pool_end
        .checked_sub(paged_pool_start)
        .ok_or(LayoutError::Exhausted(RegionKind::PagedPool))?
        .min(c.max_paged_pool);
    let paged_pool = VirtualRange::from_len(VirtualAddress::new(paged_pool_start), pool_len)
        .ok_or(LayoutError::Exhausted(RegionKind::PagedPool))?;

    let pte_count = system_pte_count(
        c,
        inputs.total_pages,
        overrides.get(keys::SYSTEM_PAGES),
        inputs.terminal_services,
    );
    let system_ptes = SystemPtes {
        range: VirtualRange::from_len(VirtualAddress::new(c.lowest_nonpaged_system_start), pte_count << Size4K::SHIFT)
            .ok_or(LayoutError::Exhausted(RegionKind::SystemPtes))?,
        count: pte_count,
    };

    let nonpaged_pool = nonpaged_pool(c, inputs, overrides, system_ptes.range.end())?;

    let layout = AddressSpaceLayout {
        architecture: c.architecture,
        virtual_bias: bias,
        split,
        session,
        system_view,
        boot_image: boot_image_range,
        system_cache_working_set: one_page(c.system_cache_working_set),
        system_cache,
        system_cache_max_pages: cache_max_pages,
        paged_pool,
        system_ptes,
        nonpaged_pool,
        shared_user_data: one_page(c.shared_user_data),
    };

    debug_assert_eq!(layout.validate::<P::Depth>(), Ok(()));
    log::info!(
        "layout for {} ({} levels), {} pages:",
        c.architecture,
        <P::Depth as PagingDepth>::LEVELS,
        inputs.total_pages
    );
    for region in layout.regions() {
        log::info!("  {region}");
    }
    Ok(layout)
}

/// System view size in bytes.
fn system_view_size(c: &ArchConstants, request: Override, bias: bool) -> u64 {
    let requested_mib = match request {
        Override::Default => return c.default_system_view_size,
        Override::Value(v) if v < c.pde_mib() => return c.default_system_view_size,
        _ if bias => {
            log::debug!("{}: ignored with 3 GB user space", keys::SYSTEM_VIEW_SIZE);
            return c.default_system_view_size;
        }
        Override::Value(v) => round_up_to(v, c.pde_mib()).unwrap_or(0),
        Override::Maximum => 0,
    };

    let mut max_mib = c.session_maximum_total / MIB;
    if !c.is_64bit() {
        max_mib -= c.session_default_total() / MIB;
    }
    let mib = if requested_mib == 0 || requested_mib > max_mib {
        max_mib
    } else {
        requested_mib
    };
    log::debug!("{}: {request} MiB requested, {mib} MiB used", keys::SYSTEM_VIEW_SIZE);
    mib * MIB
}

/// Give user space `growth` more bytes, taken from the bottom of system space.
fn grow_user_space(split: &mut UserSpaceSplit, growth: u64, c: &ArchConstants) {
    split.highest_user_address = VirtualAddress::new(c.highest_user_address + growth);
    split.user_probe_address = VirtualAddress::new(c.user_probe_address + growth);
    split.system_range_start = VirtualAddress::new(c.system_range_start + growth);
    split.maximum_working_set = c.max_working_set + (growth >> Size4K::SHIFT);
    if growth != GIB {
        split.extra_system_space = span(c.system_range_start + growth, c.session_space_end);
    }
    log::debug!("user space grown by {} MiB", growth / MIB);
}

/// Hand `reduction` bytes from the top of user space to system space.
fn shrink_user_space(split: &mut UserSpaceSplit, reduction: u64, c: &ArchConstants) {
    split.highest_user_address = VirtualAddress::new(c.highest_user_address - reduction);
    split.user_probe_address = VirtualAddress::new(c.user_probe_address - reduction);
    split.system_range_start = VirtualAddress::new(c.system_range_start - reduction);
    split.maximum_working_set = c.max_working_set.saturating_sub(reduction >> Size4K::SHIFT);
    split.extra_system_space = span(c.system_range_start - reduction, c.system_range_start);
    log::debug!("user space reduced by {} MiB", reduction / MIB);
}

fn system_cache_pages_64(total_pages: u64, max_pages: u64) -> u64 {
    let base = (128 * MIB) >> Size4K::SHIFT;
    let increments = (total_pages + 65) / 1024;
    let pages = if increments > 4 {
        base + (increments - 4) * ((16 * MIB) >> Size4K::SHIFT)
    } else {
        base
    };
    pages.min(max_pages)
}

fn system_pte_count(c: &ArchConstants, total_pages: u64, request: Override, terminal_services: bool) -> u64 {
    let clamp = |n: u64| n.clamp(c.system_ptes_minimum, c.system_ptes_maximum);
    let count = match request {
        Override::Value(v) => return clamp(v),
        Override::Maximum if !c.is_64bit() => c.system_ptes_maximum,
        request if c.is_64bit() => {
            let multiplier = if request.is_maximum() {
                256
            } else {
                let m = if terminal_services {
                    32
                } else if total_pages > 0x10_0000 {
                    16
                } else {
                    4
                };
                if total_pages < 0x8000 { m / 2 } else { m }
            };
            total_pages
                .saturating_mul(multiplier)
                .min(c.system_ptes_maximum)
                .max(GIB >> Size4K::SHIFT)
        }
        _ if total_pages < MM_MEDIUM_SYSTEM => c.system_ptes_minimum,
        _ if total_pages > 8192 && terminal_services => c.system_ptes_maximum,
        _ if total_pages > 8192 => c.system_ptes_default * 2,
        _ => c.system_ptes_default,
    };
    clamp(count)
}

fn nonpaged_pool(
    c: &ArchConstants,
    inputs: &LayoutInputs,
    overrides: &ConfigOverrides,
    pte_end: VirtualAddress,
) -> Result<NonPagedPoolLayout, LayoutError> {
    let mib_above_16 = (inputs.total_pages >> 8).saturating_sub(16);
    let free_bytes = inputs.free_pages.saturating_mul(Size4K::SIZE);

    let mut initial = (256 * KIB + 32 * KIB * mib_above_16).min(128 * MIB).min(free_bytes / 2);
    if let Override::Value(bytes) = overrides.get(keys::NON_PAGED_POOL_SIZE) {
        if bytes >> Size4K::SHIFT <= inputs.free_pages * 7 / 8 {
            initial = round_up_to(bytes, Size4K::SIZE).unwrap_or(initial);
        } else {
            log::warn!("{}: {bytes} bytes exceeds 7/8 of free memory; ignored", keys::NON_PAGED_POOL_SIZE);
        }
    }
    initial = round_up_to(initial, Size4K::SIZE).unwrap_or(initial);

    let additional = match overrides.get(keys::NON_PAGED_POOL_QUOTA) {
        Override::Value(bytes) => bytes,
        _ => MIB + 400 * KIB * mib_above_16,
    };
    let maximum = round_up_to(additional, c.pde_span)
        .and_then(|m| m.checked_add(initial))
        .unwrap_or(u64::MAX)
        .min(c.max_additional_nonpaged_pool);

    let end = VirtualAddress::new(c.nonpaged_pool_end);
    let start = end
        .checked_sub(maximum)
        .map_or(pte_end, |s| s.max(pte_end));
    let range = VirtualRange::new(start, end).ok_or(LayoutError::Exhausted(RegionKind::NonPagedPool))?;
    if range.len() < maximum {
        log::warn!(
            "nonpaged pool clipped from {} to {} KiB by the system PTE region",
            maximum / KIB,
            range.len() / KIB
        );
    }

    Ok(NonPagedPoolLayout {
        range,
        initial_bytes: initial.min(range.len()),
        maximum_bytes: range.len(),
    })
}

fn one_page(va: u64) -> VirtualRange {
    let start = VirtualAddress::new(va);
    VirtualRange::from_len(start, Size4K::SIZE).unwrap_or(VirtualRange::empty(start))
}

fn span(start: u64, end: u64) -> Option<VirtualRange> {
    VirtualRange::new(VirtualAddress::new(start), VirtualAddress::new(end))
}
