//! # Memory Pressure Events
//!
//! Six named notification events tell the rest of the system how much
//! memory is left: a low/high pair for available physical pages and one
//! pair for each pool.
//!
//! ```text
//!  available pages   0 ────────── low ─────────── high ──────────▶
//!  LowMemory           signaled  │    cleared    │    cleared
//!  HighMemory          cleared   │    cleared    │    signaled
//! ```
//!
//! The named objects can only be created once the object manager runs, so
//! Phase0 holds unsignaled placeholders in their slots.

use crate::collaborators::{EventFactory, SignalEvent};
use crate::config::{ConfigOverrides, Override, keys};
use crate::pool::{PoolThresholds, ThresholdPair};
use bitfield_struct::bitfield;
use core::fmt;
use kernel_memory_addresses::mib_to_pages;

pub const LOW_MEMORY_CONDITION: &str = r"\KernelObjects\LowMemoryCondition";
pub const HIGH_MEMORY_CONDITION: &str = r"\KernelObjects\HighMemoryCondition";
pub const LOW_PAGED_POOL_CONDITION: &str = r"\KernelObjects\LowPagedPoolCondition";
pub const HIGH_PAGED_POOL_CONDITION: &str = r"\KernelObjects\HighPagedPoolCondition";
pub const LOW_NON_PAGED_POOL_CONDITION: &str = r"\KernelObjects\LowNonPagedPoolCondition";
pub const HIGH_NON_PAGED_POOL_CONDITION: &str = r"\KernelObjects\HighNonPagedPoolCondition";

/// Free pages at which the system is considered to have plenty.
pub const PLENTY_FREE_PAGES: u64 = 400;

#[derive(Debug, Copy, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EventError {
    #[error("event {name} already exists")]
    NameCollision { name: &'static str },
    #[error("no resources for event {name}")]
    NoResources { name: &'static str },
}

/// Access rights on an event object.
///
/// | Bits  | Right |
/// |-------|-------|
/// | 0     | query state |
/// | 1     | modify state |
/// | 16–19 | delete, read control, write DAC, write owner |
/// | 20    | synchronize |
#[bitfield(u32)]
#[derive(PartialEq, Eq)]
pub struct AccessMask {
    pub query_state: bool,
    pub modify_state: bool,
    #[bits(14)]
    __: u16,
    pub delete: bool,
    pub read_control: bool,
    pub write_dac: bool,
    pub write_owner: bool,
    pub synchronize: bool,
    #[bits(11)]
    __: u16,
}

impl AccessMask {
    /// Enough to wait on the event and read its state.
    #[must_use]
    pub const fn observe() -> Self {
        Self::new()
            .with_synchronize(true)
            .with_query_state(true)
            .with_read_control(true)
    }

    #[must_use]
    pub const fn all() -> Self {
        Self::observe()
            .with_modify_state(true)
            .with_delete(true)
            .with_write_dac(true)
            .with_write_owner(true)
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum Principal {
    World,
    Administrators,
    LocalSystem,
}

/// One grant in an event's access list.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AccessEntry {
    pub principal: Principal,
    pub mask: AccessMask,
}

/// Everyone may wait; only administrators and the system may signal.
pub const MEMORY_EVENT_ACCESS: [AccessEntry; 3] = [
    AccessEntry {
        principal: Principal::World,
        mask: AccessMask::observe(),
    },
    AccessEntry {
        principal: Principal::Administrators,
        mask: AccessMask::all(),
    },
    AccessEntry {
        principal: Principal::LocalSystem,
        mask: AccessMask::all(),
    },
];

/// Available-page thresholds. Unlike the pool pairs, `low == high` is
/// allowed here; there is then no gray zone.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct MemoryThresholds {
    low: u64,
    high: u64,
}

impl MemoryThresholds {
    /// Thresholds for a machine with `total_pages`, honoring the MiB
    /// overrides.
    #[must_use]
    pub fn derive(total_pages: u64, overrides: &ConfigOverrides) -> Self {
        let low = match overrides.get(keys::LOW_MEMORY_THRESHOLD) {
            Override::Value(mib) => mib.saturating_mul(mib_to_pages(1)),
            _ => Self::scaled_low(total_pages),
        };
        let high = match overrides.get(keys::HIGH_MEMORY_THRESHOLD) {
            Override::Value(mib) => mib.saturating_mul(mib_to_pages(1)),
            _ => low.saturating_mul(3),
        };
        let thresholds = Self {
            low,
            high: high.max(low),
        };
        log::debug!("memory events: {thresholds}");
        thresholds
    }

    /// Roughly 32 MiB per 4 GiB, capped at 64 MiB.
    const fn scaled_low(total_pages: u64) -> u64 {
        let low = if total_pages > 0x40000 {
            mib_to_pages(32) + ((total_pages - 0x40000) >> 7)
        } else if total_pages > 0x8000 {
            PLENTY_FREE_PAGES + ((total_pages - 0x8000) >> 5)
        } else {
            PLENTY_FREE_PAGES
        };
        if low > mib_to_pages(64) { mib_to_pages(64) } else { low }
    }

    #[inline]
    #[must_use]
    pub const fn low(&self) -> u64 {
        self.low
    }

    #[inline]
    #[must_use]
    pub const fn high(&self) -> u64 {
        self.high
    }
}

impl fmt::Display for MemoryThresholds {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "low {} / high {} pages", self.low, self.high)
    }
}

/// An event slot: a placeholder before Phase1, the named event after.
#[derive(Debug)]
pub enum EventSlot<E> {
    Placeholder,
    Named(E),
}

impl<E: SignalEvent> EventSlot<E> {
    fn set(&self) {
        if let Self::Named(e) = self {
            e.set();
        }
    }

    fn clear(&self) {
        if let Self::Named(e) = self {
            e.clear();
        }
    }

    #[must_use]
    pub fn is_signaled(&self) -> bool {
        match self {
            Self::Placeholder => false,
            Self::Named(e) => e.is_signaled(),
        }
    }

    #[must_use]
    pub const fn is_named(&self) -> bool {
        matches!(self, Self::Named(_))
    }

    fn signal(&self, on: bool) {
        if on {
            self.set();
        } else {
            self.clear();
        }
    }
}

/// The six memory-pressure events.
#[derive(Debug)]
pub struct MemoryEvents<E> {
    thresholds: MemoryThresholds,
    pub low_memory: EventSlot<E>,
    pub high_memory: EventSlot<E>,
    pub low_paged_pool: EventSlot<E>,
    pub high_paged_pool: EventSlot<E>,
    pub low_nonpaged_pool: EventSlot<E>,
    pub high_nonpaged_pool: EventSlot<E>,
}

impl<E> MemoryEvents<E> {
    /// Unsignaled placeholders for Phase0.
    #[must_use]
    pub const fn placeholders(thresholds: MemoryThresholds) -> Self {
        Self {
            thresholds,
            low_memory: EventSlot::Placeholder,
            high_memory: EventSlot::Placeholder,
            low_paged_pool: EventSlot::Placeholder,
            high_paged_pool: EventSlot::Placeholder,
            low_nonpaged_pool: EventSlot::Placeholder,
            high_nonpaged_pool: EventSlot::Placeholder,
        }
    }

    #[inline]
    #[must_use]
    pub const fn thresholds(&self) -> MemoryThresholds {
        self.thresholds
    }
}

impl<E: SignalEvent> MemoryEvents<E> {
    /// Create the named events, memory pair first, then the pool pairs.
    ///
    /// # Errors
    /// The first event the factory fails to create.
    pub fn create<F>(factory: &mut F, thresholds: MemoryThresholds) -> Result<Self, EventError>
    where
        F: EventFactory<Event = E>,
    {
        let mut named = |name: &'static str| -> Result<EventSlot<E>, EventError> {
            let event = factory.create_named(name, &MEMORY_EVENT_ACCESS)?;
            log::debug!("created {name}");
            Ok(EventSlot::Named(event))
        };
        Ok(Self {
            thresholds,
            low_memory: named(LOW_MEMORY_CONDITION)?,
            high_memory: named(HIGH_MEMORY_CONDITION)?,
            low_paged_pool: named(LOW_PAGED_POOL_CONDITION)?,
            high_paged_pool: named(HIGH_PAGED_POOL_CONDITION)?,
            low_nonpaged_pool: named(LOW_NON_PAGED_POOL_CONDITION)?,
            high_nonpaged_pool: named(HIGH_NON_PAGED_POOL_CONDITION)?,
        })
    }

    /// Bring the memory pair in line with `available` pages.
    pub fn notify(&self, available: u64) {
        if available < self.thresholds.low {
            self.high_memory.clear();
            self.low_memory.set();
        } else if available < self.thresholds.high {
            self.low_memory.clear();
            self.high_memory.clear();
        } else {
            self.low_memory.clear();
            self.high_memory.set();
        }
    }

    /// Initial state of the pool pairs given each pool's free pages.
    /// A pool at exactly its low mark counts as low.
    pub fn initialize_pools(&self, thresholds: &PoolThresholds, paged_free: u64, nonpaged_free: u64) {
        signal_pair(&self.low_paged_pool, &self.high_paged_pool, thresholds.paged, paged_free);
        signal_pair(
            &self.low_nonpaged_pool,
            &self.high_nonpaged_pool,
            thresholds.nonpaged,
            nonpaged_free,
        );
    }
}

fn signal_pair<E: SignalEvent>(low: &EventSlot<E>, high: &EventSlot<E>, pair: ThresholdPair, free: u64) {
    high.signal(free >= pair.high());
    low.signal(free <= pair.low());
}

#[cfg(test)]
mod tests {
    use super::*;
    use alloc::vec::Vec;
    use core::cell::Cell;

    #[derive(Debug)]
    struct Flag(Cell<bool>);

    impl SignalEvent for Flag {
        fn set(&self) {
            self.0.set(true);
        }
        fn clear(&self) {
            self.0.set(false);
        }
        fn is_signaled(&self) -> bool {
            self.0.get()
        }
    }

    #[derive(Default)]
    struct Factory {
        names: Vec<&'static str>,
        fail_on: Option<&'static str>,
    }

    impl EventFactory for Factory {
        type Event = Flag;

        fn create_named(&mut self, name: &'static str, access: &[AccessEntry]) -> Result<Flag, EventError> {
            assert_eq!(access, &MEMORY_EVENT_ACCESS);
            if self.fail_on == Some(name) {
                return Err(EventError::NoResources { name });
            }
            self.names.push(name);
            Ok(Flag(Cell::new(false)))
        }
    }

    fn thresholds(low: u64, high: u64) -> MemoryThresholds {
        MemoryThresholds { low, high }
    }

    #[test]
    fn access_masks() {
        assert_eq!(AccessMask::observe().into_bits(), 0x0012_0001);
        assert_eq!(AccessMask::all().into_bits(), 0x001F_0003);
    }

    #[test]
    fn low_threshold_scaling() {
        let none = ConfigOverrides::new();
        assert_eq!(MemoryThresholds::derive(0x4000, &none).low(), PLENTY_FREE_PAGES);
        assert_eq!(
            MemoryThresholds::derive(0x10000, &none).low(),
            PLENTY_FREE_PAGES + (0x8000 >> 5)
        );
        assert_eq!(
            MemoryThresholds::derive(0x140000, &none).low(),
            mib_to_pages(32) + (0x100000 >> 7)
        );
        assert_eq!(MemoryThresholds::derive(1 << 30, &none).low(), mib_to_pages(64));
        assert_eq!(MemoryThresholds::derive(0x10000, &none).high(), 3 * (400 + 1024));
    }

    #[test]
    fn overrides_are_mib_and_high_never_below_low() {
        let o = ConfigOverrides::new()
            .with(keys::LOW_MEMORY_THRESHOLD, 16)
            .with(keys::HIGH_MEMORY_THRESHOLD, 8);
        let t = MemoryThresholds::derive(0x10000, &o);
        assert_eq!(t.low(), 4096);
        assert_eq!(t.high(), 4096);
    }

    #[test]
    fn notify_moves_through_three_states() {
        let events = MemoryEvents::create(&mut Factory::default(), thresholds(100, 300)).unwrap();

        events.notify(50);
        assert!(events.low_memory.is_signaled());
        assert!(!events.high_memory.is_signaled());

        events.notify(200);
        assert!(!events.low_memory.is_signaled());
        assert!(!events.high_memory.is_signaled());

        events.notify(300);
        assert!(!events.low_memory.is_signaled());
        assert!(events.high_memory.is_signaled());
    }

    #[test]
    fn creation_order_and_failure() {
        let mut factory = Factory::default();
        MemoryEvents::create(&mut factory, thresholds(1, 2)).unwrap();
        assert_eq!(
            factory.names,
            [
                LOW_MEMORY_CONDITION,
                HIGH_MEMORY_CONDITION,
                LOW_PAGED_POOL_CONDITION,
                HIGH_PAGED_POOL_CONDITION,
                LOW_NON_PAGED_POOL_CONDITION,
                HIGH_NON_PAGED_POOL_CONDITION,
            ]
        );

        let mut factory = Factory {
            fail_on: Some(LOW_PAGED_POOL_CONDITION),
            ..Factory::default()
        };
        let err = MemoryEvents::create(&mut factory, thresholds(1, 2)).unwrap_err();
        assert_eq!(
            err,
            EventError::NoResources {
                name: LOW_PAGED_POOL_CONDITION
            }
        );
        assert_eq!(factory.names.len(), 2);
    }

    #[test]
    fn placeholders_never_signal() {
        let events = MemoryEvents::<Flag>::placeholders(thresholds(100, 300));
        events.notify(1000);
        assert!(!events.high_memory.is_signaled());
        assert!(!events.high_memory.is_named());
    }

    #[test]
    fn pool_pairs_start_from_free_pages() {
        let events = MemoryEvents::create(&mut Factory::default(), thresholds(1, 2)).unwrap();
        let pools = PoolThresholds {
            paged: ThresholdPair::new(10, 20),
            nonpaged: ThresholdPair::new(10, 20),
        };
        events.initialize_pools(&pools, 20, 10);
        assert!(events.high_paged_pool.is_signaled());
        assert!(!events.low_paged_pool.is_signaled());
        assert!(events.low_nonpaged_pool.is_signaled());
        assert!(!events.high_nonpaged_pool.is_signaled());
    }
}
