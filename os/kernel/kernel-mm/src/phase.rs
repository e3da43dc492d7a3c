//! # Phase Sequencer
//!
//! ```text
//!  Phase0 ──▶ Phase1 ──▶ Phase2 ──▶ Complete
//!    │          │          │
//!    └──────────┴──────────┴──▶ Failed
//! ```
//!
//! The host boot sequence calls each phase exactly once, in order. A phase
//! that fails leaves the sequencer in [`BootPhase::Failed`], and every later
//! call is refused.
//!
//! * **Phase0** runs single-threaded: physical memory map, frame validity,
//!   layout, tunables, resident budget, the system cache working-set page and
//!   paged pool.
//! * **Phase1** maps the shared user data page, creates the memory events and
//!   starts the memory manager's system threads.
//! * **Phase2** lets boot-only code become pageable. It never fails.

use crate::budget::{CommitCounter, DerivedLimits, ResidentBudget};
use crate::cartographer::{IncludeSet, PhysicalMemoryMap};
use crate::collaborators::{EventFactory, ExecutivePager, SignalEvent, SystemThread, ThreadSpawner};
use crate::config::BootConfig;
use crate::context::{BootstrapContext, MmView};
use crate::error::BootstrapError;
use crate::events::{MemoryEvents, MemoryThresholds};
use crate::frame_validity::FrameValidityBitmap;
use crate::layout::{LayoutInputs, Platform, PlatformVisitor, plan};
use crate::pool::{PagedPoolState, PoolSizingConfig, PoolThresholds};
use crate::shared_page::SharedUserData;
use crate::size_class::Tunables;
use core::fmt;
use kernel_info::boot::BootHandoff;
use kernel_memory_addresses::{FrameNumber, PageSize, Size4K, VirtualRange};
use kernel_sync::SpinMutex;
use kernel_vmem::{
    FrameArena, FrameLock, HierarchyError, PageTableHierarchy, PagingDepth, Protection,
    ZeroedFrameSource,
};

/// Fewest physical pages the system can boot with.
pub const MINIMUM_PHYSICAL_PAGES: u64 = 1100;

#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum BootPhase {
    Phase0,
    Phase1,
    Phase2,
    Complete,
    Failed,
}

impl BootPhase {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Phase0 => "phase 0",
            Self::Phase1 => "phase 1",
            Self::Phase2 => "phase 2",
            Self::Complete => "complete",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for BootPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Drives the boot phases for platform `P`, with memory events of type `E`.
pub struct PhaseSequencer<P: Platform, E> {
    phase: BootPhase,
    config: BootConfig,
    context: Option<BootstrapContext<P, E>>,
}

impl<P: Platform, E: SignalEvent> PhaseSequencer<P, E> {
    #[must_use]
    pub fn new(config: BootConfig) -> Self {
        debug_assert_eq!(config.architecture, P::CONSTANTS.architecture);
        Self {
            phase: BootPhase::Phase0,
            config,
            context: None,
        }
    }

    #[inline]
    #[must_use]
    pub const fn phase(&self) -> BootPhase {
        self.phase
    }

    /// State built so far; `None` until Phase0 succeeds.
    #[inline]
    #[must_use]
    pub const fn context(&self) -> Option<&BootstrapContext<P, E>> {
        self.context.as_ref()
    }

    #[must_use]
    pub fn view(&self) -> Option<MmView<'_>> {
        self.context.as_ref().map(BootstrapContext::view)
    }

    /// Describe physical memory, plan the address space and build the
    /// first page tables and paged pool.
    ///
    /// # Errors
    /// Too little memory, frames or resident budget, or an inconsistent
    /// layout.
    pub fn phase0<S: ZeroedFrameSource>(
        &mut self,
        handoff: &BootHandoff<'_>,
        frames: &FrameLock<S>,
    ) -> Result<(), BootstrapError> {
        self.advance(BootPhase::Phase0, BootPhase::Phase1, |seq| {
            let context = seq.build_context(handoff, frames)?;
            seq.context = Some(context);
            Ok(())
        })
    }

    /// Map the shared user data page, create the memory events and start
    /// the system threads.
    ///
    /// # Errors
    /// Any frame, event or thread that could not be created.
    pub fn phase1<S, T, F>(&mut self, frames: &FrameLock<S>, threads: &mut T, factory: &mut F) -> Result<(), BootstrapError>
    where
        S: ZeroedFrameSource,
        T: ThreadSpawner,
        F: EventFactory<Event = E>,
    {
        self.advance(BootPhase::Phase1, BootPhase::Phase2, |seq| {
            let ctx = seq.context.as_mut().ok_or(BootstrapError::OutOfOrder)?;

            let (shared, allocated) = SharedUserData::map(ctx.layout.shared_user_data, &mut ctx.tables, frames)?;
            ctx.budget.charge(allocated)?;
            ctx.shared_user_data = Some(shared);

            threads.spawn(SystemThread::ModifiedPageWriter)?;

            ctx.events = MemoryEvents::create(factory, ctx.events.thresholds())?;
            let paged_free = ctx.paged_pool.with_lock(|pool| pool.size_in_pages());
            ctx.events
                .initialize_pools(&ctx.pool_thresholds, paged_free, ctx.layout.nonpaged_pool.maximum_pages());
            ctx.events.notify(ctx.budget.remaining());

            threads.spawn(SystemThread::BalanceSetManager)?;
            threads.spawn(SystemThread::SwapWorker)?;
            Ok(())
        })
    }

    /// Make boot-only code pageable. A pager failure is logged and boot
    /// goes on.
    ///
    /// # Errors
    /// Only when called out of order.
    pub fn phase2<X: ExecutivePager>(&mut self, pager: &mut X) -> Result<(), BootstrapError> {
        self.advance(BootPhase::Phase2, BootPhase::Complete, |_| {
            if let Err(e) = pager.make_boot_code_pageable() {
                log::warn!("{e}");
            }
            Ok(())
        })
    }

    fn advance(
        &mut self,
        expected: BootPhase,
        next: BootPhase,
        run: impl FnOnce(&mut Self) -> Result<(), BootstrapError>,
    ) -> Result<(), BootstrapError> {
        if self.phase != expected {
            log::error!("{expected} requested while in {}", self.phase);
            return Err(BootstrapError::OutOfOrder);
        }
        match run(self) {
            Ok(()) => {
                log::info!("memory manager {expected} done");
                self.phase = next;
                Ok(())
            }
            Err(e) => {
                log::error!("memory manager {expected} failed: {e} [{}]", e.stop_code());
                self.phase = BootPhase::Failed;
                Err(e)
            }
        }
    }

    fn build_context<S: ZeroedFrameSource>(
        &self,
        handoff: &BootHandoff<'_>,
        frames: &FrameLock<S>,
    ) -> Result<BootstrapContext<P, E>, BootstrapError> {
        let c = P::CONSTANTS;
        let overrides = &self.config.overrides;

        let map = PhysicalMemoryMap::build(handoff.descriptors, IncludeSet::default())?;
        let total_pages = map.total_pages();
        let available_pages = map.free_pages();
        if total_pages < MINIMUM_PHYSICAL_PAGES || available_pages == 0 {
            return Err(BootstrapError::InsufficientMemory {
                total_pages,
                free_pages: available_pages,
            });
        }
        log::info!("{} physical runs, {total_pages} pages, {available_pages} free", map.runs().len());

        let validity = FrameValidityBitmap::build(&map, handoff.highest_possible_frame)?;

        let inputs = LayoutInputs::gather(handoff, &map, &self.config);
        let layout = plan::<P>(&inputs, overrides)?;
        layout.validate::<P::Depth>()?;

        let tunables = Tunables::derive(total_pages, self.config.product);
        log::info!("{} system, {tunables:?}", tunables.size_class);

        let mut budget = ResidentBudget::new(
            available_pages,
            layout.nonpaged_pool.initial_pages(),
            tunables.system_cache_ws_minimum,
        )?;

        let mut tables = Self::root_hierarchy(handoff.highest_possible_frame, frames)?;

        let cache_ws = VirtualRange::from_len(layout.system_cache_working_set.start(), Size4K::SIZE)
            .ok_or(HierarchyError::InvalidRange(layout.system_cache_working_set))?;
        let cache_frames = tables.back_with_frames(cache_ws, Protection::kernel_rw(), frames)?;
        budget.charge(cache_frames)?;

        let sizing = PoolSizingConfig::new(overrides, self.config.product, total_pages, available_pages);
        let pool = PagedPoolState::build(&layout, &sizing, &mut tables, frames, &mut budget)?;
        let pool_thresholds = PoolThresholds::derive(pool.size_in_bytes(), layout.nonpaged_pool.maximum_bytes);
        log::info!("paged pool {}, nonpaged pool {}", pool_thresholds.paged, pool_thresholds.nonpaged);

        let limits = DerivedLimits::derive(
            c,
            available_pages,
            total_pages,
            layout.split.maximum_working_set,
            overrides,
        );
        let mut commit = CommitCounter::new();
        commit.set_limit(limits.commit_limit);
        commit.commit(pool.committed_pages());

        log::info!(
            "resident budget {} pages after {} table and pool frames",
            budget.remaining(),
            budget.charged()
        );

        Ok(BootstrapContext {
            config: self.config.clone(),
            map,
            validity,
            layout,
            tunables,
            budget,
            commit,
            limits,
            tables,
            paged_pool: SpinMutex::new(pool),
            pool_thresholds,
            events: MemoryEvents::placeholders(MemoryThresholds::derive(total_pages, overrides)),
            shared_user_data: None,
            available_pages,
        })
    }

    /// A hierarchy whose tables may live in any frame up to `highest`.
    fn root_hierarchy<S: ZeroedFrameSource>(
        highest: FrameNumber,
        frames: &FrameLock<S>,
    ) -> Result<PageTableHierarchy<P::Depth>, HierarchyError> {
        let root = frames.take_zeroed().map_err(|cause| HierarchyError::OutOfFrames {
            level: <P::Depth as PagingDepth>::root_level(),
            cause,
        })?;
        let arena = FrameArena::new(FrameNumber::new(0), highest.as_u64().saturating_add(1));
        PageTableHierarchy::new(arena, root)
    }
}

/// Runs all three phases for whichever platform `config` names, then hands
/// the finished view to `ready`.
pub struct FullBoot<'a, S, T, F, X, R> {
    pub config: &'a BootConfig,
    pub handoff: &'a BootHandoff<'a>,
    pub frames: &'a FrameLock<S>,
    pub threads: &'a mut T,
    pub factory: &'a mut F,
    pub pager: &'a mut X,
    pub ready: R,
}

impl<S, T, F, X, R> PlatformVisitor for FullBoot<'_, S, T, F, X, R>
where
    S: ZeroedFrameSource,
    T: ThreadSpawner,
    F: EventFactory,
    X: ExecutivePager,
    R: FnOnce(MmView<'_>),
{
    type Output = Result<(), BootstrapError>;

    fn visit<P: Platform>(self) -> Self::Output {
        let mut sequencer = PhaseSequencer::<P, F::Event>::new(self.config.clone());
        sequencer.phase0(self.handoff, self.frames)?;
        sequencer.phase1(self.frames, self.threads, self.factory)?;
        sequencer.phase2(self.pager)?;
        let view = sequencer.view().ok_or(BootstrapError::OutOfOrder)?;
        (self.ready)(view);
        Ok(())
    }
}

/// Boot the memory manager on the architecture `config` selects.
///
/// # Errors
/// The first phase that fails.
pub fn boot<S, T, F, X, R>(
    config: &BootConfig,
    handoff: &BootHandoff<'_>,
    frames: &FrameLock<S>,
    threads: &mut T,
    factory: &mut F,
    pager: &mut X,
    ready: R,
) -> Result<(), BootstrapError>
where
    S: ZeroedFrameSource,
    T: ThreadSpawner,
    F: EventFactory,
    X: ExecutivePager,
    R: FnOnce(MmView<'_>),
{
    config.architecture.dispatch(FullBoot {
        config,
        handoff,
        frames,
        threads,
        factory,
        pager,
        ready,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::{PagerError, ThreadStartError};
    use crate::config::{Architecture, ConfigOverrides, ProductType, keys};
    use crate::events::{AccessEntry, EventError};
    use crate::layout::X86Platform;
    use crate::testing::BumpFrames;
    use alloc::vec::Vec;
    use core::cell::Cell;
    use kernel_info::memory::{MemoryDescriptor, MemoryType};

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
    struct Host {
        started: Vec<SystemThread>,
        events: usize,
        fail_thread: Option<SystemThread>,
        pager_fails: bool,
        paged_out: bool,
    }

    impl ThreadSpawner for Host {
        fn spawn(&mut self, thread: SystemThread) -> Result<(), ThreadStartError> {
            if self.fail_thread == Some(thread) {
                return Err(ThreadStartError { thread });
            }
            self.started.push(thread);
            Ok(())
        }
    }

    impl EventFactory for Host {
        type Event = Flag;

        fn create_named(&mut self, _: &'static str, _: &[AccessEntry]) -> Result<Flag, EventError> {
            self.events += 1;
            Ok(Flag(Cell::new(false)))
        }
    }

    impl ExecutivePager for Host {
        fn make_boot_code_pageable(&mut self) -> Result<(), PagerError> {
            self.paged_out = !self.pager_fails;
            if self.pager_fails { Err(PagerError) } else { Ok(()) }
        }
    }

    const PAGES: u64 = 0x8000;

    fn descriptors() -> [MemoryDescriptor; 2] {
        [
            MemoryDescriptor::new(MemoryType::SystemCode, 0, 0x400),
            MemoryDescriptor::new(MemoryType::Free, 0x400, PAGES - 0x400),
        ]
    }

    fn frames() -> FrameLock<BumpFrames> {
        FrameLock::new(BumpFrames::new(0x1000, PAGES))
    }

    fn sequencer() -> PhaseSequencer<X86Platform, Flag> {
        PhaseSequencer::new(BootConfig::new(Architecture::X86))
    }

    #[test]
    fn phases_run_in_order() {
        let descs = descriptors();
        let handoff = BootHandoff::new(&descs, FrameNumber::new(PAGES - 1));
        let frames = frames();
        let mut host = Host::default();
        let mut seq = sequencer();

        seq.phase0(&handoff, &frames).unwrap();
        assert_eq!(seq.phase(), BootPhase::Phase1);
        let view = seq.view().unwrap();
        assert_eq!(view.memory_map().total_pages(), PAGES);
        assert!(view.paged_pool().with_lock(|p| p.size_in_pages()) > 0);
        assert!(view.shared_user_data().is_none());

        let mut events = Host::default();
        seq.phase1(&frames, &mut host, &mut events).unwrap();
        assert_eq!(
            host.started,
            [
                SystemThread::ModifiedPageWriter,
                SystemThread::BalanceSetManager,
                SystemThread::SwapWorker
            ]
        );
        assert_eq!(events.events, 6);
        assert!(seq.view().unwrap().shared_user_data().is_some());

        seq.phase2(&mut host).unwrap();
        assert!(host.paged_out);
        assert_eq!(seq.phase(), BootPhase::Complete);
    }

    #[test]
    fn phases_cannot_be_repeated_or_skipped() {
        let mut host = Host::default();
        let mut events = Host::default();
        let mut seq = sequencer();
        assert_eq!(seq.phase1(&frames(), &mut host, &mut events), Err(BootstrapError::OutOfOrder));
        assert_eq!(seq.phase(), BootPhase::Phase0);

        let descs = descriptors();
        let handoff = BootHandoff::new(&descs, FrameNumber::new(PAGES - 1));
        let frames = frames();
        seq.phase0(&handoff, &frames).unwrap();
        assert_eq!(seq.phase0(&handoff, &frames), Err(BootstrapError::OutOfOrder));
    }

    #[test]
    fn thread_failure_is_fatal() {
        let descs = descriptors();
        let handoff = BootHandoff::new(&descs, FrameNumber::new(PAGES - 1));
        let frames = frames();
        let mut host = Host {
            fail_thread: Some(SystemThread::BalanceSetManager),
            ..Host::default()
        };
        let mut events = Host::default();
        let mut seq = sequencer();
        seq.phase0(&handoff, &frames).unwrap();

        let err = seq.phase1(&frames, &mut host, &mut events).unwrap_err();
        assert_eq!(err.stop_code(), crate::error::StopCode::CollaboratorFailed);
        assert_eq!(seq.phase(), BootPhase::Failed);
        assert_eq!(host.started, [SystemThread::ModifiedPageWriter]);
        assert_eq!(seq.phase2(&mut host), Err(BootstrapError::OutOfOrder));
    }

    #[test]
    fn pager_failure_is_not_fatal() {
        let descs = descriptors();
        let handoff = BootHandoff::new(&descs, FrameNumber::new(PAGES - 1));
        let frames = frames();
        let mut host = Host {
            pager_fails: true,
            ..Host::default()
        };
        let mut events = Host::default();
        let mut seq = sequencer();
        seq.phase0(&handoff, &frames).unwrap();
        seq.phase1(&frames, &mut host, &mut events).unwrap();
        assert_eq!(seq.phase2(&mut host), Ok(()));
        assert_eq!(seq.phase(), BootPhase::Complete);
    }

    #[test]
    fn table_frames_are_charged() {
        let descs = descriptors();
        let handoff = BootHandoff::new(&descs, FrameNumber::new(PAGES - 1));
        let frames = frames();
        let mut seq = sequencer();
        seq.phase0(&handoff, &frames).unwrap();

        let ctx = seq.context().unwrap();
        // Root excluded: cache working-set table and page, then the first
        // paged pool page table.
        assert_eq!(ctx.budget.charged(), 3);
        assert_eq!(ctx.tables().frames_allocated(), 3);
        assert_eq!(frames.with_source(|s| s.taken), 4);
    }

    #[test]
    fn memory_events_follow_what_is_left_after_phase0() {
        let descs = descriptors();
        let handoff = BootHandoff::new(&descs, FrameNumber::new(PAGES - 1));
        let frames = frames();
        let free_mib = (PAGES - 0x400) >> 8;
        let overrides = ConfigOverrides::new().with(keys::HIGH_MEMORY_THRESHOLD, i64::try_from(free_mib).unwrap());
        let config = BootConfig::new(Architecture::X86).with_overrides(overrides);
        let mut seq = PhaseSequencer::<X86Platform, Flag>::new(config);
        let (mut host, mut events) = (Host::default(), Host::default());

        seq.phase0(&handoff, &frames).unwrap();
        seq.phase1(&frames, &mut host, &mut events).unwrap();

        let ctx = seq.context().unwrap();
        // Every free page was counted before the tables and shared page
        // were taken out of it.
        assert_eq!(ctx.view().available_pages(), ctx.events().thresholds().high());
        assert!(ctx.view().resident_available() < ctx.events().thresholds().high());
        assert!(!ctx.events().high_memory.is_signaled());
        assert!(!ctx.events().low_memory.is_signaled());
    }

    #[test]
    fn full_boot_dispatches_on_architecture() {
        let descs = descriptors();
        let handoff = BootHandoff::new(&descs, FrameNumber::new(PAGES - 1));
        let frames = frames();
        let config = BootConfig::new(Architecture::X86Pae).with_product(ProductType::Server);
        let (mut threads, mut factory, mut pager) = (Host::default(), Host::default(), Host::default());

        let mut seen = None;
        boot(&config, &handoff, &frames, &mut threads, &mut factory, &mut pager, |view| {
            seen = Some(view.layout().architecture);
        })
        .unwrap();
        assert_eq!(seen, Some(Architecture::X86Pae));
        assert_eq!(threads.started.len(), 3);
    }
}
