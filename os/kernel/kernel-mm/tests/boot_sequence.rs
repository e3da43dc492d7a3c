use kernel_info::boot::BootHandoff;
use kernel_info::memory::{MemoryDescriptor, MemoryType};
use kernel_log::{BootLogger, MemorySink};
use kernel_memory_addresses::FrameNumber;
use kernel_mm::cartographer::{IncludeSet, PhysicalMemoryMap, PhysicalRun};
use kernel_mm::collaborators::{
    EventFactory, ExecutivePager, PagerError, SignalEvent, SystemThread, ThreadSpawner, ThreadStartError,
};
use kernel_mm::events::{self, AccessEntry, EventError, MEMORY_EVENT_ACCESS};
use kernel_mm::layout::{Amd64Platform, Platform, X86Platform};
use kernel_mm::{Architecture, BootConfig, BootPhase, PhaseOutcome, PhaseSequencer, StopCode};
use kernel_sync::SyncOnceCell;
use kernel_vmem::{FrameLock, FrameTake, ZeroedFrameSource};
use log::LevelFilter;
use std::sync::atomic::{AtomicBool, Ordering};

type Sink = MemorySink<512, 160>;

static LOGGER: SyncOnceCell<BootLogger<Sink>> = SyncOnceCell::new();

fn logger() -> &'static BootLogger<Sink> {
    let _ = BootLogger::new(Sink::new(), LevelFilter::Info).install(&LOGGER);
    LOGGER.get().unwrap()
}

struct BumpFrames {
    next: u64,
    end: u64,
    taken: u64,
}

impl BumpFrames {
    fn new(start: u64, end: u64) -> Self {
        Self { next: start, end, taken: 0 }
    }
}

impl ZeroedFrameSource for BumpFrames {
    fn try_take_zeroed(&mut self) -> FrameTake {
        if self.next >= self.end {
            return FrameTake::Exhausted;
        }
        self.next += 1;
        self.taken += 1;
        FrameTake::Frame(FrameNumber::new(self.next - 1))
    }

    fn available(&self) -> u64 {
        self.end - self.next
    }
}

#[derive(Debug, Default)]
struct Flag(AtomicBool);

impl SignalEvent for Flag {
    fn set(&self) {
        self.0.store(true, Ordering::Release);
    }

    fn clear(&self) {
        self.0.store(false, Ordering::Release);
    }

    fn is_signaled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Records every call the sequencer makes into the host.
#[derive(Default)]
struct Recorder {
    threads: Vec<SystemThread>,
    events: Vec<&'static str>,
    pager_calls: u32,
}

impl Recorder {
    fn is_untouched(&self) -> bool {
        self.threads.is_empty() && self.events.is_empty() && self.pager_calls == 0
    }
}

impl ThreadSpawner for Recorder {
    fn spawn(&mut self, thread: SystemThread) -> Result<(), ThreadStartError> {
        self.threads.push(thread);
        Ok(())
    }
}

impl EventFactory for Recorder {
    type Event = Flag;

    fn create_named(&mut self, name: &'static str, access: &[AccessEntry]) -> Result<Flag, EventError> {
        assert_eq!(access, MEMORY_EVENT_ACCESS);
        if self.events.contains(&name) {
            return Err(EventError::NameCollision { name });
        }
        self.events.push(name);
        Ok(Flag::default())
    }
}

impl ExecutivePager for Recorder {
    fn make_boot_code_pageable(&mut self) -> Result<(), PagerError> {
        self.pager_calls += 1;
        Ok(())
    }
}

fn small_map() -> [MemoryDescriptor; 3] {
    [
        MemoryDescriptor::new(MemoryType::Free, 100, 50),
        MemoryDescriptor::new(MemoryType::Free, 150, 25),
        MemoryDescriptor::new(MemoryType::Free, 400, 10),
    ]
}

#[test]
fn adjacent_extents_coalesce() {
    let map = PhysicalMemoryMap::build(&small_map(), IncludeSet::default()).unwrap();
    assert_eq!(map.runs(), [PhysicalRun::new(100, 75), PhysicalRun::new(400, 10)]);
    assert_eq!(map.total_pages(), 85);
}

#[test]
fn too_little_memory_stops_in_phase0() {
    let log = logger();
    let descs = small_map();
    let handoff = BootHandoff::new(&descs, FrameNumber::new(409));
    let frames = FrameLock::new(BumpFrames::new(100, 175));
    let mut host = Recorder::default();
    let mut seq = PhaseSequencer::<X86Platform, Flag>::new(BootConfig::new(Architecture::X86));

    let result = seq.phase0(&handoff, &frames);
    assert!(!result.is_success());
    assert_eq!(result.stop_code(), Some(StopCode::InstallMoreMemory));
    assert_eq!(seq.phase(), BootPhase::Failed);
    assert!(seq.view().is_none());

    let mut events = Recorder::default();
    assert!(!seq.phase1(&frames, &mut host, &mut events).is_success());
    assert!(!seq.phase2(&mut host).is_success());
    assert!(host.is_untouched());
    assert!(events.is_untouched());
    assert_eq!(frames.with_source(|s| s.taken), 0);

    let failed = log.with_sink(|s| s.lines().any(|l| l.starts_with("[ERROR]") && l.contains("phase 0 failed")));
    assert!(failed);
}

#[test]
fn frame_exhaustion_is_fatal() {
    let descs = [MemoryDescriptor::new(MemoryType::Free, 0, 0x4000)];
    let handoff = BootHandoff::new(&descs, FrameNumber::new(0x3FFF));
    let frames = FrameLock::new(BumpFrames::new(0x100, 0x102));
    let mut seq = PhaseSequencer::<X86Platform, Flag>::new(BootConfig::new(Architecture::X86));

    let result = seq.phase0(&handoff, &frames);
    assert_eq!(result.stop_code(), Some(StopCode::NoPagesAvailable));
    assert_eq!(seq.phase(), BootPhase::Failed);
}

#[test]
fn map_above_reported_highest_frame_is_fatal() {
    let descs = [MemoryDescriptor::new(MemoryType::Free, 0, 0x8000)];
    let handoff = BootHandoff::new(&descs, FrameNumber::new(0x4000));
    let frames = FrameLock::new(BumpFrames::new(0x100, 0x8000));
    let mut seq = PhaseSequencer::<X86Platform, Flag>::new(BootConfig::new(Architecture::X86));

    let result = seq.phase0(&handoff, &frames);
    assert_eq!(result.stop_code(), Some(StopCode::InstallMoreMemoryBitmap));
    assert_eq!(seq.phase(), BootPhase::Failed);
    assert_eq!(frames.with_source(|s| s.taken), 0);
}

#[test]
fn amd64_boots_through_all_phases() {
    logger();
    const PAGES: u64 = 0x40000;
    let descs = [
        MemoryDescriptor::new(MemoryType::FirmwarePermanent, 0, 0x100),
        MemoryDescriptor::new(MemoryType::SystemCode, 0x100, 0x700),
        MemoryDescriptor::new(MemoryType::Free, 0x800, PAGES - 0x800),
    ];
    let handoff = BootHandoff::new(&descs, FrameNumber::new(PAGES - 1));
    let frames = FrameLock::new(BumpFrames::new(0x1000, PAGES));
    let mut host = Recorder::default();
    let mut factory = Recorder::default();
    let mut seq = PhaseSequencer::<Amd64Platform, Flag>::new(BootConfig::new(Architecture::Amd64));

    seq.phase0(&handoff, &frames).unwrap();
    {
        let view = seq.view().unwrap();
        assert_eq!(view.memory_map().runs(), [PhysicalRun::new(0x100, PAGES - 0x100)]);
        assert_eq!(view.frame_validity().valid_pages(), PAGES - 0x100);
        assert_eq!(view.layout().validate::<<Amd64Platform as Platform>::Depth>(), Ok(()));

        let pool = view.paged_pool().lock();
        assert_eq!(pool.range().start(), view.layout().paged_pool.start());
        assert_eq!(pool.size_in_bytes() % (2 << 20), 0);
        assert!(pool.size_in_bytes() <= view.layout().paged_pool_maximum());
        assert!(view.resident_available() < PAGES);
    }
    assert!(factory.is_untouched());

    seq.phase1(&frames, &mut host, &mut factory).unwrap();
    assert_eq!(
        host.threads,
        [
            SystemThread::ModifiedPageWriter,
            SystemThread::BalanceSetManager,
            SystemThread::SwapWorker,
        ]
    );
    assert_eq!(
        factory.events,
        [
            events::LOW_MEMORY_CONDITION,
            events::HIGH_MEMORY_CONDITION,
            events::LOW_PAGED_POOL_CONDITION,
            events::HIGH_PAGED_POOL_CONDITION,
            events::LOW_NON_PAGED_POOL_CONDITION,
            events::HIGH_NON_PAGED_POOL_CONDITION,
        ]
    );

    let ctx = seq.context().unwrap();
    let signals = ctx.events();
    assert!(signals.high_memory.is_signaled());
    assert!(!signals.low_memory.is_signaled());
    assert!(signals.high_paged_pool.is_signaled());
    assert!(!signals.low_nonpaged_pool.is_signaled());

    let shared = ctx.shared_user_data().unwrap();
    assert_eq!(ctx.tables().translate(shared.page.start()), Some(shared.frame));
    assert!(shared.frame.as_u64() < PAGES);

    seq.phase2(&mut host).unwrap();
    assert_eq!(host.pager_calls, 1);
    assert_eq!(seq.phase(), BootPhase::Complete);
}
