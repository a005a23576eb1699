use riscv_uploader_target::MemoryType;

/// A structure to manage progress reporting for the flashing procedure.
///
/// Stores a handler closure which is called for every event during the
/// flashing process. The events are advisory: nothing about the outcome of
/// an upload may be derived from them.
pub struct FlashProgress {
    handler: Box<dyn Fn(ProgressEvent)>,
}

impl FlashProgress {
    /// Create a new `FlashProgress` with a handler to be called on events.
    pub fn new(handler: impl Fn(ProgressEvent) + 'static) -> Self {
        FlashProgress {
            handler: Box::new(handler),
        }
    }

    /// A progress sink that drops every event.
    pub fn ignore() -> Self {
        FlashProgress::new(|_| {})
    }

    fn emit(&self, event: ProgressEvent) {
        (self.handler)(event);
    }

    pub(super) fn region_started(&self, memory: MemoryType, pages: usize, bytes: usize) {
        self.emit(ProgressEvent::RegionStarted {
            memory,
            pages,
            bytes,
        });
    }

    pub(super) fn started_erasing(&self) {
        self.emit(ProgressEvent::StartedErasing);
    }

    pub(super) fn sector_erased(&self, address: u32) {
        self.emit(ProgressEvent::SectorErased { address });
    }

    pub(super) fn finished_erasing(&self) {
        self.emit(ProgressEvent::FinishedErasing);
    }

    pub(super) fn page_programmed(&self, address: u32, size: usize) {
        self.emit(ProgressEvent::PageProgrammed { address, size });
    }

    pub(super) fn region_finished(&self, memory: MemoryType) {
        self.emit(ProgressEvent::RegionFinished { memory });
    }

    pub(super) fn region_failed(&self, memory: MemoryType) {
        self.emit(ProgressEvent::RegionFailed { memory });
    }
}

/// Possible events during the flashing process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEvent {
    /// Work on one memory region has started.
    RegionStarted {
        /// The region being written.
        memory: MemoryType,
        /// Number of pages to be written.
        pages: usize,
        /// Number of bytes to be written.
        bytes: usize,
    },
    /// Erasing has started.
    StartedErasing,
    /// One erase unit finished.
    SectorErased {
        /// Start address of the erased sector.
        address: u32,
    },
    /// Erasing finished successfully.
    FinishedErasing,
    /// A page has been programmed and verified.
    PageProgrammed {
        /// Device address of the page.
        address: u32,
        /// Page size in bytes.
        size: usize,
    },
    /// The region completed successfully.
    RegionFinished {
        /// The completed region.
        memory: MemoryType,
    },
    /// The region failed; no further events follow for it.
    RegionFailed {
        /// The failed region.
        memory: MemoryType,
    },
}
