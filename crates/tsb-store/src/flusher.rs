//! Background deletion of flushed generations.
//!
//! The flusher sleeps until woken, then deletes generation directories from
//! `flush` up to (not including) `active`, advancing `flush` after each one.
//! How many times it was woken does not matter: one wake drains everything
//! queued so far. Only on shutdown does it also delete the active generation,
//! after which the thread exits.

use crate::backend::SegmentFs;
use crate::layout::GenerationLayout;
use crate::log::{tsb_log, Logger};
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::thread::{self, JoinHandle};

/// The two generation counters shared by the API and the flusher.
///
/// `flush <= active` always holds. Writes land in `active`; generations below
/// `active` are logically gone, and `flush` is the one being deleted (or the
/// next to be deleted).
#[derive(Debug)]
pub struct Generations {
    flush: AtomicU32,
    active: AtomicU32,
}

impl Generations {
    pub fn new(flush: u32, active: u32) -> Self {
        debug_assert!(flush <= active);
        Self {
            flush: AtomicU32::new(flush),
            active: AtomicU32::new(active),
        }
    }

    #[inline]
    pub fn active(&self) -> u32 {
        self.active.load(Ordering::SeqCst)
    }

    #[inline]
    pub fn flush(&self) -> u32 {
        self.flush.load(Ordering::SeqCst)
    }

    /// True while an older generation is queued for deletion or being
    /// deleted, so the disk may hold more data than the accounting says.
    #[inline]
    pub fn in_flush_window(&self) -> bool {
        self.flush() != self.active()
    }

    /// Start a new generation. Returns the previous active generation.
    pub fn advance_active(&self) -> u32 {
        self.active.fetch_add(1, Ordering::SeqCst)
    }

    fn advance_flush(&self) {
        self.flush.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug, Default)]
struct SignalState {
    pending: bool,
    shutdown: bool,
}

/// Wake-up flag for the flusher. Wakes do not accumulate.
#[derive(Debug, Default)]
pub struct WakeSignal {
    state: Mutex<SignalState>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn wake(&self) {
        self.lock().pending = true;
        self.cond.notify_one();
    }

    fn request_shutdown(&self) {
        self.lock().shutdown = true;
        self.cond.notify_one();
    }

    /// Block until woken. Returns whether shutdown was requested.
    fn wait(&self) -> bool {
        let mut state = self.lock();
        while !state.pending && !state.shutdown {
            state = self.cond.wait(state).unwrap_or_else(PoisonError::into_inner);
        }
        state.pending = false;
        state.shutdown
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, SignalState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Everything the flusher thread needs, shared with the owning store.
pub struct FlushContext {
    pub layout: GenerationLayout,
    pub generations: Arc<Generations>,
    pub fs: Arc<dyn SegmentFs>,
    pub logger: Logger,
}

impl FlushContext {
    fn purge(&self, generation: u32) {
        let dir = self.layout.generation_dir(generation);
        tsb_log!(self.logger, Mil, "Flush storage content", "flush_directory" => dir.display());
        match self.fs.remove_dir_all(&dir) {
            Ok(removed) => {
                tsb_log!(self.logger, Mil, "Flush storage content complete",
                    "num_removed" => removed);
            }
            Err(e) => {
                tsb_log!(self.logger, Error, "Failed to delete files",
                    "flush_directory" => dir.display(), "error" => e);
            }
        }
    }

    fn run(&self, signal: &WakeSignal) {
        tsb_log!(self.logger, Trace, "Flusher thread running");
        loop {
            let shutdown = signal.wait();

            while self.generations.flush() < self.generations.active() {
                self.purge(self.generations.flush());
                self.generations.advance_flush();
            }

            if shutdown {
                self.purge(self.generations.flush());
                break;
            }
        }
        tsb_log!(self.logger, Trace, "Exit flusher");
    }
}

/// Handle to the flusher thread. Dropping it performs the final drain and
/// blocks until the thread exits.
pub struct Flusher {
    signal: Arc<WakeSignal>,
    handle: Option<JoinHandle<()>>,
    logger: Logger,
}

impl Flusher {
    pub fn spawn(ctx: FlushContext) -> io::Result<Self> {
        let signal = Arc::new(WakeSignal::default());
        let logger = ctx.logger.clone();
        let thread_signal = Arc::clone(&signal);
        let handle = thread::Builder::new()
            .name("tsb-flusher".to_owned())
            .spawn(move || ctx.run(&thread_signal))?;

        Ok(Self {
            signal,
            handle: Some(handle),
            logger,
        })
    }

    #[inline]
    pub fn wake(&self) {
        self.signal.wake();
    }

    /// Delete every remaining generation, including the active one, and wait
    /// for the thread to exit. Idempotent.
    pub fn shutdown(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.signal.request_shutdown();
        if handle.join().is_err() {
            tsb_log!(self.logger, Error, "Flusher thread panicked");
        }
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.shutdown();
    }
}
