//! Deferred deallocation of retired renderers
//!
//! A renderer for a 14-channel HRIR holds dozens of convolvers, FFT plans
//! and partition arenas. Freeing all of that inside the audio callback
//! could blow the deadline, so renderers cross into the pipeline as
//! `basedrop::Owned<T>`: dropping one on the audio thread only enqueues a
//! pointer, and the memory is released here on the GC thread.
//!
//! ```ignore
//! use basedrop::Owned;
//! use crate::engine::gc::gc_handle;
//!
//! let renderer = Owned::new(&gc_handle(), spatial_renderer);
//! // dropped later on the audio thread: freed on `renderer-gc`
//! ```

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// How often the collector sweeps
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    let spawned = thread::Builder::new()
        .name("renderer-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives on this thread only
            let mut collector = Collector::new();
            if tx.send(collector.handle()).is_err() {
                return;
            }

            log::info!("Renderer GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        });

    match spawned.ok().and_then(|_| rx.recv().ok()) {
        Some(handle) => handle,
        None => {
            log::error!("Failed to start renderer GC thread; retired renderers will leak");
            let collector: &'static mut Collector = Box::leak(Box::new(Collector::new()));
            collector.handle()
        }
    }
}

/// Handle for allocating `Owned<T>`/`Shared<T>` values collected off the audio thread
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}
