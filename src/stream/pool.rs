//! Stream handle registry: per-thread cached handles or a bounded shared
//! pool with blocking acquire.

use super::data_output::ByteDataOutput;
use parking_lot::{Condvar, Mutex};
use std::cell::RefCell;
use std::collections::HashMap;

/// Initial capacity of a fresh output buffer.
const DEFAULT_BUFFER_CAPACITY: usize = 4 * 1024;

/// Soft cap on retained buffer capacity. A handle whose buffer grew past
/// this is given a fresh, smaller buffer on release.
const MAX_RETAINED_CAPACITY: usize = 512 * 1024;

/// Reusable write-side state: the output buffer and the identity→position
/// handle table. Owned by one thread for the duration of one marshal call.
pub(crate) struct OutputHandle {
    pub(crate) buf: ByteDataOutput,
    pub(crate) handles: HashMap<usize, u32>,
}

impl OutputHandle {
    fn new() -> OutputHandle {
        OutputHandle {
            buf: ByteDataOutput::with_capacity(DEFAULT_BUFFER_CAPACITY),
            handles: HashMap::new(),
        }
    }

    fn reset(&mut self) {
        if self.buf.capacity() > MAX_RETAINED_CAPACITY {
            tracing::trace!(
                capacity = self.buf.capacity(),
                "shrinking oversized stream buffer"
            );
            self.buf = ByteDataOutput::with_capacity(DEFAULT_BUFFER_CAPACITY);
        } else {
            self.buf.clear();
        }
        self.handles.clear();
    }
}

/// Read-side handle. The read path borrows its input and allocates its
/// handle table per call, so in pooled mode this is the bounded-concurrency
/// token.
pub(crate) struct InputHandle;

struct Pool<T> {
    slots: Mutex<Vec<T>>,
    available: Condvar,
}

impl<T> Pool<T> {
    fn new(items: Vec<T>) -> Pool<T> {
        Pool {
            slots: Mutex::new(items),
            available: Condvar::new(),
        }
    }

    /// Blocks until a handle is available. No timeout; callers set
    /// timeouts above this layer.
    fn acquire(&self) -> T {
        let mut slots = self.slots.lock();
        while slots.is_empty() {
            self.available.wait(&mut slots);
        }
        slots.pop().expect("non-empty pool")
    }

    fn release(&self, item: T) {
        self.slots.lock().push(item);
        self.available.notify_one();
    }
}

thread_local! {
    static TL_OUT: RefCell<Option<OutputHandle>> = const { RefCell::new(None) };
    static TL_IN: RefCell<Option<InputHandle>> = const { RefCell::new(None) };
}

/// Registry of stream handles.
///
/// With `pool_size == 0` each thread keeps at most one cached output and
/// one cached input handle; acquire is O(1) and never blocks. With
/// `pool_size > 0` exactly that many handles of each direction exist and
/// acquire blocks until one is released.
pub(crate) enum StreamRegistry {
    ThreadLocal,
    Pooled {
        out: Pool<OutputHandle>,
        input: Pool<InputHandle>,
    },
}

impl StreamRegistry {
    pub(crate) fn new(pool_size: u32) -> StreamRegistry {
        if pool_size == 0 {
            StreamRegistry::ThreadLocal
        } else {
            let out = (0..pool_size).map(|_| OutputHandle::new()).collect();
            let input = (0..pool_size).map(|_| InputHandle).collect();
            StreamRegistry::Pooled {
                out: Pool::new(out),
                input: Pool::new(input),
            }
        }
    }

    /// Acquires an output handle; released (and reset) when the guard
    /// drops, including on failing paths.
    pub(crate) fn acquire_out(&self) -> OutputGuard<'_> {
        match self {
            StreamRegistry::ThreadLocal => {
                let handle = TL_OUT
                    .with(|slot| slot.borrow_mut().take())
                    .unwrap_or_else(OutputHandle::new);
                OutputGuard {
                    handle: Some(handle),
                    pool: None,
                }
            }
            StreamRegistry::Pooled { out, .. } => OutputGuard {
                handle: Some(out.acquire()),
                pool: Some(out),
            },
        }
    }

    /// Acquires an input handle; released when the guard drops.
    pub(crate) fn acquire_in(&self) -> InputGuard<'_> {
        match self {
            StreamRegistry::ThreadLocal => {
                let handle = TL_IN
                    .with(|slot| slot.borrow_mut().take())
                    .unwrap_or(InputHandle);
                InputGuard {
                    handle: Some(handle),
                    pool: None,
                }
            }
            StreamRegistry::Pooled { input, .. } => InputGuard {
                handle: Some(input.acquire()),
                pool: Some(input),
            },
        }
    }
}

/// RAII guard for an output handle.
pub(crate) struct OutputGuard<'r> {
    handle: Option<OutputHandle>,
    pool: Option<&'r Pool<OutputHandle>>,
}

impl OutputGuard<'_> {
    pub(crate) fn handle_mut(&mut self) -> &mut OutputHandle {
        self.handle.as_mut().expect("guard holds handle until drop")
    }
}

impl Drop for OutputGuard<'_> {
    fn drop(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.reset();
            match self.pool {
                Some(pool) => pool.release(handle),
                None => TL_OUT.with(|slot| *slot.borrow_mut() = Some(handle)),
            }
        }
    }
}

/// RAII guard for an input handle.
pub(crate) struct InputGuard<'r> {
    handle: Option<InputHandle>,
    pool: Option<&'r Pool<InputHandle>>,
}

impl Drop for InputGuard<'_> {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            match self.pool {
                Some(pool) => pool.release(handle),
                None => TL_IN.with(|slot| *slot.borrow_mut() = Some(handle)),
            }
        }
    }
}
