//! Thread-local formatting scratch space (§9 design note: "each producer may
//! maintain a thread-local scratch area for formatting; the core must not
//! assume the scratch outlives the call").
//!
//! Grounded on the teacher's `utils::performance::StringPool` idea (reuse an
//! allocation instead of allocating per call) but reshaped from a
//! cross-thread `Mutex<Vec<String>>` pool into a genuinely thread-local
//! buffer, since nothing here is ever shared across threads — a
//! `thread_local!` cell needs no lock at all. `smallvec::SmallVec` avoids a
//! heap allocation entirely for the common case of a short formatted record.

use std::cell::RefCell;

use smallvec::SmallVec;

/// Formatted records rarely exceed a few hundred bytes; inline storage up to
/// this size avoids a heap allocation for the common case.
const INLINE_CAPACITY: usize = 256;

thread_local! {
    static SCRATCH: RefCell<SmallVec<[u8; INLINE_CAPACITY]>> = RefCell::new(SmallVec::new());
}

/// Lends the calling thread's scratch buffer to `f`, cleared before use.
///
/// The buffer is only valid for the duration of the call: a [`Formatter`]
/// (`crate::sink::Formatter`) that wants to build its output here must copy
/// out before returning, never retain a reference across calls.
///
/// [`Formatter`]: crate::sink::Formatter
pub fn with_scratch_buffer<R>(f: impl FnOnce(&mut SmallVec<[u8; INLINE_CAPACITY]>) -> R) -> R {
    SCRATCH.with(|cell| {
        let mut buf = cell.borrow_mut();
        buf.clear();
        f(&mut buf)
    })
}
