use std::sync::atomic::{AtomicU64, Ordering};

/// Shared by every bus and channel in the process, so items from different
/// sources can be put back in the order they were published.
static NEXT_SEQ: AtomicU64 = AtomicU64::new(0);

/// An item tagged with its position in the process-wide publish order
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Sequenced<T> {
    pub seq: u64,
    pub item: T,
}

impl<T> Sequenced<T> {
    pub(crate) fn stamp(item: T) -> Self {
        Self {
            seq: NEXT_SEQ.fetch_add(1, Ordering::Relaxed),
            item,
        }
    }
}
