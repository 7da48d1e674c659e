//! Change notifications for consumers that mirror the grid (renderers,
//! recorders, network peers).

/// Which buffer a change refers to.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BufferRole {
    Current,
    Next,
}

/// A run of packed words written to one buffer.
///
/// `start_word` is a batch index (padding excluded); `data` holds
/// `word_count` words copied out after the write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct WordChange<'a> {
    pub buffer: BufferRole,
    pub start_word: u32,
    pub word_count: u32,
    pub data: &'a [u32],
}

impl<'a> WordChange<'a> {
    pub fn new(buffer: BufferRole, start_word: u32, data: &'a [u32]) -> Self {
        Self {
            buffer,
            start_word,
            word_count: data.len() as u32,
            data,
        }
    }
}

/// Receiver of grid changes. Workers call it concurrently, each for its own
/// word range.
pub trait OutputSink: Send + Sync {
    fn write(&self, change: WordChange<'_>);

    /// Several changes produced by one operation, in order.
    fn write_batch(&self, changes: &[WordChange<'_>]) {
        for change in changes {
            self.write(*change);
        }
    }

    /// `current` and `next` exchanged roles.
    fn buffers_swapped(&self) {}
}

/// Discards everything.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullSink;

impl OutputSink for NullSink {
    #[inline]
    fn write(&self, _change: WordChange<'_>) {}
}
