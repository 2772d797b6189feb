//! Combined output capture for supervised units.
//!
//! Every unit appends its stdout and stderr lines to one [`OutputBuffer`].
//! Readers created with [`OutputBuffer::reader`] replay from the first
//! retained line and then follow live output until the unit closes the
//! buffer, so each call yields a fresh, finite sequence.

use std::collections::VecDeque;
use std::sync::Arc;

use futures_util::stream::{self, Stream};
use parking_lot::Mutex;
use tokio::sync::watch;

/// Default number of lines retained for replay.
pub const DEFAULT_RETAINED_LINES: usize = 5_000;

#[derive(Debug)]
struct Inner {
    lines: VecDeque<String>,
    /// Absolute index of `lines[0]`.
    base: usize,
    capacity: usize,
    closed: bool,
}

/// Shared, append-only line buffer with bounded retention.
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    inner: Arc<Mutex<Inner>>,
    version: Arc<watch::Sender<u64>>,
}

impl Default for OutputBuffer {
    fn default() -> Self {
        Self::new(DEFAULT_RETAINED_LINES)
    }
}

impl OutputBuffer {
    pub fn new(capacity: usize) -> Self {
        let (version, _) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(Inner {
                lines: VecDeque::new(),
                base: 0,
                capacity: capacity.max(1),
                closed: false,
            })),
            version: Arc::new(version),
        }
    }

    /// Append a line. Ignored once the buffer is closed.
    pub fn push(&self, line: impl Into<String>) {
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.lines.push_back(line.into());
            while inner.lines.len() > inner.capacity {
                inner.lines.pop_front();
                inner.base += 1;
            }
        }
        self.version.send_modify(|v| *v += 1);
    }

    /// Mark the end of output. Readers finish after draining.
    pub fn close(&self) {
        self.inner.lock().closed = true;
        self.version.send_modify(|v| *v += 1);
    }

    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Number of lines appended so far, including ones no longer retained.
    pub fn total_lines(&self) -> usize {
        let inner = self.inner.lock();
        inner.base + inner.lines.len()
    }

    /// Copy of the retained lines.
    pub fn snapshot(&self) -> Vec<String> {
        self.inner.lock().lines.iter().cloned().collect()
    }

    /// Start a reader at the first retained line.
    pub fn reader(&self) -> OutputLines {
        OutputLines {
            buffer: self.clone(),
            position: 0,
            version: self.version.subscribe(),
        }
    }

    /// Start a reader that only sees lines appended from now on.
    pub fn tail_reader(&self) -> OutputLines {
        OutputLines {
            buffer: self.clone(),
            position: self.total_lines(),
            version: self.version.subscribe(),
        }
    }
}

enum Poll {
    Line(String),
    Finished,
    Pending,
}

/// A cursor over an [`OutputBuffer`].
#[derive(Debug)]
pub struct OutputLines {
    buffer: OutputBuffer,
    position: usize,
    version: watch::Receiver<u64>,
}

impl OutputLines {
    /// Next line in emission order, or `None` once the unit has finished and
    /// every line has been read. Cancel safe.
    pub async fn next_line(&mut self) -> Option<String> {
        loop {
            self.version.borrow_and_update();
            match self.poll_buffer() {
                Poll::Line(line) => return Some(line),
                Poll::Finished => return None,
                Poll::Pending => {}
            }
            if self.version.changed().await.is_err() {
                return match self.poll_buffer() {
                    Poll::Line(line) => Some(line),
                    _ => None,
                };
            }
        }
    }

    fn poll_buffer(&mut self) -> Poll {
        let inner = self.buffer.inner.lock();
        // Lines evicted before this reader got to them are skipped.
        let index = self.position.max(inner.base);
        if index < inner.base + inner.lines.len() {
            self.position = index + 1;
            return Poll::Line(inner.lines[index - inner.base].clone());
        }
        if inner.closed {
            Poll::Finished
        } else {
            Poll::Pending
        }
    }

    /// Lines consumed so far, counted from the start of output.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Convert into a stream of lines.
    pub fn into_stream(self) -> impl Stream<Item = String> + Send {
        stream::unfold(self, |mut lines| async move {
            lines.next_line().await.map(|line| (line, lines))
        })
    }
}

/// Splits arbitrary byte chunks into lines.
#[derive(Debug, Default)]
pub struct LineSplitter {
    pending: String,
}

impl LineSplitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk, returning the complete lines it finished.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<String> {
        self.pending.push_str(&String::from_utf8_lossy(chunk));
        let mut lines = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let mut line: String = self.pending.drain(..=pos).collect();
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
            lines.push(line);
        }
        lines
    }

    /// Whatever is left after the final newline.
    pub fn finish(&mut self) -> Option<String> {
        if self.pending.is_empty() {
            None
        } else {
            Some(std::mem::take(&mut self.pending))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn test_reader_replays_from_start() {
        let buffer = OutputBuffer::default();
        buffer.push("one");
        buffer.push("two");
        buffer.close();

        let first: Vec<String> = buffer.reader().into_stream().collect().await;
        let second: Vec<String> = buffer.reader().into_stream().collect().await;

        assert_eq!(first, vec!["one", "two"]);
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_reader_follows_live_output() {
        let buffer = OutputBuffer::default();
        let mut reader = buffer.reader();

        let writer = buffer.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            writer.push("late line");
            writer.close();
        });

        assert_eq!(reader.next_line().await.as_deref(), Some("late line"));
        assert_eq!(reader.next_line().await, None);
    }

    #[tokio::test]
    async fn test_retention_skips_evicted_lines() {
        let buffer = OutputBuffer::new(2);
        for i in 0..5 {
            buffer.push(format!("line {}", i));
        }
        buffer.close();

        let lines: Vec<String> = buffer.reader().into_stream().collect().await;
        assert_eq!(lines, vec!["line 3", "line 4"]);
        assert_eq!(buffer.total_lines(), 5);
    }

    #[tokio::test]
    async fn test_tail_reader_skips_history() {
        let buffer = OutputBuffer::default();
        buffer.push("old");
        let mut tail = buffer.tail_reader();
        buffer.push("new");
        buffer.close();

        assert_eq!(tail.next_line().await.as_deref(), Some("new"));
        assert_eq!(tail.next_line().await, None);
    }

    #[test]
    fn test_push_after_close_is_ignored() {
        let buffer = OutputBuffer::default();
        buffer.close();
        buffer.push("ignored");
        assert!(buffer.snapshot().is_empty());
    }

    #[test]
    fn test_line_splitter_handles_partial_chunks() {
        let mut splitter = LineSplitter::new();
        assert!(splitter.feed(b"hel").is_empty());
        assert_eq!(splitter.feed(b"lo\r\nwor"), vec!["hello"]);
        assert_eq!(splitter.feed(b"ld\nfoo"), vec!["world"]);
        assert_eq!(splitter.finish().as_deref(), Some("foo"));
        assert_eq!(splitter.finish(), None);
    }
}
