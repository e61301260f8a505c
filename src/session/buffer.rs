//! Accumulation buffer
//!
//! Decoded server text that no foreground read has consumed yet. Positions
//! handed out by the buffer are absolute (counted from the first byte ever
//! pushed), so they stay meaningful after the oldest text is dropped to
//! respect the size cap.

/// Unread session output
#[derive(Debug, Clone)]
pub struct OutputBuffer {
    text: String,
    /// Absolute position of `text[0]`
    start: usize,
    /// Absolute position up to which triggers have scanned
    scanned: usize,
    max_bytes: usize,
    dropped: usize,
}

impl OutputBuffer {
    /// Buffer capped at `max_bytes`
    pub fn new(max_bytes: usize) -> Self {
        Self {
            text: String::new(),
            start: 0,
            scanned: 0,
            max_bytes,
            dropped: 0,
        }
    }

    /// Append decoded text, dropping the oldest text beyond the cap
    pub fn push(&mut self, text: &str) {
        self.text.push_str(text);

        if self.text.len() > self.max_bytes {
            let mut cut = self.text.len() - self.max_bytes;
            while !self.text.is_char_boundary(cut) {
                cut += 1;
            }
            self.text.drain(..cut);
            self.start += cut;
            self.dropped += cut;
            warn!(
                "Output buffer over {} bytes, dropped {} oldest bytes",
                self.max_bytes, cut
            );
        }
    }

    /// Absolute position of the oldest byte still held
    pub fn start(&self) -> usize {
        self.start
    }

    /// Absolute position just past the newest byte
    pub fn end(&self) -> usize {
        self.start + self.text.len()
    }

    /// Everything buffered
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Text from absolute position `pos` on (clamped to what is still held)
    pub fn text_since(&self, pos: usize) -> &str {
        let offset = pos.saturating_sub(self.start).min(self.text.len());
        self.text.get(offset..).unwrap_or("")
    }

    /// Text pushed since the last [`OutputBuffer::mark_scanned`]
    pub fn unscanned(&self) -> &str {
        self.text_since(self.scanned)
    }

    pub fn mark_scanned(&mut self) {
        self.scanned = self.end();
    }

    /// Drain everything
    pub fn take(&mut self) -> String {
        let text = std::mem::take(&mut self.text);
        self.start += text.len();
        self.scanned = self.scanned.max(self.start);
        text
    }

    /// Drain the text from absolute position `pos` on, keeping what precedes it
    pub fn take_since(&mut self, pos: usize) -> String {
        let offset = pos.saturating_sub(self.start).min(self.text.len());
        let mut cut = offset;
        while !self.text.is_char_boundary(cut) {
            cut += 1;
        }
        let tail = self.text.split_off(cut);
        // The kept prefix now ends where the drained tail began
        self.scanned = self.scanned.min(self.end());
        tail
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Total bytes dropped to the size cap
    pub fn dropped(&self) -> usize {
        self.dropped
    }
}
