/// Size of a single 20ms µ-law packet.
pub const BYTES_PER_PACKET: usize = 320;
pub const PACKETS_PER_FLUSH: usize = 15;
/// Roughly 300ms of audio.
pub const BYTES_PER_FLUSH: usize = BYTES_PER_PACKET * PACKETS_PER_FLUSH;

/// Accumulates inbound audio until there is enough to be worth a message.
#[derive(Debug)]
pub struct AudioBuffer {
    buf: Vec<u8>,
    threshold: usize,
}

impl Default for AudioBuffer {
    fn default() -> Self {
        Self::new(BYTES_PER_FLUSH)
    }
}

impl AudioBuffer {
    pub fn new(threshold: usize) -> Self {
        Self {
            buf: Vec::with_capacity(threshold + BYTES_PER_PACKET),
            threshold,
        }
    }

    /// Appends `chunk` and returns everything buffered once the threshold is exceeded.
    pub fn push(&mut self, chunk: &[u8]) -> Option<Vec<u8>> {
        self.buf.extend_from_slice(chunk);

        if self.buf.len() > self.threshold {
            let flushed = std::mem::replace(
                &mut self.buf,
                Vec::with_capacity(self.threshold + BYTES_PER_PACKET),
            );
            Some(flushed)
        } else {
            None
        }
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}
