use std::time::Duration;

/// How long held lines wait for the sentinel once the replay goes quiet
pub const DEFAULT_STITCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Removes the overlap between a historical tail and the follow stream
/// opened right after it.
///
/// Lines from the follow stream are held back until the sentinel (the last
/// line of the historical tail) shows up; everything up to and including it
/// is dropped and the rest passes through. If the sentinel does not show up
/// within `window` lines, or the stream ends or stalls first, the held lines
/// are released so nothing is lost.
///
/// This is best-effort: log lines are not guaranteed to be unique, so an
/// earlier line equal to the sentinel stitches too early, and a sentinel
/// evicted from the replay causes the whole replay to be shown again.
#[derive(Debug)]
pub struct StreamStitcher {
    sentinel: Option<String>,
    window: usize,
    held: Vec<String>,
    stitched: bool,
}

impl StreamStitcher {
    /// `window` is the most lines the follow stream replays before live ones
    pub fn new(sentinel: Option<String>, window: usize) -> Self {
        let stitched = sentinel.is_none() || window == 0;
        Self {
            sentinel,
            window,
            held: Vec::new(),
            stitched,
        }
    }

    pub fn is_stitched(&self) -> bool {
        self.stitched
    }

    /// Lines are waiting on the sentinel
    pub fn is_holding(&self) -> bool {
        !self.held.is_empty()
    }

    /// Feed one line from the follow stream, returning the lines to emit
    pub fn push(&mut self, line: String) -> Vec<String> {
        if self.stitched {
            return vec![line];
        }

        if self.sentinel.as_deref() == Some(line.as_str()) {
            self.held.clear();
            self.stitched = true;
            return Vec::new();
        }

        self.held.push(line);
        if self.held.len() >= self.window {
            // The replay is over and the sentinel was not in it
            return self.release();
        }

        Vec::new()
    }

    /// Give up on the sentinel and return whatever is held
    pub fn release(&mut self) -> Vec<String> {
        self.stitched = true;
        std::mem::take(&mut self.held)
    }
}
