//! Tick-counting timer.

/// Fires once every `interval` calls to [`advance_frame`](Self::advance_frame).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FrameTimer {
    interval: u32,
    remaining: u32,
}

impl FrameTimer {
    pub fn new(interval: u32) -> Self {
        let mut timer = Self::default();
        timer.reset(interval);
        timer
    }

    /// Restart with a new interval. The next fire is `interval` frames away.
    pub fn reset(&mut self, interval: u32) {
        self.interval = interval.max(1);
        self.remaining = self.interval;
    }

    /// Count one frame. Returns `true` on the frame the timer fires, after
    /// which it rearms for another full interval.
    pub fn advance_frame(&mut self) -> bool {
        self.remaining -= 1;
        if self.remaining == 0 {
            self.remaining = self.interval;
            return true;
        }
        false
    }

    /// Skip `frames` frames without firing. The timer always keeps at least
    /// one frame to go, so a skip never swallows a fire outright.
    pub fn advance_frames(&mut self, frames: u32) {
        self.remaining = self.remaining.saturating_sub(frames).max(1);
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }

    pub fn remaining(&self) -> u32 {
        self.remaining
    }
}
