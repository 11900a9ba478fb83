use protocol::CapturedFrame;

/// Two-state latch driving lazy capture: armed by `RequestCapture`, consumed
/// exactly once by the next completed frame.
#[derive(Debug, Default)]
pub(crate) struct CaptureLatch {
    armed: bool,
}

impl CaptureLatch {
    /// Arms the latch. Returns `false` when it was already armed.
    pub fn arm(&mut self) -> bool {
        let was_idle = !self.armed;
        self.armed = true;
        was_idle
    }

    /// Consumes the armed state; at most one caller per arming sees `true`.
    pub fn take(&mut self) -> bool {
        std::mem::take(&mut self.armed)
    }
}

/// Holds at most one buffered captured frame. Replacing releases the previous
/// buffer; taking transfers ownership out.
#[derive(Debug, Default)]
pub(crate) struct SnapshotSlot {
    buffered: Option<CapturedFrame>,
}

impl SnapshotSlot {
    /// Buffers a snapshot, dropping whatever was there before.
    pub fn store(&mut self, frame: CapturedFrame) {
        self.buffered = Some(frame);
    }

    pub fn take(&mut self) -> Option<CapturedFrame> {
        self.buffered.take()
    }

    pub fn clear(&mut self) {
        self.buffered = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8) -> CapturedFrame {
        CapturedFrame::from_rgba8(1, 1, vec![tag, 0, 0, 255]).unwrap()
    }

    #[test]
    fn latch_is_consumed_exactly_once() {
        let mut latch = CaptureLatch::default();
        assert!(latch.arm());
        assert!(!latch.arm(), "double arm must report already-armed");
        assert!(latch.take());
        assert!(!latch.take());
    }

    #[test]
    fn slot_keeps_only_the_latest_snapshot() {
        let mut slot = SnapshotSlot::default();
        slot.store(frame(1));
        slot.store(frame(2));
        let taken = slot.take().unwrap();
        assert_eq!(taken.bytes()[0], 2);
        assert!(slot.take().is_none());
    }

    #[test]
    fn clear_discards_a_buffered_snapshot() {
        let mut slot = SnapshotSlot::default();
        slot.store(frame(3));
        slot.clear();
        assert!(slot.take().is_none());
    }
}
