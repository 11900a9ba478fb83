use raw_window_handle::{
    HasDisplayHandle, HasWindowHandle, RawDisplayHandle, RawWindowHandle,
};

use crate::ProtocolError;

/// An exclusively-owned, one-way-transferable drawing surface.
///
/// The handle wraps the raw platform pointers of a live window. It moves into
/// the render thread exactly once (inside `Command::Init`) and never comes
/// back; the controller tracks that irreversibility and refuses to hand the
/// same window out twice while a session is alive.
#[derive(Debug, Clone, Copy)]
pub struct SurfaceHandle {
    raw_display: RawDisplayHandle,
    raw_window: RawWindowHandle,
    width: u32,
    height: u32,
}

impl SurfaceHandle {
    /// Captures the raw handles of `target`.
    ///
    /// The caller must keep the underlying window alive for as long as any
    /// render session created from this handle exists.
    pub fn from_window<T>(target: &T, width: u32, height: u32) -> Result<Self, ProtocolError>
    where
        T: HasDisplayHandle + HasWindowHandle,
    {
        let raw_display = target
            .display_handle()
            .map_err(|err| ProtocolError::SurfaceUnavailable(err.to_string()))?
            .as_raw();
        let raw_window = target
            .window_handle()
            .map_err(|err| ProtocolError::SurfaceUnavailable(err.to_string()))?
            .as_raw();
        Ok(Self {
            raw_display,
            raw_window,
            width: width.max(1),
            height: height.max(1),
        })
    }

    /// Wraps raw handles the embedder already extracted.
    ///
    /// Same liveness contract as [`SurfaceHandle::from_window`].
    pub fn from_raw(
        raw_display: RawDisplayHandle,
        raw_window: RawWindowHandle,
        width: u32,
        height: u32,
    ) -> Self {
        Self {
            raw_display,
            raw_window,
            width: width.max(1),
            height: height.max(1),
        }
    }

    pub fn display_handle(&self) -> RawDisplayHandle {
        self.raw_display
    }

    pub fn window_handle(&self) -> RawWindowHandle {
        self.raw_window
    }

    pub fn size(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

// The raw handles are plain platform pointers. Moving them to the render
// thread is sound because the embedder guarantees the window outlives the
// session and the controller never touches the surface again after transfer.
unsafe impl Send for SurfaceHandle {}

/// One decoded input frame, RGBA8, owned by exactly one side at a time.
///
/// Ownership transfers on every hand-off; the receiver drops it exactly once.
#[derive(Debug)]
pub struct FrameHandle {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl FrameHandle {
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ProtocolError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(ProtocolError::FrameSizeMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }
}

/// One captured output frame, RGBA8. Returned by capture with full ownership.
#[derive(Debug)]
pub struct CapturedFrame {
    width: u32,
    height: u32,
    data: Vec<u8>,
}

impl CapturedFrame {
    pub fn from_rgba8(width: u32, height: u32, data: Vec<u8>) -> Result<Self, ProtocolError> {
        let expected = width as usize * height as usize * 4;
        if data.len() != expected {
            return Err(ProtocolError::FrameSizeMismatch {
                width,
                height,
                expected,
                actual: data.len(),
            });
        }
        Ok(Self {
            width,
            height,
            data,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_bytes(self) -> Vec<u8> {
        self.data
    }
}
