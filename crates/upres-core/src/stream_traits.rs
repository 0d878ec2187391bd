//! Stream endpoints consumed by the pipeline driver.

use crate::error::Result;
use crate::frame::FrameBuffer;

/// Produces frames in presentation order.
pub trait FrameSource: Send + 'static {
    /// Next frame, or `None` at end of stream.
    fn next_frame(&mut self) -> Result<Option<FrameBuffer>>;

    /// Native frame rate of the upstream source, if it knows one.
    ///
    /// The driver asks at most once per stream.
    fn native_frame_rate(&self) -> Option<f64> {
        None
    }
}

/// Consumes emitted frames.
pub trait FrameSink: Send + 'static {
    fn emit(&mut self, frame: &FrameBuffer) -> Result<()>;

    /// Commit anything buffered.  Called once at end of stream, including
    /// after cancellation.
    fn flush(&mut self) -> Result<()>;
}
