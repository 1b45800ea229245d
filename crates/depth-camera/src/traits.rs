use crate::{CameraParameters, InputFrame, Result};

/// A device (or recording) that provides co-registered depth and color frames.
pub trait DepthCamera {
    /// Block until the next depth+color pair is available.
    ///
    /// The returned frame always has the resolution reported by [`parameters`](Self::parameters).
    fn grab_frame(&mut self) -> Result<InputFrame>;

    /// Intrinsics of the depth stream, fixed for the lifetime of the source.
    fn parameters(&self) -> CameraParameters;
}

impl<C: DepthCamera + ?Sized> DepthCamera for Box<C> {
    fn grab_frame(&mut self) -> Result<InputFrame> {
        (**self).grab_frame()
    }

    fn parameters(&self) -> CameraParameters {
        (**self).parameters()
    }
}
