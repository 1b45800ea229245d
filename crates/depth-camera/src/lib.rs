//! depth-camera: RGB-D sources (recorded sequences, structured-light and active-stereo sensors)

mod types;
pub use types::{
    CameraParameters, ColorMap, DepthMap, DeviceInfo, InputFrame, PixelFormat, RawFrame,
};

mod error;
pub use error::{Error, Result};

mod traits;
pub use traits::DepthCamera;

/// File naming of recorded sequences
pub mod sequence;

mod replay;
pub use replay::ReplayCamera;

pub mod structured_light;
pub use structured_light::{StructuredLightCamera, StructuredLightRuntime};

pub mod active_stereo;
pub use active_stereo::{ActiveStereoCamera, StereoPipeline, StereoSource};

pub mod colorize;

#[cfg(feature = "mock")]
mod mock;
#[cfg(feature = "mock")]
pub use mock::{MockStereoPipeline, MockStructuredLight};

#[cfg(feature = "realsense")]
mod realsense_backend;
#[cfg(feature = "realsense")]
pub use realsense_backend::RealSensePipeline;

#[cfg(feature = "openni2")]
mod openni2_backend;
#[cfg(feature = "openni2")]
pub use openni2_backend::OpenNi2Runtime;
