pub mod audio;
pub mod capture;
pub mod device;
pub mod playback;

pub use capture::{CaptureError, InputCapture};
pub use device::DeviceError;
pub use playback::{PlaybackError, play_blocking};
