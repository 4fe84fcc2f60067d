pub mod probe;
pub mod processor;
pub mod progress;

pub use probe::{ProbeError, VideoInfo, get_video_info};
pub use processor::{Frame, FrameRead, VideoProcessor};
