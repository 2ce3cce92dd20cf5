//! External media tooling (ffprobe/ffmpeg) behind the [`MediaTool`] seam.

mod analysis;
mod ffmpeg;

pub use analysis::{decode_segment, mean_volume_db, parse_mean_volume, SEGMENT_CHANNELS, SEGMENT_SAMPLE_RATE};
pub use ffmpeg::{AudioMetadata, ConversionError, FfmpegOutput, FfmpegTool, MediaTool};
