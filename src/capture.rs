use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use anyhow::Context;
use ffmpeg::util::frame::video::Video;
use ffmpeg_next::{self as ffmpeg, codec, decoder, format, media, rescale, software, Error};
use image::codecs::jpeg;
use image::{ImageBuffer, RgbImage};
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::source::MediaSource;

pub(crate) const JPEG_MIME: &str = "image/jpeg";

static INIT: OnceLock<Result<(), ffmpeg::Error>> = OnceLock::new();

pub(crate) fn init() -> anyhow::Result<()> {
    (*INIT.get_or_init(ffmpeg::init)).context("Failed to initialise FFmpeg")
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FrameSettings {
    pub(crate) frame_count: usize,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) jpeg_quality: u8,
    pub(crate) seek_timeout: Duration,
}

impl Default for FrameSettings {
    fn default() -> Self {
        Self {
            frame_count: 8,
            width: 640,
            height: 360,
            jpeg_quality: 60,
            seek_timeout: Duration::from_secs(5),
        }
    }
}

/// One compressed still taken at `timestamp` seconds.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FrameArtifact {
    pub(crate) timestamp: f64,
    pub(crate) bytes: Vec<u8>,
    pub(crate) mime_type: &'static str,
}

/// A video that can be positioned and rasterized one frame at a time.
pub(crate) trait FrameSource: Send + 'static {
    fn duration_secs(&self) -> f64;


    /// `halted` is polled while decoding forward; once it returns true the
    /// call gives up with an error.
    fn frame_at(
        &mut self,
        timestamp: f64,
        width: u32,
        height: u32,
        halted: &dyn Fn() -> bool,
    ) -> anyhow::Result<RgbImage>;
}

/// `frame_count` positions splitting the timeline into `frame_count + 1`
/// equal intervals. Neither end of the timeline is ever sampled.
pub(crate) fn frame_timestamps(duration: f64, frame_count: usize) -> Vec<f64> {
    let step = duration / (frame_count + 1) as f64;
    (0..frame_count).map(|i| step * (i + 1) as f64).collect()
}

pub(crate) async fn sample_frames(
    source: &MediaSource,
    settings: &FrameSettings,
    cancel: &CancelToken,
) -> anyhow::Result<Vec<FrameArtifact>> {
    if settings.frame_count == 0 {
        return Ok(Vec::new());
    }
    let path = source.path().to_owned();
    let video = tokio::task::spawn_blocking(move || FfmpegFrameSource::open(&path))
        .await
        .context("Frame decode worker failed")??;
    sample_from(video, settings, cancel).await
}

/// Seeks strictly one position at a time; each seek is bounded by
/// `settings.seek_timeout` and checked against `cancel` before it starts.
/// The source is dropped when this returns; a worker that was timed out or
/// cancelled is told to stop and releases it on its own.
pub(crate) async fn sample_from<S: FrameSource>(
    mut video: S,
    settings: &FrameSettings,
    cancel: &CancelToken,
) -> anyhow::Result<Vec<FrameArtifact>> {
    let duration = video.duration_secs();
    anyhow::ensure!(
        duration.is_finite() && duration > 0.0,
        "Source reports no usable duration ({duration}s)"
    );

    let timestamps = frame_timestamps(duration, settings.frame_count);
    let mut frames = Vec::with_capacity(timestamps.len());
    for timestamp in timestamps {
        anyhow::ensure!(!cancel.is_cancelled(), "Frame sampling cancelled");
        let (width, height, quality) = (settings.width, settings.height, settings.jpeg_quality);

        // Set once this seek is given up on.
        let abandoned = CancelToken::new();
        let halted = {
            let (cancel, abandoned) = (cancel.clone(), abandoned.clone());
            move || cancel.is_cancelled() || abandoned.is_cancelled()
        };
        let worker = tokio::task::spawn_blocking(move || {
            let jpeg = video
                .frame_at(timestamp, width, height, &halted)
                .and_then(|raster| encode_jpeg(&raster, quality));
            (video, jpeg)
        });
        let settled = cancel
            .run_until_cancelled(tokio::time::timeout(settings.seek_timeout, worker))
            .await;
        let (returned, jpeg) = match settled {
            Some(Ok(joined)) => joined.context("Frame decode worker failed")?,
            Some(Err(_)) => {
                abandoned.cancel();
                anyhow::bail!(
                    "Seek to {timestamp:.3}s did not settle within {:?}",
                    settings.seek_timeout
                );
            }
            None => anyhow::bail!("Frame sampling cancelled at {timestamp:.3}s"),
        };
        video = returned;

        let bytes = jpeg.with_context(|| format!("Failed to capture frame at {timestamp:.3}s"))?;
        debug!(timestamp, bytes = bytes.len(), "Captured frame");
        frames.push(FrameArtifact {
            timestamp,
            bytes,
            mime_type: JPEG_MIME,
        });
    }

    info!(frames = frames.len(), duration, "Sampled visual context");
    Ok(frames)
}

pub(crate) fn encode_jpeg(raster: &RgbImage, quality: u8) -> anyhow::Result<Vec<u8>> {
    let mut jpeg_data = Vec::new();
    let mut encoder = jpeg::JpegEncoder::new_with_quality(&mut jpeg_data, quality.clamp(1, 100));
    encoder.encode(
        raster,
        raster.width(),
        raster.height(),
        image::ExtendedColorType::Rgb8,
    )?;
    Ok(jpeg_data)
}

pub(crate) struct FfmpegFrameSource {
    input: format::context::Input,
    video_stream_index: usize,
    decoder: decoder::Video,
    time_base: f64,
    start_secs: f64,
    duration: f64,
}

/// Presentation time of the first video frame, in seconds.
fn start_secs(start_time: i64, time_base: f64) -> f64 {
    if start_time == ffmpeg::ffi::AV_NOPTS_VALUE {
        0.0
    } else {
        start_time as f64 * time_base
    }
}

/// Converts a timeline offset into the container seek position
/// (`AV_TIME_BASE` units) and the decode target (stream ticks). Both are
/// shifted by the stream's start time.
fn seek_targets(timestamp: f64, start_secs: f64, time_base: f64) -> (i64, i64) {
    let absolute = start_secs + timestamp;
    let position = (absolute / f64::from(rescale::TIME_BASE)).round() as i64;
    let target_pts = if time_base > 0.0 {
        (absolute / time_base).round() as i64
    } else {
        0
    };
    (position, target_pts)
}

impl FfmpegFrameSource {
    pub(crate) fn open(input_path: &Path) -> anyhow::Result<Self> {
        init()?;
        let input = format::input(&input_path)
            .with_context(|| format!("Cannot open {}", input_path.display()))?;
        let video_stream = input
            .streams()
            .best(media::Type::Video)
            .ok_or(anyhow::anyhow!(Error::StreamNotFound))
            .context("No video stream")?;
        let video_stream_index = video_stream.index();
        let time_base: f64 = video_stream.time_base().into();
        let start_secs = start_secs(video_stream.start_time(), time_base);

        let container_duration = input.duration();
        let duration = if container_duration > 0 {
            container_duration as f64 * f64::from(rescale::TIME_BASE)
        } else if video_stream.duration() > 0 {
            video_stream.duration() as f64 * time_base
        } else {
            0.0
        };

        let decoder = codec::context::Context::from_parameters(video_stream.parameters())?
            .decoder()
            .video()?;

        Ok(Self {
            input,
            video_stream_index,
            decoder,
            time_base,
            start_secs,
            duration,
        })
    }
}

impl FrameSource for FfmpegFrameSource {
    fn duration_secs(&self) -> f64 {
        self.duration
    }

    fn frame_at(
        &mut self,
        timestamp: f64,
        width: u32,
        height: u32,
        halted: &dyn Fn() -> bool,
    ) -> anyhow::Result<RgbImage> {
        let (position, target_pts) = seek_targets(timestamp, self.start_secs, self.time_base);
        self.input.seek(position, ..position)?;
        self.decoder.flush();

        let mut decoded = Video::empty();
        let mut last: Option<Video> = None;

        for (stream, packet) in self.input.packets() {
            anyhow::ensure!(!halted(), "Seek to {timestamp:.3}s was abandoned");
            if stream.index() != self.video_stream_index {
                continue;
            }
            self.decoder.send_packet(&packet)?;
            while self.decoder.receive_frame(&mut decoded).is_ok() {
                if decoded.timestamp().unwrap_or(0) >= target_pts {
                    return rasterize(&decoded, width, height);
                }
                last = Some(decoded.clone());
            }
        }
        self.decoder.send_eof()?;
        while self.decoder.receive_frame(&mut decoded).is_ok() {
            if decoded.timestamp().unwrap_or(0) >= target_pts {
                return rasterize(&decoded, width, height);
            }
            last = Some(decoded.clone());
        }

        // Seeking near the end can land past the last frame.
        match last {
            Some(frame) => rasterize(&frame, width, height),
            None => Err(anyhow::anyhow!("No decodable frame near {timestamp:.3}s")),
        }
    }
}

/// Scales to exactly `width`x`height` RGB24; aspect ratio is not preserved.
fn rasterize(decoded: &Video, width: u32, height: u32) -> anyhow::Result<RgbImage> {
    let mut scaler = software::scaling::context::Context::get(
        decoded.format(),
        decoded.width(),
        decoded.height(),
        format::Pixel::RGB24,
        width,
        height,
        software::scaling::Flags::BILINEAR,
    )?;
    let mut rgb_frame = Video::empty();
    scaler.run(decoded, &mut rgb_frame)?;

    let stride = rgb_frame.stride(0);
    let row_len = width as usize * 3;
    let data = rgb_frame.data(0);
    let mut pixels = Vec::with_capacity(row_len * height as usize);
    for row in 0..height as usize {
        pixels.extend_from_slice(&data[row * stride..row * stride + row_len]);
    }
    ImageBuffer::<image::Rgb<u8>, _>::from_raw(width, height, pixels)
        .ok_or(anyhow::anyhow!("Failed to create image buffer"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex};

    struct FakeVideo {
        duration: f64,
        delays: Vec<Duration>,
        requested: Arc<Mutex<Vec<f64>>>,
        saw_halt: Arc<AtomicBool>,
    }

    impl FakeVideo {
        fn new(duration: f64) -> Self {
            Self {
                duration,
                delays: Vec::new(),
                requested: Arc::new(Mutex::new(Vec::new())),
                saw_halt: Arc::new(AtomicBool::new(false)),
            }
        }
    }

    impl FrameSource for FakeVideo {
        fn duration_secs(&self) -> f64 {
            self.duration
        }

        fn frame_at(
            &mut self,
            timestamp: f64,
            width: u32,
            height: u32,
            halted: &dyn Fn() -> bool,
        ) -> anyhow::Result<RgbImage> {
            let index = {
                let mut requested = self.requested.lock().unwrap();
                requested.push(timestamp);
                requested.len() - 1
            };
            // Decodes in 5 ms slices, like a packet loop.
            let delay = self.delays.get(index).copied().unwrap_or_default();
            let started = std::time::Instant::now();
            while started.elapsed() < delay {
                if halted() {
                    self.saw_halt.store(true, Ordering::SeqCst);
                    anyhow::bail!("halted at {timestamp}");
                }
                std::thread::sleep(Duration::from_millis(5));
            }
            let shade = (index * 30) as u8;
            Ok(RgbImage::from_pixel(width, height, image::Rgb([shade, shade, shade])))
        }
    }

    #[test]
    fn timestamps_split_timeline_evenly() {
        let timestamps = frame_timestamps(90.0, 8);
        assert_eq!(timestamps.len(), 8);
        for (i, ts) in timestamps.iter().enumerate() {
            assert!((ts - 10.0 * (i + 1) as f64).abs() < 1e-9);
        }
        assert!(timestamps.windows(2).all(|w| w[0] < w[1]));
        assert!(timestamps.iter().all(|ts| *ts > 0.0 && *ts < 90.0));
    }

    #[test]
    fn single_frame_lands_mid_timeline() {
        assert_eq!(frame_timestamps(120.0, 1), vec![60.0]);
        assert!(frame_timestamps(120.0, 0).is_empty());
    }

    #[tokio::test]
    async fn frames_follow_timeline_order() {
        let mut video = FakeVideo::new(90.0);
        video.delays = vec![
            Duration::from_millis(40),
            Duration::from_millis(1),
            Duration::from_millis(25),
        ];
        let requested = video.requested.clone();
        let settings = FrameSettings {
            frame_count: 3,
            width: 64,
            height: 36,
            ..FrameSettings::default()
        };

        let frames = sample_from(video, &settings, &CancelToken::new()).await.unwrap();
        assert_eq!(frames.len(), 3);
        let timestamps: Vec<f64> = frames.iter().map(|f| f.timestamp).collect();
        assert_eq!(timestamps, vec![22.5, 45.0, 67.5]);
        assert_eq!(*requested.lock().unwrap(), timestamps);

        for frame in &frames {
            assert_eq!(frame.mime_type, "image/jpeg");
            let decoded = image::load_from_memory(&frame.bytes).unwrap();
            assert_eq!((decoded.width(), decoded.height()), (64, 36));
        }
    }

    #[tokio::test]
    async fn zero_duration_is_rejected() {
        let err = sample_from(FakeVideo::new(0.0), &FrameSettings::default(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no usable duration"));

        let err = sample_from(FakeVideo::new(f64::NAN), &FrameSettings::default(), &CancelToken::new())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("no usable duration"));
    }

    #[tokio::test]
    async fn stalled_seek_times_out() {
        let mut video = FakeVideo::new(30.0);
        video.delays = vec![Duration::from_millis(1), Duration::from_millis(400)];
        let settings = FrameSettings {
            frame_count: 4,
            width: 16,
            height: 9,
            seek_timeout: Duration::from_millis(50),
            ..FrameSettings::default()
        };

        let saw_halt = video.saw_halt.clone();
        let err = sample_from(video, &settings, &CancelToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("did not settle"));

        // The detached worker is told to stop instead of decoding on.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(saw_halt.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn cancel_interrupts_sampling_between_and_during_seeks() {
        let mut video = FakeVideo::new(60.0);
        video.delays = vec![Duration::from_millis(1), Duration::from_secs(2)];
        let requested = video.requested.clone();
        let saw_halt = video.saw_halt.clone();
        let settings = FrameSettings {
            frame_count: 5,
            width: 16,
            height: 9,
            seek_timeout: Duration::from_secs(10),
            ..FrameSettings::default()
        };
        let cancel = CancelToken::new();
        let canceller = {
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                cancel.cancel();
            })
        };

        let started = std::time::Instant::now();
        let err = sample_from(video, &settings, &cancel).await.unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(started.elapsed() < Duration::from_secs(1));
        canceller.await.unwrap();

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(requested.lock().unwrap().len(), 2);
        assert!(saw_halt.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn pre_cancelled_sampling_never_seeks() {
        let video = FakeVideo::new(60.0);
        let requested = video.requested.clone();
        let cancel = CancelToken::new();
        cancel.cancel();

        let err = sample_from(video, &FrameSettings::default(), &cancel)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cancelled"));
        assert!(requested.lock().unwrap().is_empty());
    }

    #[test]
    fn seek_targets_follow_stream_start() {
        let time_base = 1.0 / 90_000.0;
        assert_eq!(seek_targets(10.0, 0.0, time_base), (10_000_000, 900_000));
        assert_eq!(seek_targets(10.0, 2.0, time_base), (12_000_000, 1_080_000));
        assert_eq!(seek_targets(1.5, 0.5, 0.0), (2_000_000, 0));
    }

    #[test]
    fn start_time_defaults_to_zero_when_unset() {
        assert_eq!(start_secs(ffmpeg::ffi::AV_NOPTS_VALUE, 1.0 / 90_000.0), 0.0);
        assert!((start_secs(180_000, 1.0 / 90_000.0) - 2.0).abs() < 1e-9);
    }

    #[test]
    fn jpeg_quality_changes_output_size() {
        let raster = RgbImage::from_fn(640, 360, |x, y| {
            image::Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
        });
        let low = encode_jpeg(&raster, 10).unwrap();
        let high = encode_jpeg(&raster, 95).unwrap();
        assert!(low.len() < high.len());
        assert_eq!(&low[..2], &[0xFF, 0xD8]);
    }

    #[test]
    fn opening_non_video_fails() {
        let file = tempfile::NamedTempFile::new().unwrap();
        assert!(FfmpegFrameSource::open(file.path()).is_err());
    }
}
