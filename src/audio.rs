use std::path::Path;
use std::time::Instant;

use anyhow::Context;
use ffmpeg::util::frame::audio::Audio;
use ffmpeg_next::{
    self as ffmpeg, channel_layout::ChannelLayout, codec, decoder, filter, format, media, Error,
    Packet,
};
use tracing::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::source::MediaSource;
use crate::wav::PcmBuffer;

pub(crate) const DEFAULT_SAMPLE_RATE: u32 = 16_000;

/// Largest gap between the resampler output and the duration-derived length
/// that is treated as filter delay rather than a broken graph.
pub(crate) const RESAMPLER_SLACK: usize = 256;

/// Decodes the best audio stream and renders it to mono f32 at `target_rate`.
///
/// The result holds exactly `ceil(duration * target_rate)` samples, where the
/// duration is taken from the decoded native samples.
pub(crate) async fn extract_audio(
    source: &MediaSource,
    target_rate: u32,
    cancel: &CancelToken,
) -> anyhow::Result<PcmBuffer> {
    let path = source.path().to_owned();
    let cancel = cancel.clone();
    tokio::task::spawn_blocking(move || decode_resampled(&path, target_rate, &cancel))
        .await
        .context("Audio decode worker failed")?
}

pub(crate) fn decode_resampled(
    input_path: &Path,
    target_rate: u32,
    cancel: &CancelToken,
) -> anyhow::Result<PcmBuffer> {
    let started = Instant::now();
    let rendered = render(input_path, target_rate, cancel)?;
    let samples = fit_to_duration(rendered, target_rate);

    info!(
        samples = samples.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Rendered audio at {} Hz",
        target_rate
    );
    Ok(PcmBuffer {
        samples,
        sample_rate: target_rate,
    })
}

/// Resampler output before it is fitted to the source duration.
#[derive(Debug)]
pub(crate) struct Rendered {
    pub(crate) samples: Vec<f32>,
    pub(crate) native_samples: u64,
    pub(crate) native_rate: u32,
}

pub(crate) fn render(
    input_path: &Path,
    target_rate: u32,
    cancel: &CancelToken,
) -> anyhow::Result<Rendered> {
    anyhow::ensure!(target_rate > 0, "Target sample rate must be positive");
    crate::capture::init()?;

    let mut input = format::input(&input_path)
        .with_context(|| format!("Cannot open {}", input_path.display()))?;
    let audio_stream = input
        .streams()
        .best(media::Type::Audio)
        .ok_or(anyhow::anyhow!(Error::StreamNotFound))
        .context("No decodable audio stream")?;
    let audio_stream_index = audio_stream.index();

    let mut resampler = Resampler::new(&audio_stream, target_rate)?;
    debug!(
        native_rate = resampler.native_rate,
        target_rate, "Decoding audio stream {}", audio_stream_index
    );

    for (stream, packet) in input.packets() {
        anyhow::ensure!(!cancel.is_cancelled(), "Audio decode cancelled");
        if stream.index() == audio_stream_index {
            resampler.send_packet_to_decoder(&packet)?;
            resampler.receive_and_process_decoded_frames()?;
        }
    }
    resampler.send_eof_to_decoder()?;
    resampler.receive_and_process_decoded_frames()?;
    resampler.flush_filter_graph()?;
    resampler.receive_and_process_filtered_frames()?;

    anyhow::ensure!(
        resampler.native_samples > 0,
        "Audio stream produced no samples"
    );

    Ok(Rendered {
        samples: resampler.rendered,
        native_samples: resampler.native_samples,
        native_rate: resampler.native_rate,
    })
}

/// Pads with silence or truncates to `ceil(duration * target_rate)`.
pub(crate) fn fit_to_duration(rendered: Rendered, target_rate: u32) -> Vec<f32> {
    let len = expected_len(rendered.native_samples, rendered.native_rate, target_rate);
    let mut samples = rendered.samples;
    if samples.len().abs_diff(len) > RESAMPLER_SLACK {
        warn!(
            rendered = samples.len(),
            expected = len,
            "Resampler output differs from the source duration"
        );
    }
    samples.resize(len, 0.0);
    samples
}

/// `ceil(native_samples / native_rate * target_rate)` in exact integer math.
pub(crate) fn expected_len(native_samples: u64, native_rate: u32, target_rate: u32) -> usize {
    if native_rate == 0 {
        return 0;
    }
    let scaled = u128::from(native_samples) * u128::from(target_rate);
    let rate = u128::from(native_rate);
    ((scaled + rate - 1) / rate) as usize
}

struct Resampler {
    decoder: decoder::Audio,
    filter_graph: filter::Graph,
    native_rate: u32,
    native_samples: u64,
    rendered: Vec<f32>,
}

impl Resampler {
    fn new(input_stream: &format::stream::Stream, target_rate: u32) -> anyhow::Result<Self> {
        let codec_params = input_stream.parameters();
        let decoder = codec::context::Context::from_parameters(codec_params)?
            .decoder()
            .audio()
            .context("Unsupported audio codec")?;
        anyhow::ensure!(decoder.rate() > 0, "Unknown sample rate");

        let filter_graph = Self::filter_graph(&decoder, target_rate)?;
        Ok(Self {
            native_rate: decoder.rate(),
            decoder,
            filter_graph,
            native_samples: 0,
            rendered: Vec::new(),
        })
    }

    fn filter_graph(decoder: &decoder::Audio, target_rate: u32) -> anyhow::Result<filter::Graph> {
        let mut filter_graph = filter::Graph::new();

        let channel_layout = if decoder.channel_layout().is_empty() {
            ChannelLayout::default(i32::from(decoder.channels()))
        } else {
            decoder.channel_layout()
        };
        let args = format!(
            "time_base=1/{rate}:sample_rate={rate}:sample_fmt={}:channel_layout=0x{:x}",
            decoder.format().name(),
            channel_layout.bits(),
            rate = decoder.rate(),
        );

        filter_graph.add(
            &filter::find("abuffer").ok_or(anyhow::anyhow!("Failed to find filter"))?,
            "in",
            &args,
        )?;
        filter_graph.add(
            &filter::find("abuffersink").ok_or(anyhow::anyhow!("Failed to find filter"))?,
            "out",
            "",
        )?;

        {
            let mut out = filter_graph
                .get("out")
                .ok_or(anyhow::anyhow!("Failed to get filter"))?;
            out.set_sample_format(format::Sample::F32(format::sample::Type::Packed));
            out.set_channel_layout(ChannelLayout::MONO);
            out.set_sample_rate(target_rate);
        }

        filter_graph.output("in", 0)?.input("out", 0)?.parse("anull")?;
        filter_graph.validate()?;

        debug!("Filter graph: {}", filter_graph.dump());
        Ok(filter_graph)
    }

    fn send_packet_to_decoder(&mut self, packet: &Packet) -> anyhow::Result<()> {
        self.decoder
            .send_packet(packet)
            .context("Corrupt audio packet")
    }

    fn send_eof_to_decoder(&mut self) -> anyhow::Result<()> {
        self.decoder.send_eof().map_err(anyhow::Error::from)
    }

    fn receive_and_process_decoded_frames(&mut self) -> anyhow::Result<()> {
        let mut frame = Audio::empty();
        while self.decoder.receive_frame(&mut frame).is_ok() {
            // Timestamps restart from the sample count so gaps in the source
            // do not shift the rendered timeline.
            frame.set_pts(Some(self.native_samples as i64));
            self.native_samples += frame.samples() as u64;
            self.filter_graph
                .get("in")
                .ok_or(anyhow::anyhow!("Failed to get filter"))?
                .source()
                .add(&frame)
                .map_err(|e| anyhow::anyhow!(e))?;
            self.receive_and_process_filtered_frames()?;
        }
        Ok(())
    }

    fn flush_filter_graph(&mut self) -> anyhow::Result<()> {
        self.filter_graph
            .get("in")
            .ok_or(anyhow::anyhow!("Failed to get filter"))?
            .source()
            .flush()
            .map_err(|e| anyhow::anyhow!(e))
    }

    fn receive_and_process_filtered_frames(&mut self) -> anyhow::Result<()> {
        let mut frame = Audio::empty();
        while self
            .filter_graph
            .get("out")
            .ok_or(anyhow::anyhow!("Failed to get filter"))?
            .sink()
            .frame(&mut frame)
            .is_ok()
        {
            let bytes = &frame.data(0)[..frame.samples() * 4];
            self.rendered.extend(
                bytes
                    .chunks_exact(4)
                    .map(|chunk| f32::from_ne_bytes([chunk[0], chunk[1], chunk[2], chunk[3]])),
            );
        }
        Ok(())
    }
}
