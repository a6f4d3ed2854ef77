pub(crate) const WAV_MIME: &str = "audio/wav";
pub(crate) const HEADER_LEN: usize = 44;

/// Audio rendered to a single channel of `[-1, 1]` floats.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct PcmBuffer {
    pub(crate) samples: Vec<f32>,
    pub(crate) sample_rate: u32,
}

impl PcmBuffer {
    pub(crate) fn duration_secs(&self) -> f64 {
        if self.sample_rate == 0 {
            return 0.0;
        }
        self.samples.len() as f64 / f64::from(self.sample_rate)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub(crate) struct EncodedAudio {
    pub(crate) bytes: Vec<u8>,
    pub(crate) mime_type: &'static str,
}

impl TryFrom<PcmBuffer> for EncodedAudio {
    type Error = anyhow::Error;

    fn try_from(pcm: PcmBuffer) -> anyhow::Result<Self> {
        Ok(Self {
            bytes: encode_wav(&pcm.samples, pcm.sample_rate)?,
            mime_type: WAV_MIME,
        })
    }
}

/// Header size fields: `(ChunkSize, ByteRate, Subchunk2Size)`.
fn header_sizes(sample_count: usize, sample_rate: u32) -> anyhow::Result<(u32, u32, u32)> {
    let data_len = sample_count
        .checked_mul(2)
        .and_then(|len| u32::try_from(len).ok())
        .filter(|len| len.checked_add(32).is_some())
        .ok_or_else(|| anyhow::anyhow!("{sample_count} samples do not fit in a WAV container"))?;
    let byte_rate = sample_rate
        .checked_mul(2)
        .ok_or_else(|| anyhow::anyhow!("Sample rate {sample_rate} is too large for WAV"))?;
    Ok((32 + data_len, byte_rate, data_len))
}

/// Mono 16-bit PCM in a canonical 44-byte RIFF/WAVE container.
///
/// `ChunkSize` is written as `32 + 2 * N`.
pub(crate) fn encode_wav(samples: &[f32], sample_rate: u32) -> anyhow::Result<Vec<u8>> {
    let (chunk_size, byte_rate, data_len) = header_sizes(samples.len(), sample_rate)?;
    let mut out = Vec::with_capacity(HEADER_LEN + samples.len() * 2);

    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&chunk_size.to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16_u32.to_le_bytes());
    out.extend_from_slice(&1_u16.to_le_bytes()); // PCM
    out.extend_from_slice(&1_u16.to_le_bytes()); // mono
    out.extend_from_slice(&sample_rate.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&2_u16.to_le_bytes());
    out.extend_from_slice(&16_u16.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());

    for &sample in samples {
        out.extend_from_slice(&to_i16(sample).to_le_bytes());
    }
    Ok(out)
}

fn to_i16(sample: f32) -> i16 {
    if sample.is_nan() {
        return 0;
    }
    let s = sample.clamp(-1.0, 1.0);
    if s < 0.0 {
        (s * 32768.0) as i16
    } else {
        (s * 32767.0) as i16
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u32_at(bytes: &[u8], offset: usize) -> u32 {
        u32::from_le_bytes(bytes[offset..offset + 4].try_into().unwrap())
    }

    fn u16_at(bytes: &[u8], offset: usize) -> u16 {
        u16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    fn sample_at(bytes: &[u8], index: usize) -> i16 {
        let offset = HEADER_LEN + index * 2;
        i16::from_le_bytes(bytes[offset..offset + 2].try_into().unwrap())
    }

    #[test]
    fn header_layout() {
        let samples = vec![0.0_f32; 10];
        let wav = encode_wav(&samples, 16_000).unwrap();

        assert_eq!(wav.len(), HEADER_LEN + 20);
        assert_eq!(&wav[0..4], b"RIFF");
        assert_eq!(u32_at(&wav, 4), 32 + 20);
        assert_eq!(&wav[8..12], b"WAVE");
        assert_eq!(&wav[12..16], b"fmt ");
        assert_eq!(u32_at(&wav, 16), 16);
        assert_eq!(u16_at(&wav, 20), 1);
        assert_eq!(u16_at(&wav, 22), 1);
        assert_eq!(u32_at(&wav, 24), 16_000);
        assert_eq!(u32_at(&wav, 28), 32_000);
        assert_eq!(u16_at(&wav, 32), 2);
        assert_eq!(u16_at(&wav, 34), 16);
        assert_eq!(&wav[36..40], b"data");
        assert_eq!(u32_at(&wav, 40), 20);
    }

    #[test]
    fn size_fields_follow_sample_count() {
        for n in [0_usize, 1, 7, 16_000] {
            let wav = encode_wav(&vec![0.25; n], 8_000).unwrap();
            assert_eq!(u32_at(&wav, 4) as usize, 32 + 2 * n);
            assert_eq!(u32_at(&wav, 40) as usize, 2 * n);
        }
    }

    #[test]
    fn asymmetric_scaling() {
        let wav = encode_wav(&[1.0, -1.0, 1.5, -2.0, 0.0, 0.5, -0.5], 16_000).unwrap();
        assert_eq!(sample_at(&wav, 0), 32767);
        assert_eq!(sample_at(&wav, 1), -32768);
        assert_eq!(sample_at(&wav, 2), 32767);
        assert_eq!(sample_at(&wav, 3), -32768);
        assert_eq!(sample_at(&wav, 4), 0);
        assert_eq!(sample_at(&wav, 5), 16383);
        assert_eq!(sample_at(&wav, 6), -16384);
    }

    #[test]
    fn nan_encodes_as_silence() {
        let wav = encode_wav(&[f32::NAN], 16_000).unwrap();
        assert_eq!(sample_at(&wav, 0), 0);
    }

    #[test]
    fn encoding_is_deterministic() {
        let samples: Vec<f32> = (0..4_000).map(|i| (i as f32 * 0.01).sin()).collect();
        assert_eq!(encode_wav(&samples, 16_000).unwrap(), encode_wav(&samples, 16_000).unwrap());
    }

    #[test]
    fn encoded_audio_from_pcm() {
        let pcm = PcmBuffer {
            samples: vec![0.0; 16_000],
            sample_rate: 16_000,
        };
        assert_eq!(pcm.duration_secs(), 1.0);
        let audio = EncodedAudio::try_from(pcm).unwrap();
        assert_eq!(audio.mime_type, "audio/wav");
        assert_eq!(audio.bytes.len(), HEADER_LEN + 32_000);
    }

    #[test]
    fn oversized_header_fields_are_rejected() {
        assert!(encode_wav(&[0.0], u32::MAX).is_err());
        assert!(header_sizes(usize::MAX / 2, 16_000).is_err());
        assert!(header_sizes((u32::MAX / 2) as usize, 16_000).is_err());
        assert_eq!(
            header_sizes(1_000, 16_000).unwrap(),
            (32 + 2_000, 32_000, 2_000)
        );
    }
}
