//! # Audio File Decoding
//!
//! Turns an uploaded audio file (wav, mp3, ogg, m4a, webm, ...) into the
//! 16 kHz mono `f32` PCM Whisper expects.
//!
//! ## Pipeline:
//! 1. Identify the container with symphonia, using the file extension as a hint
//! 2. Decode every packet of the default track, skipping corrupt frames
//! 3. Downmix interleaved channels to mono by averaging
//! 4. Resample to 16 kHz with rubato when the source rate differs

use anyhow::{anyhow, Context, Result};
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Sample rate every Whisper model is trained on.
pub const TARGET_SAMPLE_RATE: u32 = 16_000;

/// Decode the file at `path` to 16 kHz mono PCM in `[-1.0, 1.0]`.
///
/// An audio file that decodes cleanly but holds no samples yields an empty
/// vector; callers decide what silence means.
pub fn decode_file(path: &Path) -> Result<Vec<f32>> {
    let file = File::open(path).context("failed to open audio file")?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe()
        .format(&hint, mss, &FormatOptions::default(), &MetadataOptions::default())
        .map_err(|e| anyhow!("unsupported or corrupt audio container: {}", e))?;

    let mut format = probed.format;
    let track = format
        .default_track()
        .ok_or_else(|| anyhow!("no audio track found"))?;

    let track_id = track.id;
    let codec_params = track.codec_params.clone();
    let source_rate = codec_params
        .sample_rate
        .ok_or_else(|| anyhow!("unknown sample rate"))?;

    let mut decoder = symphonia::default::get_codecs()
        .make(&codec_params, &DecoderOptions::default())
        .map_err(|e| anyhow!("unsupported audio codec: {}", e))?;

    let mut samples: Vec<f32> = Vec::new();

    loop {
        let packet = match format.next_packet() {
            Ok(packet) => packet,
            Err(SymphoniaError::IoError(ref e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => break,
            Err(SymphoniaError::ResetRequired) => break,
            Err(e) => return Err(anyhow!("failed to read audio packet: {}", e)),
        };

        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(decoded) => decoded,
            Err(SymphoniaError::DecodeError(e)) => {
                tracing::warn!(error = %e, "Skipping corrupt audio frame");
                continue;
            }
            Err(e) => return Err(anyhow!("failed to decode audio: {}", e)),
        };

        let spec = *decoded.spec();
        let frames = decoded.frames();
        if frames == 0 {
            continue;
        }

        let channels = spec.channels.count().max(1);
        let mut buffer = SampleBuffer::<f32>::new(frames as u64, spec);
        buffer.copy_interleaved_ref(decoded);
        downmix_into(buffer.samples(), channels, &mut samples);
    }

    if samples.is_empty() || source_rate == TARGET_SAMPLE_RATE {
        return Ok(samples);
    }

    let resampled = resample(&samples, source_rate, TARGET_SAMPLE_RATE)?;
    tracing::debug!(
        source_rate,
        samples = resampled.len(),
        duration_secs = resampled.len() as f32 / TARGET_SAMPLE_RATE as f32,
        "Audio decoded to 16kHz mono PCM"
    );
    Ok(resampled)
}

/// Append interleaved `input` to `output` as mono.
fn downmix_into(input: &[f32], channels: usize, output: &mut Vec<f32>) {
    if channels <= 1 {
        output.extend_from_slice(input);
        return;
    }
    output.extend(
        input
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32),
    );
}

fn resample(samples: &[f32], from_rate: u32, to_rate: u32) -> Result<Vec<f32>> {
    use rubato::{
        Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
    };

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = to_rate as f64 / from_rate as f64;
    let chunk_size = 1024;

    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, chunk_size, 1)
        .map_err(|e| anyhow!("resampler init: {}", e))?;

    let mut output = Vec::with_capacity((samples.len() as f64 * ratio) as usize + chunk_size);

    for chunk in samples.chunks(chunk_size) {
        let mut input = chunk.to_vec();
        input.resize(chunk_size, 0.0);

        let result = resampler
            .process(&[input], None)
            .map_err(|e| anyhow!("resample: {}", e))?;

        if let Some(channel) = result.first() {
            output.extend_from_slice(channel);
        }
    }

    // Drop the tail produced by zero-padding the last chunk
    output.truncate((samples.len() as f64 * ratio) as usize);
    Ok(output)
}

#[cfg(test)]
mod tests {
    use super::*;
    use byteorder::{LittleEndian, WriteBytesExt};
    use std::io::Write;

    /// Minimal 16-bit PCM WAV writer.
    fn write_wav(path: &Path, sample_rate: u32, channels: u16, samples: &[i16]) {
        let data_len = (samples.len() * 2) as u32;
        let mut bytes = Vec::new();
        bytes.write_all(b"RIFF").unwrap();
        bytes.write_u32::<LittleEndian>(36 + data_len).unwrap();
        bytes.write_all(b"WAVEfmt ").unwrap();
        bytes.write_u32::<LittleEndian>(16).unwrap();
        bytes.write_u16::<LittleEndian>(1).unwrap();
        bytes.write_u16::<LittleEndian>(channels).unwrap();
        bytes.write_u32::<LittleEndian>(sample_rate).unwrap();
        bytes.write_u32::<LittleEndian>(sample_rate * channels as u32 * 2).unwrap();
        bytes.write_u16::<LittleEndian>(channels * 2).unwrap();
        bytes.write_u16::<LittleEndian>(16).unwrap();
        bytes.write_all(b"data").unwrap();
        bytes.write_u32::<LittleEndian>(data_len).unwrap();
        for sample in samples {
            bytes.write_i16::<LittleEndian>(*sample).unwrap();
        }
        std::fs::write(path, bytes).unwrap();
    }

    #[test]
    fn test_downmix_averages_channels() {
        let mut out = Vec::new();
        downmix_into(&[1.0, 0.0, 0.5, 0.5], 2, &mut out);
        assert_eq!(out, vec![0.5, 0.5]);

        downmix_into(&[0.25], 1, &mut out);
        assert_eq!(out, vec![0.5, 0.5, 0.25]);
    }

    #[test]
    fn test_decode_16khz_mono_wav() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("tone.wav");
        let samples: Vec<i16> = (0..1600).map(|i| if i % 2 == 0 { 8192 } else { -8192 }).collect();
        write_wav(&path, 16_000, 1, &samples);

        let pcm = decode_file(&path).unwrap();
        assert_eq!(pcm.len(), 1600);
        assert!(pcm.iter().all(|s| (s.abs() - 0.25).abs() < 1e-3));
    }

    #[test]
    fn test_decode_resamples_stereo_48khz() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("stereo.wav");
        // One second of stereo silence at 48 kHz
        write_wav(&path, 48_000, 2, &vec![0i16; 48_000 * 2]);

        let pcm = decode_file(&path).unwrap();
        assert!((15_900..=16_000).contains(&pcm.len()), "got {} samples", pcm.len());
    }

    #[test]
    fn test_garbage_is_rejected() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("noise.wav");
        std::fs::write(&path, b"definitely not audio").unwrap();

        assert!(decode_file(&path).is_err());
    }
}
