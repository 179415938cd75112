use anyhow::{anyhow, Result};
use std::io::{Cursor, Read, Seek, SeekFrom};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AudioFormat {
    Wav,
    Mp3,
    Ogg,
    Flac,
    Aac,
}

impl AudioFormat {
    pub fn extension(self) -> &'static str {
        match self {
            AudioFormat::Wav => "wav",
            AudioFormat::Mp3 => "mp3",
            AudioFormat::Ogg => "ogg",
            AudioFormat::Flac => "flac",
            AudioFormat::Aac => "aac",
        }
    }
}

/// Identify the container from its magic bytes.
pub fn sniff_format(bytes: &[u8]) -> Option<AudioFormat> {
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WAVE" {
        return Some(AudioFormat::Wav);
    }
    if bytes.starts_with(b"ID3") {
        return Some(AudioFormat::Mp3);
    }
    if bytes.starts_with(b"OggS") {
        return Some(AudioFormat::Ogg);
    }
    if bytes.starts_with(b"fLaC") {
        return Some(AudioFormat::Flac);
    }
    if bytes.len() >= 2 && bytes[0] == 0xFF {
        // MPEG audio frame sync; layer bits tell MP3 from ADTS AAC.
        if bytes[1] & 0xE0 == 0xE0 && bytes[1] & 0x06 != 0 {
            return Some(AudioFormat::Mp3);
        }
        if bytes[1] & 0xF6 == 0xF0 {
            return Some(AudioFormat::Aac);
        }
    }
    None
}

/// True when the payload reads as a JSON document or error text rather than audio.
pub fn looks_like_text(bytes: &[u8]) -> bool {
    if sniff_format(bytes).is_some() {
        return false;
    }
    let head = String::from_utf8_lossy(&bytes[..bytes.len().min(512)]);
    let trimmed = head.trim_start();
    ['{', '[', '"', '<'].iter().any(|c| trimmed.starts_with(*c))
}

struct WavInfo {
    byte_rate: u32,
    data_size: u32,
}

fn scan_wav<R: Read + Seek>(f: &mut R) -> Result<WavInfo> {
    let mut id = [0u8; 4];
    f.read_exact(&mut id)?;
    if &id != b"RIFF" {
        return Err(anyhow!("Not a RIFF file"));
    }

    f.seek(SeekFrom::Current(4))?;

    f.read_exact(&mut id)?;
    if &id != b"WAVE" {
        return Err(anyhow!("Not a WAVE file"));
    }

    let mut byte_rate: Option<u32> = None;
    let mut data_size: Option<u32> = None;

    loop {
        let mut chunk_id = [0u8; 4];
        let n = f.read(&mut chunk_id)?;
        if n == 0 {
            break;
        }
        if n < 4 {
            return Err(anyhow!("Unexpected EOF reading chunk ID"));
        }

        let mut size_buf = [0u8; 4];
        f.read_exact(&mut size_buf)?;
        let chunk_size = u32::from_le_bytes(size_buf);

        if &chunk_id == b"fmt " {
            let mut buf = vec![0u8; chunk_size as usize];
            f.read_exact(&mut buf)?;
            if buf.len() < 12 {
                return Err(anyhow!("fmt chunk too short"));
            }
            byte_rate = Some(u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]));
        } else if &chunk_id == b"data" {
            data_size = Some(chunk_size);
            break;
        } else {
            // Chunks are word aligned.
            let skip = chunk_size as i64 + (chunk_size as i64 & 1);
            f.seek(SeekFrom::Current(skip))?;
        }
    }

    Ok(WavInfo {
        byte_rate: byte_rate.ok_or_else(|| anyhow!("Missing fmt chunk"))?,
        data_size: data_size.ok_or_else(|| anyhow!("Missing data chunk"))?,
    })
}

/// Play length of an in-memory WAV file.
pub fn wav_duration(bytes: &[u8]) -> Result<Duration> {
    let info = scan_wav(&mut Cursor::new(bytes))?;
    if info.byte_rate == 0 {
        return Err(anyhow!("WAV byte rate is zero"));
    }
    Ok(Duration::from_secs_f64(
        info.data_size as f64 / info.byte_rate as f64,
    ))
}

/// One-line description for logs: format, size and, for WAV, duration.
pub fn describe(bytes: &[u8]) -> String {
    match sniff_format(bytes) {
        Some(AudioFormat::Wav) => match wav_duration(bytes) {
            Ok(d) => format!("wav, {} bytes, {:.2}s", bytes.len(), d.as_secs_f64()),
            Err(_) => format!("wav, {} bytes", bytes.len()),
        },
        Some(format) => format!("{}, {} bytes", format.extension(), bytes.len()),
        None => format!("unknown format, {} bytes", bytes.len()),
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use std::io::Write;

    pub(crate) fn create_dummy_wav(size: u32, sample_rate: u32) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.write_all(b"RIFF").unwrap();
        let total_size = 36 + size;
        buf.write_all(&total_size.to_le_bytes()).unwrap();
        buf.write_all(b"WAVE").unwrap();

        buf.write_all(b"fmt ").unwrap();
        buf.write_all(&16u32.to_le_bytes()).unwrap();
        // PCM (1), Mono (1), SampleRate, ByteRate, BlockAlign (2), Bits (16)
        buf.write_all(&1u16.to_le_bytes()).unwrap();
        buf.write_all(&1u16.to_le_bytes()).unwrap();
        buf.write_all(&sample_rate.to_le_bytes()).unwrap();
        buf.write_all(&(sample_rate * 2).to_le_bytes()).unwrap();
        buf.write_all(&2u16.to_le_bytes()).unwrap();
        buf.write_all(&16u16.to_le_bytes()).unwrap();

        buf.write_all(b"data").unwrap();
        buf.write_all(&size.to_le_bytes()).unwrap();
        buf.write_all(&vec![0u8; size as usize]).unwrap();

        buf
    }

    #[test]
    fn test_sniff_format() {
        assert_eq!(sniff_format(&create_dummy_wav(4, 8000)), Some(AudioFormat::Wav));
        assert_eq!(sniff_format(b"ID3\x04\x00rest"), Some(AudioFormat::Mp3));
        assert_eq!(sniff_format(&[0xFF, 0xFB, 0x90, 0x00]), Some(AudioFormat::Mp3));
        assert_eq!(sniff_format(&[0xFF, 0xF1, 0x50, 0x80]), Some(AudioFormat::Aac));
        assert_eq!(sniff_format(b"OggS\x00"), Some(AudioFormat::Ogg));
        assert_eq!(sniff_format(b"fLaC"), Some(AudioFormat::Flac));
        assert_eq!(sniff_format(b"{\"detail\": \"oops\"}"), None);
    }

    #[test]
    fn test_looks_like_text() {
        assert!(looks_like_text(b"  {\"message\": \"failed\"}"));
        assert!(looks_like_text(b"<html>Bad Gateway</html>"));
        assert!(!looks_like_text(&create_dummy_wav(4, 8000)));
        assert!(!looks_like_text(&[0xFF, 0xFB, 0x90, 0x00]));
    }

    #[test]
    fn test_wav_duration() -> Result<()> {
        let wav = create_dummy_wav(32000, 16000);
        let d = wav_duration(&wav)?;
        assert!((d.as_secs_f64() - 1.0).abs() < 1e-9);
        assert!(describe(&wav).contains("1.00s"));
        assert!(wav_duration(b"RIFF\0\0\0\0WAVE").is_err());
        Ok(())
    }
}
