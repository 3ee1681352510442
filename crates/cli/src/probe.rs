//! Header-only image probe used as the pipeline's processing step.

use bytes::Bytes;
use clipdeck_admission::Processor;
use clipdeck_core::ProcessingError;
use serde::{Deserialize, Serialize};

const PNG_SIGNATURE: &[u8] = b"\x89PNG\r\n\x1a\n";

/// What the probe found in a file's header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub format: ImageFormat,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    Png,
    Jpeg,
    Gif,
}

impl std::fmt::Display for ProbeReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self.format {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpeg",
            ImageFormat::Gif => "gif",
        };
        write!(f, "{name} {}x{}", self.width, self.height)
    }
}

/// Reads PNG, JPEG, and GIF headers. The processed bytes are the
/// JSON-encoded [`ProbeReport`].
pub struct ImageProbe;

impl Processor for ImageProbe {
    fn name(&self) -> &str {
        "image-probe"
    }

    fn process(&self, payload: &[u8]) -> Result<Bytes, ProcessingError> {
        let report = probe(payload)?;
        let json = serde_json::to_vec(&report)
            .map_err(|e| ProcessingError::Internal(format!("encoding probe report: {e}")))?;
        Ok(Bytes::from(json))
    }
}

pub fn decode_report(bytes: &[u8]) -> Result<ProbeReport, serde_json::Error> {
    serde_json::from_slice(bytes)
}

pub fn probe(data: &[u8]) -> Result<ProbeReport, ProcessingError> {
    if data.starts_with(PNG_SIGNATURE) {
        probe_png(data)
    } else if data.starts_with(b"GIF87a") || data.starts_with(b"GIF89a") {
        probe_gif(data)
    } else if data.starts_with(&[0xFF, 0xD8]) {
        probe_jpeg(data)
    } else {
        Err(ProcessingError::DecodeFailure("unrecognised image header".into()))
    }
}

fn truncated(format: &str) -> ProcessingError {
    ProcessingError::DecodeFailure(format!("truncated {format} header"))
}

fn be_u16(data: &[u8], at: usize) -> Option<u16> {
    data.get(at..at + 2).map(|b| u16::from_be_bytes([b[0], b[1]]))
}

fn probe_png(data: &[u8]) -> Result<ProbeReport, ProcessingError> {
    // Signature, then the IHDR chunk: length, type, width, height.
    let ihdr = data.get(8..24).ok_or_else(|| truncated("png"))?;
    if &ihdr[4..8] != b"IHDR" {
        return Err(ProcessingError::DecodeFailure("png without leading IHDR chunk".into()));
    }
    let width = u32::from_be_bytes([ihdr[8], ihdr[9], ihdr[10], ihdr[11]]);
    let height = u32::from_be_bytes([ihdr[12], ihdr[13], ihdr[14], ihdr[15]]);
    Ok(ProbeReport {
        format: ImageFormat::Png,
        width,
        height,
    })
}

fn probe_gif(data: &[u8]) -> Result<ProbeReport, ProcessingError> {
    let screen = data.get(6..10).ok_or_else(|| truncated("gif"))?;
    Ok(ProbeReport {
        format: ImageFormat::Gif,
        width: u16::from_le_bytes([screen[0], screen[1]]) as u32,
        height: u16::from_le_bytes([screen[2], screen[3]]) as u32,
    })
}

/// Walk marker segments until a start-of-frame.
fn probe_jpeg(data: &[u8]) -> Result<ProbeReport, ProcessingError> {
    let mut i = 2;
    loop {
        if *data.get(i).ok_or_else(|| truncated("jpeg"))? != 0xFF {
            return Err(ProcessingError::DecodeFailure(format!(
                "jpeg marker expected at offset {i}"
            )));
        }
        let marker = *data.get(i + 1).ok_or_else(|| truncated("jpeg"))?;
        match marker {
            // Fill byte.
            0xFF => {
                i += 1;
                continue;
            }
            // Standalone markers carry no length.
            0x01 | 0xD0..=0xD7 => {
                i += 2;
                continue;
            }
            0xD9 | 0xDA => {
                return Err(ProcessingError::DecodeFailure(
                    "jpeg has no frame header before scan data".into(),
                ))
            }
            0xC0..=0xCF if !matches!(marker, 0xC4 | 0xC8 | 0xCC) => {
                let height = be_u16(data, i + 5).ok_or_else(|| truncated("jpeg"))?;
                let width = be_u16(data, i + 7).ok_or_else(|| truncated("jpeg"))?;
                return Ok(ProbeReport {
                    format: ImageFormat::Jpeg,
                    width: width as u32,
                    height: height as u32,
                });
            }
            _ => {
                let len = be_u16(data, i + 2).ok_or_else(|| truncated("jpeg"))? as usize;
                if len < 2 {
                    return Err(ProcessingError::DecodeFailure(format!(
                        "jpeg segment length {len} at offset {i}"
                    )));
                }
                i += 2 + len;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png(width: u32, height: u32) -> Vec<u8> {
        let mut data = PNG_SIGNATURE.to_vec();
        data.extend_from_slice(&13u32.to_be_bytes());
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&width.to_be_bytes());
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&[8, 6, 0, 0, 0]);
        data
    }

    fn jpeg(width: u16, height: u16) -> Vec<u8> {
        let mut data = vec![0xFF, 0xD8];
        // APP0 segment to skip over.
        data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        data.extend_from_slice(b"JFIF\0");
        data.extend_from_slice(&[0; 9]);
        // SOF0: length, precision, height, width, components.
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        data.extend_from_slice(&height.to_be_bytes());
        data.extend_from_slice(&width.to_be_bytes());
        data.push(3);
        data
    }

    #[test]
    fn reads_png_dimensions() {
        let report = probe(&png(1920, 1080)).unwrap();
        assert_eq!(report.format, ImageFormat::Png);
        assert_eq!((report.width, report.height), (1920, 1080));
        assert_eq!(report.to_string(), "png 1920x1080");
    }

    #[test]
    fn reads_gif_dimensions() {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&320u16.to_le_bytes());
        data.extend_from_slice(&200u16.to_le_bytes());
        let report = probe(&data).unwrap();
        assert_eq!(report.format, ImageFormat::Gif);
        assert_eq!((report.width, report.height), (320, 200));
    }

    #[test]
    fn reads_jpeg_dimensions_past_app_segments() {
        let report = probe(&jpeg(640, 480)).unwrap();
        assert_eq!(report.format, ImageFormat::Jpeg);
        assert_eq!((report.width, report.height), (640, 480));
    }

    #[test]
    fn unknown_and_truncated_inputs_are_decode_failures() {
        for data in [&b"plain text"[..], &PNG_SIGNATURE[..], &[0xFF, 0xD8, 0xFF][..], &b""[..]] {
            let err = probe(data).unwrap_err();
            assert!(err.is_permanent(), "{err}");
        }
    }

    #[test]
    fn processor_output_round_trips_as_json() {
        let bytes = ImageProbe.process(&png(2, 3)).unwrap();
        let report = decode_report(&bytes).unwrap();
        assert_eq!((report.width, report.height), (2, 3));
    }
}
