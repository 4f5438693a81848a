// ============================================================================
// IMAGE HEADER PROBE — pixel dimensions from raw bytes, no full decode
// ============================================================================
//
// Source photographs for projection painting are routinely 20–60 MP; decoding
// one just to learn its width and height is wasted work on every cache miss.
// This module reads only the container header. The parsing here is
// deliberately minimal and byte-exact: each format handler reads the fields
// it needs at fixed (or header-discovered) offsets and nothing else.

/// Container formats the probe recognises by magic prefix.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProbeFormat {
    Gif,
    Png,
    Jpeg,
    Bmp,
    Tiff,
    Ico,
}

impl ProbeFormat {
    pub fn name(self) -> &'static str {
        match self {
            ProbeFormat::Gif => "GIF",
            ProbeFormat::Png => "PNG",
            ProbeFormat::Jpeg => "JPEG",
            ProbeFormat::Bmp => "BMP",
            ProbeFormat::Tiff => "TIFF",
            ProbeFormat::Ico => "ICO",
        }
    }
}

/// Identify the container format from the magic prefix, without validating
/// anything past the signature. `None` means "unknown format".
pub fn detect_format(data: &[u8]) -> Option<ProbeFormat> {
    if data.len() >= 6 && (&data[0..6] == b"GIF87a" || &data[0..6] == b"GIF89a") {
        return Some(ProbeFormat::Gif);
    }
    if data.len() >= 8 && data[0..8] == [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A] {
        return Some(ProbeFormat::Png);
    }
    if data.len() >= 2 && data[0] == 0xFF && data[1] == 0xD8 {
        return Some(ProbeFormat::Jpeg);
    }
    if data.len() >= 2 && &data[0..2] == b"BM" {
        return Some(ProbeFormat::Bmp);
    }
    if data.len() >= 4 && (&data[0..4] == b"II*\0" || &data[0..4] == b"MM\0*") {
        return Some(ProbeFormat::Tiff);
    }
    // ICO has no magic string: reserved field must be 0 and type must be 1.
    if data.len() >= 6 && le16(data, 0) == 0 && le16(data, 2) == 1 {
        return Some(ProbeFormat::Ico);
    }
    None
}

/// Extract `(width, height)` from the image header.
///
/// Returns `None` for an unrecognised signature or a buffer too short to hold
/// the fields the format requires. A successful probe can still report a zero
/// dimension — callers treat that as "invalid/unknown" and must not memoize it.
pub fn probe_size(data: &[u8]) -> Option<(u32, u32)> {
    match detect_format(data)? {
        ProbeFormat::Gif => probe_gif(data),
        ProbeFormat::Png => probe_png(data),
        ProbeFormat::Jpeg => probe_jpeg(data),
        ProbeFormat::Bmp => probe_bmp(data),
        ProbeFormat::Tiff => probe_tiff(data),
        ProbeFormat::Ico => probe_ico(data),
    }
}

// ----------------------------------------------------------------------------
// Per-format handlers
// ----------------------------------------------------------------------------

/// GIF logical screen descriptor: LE u16 width at 6, height at 8.
fn probe_gif(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 10 {
        return None;
    }
    Some((le16(data, 6) as u32, le16(data, 8) as u32))
}

/// PNG IHDR: BE u32 width at 16, height at 20. A pre-IHDR variant (very old
/// encoders) stores them at 8 and 16 instead.
fn probe_png(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() >= 24 && &data[12..16] == b"IHDR" {
        return Some((be32(data, 16), be32(data, 20)));
    }
    if data.len() >= 20 {
        return Some((be32(data, 8), be32(data, 16)));
    }
    None
}

/// JPEG: walk the marker segments until a baseline/progressive SOF
/// (0xC0–0xC3). Height precedes width, both BE u16, 3 bytes past the marker
/// (skipping the segment length and the sample precision byte).
fn probe_jpeg(data: &[u8]) -> Option<(u32, u32)> {
    let mut pos = 2usize; // past FFD8
    while pos + 1 < data.len() {
        if data[pos] != 0xFF {
            // Not at a marker boundary — corrupt stream, give up.
            return None;
        }
        // Fill bytes: consecutive 0xFF before the marker code are padding.
        let mut code_at = pos + 1;
        while code_at < data.len() && data[code_at] == 0xFF {
            code_at += 1;
        }
        if code_at >= data.len() {
            return None;
        }
        let code = data[code_at];

        if (0xC0..=0xC3).contains(&code) {
            // SOFn payload: length(2) precision(1) height(2) width(2)
            let h_at = code_at + 4;
            if h_at + 3 >= data.len() {
                return None;
            }
            let height = be16(data, h_at) as u32;
            let width = be16(data, h_at + 2) as u32;
            return Some((width, height));
        }

        // Standalone markers (RSTn, TEM) carry no length field.
        if code == 0x01 || (0xD0..=0xD9).contains(&code) {
            pos = code_at + 1;
            continue;
        }

        if code_at + 2 >= data.len() {
            return None;
        }
        let seg_len = be16(data, code_at + 1) as usize;
        if seg_len < 2 {
            return None;
        }
        // Skip `length - 2` payload bytes (length includes its own 2 bytes).
        pos = code_at + 1 + seg_len;
    }
    None
}

/// BMP: the DIB header size at offset 14 selects the layout. The ancient
/// BITMAPCOREHEADER (size 12) stores u16 dimensions; BITMAPINFOHEADER and
/// later (size ≥ 40) store i32, where a negative height encodes a top-down
/// bitmap and the magnitude is the real height.
fn probe_bmp(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 18 {
        return None;
    }
    let dib_size = le32(data, 14);
    if dib_size == 12 {
        if data.len() < 22 {
            return None;
        }
        return Some((le16(data, 18) as u32, le16(data, 20) as u32));
    }
    if dib_size >= 40 {
        if data.len() < 26 {
            return None;
        }
        let width = le32(data, 18) as i32;
        let height = (le32(data, 22) as i32).unsigned_abs();
        if width < 0 {
            return None;
        }
        return Some((width as u32, height));
    }
    None
}

/// TIFF: follow the header's IFD offset and scan 12-byte directory entries
/// for tag 256 (ImageWidth) and 257 (ImageLength). Values whose declared
/// type fits in 4 bytes are stored inline in the entry's value field.
fn probe_tiff(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 8 {
        return None;
    }
    let little = &data[0..2] == b"II";
    let rd16 = |at: usize| -> Option<u16> {
        if at + 1 < data.len() {
            Some(if little { le16(data, at) } else { be16(data, at) })
        } else {
            None
        }
    };
    let rd32 = |at: usize| -> Option<u32> {
        if at + 3 < data.len() {
            Some(if little { le32(data, at) } else { be32(data, at) })
        } else {
            None
        }
    };

    let ifd = rd32(4)? as usize;
    let count = rd16(ifd)? as usize;

    let mut width: Option<u32> = None;
    let mut height: Option<u32> = None;

    for i in 0..count {
        let entry = ifd + 2 + i * 12;
        let tag = rd16(entry)?;
        if tag != 256 && tag != 257 {
            continue;
        }
        let field_type = rd16(entry + 2)?;
        // Inline values only: BYTE(1), SHORT(3), LONG(4) all fit in 4 bytes.
        let value = match field_type {
            1 => *data.get(entry + 8)? as u32,
            3 => rd16(entry + 8)? as u32,
            4 => rd32(entry + 8)?,
            _ => continue, // value lives behind an offset; out of probe scope
        };
        if tag == 256 {
            width = Some(value);
        } else {
            height = Some(value);
        }
        if let (Some(w), Some(h)) = (width, height) {
            return Some((w, h));
        }
    }
    None
}

/// ICO: first directory entry's width/height are single bytes at 6 and 7,
/// where 0 encodes 256.
fn probe_ico(data: &[u8]) -> Option<(u32, u32)> {
    if data.len() < 8 || le16(data, 4) == 0 {
        return None;
    }
    let decode = |b: u8| -> u32 {
        if b == 0 { 256 } else { b as u32 }
    };
    Some((decode(data[6]), decode(data[7])))
}

// ----------------------------------------------------------------------------
// Byte readers
// ----------------------------------------------------------------------------

fn le16(data: &[u8], at: usize) -> u16 {
    u16::from_le_bytes([data[at], data[at + 1]])
}

fn be16(data: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([data[at], data[at + 1]])
}

fn le32(data: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

fn be32(data: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([data[at], data[at + 1], data[at + 2], data[at + 3]])
}

// ============================================================================
// Tests — one synthetic minimal header per format, no real image data
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gif_header() {
        let mut data = b"GIF89a".to_vec();
        data.extend_from_slice(&320u16.to_le_bytes());
        data.extend_from_slice(&240u16.to_le_bytes());
        assert_eq!(detect_format(&data), Some(ProbeFormat::Gif));
        assert_eq!(probe_size(&data), Some((320, 240)));
    }

    #[test]
    fn png_ihdr_header() {
        // 800×600 as BE u32 at offsets 16/20
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend_from_slice(&13u32.to_be_bytes()); // IHDR chunk length
        data.extend_from_slice(b"IHDR");
        data.extend_from_slice(&800u32.to_be_bytes());
        data.extend_from_slice(&600u32.to_be_bytes());
        assert_eq!(probe_size(&data), Some((800, 600)));
    }

    #[test]
    fn png_pre_ihdr_variant() {
        // Older layout: width at 8, height at 16
        let mut data = vec![0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
        data.extend_from_slice(&1024u32.to_be_bytes()); // offset 8
        data.extend_from_slice(b"____"); // offset 12, not "IHDR"
        data.extend_from_slice(&768u32.to_be_bytes()); // offset 16
        data.extend_from_slice(&[0; 4]);
        assert_eq!(probe_size(&data), Some((1024, 768)));
    }

    #[test]
    fn jpeg_skips_app_segments_to_sof0() {
        let mut data = vec![0xFF, 0xD8];
        // APP0 segment: 16 bytes total (length field counts itself)
        data.extend_from_slice(&[0xFF, 0xE0, 0x00, 0x10]);
        data.extend_from_slice(&[0u8; 14]);
        // SOF0: length(2) precision(1) height(2) width(2)
        data.extend_from_slice(&[0xFF, 0xC0, 0x00, 0x11, 0x08]);
        data.extend_from_slice(&1080u16.to_be_bytes());
        data.extend_from_slice(&1920u16.to_be_bytes());
        assert_eq!(probe_size(&data), Some((1920, 1080)));
    }

    #[test]
    fn jpeg_progressive_sof2() {
        let mut data = vec![0xFF, 0xD8];
        data.extend_from_slice(&[0xFF, 0xC2, 0x00, 0x11, 0x08]);
        data.extend_from_slice(&480u16.to_be_bytes());
        data.extend_from_slice(&640u16.to_be_bytes());
        assert_eq!(probe_size(&data), Some((640, 480)));
    }

    #[test]
    fn bmp_info_header_top_down() {
        let mut data = b"BM".to_vec();
        data.extend_from_slice(&[0u8; 12]); // file size + reserved + data offset
        data.extend_from_slice(&40u32.to_le_bytes()); // BITMAPINFOHEADER
        data.extend_from_slice(&512i32.to_le_bytes());
        data.extend_from_slice(&(-256i32).to_le_bytes()); // top-down
        assert_eq!(probe_size(&data), Some((512, 256)));
    }

    #[test]
    fn bmp_core_header() {
        let mut data = b"BM".to_vec();
        data.extend_from_slice(&[0u8; 12]);
        data.extend_from_slice(&12u32.to_le_bytes()); // BITMAPCOREHEADER
        data.extend_from_slice(&64u16.to_le_bytes());
        data.extend_from_slice(&48u16.to_le_bytes());
        assert_eq!(probe_size(&data), Some((64, 48)));
    }

    #[test]
    fn tiff_little_endian_short_values() {
        let mut data = b"II*\0".to_vec();
        data.extend_from_slice(&8u32.to_le_bytes()); // IFD at offset 8
        data.extend_from_slice(&2u16.to_le_bytes()); // 2 entries
        // tag 256 (width), type SHORT, count 1, value 2048
        data.extend_from_slice(&256u16.to_le_bytes());
        data.extend_from_slice(&3u16.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&2048u16.to_le_bytes());
        data.extend_from_slice(&[0u8; 2]);
        // tag 257 (height), type LONG, count 1, value 1536
        data.extend_from_slice(&257u16.to_le_bytes());
        data.extend_from_slice(&4u16.to_le_bytes());
        data.extend_from_slice(&1u32.to_le_bytes());
        data.extend_from_slice(&1536u32.to_le_bytes());
        assert_eq!(probe_size(&data), Some((2048, 1536)));
    }

    #[test]
    fn tiff_big_endian() {
        let mut data = b"MM\0*".to_vec();
        data.extend_from_slice(&8u32.to_be_bytes());
        data.extend_from_slice(&2u16.to_be_bytes());
        data.extend_from_slice(&256u16.to_be_bytes());
        data.extend_from_slice(&3u16.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&100u16.to_be_bytes());
        data.extend_from_slice(&[0u8; 2]);
        data.extend_from_slice(&257u16.to_be_bytes());
        data.extend_from_slice(&3u16.to_be_bytes());
        data.extend_from_slice(&1u32.to_be_bytes());
        data.extend_from_slice(&50u16.to_be_bytes());
        data.extend_from_slice(&[0u8; 2]);
        assert_eq!(probe_size(&data), Some((100, 50)));
    }

    #[test]
    fn ico_zero_byte_means_256() {
        let mut data = vec![0, 0, 1, 0]; // reserved=0, type=1
        data.extend_from_slice(&1u16.to_le_bytes()); // one entry
        data.push(0); // width 0 → 256
        data.push(32);
        assert_eq!(probe_size(&data), Some((256, 32)));
    }

    #[test]
    fn unknown_signature_reports_nothing() {
        assert_eq!(detect_format(b"not an image at all"), None);
        assert_eq!(probe_size(b"not an image at all"), None);
        assert_eq!(probe_size(&[]), None);
    }

    #[test]
    fn truncated_buffers_do_not_panic() {
        assert_eq!(probe_size(b"GIF89a\x40"), None);
        assert_eq!(probe_size(&[0xFF, 0xD8, 0xFF]), None);
        assert_eq!(probe_size(b"BM"), None);
        assert_eq!(probe_size(b"II*\0\x08"), None);
    }
}
