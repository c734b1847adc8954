//! Wire framing for the control protocol: a request or reply is a list of
//! UTF-8 text frames, each length-prefixed, the whole message prefixed by
//! a frame count. Stands in for the original's zeromq multipart messages
//! (`commandhandler.hpp`) without pulling in a messaging library for a
//! single-reader/single-writer control socket (`spec.md` §5).

use std::io::{self, Read, Write};

const MAX_FRAME_LEN: u32 = 1 << 24;
const MAX_FRAME_COUNT: u16 = 256;

/// Read one multipart message: a `u16` frame count, then for each frame a
/// `u32` length followed by that many UTF-8 bytes. All integers little-endian.
pub fn read_frames<R: Read>(reader: &mut R) -> io::Result<Vec<String>> {
    let count = read_u16(reader)?;
    if count > MAX_FRAME_COUNT {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "frame count exceeds limit"));
    }
    let mut frames = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = read_u32(reader)?;
        if len > MAX_FRAME_LEN {
            return Err(io::Error::new(io::ErrorKind::InvalidData, "frame length exceeds limit"));
        }
        let mut buf = vec![0u8; len as usize];
        reader.read_exact(&mut buf)?;
        let text = String::from_utf8(buf).map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        frames.push(text);
    }
    Ok(frames)
}

/// Write one multipart message in the same framing `read_frames` expects.
pub fn write_frames<W: Write>(writer: &mut W, frames: &[String]) -> io::Result<()> {
    writer.write_all(&(frames.len() as u16).to_le_bytes())?;
    for frame in frames {
        let bytes = frame.as_bytes();
        writer.write_all(&(bytes.len() as u32).to_le_bytes())?;
        writer.write_all(bytes)?;
    }
    writer.flush()
}

fn read_u16<R: Read>(reader: &mut R) -> io::Result<u16> {
    let mut buf = [0u8; 2];
    reader.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}

fn read_u32<R: Read>(reader: &mut R) -> io::Result<u32> {
    let mut buf = [0u8; 4];
    reader.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

/// Whether an I/O error is a would-block/timeout, meaning "no message
/// arrived within this poll interval" rather than a real failure.
pub fn is_poll_timeout(err: &io::Error) -> bool {
    matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn round_trips_a_multipart_message() {
        let mut buf = Vec::new();
        let frames = vec!["graph".to_string(), "start".to_string()];
        write_frames(&mut buf, &frames).unwrap();

        let mut cursor = Cursor::new(buf);
        let decoded = read_frames(&mut cursor).unwrap();
        assert_eq!(decoded, frames);
    }

    #[test]
    fn round_trips_an_empty_message() {
        let mut buf = Vec::new();
        write_frames(&mut buf, &[]).unwrap();
        let mut cursor = Cursor::new(buf);
        assert!(read_frames(&mut cursor).unwrap().is_empty());
    }

    #[test]
    fn truncated_stream_is_an_error() {
        let mut cursor = Cursor::new(vec![1, 0, 5, 0, 0, 0, b'h', b'i']);
        assert!(read_frames(&mut cursor).is_err());
    }
}
