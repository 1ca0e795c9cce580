//! The 16-byte usbmuxd frame header: four little-endian u32s preceding an
//! XML-plist payload.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::Error;

pub const HEADER_LEN: usize = 16;

/// Plist payload, version 1 of the usbmuxd wire protocol.
pub const VERSION_PLIST: u32 = 1;
/// The only request opcode this client ever sends: a plist message.
pub const REQUEST_PLIST: u32 = 8;
/// Tag echoed back by usbmuxd in its reply. Ignored on the way in.
pub const TAG: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    pub total_length: u32,
    pub version: u32,
    pub request: u32,
    pub tag: u32,
}

impl Header {
    /// Length of the payload that follows this header on the wire.
    pub fn payload_len(&self) -> usize {
        (self.total_length as usize) - HEADER_LEN
    }
}

/// Reads and validates a 16-byte usbmuxd header.
pub async fn read_header<S: AsyncRead + Unpin>(stream: &mut S) -> Result<Header, Error> {
    let mut buf = [0u8; HEADER_LEN];
    stream
        .read_exact(&mut buf)
        .await
        .map_err(|_| Error::Protocol("truncated usbmuxd header"))?;

    let mut cursor = &buf[..];
    let total_length = cursor.read_u32::<LittleEndian>().unwrap();
    let version = cursor.read_u32::<LittleEndian>().unwrap();
    let request = cursor.read_u32::<LittleEndian>().unwrap();
    let tag = cursor.read_u32::<LittleEndian>().unwrap();

    if (total_length as usize) < HEADER_LEN {
        return Err(Error::Protocol("usbmuxd header total_length < 16"));
    }

    Ok(Header {
        total_length,
        version,
        request,
        tag,
    })
}

/// Writes a 16-byte usbmuxd header. Fails atomically: either all 16 bytes
/// reach the stream or an error is returned.
pub async fn write_header<S: AsyncWrite + Unpin>(
    stream: &mut S,
    total_length: u32,
) -> Result<(), Error> {
    let mut buf = Vec::with_capacity(HEADER_LEN);
    buf.write_u32::<LittleEndian>(total_length).unwrap();
    buf.write_u32::<LittleEndian>(VERSION_PLIST).unwrap();
    buf.write_u32::<LittleEndian>(REQUEST_PLIST).unwrap();
    buf.write_u32::<LittleEndian>(TAG).unwrap();

    stream.write_all(&buf).await.map_err(Error::Socket)?;
    Ok(())
}

/// Reads exactly `header.payload_len()` bytes following a header already read.
pub async fn read_payload<S: AsyncRead + Unpin>(
    stream: &mut S,
    header: &Header,
) -> Result<Vec<u8>, Error> {
    let mut buf = vec![0u8; header.payload_len()];
    stream.read_exact(&mut buf).await.map_err(Error::Socket)?;
    Ok(buf)
}

/// Writes a full frame: header followed by `payload`.
pub async fn write_frame<S: AsyncWrite + Unpin>(
    stream: &mut S,
    payload: &[u8],
) -> Result<(), Error> {
    let total_length = (HEADER_LEN + payload.len()) as u32;
    write_header(stream, total_length).await?;
    stream.write_all(payload).await.map_err(Error::Socket)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn header_round_trip() {
        let (mut a, mut b) = duplex(64);
        write_frame(&mut a, b"hello").await.unwrap();

        let header = read_header(&mut b).await.unwrap();
        assert_eq!(header.version, VERSION_PLIST);
        assert_eq!(header.request, REQUEST_PLIST);
        assert_eq!(header.tag, TAG);
        assert_eq!(header.payload_len(), 5);

        let payload = read_payload(&mut b, &header).await.unwrap();
        assert_eq!(payload, b"hello");
    }

    #[tokio::test]
    async fn truncated_header_is_protocol_error() {
        let (mut a, mut b) = duplex(64);
        a.shutdown().await.unwrap();
        drop(a);
        let err = read_header(&mut b).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
