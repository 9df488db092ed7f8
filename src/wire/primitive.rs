//! Primitive encode/decode helpers for the fixed-layout message format.
//!
//! Every field is big-endian. Length-prefixed fields carry a `u32` byte
//! count followed by the raw bytes; callers pass a `max_len` bound so a
//! corrupt or hostile peer can't force an unbounded allocation.

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::Error;

pub type Result<T> = std::result::Result<T, Error>;

pub async fn read_u32<R: AsyncRead + Unpin>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf).await.map_err(Error::Io)?;
    Ok(BigEndian::read_u32(&buf))
}

pub async fn read_u64<R: AsyncRead + Unpin>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf).await.map_err(Error::Io)?;
    Ok(BigEndian::read_u64(&buf))
}

pub async fn read_bytes<R: AsyncRead + Unpin>(r: &mut R, max_len: usize) -> Result<Vec<u8>> {
    let len = read_u32(r).await? as usize;
    if len > max_len {
        return Err(Error::TooLarge { len, max_len });
    }
    let mut buf = vec![0u8; len];
    r.read_exact(&mut buf).await.map_err(Error::Io)?;
    Ok(buf)
}

pub async fn read_string<R: AsyncRead + Unpin>(r: &mut R, max_len: usize) -> Result<String> {
    let bytes = read_bytes(r, max_len).await?;
    String::from_utf8(bytes).map_err(|_| Error::BadUtf8)
}

pub async fn write_u32<W: AsyncWrite + Unpin>(w: &mut W, v: u32) -> Result<()> {
    let mut buf = [0u8; 4];
    BigEndian::write_u32(&mut buf, v);
    w.write_all(&buf).await.map_err(Error::Io)
}

pub async fn write_u64<W: AsyncWrite + Unpin>(w: &mut W, v: u64) -> Result<()> {
    let mut buf = [0u8; 8];
    BigEndian::write_u64(&mut buf, v);
    w.write_all(&buf).await.map_err(Error::Io)
}

pub async fn write_bytes<W: AsyncWrite + Unpin>(w: &mut W, data: &[u8]) -> Result<()> {
    write_u32(w, data.len() as u32).await?;
    w.write_all(data).await.map_err(Error::Io)
}

pub async fn write_string<W: AsyncWrite + Unpin>(w: &mut W, s: &str) -> Result<()> {
    write_bytes(w, s.as_bytes()).await
}
