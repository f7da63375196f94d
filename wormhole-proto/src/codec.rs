use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use thiserror::Error;

use crate::{PackageHeader, PackageType, HEADER_SIZE, MAJOR_VERSION};

/// Frames declaring a payload larger than this are rejected.
pub const MAX_PAYLOAD_SIZE: usize = 16 * 1024 * 1024;

/// A fault at the framing layer.
///
/// There is no resync marker in the protocol, so any of these is fatal for
/// the stream: the session must be terminated, not skipped past.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("unexpected end of stream")]
    UnexpectedEnd,

    #[error("payload of {size} bytes exceeds the {max} byte limit")]
    TooLarge { size: usize, max: usize },

    #[error("unsupported package type {0:#04x}")]
    UnsupportedType(u8),

    #[error("unsupported flags {0:#04x}")]
    UnsupportedFlags(u8),

    #[error("unsupported version {0}.{1}.{2}")]
    UnsupportedVersion(u8, u8, u8),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reads frames off a byte stream, one at a time.
pub struct FrameReader<R> {
    inner: R,
    max_payload: usize,
}

impl<R: AsyncRead + Unpin> FrameReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            max_payload: MAX_PAYLOAD_SIZE,
        }
    }

    /// Override the payload size limit, for tests or constrained deployments.
    pub fn with_max_payload(inner: R, max_payload: usize) -> Self {
        Self { inner, max_payload }
    }

    /// Read one frame, returning its payload.
    ///
    /// Returns `None` when the stream ends cleanly on a frame boundary; EOF
    /// anywhere inside a frame is [`FrameError::UnexpectedEnd`].
    pub async fn read(&mut self) -> Result<Option<Vec<u8>>, FrameError> {
        let mut header = [0u8; HEADER_SIZE];

        // Read the header byte-wise so EOF before the first byte can be told
        // apart from EOF mid-header.
        let mut filled = 0;
        while filled < HEADER_SIZE {
            let n = self.inner.read(&mut header[filled..]).await?;
            if n == 0 {
                if filled == 0 {
                    return Ok(None);
                }
                return Err(FrameError::UnexpectedEnd);
            }
            filled += n;
        }

        let header = PackageHeader::decode(&mut &header[..])
            .map_err(|_| FrameError::UnexpectedEnd)?;

        let (major, minor, fix) = header.version_parts();
        if major != MAJOR_VERSION {
            return Err(FrameError::UnsupportedVersion(major, minor, fix));
        }

        if header.package_type != PackageType::MESSAGE {
            return Err(FrameError::UnsupportedType(header.package_type.0));
        }

        // The compression bit (and everything else) is reserved.
        if header.flags != 0 {
            return Err(FrameError::UnsupportedFlags(header.flags));
        }

        let size = header.payload_len as usize;
        if size > self.max_payload {
            return Err(FrameError::TooLarge {
                size,
                max: self.max_payload,
            });
        }

        let mut payload = vec![0u8; size];
        self.inner
            .read_exact(&mut payload)
            .await
            .map_err(|err| match err.kind() {
                std::io::ErrorKind::UnexpectedEof => FrameError::UnexpectedEnd,
                _ => FrameError::Io(err),
            })?;

        Ok(Some(payload))
    }
}

/// Writes frames onto a byte stream.
///
/// Header and payload are emitted as a single write, so a writer shared
/// between tasks stays atomic per frame as long as callers serialize access
/// to it (the sessions hold a mutex across each [`FrameWriter::write`] call).
pub struct FrameWriter<W> {
    inner: W,
}

impl<W: AsyncWrite + Unpin> FrameWriter<W> {
    pub fn new(inner: W) -> Self {
        Self { inner }
    }

    pub fn into_inner(self) -> W {
        self.inner
    }

    /// Frame and write one payload.
    pub async fn write(&mut self, payload: &[u8]) -> Result<(), FrameError> {
        let len = payload.len().try_into().map_err(|_| FrameError::TooLarge {
            size: payload.len(),
            max: u32::MAX as usize,
        })?;

        let header = PackageHeader::new(PackageType::MESSAGE, len);

        let mut buf = Vec::with_capacity(HEADER_SIZE + payload.len());
        header.encode(&mut buf);
        buf.extend_from_slice(payload);

        self.inner.write_all(&buf).await?;
        self.inner.flush().await?;

        Ok(())
    }
}
