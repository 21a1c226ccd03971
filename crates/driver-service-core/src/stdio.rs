use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::Mutex;
use tokio_stream::StreamExt;
use tokio_util::bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, FramedRead};
use tracing::warn;

type Sink = Arc<Mutex<Box<dyn AsyncWrite + Unpin + Sync + Send>>>;

/// Destination for the driver's standard output
#[derive(Clone)]
pub struct ServiceStdOut(Sink);

impl ServiceStdOut {
    pub fn new(t: Box<dyn AsyncWrite + Unpin + Sync + Send>) -> ServiceStdOut {
        ServiceStdOut(Arc::new(Mutex::new(t)))
    }

    /// The caller's own stdout
    pub fn inherit() -> ServiceStdOut {
        Self::new(Box::new(tokio::io::stdout()))
    }

    pub fn inner(&self) -> Sink {
        self.0.clone()
    }
}

/// Destination for the driver's standard error
#[derive(Clone)]
pub struct ServiceStdErr(Sink);

impl ServiceStdErr {
    pub fn new(t: Box<dyn AsyncWrite + Unpin + Sync + Send>) -> ServiceStdErr {
        ServiceStdErr(Arc::new(Mutex::new(t)))
    }

    /// The caller's own stderr
    pub fn inherit() -> ServiceStdErr {
        Self::new(Box::new(tokio::io::stderr()))
    }

    pub fn inner(&self) -> Sink {
        self.0.clone()
    }
}

#[derive(Clone, derive_more::From)]
pub enum ServiceStdio {
    Out(ServiceStdOut),
    Err(ServiceStdErr),
}

impl ServiceStdio {
    pub fn inner(&self) -> Sink {
        match self {
            ServiceStdio::Out(out) => out.inner(),
            ServiceStdio::Err(err) => err.inner(),
        }
    }
}

/// Open `path` for appending and share it between both driver streams
pub(crate) fn file_sinks(path: &Path) -> std::io::Result<(ServiceStdOut, ServiceStdErr)> {
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    let writer: Box<dyn AsyncWrite + Unpin + Sync + Send> =
        Box::new(tokio::fs::File::from_std(file));
    let sink: Sink = Arc::new(Mutex::new(writer));
    Ok((ServiceStdOut(sink.clone()), ServiceStdErr(sink)))
}

/// Splits the driver's output into text, replacing invalid UTF-8 with U+FFFD
struct Utf8Codec;

impl Decoder for Utf8Codec {
    type Item = String;
    type Error = anyhow::Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }

        let end = match std::str::from_utf8(&src[..]) {
            Ok(_) => src.len(),
            // Incomplete multi-byte sequence at the end: wait for the rest
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => e.valid_up_to() + e.error_len().unwrap_or(1),
        };
        if end == 0 {
            return Ok(None);
        }

        let out = String::from_utf8_lossy(&src[..end]).into_owned();
        src.advance(end);
        Ok(Some(out))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        match self.decode(src)? {
            Some(frame) => Ok(Some(frame)),
            None if src.is_empty() => Ok(None),
            // Truncated sequence left at EOF
            None => {
                let out = String::from_utf8_lossy(&src[..]).into_owned();
                src.clear();
                Ok(Some(out))
            }
        }
    }
}

/// Forward everything read from `io` into `out` until EOF
///
/// A failing sink never stops the pipe from being drained; the driver would
/// otherwise block or die on its next write.
pub async fn stream<A: AsyncRead + Unpin>(io: A, out: impl Into<ServiceStdio>) -> std::io::Result<()> {
    let out = out.into();
    let mut frames = FramedRead::with_capacity(io, Utf8Codec, 1024);
    let mut sink_failed = false;

    while let Some(frame) = frames.next().await {
        let text = frame.map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if sink_failed {
            continue;
        }

        let sink = out.inner();
        let mut sink = sink.lock().await;
        let written = match sink.write_all(text.as_bytes()).await {
            Ok(()) => sink.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            warn!(error = %e, "Driver output sink failed, discarding further output");
            sink_failed = true;
        }
    }

    Ok(())
}
