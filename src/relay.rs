use std::io;
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;

use crate::error::{Error, Result};

/// Connects to a local service, giving up after `timeout`.
pub async fn dial_tcp(target: &str, timeout: Duration) -> Result<TcpStream> {
    match tokio::time::timeout(timeout, TcpStream::connect(target)).await {
        Ok(Ok(stream)) => {
            _ = stream.set_nodelay(true);
            Ok(stream)
        }
        Ok(Err(source)) => Err(Error::Dial {
            target: target.to_string(),
            source,
        }),
        Err(_) => Err(Error::Dial {
            target: target.to_string(),
            source: io::Error::new(io::ErrorKind::TimedOut, format!("no answer in {timeout:?}")),
        }),
    }
}

/// Copies both ways between `a` and `b` until either direction ends, then
/// drops both. The result is that of the direction that ended first.
pub async fn relay<A, B>(a: A, b: B) -> io::Result<()>
where
    A: AsyncRead + AsyncWrite,
    B: AsyncRead + AsyncWrite,
{
    let (a_reader, a_writer) = tokio::io::split(a);
    let (b_reader, b_writer) = tokio::io::split(b);
    pipe(a_reader, a_writer, b_reader, b_writer).await
}

/// [`relay`] for peers whose halves are separate objects, such as stdin and stdout.
pub async fn pipe<AR, AW, BR, BW>(
    mut a_reader: AR,
    mut a_writer: AW,
    mut b_reader: BR,
    mut b_writer: BW,
) -> io::Result<()>
where
    AR: AsyncRead + Unpin,
    AW: AsyncWrite + Unpin,
    BR: AsyncRead + Unpin,
    BW: AsyncWrite + Unpin,
{
    tokio::select! {
        rs = tokio::io::copy(&mut a_reader, &mut b_writer) => {
            let len = rs?;
            log::debug!("relay: {len} bytes forward, forward side finished first");
        }
        rs = tokio::io::copy(&mut b_reader, &mut a_writer) => {
            let len = rs?;
            log::debug!("relay: {len} bytes back, back side finished first");
        }
    }
    Ok(())
}
