use std::io;
use std::io::Error;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::{Buf, BytesMut};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::UdpSocket;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio_util::sync::PollSender;

use crate::config::{KcpConfig, SESSION_QUEUE};
use crate::kcp::{conv_of, kcp_run, new_kcp, KcpOutput};

/// Largest chunk handed to KCP per write; bigger writes are accepted partially.
const MAX_WRITE: usize = 16 * 1024;

/// One reliable, ordered byte stream over UDP.
///
/// Shutting down the write half (or dropping the stream) flushes what is
/// still unacknowledged and then tells the peer the conversation is over.
pub struct KcpStream {
    conv: u32,
    local_addr: SocketAddr,
    remote_addr: SocketAddr,
    last_buf: Option<BytesMut>,
    receiver: Receiver<BytesMut>,
    sender: PollSender<BytesMut>,
}

impl KcpStream {
    pub(crate) fn spawn(
        conv: u32,
        local_addr: SocketAddr,
        output: KcpOutput,
        input: Receiver<BytesMut>,
        config: &KcpConfig,
    ) -> Self {
        let remote_addr = output.addr;
        let kcp = new_kcp(conv, output.clone(), config);
        let (data_in_sender, data_in_receiver) = tokio::sync::mpsc::channel(SESSION_QUEUE);
        let (data_out_sender, data_out_receiver) = tokio::sync::mpsc::channel(SESSION_QUEUE);
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = kcp_run(
                conv,
                kcp,
                output,
                config,
                input,
                data_out_receiver,
                data_in_sender,
            )
            .await
            {
                log::warn!("kcp run {conv} {remote_addr}: {e:?}");
            }
        });
        KcpStream {
            conv,
            local_addr,
            remote_addr,
            last_buf: None,
            receiver: data_in_receiver,
            sender: PollSender::new(data_out_sender),
        }
    }

    /// Opens a session to `remote_addr` from a fresh ephemeral UDP port.
    ///
    /// Nothing is exchanged until the first write; the listener learns of the
    /// session from its first data segment.
    pub async fn connect(remote_addr: SocketAddr, config: &KcpConfig) -> io::Result<KcpStream> {
        let bind_addr: SocketAddr = if remote_addr.is_ipv4() {
            (Ipv4Addr::UNSPECIFIED, 0).into()
        } else {
            (Ipv6Addr::UNSPECIFIED, 0).into()
        };
        let socket = Arc::new(natt_core::socket::bind_udp(bind_addr)?);
        let local_addr = socket.local_addr()?;
        let conv: u32 = rand::random();
        let (input_sender, input_receiver) = tokio::sync::mpsc::channel(SESSION_QUEUE);
        let output = KcpOutput {
            addr: remote_addr,
            socket: Arc::downgrade(&socket),
        };
        let stream = KcpStream::spawn(conv, local_addr, output, input_receiver, config);
        tokio::spawn(async move {
            if let Err(e) = dial_recv(socket, remote_addr, conv, input_sender).await {
                log::debug!("kcp {conv} recv {remote_addr}: {e:?}");
            }
        });
        log::debug!("kcp {conv} dialing {remote_addr} from {local_addr}");
        Ok(stream)
    }

    pub fn conv(&self) -> u32 {
        self.conv
    }
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }
    pub fn remote_addr(&self) -> SocketAddr {
        self.remote_addr
    }
}

/// Receive task of a dialed session. Owns the socket, so the port is released
/// as soon as the session ends.
async fn dial_recv(
    socket: Arc<UdpSocket>,
    remote_addr: SocketAddr,
    conv: u32,
    input_sender: Sender<BytesMut>,
) -> io::Result<()> {
    let mut buf = vec![0; 65536];
    loop {
        let (len, addr) = tokio::select! {
            rs = socket.recv_from(&mut buf) => match rs {
                Ok(rs) => rs,
                Err(e) if e.kind() == io::ErrorKind::ConnectionReset => continue,
                Err(e) => return Err(e),
            },
            _ = input_sender.closed() => return Ok(()),
        };
        if addr != remote_addr || conv_of(&buf[..len]) != Some(conv) {
            continue;
        }
        if input_sender.send(buf[..len].into()).await.is_err() {
            return Ok(());
        }
    }
}

impl AsyncWrite for KcpStream {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<Result<usize, Error>> {
        if buf.is_empty() {
            return Poll::Ready(Ok(0));
        }
        match self.sender.poll_reserve(cx) {
            Poll::Ready(Ok(_)) => {
                let len = buf.len().min(MAX_WRITE);
                match self.sender.send_item(buf[..len].into()) {
                    Ok(_) => {}
                    Err(_) => return Poll::Ready(Err(io::Error::from(io::ErrorKind::WriteZero))),
                };
                Poll::Ready(Ok(len))
            }
            Poll::Ready(Err(_)) => Poll::Ready(Err(io::Error::from(io::ErrorKind::WriteZero))),
            Poll::Pending => Poll::Pending,
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Result<(), Error>> {
        self.sender.close();
        Poll::Ready(Ok(()))
    }
}

impl AsyncRead for KcpStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if let Some(p) = self.last_buf.as_mut() {
            let len = buf.remaining().min(p.len());
            buf.put_slice(&p[..len]);
            p.advance(len);
            if p.is_empty() {
                self.last_buf.take();
            }
            return Poll::Ready(Ok(()));
        }
        match self.receiver.poll_recv(cx) {
            Poll::Ready(None) => Poll::Ready(Ok(())),
            Poll::Ready(Some(mut p)) => {
                let len = buf.remaining().min(p.len());
                buf.put_slice(&p[..len]);
                p.advance(len);
                if !p.is_empty() {
                    self.last_buf.replace(p);
                }
                Poll::Ready(Ok(()))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}
