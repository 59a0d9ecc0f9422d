use std::collections::HashMap;
use std::io;
use std::io::{Error, Write};
use std::net::SocketAddr;
use std::sync::Weak;
use std::time::Duration;

use bytes::{Buf, BytesMut};
use kcp::Kcp;
use tokio::net::UdpSocket;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::mpsc::{Receiver, Sender};
use tokio::time::{Instant, Interval, MissedTickBehavior};

use crate::config::{KcpConfig, SESSION_QUEUE};
use crate::stream::KcpStream;

pub(crate) const KCP_HEADER_LEN: usize = 24;
const KCP_CMD_PUSH: u8 = 81;
const CLOSE_MARK: u8 = 0xFF;
const CLOSE_REPEAT: usize = 3;

pub(crate) fn conv_of(buf: &[u8]) -> Option<u32> {
    let conv = buf.get(..4)?;
    Some(u32::from_le_bytes([conv[0], conv[1], conv[2], conv[3]]))
}

/// The first data segment of a conversation: a PUSH with sequence number 0.
pub(crate) fn is_opening_segment(buf: &[u8]) -> bool {
    buf.len() >= KCP_HEADER_LEN && buf[4] == KCP_CMD_PUSH && buf[12..16] == [0, 0, 0, 0]
}

/// `conv(le32) | 0xFF`. Shorter than any KCP header, so it never parses as a segment.
pub(crate) fn close_datagram(conv: u32) -> [u8; 5] {
    let c = conv.to_le_bytes();
    [c[0], c[1], c[2], c[3], CLOSE_MARK]
}

pub(crate) fn is_close_datagram(buf: &[u8], conv: u32) -> bool {
    buf.len() == 5 && buf[4] == CLOSE_MARK && conv_of(buf) == Some(conv)
}

/// Datagram sink of one session. Only the socket's receive task owns the
/// socket; sessions see it weakly and go quiet once it is gone.
#[derive(Clone)]
pub(crate) struct KcpOutput {
    pub(crate) addr: SocketAddr,
    pub(crate) socket: Weak<UdpSocket>,
}

impl KcpOutput {
    fn send_close(&self, conv: u32) {
        let Some(socket) = self.socket.upgrade() else {
            return;
        };
        let buf = close_datagram(conv);
        for _ in 0..CLOSE_REPEAT {
            if let Err(e) = socket.try_send_to(&buf, self.addr) {
                log::debug!("close {conv} to {}: {e:?}", self.addr);
                break;
            }
        }
    }
}

impl Write for KcpOutput {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let Some(socket) = self.socket.upgrade() else {
            return Ok(buf.len());
        };
        match socket.try_send_to(buf, self.addr) {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => {}
            Err(e) => Err(e)?,
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

pub(crate) fn new_kcp(conv: u32, output: KcpOutput, config: &KcpConfig) -> Kcp<KcpOutput> {
    let mut kcp = Kcp::new_stream(conv, output);
    kcp.set_wndsize(config.snd_wnd, config.rcv_wnd);
    kcp.set_nodelay(
        config.nodelay,
        config.interval as i32,
        config.resend,
        config.no_congestion_control,
    );
    kcp
}

fn now_millis() -> u32 {
    let now = std::time::SystemTime::now();
    let millis = now
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    millis.as_millis() as u32
}

#[derive(Debug)]
enum Event {
    Input(BytesMut),
    InputClosed,
    Output(BytesMut),
    OutputClosed,
    Timeout,
}

/// Drives one KCP session until the peer closes, the local side finishes
/// lingering, the session idles out or its datagram source goes away.
///
/// Dropping `data_in_sender` on return is what hands EOF to the reader.
pub(crate) async fn kcp_run(
    conv: u32,
    mut kcp: Kcp<KcpOutput>,
    output: KcpOutput,
    config: KcpConfig,
    mut input: Receiver<BytesMut>,
    mut data_out_receiver: Receiver<BytesMut>,
    data_in_sender: Sender<BytesMut>,
) -> io::Result<()> {
    let mut interval: Interval = tokio::time::interval(Duration::from_millis(config.interval));
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut buf = vec![0; 65536];
    let mut data_in_sender = Some(data_in_sender);
    let mut input_data = Option::<BytesMut>::None;
    let mut last_input = Instant::now();
    let mut linger_deadline = Option::<Instant>::None;

    loop {
        let writable = linger_deadline.is_none() && kcp.wait_snd() < kcp.snd_wnd() as usize;
        let readable = input_data.is_none();
        let event = tokio::select! {
            rs = input.recv(), if readable => match rs {
                Some(buf) => Event::Input(buf),
                None => Event::InputClosed,
            },
            rs = data_out_receiver.recv(), if writable => match rs {
                Some(buf) => Event::Output(buf),
                None => Event::OutputClosed,
            },
            _ = interval.tick() => Event::Timeout,
        };
        if let Some(mut buf) = input_data.take() {
            let len = kcp.input(&buf).map_err(Error::other)?;
            if len < buf.len() {
                buf.advance(len);
                input_data.replace(buf);
            }
        }
        match event {
            Event::Input(mut buf) => {
                last_input = Instant::now();
                if is_close_datagram(&buf, conv) {
                    log::debug!("kcp {conv} closed by {}", output.addr);
                    return Ok(());
                }
                match kcp.input(&buf) {
                    Ok(len) => {
                        if len < buf.len() {
                            buf.advance(len);
                            input_data.replace(buf);
                        }
                    }
                    Err(e) => log::debug!("kcp {conv} input from {}: {e:?}", output.addr),
                }
            }
            Event::InputClosed => {
                log::debug!("kcp {conv} lost its socket");
                return Ok(());
            }
            Event::Output(buf) => {
                kcp.send(&buf).map_err(Error::other)?;
            }
            Event::OutputClosed => {
                linger_deadline = Some(Instant::now() + config.linger);
            }
            Event::Timeout => {
                kcp.update(now_millis()).map_err(Error::other)?;
                if last_input.elapsed() >= config.idle_timeout {
                    log::info!("kcp {conv} with {} idle, closing", output.addr);
                    output.send_close(conv);
                    return Ok(());
                }
            }
        }

        while let Ok(len) = kcp.recv(&mut buf) {
            let Some(sender) = data_in_sender.as_ref() else {
                continue;
            };
            if sender.send(buf[..len].into()).await.is_err() {
                data_in_sender = None;
            }
        }

        if let Some(deadline) = linger_deadline {
            if kcp.wait_snd() == 0 || Instant::now() >= deadline {
                if kcp.wait_snd() > 0 {
                    log::warn!(
                        "kcp {conv} closing with {} unacknowledged segments",
                        kcp.wait_snd()
                    );
                }
                output.send_close(conv);
                return Ok(());
            }
        }
    }
}

/// Routes the datagrams of one listening socket to their sessions and admits
/// new conversations.
pub(crate) struct KcpHandle {
    local_addr: SocketAddr,
    socket: Weak<UdpSocket>,
    config: KcpConfig,
    accept_sender: flume::Sender<KcpStream>,
    map: HashMap<(SocketAddr, u32), Sender<BytesMut>>,
    retired: HashMap<(SocketAddr, u32), Instant>,
}

impl KcpHandle {
    pub fn new(
        local_addr: SocketAddr,
        socket: Weak<UdpSocket>,
        config: KcpConfig,
        accept_sender: flume::Sender<KcpStream>,
    ) -> Self {
        Self {
            local_addr,
            socket,
            config,
            accept_sender,
            map: Default::default(),
            retired: Default::default(),
        }
    }

    pub fn handle(&mut self, buf: &[u8], remote_addr: SocketAddr) {
        let Some(conv) = conv_of(buf) else {
            return;
        };
        let key = (remote_addr, conv);
        if let Some(sender) = self.map.get(&key) {
            match sender.try_send(buf.into()) {
                Ok(_) => {}
                Err(TrySendError::Full(_)) => {
                    log::debug!("kcp {conv} from {remote_addr} lagging, datagram dropped");
                }
                Err(TrySendError::Closed(_)) => {
                    self.map.remove(&key);
                    self.retired.insert(key, Instant::now());
                }
            }
            return;
        }
        if !is_opening_segment(buf) {
            return;
        }
        let retire_time = self.config.retire_time;
        self.retired.retain(|_, at| at.elapsed() < retire_time);
        if self.retired.contains_key(&key) {
            return;
        }
        self.map.retain(|_, sender| !sender.is_closed());
        if self.map.keys().any(|(addr, _)| *addr == remote_addr) {
            log::debug!("kcp {conv} from {remote_addr} ignored, address has a live session");
            return;
        }

        let (input_sender, input_receiver) = tokio::sync::mpsc::channel(SESSION_QUEUE);
        _ = input_sender.try_send(buf.into());
        let output = KcpOutput {
            addr: remote_addr,
            socket: self.socket.clone(),
        };
        let stream = KcpStream::spawn(conv, self.local_addr, output, input_receiver, &self.config);
        match self.accept_sender.try_send(stream) {
            Ok(_) => {
                log::debug!("kcp {conv} opened by {remote_addr}");
                self.map.insert(key, input_sender);
            }
            Err(e) => {
                log::warn!("kcp {conv} from {remote_addr} refused: {e}");
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn segment(conv: u32, cmd: u8, sn: u32, data: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(KCP_HEADER_LEN + data.len());
        buf.extend_from_slice(&conv.to_le_bytes());
        buf.push(cmd);
        buf.push(0);
        buf.extend_from_slice(&128u16.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&sn.to_le_bytes());
        buf.extend_from_slice(&0u32.to_le_bytes());
        buf.extend_from_slice(&(data.len() as u32).to_le_bytes());
        buf.extend_from_slice(data);
        buf
    }

    #[test]
    fn opening_segment() {
        assert!(is_opening_segment(&segment(7, KCP_CMD_PUSH, 0, b"hi")));
        assert!(!is_opening_segment(&segment(7, KCP_CMD_PUSH, 1, b"hi")));
        // ack
        assert!(!is_opening_segment(&segment(7, 82, 0, b"")));
        assert!(!is_opening_segment(&close_datagram(7)));
    }

    #[test]
    fn close_datagram_carries_conv() {
        let buf = close_datagram(0x01020304);
        assert_eq!(buf, [4, 3, 2, 1, 0xFF]);
        assert!(is_close_datagram(&buf, 0x01020304));
        assert!(!is_close_datagram(&buf, 5));
        assert!(!is_close_datagram(&segment(0x01020304, KCP_CMD_PUSH, 0, b""), 0x01020304));
    }
}
