use std::time::Duration;

pub(crate) const DEFAULT_WINDOW: u16 = 128;
pub(crate) const SESSION_QUEUE: usize = 128;
pub(crate) const RETIRE_TIME: Duration = Duration::from_secs(60);

/// Tuning of every KCP session created by a listener or a dialer.
///
/// The defaults enable nodelay mode with a 10 ms clock, fast resend after two
/// skipped acks and normal congestion control.
#[derive(Clone, Debug)]
pub struct KcpConfig {
    pub snd_wnd: u16,
    pub rcv_wnd: u16,
    pub nodelay: bool,
    /// Internal update clock in milliseconds.
    pub interval: u64,
    pub resend: i32,
    /// Disables congestion control when set.
    pub no_congestion_control: bool,
    /// How long a closed writer keeps retransmitting unacknowledged data
    /// before the close datagram is sent regardless.
    pub linger: Duration,
    /// A session that receives nothing for this long is torn down.
    pub idle_timeout: Duration,
    /// How long a finished conversation is remembered, so late retransmissions
    /// of its first segment are not taken for a new session.
    pub retire_time: Duration,
}

impl Default for KcpConfig {
    fn default() -> Self {
        Self {
            snd_wnd: DEFAULT_WINDOW,
            rcv_wnd: DEFAULT_WINDOW,
            nodelay: true,
            interval: 10,
            resend: 2,
            no_congestion_control: false,
            linger: Duration::from_secs(10),
            idle_timeout: Duration::from_secs(5 * 60),
            retire_time: RETIRE_TIME,
        }
    }
}

impl KcpConfig {
    pub fn set_wndsize(mut self, snd_wnd: u16, rcv_wnd: u16) -> Self {
        self.snd_wnd = snd_wnd;
        self.rcv_wnd = rcv_wnd;
        self
    }
    pub fn set_nodelay(mut self, nodelay: bool, interval: u64, resend: i32, nc: bool) -> Self {
        self.nodelay = nodelay;
        self.interval = interval.max(1);
        self.resend = resend;
        self.no_congestion_control = nc;
        self
    }
    pub fn set_linger(mut self, linger: Duration) -> Self {
        self.linger = linger;
        self
    }
    pub fn set_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.idle_timeout = idle_timeout;
        self
    }
    pub fn set_retire_time(mut self, retire_time: Duration) -> Self {
        self.retire_time = retire_time;
        self
    }
}
