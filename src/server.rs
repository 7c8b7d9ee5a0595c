use crate::{
    dns::{DNSPacket, MAX_UDP_PAYLOAD, ParseError},
    error::ServerError,
    reply::ReplyAssembler,
};
use std::fmt;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, error, info, trace, warn};

/// Largest datagram read from a client
const UDP_RECV_BUFFER: usize = 4096;
/// How long the surviving listener gets to stop after the other one ended
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Transport {
    Udp,
    Tcp,
}

impl fmt::Display for Transport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Transport::Udp => write!(f, "UDP"),
            Transport::Tcp => write!(f, "TCP"),
        }
    }
}

/// Authoritative server listening on UDP and TCP at one address.
///
/// `run` returns as soon as either listener stops. A listener stops on a
/// fatal socket error, a panic, or the shutdown signal; when one stops the
/// other is signalled too.
pub struct DnsServer {
    udp: Arc<UdpSocket>,
    tcp: TcpListener,
    local_addr: SocketAddr,
    assembler: Arc<ReplyAssembler>,
    tcp_idle_timeout: Duration,
    shutdown_tx: broadcast::Sender<()>,
    udp_shutdown: broadcast::Receiver<()>,
    tcp_shutdown: broadcast::Receiver<()>,
}

impl DnsServer {
    /// Binds both sockets. TCP binds to the address UDP ended up on, so
    /// port 0 gives both transports the same port.
    pub async fn bind(addr: SocketAddr, assembler: Arc<ReplyAssembler>) -> Result<Self, ServerError> {
        let udp = UdpSocket::bind(addr).await.map_err(|source| ServerError::Bind {
            transport: Transport::Udp,
            addr,
            source,
        })?;
        let local_addr = udp.local_addr().map_err(|source| ServerError::Bind {
            transport: Transport::Udp,
            addr,
            source,
        })?;
        let tcp = TcpListener::bind(local_addr)
            .await
            .map_err(|source| ServerError::Bind {
                transport: Transport::Tcp,
                addr: local_addr,
                source,
            })?;

        // Subscribed here so a shutdown sent before `run` is not lost
        let (shutdown_tx, udp_shutdown) = broadcast::channel(1);
        let tcp_shutdown = shutdown_tx.subscribe();

        Ok(Self {
            udp: Arc::new(udp),
            tcp,
            local_addr,
            assembler,
            tcp_idle_timeout: Duration::from_secs(30),
            shutdown_tx,
            udp_shutdown,
            tcp_shutdown,
        })
    }

    pub fn with_tcp_idle_timeout(mut self, idle_timeout: Duration) -> Self {
        self.tcp_idle_timeout = idle_timeout;
        self
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Sending on the returned channel stops both listeners.
    pub fn shutdown_handle(&self) -> broadcast::Sender<()> {
        self.shutdown_tx.clone()
    }

    pub async fn run(self) -> Result<(), ServerError> {
        let DnsServer {
            udp,
            tcp,
            local_addr,
            assembler,
            tcp_idle_timeout,
            shutdown_tx,
            udp_shutdown,
            tcp_shutdown,
        } = self;

        let udp_task = tokio::spawn(run_udp_server(udp, assembler.clone(), udp_shutdown));
        let tcp_task = tokio::spawn(run_tcp_server(
            tcp,
            assembler,
            tcp_idle_timeout,
            tcp_shutdown,
        ));
        info!("DNS server listening on {} (UDP + TCP)", local_addr);

        supervise(udp_task, tcp_task, shutdown_tx, SHUTDOWN_GRACE).await
    }
}

/// Waits for the first listener loop to end, signals the other one and gives
/// it `grace` to stop before aborting it. Returns the first loop's result.
async fn supervise(
    mut udp_task: JoinHandle<Result<(), ServerError>>,
    mut tcp_task: JoinHandle<Result<(), ServerError>>,
    shutdown_tx: broadcast::Sender<()>,
    grace: Duration,
) -> Result<(), ServerError> {
    let (transport, outcome) = tokio::select! {
        res = &mut udp_task => (Transport::Udp, res),
        res = &mut tcp_task => (Transport::Tcp, res),
    };
    let (other_transport, mut other_task) = match transport {
        Transport::Udp => (Transport::Tcp, tcp_task),
        Transport::Tcp => (Transport::Udp, udp_task),
    };

    let result = flatten(transport, outcome);
    if let Err(e) = &result {
        error!("{} listener terminated: {}, stopping {} listener", transport, e, other_transport);
    }

    // No receivers left is fine, the other loop may already be gone
    let _ = shutdown_tx.send(());
    match timeout(grace, &mut other_task).await {
        Ok(res) => {
            if let Err(e) = flatten(other_transport, res) {
                warn!("{} listener stopped with error: {}", other_transport, e);
            }
        }
        Err(_) => {
            warn!("{} listener did not stop in time, aborting", other_transport);
            other_task.abort();
        }
    }

    info!("DNS server stopped");
    result
}

/// Whether a socket error should end a listener loop. Aborted or reset
/// peers, interrupts and running out of descriptors or buffers only affect
/// the current connection or datagram; the loop backs off and continues.
fn is_fatal_accept_error(e: &io::Error) -> bool {
    if matches!(
        e.kind(),
        io::ErrorKind::ConnectionAborted
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::Interrupted
            | io::ErrorKind::WouldBlock
            | io::ErrorKind::TimedOut
            | io::ErrorKind::OutOfMemory
    ) {
        return false;
    }
    !is_resource_exhaustion(e)
}

#[cfg(unix)]
fn is_resource_exhaustion(e: &io::Error) -> bool {
    matches!(
        e.raw_os_error(),
        Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
    )
}

#[cfg(not(unix))]
fn is_resource_exhaustion(_e: &io::Error) -> bool {
    false
}

/// Growing delay between retries after transient socket errors.
#[derive(Debug)]
struct RetryBackoff {
    next: Duration,
}

impl RetryBackoff {
    const INITIAL: Duration = Duration::from_millis(5);
    const MAX: Duration = Duration::from_secs(1);

    fn new() -> Self {
        Self {
            next: Self::INITIAL,
        }
    }

    /// The delay to wait now. Each call doubles the following one, up to `MAX`.
    fn step(&mut self) -> Duration {
        let delay = self.next;
        self.next = (self.next * 2).min(Self::MAX);
        delay
    }

    fn reset(&mut self) {
        self.next = Self::INITIAL;
    }
}

/// Logs a socket error and sleeps for the next backoff step, or turns the
/// error into `ServerError::Listener` when it is fatal.
async fn retry_or_fail(
    transport: Transport,
    source: io::Error,
    backoff: &mut RetryBackoff,
) -> Result<(), ServerError> {
    if is_fatal_accept_error(&source) {
        return Err(ServerError::Listener { transport, source });
    }
    let delay = backoff.step();
    warn!("{} socket error: {}, retrying in {:?}", transport, source, delay);
    sleep(delay).await;
    Ok(())
}

fn flatten(
    transport: Transport,
    outcome: Result<Result<(), ServerError>, tokio::task::JoinError>,
) -> Result<(), ServerError> {
    outcome.map_err(|e| ServerError::TaskFailed(transport, e.to_string()))?
}

async fn run_udp_server(
    sock: Arc<UdpSocket>,
    assembler: Arc<ReplyAssembler>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let mut buf = vec![0u8; UDP_RECV_BUFFER];
    let mut backoff = RetryBackoff::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("UDP server received shutdown signal");
                break;
            }

            result = sock.recv_from(&mut buf) => {
                let (read_bytes, src_addr) = match result {
                    Ok(received) => {
                        backoff.reset();
                        received
                    }
                    Err(source) => {
                        retry_or_fail(Transport::Udp, source, &mut backoff).await?;
                        continue;
                    }
                };

                let query_data = buf[..read_bytes].to_vec();
                let sock = sock.clone();
                let assembler = assembler.clone();

                tokio::spawn(async move {
                    let reply = match handle_dns_query(&query_data, &assembler).await {
                        Ok(reply) => reply,
                        Err(e) => {
                            debug!("Dropping UDP message from {}: {}", src_addr, e);
                            return;
                        }
                    };

                    match encode_udp_reply(&reply) {
                        Ok(bytes) => {
                            if let Err(e) = sock.send_to(&bytes, src_addr).await {
                                warn!("Failed to send UDP response to {}: {}", src_addr, e);
                            }
                        }
                        Err(e) => warn!("Failed to serialize response for {}: {}", src_addr, e),
                    }
                });
            }
        }
    }

    Ok(())
}

async fn run_tcp_server(
    listener: TcpListener,
    assembler: Arc<ReplyAssembler>,
    idle_timeout: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let mut backoff = RetryBackoff::new();

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                info!("TCP server received shutdown signal");
                break;
            }

            result = listener.accept() => {
                let (stream, src_addr) = match result {
                    Ok(accepted) => {
                        backoff.reset();
                        accepted
                    }
                    Err(source) => {
                        retry_or_fail(Transport::Tcp, source, &mut backoff).await?;
                        continue;
                    }
                };
                let assembler = assembler.clone();

                tokio::spawn(async move {
                    if let Err(e) = handle_tcp_connection(stream, src_addr, assembler, idle_timeout).await {
                        warn!("TCP connection error from {}: {}", src_addr, e);
                    }
                });
            }
        }
    }

    Ok(())
}

/// Serves length-prefixed messages until the client closes, goes idle, or
/// sends something that is not a query.
async fn handle_tcp_connection(
    mut stream: TcpStream,
    src_addr: SocketAddr,
    assembler: Arc<ReplyAssembler>,
    idle_timeout: Duration,
) -> std::io::Result<()> {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let mut length_buf = [0u8; 2];

    loop {
        match timeout(idle_timeout, stream.read_exact(&mut length_buf)).await {
            Err(_) => {
                debug!("Closing idle TCP connection from {}", src_addr);
                break;
            }
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                debug!("TCP connection closed by client {}", src_addr);
                break;
            }
            Ok(Err(e)) => return Err(e),
            Ok(Ok(_)) => {}
        }

        let message_length = u16::from_be_bytes(length_buf) as usize;
        let mut message_buf = vec![0u8; message_length];
        match timeout(idle_timeout, stream.read_exact(&mut message_buf)).await {
            Err(_) => {
                debug!("TCP client {} stalled mid-message", src_addr);
                break;
            }
            Ok(result) => {
                result?;
            }
        }

        let reply = match handle_dns_query(&message_buf, &assembler).await {
            Ok(reply) => reply,
            Err(e) => {
                debug!("Closing TCP connection from {}: {}", src_addr, e);
                break;
            }
        };

        let response_data = match reply.serialize() {
            Ok(bytes) if bytes.len() <= u16::MAX as usize => bytes,
            Ok(bytes) => {
                warn!("Response for {} too large for TCP ({} bytes)", src_addr, bytes.len());
                break;
            }
            Err(e) => {
                warn!("Failed to serialize response for {}: {}", src_addr, e);
                break;
            }
        };

        stream
            .write_all(&(response_data.len() as u16).to_be_bytes())
            .await?;
        stream.write_all(&response_data).await?;
        stream.flush().await?;
    }

    Ok(())
}

/// Decodes one message and builds the reply. Responses and undecodable
/// messages are errors; callers drop them.
async fn handle_dns_query(buf: &[u8], assembler: &ReplyAssembler) -> Result<DNSPacket, ServerError> {
    let request = DNSPacket::parse(buf)?;
    if request.header.qr {
        return Err(ServerError::NotAQuery);
    }

    trace!(
        "Query id={} with {} question(s)",
        request.header.id,
        request.questions.len()
    );
    Ok(assembler.build_reply(&request).await)
}

/// Serializes a reply for UDP, falling back to a truncated reply when the
/// full one does not fit in a plain DNS datagram.
fn encode_udp_reply(reply: &DNSPacket) -> Result<Vec<u8>, ParseError> {
    let bytes = reply.serialize()?;
    if bytes.len() <= MAX_UDP_PAYLOAD {
        return Ok(bytes);
    }

    debug!(
        "Response too large for UDP ({}>{} bytes), sending truncated response",
        bytes.len(),
        MAX_UDP_PAYLOAD
    );
    reply.truncated().serialize()
}
