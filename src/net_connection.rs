// Session controller: owns the chunk codec, transaction ids, the per-stream
// binding table, and the control-message state; dispatches every inbound
// message and serializes every outbound one through a single writer task.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use byteorder::{BigEndian, ByteOrder};
use tokio::io::{split, AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc, oneshot, Mutex};

use crate::amf::AMF0Value;
use crate::config::RtmpClientConfig;
use crate::error::{Result, RtmpError};
use crate::log::Logger;
use crate::log_debug;
use crate::net_stream::{NetStream, NetStreamShared, StreamEvent};
use crate::rtmp::{
    build_call_command, build_create_stream_command, now_ms_since, perform_handshake,
    read_message, write_message, LimitType, MessageTypeId, NetStatusType, RtmpCommand, RtmpPacket,
    RxChunkState, TxChunkState, UserControlEventType, RTMP_CHUNK_STREAM_COMMAND,
    RTMP_CHUNK_STREAM_NETWORK,
};
use crate::uri::RtmpUri;

const INITIAL_CHUNK_SIZE: u32 = 128;
const DEFAULT_WINDOW_SIZE: u32 = u32::MAX;
const STREAM_BUFFER_LENGTH_MS: u32 = 5000;

#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    StatusUpdated(NetStatusType),
    Callback {
        name: String,
        data: Option<AMF0Value>,
    },
    Closed,
}

enum WriteJob {
    Send {
        packet: RtmpPacket,
        completion: oneshot::Sender<Result<()>>,
    },
    SetChunkSize(u32),
}

struct NetworkState {
    tx_window_size: u32,
    tx_limit_type: LimitType,
    rx_window_size: u32,
}

pub(crate) struct SessionShared {
    writer_tx: mpsc::Sender<WriteJob>,
    next_transaction_id: AtomicU32,
    pending_calls: Mutex<HashMap<u32, oneshot::Sender<RtmpCommand>>>,
    pending_create_stream: Mutex<HashMap<u32, oneshot::Sender<u32>>>,
    bound_streams: Mutex<HashMap<u32, Arc<NetStreamShared>>>,
    events_tx: broadcast::Sender<SessionEvent>,
    network_state: Mutex<NetworkState>,
    pub(crate) command_timeout: Duration,
    pub(crate) logger: Logger,
    start_time: Instant,
    closed: AtomicBool,
}

impl SessionShared {
    pub(crate) fn next_transaction_id(&self) -> u32 {
        self.next_transaction_id.fetch_add(1, Ordering::SeqCst)
    }

    pub(crate) async fn send_command(
        &self,
        chunk_stream_id: u32,
        type_id: u8,
        stream_id: u32,
        body: Vec<u8>,
    ) -> Result<()> {
        let mut packet = RtmpPacket::new(chunk_stream_id, type_id, stream_id, body);
        packet.timestamp = now_ms_since(self.start_time);

        let (completion_tx, completion_rx) = oneshot::channel();
        self.writer_tx
            .send(WriteJob::Send {
                packet,
                completion: completion_tx,
            })
            .await
            .map_err(|_| RtmpError::SessionClosed)?;

        completion_rx.await.map_err(|_| RtmpError::SessionClosed)?
    }

    pub(crate) async fn register_call(&self, tid: u32) -> oneshot::Receiver<RtmpCommand> {
        let (tx, rx) = oneshot::channel();
        self.pending_calls.lock().await.insert(tid, tx);
        rx
    }
}

/// A connected RTMP session. Cloning shares the same underlying connection.
#[derive(Clone)]
pub struct NetConnection {
    pub(crate) shared: Arc<SessionShared>,
}

impl NetConnection {
    /// Connects to `uri` over a fresh TCP socket and performs the full
    /// handshake + `connect` command handshake using `connect_command`.
    ///
    /// `connect_command` must be a command named `"connect"` (e.g. built with
    /// [`crate::rtmp::build_connect_command`]); anything else is rejected with
    /// `InvalidArgument`.
    pub async fn connect(
        uri: &RtmpUri,
        connect_command: RtmpCommand,
        config: &RtmpClientConfig,
        logger: Logger,
    ) -> Result<(NetConnection, broadcast::Receiver<SessionEvent>)> {
        let tcp = TcpStream::connect((uri.host.as_str(), uri.port))
            .await
            .map_err(RtmpError::TransportError)?;
        Self::connect_with_stream(tcp, uri, connect_command, config, logger).await
    }

    /// Same as [`connect`] but over any `AsyncRead + AsyncWrite` stream,
    /// letting tests exercise the full flow over `tokio::io::duplex`.
    pub async fn connect_with_stream<S>(
        stream: S,
        uri: &RtmpUri,
        connect_command: RtmpCommand,
        config: &RtmpClientConfig,
        logger: Logger,
    ) -> Result<(NetConnection, broadcast::Receiver<SessionEvent>)>
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if connect_command.name != "connect" {
            return Err(RtmpError::InvalidArgument(format!(
                "expected a command named \"connect\", got \"{}\"",
                connect_command.name
            )));
        }

        let start_time = Instant::now();
        let mut stream = stream;
        perform_handshake(&mut stream, start_time, config.handshake_timeout, &logger).await?;

        let (read_half, write_half) = split(stream);
        let (writer_tx, writer_rx) = mpsc::channel::<WriteJob>(64);
        let (events_tx, events_rx) = broadcast::channel(32);

        let shared = Arc::new(SessionShared {
            writer_tx,
            next_transaction_id: AtomicU32::new(2),
            pending_calls: Mutex::new(HashMap::new()),
            pending_create_stream: Mutex::new(HashMap::new()),
            bound_streams: Mutex::new(HashMap::new()),
            events_tx: events_tx.clone(),
            network_state: Mutex::new(NetworkState {
                tx_window_size: DEFAULT_WINDOW_SIZE,
                tx_limit_type: LimitType::Hard,
                rx_window_size: DEFAULT_WINDOW_SIZE,
            }),
            command_timeout: config.command_timeout,
            logger: logger.make_child_logger("[NET_CONNECTION] "),
            start_time,
            closed: AtomicBool::new(false),
        });

        tokio::spawn(run_writer_task(write_half, writer_rx));
        tokio::spawn(run_reader_task(read_half, shared.clone()));

        let tid = connect_command.transaction_id as u32;
        let connect_rx = shared.register_call(tid).await;
        shared
            .send_command(
                RTMP_CHUNK_STREAM_COMMAND,
                MessageTypeId::CommandMessageAmf0.to_u8(),
                0,
                connect_command.encode(),
            )
            .await?;

        let response = tokio::time::timeout(shared.command_timeout, connect_rx)
            .await
            .map_err(|_| RtmpError::SessionClosed)?
            .map_err(|_| RtmpError::SessionClosed)?;

        let status = response
            .arguments
            .get(1)
            .and_then(|v| match v {
                AMF0Value::Object { properties } => properties.get("code"),
                _ => None,
            })
            .and_then(|v| match v {
                AMF0Value::String { value } => Some(NetStatusType::from_code(value)),
                _ => None,
            })
            .unwrap_or(NetStatusType::Other("unknown".to_string()));

        if status.is_failure() {
            return Err(RtmpError::CommandRejected {
                code: format!("{:?}", status),
            });
        }

        let _ = events_tx.send(SessionEvent::StatusUpdated(status));

        shared
            .writer_tx
            .send(WriteJob::SetChunkSize(config.chunk_size))
            .await
            .map_err(|_| RtmpError::SessionClosed)?;
        shared
            .send_command(
                RTMP_CHUNK_STREAM_NETWORK,
                MessageTypeId::SetChunkSize.to_u8(),
                0,
                config.chunk_size.to_be_bytes().to_vec(),
            )
            .await?;

        Ok((NetConnection { shared }, events_rx))
    }

    /// Performs `createStream` for a freshly-constructed [`NetStream`] and
    /// binds it to this connection, resolving once `Attached` fires.
    pub async fn attach(&self, stream: &NetStream) -> Result<()> {
        let tid = self.shared.next_transaction_id();
        let (tx, rx) = oneshot::channel();
        self.shared
            .pending_create_stream
            .lock()
            .await
            .insert(tid, tx);

        let cmd = build_create_stream_command(tid as f64);
        self.shared
            .send_command(
                RTMP_CHUNK_STREAM_COMMAND,
                MessageTypeId::CommandMessageAmf0.to_u8(),
                0,
                cmd.encode(),
            )
            .await?;

        let stream_id = tokio::time::timeout(self.shared.command_timeout, rx)
            .await
            .map_err(|_| RtmpError::SessionClosed)?
            .map_err(|_| RtmpError::SessionClosed)?;

        stream.bind(stream_id);
        self.shared
            .bound_streams
            .lock()
            .await
            .insert(stream_id, stream.shared_handle());
        let _ = stream.shared_handle().events_tx.send(StreamEvent::Attached);

        let mut body = vec![0u8; 10];
        BigEndian::write_u16(&mut body[0..2], UserControlEventType::SetBufferLength.to_u16());
        BigEndian::write_u32(&mut body[2..6], stream_id);
        BigEndian::write_u32(&mut body[6..10], STREAM_BUFFER_LENGTH_MS);
        self.shared
            .send_command(
                RTMP_CHUNK_STREAM_NETWORK,
                MessageTypeId::UserControlMessage.to_u8(),
                0,
                body,
            )
            .await
    }

    /// Issues an arbitrary AMF0 command and awaits its matching response.
    pub async fn call(&self, name: &str, arguments: Vec<AMF0Value>) -> Result<RtmpCommand> {
        let tid = self.shared.next_transaction_id();
        let rx = self.shared.register_call(tid).await;
        let cmd = build_call_command(tid as f64, name, arguments);
        self.shared
            .send_command(
                RTMP_CHUNK_STREAM_COMMAND,
                MessageTypeId::CommandMessageAmf0.to_u8(),
                0,
                cmd.encode(),
            )
            .await?;

        tokio::time::timeout(self.shared.command_timeout, rx)
            .await
            .map_err(|_| RtmpError::SessionClosed)?
            .map_err(|_| RtmpError::SessionClosed)
    }

    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.shared.events_tx.subscribe()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.closed.load(Ordering::SeqCst)
    }

    /// Closes the session: marks it closed, drains bound streams' media
    /// queues, and emits `Closed`. Idempotent.
    pub async fn close(&self) {
        if self.shared.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        let streams = self.shared.bound_streams.lock().await;
        for stream in streams.values() {
            stream.media_sink.close().await;
        }
        drop(streams);

        let _ = self.shared.events_tx.send(SessionEvent::Closed);
    }
}

async fn run_writer_task<W: AsyncWrite + Unpin>(
    mut write_half: W,
    mut jobs: mpsc::Receiver<WriteJob>,
) {
    let mut tx_state = TxChunkState::new(INITIAL_CHUNK_SIZE);

    while let Some(job) = jobs.recv().await {
        match job {
            WriteJob::Send { packet, completion } => {
                let result = write_message(&mut write_half, &mut tx_state, packet).await;
                let _ = completion.send(result);
            }
            WriteJob::SetChunkSize(n) => tx_state.set_chunk_size(n),
        }
    }
}

async fn run_reader_task<R: AsyncRead + Unpin>(mut read_half: R, shared: Arc<SessionShared>) {
    let mut rx_state = RxChunkState::new(INITIAL_CHUNK_SIZE);

    loop {
        match read_message(&mut read_half, &mut rx_state).await {
            Ok(packet) => {
                if let Err(e) = dispatch_packet(&shared, &mut rx_state, packet).await {
                    log_debug!(shared.logger, format!("dropping malformed message: {e}"));
                }
            }
            Err(e) => {
                log_debug!(shared.logger, format!("read loop ending: {e}"));
                break;
            }
        }
    }

    shared.closed.store(true, Ordering::SeqCst);
    let streams = shared.bound_streams.lock().await;
    for stream in streams.values() {
        stream.media_sink.close().await;
    }
    drop(streams);
    let _ = shared.events_tx.send(SessionEvent::Closed);
}

async fn dispatch_packet(
    shared: &Arc<SessionShared>,
    rx_state: &mut RxChunkState,
    packet: RtmpPacket,
) -> Result<()> {
    if packet.chunk_stream_id == RTMP_CHUNK_STREAM_NETWORK {
        return dispatch_network_message(shared, rx_state, packet).await;
    }

    match MessageTypeId::from_u8(packet.type_id) {
        MessageTypeId::CommandMessageAmf0 | MessageTypeId::CommandMessageAmf3 => {
            dispatch_command(shared, packet).await
        }
        MessageTypeId::AudioMessage | MessageTypeId::VideoMessage => {
            dispatch_media(shared, packet).await
        }
        MessageTypeId::DataMessageAmf0 | MessageTypeId::DataMessageAmf3 => {
            log_debug!(
                shared.logger,
                format!("ignoring data message on stream {}", packet.stream_id)
            );
            Ok(())
        }
        other => {
            log_debug!(shared.logger, format!("ignoring unhandled message type {:?}", other));
            Ok(())
        }
    }
}

async fn dispatch_network_message(
    shared: &Arc<SessionShared>,
    rx_state: &mut RxChunkState,
    packet: RtmpPacket,
) -> Result<()> {
    match MessageTypeId::from_u8(packet.type_id) {
        MessageTypeId::SetChunkSize => {
            if packet.body.len() < 4 {
                return Err(RtmpError::ProtocolViolation(
                    "SetChunkSize payload shorter than 4 bytes".to_string(),
                ));
            }
            rx_state.set_chunk_size(BigEndian::read_u32(&packet.body[0..4]));
            Ok(())
        }
        MessageTypeId::WindowAcknowledgementSize => {
            if packet.body.len() < 4 {
                return Err(RtmpError::ProtocolViolation(
                    "WindowAcknowledgementSize payload shorter than 4 bytes".to_string(),
                ));
            }
            let mut state = shared.network_state.lock().await;
            state.rx_window_size = BigEndian::read_u32(&packet.body[0..4]);
            Ok(())
        }
        MessageTypeId::SetPeerBandwidth => {
            if packet.body.len() < 5 {
                return Err(RtmpError::ProtocolViolation(
                    "SetPeerBandwidth payload shorter than 5 bytes".to_string(),
                ));
            }
            let window = BigEndian::read_u32(&packet.body[0..4]);
            let limit = LimitType::from_u8(packet.body[4]);

            let mut state = shared.network_state.lock().await;
            let accepted = match limit {
                LimitType::Hard => {
                    state.tx_window_size = window;
                    state.tx_limit_type = limit;
                    true
                }
                LimitType::Soft => {
                    state.tx_window_size = state.tx_window_size.min(window);
                    state.tx_limit_type = limit;
                    true
                }
                LimitType::Dynamic => {
                    if state.tx_limit_type == LimitType::Hard {
                        state.tx_window_size = window;
                        state.tx_limit_type = limit;
                        true
                    } else {
                        false
                    }
                }
            };
            drop(state);

            if accepted {
                shared
                    .send_command(
                        RTMP_CHUNK_STREAM_NETWORK,
                        MessageTypeId::WindowAcknowledgementSize.to_u8(),
                        0,
                        window.to_be_bytes().to_vec(),
                    )
                    .await?;
            }
            Ok(())
        }
        MessageTypeId::UserControlMessage => dispatch_user_control(shared, packet).await,
        MessageTypeId::Acknowledgement | MessageTypeId::AbortMessage => Ok(()),
        other => {
            log_debug!(
                shared.logger,
                format!("ignoring network message type {:?}", other)
            );
            Ok(())
        }
    }
}

async fn dispatch_user_control(shared: &Arc<SessionShared>, packet: RtmpPacket) -> Result<()> {
    if packet.body.len() < 2 {
        return Err(RtmpError::ProtocolViolation(
            "UserControlMessage payload shorter than 2 bytes".to_string(),
        ));
    }
    let event_type = UserControlEventType::from_u16(BigEndian::read_u16(&packet.body[0..2]));
    let data = &packet.body[2..];

    match event_type {
        UserControlEventType::StreamBegin => {
            if data.len() >= 4 && BigEndian::read_u32(&data[0..4]) == 0 {
                let mut body = vec![0u8; 10];
                BigEndian::write_u16(
                    &mut body[0..2],
                    UserControlEventType::SetBufferLength.to_u16(),
                );
                BigEndian::write_u32(&mut body[2..6], 0);
                BigEndian::write_u32(&mut body[6..10], STREAM_BUFFER_LENGTH_MS);
                shared
                    .send_command(
                        RTMP_CHUNK_STREAM_NETWORK,
                        MessageTypeId::UserControlMessage.to_u8(),
                        0,
                        body,
                    )
                    .await?;
            }
            Ok(())
        }
        UserControlEventType::PingRequest => {
            if data.len() < 4 {
                return Ok(());
            }
            let timestamp = BigEndian::read_u32(&data[0..4]);
            let mut body = vec![0u8; 6];
            BigEndian::write_u16(&mut body[0..2], UserControlEventType::PingResponse.to_u16());
            BigEndian::write_u32(&mut body[2..6], timestamp);
            shared
                .send_command(
                    RTMP_CHUNK_STREAM_NETWORK,
                    MessageTypeId::UserControlMessage.to_u8(),
                    0,
                    body,
                )
                .await
        }
        _ => Ok(()),
    }
}

async fn dispatch_command(shared: &Arc<SessionShared>, packet: RtmpPacket) -> Result<()> {
    let cmd = RtmpCommand::decode(&packet.body)?;
    let tid = cmd.transaction_id as u32;

    if let Some(tx) = shared.pending_create_stream.lock().await.remove(&tid) {
        if cmd.name == "_result" {
            let stream_id = cmd
                .arguments
                .get(1)
                .and_then(|v| match v {
                    AMF0Value::Number { value } => Some(*value as u32),
                    _ => None,
                })
                .unwrap_or(0);
            let _ = tx.send(stream_id);
        }
        return Ok(());
    }

    if let Some(tx) = shared.pending_calls.lock().await.remove(&tid) {
        let _ = tx.send(cmd);
        return Ok(());
    }

    if packet.stream_id != 0 {
        let streams = shared.bound_streams.lock().await;
        if let Some(stream) = streams.get(&packet.stream_id).cloned() {
            drop(streams);
            if cmd.name == "onStatus" {
                if let Some(status) = extract_status_code(&cmd) {
                    let _ = stream.events_tx.send(StreamEvent::StatusUpdated(status));
                }
            }
            return Ok(());
        }
    }

    let data = cmd.arguments.get(1).cloned();
    let _ = shared.events_tx.send(SessionEvent::Callback {
        name: cmd.name,
        data,
    });
    Ok(())
}

fn extract_status_code(cmd: &RtmpCommand) -> Option<NetStatusType> {
    cmd.arguments.iter().find_map(|v| match v {
        AMF0Value::Object { properties } => properties.get("code").and_then(|c| match c {
            AMF0Value::String { value } => Some(NetStatusType::from_code(value)),
            _ => None,
        }),
        _ => None,
    })
}

async fn dispatch_media(shared: &Arc<SessionShared>, packet: RtmpPacket) -> Result<()> {
    let streams = shared.bound_streams.lock().await;
    let stream = match streams.get(&packet.stream_id).cloned() {
        Some(s) => s,
        None => return Ok(()),
    };
    drop(streams);

    match MessageTypeId::from_u8(packet.type_id) {
        MessageTypeId::AudioMessage => stream.handle_audio_message(packet).await,
        MessageTypeId::VideoMessage => stream.handle_video_message(packet).await,
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::Logger;
    use tokio::io::duplex;

    async fn fake_server_accepting_connect(mut server: tokio::io::DuplexStream) {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};

        // handshake
        let mut c0 = [0u8; 1];
        server.read_exact(&mut c0).await.unwrap();
        let mut c1 = [0u8; 1536];
        server.read_exact(&mut c1).await.unwrap();

        let mut s0_s1 = vec![0x03u8];
        s0_s1.extend_from_slice(&[0u8; 1536]);
        server.write_all(&s0_s1).await.unwrap();

        let mut c2 = [0u8; 1536];
        server.read_exact(&mut c2).await.unwrap();

        let mut s2 = vec![0u8; 4];
        s2.extend_from_slice(&[0u8; 4]);
        s2.extend_from_slice(&c1[8..8 + 1528]);
        server.write_all(&s2).await.unwrap();

        // read the connect command chunk (format 0, chunk-stream 3)
        let mut rx = RxChunkState::new(128);
        let packet = read_message(&mut server, &mut rx).await.unwrap();
        let cmd = RtmpCommand::decode(&packet.body).unwrap();
        assert_eq!(cmd.name, "connect");

        let mut properties = std::collections::HashMap::new();
        properties.insert(
            "code".to_string(),
            AMF0Value::string("NetConnection.Connect.Success"),
        );
        let response = RtmpCommand {
            name: "_result".to_string(),
            transaction_id: 1.0,
            arguments: vec![AMF0Value::Null, AMF0Value::object(properties)],
        };
        let mut tx_state = TxChunkState::new(128);
        let response_packet = RtmpPacket::new(
            RTMP_CHUNK_STREAM_COMMAND,
            MessageTypeId::CommandMessageAmf0.to_u8(),
            0,
            response.encode(),
        );
        write_message(&mut server, &mut tx_state, response_packet)
            .await
            .unwrap();

        // keep the server end alive until the client closes
        let mut buf = [0u8; 1];
        let _ = server.read(&mut buf).await;
    }

    #[tokio::test]
    async fn connect_flow_resolves_on_success_status() {
        let (client, server) = duplex(1 << 20);
        tokio::spawn(fake_server_accepting_connect(server));

        let uri = RtmpUri::parse("rtmp://localhost/live").unwrap();
        let config = RtmpClientConfig {
            handshake_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            chunk_size: 4096,
        };

        let connect_command =
            crate::rtmp::build_connect_command(1.0, &uri.app, &uri.tc_url(), "LNX 9,0,124,2");
        let result = NetConnection::connect_with_stream(
            client,
            &uri,
            connect_command,
            &config,
            Logger::new_disabled(),
        )
        .await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn connect_rejects_a_command_not_named_connect() {
        let (client, _server) = duplex(1 << 20);

        let uri = RtmpUri::parse("rtmp://localhost/live").unwrap();
        let config = RtmpClientConfig {
            handshake_timeout: Duration::from_secs(5),
            command_timeout: Duration::from_secs(5),
            chunk_size: 4096,
        };

        let bad_command = crate::rtmp::build_create_stream_command(1.0);
        let result = NetConnection::connect_with_stream(
            client,
            &uri,
            bad_command,
            &config,
            Logger::new_disabled(),
        )
        .await;
        assert!(matches!(result, Err(RtmpError::InvalidArgument(_))));
    }
}
