// Logical stream bound to a NetConnection: issues play/pause/seek, demuxes
// FLV audio/video tags, and surfaces decoded samples through a MediaSink.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, Mutex};

use crate::avc::{demux_nalus, read_composition_time_offset, AvcDecoderConfigurationRecord};
use crate::error::Result;
use crate::log::Logger;
use crate::log_debug;
use crate::media_sink::{AudioSample, MediaSink, Sample, SampleKind, VideoSample};
use crate::net_connection::{NetConnection, SessionShared};
use crate::rtmp::{
    build_pause_command, build_play_command, build_seek_command, MessageTypeId, NetStatusType,
    RtmpPacket, RTMP_CHUNK_STREAM_MEDIA_BASE,
};

const AVC_CODEC_ID: u8 = 7;
const AVC_PACKET_TYPE_SEQUENCE_HEADER: u8 = 0;
const AVC_PACKET_TYPE_NALU: u8 = 1;

#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    Attached,
    StatusUpdated(NetStatusType),
}

pub(crate) struct NetStreamShared {
    pub(crate) stream_id: AtomicU32,
    chunk_stream_id: AtomicU32,
    pub(crate) media_sink: MediaSink,
    avc_config: Mutex<Option<AvcDecoderConfigurationRecord>>,
    pub(crate) events_tx: broadcast::Sender<StreamEvent>,
    last_position_ms: AtomicU32,
    logger: Logger,
}

impl NetStreamShared {
    pub(crate) async fn handle_audio_message(&self, packet: RtmpPacket) -> Result<()> {
        self.last_position_ms.store(packet.timestamp, Ordering::Relaxed);
        self.media_sink
            .push_audio(AudioSample {
                data: packet.body,
                timestamp: packet.timestamp,
            })
            .await;
        Ok(())
    }

    pub(crate) async fn handle_video_message(&self, packet: RtmpPacket) -> Result<()> {
        self.last_position_ms.store(packet.timestamp, Ordering::Relaxed);

        if packet.body.is_empty() {
            return Ok(());
        }

        let control = packet.body[0];
        let frame_type = control >> 4;
        let codec_id = control & 0x0f;

        if codec_id != AVC_CODEC_ID {
            log_debug!(
                self.logger,
                format!("ignoring non-AVC video codec id {}", codec_id)
            );
            return Ok(());
        }

        if packet.body.len() < 5 {
            return Ok(());
        }

        let avc_packet_type = packet.body[1];
        let payload = &packet.body[5..];

        match avc_packet_type {
            AVC_PACKET_TYPE_SEQUENCE_HEADER => {
                let record = AvcDecoderConfigurationRecord::parse(payload)?;
                *self.avc_config.lock().await = Some(record);
                Ok(())
            }
            AVC_PACKET_TYPE_NALU => {
                let avc_config_guard = self.avc_config.lock().await;
                let config = match avc_config_guard.as_ref() {
                    Some(config) => config,
                    None => {
                        log_debug!(
                            self.logger,
                            "dropping NALU received before a sequence header"
                        );
                        return Ok(());
                    }
                };

                let offset = read_composition_time_offset(&packet.body[2..5])?;
                let presentation_timestamp =
                    (packet.timestamp as i64 + offset as i64) as u32;
                let is_keyframe = frame_type == 1 || frame_type == 4;

                let access_unit = demux_nalus(payload, config.nalu_length_size)?;
                let access_unit = if is_keyframe {
                    access_unit.with_parameter_sets(&config.sps, &config.pps)
                } else {
                    access_unit
                };
                drop(avc_config_guard);

                self.media_sink
                    .push_video(VideoSample {
                        data: access_unit.to_length_prefixed(),
                        presentation_timestamp,
                        decode_timestamp: packet.timestamp,
                        is_keyframe,
                    })
                    .await;
                Ok(())
            }
            _ => Ok(()),
        }
    }
}

/// A handle to one logical RTMP stream. Create with [`NetStream::new`] and
/// bind it with [`NetConnection::attach`].
#[derive(Clone)]
pub struct NetStream {
    shared: Arc<NetStreamShared>,
    session: Arc<SessionShared>,
}

impl NetStream {
    pub fn new(connection: &NetConnection) -> NetStream {
        let (events_tx, _) = broadcast::channel(16);
        NetStream {
            shared: Arc::new(NetStreamShared {
                stream_id: AtomicU32::new(0),
                chunk_stream_id: AtomicU32::new(0),
                media_sink: MediaSink::new(64),
                avc_config: Mutex::new(None),
                events_tx,
                last_position_ms: AtomicU32::new(0),
                logger: connection.shared.logger.make_child_logger("[NET_STREAM] "),
            }),
            session: connection.shared.clone(),
        }
    }

    pub(crate) fn bind(&self, stream_id: u32) {
        self.shared.stream_id.store(stream_id, Ordering::SeqCst);
        self.shared
            .chunk_stream_id
            .store(RTMP_CHUNK_STREAM_MEDIA_BASE + stream_id, Ordering::SeqCst);
    }

    pub(crate) fn shared_handle(&self) -> Arc<NetStreamShared> {
        self.shared.clone()
    }

    pub fn stream_id(&self) -> u32 {
        self.shared.stream_id.load(Ordering::SeqCst)
    }

    pub fn events(&self) -> broadcast::Receiver<StreamEvent> {
        self.shared.events_tx.subscribe()
    }

    pub async fn request_sample(&self, kind: SampleKind) -> Result<Sample> {
        self.shared.media_sink.request_sample(kind).await
    }

    /// `start = -2` plays a live stream or falls back to a recording,
    /// `duration = -1` plays to the end of the stream: the RTMP defaults.
    pub async fn play_default(&self, name: &str) -> Result<()> {
        self.play(name, -2.0, -1.0).await
    }

    pub async fn play(&self, name: &str, start: f64, duration: f64) -> Result<()> {
        let cmd = build_play_command(0.0, name, start, duration);
        self.send_stream_command(MessageTypeId::CommandMessageAmf0.to_u8(), cmd.encode())
            .await
    }

    pub async fn pause(&self) -> Result<()> {
        self.pause_or_resume(true).await
    }

    pub async fn resume(&self) -> Result<()> {
        self.pause_or_resume(false).await
    }

    async fn pause_or_resume(&self, pause: bool) -> Result<()> {
        let position = self.shared.last_position_ms.load(Ordering::Relaxed);
        let cmd = build_pause_command(0.0, pause, position as f64);
        self.send_stream_command(MessageTypeId::CommandMessageAmf0.to_u8(), cmd.encode())
            .await
    }

    pub async fn seek(&self, position_ms: f64) -> Result<()> {
        let cmd = build_seek_command(0.0, position_ms);
        self.send_stream_command(MessageTypeId::CommandMessageAmf0.to_u8(), cmd.encode())
            .await
    }

    async fn send_stream_command(&self, type_id: u8, body: Vec<u8>) -> Result<()> {
        let chunk_stream_id = self.shared.chunk_stream_id.load(Ordering::SeqCst);
        let stream_id = self.shared.stream_id.load(Ordering::SeqCst);
        self.session
            .send_command(chunk_stream_id, type_id, stream_id, body)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::avc::AccessUnit;
    use crate::rtmp::RtmpPacket as Packet;

    fn make_shared() -> NetStreamShared {
        let (events_tx, _) = broadcast::channel(4);
        NetStreamShared {
            stream_id: AtomicU32::new(1),
            chunk_stream_id: AtomicU32::new(5),
            media_sink: MediaSink::new(8),
            avc_config: Mutex::new(None),
            events_tx,
            last_position_ms: AtomicU32::new(0),
            logger: Logger::new_disabled(),
        }
    }

    #[tokio::test]
    async fn audio_message_is_pushed_to_the_sink() {
        let shared = make_shared();
        let packet = Packet::new(5, MessageTypeId::AudioMessage.to_u8(), 1, vec![0xaf, 1, 2, 3]);
        shared.handle_audio_message(packet).await.unwrap();

        let sample = shared.media_sink.request_sample(SampleKind::Audio).await.unwrap();
        match sample {
            Sample::Audio(a) => assert_eq!(a.data, vec![0xaf, 1, 2, 3]),
            _ => panic!("expected audio sample"),
        }
    }

    #[tokio::test]
    async fn sequence_header_then_nalu_produces_keyframe_sample() {
        let shared = make_shared();

        let sps = vec![0x67, 0x64, 0x00, 0x1f];
        let pps = vec![0x68, 0xee, 0x3c, 0x80];
        let mut avcc = vec![1, 0x64, 0x00, 0x1f, 0xff, 0xe1];
        avcc.extend_from_slice(&(sps.len() as u16).to_be_bytes());
        avcc.extend_from_slice(&sps);
        avcc.push(1);
        avcc.extend_from_slice(&(pps.len() as u16).to_be_bytes());
        avcc.extend_from_slice(&pps);

        let mut header_payload = vec![0x17, 0, 0, 0, 0];
        header_payload.extend_from_slice(&avcc);
        let header_packet = Packet::new(5, MessageTypeId::VideoMessage.to_u8(), 1, header_payload);
        shared.handle_video_message(header_packet).await.unwrap();

        let nalu = vec![0x65, 1, 2, 3];
        let mut nalu_payload = vec![0x17, 1, 0, 0, 0];
        nalu_payload.extend_from_slice(&(nalu.len() as u32).to_be_bytes());
        nalu_payload.extend_from_slice(&nalu);
        let mut nalu_packet = Packet::new(5, MessageTypeId::VideoMessage.to_u8(), 1, nalu_payload);
        nalu_packet.timestamp = 1000;
        shared.handle_video_message(nalu_packet).await.unwrap();

        let sample = shared.media_sink.request_sample(SampleKind::Video).await.unwrap();
        match sample {
            Sample::Video(v) => {
                assert!(v.is_keyframe);
                assert_eq!(v.decode_timestamp, 1000);

                let expected = AccessUnit {
                    nalus: vec![sps, pps, nalu],
                }
                .to_length_prefixed();
                assert_eq!(v.data, expected, "expected SPS/PPS spliced ahead of the keyframe NALU");
            }
            _ => panic!("expected video sample"),
        }
    }

    #[tokio::test]
    async fn nalu_before_sequence_header_is_dropped_without_error() {
        let shared = make_shared();
        let nalu = vec![0x65, 1, 2];
        let mut nalu_payload = vec![0x27, 1, 0, 0, 0];
        nalu_payload.extend_from_slice(&(nalu.len() as u32).to_be_bytes());
        nalu_payload.extend_from_slice(&nalu);
        let packet = Packet::new(5, MessageTypeId::VideoMessage.to_u8(), 1, nalu_payload);
        assert!(shared.handle_video_message(packet).await.is_ok());
    }
}
