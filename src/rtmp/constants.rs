// RTMP protocol constants and small value types

/// Well-known chunk-stream ids
pub const RTMP_CHUNK_STREAM_NETWORK: u32 = 2;
pub const RTMP_CHUNK_STREAM_COMMAND: u32 = 3;
/// First chunk-stream id available for media/data streams assigned by this client
pub const RTMP_CHUNK_STREAM_MEDIA_BASE: u32 = 4;

/// Largest chunk-stream id representable by the 3-byte basic header escape
pub const RTMP_CHUNK_STREAM_ID_MAX: u32 = 65599;

/// Chunk basic-header format types
pub const RTMP_CHUNK_TYPE_0: u8 = 0;
pub const RTMP_CHUNK_TYPE_1: u8 = 1;
pub const RTMP_CHUNK_TYPE_2: u8 = 2;
pub const RTMP_CHUNK_TYPE_3: u8 = 3;

/// RTMP message type ids, tagged over the catalogue this client understands.
///
/// Anything outside the catalogue decodes to `Unknown` rather than failing -
/// unrecognized message types are logged and skipped, never fatal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageTypeId {
    SetChunkSize,
    AbortMessage,
    Acknowledgement,
    UserControlMessage,
    WindowAcknowledgementSize,
    SetPeerBandwidth,
    AudioMessage,
    VideoMessage,
    DataMessageAmf3,
    SharedObjectAmf3,
    CommandMessageAmf3,
    DataMessageAmf0,
    SharedObjectAmf0,
    CommandMessageAmf0,
    AggregateMessage,
    Unknown(u8),
}

impl MessageTypeId {
    pub fn from_u8(b: u8) -> MessageTypeId {
        match b {
            1 => MessageTypeId::SetChunkSize,
            2 => MessageTypeId::AbortMessage,
            3 => MessageTypeId::Acknowledgement,
            4 => MessageTypeId::UserControlMessage,
            5 => MessageTypeId::WindowAcknowledgementSize,
            6 => MessageTypeId::SetPeerBandwidth,
            8 => MessageTypeId::AudioMessage,
            9 => MessageTypeId::VideoMessage,
            15 => MessageTypeId::DataMessageAmf3,
            16 => MessageTypeId::SharedObjectAmf3,
            17 => MessageTypeId::CommandMessageAmf3,
            18 => MessageTypeId::DataMessageAmf0,
            19 => MessageTypeId::SharedObjectAmf0,
            20 => MessageTypeId::CommandMessageAmf0,
            22 => MessageTypeId::AggregateMessage,
            other => MessageTypeId::Unknown(other),
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            MessageTypeId::SetChunkSize => 1,
            MessageTypeId::AbortMessage => 2,
            MessageTypeId::Acknowledgement => 3,
            MessageTypeId::UserControlMessage => 4,
            MessageTypeId::WindowAcknowledgementSize => 5,
            MessageTypeId::SetPeerBandwidth => 6,
            MessageTypeId::AudioMessage => 8,
            MessageTypeId::VideoMessage => 9,
            MessageTypeId::DataMessageAmf3 => 15,
            MessageTypeId::SharedObjectAmf3 => 16,
            MessageTypeId::CommandMessageAmf3 => 17,
            MessageTypeId::DataMessageAmf0 => 18,
            MessageTypeId::SharedObjectAmf0 => 19,
            MessageTypeId::CommandMessageAmf0 => 20,
            MessageTypeId::AggregateMessage => 22,
            MessageTypeId::Unknown(b) => b,
        }
    }
}

/// Peer-bandwidth limit-type semantics, carried by `SetPeerBandwidth`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitType {
    Hard,
    Soft,
    Dynamic,
}

impl LimitType {
    pub fn from_u8(b: u8) -> LimitType {
        match b {
            0 => LimitType::Hard,
            1 => LimitType::Soft,
            _ => LimitType::Dynamic,
        }
    }

    pub fn to_u8(self) -> u8 {
        match self {
            LimitType::Hard => 0,
            LimitType::Soft => 1,
            LimitType::Dynamic => 2,
        }
    }
}

/// `UserControlMessage` sub-event catalogue
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserControlEventType {
    StreamBegin,
    StreamEof,
    StreamDry,
    SetBufferLength,
    StreamIsRecorded,
    PingRequest,
    PingResponse,
    Unknown(u16),
}

impl UserControlEventType {
    pub fn from_u16(v: u16) -> UserControlEventType {
        match v {
            0 => UserControlEventType::StreamBegin,
            1 => UserControlEventType::StreamEof,
            2 => UserControlEventType::StreamDry,
            3 => UserControlEventType::SetBufferLength,
            4 => UserControlEventType::StreamIsRecorded,
            6 => UserControlEventType::PingRequest,
            7 => UserControlEventType::PingResponse,
            other => UserControlEventType::Unknown(other),
        }
    }

    pub fn to_u16(self) -> u16 {
        match self {
            UserControlEventType::StreamBegin => 0,
            UserControlEventType::StreamEof => 1,
            UserControlEventType::StreamDry => 2,
            UserControlEventType::SetBufferLength => 3,
            UserControlEventType::StreamIsRecorded => 4,
            UserControlEventType::PingRequest => 6,
            UserControlEventType::PingResponse => 7,
            UserControlEventType::Unknown(v) => v,
        }
    }
}

/// Status codes surfaced to the application, mapped from the AMF `code` string
/// carried by `onStatus`/`_result`/`_error` payloads
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NetStatusType {
    ConnectSuccess,
    ConnectFailed,
    ConnectClosed,
    ConnectRejected,
    ConnectAppShutdown,
    ConnectInvalidApp,
    PlayStart,
    PlayStop,
    PlayFailed,
    PlayStreamNotFound,
    PlayUnpublishNotify,
    PublishBadName,
    /// Any code this client does not special-case
    Other(String),
}

impl NetStatusType {
    pub fn from_code(code: &str) -> NetStatusType {
        match code {
            "NetConnection.Connect.Success" => NetStatusType::ConnectSuccess,
            "NetConnection.Connect.Failed" => NetStatusType::ConnectFailed,
            "NetConnection.Connect.Closed" => NetStatusType::ConnectClosed,
            "NetConnection.Connect.Rejected" => NetStatusType::ConnectRejected,
            "NetConnection.Connect.AppShutdown" => NetStatusType::ConnectAppShutdown,
            "NetConnection.Connect.InvalidApp" => NetStatusType::ConnectInvalidApp,
            "NetStream.Play.Start" => NetStatusType::PlayStart,
            "NetStream.Play.Stop" => NetStatusType::PlayStop,
            "NetStream.Play.Failed" => NetStatusType::PlayFailed,
            "NetStream.Play.StreamNotFound" => NetStatusType::PlayStreamNotFound,
            "NetStream.Play.UnpublishNotify" => NetStatusType::PlayUnpublishNotify,
            "NetStream.Publish.BadName" => NetStatusType::PublishBadName,
            other => NetStatusType::Other(other.to_string()),
        }
    }

    /// True for codes that indicate a terminal failure rather than an informational event
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            NetStatusType::ConnectFailed
                | NetStatusType::ConnectRejected
                | NetStatusType::ConnectInvalidApp
                | NetStatusType::PlayFailed
                | NetStatusType::PlayStreamNotFound
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_id_round_trips() {
        for b in [1u8, 2, 3, 4, 5, 6, 8, 9, 15, 16, 17, 18, 19, 20, 22] {
            assert_eq!(MessageTypeId::from_u8(b).to_u8(), b);
        }
    }

    #[test]
    fn unknown_message_type_is_preserved() {
        assert_eq!(MessageTypeId::from_u8(200).to_u8(), 200);
    }

    #[test]
    fn net_status_maps_known_codes() {
        assert_eq!(
            NetStatusType::from_code("NetConnection.Connect.Success"),
            NetStatusType::ConnectSuccess
        );
        assert!(!NetStatusType::ConnectSuccess.is_failure());
        assert!(NetStatusType::from_code("NetConnection.Connect.Rejected").is_failure());
    }

    #[test]
    fn net_status_falls_back_to_other() {
        assert_eq!(
            NetStatusType::from_code("NetStream.Seek.Notify"),
            NetStatusType::Other("NetStream.Seek.Notify".to_string())
        );
    }
}
