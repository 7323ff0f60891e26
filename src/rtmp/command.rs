// AMF0 command message encode/decode. RTMP commands are always a flat
// StrictArray-shaped sequence on the wire: command name, transaction id, then
// a variable tail of arguments - never the named schema the object model
// might suggest, so encode/decode both work positionally.

use crate::amf::{AMF0Value, AMFDecodingCursor};
use crate::error::Result;

/// A decoded command message: `[name, transaction_id, ...arguments]`
#[derive(Debug, Clone, PartialEq)]
pub struct RtmpCommand {
    pub name: String,
    pub transaction_id: f64,
    pub arguments: Vec<AMF0Value>,
}

impl RtmpCommand {
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::new();
        out.extend(AMF0Value::string(self.name.clone()).encode());
        out.extend(AMF0Value::number(self.transaction_id).encode());
        for arg in &self.arguments {
            out.extend(arg.encode());
        }
        out
    }

    /// Decodes a command message body: a sequence of AMF0 values read back to
    /// back until the buffer is exhausted, with the first two interpreted as
    /// name and transaction id.
    pub fn decode(data: &[u8]) -> Result<RtmpCommand> {
        let mut cursor = AMFDecodingCursor::new(data);
        let mut values = Vec::new();
        while !cursor.ended() {
            values.push(AMF0Value::read(&mut cursor, data)?);
        }

        let mut iter = values.into_iter();
        let name = match iter.next() {
            Some(AMF0Value::String { value }) => value,
            Some(other) => other.to_debug_string(""),
            None => String::new(),
        };
        let transaction_id = match iter.next() {
            Some(AMF0Value::Number { value }) => value,
            _ => 0.0,
        };

        Ok(RtmpCommand {
            name,
            transaction_id,
            arguments: iter.collect(),
        })
    }
}

/// Builds the `connect` command sent right after the handshake completes.
pub fn build_connect_command(
    transaction_id: f64,
    app: &str,
    tc_url: &str,
    flash_ver: &str,
) -> RtmpCommand {
    let mut properties = std::collections::HashMap::new();
    properties.insert("app".to_string(), AMF0Value::string(app));
    properties.insert("flashVer".to_string(), AMF0Value::string(flash_ver));
    properties.insert("tcUrl".to_string(), AMF0Value::string(tc_url));
    properties.insert("fpad".to_string(), AMF0Value::Bool { value: false });
    properties.insert("capabilities".to_string(), AMF0Value::number(15.0));
    properties.insert("audioCodecs".to_string(), AMF0Value::number(0x0fff as f64));
    properties.insert("videoCodecs".to_string(), AMF0Value::number(0x00ff as f64));
    properties.insert("videoFunction".to_string(), AMF0Value::number(1.0));

    RtmpCommand {
        name: "connect".to_string(),
        transaction_id,
        arguments: vec![AMF0Value::object(properties)],
    }
}

pub fn build_create_stream_command(transaction_id: f64) -> RtmpCommand {
    RtmpCommand {
        name: "createStream".to_string(),
        transaction_id,
        arguments: vec![AMF0Value::Null],
    }
}

pub fn build_play_command(
    transaction_id: f64,
    stream_name: &str,
    start: f64,
    duration: f64,
) -> RtmpCommand {
    RtmpCommand {
        name: "play".to_string(),
        transaction_id,
        arguments: vec![
            AMF0Value::Null,
            AMF0Value::string(stream_name),
            AMF0Value::number(start),
            AMF0Value::number(duration),
        ],
    }
}

pub fn build_pause_command(transaction_id: f64, pause: bool, position: f64) -> RtmpCommand {
    RtmpCommand {
        name: "pause".to_string(),
        transaction_id,
        arguments: vec![
            AMF0Value::Null,
            AMF0Value::Bool { value: pause },
            AMF0Value::number(position),
        ],
    }
}

pub fn build_seek_command(transaction_id: f64, position: f64) -> RtmpCommand {
    RtmpCommand {
        name: "seek".to_string(),
        transaction_id,
        arguments: vec![AMF0Value::Null, AMF0Value::number(position)],
    }
}

pub fn build_call_command(
    transaction_id: f64,
    procedure: &str,
    arguments: Vec<AMF0Value>,
) -> RtmpCommand {
    let mut full_arguments = vec![AMF0Value::Null];
    full_arguments.extend(arguments);
    RtmpCommand {
        name: procedure.to_string(),
        transaction_id,
        arguments: full_arguments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_command_round_trips() {
        let cmd = build_connect_command(1.0, "live", "rtmp://localhost/live", "LNX 9,0,124,2");
        let encoded = cmd.encode();
        let decoded = RtmpCommand::decode(&encoded).unwrap();

        assert_eq!(decoded.name, "connect");
        assert_eq!(decoded.transaction_id, 1.0);
        assert_eq!(decoded.arguments.len(), 1);
        match &decoded.arguments[0] {
            AMF0Value::Object { properties } => {
                assert_eq!(
                    properties.get("app"),
                    Some(&AMF0Value::string("live"))
                );
            }
            other => panic!("expected object, got {:?}", other),
        }
    }

    #[test]
    fn play_command_carries_positional_arguments() {
        let cmd = build_play_command(4.0, "mystream", -2.0, -1.0);
        let encoded = cmd.encode();
        let decoded = RtmpCommand::decode(&encoded).unwrap();

        assert_eq!(decoded.name, "play");
        assert_eq!(decoded.arguments[1], AMF0Value::string("mystream"));
    }

    #[test]
    fn decodes_a_result_response_with_trailing_information_object() {
        let mut info = std::collections::HashMap::new();
        info.insert("code".to_string(), AMF0Value::string("NetConnection.Connect.Success"));
        let response = RtmpCommand {
            name: "_result".to_string(),
            transaction_id: 1.0,
            arguments: vec![AMF0Value::Null, AMF0Value::object(info)],
        };

        let decoded = RtmpCommand::decode(&response.encode()).unwrap();
        assert_eq!(decoded.name, "_result");
        assert_eq!(decoded.arguments.len(), 2);
    }
}
