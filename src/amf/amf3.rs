// AMF3 value

use byteorder::{BigEndian, ByteOrder};

use super::AMFDecodingCursor;
use crate::error::RtmpError;

const AMF3_TYPE_UNDEFINED: u8 = 0x00;
const AMF3_TYPE_NULL: u8 = 0x01;
const AMF3_TYPE_FALSE: u8 = 0x02;
const AMF3_TYPE_TRUE: u8 = 0x03;
const AMF3_TYPE_INTEGER: u8 = 0x04;
const AMF3_TYPE_DOUBLE: u8 = 0x05;
const AMF3_TYPE_STRING: u8 = 0x06;
const AMF3_TYPE_XML_DOC: u8 = 0x07;
const AMF3_TYPE_DATE: u8 = 0x08;
const AMF3_TYPE_ARRAY: u8 = 0x09;
const AMF3_TYPE_OBJECT: u8 = 0x0A;
const AMF3_TYPE_XML: u8 = 0x0B;
const AMF3_TYPE_BYTE_ARRAY: u8 = 0x0C;

/// AMF3 compatible value
///
/// Only the subset the command channel can legally carry is modeled; `Array` and
/// `Object` markers are accepted syntactically (so a decode never derails on them)
/// but their contents are not exposed, matching the "input is accepted but the
/// core only needs to observe well-known scalar fields" scope of this client.
#[derive(Debug, Clone, PartialEq)]
pub enum AMF3Value {
    Undefined,
    Null,
    False,
    True,
    Integer { value: i32 },
    Double { value: f64 },
    String { value: String },
    XmlDocument { content: String },
    Date { timestamp: f64 },
    Array,
    Object,
    Xml { value: String },
    ByteArray { value: Vec<u8> },
}

impl AMF3Value {
    /// Obtains a string representation of the value, used for debug logging purposes
    pub fn to_debug_string(&self, _tabs: &str) -> String {
        match self {
            AMF3Value::Undefined => "Undefined".to_string(),
            AMF3Value::Null => "Null".to_string(),
            AMF3Value::False => "False".to_string(),
            AMF3Value::True => "True".to_string(),
            AMF3Value::Integer { value } => format!("Integer({})", value),
            AMF3Value::Double { value } => format!("Double({})", value),
            AMF3Value::String { value } => format!("'{}'", value),
            AMF3Value::XmlDocument { content } => format!("XML_DOC'{}'", content),
            AMF3Value::Date { timestamp } => format!("DATE({})", timestamp),
            AMF3Value::Array => "Array(Unsupported)".to_string(),
            AMF3Value::Object => "Object(Unsupported)".to_string(),
            AMF3Value::Xml { value } => format!("XML'{}'", value),
            AMF3Value::ByteArray { value } => format!("Bytes({} bytes)", value.len()),
        }
    }

    /// Turns the AMF3 value into a boolean
    pub fn get_bool(&self) -> bool {
        matches!(self, AMF3Value::True)
    }

    /// Returns true if the value is undefined
    pub fn is_undefined(&self) -> bool {
        matches!(self, AMF3Value::Undefined)
    }

    /// Returns true if the value is null
    pub fn is_null(&self) -> bool {
        matches!(self, AMF3Value::Null)
    }

    /// Returns the value as integer
    pub fn get_integer(&self) -> i64 {
        match self {
            AMF3Value::Integer { value } => *value as i64,
            AMF3Value::Double { value } => *value as i64,
            _ => 0,
        }
    }

    /// Returns the value as float
    pub fn get_float(&self) -> f64 {
        match self {
            AMF3Value::Integer { value } => *value as f64,
            AMF3Value::Double { value } => *value,
            _ => 0.0,
        }
    }

    /// Returns the value as string
    pub fn get_string(&self) -> &str {
        match self {
            AMF3Value::String { value } => value.as_str(),
            AMF3Value::XmlDocument { content } => content.as_str(),
            AMF3Value::Xml { value } => value.as_str(),
            _ => "",
        }
    }

    /// Returns the value as byte array
    pub fn get_byte_array(&self) -> Option<&Vec<u8>> {
        match self {
            AMF3Value::ByteArray { value } => Some(value),
            _ => None,
        }
    }

    /// Reads the U29 variable-length integer used by AMF3 for lengths and the
    /// integer type. Returns the decoded value and consumes 1-4 bytes.
    fn read_u29(cursor: &mut AMFDecodingCursor, data: &[u8]) -> Result<u32, RtmpError> {
        let mut result: u32 = 0;

        for i in 0..4 {
            let b = cursor.read(data, 1)?[0];

            if i == 3 {
                // Last byte contributes all 8 bits
                result = (result << 8) | b as u32;
                break;
            }

            result = (result << 7) | (b & 0x7F) as u32;

            if b & 0x80 == 0 {
                break;
            }
        }

        Ok(result)
    }

    fn read_utf8(cursor: &mut AMFDecodingCursor, data: &[u8]) -> Result<String, RtmpError> {
        let header = Self::read_u29(cursor, data)?;
        let len = (header >> 1) as usize;
        let bytes = cursor.read(data, len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| RtmpError::AmfDecodeError(format!("invalid UTF-8 in AMF3 string: {e}")))
    }

    /// Reads one AMF3 value from the cursor
    pub fn read(cursor: &mut AMFDecodingCursor, data: &[u8]) -> Result<AMF3Value, RtmpError> {
        let marker = cursor.read(data, 1)?[0];

        match marker {
            AMF3_TYPE_UNDEFINED => Ok(AMF3Value::Undefined),
            AMF3_TYPE_NULL => Ok(AMF3Value::Null),
            AMF3_TYPE_FALSE => Ok(AMF3Value::False),
            AMF3_TYPE_TRUE => Ok(AMF3Value::True),
            AMF3_TYPE_INTEGER => {
                let raw = Self::read_u29(cursor, data)?;
                // U29 is a 29-bit two's complement value
                let value = if raw & 0x10000000 != 0 {
                    (raw as i32) - (1 << 29)
                } else {
                    raw as i32
                };
                Ok(AMF3Value::Integer { value })
            }
            AMF3_TYPE_DOUBLE => {
                let bytes = cursor.read(data, 8)?;
                Ok(AMF3Value::Double {
                    value: BigEndian::read_f64(bytes),
                })
            }
            AMF3_TYPE_STRING => Ok(AMF3Value::String {
                value: Self::read_utf8(cursor, data)?,
            }),
            AMF3_TYPE_XML_DOC => Ok(AMF3Value::XmlDocument {
                content: Self::read_utf8(cursor, data)?,
            }),
            AMF3_TYPE_XML => Ok(AMF3Value::Xml {
                value: Self::read_utf8(cursor, data)?,
            }),
            AMF3_TYPE_DATE => {
                let header = Self::read_u29(cursor, data)?;
                if header & 1 != 0 {
                    let bytes = cursor.read(data, 8)?;
                    Ok(AMF3Value::Date {
                        timestamp: BigEndian::read_f64(bytes),
                    })
                } else {
                    Err(RtmpError::AmfDecodeError(
                        "AMF3 date references are not supported".to_string(),
                    ))
                }
            }
            AMF3_TYPE_BYTE_ARRAY => {
                let header = Self::read_u29(cursor, data)?;
                if header & 1 != 0 {
                    let len = (header >> 1) as usize;
                    let bytes = cursor.read(data, len)?;
                    Ok(AMF3Value::ByteArray {
                        value: bytes.to_vec(),
                    })
                } else {
                    Err(RtmpError::AmfDecodeError(
                        "AMF3 byte-array references are not supported".to_string(),
                    ))
                }
            }
            AMF3_TYPE_ARRAY | AMF3_TYPE_OBJECT => Err(RtmpError::AmfDecodeError(format!(
                "AMF3 marker 0x{marker:02x} (array/object) is not supported by this client"
            ))),
            _ => Err(RtmpError::AmfDecodeError(format!(
                "unknown AMF3 marker: 0x{marker:02x}"
            ))),
        }
    }
}
