// AMF0 value

use byteorder::{BigEndian, ByteOrder};
use std::collections::HashMap;

use super::{AMFDecodingCursor, AMF3Value};
use crate::error::RtmpError;

const AMF0_TYPE_NUMBER: u8 = 0x00;
const AMF0_TYPE_BOOL: u8 = 0x01;
const AMF0_TYPE_STRING: u8 = 0x02;
const AMF0_TYPE_OBJECT: u8 = 0x03;
const AMF0_TYPE_NULL: u8 = 0x05;
const AMF0_TYPE_UNDEFINED: u8 = 0x06;
const AMF0_TYPE_REF: u8 = 0x07;
const AMF0_TYPE_ARRAY: u8 = 0x08;
const AMF0_TYPE_STRICT_ARRAY: u8 = 0x0A;
const AMF0_TYPE_DATE: u8 = 0x0B;
const AMF0_TYPE_LONG_STRING: u8 = 0x0C;
const AMF0_TYPE_XML_DOC: u8 = 0x0F;
const AMF0_TYPE_TYPED_OBJ: u8 = 0x10;
const AMF0_TYPE_SWITCH_AMF3: u8 = 0x11;

const AMF0_OBJECT_TERM_CODE: u8 = 0x09;

/// AMF0 compatible value
#[derive(Debug, Clone, PartialEq)]
pub enum AMF0Value {
    Number { value: f64 },
    Bool { value: bool },
    String { value: String },
    Object { properties: HashMap<String, AMF0Value> },
    Null,
    Undefined,
    Ref { addr: i64 },
    Array { items: HashMap<String, AMF0Value> },
    StrictArray { items: Vec<AMF0Value> },
    Date { timestamp: f64 },
    LongString { value: String },
    XmlDocument { content: String },
    TypedObject {
        type_name: String,
        properties: HashMap<String, AMF0Value>,
    },
    SwitchAmf3 { value: AMF3Value },
}

impl AMF0Value {
    /// Convenience constructor for a string value
    pub fn string(s: impl Into<String>) -> AMF0Value {
        AMF0Value::String { value: s.into() }
    }

    /// Convenience constructor for a number value
    pub fn number(n: f64) -> AMF0Value {
        AMF0Value::Number { value: n }
    }

    /// Convenience constructor for an object value
    pub fn object(properties: HashMap<String, AMF0Value>) -> AMF0Value {
        AMF0Value::Object { properties }
    }

    /// Obtains a string representation of the value, used for debug logging purposes
    pub fn to_debug_string(&self, tabs: &str) -> String {
        match self {
            AMF0Value::Number { value } => format!("{}", value),
            AMF0Value::Bool { value } => {
                if *value {
                    "TRUE".to_string()
                } else {
                    "FALSE".to_string()
                }
            }
            AMF0Value::String { value } => format!("'{}'", value),
            AMF0Value::Object { properties } => {
                let mut res = "{\n".to_string();
                for (key, value) in properties.iter() {
                    res.push_str(tabs);
                    res.push_str("    '");
                    res.push_str(key);
                    res.push_str("' = ");
                    res.push_str(&value.to_debug_string(&format!("{}    ", tabs)));
                    res.push('\n');
                }
                res.push_str(tabs);
                res.push('}');
                res
            }
            AMF0Value::Null => "NULL".to_string(),
            AMF0Value::Undefined => "UNDEFINED".to_string(),
            AMF0Value::Ref { addr } => format!("REF#{}", addr),
            AMF0Value::Array { items } => {
                let mut res = "ARRAY [\n".to_string();
                for (key, value) in items.iter() {
                    res.push_str(tabs);
                    res.push_str("    '");
                    res.push_str(key);
                    res.push_str("' = ");
                    res.push_str(&value.to_debug_string(&format!("{}    ", tabs)));
                    res.push('\n');
                }
                res.push_str(tabs);
                res.push(']');
                res
            }
            AMF0Value::StrictArray { items } => {
                let mut res = "STRICT_ARRAY [\n".to_string();
                for value in items.iter() {
                    res.push_str(tabs);
                    res.push_str("    ");
                    res.push_str(&value.to_debug_string(&format!("{}    ", tabs)));
                    res.push('\n');
                }
                res.push_str(tabs);
                res.push(']');
                res
            }
            AMF0Value::Date { timestamp } => format!("DATE({})", timestamp),
            AMF0Value::LongString { value } => format!("L'{}'", value),
            AMF0Value::XmlDocument { content } => format!("XML'{}'", content),
            AMF0Value::TypedObject { type_name, properties } => {
                let mut res = format!("{} {}\n", type_name, "{");
                for (key, value) in properties.iter() {
                    res.push_str(tabs);
                    res.push_str("    '");
                    res.push_str(key);
                    res.push_str("' = ");
                    res.push_str(&value.to_debug_string(&format!("{}    ", tabs)));
                    res.push('\n');
                }
                res.push_str(tabs);
                res.push('}');
                res
            }
            AMF0Value::SwitchAmf3 { value } => format!("AMF3({})", value.to_debug_string(tabs)),
        }
    }

    // Value check / accessor functions:

    pub fn is_amf3(&self) -> bool {
        matches!(self, AMF0Value::SwitchAmf3 { .. })
    }

    pub fn is_undefined(&self) -> bool {
        match self {
            AMF0Value::Undefined => true,
            AMF0Value::SwitchAmf3 { value } => value.is_undefined(),
            _ => false,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            AMF0Value::Null => true,
            AMF0Value::SwitchAmf3 { value } => value.is_null(),
            _ => false,
        }
    }

    pub fn get_bool(&self) -> bool {
        match self {
            AMF0Value::Bool { value } => *value,
            AMF0Value::Number { value } => *value != 0.0,
            AMF0Value::SwitchAmf3 { value } => value.get_bool(),
            _ => false,
        }
    }

    pub fn get_integer(&self) -> i64 {
        match self {
            AMF0Value::Number { value } => *value as i64,
            AMF0Value::Ref { addr } => *addr,
            AMF0Value::Date { timestamp } => *timestamp as i64,
            AMF0Value::SwitchAmf3 { value } => value.get_integer(),
            _ => 0,
        }
    }

    pub fn get_float(&self) -> f64 {
        match self {
            AMF0Value::Number { value } => *value,
            AMF0Value::Ref { addr } => *addr as f64,
            AMF0Value::Date { timestamp } => *timestamp,
            AMF0Value::SwitchAmf3 { value } => value.get_float(),
            _ => 0.0,
        }
    }

    pub fn get_string(&self) -> &str {
        match self {
            AMF0Value::String { value } => value.as_str(),
            AMF0Value::LongString { value } => value.as_str(),
            AMF0Value::XmlDocument { content } => content.as_str(),
            AMF0Value::SwitchAmf3 { value } => value.get_string(),
            _ => "",
        }
    }

    pub fn get_byte_array(&self) -> Option<&Vec<u8>> {
        match self {
            AMF0Value::SwitchAmf3 { value } => value.get_byte_array(),
            _ => None,
        }
    }

    pub fn get_object(&self) -> Option<&HashMap<String, AMF0Value>> {
        match self {
            AMF0Value::Object { properties } => Some(properties),
            AMF0Value::Array { items } => Some(items),
            AMF0Value::TypedObject { properties, .. } => Some(properties),
            _ => None,
        }
    }

    pub fn get_object_property(&self, property_name: &str) -> Option<&AMF0Value> {
        self.get_object().and_then(|o| o.get(property_name))
    }

    pub fn get_array(&self) -> Option<&Vec<AMF0Value>> {
        match self {
            AMF0Value::StrictArray { items } => Some(items),
            _ => None,
        }
    }

    pub fn get_array_element(&self, index: usize) -> Option<&AMF0Value> {
        self.get_array().and_then(|a| a.get(index))
    }

    // Encoding functions:

    /// Encodes value into bytes
    pub fn encode(&self) -> Vec<u8> {
        match self {
            AMF0Value::Number { value } => {
                let mut buf = vec![AMF0_TYPE_NUMBER];
                buf.extend(Self::encode_number(*value));
                buf
            }
            AMF0Value::Bool { value } => {
                let mut buf = vec![AMF0_TYPE_BOOL];
                buf.extend(Self::encode_bool(*value));
                buf
            }
            AMF0Value::String { value } => {
                let mut buf = vec![AMF0_TYPE_STRING];
                buf.extend(Self::encode_string(value));
                buf
            }
            AMF0Value::Object { properties } => {
                let mut buf = vec![AMF0_TYPE_OBJECT];
                buf.extend(Self::encode_object(properties));
                buf
            }
            AMF0Value::Null => vec![AMF0_TYPE_NULL],
            AMF0Value::Undefined => vec![AMF0_TYPE_UNDEFINED],
            AMF0Value::Ref { addr } => {
                let mut buf = vec![AMF0_TYPE_REF];
                buf.extend(Self::encode_ref(*addr as u16));
                buf
            }
            AMF0Value::Array { items } => {
                let mut buf = vec![AMF0_TYPE_ARRAY];
                buf.extend(Self::encode_array(items));
                buf
            }
            AMF0Value::StrictArray { items } => {
                let mut buf = vec![AMF0_TYPE_STRICT_ARRAY];
                buf.extend(Self::encode_strict_array(items));
                buf
            }
            AMF0Value::Date { timestamp } => {
                let mut buf = vec![AMF0_TYPE_DATE];
                buf.extend(Self::encode_date(*timestamp));
                buf
            }
            AMF0Value::LongString { value } => {
                let mut buf = vec![AMF0_TYPE_LONG_STRING];
                buf.extend(Self::encode_string(value));
                buf
            }
            AMF0Value::XmlDocument { content } => {
                let mut buf = vec![AMF0_TYPE_XML_DOC];
                buf.extend(Self::encode_string(content));
                buf
            }
            AMF0Value::TypedObject { type_name, properties } => {
                let mut buf = vec![AMF0_TYPE_TYPED_OBJ];
                buf.extend(Self::encode_typed_object(type_name, properties));
                buf
            }
            AMF0Value::SwitchAmf3 { .. } => {
                // Encoding AMF3 values back onto the wire is not needed: this client
                // only ever receives SwitchAmf3, it never constructs one to send.
                vec![AMF0_TYPE_SWITCH_AMF3]
            }
        }
    }

    pub fn encode_number(num: f64) -> Vec<u8> {
        let mut buf = vec![0; 8];
        BigEndian::write_f64(&mut buf, num);
        buf
    }

    pub fn encode_bool(b: bool) -> Vec<u8> {
        if b {
            vec![0x01]
        } else {
            vec![0x00]
        }
    }

    pub fn encode_date(ts: f64) -> Vec<u8> {
        let mut buf = vec![0x00, 0x00];
        buf.extend(Self::encode_number(ts));
        buf
    }

    pub fn encode_string(s: &str) -> Vec<u8> {
        let str_bytes = s.as_bytes();
        let mut buf = vec![0u8; 2];
        BigEndian::write_u16(&mut buf, str_bytes.len() as u16);
        buf.extend_from_slice(str_bytes);
        buf
    }

    pub fn encode_object(o: &HashMap<String, AMF0Value>) -> Vec<u8> {
        let mut buf = Vec::new();

        let mut keys: Vec<&str> = o.keys().map(|k| k.as_str()).collect();
        keys.sort();

        for key in keys {
            buf.extend(Self::encode_string(key));
            let value = o.get(key).unwrap();
            buf.extend(value.encode());
        }

        buf.extend(Self::encode_string(""));
        buf.push(AMF0_OBJECT_TERM_CODE);

        buf
    }

    pub fn encode_array(arr: &HashMap<String, AMF0Value>) -> Vec<u8> {
        let mut buf = vec![0u8; 4];
        BigEndian::write_u32(&mut buf, arr.len() as u32);
        buf.extend(Self::encode_object(arr));
        buf
    }

    pub fn encode_strict_array(arr: &Vec<AMF0Value>) -> Vec<u8> {
        let mut buf = vec![0u8; 4];
        BigEndian::write_u32(&mut buf, arr.len() as u32);
        for item in arr {
            buf.extend(item.encode());
        }
        buf
    }

    pub fn encode_ref(index: u16) -> Vec<u8> {
        let mut buf = vec![0u8; 2];
        BigEndian::write_u16(&mut buf, index);
        buf
    }

    pub fn encode_typed_object(type_name: &str, o: &HashMap<String, AMF0Value>) -> Vec<u8> {
        let mut buf = Self::encode_string(type_name);
        buf.extend(Self::encode_object(o));
        buf
    }

    // Decoding functions:

    /// Reads one AMF0 value from `data` at the cursor's current position
    pub fn read(cursor: &mut AMFDecodingCursor, data: &[u8]) -> Result<AMF0Value, RtmpError> {
        let marker = cursor.read(data, 1)?[0];

        match marker {
            AMF0_TYPE_NUMBER => {
                let bytes = cursor.read(data, 8)?;
                Ok(AMF0Value::Number {
                    value: BigEndian::read_f64(bytes),
                })
            }
            AMF0_TYPE_BOOL => {
                let b = cursor.read(data, 1)?[0];
                Ok(AMF0Value::Bool { value: b != 0 })
            }
            AMF0_TYPE_STRING => Ok(AMF0Value::String {
                value: Self::read_short_string(cursor, data)?,
            }),
            AMF0_TYPE_OBJECT => Ok(AMF0Value::Object {
                properties: Self::read_object_properties(cursor, data)?,
            }),
            AMF0_TYPE_NULL => Ok(AMF0Value::Null),
            AMF0_TYPE_UNDEFINED => Ok(AMF0Value::Undefined),
            AMF0_TYPE_REF => {
                let bytes = cursor.read(data, 2)?;
                Ok(AMF0Value::Ref {
                    addr: BigEndian::read_u16(bytes) as i64,
                })
            }
            AMF0_TYPE_ARRAY => {
                let bytes = cursor.read(data, 4)?;
                let _count = BigEndian::read_u32(bytes);
                Ok(AMF0Value::Array {
                    items: Self::read_object_properties(cursor, data)?,
                })
            }
            AMF0_TYPE_STRICT_ARRAY => {
                let bytes = cursor.read(data, 4)?;
                let count = BigEndian::read_u32(bytes) as usize;
                let mut items = Vec::with_capacity(count);
                for _ in 0..count {
                    items.push(Self::read(cursor, data)?);
                }
                Ok(AMF0Value::StrictArray { items })
            }
            AMF0_TYPE_DATE => {
                cursor.skip(2)?; // time zone, unused
                let bytes = cursor.read(data, 8)?;
                Ok(AMF0Value::Date {
                    timestamp: BigEndian::read_f64(bytes),
                })
            }
            AMF0_TYPE_LONG_STRING => Ok(AMF0Value::LongString {
                value: Self::read_long_string(cursor, data)?,
            }),
            AMF0_TYPE_XML_DOC => Ok(AMF0Value::XmlDocument {
                content: Self::read_long_string(cursor, data)?,
            }),
            AMF0_TYPE_TYPED_OBJ => {
                let type_name = Self::read_short_string(cursor, data)?;
                Ok(AMF0Value::TypedObject {
                    type_name,
                    properties: Self::read_object_properties(cursor, data)?,
                })
            }
            AMF0_TYPE_SWITCH_AMF3 => Ok(AMF0Value::SwitchAmf3 {
                value: AMF3Value::read(cursor, data)?,
            }),
            _ => Err(RtmpError::AmfDecodeError(format!(
                "unknown AMF0 marker: 0x{marker:02x}"
            ))),
        }
    }

    fn read_short_string(cursor: &mut AMFDecodingCursor, data: &[u8]) -> Result<String, RtmpError> {
        let len_bytes = cursor.read(data, 2)?;
        let len = BigEndian::read_u16(len_bytes) as usize;
        Self::read_utf8(cursor, data, len)
    }

    fn read_long_string(cursor: &mut AMFDecodingCursor, data: &[u8]) -> Result<String, RtmpError> {
        let len_bytes = cursor.read(data, 4)?;
        let len = BigEndian::read_u32(len_bytes) as usize;
        Self::read_utf8(cursor, data, len)
    }

    fn read_utf8(cursor: &mut AMFDecodingCursor, data: &[u8], len: usize) -> Result<String, RtmpError> {
        let bytes = cursor.read(data, len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|e| RtmpError::AmfDecodeError(format!("invalid UTF-8 in AMF0 string: {e}")))
    }

    /// Reads a sequence of `(name, value)` pairs terminated by an empty-name + 0x09 marker
    fn read_object_properties(
        cursor: &mut AMFDecodingCursor,
        data: &[u8],
    ) -> Result<HashMap<String, AMF0Value>, RtmpError> {
        let mut properties = HashMap::new();

        loop {
            let name = Self::read_short_string(cursor, data)?;

            if name.is_empty() {
                let term = cursor.read(data, 1)?[0];
                if term != AMF0_OBJECT_TERM_CODE {
                    return Err(RtmpError::AmfDecodeError(
                        "expected object terminator after empty property name".to_string(),
                    ));
                }
                break;
            }

            let value = Self::read(cursor, data)?;
            properties.insert(name, value);
        }

        Ok(properties)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn number_round_trips() {
        let v = AMF0Value::number(42.5);
        let bytes = v.encode();
        let mut cursor = AMFDecodingCursor::new(&bytes);
        let decoded = AMF0Value::read(&mut cursor, &bytes).unwrap();
        assert_eq!(decoded.get_float(), 42.5);
    }

    #[test]
    fn string_round_trips() {
        let v = AMF0Value::string("connect");
        let bytes = v.encode();
        let mut cursor = AMFDecodingCursor::new(&bytes);
        let decoded = AMF0Value::read(&mut cursor, &bytes).unwrap();
        assert_eq!(decoded.get_string(), "connect");
    }

    #[test]
    fn object_round_trips() {
        let mut props = HashMap::new();
        props.insert("app".to_string(), AMF0Value::string("live"));
        props.insert("code".to_string(), AMF0Value::number(1.0));
        let v = AMF0Value::object(props);
        let bytes = v.encode();
        let mut cursor = AMFDecodingCursor::new(&bytes);
        let decoded = AMF0Value::read(&mut cursor, &bytes).unwrap();
        assert_eq!(decoded.get_object_property("app").unwrap().get_string(), "live");
        assert_eq!(decoded.get_object_property("code").unwrap().get_float(), 1.0);
    }

    #[test]
    fn strict_array_round_trips() {
        let items = vec![
            AMF0Value::string("_result"),
            AMF0Value::number(1.0),
            AMF0Value::Null,
        ];
        let v = AMF0Value::StrictArray { items };
        let bytes = v.encode();
        let mut cursor = AMFDecodingCursor::new(&bytes);
        let decoded = AMF0Value::read(&mut cursor, &bytes).unwrap();
        let arr = decoded.get_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[0].get_string(), "_result");
        assert_eq!(arr[1].get_float(), 1.0);
        assert!(arr[2].is_null());
    }

    #[test]
    fn multiple_values_parse_sequentially() {
        // Mirrors a command message: name, transaction id, object, ...
        let mut buf = Vec::new();
        buf.extend(AMF0Value::string("connect").encode());
        buf.extend(AMF0Value::number(1.0).encode());
        buf.extend(AMF0Value::Null.encode());

        let mut cursor = AMFDecodingCursor::new(&buf);
        let name = AMF0Value::read(&mut cursor, &buf).unwrap();
        let tid = AMF0Value::read(&mut cursor, &buf).unwrap();
        let obj = AMF0Value::read(&mut cursor, &buf).unwrap();

        assert_eq!(name.get_string(), "connect");
        assert_eq!(tid.get_float(), 1.0);
        assert!(obj.is_null());
        assert!(cursor.ended());
    }
}
