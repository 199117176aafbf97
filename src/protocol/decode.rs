//! Protocol message decoding

use super::constants::{auth, tags};
use super::message::{AuthenticationMessage, BackendMessage, ErrorFields};
use std::io;

/// Largest message accepted during startup. Authentication and status
/// messages are tiny; anything bigger is a misbehaving peer.
const MAX_MESSAGE_LENGTH: usize = 1024 * 1024;

/// Decode one backend message from the front of `data`.
///
/// Returns `Ok(None)` while the buffer holds an incomplete message, and
/// `Ok(Some((msg, consumed)))` once a full message is available. The caller
/// advances its buffer by `consumed`.
pub fn decode_message(data: &[u8]) -> io::Result<Option<(BackendMessage, usize)>> {
    if data.len() < 5 {
        return Ok(None);
    }

    let tag = data[0];
    let len = i32::from_be_bytes([data[1], data[2], data[3], data[4]]);
    if len < 4 {
        return Err(invalid(format!("invalid message length {}", len)));
    }
    let len = len as usize;

    if len > MAX_MESSAGE_LENGTH {
        return Err(invalid(format!(
            "message length {} exceeds maximum allowed {}",
            len, MAX_MESSAGE_LENGTH
        )));
    }

    if data.len() < len + 1 {
        return Ok(None);
    }

    let body = &data[5..len + 1];

    let msg = match tag {
        tags::AUTHENTICATION => decode_authentication(body)?,
        tags::BACKEND_KEY_DATA => decode_backend_key_data(body)?,
        tags::ERROR_RESPONSE => BackendMessage::ErrorResponse(decode_error_fields(body)?),
        tags::NOTICE_RESPONSE => BackendMessage::NoticeResponse(decode_error_fields(body)?),
        tags::PARAMETER_STATUS => decode_parameter_status(body)?,
        tags::READY_FOR_QUERY => {
            let status = *body.first().ok_or_else(|| truncated("status byte"))?;
            BackendMessage::ReadyForQuery { status }
        }
        _ => {
            return Err(invalid(format!(
                "unexpected message tag during startup: 0x{:02X}",
                tag
            )))
        }
    };

    Ok(Some((msg, len + 1)))
}

fn invalid(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

fn truncated(what: &str) -> io::Error {
    io::Error::new(io::ErrorKind::UnexpectedEof, what.to_string())
}

fn read_i32(data: &[u8], offset: usize, what: &str) -> io::Result<i32> {
    data.get(offset..offset + 4)
        .map(|b| i32::from_be_bytes([b[0], b[1], b[2], b[3]]))
        .ok_or_else(|| truncated(what))
}

/// Read a null-terminated string starting at `offset`, returning it and the
/// offset just past the terminator.
fn read_cstr(data: &[u8], offset: usize, what: &str) -> io::Result<(String, usize)> {
    let rest = data.get(offset..).ok_or_else(|| truncated(what))?;
    let end = rest
        .iter()
        .position(|&b| b == 0)
        .ok_or_else(|| invalid(format!("missing null terminator in {}", what)))?;
    let s = String::from_utf8_lossy(&rest[..end]).into_owned();
    Ok((s, offset + end + 1))
}

fn decode_authentication(data: &[u8]) -> io::Result<BackendMessage> {
    let auth_type = read_i32(data, 0, "auth type")?;

    let auth_msg = match auth_type {
        auth::OK => AuthenticationMessage::Ok,
        auth::CLEARTEXT_PASSWORD => AuthenticationMessage::CleartextPassword,
        auth::MD5_PASSWORD => {
            let salt = data.get(4..8).ok_or_else(|| truncated("salt data"))?;
            AuthenticationMessage::Md5Password {
                salt: [salt[0], salt[1], salt[2], salt[3]],
            }
        }
        auth::SASL => {
            // Mechanism list: null-terminated names, closed by an empty name
            let mut mechanisms = Vec::new();
            let mut offset = 4;
            while offset < data.len() {
                let (mechanism, next) = read_cstr(data, offset, "SASL mechanism")?;
                if mechanism.is_empty() {
                    break;
                }
                mechanisms.push(mechanism);
                offset = next;
            }
            AuthenticationMessage::Sasl { mechanisms }
        }
        auth::SASL_CONTINUE => AuthenticationMessage::SaslContinue {
            data: data[4..].to_vec(),
        },
        auth::SASL_FINAL => AuthenticationMessage::SaslFinal {
            data: data[4..].to_vec(),
        },
        _ => {
            return Err(io::Error::new(
                io::ErrorKind::Unsupported,
                format!("unsupported auth type: {}", auth_type),
            ))
        }
    };

    Ok(BackendMessage::Authentication(auth_msg))
}

fn decode_backend_key_data(data: &[u8]) -> io::Result<BackendMessage> {
    Ok(BackendMessage::BackendKeyData {
        process_id: read_i32(data, 0, "backend key data")?,
        secret_key: read_i32(data, 4, "backend key data")?,
    })
}

fn decode_error_fields(data: &[u8]) -> io::Result<ErrorFields> {
    let mut fields = ErrorFields::default();
    let mut offset = 0;

    while let Some(&field_type) = data.get(offset) {
        if field_type == 0 {
            break;
        }
        let (value, next) = read_cstr(data, offset + 1, "error field")?;
        offset = next;

        match field_type {
            b'S' => fields.severity = Some(value),
            b'C' => fields.code = Some(value),
            b'M' => fields.message = Some(value),
            b'D' => fields.detail = Some(value),
            b'H' => fields.hint = Some(value),
            _ => {} // Ignore unknown fields
        }
    }

    Ok(fields)
}

fn decode_parameter_status(data: &[u8]) -> io::Result<BackendMessage> {
    let (name, offset) = read_cstr(data, 0, "parameter name")?;
    let (value, _) = read_cstr(data, offset, "parameter value")?;
    Ok(BackendMessage::ParameterStatus { name, value })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(tag: u8, body: &[u8]) -> Vec<u8> {
        let mut out = vec![tag];
        out.extend_from_slice(&((body.len() + 4) as i32).to_be_bytes());
        out.extend_from_slice(body);
        out
    }

    #[test]
    fn test_decode_authentication_ok() {
        let data = frame(b'R', &[0, 0, 0, 0]);

        let (msg, consumed) = decode_message(&data).unwrap().unwrap();
        assert!(matches!(
            msg,
            BackendMessage::Authentication(AuthenticationMessage::Ok)
        ));
        assert_eq!(consumed, 9); // 1 tag + 4 len + 4 auth type
    }

    #[test]
    fn test_decode_incomplete_returns_none() {
        let data = frame(b'R', &[0, 0, 0, 0]);
        assert!(decode_message(&data[..3]).unwrap().is_none());
        assert!(decode_message(&data[..7]).unwrap().is_none());
    }

    #[test]
    fn test_decode_sasl_mechanisms() {
        let mut body = 10i32.to_be_bytes().to_vec();
        body.extend_from_slice(b"SCRAM-SHA-256-PLUS\0SCRAM-SHA-256\0\0");
        let data = frame(b'R', &body);

        let (msg, _) = decode_message(&data).unwrap().unwrap();
        match msg {
            BackendMessage::Authentication(AuthenticationMessage::Sasl { mechanisms }) => {
                assert_eq!(mechanisms, vec!["SCRAM-SHA-256-PLUS", "SCRAM-SHA-256"]);
            }
            other => panic!("expected SASL, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_error_response_fields() {
        let data = frame(
            b'E',
            b"SFATAL\0C28P01\0Mpassword authentication failed for user \"postgres\"\0\0",
        );

        let (msg, consumed) = decode_message(&data).unwrap().unwrap();
        assert_eq!(consumed, data.len());
        match msg {
            BackendMessage::ErrorResponse(fields) => {
                assert_eq!(fields.severity.as_deref(), Some("FATAL"));
                assert_eq!(fields.code.as_deref(), Some("28P01"));
                assert_eq!(
                    fields.message.as_deref(),
                    Some("password authentication failed for user \"postgres\"")
                );
            }
            other => panic!("expected ErrorResponse, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_parameter_status() {
        let data = frame(b'S', b"server_version\x0016.2\0");

        let (msg, _) = decode_message(&data).unwrap().unwrap();
        match msg {
            BackendMessage::ParameterStatus { name, value } => {
                assert_eq!(name, "server_version");
                assert_eq!(value, "16.2");
            }
            other => panic!("expected ParameterStatus, got {:?}", other),
        }
    }

    #[test]
    fn test_decode_rejects_oversized_message() {
        let oversized_len = (MAX_MESSAGE_LENGTH as i32) + 1;
        let len_bytes = oversized_len.to_be_bytes();
        let data = [b'S', len_bytes[0], len_bytes[1], len_bytes[2], len_bytes[3]];

        let err = decode_message(&data).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
        assert!(err.to_string().contains("exceeds maximum"));
    }

    #[test]
    fn test_decode_rejects_unknown_tag() {
        let data = frame(b'D', &[0, 0]);
        assert!(decode_message(&data).is_err());
    }

    #[test]
    fn test_decode_ready_for_query() {
        let data = frame(b'Z', b"I");

        let (msg, consumed) = decode_message(&data).unwrap().unwrap();
        match msg {
            BackendMessage::ReadyForQuery { status } => assert_eq!(status, b'I'),
            other => panic!("expected ReadyForQuery, got {:?}", other),
        }
        assert_eq!(consumed, 6); // 1 tag + 4 len + 1 status
    }
}
