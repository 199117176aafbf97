//! Protocol message encoding

use super::constants::{tags, SSL_REQUEST_CODE};
use super::message::FrontendMessage;
use bytes::{BufMut, BytesMut};

/// Encode a frontend message into bytes
pub fn encode_message(msg: &FrontendMessage) -> BytesMut {
    let mut buf = BytesMut::new();

    match msg {
        FrontendMessage::Startup { version, params } => {
            // Startup messages don't have a type byte
            framed(&mut buf, None, |buf| {
                buf.put_i32(*version);
                for (key, value) in params {
                    put_cstr(buf, key);
                    put_cstr(buf, value);
                }
                buf.put_u8(0);
            });
        }
        FrontendMessage::Password(password) => {
            framed(&mut buf, Some(tags::PASSWORD), |buf| put_cstr(buf, password));
        }
        FrontendMessage::Terminate => {
            framed(&mut buf, Some(tags::TERMINATE), |_| {});
        }
        FrontendMessage::SaslInitialResponse { mechanism, data } => {
            framed(&mut buf, Some(tags::PASSWORD), |buf| {
                put_cstr(buf, mechanism);
                buf.put_i32(data.len() as i32);
                buf.put_slice(data);
            });
        }
        FrontendMessage::SaslResponse { data } => {
            framed(&mut buf, Some(tags::PASSWORD), |buf| buf.put_slice(data));
        }
        FrontendMessage::SslRequest => {
            framed(&mut buf, None, |buf| buf.put_i32(SSL_REQUEST_CODE));
        }
    }

    buf
}

/// Write an optional tag, a length placeholder and the body, then backfill the
/// length (which counts itself but not the tag).
fn framed(buf: &mut BytesMut, tag: Option<u8>, body: impl FnOnce(&mut BytesMut)) {
    if let Some(tag) = tag {
        buf.put_u8(tag);
    }
    let len_pos = buf.len();
    buf.put_i32(0);

    body(buf);

    let len = (buf.len() - len_pos) as i32;
    buf[len_pos..len_pos + 4].copy_from_slice(&len.to_be_bytes());
}

fn put_cstr(buf: &mut BytesMut, s: &str) {
    buf.put_slice(s.as_bytes());
    buf.put_u8(0);
}
