use bytes::{BufMut, BytesMut};

use crate::http::response::Response;

const HTTP_VERSION: &str = "HTTP/1.1";

/// Appends the wire form of `resp` to `buf`.
pub fn serialize_response(resp: &Response, buf: &mut BytesMut) {
    // Status line
    let status_line = format!(
        "{} {} {}\r\n",
        HTTP_VERSION,
        resp.status.as_u16(),
        resp.status.reason_phrase()
    );
    buf.reserve(status_line.len() + resp.body.len() + 128);
    buf.put_slice(status_line.as_bytes());

    // Headers
    for (k, v) in &resp.headers {
        buf.put_slice(k.as_bytes());
        buf.put_slice(b": ");
        buf.put_slice(v.as_bytes());
        buf.put_slice(b"\r\n");
    }

    // Header/body separator
    buf.put_slice(b"\r\n");

    // Body
    buf.put_slice(&resp.body);
}
