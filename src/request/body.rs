//! Bounded request-body capture.
//!
//! Ingestion runs only for write methods that declare both a Content-Type
//! and a Content-Length; at most [`MAX_BODY_BYTES`] are read. JSON and
//! form-encoded bodies are parsed, everything else is stored raw.

use hyper::body::{Bytes, HttpBody};
use mime::Mime;
use tracing::debug;

use crate::error::HttpError;
use crate::util;

use super::context::{BodyData, RequestContext};
use super::normalize;

/// Upper bound on captured request bodies.
pub const MAX_BODY_BYTES: usize = 200 * 1024;

/// Read and parse the request body when the trigger conditions hold.
pub(crate) async fn ingest(ctx: &mut RequestContext) -> Result<(), HttpError> {
    if !util::is_write_method(&ctx.method) {
        return Ok(());
    }
    let content_type = ctx
        .req_headers
        .get(hyper::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let content_length = ctx
        .req_headers
        .get(hyper::header::CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());
    let (Some(content_type), Some(content_length)) = (content_type, content_length) else {
        return Ok(());
    };

    if content_length > MAX_BODY_BYTES as u64 {
        return Err(HttpError::with_message(413, "Request body too large"));
    }

    let Some(stream) = ctx.body_stream.take() else {
        return Ok(());
    };
    let bytes = read_capped(stream).await?;
    if bytes.len() as u64 != content_length {
        return Err(HttpError::with_message(
            400,
            "Request body does not match Content-Length",
        ));
    }

    ctx.body = parse_body(&bytes, &content_type)?;
    ctx.captured_body = Some(bytes);
    Ok(())
}

async fn read_capped(mut stream: hyper::Body) -> Result<Bytes, HttpError> {
    let mut collected: Vec<u8> = Vec::new();
    while let Some(chunk) = stream.data().await {
        let chunk =
            chunk.map_err(|e| HttpError::with_message(400, format!("Body read failed: {}", e)))?;
        if collected.len() + chunk.len() > MAX_BODY_BYTES {
            return Err(HttpError::with_message(413, "Request body too large"));
        }
        collected.extend_from_slice(&chunk);
    }
    Ok(Bytes::from(collected))
}

fn parse_body(bytes: &Bytes, content_type: &str) -> Result<BodyData, HttpError> {
    let Ok(mime) = content_type.parse::<Mime>() else {
        return Ok(BodyData::Raw(bytes.clone()));
    };

    // Decoding is specified for utf-8 only; other charsets stay raw.
    let charset_is_utf8 = mime
        .get_param(mime::CHARSET)
        .map(|c| c.as_str().eq_ignore_ascii_case("utf-8"))
        .unwrap_or(true);
    if !charset_is_utf8 {
        debug!(content_type, "unsupported charset, storing raw body");
        return Ok(BodyData::Raw(bytes.clone()));
    }

    match (mime.type_(), mime.subtype()) {
        (mime::APPLICATION, mime::JSON) => serde_json::from_slice(bytes)
            .map(BodyData::Json)
            .map_err(|e| HttpError::with_message(400, format!("Malformed JSON body: {}", e))),
        (mime::APPLICATION, mime::WWW_FORM_URLENCODED) => {
            let text = std::str::from_utf8(bytes)
                .map_err(|_| HttpError::with_message(400, "Malformed form body"))?;
            Ok(BodyData::Form(normalize::parse_query(text)))
        }
        _ => Ok(BodyData::Raw(bytes.clone())),
    }
}
