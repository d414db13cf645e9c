//! Query-string and body parsing.
//!
//! Form encoding splits on `&` then on the first `=`, decodes `+` as a
//! space and percent-escapes strictly. The last occurrence of a key wins.
//! A key without `=` maps to `null`.

use axum::http::{header::CONTENT_TYPE, HeaderMap, Method};
use serde_json::{Map, Value};

use super::ParamsMap;
use crate::error::{Error, Result};

const FORM_TYPE: &str = "application/x-www-form-urlencoded";
const JSON_TYPE: &str = "application/json";

/// How a request body contributes to params.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyKind {
    Form,
    Json,
    Other,
}

/// Classify a body by its `Content-Type` header, ignoring parameters.
pub fn body_kind(headers: &HeaderMap) -> BodyKind {
    let Some(content_type) = headers.get(CONTENT_TYPE).and_then(|v| v.to_str().ok()) else {
        return BodyKind::Other;
    };
    let essence = content_type.split(';').next().unwrap_or("").trim();
    if essence.eq_ignore_ascii_case(FORM_TYPE) {
        BodyKind::Form
    } else if essence.eq_ignore_ascii_case(JSON_TYPE) {
        BodyKind::Json
    } else {
        BodyKind::Other
    }
}

fn decode_component(raw: &str) -> Result<String> {
    let spaced = raw.replace('+', " ");
    urlencoding::decode(&spaced)
        .map(|decoded| decoded.into_owned())
        .map_err(|_| Error::BadRequest(format!("invalid form encoding: {raw}")))
}

/// Parse `application/x-www-form-urlencoded` text.
pub fn parse_form(input: &str) -> Result<ParamsMap> {
    let mut params = ParamsMap::new();
    for pair in input.split('&').filter(|pair| !pair.is_empty()) {
        let (key, value) = match pair.split_once('=') {
            Some((key, value)) => (key, Some(value)),
            None => (pair, None),
        };
        let key = decode_component(key)?;
        let value = match value {
            Some(value) => Value::String(decode_component(value)?),
            None => Value::Null,
        };
        params.insert(key, value);
    }
    Ok(params)
}

/// Parse an optional query string.
pub fn parse_query(query: Option<&str>) -> Result<ParamsMap> {
    match query {
        Some(query) => parse_form(query),
        None => Ok(ParamsMap::new()),
    }
}

/// Params contributed by the query and body, plus a non-object JSON body.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ParsedParams {
    pub params: ParamsMap,
    pub request_body: Option<Value>,
}

fn parse_json_body(body: &str) -> Result<(Map<String, Value>, Option<Value>)> {
    if body.trim().is_empty() {
        return Ok((Map::new(), None));
    }
    match serde_json::from_str::<Value>(body)? {
        Value::Object(map) => Ok((map, None)),
        array @ Value::Array(_) => Ok((Map::new(), Some(array))),
        _ => Err(Error::BadRequest(
            "JSON body must be an object or an array".to_string(),
        )),
    }
}

/// Parse everything a request contributes before route captures are merged.
///
/// Bodies are read only for `POST` and `PUT`.
pub fn parse_request(
    method: &Method,
    query: Option<&str>,
    headers: &HeaderMap,
    body: &[u8],
) -> Result<ParsedParams> {
    let mut parsed = ParsedParams {
        params: parse_query(query)?,
        request_body: None,
    };

    if *method != Method::POST && *method != Method::PUT {
        return Ok(parsed);
    }

    let kind = body_kind(headers);
    if kind == BodyKind::Other {
        return Ok(parsed);
    }

    let text = std::str::from_utf8(body)
        .map_err(|_| Error::BadRequest("request body is not valid UTF-8".to_string()))?;

    match kind {
        BodyKind::Form => {
            let form = parse_form(text)?;
            parsed.params.merge(form.as_map().clone());
        }
        BodyKind::Json => {
            let (object, request_body) = parse_json_body(text)?;
            parsed.params.merge(object);
            parsed.request_body = request_body;
        }
        BodyKind::Other => {}
    }

    Ok(parsed)
}
