use axum::http::{header::HeaderName, HeaderMap, HeaderValue};
use std::time::{SystemTime, UNIX_EPOCH};

// 9999-12-31T23:59:59Z, the last second an IMF-fixdate can carry.
const MAX_HTTP_DATE_SECS: u64 = 253_402_300_799;

/// Formats `t` as an HTTP date, or `None` when it falls before 1970 or after
/// year 9999.
pub fn http_date(t: SystemTime) -> Option<String> {
    let secs = t.duration_since(UNIX_EPOCH).ok()?.as_secs();
    (secs <= MAX_HTTP_DATE_SECS).then(|| httpdate::fmt_http_date(t))
}

/// Response headers collected while a request moves through the pipeline.
///
/// Every step uses [`ResponseHeaders::set_if_absent`] so that a value placed by
/// an earlier step (or by a caller that pre-seeded the map) is never
/// overwritten. `Vary` is the exception and goes through
/// [`ResponseHeaders::append`].
#[derive(Debug, Default, Clone)]
pub struct ResponseHeaders {
    inner: HeaderMap,
}

impl ResponseHeaders {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets `name` unless it already has a value. Returns `true` when the value
    /// was stored. Values that are not valid header text are dropped.
    pub fn set_if_absent(&mut self, name: HeaderName, value: &str) -> bool {
        if self.inner.contains_key(&name) {
            return false;
        }
        match HeaderValue::from_str(value) {
            Ok(v) => {
                self.inner.insert(name, v);
                true
            }
            Err(_) => {
                tracing::warn!("Dropping invalid {} header value: {:?}", name, value);
                false
            }
        }
    }

    /// Adds another value for `name`, keeping the ones already present.
    pub fn append(&mut self, name: HeaderName, value: &'static str) {
        self.inner.append(name, HeaderValue::from_static(value));
    }

    pub fn get(&self, name: &HeaderName) -> Option<&str> {
        self.inner.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn into_header_map(self) -> HeaderMap {
        self.inner
    }
}

impl From<HeaderMap> for ResponseHeaders {
    fn from(inner: HeaderMap) -> Self {
        Self { inner }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::header;
    use std::time::Duration;

    #[test]
    fn set_if_absent_keeps_first_value() {
        let mut headers = ResponseHeaders::new();
        assert!(headers.set_if_absent(header::ETAG, "\"a\""));
        assert!(!headers.set_if_absent(header::ETAG, "\"b\""));
        assert_eq!(headers.get(&header::ETAG), Some("\"a\""));
    }

    #[test]
    fn preseeded_headers_are_not_overwritten() {
        let mut seeded = HeaderMap::new();
        seeded.insert(header::CONTENT_TYPE, HeaderValue::from_static("image/png"));
        let mut headers = ResponseHeaders::from(seeded);
        headers.set_if_absent(header::CONTENT_TYPE, "image/jpeg");
        assert_eq!(headers.get(&header::CONTENT_TYPE), Some("image/png"));
    }

    #[test]
    fn append_accumulates_vary() {
        let mut headers = ResponseHeaders::new();
        headers.append(header::VARY, "Accept-Encoding");
        headers.append(header::VARY, "Accept");
        let map = headers.into_header_map();
        let values: Vec<_> = map.get_all(header::VARY).iter().collect();
        assert_eq!(values.len(), 2);
    }

    #[test]
    fn invalid_values_are_dropped() {
        let mut headers = ResponseHeaders::new();
        assert!(!headers.set_if_absent(header::ETAG, "bad\nvalue"));
        assert!(headers.get(&header::ETAG).is_none());
    }

    #[test]
    fn http_date_covers_the_representable_range() {
        assert_eq!(http_date(UNIX_EPOCH).as_deref(), Some("Thu, 01 Jan 1970 00:00:00 GMT"));
        let last = UNIX_EPOCH + Duration::from_secs(MAX_HTTP_DATE_SECS);
        assert_eq!(http_date(last).as_deref(), Some("Fri, 31 Dec 9999 23:59:59 GMT"));
    }

    #[test]
    fn http_date_rejects_out_of_range_times() {
        assert!(http_date(UNIX_EPOCH - Duration::from_secs(86_400)).is_none());
        assert!(http_date(UNIX_EPOCH + Duration::from_secs(MAX_HTTP_DATE_SECS + 1)).is_none());
    }
}
