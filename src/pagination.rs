use std::collections::VecDeque;

use serde_json::Value;
use tracing::debug;

use crate::api::{ApiClient, Headers, Params};
use crate::error::ApiError;

/// Lazy page-walker for any list-type endpoint. Items are yielded one at a
/// time so a consumer can short-circuit; the next page is only requested
/// once the buffered one is drained and `max_items` has not been reached.
///
/// A page-fetch failure ends the walk: the items already yielded stand, one
/// terminal `Err` is yielded, and the caller decides whether the partial
/// set is usable.
pub struct Paginator<'a> {
    client: &'a ApiClient,
    next_url: Option<String>,
    /// Sent with the first request only; follow-up URLs from the Link
    /// header already carry their query string.
    params: Option<Params>,
    max_items: Option<usize>,
    buffer: VecDeque<Value>,
    yielded: usize,
    done: bool,
}

impl<'a> Paginator<'a> {
    pub fn new(client: &'a ApiClient, url: impl Into<String>, params: Params, max_items: Option<usize>) -> Self {
        Self {
            client,
            next_url: Some(url.into()),
            params: Some(params),
            max_items,
            buffer: VecDeque::new(),
            yielded: 0,
            done: false,
        }
    }

    /// Yield the next item, fetching a page when needed.
    pub async fn next_item(&mut self) -> Option<Result<Value, ApiError>> {
        if let Some(max) = self.max_items {
            if self.yielded >= max {
                return None;
            }
        }

        if let Some(item) = self.buffer.pop_front() {
            self.yielded += 1;
            return Some(Ok(item));
        }

        if self.done {
            return None;
        }

        let url = match self.next_url.take() {
            Some(url) => url,
            None => {
                self.done = true;
                return None;
            }
        };

        let params = self.params.take().unwrap_or_default();
        match self.client.request_with_headers(&url, &params).await {
            Ok((body, headers)) => {
                let items = unwrap_items(body);
                debug!(url = %url, count = items.len(), "Fetched page");
                if items.is_empty() {
                    self.done = true;
                    return None;
                }
                self.buffer.extend(items);
                self.next_url = next_link(&headers);
                if self.next_url.is_none() {
                    self.done = true;
                }
                self.yielded += 1;
                self.buffer.pop_front().map(Ok)
            }
            Err(err) => {
                self.done = true;
                Some(Err(err))
            }
        }
    }

    /// Drain the rest of the sequence into a vec, reporting (but not
    /// discarding on) a trailing page failure.
    pub async fn collect_remaining(mut self) -> (Vec<Value>, Option<ApiError>) {
        let mut items = Vec::new();
        let mut error = None;
        while let Some(result) = self.next_item().await {
            match result {
                Ok(item) => items.push(item),
                Err(err) => {
                    error = Some(err);
                    break;
                }
            }
        }
        (items, error)
    }
}

/// Search endpoints wrap the page in `{"items": [...], "total_count": n}`;
/// plain list endpoints return a bare array.
fn unwrap_items(body: Value) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("items") {
            Some(Value::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}

/// Extract the rel="next" target from a Link header.
pub(crate) fn next_link(headers: &Headers) -> Option<String> {
    let link = headers.get("link")?;
    for part in link.split(',') {
        let mut segments = part.split(';');
        let url = segments.next()?.trim();
        let is_next = segments.any(|seg| {
            let seg = seg.trim();
            seg == "rel=\"next\"" || seg == "rel=next"
        });
        if is_next {
            return Some(url.trim_start_matches('<').trim_end_matches('>').to_string());
        }
    }
    None
}
