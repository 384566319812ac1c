//! Object-store adapter.
//!
//! Four conditional primitives against a single lock URL. Every write
//! carries an `x-goog-if-generation-match` precondition, which is what
//! makes retries safe: a request the server applied but whose response
//! was lost cannot be applied twice, because the generation has moved.
//!
//! The adapter owns no protocol decisions except one: a HEAD/GET that
//! returns 200 for an object the expiration oracle says is dead is
//! reported as a synthetic 404, so the state machine above only ever
//! sees "absent" for expired locks.

use reqwest::header::{HeaderMap, CACHE_CONTROL};
use reqwest::{Method, Response, StatusCode};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::client::StorageClient;
use crate::error::{Error, Result};
use crate::expire;
use crate::payload::Payload;

/// Request precondition and response header carrying the generation.
pub(crate) const IF_GENERATION_MATCH_HEADER: &str = "x-goog-if-generation-match";
pub(crate) const GENERATION_HEADER: &str = "x-goog-generation";
/// Object metadata holding the acquirer's TTL, in whole seconds.
pub(crate) const META_TTL_HEADER: &str = "x-goog-meta-ttl";

/// Status and generation of one primitive's response.
#[derive(Debug, Clone)]
pub(crate) struct StoreResponse {
    pub status: StatusCode,
    /// The `x-goog-generation` response header; empty when the server
    /// did not report one.
    pub generation: String,
}

/// Adapter bound to one lock object URL.
#[derive(Debug, Clone)]
pub(crate) struct LockStore {
    client: Arc<StorageClient>,
    url: String,
    object: String,
}

impl LockStore {
    pub(crate) fn new(
        client: Arc<StorageClient>,
        endpoint: &str,
        bucket: &str,
        object: &str,
    ) -> Self {
        let url = format!("{}/{bucket}/{object}", endpoint.trim_end_matches('/'));
        Self {
            client,
            url,
            object: object.to_string(),
        }
    }

    /// Creates the object if `generation` is `"0"` (or empty), replaces
    /// it in place if `generation` matches the current one. Writes the
    /// TTL metadata and returns the new generation.
    pub(crate) async fn put_if_generation(
        &self,
        cancel: &CancellationToken,
        generation: &str,
        payload: &Payload,
        ttl_seconds: u64,
    ) -> Result<StoreResponse> {
        let generation = if generation.is_empty() { "0" } else { generation };
        let request = self
            .client
            .http()
            .put(&self.url)
            .header(CACHE_CONTROL, "no-store")
            .header(IF_GENERATION_MATCH_HEADER, generation)
            .header(META_TTL_HEADER, ttl_seconds.to_string())
            .body(payload.to_body());
        let response = self.send(cancel, request).await?;
        Ok(store_response(&response))
    }

    /// Refreshes `Last-Modified` (and the TTL metadata) without
    /// rewriting the payload, by composing the object from itself.
    /// Returns the new generation.
    pub(crate) async fn compose_self(
        &self,
        cancel: &CancellationToken,
        generation: &str,
        ttl_seconds: u64,
    ) -> Result<StoreResponse> {
        let mut body = String::from("<ComposeRequest><Component><Name>");
        xml_escape_into(&mut body, &self.object);
        body.push_str("</Name></Component></ComposeRequest>");

        let request = self
            .client
            .http()
            .put(format!("{}?compose", self.url))
            .header(CACHE_CONTROL, "no-store")
            .header(IF_GENERATION_MATCH_HEADER, generation)
            .header(META_TTL_HEADER, ttl_seconds.to_string())
            .body(body);
        let response = self.send(cancel, request).await?;
        Ok(store_response(&response))
    }

    /// Deletes the object if `generation` matches the current one.
    pub(crate) async fn delete_if_generation(
        &self,
        cancel: &CancellationToken,
        generation: &str,
    ) -> Result<StoreResponse> {
        let request = self
            .client
            .http()
            .delete(&self.url)
            .header(IF_GENERATION_MATCH_HEADER, generation);
        let response = self.send(cancel, request).await?;
        Ok(store_response(&response))
    }

    /// Fetches the object's status and generation; with a sink, also its
    /// body. HEAD and GET share this code path, differing only in the
    /// method picked.
    ///
    /// A 200 whose headers the expiration oracle rejects is reported as
    /// a synthetic 404; the sink is left untouched in that case.
    pub(crate) async fn inspect(
        &self,
        cancel: &CancellationToken,
        sink: Option<&mut Vec<u8>>,
    ) -> Result<StoreResponse> {
        let method = if sink.is_none() { Method::HEAD } else { Method::GET };
        let request = self
            .client
            .http()
            .request(method, &self.url)
            .header(CACHE_CONTROL, "no-cache");
        let response = self.send(cancel, request).await?;

        let mut result = store_response(&response);
        if result.status == StatusCode::OK && expire::expired(response.headers()) {
            result.status = StatusCode::NOT_FOUND;
        }
        if result.status == StatusCode::OK {
            if let Some(sink) = sink {
                let body = tokio::select! {
                    body = response.bytes() => body.map_err(Error::Transport)?,
                    () = cancel.cancelled() => return Err(Error::Cancelled),
                };
                sink.clear();
                sink.extend_from_slice(&body);
            }
        }
        Ok(result)
    }

    /// Sends one request, observing cancellation. Dropping the in-flight
    /// future aborts the connection.
    async fn send(
        &self,
        cancel: &CancellationToken,
        request: reqwest::RequestBuilder,
    ) -> Result<Response> {
        let request = self.client.authorize(request).await?;
        tokio::select! {
            response = request.send() => Ok(response.map_err(Error::Transport)?),
            () = cancel.cancelled() => Err(Error::Cancelled),
        }
    }
}

fn store_response(response: &Response) -> StoreResponse {
    StoreResponse {
        status: response.status(),
        generation: header_string(response.headers(), GENERATION_HEADER),
    }
}

fn header_string(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
        .to_string()
}

fn xml_escape_into(out: &mut String, text: &str) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '\'' => out.push_str("&apos;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_is_endpoint_bucket_object() {
        let client = Arc::new(StorageClient::unauthenticated().expect("client"));
        let store = LockStore::new(client, "https://storage.googleapis.com/", "b", "o.lock");
        assert_eq!(store.url, "https://storage.googleapis.com/b/o.lock");
    }

    #[test]
    fn xml_escaping_covers_markup_characters() {
        let mut out = String::new();
        xml_escape_into(&mut out, "a<b>&'\"c");
        assert_eq!(out, "a&lt;b&gt;&amp;&apos;&quot;c");
    }
}
