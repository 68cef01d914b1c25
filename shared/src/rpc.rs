//! Typed HTTP plumbing for service-to-service calls.
//!
//! Every outbound call in the system goes through [`request_json`]: build
//! the request, send it, and either decode the JSON reply or map the
//! peer's error body back into a [`SimError`].

use hyper::client::HttpConnector;
use hyper::header::CONTENT_TYPE;
use hyper::{Body, Client, Method, Request};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{ErrorBody, SimError};

pub type HttpClient = Client<HttpConnector, Body>;

pub fn client() -> HttpClient {
    Client::new()
}

/// Send `body` (if any) to `url` and decode the JSON reply as `R`.
pub async fn request_json<B, R>(
    client: &HttpClient,
    method: Method,
    url: &str,
    body: Option<&B>,
) -> Result<R, SimError>
where
    B: Serialize,
    R: DeserializeOwned,
{
    let mut builder = Request::builder().method(method).uri(url);
    let request = match body {
        Some(body) => {
            let bytes = serde_json::to_vec(body)
                .map_err(|e| SimError::Transport(format!("encoding request: {e}")))?;
            builder = builder.header(CONTENT_TYPE, "application/json");
            builder.body(Body::from(bytes))
        }
        None => builder.body(Body::empty()),
    }
    .map_err(|e| SimError::Transport(format!("building request: {e}")))?;

    let response = client
        .request(request)
        .await
        .map_err(|e| SimError::Transport(format!("{url}: {e}")))?;

    let status = response.status();
    let bytes = hyper::body::to_bytes(response.into_body())
        .await
        .map_err(|e| SimError::Transport(format!("{url}: reading body: {e}")))?;

    if status.is_success() {
        serde_json::from_slice(&bytes)
            .map_err(|e| SimError::Transport(format!("{url}: decoding reply: {e}")))
    } else {
        match serde_json::from_slice::<ErrorBody>(&bytes) {
            Ok(body) => Err(body.into_error()),
            Err(_) => Err(SimError::Transport(format!(
                "{url}: status {status} with unreadable error body"
            ))),
        }
    }
}

pub async fn get_json<R: DeserializeOwned>(client: &HttpClient, url: &str) -> Result<R, SimError> {
    request_json::<(), R>(client, Method::GET, url, None).await
}

pub async fn post_json<B: Serialize, R: DeserializeOwned>(
    client: &HttpClient,
    url: &str,
    body: &B,
) -> Result<R, SimError> {
    request_json(client, Method::POST, url, Some(body)).await
}

pub async fn put_json<B: Serialize, R: DeserializeOwned>(
    client: &HttpClient,
    url: &str,
    body: &B,
) -> Result<R, SimError> {
    request_json(client, Method::PUT, url, Some(body)).await
}

pub async fn patch_json<B: Serialize, R: DeserializeOwned>(
    client: &HttpClient,
    url: &str,
    body: &B,
) -> Result<R, SimError> {
    request_json(client, Method::PATCH, url, Some(body)).await
}

pub async fn delete_json<R: DeserializeOwned>(
    client: &HttpClient,
    url: &str,
) -> Result<R, SimError> {
    request_json::<(), R>(client, Method::DELETE, url, None).await
}
