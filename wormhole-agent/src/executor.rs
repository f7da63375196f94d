use std::collections::HashMap;

use thiserror::Error;

use wormhole_proto::{BasicResponse, HttpCommand, HttpRequest, HttpResponse, Response, ResponseCode};

#[derive(Error, Debug)]
enum PerformError {
    #[error("invalid method: {0}")]
    Method(#[from] http::method::InvalidMethod),

    #[error("{0}")]
    Http(#[from] reqwest::Error),
}

/// Performs the inward HTTP calls the hub tunnels to this agent.
///
/// Commands may run concurrently; each call produces exactly one response
/// carrying the command's sequence. Local failures never travel as errors,
/// they are wrapped into `Basic{ERROR_FOUND}` for the hub.
#[derive(Clone)]
pub struct Executor {
    client: reqwest::Client,
}

impl Executor {
    /// `insecure` disables TLS verification for inward https calls, pairing
    /// with the QUIC-side toggle.
    pub fn new(insecure: bool) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder()
            .danger_accept_invalid_certs(insecure)
            .build()?;

        Ok(Self { client })
    }

    pub async fn execute(&self, identifier: &str, command: HttpCommand) -> Response {
        let sequence = command.sequence;

        match self.perform(&command.request).await {
            Ok((status_code, status_text, header, body)) => Response::Http(HttpResponse::new(
                identifier,
                sequence,
                header,
                status_code,
                status_text,
                body,
            )),
            Err(err) => {
                log::warn!("inward call for sequence {sequence} failed: {err}");
                Response::Basic(BasicResponse::new(
                    identifier,
                    sequence,
                    ResponseCode::ErrorFound,
                    err.to_string(),
                ))
            }
        }
    }

    async fn perform(
        &self,
        request: &HttpRequest,
    ) -> Result<(u16, String, HashMap<String, Vec<String>>, Vec<u8>), PerformError> {
        let method = reqwest::Method::from_bytes(request.method.as_bytes())?;
        let url = target_url(request);
        log::debug!("inward {method} {url}");

        let mut headers = reqwest::header::HeaderMap::new();
        for (name, values) in &request.headers {
            let Ok(name) = reqwest::header::HeaderName::from_bytes(name.as_bytes()) else {
                log::debug!("dropping invalid header name {name:?}");
                continue;
            };
            for value in values {
                match reqwest::header::HeaderValue::from_str(value) {
                    Ok(value) => {
                        headers.append(name.clone(), value);
                    }
                    Err(_) => log::debug!("dropping invalid value for header {name}"),
                }
            }
        }

        let response = self
            .client
            .request(method, url)
            .headers(headers)
            .body(request.body.clone())
            .send()
            .await?;

        let status = response.status();
        let status_text = format!(
            "{} {}",
            status.as_u16(),
            status.canonical_reason().unwrap_or_default()
        );

        let mut header: HashMap<String, Vec<String>> = HashMap::new();
        for (name, value) in response.headers() {
            let Ok(value) = value.to_str() else {
                continue;
            };
            header
                .entry(name.as_str().to_string())
                .or_default()
                .push(value.to_string());
        }

        // Bodies are buffered end-to-end; there is no streaming on the wire.
        let body = response.bytes().await?.to_vec();

        Ok((status.as_u16(), status_text, header, body))
    }
}

// An empty host means the service is only reachable from the agent itself.
fn target_url(request: &HttpRequest) -> String {
    let schema = match request.schema.as_str() {
        "" => "http",
        schema => schema,
    };
    let host = match request.host.as_str() {
        "" => "127.0.0.1",
        host => host,
    };

    let base = request.base_path.trim_end_matches('/');
    let rest = request.path.trim_start_matches('/');

    format!("{schema}://{host}:{}{base}/{rest}", request.port)
}
