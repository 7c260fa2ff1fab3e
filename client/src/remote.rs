//! Request/response access to the server's store.

use std::future::Future;

use kvsync_engine::protocol::{BulkSetRequest, SetRequest};
use kvsync_engine::{InstanceId, Snapshot, WriteOp, INSTANCE_HEADER};
use reqwest::{Response, StatusCode, Url};
use serde::Deserialize;

use crate::error::{Error, Result};

/// The server side of a sync cache: a snapshot read and the four writes.
///
/// Every write names the instance it originates from so the resulting
/// change event can be recognized as an echo.
pub trait Remote: Send + Sync + 'static {
    /// Fetch the complete current key-value set.
    fn get_all(&self) -> impl Future<Output = Result<Snapshot>> + Send;

    /// Apply one write; resolves once the server acknowledged it.
    fn write(&self, origin: &InstanceId, op: &WriteOp) -> impl Future<Output = Result<()>> + Send;
}

/// Error body returned by the server.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    details: Option<String>,
}

/// [`Remote`] over the server's HTTP API.
#[derive(Debug, Clone)]
pub struct HttpRemote {
    client: reqwest::Client,
    base: Url,
}

impl HttpRemote {
    /// Create a remote for the server at `base_url`, e.g. `http://localhost:8080`.
    pub fn new(base_url: &str) -> Result<Self> {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    fn with_client(client: reqwest::Client, base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url)
            .map_err(|e| Error::Transport(format!("invalid server URL {}: {}", base_url, e)))?;

        if base.cannot_be_a_base() {
            return Err(Error::Transport(format!(
                "server URL cannot carry paths: {}",
                base_url
            )));
        }

        // Relative joins below must not replace the last path segment
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        Ok(Self { client, base })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    /// WebSocket URL of the change stream for `instance`.
    pub fn stream_url(&self, instance: &InstanceId) -> Result<Url> {
        let mut url = self.endpoint("api/stream")?;
        let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
        url.set_scheme(scheme)
            .map_err(|_| Error::Transport(format!("cannot derive stream URL from {}", self.base)))?;
        url.query_pairs_mut()
            .append_pair("instance", instance.as_str());
        Ok(url)
    }

    fn endpoint(&self, path: &str) -> Result<Url> {
        self.base
            .join(path)
            .map_err(|e| Error::Transport(format!("invalid endpoint {}: {}", path, e)))
    }

    fn entry_url(&self, key: &str) -> Result<Url> {
        let mut url = self.endpoint("api/kv/entries")?;
        url.path_segments_mut()
            .map_err(|_| Error::Transport(format!("server URL cannot carry paths: {}", self.base)))?
            .push(key);
        Ok(url)
    }
}

impl Remote for HttpRemote {
    async fn get_all(&self) -> Result<Snapshot> {
        let response = self.client.get(self.endpoint("api/kv")?).send().await?;
        let snapshot = check(response).await?.json::<Snapshot>().await?;
        Ok(snapshot)
    }

    async fn write(&self, origin: &InstanceId, op: &WriteOp) -> Result<()> {
        let request = match op {
            WriteOp::Set { key, value } => self.client.post(self.endpoint("api/kv")?).json(&SetRequest {
                key: key.clone(),
                value: value.clone(),
            }),
            WriteOp::BulkSet { data } => self
                .client
                .post(self.endpoint("api/kv/bulk")?)
                .json(&BulkSetRequest { data: data.clone() }),
            WriteOp::Remove { key } => self.client.delete(self.entry_url(key)?),
            WriteOp::Clear => self.client.delete(self.endpoint("api/kv")?),
        };

        let response = request
            .header(INSTANCE_HEADER, origin.as_str())
            .send()
            .await?;
        check(response).await?;

        tracing::trace!(op = op.kind(), "Write acknowledged");
        Ok(())
    }
}

/// Turn a non-success response into the matching [`Error`].
async fn check(response: Response) -> Result<Response> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }

    let message = match response.json::<ErrorBody>().await {
        Ok(body) => match body.details {
            Some(details) => format!("{}: {}", body.error, details),
            None => body.error,
        },
        Err(_) => status.to_string(),
    };

    Err(classify(status, message))
}

fn classify(status: StatusCode, message: String) -> Error {
    if status.is_server_error() {
        Error::StorageUnavailable(message)
    } else if status == StatusCode::BAD_REQUEST && message.starts_with("invalid key") {
        Error::InvalidKey(message)
    } else {
        Error::Rejected {
            status: status.as_u16(),
            message,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_gets_trailing_slash() {
        let remote = HttpRemote::new("http://localhost:8080/sync").unwrap();
        assert_eq!(remote.base_url().as_str(), "http://localhost:8080/sync/");
        assert_eq!(
            remote.endpoint("api/kv").unwrap().as_str(),
            "http://localhost:8080/sync/api/kv"
        );
    }

    #[test]
    fn test_stream_url() {
        let instance = InstanceId::parse("tab-1").unwrap();

        let plain = HttpRemote::new("http://localhost:8080").unwrap();
        assert_eq!(
            plain.stream_url(&instance).unwrap().as_str(),
            "ws://localhost:8080/api/stream?instance=tab-1"
        );

        let tls = HttpRemote::new("https://example.com").unwrap();
        assert_eq!(tls.stream_url(&instance).unwrap().scheme(), "wss");
    }

    #[test]
    fn test_entry_url_escapes_key() {
        let remote = HttpRemote::new("http://localhost:8080").unwrap();
        let url = remote.entry_url("notes/2024 draft").unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:8080/api/kv/entries/notes%2F2024%20draft"
        );
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(matches!(
            HttpRemote::new("not a url"),
            Err(Error::Transport(_))
        ));
        assert!(HttpRemote::new("mailto:someone@example.com").is_err());
    }

    #[test]
    fn test_classify() {
        assert!(matches!(
            classify(StatusCode::SERVICE_UNAVAILABLE, "storage unavailable".into()),
            Error::StorageUnavailable(_)
        ));
        assert!(matches!(
            classify(StatusCode::BAD_REQUEST, "invalid key: key must not be empty".into()),
            Error::InvalidKey(_)
        ));
        assert!(matches!(
            classify(StatusCode::PAYLOAD_TOO_LARGE, "too large".into()),
            Error::Rejected { status: 413, .. }
        ));

        // Unstorable values are final, not an outage
        let unstorable = classify(StatusCode::BAD_REQUEST, "invalid value: bad escape".into());
        assert!(matches!(unstorable, Error::Rejected { status: 400, .. }));
        assert!(!unstorable.is_retryable());
    }
}
