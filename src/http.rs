//! Ready-made HTTP actions backed by `reqwest`.

use std::time::Duration;

use futures::future::BoxFuture;
use reqwest::{Client, Url, header::HeaderMap};

use crate::metric::{ErrorKind, Outcome};

pub const USER_AGENT: &str = concat!("arrival/", env!("CARGO_PKG_VERSION"));

/// Build a client shared by every request of a run.
///
/// `timeout` is applied by reqwest as well, so a request never outlives the
/// run's own per-request timeout by much even if the action is polled late.
pub fn client(timeout: Duration, headers: HeaderMap) -> reqwest::Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .default_headers(headers)
        .timeout(timeout)
        .build()
}

/// An action issuing `GET url` and reading the whole body.
///
/// A 2xx answer is a success; any other status, a transport error or a body
/// that cannot be read is a failure.
pub fn get_action(
    client: Client,
    url: Url,
) -> impl Fn() -> BoxFuture<'static, Outcome> + Send + Sync + Clone + 'static {
    move || {
        let client = client.clone();
        let url = url.clone();
        Box::pin(async move {
            let response = match client.get(url).send().await {
                Ok(response) => response,
                Err(e) => return Outcome::Failure(classify(&e)),
            };
            let status = response.status().as_u16();
            match response.bytes().await {
                Ok(_) => Outcome::from_status(status),
                Err(e) => Outcome::Failure(classify(&e)),
            }
        })
    }
}

fn classify(err: &reqwest::Error) -> ErrorKind {
    if err.is_timeout() {
        ErrorKind::Timeout
    } else {
        ErrorKind::Network(err.to_string())
    }
}
