use crate::config::env_parse;
use reqwest::{Client, redirect};
use std::time::Duration;

/// Shared client for every upstream call. The total timeout bounds each
/// external request because none of the collaborators bound latency themselves.
pub fn build_client() -> Client {
    builder()
        .build()
        .unwrap_or_else(|_| Client::new())
}

/// Client that never follows redirects; used to read `Location` headers
/// of short links hop by hop.
pub fn build_manual_redirect_client() -> Client {
    builder()
        .redirect(redirect::Policy::none())
        .build()
        .unwrap_or_else(|_| Client::new())
}

fn builder() -> reqwest::ClientBuilder {
    let timeout = env_parse::<u64>("HTTP_TIMEOUT_SECS").unwrap_or(20);
    let connect = env_parse::<u64>("HTTP_CONNECT_TIMEOUT_SECS").unwrap_or(5);
    Client::builder()
        .timeout(Duration::from_secs(timeout))
        .connect_timeout(Duration::from_secs(connect))
        .user_agent("onboard-api/0.1")
}
