//! [`HttpClient`](super::HttpClient) wrappers injecting API keys.

mod api_key;
mod url_param;

pub use api_key::ApiKey;
pub use url_param::UrlParam;
