use async_trait::async_trait;
use reqwest::{Request, Response};

/// Sends prepared requests. Auth wrappers implement it by decorating the
/// request and delegating to an inner client.
#[async_trait]
pub trait HttpClient: Send + Sync {
    async fn execute(&self, req: Request) -> reqwest::Result<Response>;
}
