use crate::fetch::client::HttpClient;
use async_trait::async_trait;

/// An [`HttpClient`] wrapper that appends an API key as a URL query parameter.
pub struct UrlParam<C> {
    inner: C,
    param_name: String,
    key: String,
}

impl<C> UrlParam<C> {
    /// `param_name` is the query parameter (e.g. `"api_key"`), `key` its value.
    pub fn new(inner: C, param_name: &str, key: &str) -> Self {
        Self {
            inner,
            param_name: param_name.to_string(),
            key: key.to_string(),
        }
    }

    fn authorize(&self, req: &mut reqwest::Request) {
        req.url_mut()
            .query_pairs_mut()
            .append_pair(&self.param_name, &self.key);
    }
}

#[async_trait]
impl<C: HttpClient> HttpClient for UrlParam<C> {
    async fn execute(&self, mut req: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        self.authorize(&mut req);
        self.inner.execute(req).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::BasicClient;

    #[test]
    fn test_key_is_appended_to_existing_query() {
        let client = UrlParam::new(BasicClient::new(), "api_key", "a b&c");
        let url = "https://feeds.example.com/tripupdates?format=json".parse().unwrap();
        let mut req = reqwest::Request::new(reqwest::Method::GET, url);

        client.authorize(&mut req);

        assert_eq!(req.url().query(), Some("format=json&api_key=a+b%26c"));
    }
}
