use crate::domain::model::RequestedFormat;
use crate::utils::error::{Result, ValidatorError};
use reqwest::{Client, Method};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HttpConfig {
    pub timeout_seconds: u64,
    pub user_agent: String,
    pub max_response_bytes: usize,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_seconds: 30,
            user_agent: format!("odata-validator/{}", env!("CARGO_PKG_VERSION")),
            max_response_bytes: 10 * 1024 * 1024,
        }
    }
}

/// 一次 HTTP 呼叫的完整回應，header 名稱一律小寫
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub url: String,
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: String,
}

impl HttpResponse {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.header("content-type")
    }

    /// Content-Type without parameters, lower-cased.
    pub fn media_type(&self) -> Option<String> {
        self.content_type()
            .and_then(|ct| ct.split(';').next())
            .map(|mt| mt.trim().to_ascii_lowercase())
    }

    pub fn media_type_parameter(&self, name: &str) -> Option<String> {
        let content_type = self.content_type()?;
        content_type.split(';').skip(1).find_map(|param| {
            let (key, value) = param.split_once('=')?;
            if key.trim().eq_ignore_ascii_case(name) {
                Some(value.trim().trim_matches('"').to_string())
            } else {
                None
            }
        })
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }

    pub fn json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_str(&self.body)?)
    }
}

pub fn accept_header(format: RequestedFormat) -> &'static str {
    match format {
        RequestedFormat::Json => "application/json",
        RequestedFormat::Atom => "application/atom+xml",
        RequestedFormat::Xml => "application/xml",
        RequestedFormat::Any => {
            "application/json;q=0.9, application/atom+xml;q=0.8, application/xml;q=0.7, */*;q=0.1"
        }
    }
}

/// 所有規則共用的 HTTP helper
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: Client,
    config: HttpConfig,
    default_headers: Vec<(String, String)>,
}

impl HttpClient {
    pub fn new(config: HttpConfig, default_headers: Vec<(String, String)>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .user_agent(config.user_agent.clone())
            .build()?;

        Ok(Self {
            client,
            config,
            default_headers,
        })
    }

    pub fn config(&self) -> &HttpConfig {
        &self.config
    }

    fn merged_headers(&self, headers: &[(String, String)]) -> Vec<(String, String)> {
        let mut merged: Vec<(String, String)> = vec![
            ("OData-MaxVersion".to_string(), "4.0".to_string()),
            ("MaxDataServiceVersion".to_string(), "3.0".to_string()),
        ];

        for (name, value) in self.default_headers.iter().chain(headers) {
            match merged.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
                Some(existing) => existing.1 = value.clone(),
                None => merged.push((name.clone(), value.clone())),
            }
        }
        merged
    }

    pub async fn send(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<String>,
    ) -> Result<HttpResponse> {
        let mut request = self.client.request(method.clone(), url);
        for (name, value) in self.merged_headers(headers) {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        tracing::debug!(%method, url, "sending OData request");

        let mut response = request
            .send()
            .await
            .map_err(|e| ValidatorError::TargetUnreachable {
                uri: url.to_string(),
                message: e.to_string(),
            })?;

        let status = response.status().as_u16();
        let final_url = response.url().to_string();

        let mut response_headers: BTreeMap<String, String> = BTreeMap::new();
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                response_headers
                    .entry(name.as_str().to_string())
                    .and_modify(|existing| {
                        existing.push_str(", ");
                        existing.push_str(value);
                    })
                    .or_insert_with(|| value.to_string());
            }
        }

        let limit = self.config.max_response_bytes;
        if response.content_length().is_some_and(|len| len as usize > limit) {
            return Err(ValidatorError::PayloadError {
                message: format!("response from {} exceeds {} bytes", url, limit),
            });
        }

        // chunked 回應沒有 Content-Length，邊讀邊檢查上限
        let mut bytes: Vec<u8> = Vec::new();
        while let Some(chunk) = response.chunk().await? {
            if bytes.len() + chunk.len() > limit {
                return Err(ValidatorError::PayloadError {
                    message: format!("response from {} exceeds {} bytes", url, limit),
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        tracing::debug!(status, url, bytes = bytes.len(), "received OData response");

        Ok(HttpResponse {
            url: final_url,
            status,
            headers: response_headers,
            body: String::from_utf8_lossy(&bytes).into_owned(),
        })
    }

    pub async fn get(&self, url: &str) -> Result<HttpResponse> {
        self.send(Method::GET, url, &[], None).await
    }

    pub async fn get_with_accept(&self, url: &str, accept: &str) -> Result<HttpResponse> {
        let headers = [("Accept".to_string(), accept.to_string())];
        self.send(Method::GET, url, &headers, None).await
    }

    pub async fn get_json(&self, url: &str) -> Result<HttpResponse> {
        self.get_with_accept(url, "application/json").await
    }

    pub async fn post_json(&self, url: &str, body: &serde_json::Value) -> Result<HttpResponse> {
        let headers = [
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ];
        self.send(Method::POST, url, &headers, Some(body.to_string()))
            .await
    }

    pub async fn delete(&self, url: &str) -> Result<HttpResponse> {
        self.send(Method::DELETE, url, &[], None).await
    }
}
