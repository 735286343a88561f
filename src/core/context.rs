use crate::core::http::{accept_header, HttpClient, HttpResponse};
use crate::core::metadata::MetadataDocument;
use crate::core::payload::{context_url, detect_format, detect_payload_type, detect_version};
use crate::core::xml::XmlElement;
use crate::domain::model::{
    ODataVersion, PayloadFormat, PayloadType, RequestedFormat, ValidationRequest,
};
use crate::utils::error::{Result, ValidatorError};
use serde_json::Value;
use url::Url;

/// 規則執行時所需的全部資料：目標回應、服務文件與 metadata
#[derive(Debug, Clone)]
pub struct ServiceContext {
    pub destination: Url,
    pub requested_format: RequestedFormat,
    pub request_headers: Vec<(String, String)>,
    pub response: HttpResponse,
    pub format: PayloadFormat,
    pub payload_type: PayloadType,
    pub version: ODataVersion,
    pub json: Option<Value>,
    pub xml: Option<XmlElement>,
    pub service_root: Url,
    pub service_document: Option<HttpResponse>,
    pub metadata: Option<MetadataDocument>,
    pub metadata_raw: Option<String>,
}

impl ServiceContext {
    pub async fn build(http: &HttpClient, request: &ValidationRequest) -> Result<Self> {
        let destination = Url::parse(&request.uri)?;
        let request_headers: Vec<(String, String)> = request
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        let mut headers = vec![(
            "Accept".to_string(),
            accept_header(request.format).to_string(),
        )];
        headers.extend(request_headers.iter().cloned());

        tracing::info!("🔍 Fetching validation target: {}", destination);
        let response = http
            .send(reqwest::Method::GET, destination.as_str(), &headers, None)
            .await?;

        let mut context = Self::from_parts(destination, request.format, response)?;
        context.request_headers = request_headers;

        if context.payload_type == PayloadType::ServiceDocument {
            context.service_document = Some(context.response.clone());
        } else {
            let root = context.service_root.to_string();
            let mut headers = vec![(
                "Accept".to_string(),
                accept_header(context.requested_format).to_string(),
            )];
            headers.extend(context.request_headers.iter().cloned());
            match http.send(reqwest::Method::GET, &root, &headers, None).await {
                Ok(doc) if doc.is_success() => context.service_document = Some(doc),
                Ok(doc) => tracing::warn!(
                    "⚠️ Service document {} returned status {}",
                    root,
                    doc.status
                ),
                Err(e) => tracing::warn!("⚠️ Service document unavailable: {}", e),
            }
        }

        if context.payload_type == PayloadType::Metadata {
            let raw = context.response.body.clone();
            context.attach_metadata(raw);
        } else {
            let metadata_url = context.metadata_url()?;
            let accept = [("Accept".to_string(), "application/xml".to_string())];
            let mut metadata_headers = context.request_headers.clone();
            metadata_headers.extend(accept);

            match http
                .send(reqwest::Method::GET, metadata_url.as_str(), &metadata_headers, None)
                .await
            {
                Ok(doc) if doc.is_success() => context.attach_metadata(doc.body),
                Ok(doc) => tracing::warn!(
                    "⚠️ Metadata document {} returned status {}",
                    metadata_url,
                    doc.status
                ),
                Err(e) => tracing::warn!("⚠️ Metadata document unavailable: {}", e),
            }
        }

        tracing::debug!(
            payload_type = ?context.payload_type,
            format = ?context.format,
            version = %context.version,
            service_root = %context.service_root,
            has_metadata = context.metadata.is_some(),
            "service context ready"
        );

        Ok(context)
    }

    /// 不經 HTTP，直接由已取得的回應建立上下文
    pub fn from_parts(
        destination: Url,
        requested_format: RequestedFormat,
        response: HttpResponse,
    ) -> Result<Self> {
        let format = detect_format(response.content_type(), &response.body);

        let json = match format {
            PayloadFormat::Json => match serde_json::from_str::<Value>(&response.body) {
                Ok(json) => Some(json),
                Err(e) if response.is_success() => {
                    return Err(ValidatorError::PayloadError {
                        message: format!("response declared as JSON is not valid JSON: {}", e),
                    })
                }
                Err(_) => None,
            },
            _ => None,
        };

        let xml = if format.is_xml_family() {
            match XmlElement::parse(&response.body) {
                Ok(root) => Some(root),
                Err(e) if response.is_success() => return Err(e),
                Err(_) => None,
            }
        } else {
            None
        };

        let payload_type = detect_payload_type(
            destination.path(),
            response.status,
            format,
            json.as_ref(),
            xml.as_ref(),
        );
        let version = detect_version(&response, json.as_ref(), xml.as_ref());
        let service_root = derive_service_root(&destination, payload_type, json.as_ref(), xml.as_ref());

        Ok(Self {
            destination,
            requested_format,
            request_headers: Vec::new(),
            response,
            format,
            payload_type,
            version,
            json,
            xml,
            service_root,
            service_document: None,
            metadata: None,
            metadata_raw: None,
        })
    }

    pub fn attach_metadata(&mut self, raw: String) {
        match MetadataDocument::parse(&raw) {
            Ok(doc) => self.metadata = Some(doc),
            Err(e) => tracing::warn!("⚠️ Metadata document could not be parsed: {}", e),
        }
        self.metadata_raw = Some(raw);
    }

    pub fn metadata_url(&self) -> Result<Url> {
        Ok(self.service_root.join("$metadata")?)
    }

    pub fn resolve(&self, relative: &str) -> Result<Url> {
        Ok(self.service_root.join(relative)?)
    }

    pub fn context_url(&self) -> Option<&str> {
        self.json.as_ref().and_then(context_url)
    }

    /// Entity set named by the context URL, e.g. `...$metadata#Products/$entity` → `Products`.
    pub fn entity_set_from_context(&self) -> Option<String> {
        let context = self.context_url()?;
        let (_, fragment) = context.split_once('#')?;
        let set = fragment
            .split(['/', '(', '\''])
            .next()
            .filter(|s| !s.is_empty() && !s.starts_with('$'))?;
        Some(set.to_string())
    }

    /// 服務文件中列出的 entity set 名稱與 URL
    pub fn service_document_sets(&self) -> Vec<(String, String)> {
        let doc = match &self.service_document {
            Some(doc) => doc,
            None if self.payload_type == PayloadType::ServiceDocument => &self.response,
            None => return Vec::new(),
        };

        if let Ok(json) = doc.json() {
            return json
                .get("value")
                .and_then(Value::as_array)
                .map(|items| {
                    items
                        .iter()
                        .filter(|item| {
                            item.get("kind")
                                .and_then(Value::as_str)
                                .map_or(true, |k| k == "EntitySet")
                        })
                        .filter_map(|item| {
                            Some((
                                item.get("name")?.as_str()?.to_string(),
                                item.get("url")?.as_str()?.to_string(),
                            ))
                        })
                        .collect()
                })
                .unwrap_or_default();
        }

        XmlElement::parse(&doc.body)
            .map(|root| {
                root.descendants_named("collection")
                    .into_iter()
                    .filter_map(|c| {
                        let href = c.attr("href")?.to_string();
                        let name = c
                            .child("title")
                            .map(|t| t.text.clone())
                            .unwrap_or_else(|| href.clone());
                        Some((name, href))
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// 推導服務根目錄，結果一律以 `/` 結尾
pub fn derive_service_root(
    destination: &Url,
    payload_type: PayloadType,
    json: Option<&Value>,
    xml: Option<&XmlElement>,
) -> Url {
    let candidate = if payload_type == PayloadType::ServiceDocument {
        let mut root = destination.clone();
        root.set_query(None);
        root.set_fragment(None);
        Some(root)
    } else {
        None
    };

    let candidate = candidate
        .or_else(|| {
            let context = json.and_then(context_url)?;
            let (prefix, _) = context.split_once("$metadata")?;
            if prefix.is_empty() {
                return None;
            }
            destination.join(prefix).ok()
        })
        .or_else(|| {
            let base = xml.and_then(|root| root.attr("xml:base"))?;
            destination.join(base).ok()
        })
        .unwrap_or_else(|| fallback_root(destination));

    ensure_trailing_slash(candidate)
}

fn fallback_root(destination: &Url) -> Url {
    let mut root = destination.clone();
    root.set_query(None);
    root.set_fragment(None);

    let path = root.path().to_string();
    if let Some(idx) = path.find(".svc/") {
        root.set_path(&path[..idx + 5]);
        return root;
    }
    if path.ends_with(".svc") {
        return root;
    }

    let trimmed = path.trim_end_matches('/');
    let parent = match trimmed.rfind('/') {
        Some(idx) => &trimmed[..=idx],
        None => "/",
    };
    root.set_path(parent);
    root
}

fn ensure_trailing_slash(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}
