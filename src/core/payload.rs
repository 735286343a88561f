use crate::core::http::HttpResponse;
use crate::core::xml::XmlElement;
use crate::domain::model::{ODataVersion, PayloadFormat, PayloadType};
use serde_json::Value;

pub fn detect_format(content_type: Option<&str>, body: &str) -> PayloadFormat {
    if let Some(content_type) = content_type {
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();

        match media_type.as_str() {
            "application/json" => return PayloadFormat::Json,
            "application/atom+xml" | "application/atomsvc+xml" => return PayloadFormat::Atom,
            "application/xml" | "text/xml" => return PayloadFormat::Xml,
            _ => {}
        }
    }

    // 沒有 Content-Type 時從內容判斷
    match body.trim_start().chars().next() {
        Some('{') | Some('[') => PayloadFormat::Json,
        Some('<') => PayloadFormat::Xml,
        _ => PayloadFormat::Other,
    }
}

pub fn annotation(version: ODataVersion, term: &str) -> String {
    match version {
        ODataVersion::V4 => format!("@odata.{}", term),
        ODataVersion::V3 => format!("odata.{}", term),
    }
}

/// `@odata.context` (V4) or `odata.metadata` (V3).
pub fn context_url(json: &Value) -> Option<&str> {
    json.get("@odata.context")
        .or_else(|| json.get("odata.metadata"))
        .and_then(Value::as_str)
}

pub fn is_annotation(key: &str) -> bool {
    key.starts_with('@') || key.starts_with("odata.") || key.contains('@')
}

pub fn detect_version(response: &HttpResponse, json: Option<&Value>, xml: Option<&XmlElement>) -> ODataVersion {
    if let Some(version) = response.header("odata-version") {
        if version.trim().starts_with('4') {
            return ODataVersion::V4;
        }
    }
    if response.header("dataserviceversion").is_some() {
        return ODataVersion::V3;
    }

    if let Some(json) = json {
        if json.get("@odata.context").is_some() {
            return ODataVersion::V4;
        }
        if json.get("odata.metadata").is_some() {
            return ODataVersion::V3;
        }
    }

    if let Some(root) = xml {
        if root.local_name == "Edmx" {
            return match root.attr("Version") {
                Some(v) if v.starts_with('4') => ODataVersion::V4,
                _ => ODataVersion::V3,
            };
        }
        if root
            .namespace
            .as_deref()
            .is_some_and(|ns| ns.contains("docs.oasis-open.org/odata"))
        {
            return ODataVersion::V4;
        }
    }

    ODataVersion::V4
}

pub fn detect_payload_type(
    uri_path: &str,
    status: u16,
    format: PayloadFormat,
    json: Option<&Value>,
    xml: Option<&XmlElement>,
) -> PayloadType {
    let path = uri_path.trim_end_matches('/');
    if path.ends_with("$metadata") {
        return PayloadType::Metadata;
    }
    if path.ends_with("/$value") || path.ends_with("/$count") {
        return PayloadType::RawValue;
    }

    let detected = match (format, json, xml) {
        (PayloadFormat::Json, Some(json), _) => classify_json(json),
        (PayloadFormat::Atom | PayloadFormat::Xml, _, Some(root)) => classify_xml(root),
        _ => PayloadType::Other,
    };

    // 只有無法辨識的非 2xx 內容才視為錯誤回應
    if detected == PayloadType::Other && !(200..300).contains(&status) {
        return PayloadType::Error;
    }
    detected
}

fn classify_json(json: &Value) -> PayloadType {
    let Some(object) = json.as_object() else {
        return PayloadType::Other;
    };

    if object.contains_key("error") || object.contains_key("odata.error") {
        return PayloadType::Error;
    }

    let context = context_url(json);
    if context.is_some_and(|c| c.contains("$ref")) {
        return PayloadType::EntityReference;
    }

    if let Some(value) = object.get("value") {
        if let Some(items) = value.as_array() {
            let context_is_root = context.map_or(true, |c| c.ends_with("$metadata"));
            let looks_like_service_document = !items.is_empty()
                && items.iter().all(|item| {
                    item.get("name").is_some_and(Value::is_string)
                        && item.get("url").is_some_and(Value::is_string)
                });
            if context_is_root && looks_like_service_document {
                return PayloadType::ServiceDocument;
            }
            return PayloadType::Feed;
        }
        return PayloadType::Property;
    }

    if context.is_some_and(|c| c.contains("$entity")) {
        return PayloadType::Entry;
    }

    let has_data_members = object.keys().any(|k| !is_annotation(k));
    if !has_data_members && object.contains_key("@odata.id") {
        return PayloadType::EntityReference;
    }
    // V3 $links 單筆回應只有 url
    if object.len() == 1 && object.get("url").is_some_and(Value::is_string) {
        return PayloadType::EntityReference;
    }

    PayloadType::Entry
}

fn classify_xml(root: &XmlElement) -> PayloadType {
    match root.local_name.as_str() {
        "service" => PayloadType::ServiceDocument,
        "Edmx" => PayloadType::Metadata,
        "feed" => PayloadType::Feed,
        "entry" => PayloadType::Entry,
        "error" => PayloadType::Error,
        "ref" | "links" | "uri" => PayloadType::EntityReference,
        _ => PayloadType::Property,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_detect_format_from_content_type_and_body() {
        assert_eq!(
            detect_format(Some("application/json;odata.metadata=minimal"), ""),
            PayloadFormat::Json
        );
        assert_eq!(
            detect_format(Some("application/atom+xml;type=feed"), ""),
            PayloadFormat::Atom
        );
        assert_eq!(detect_format(Some("text/xml"), ""), PayloadFormat::Xml);
        assert_eq!(detect_format(None, "  {\"value\": []}"), PayloadFormat::Json);
        assert_eq!(detect_format(None, "<feed/>"), PayloadFormat::Xml);
        assert_eq!(detect_format(Some("text/plain"), "42"), PayloadFormat::Other);
    }

    #[test]
    fn test_classify_json_payloads() {
        let service_doc = json!({
            "@odata.context": "http://host/svc/$metadata",
            "value": [{"name": "Products", "kind": "EntitySet", "url": "Products"}]
        });
        let feed = json!({
            "@odata.context": "http://host/svc/$metadata#Products",
            "value": [{"ID": 1}]
        });
        let entry = json!({
            "@odata.context": "http://host/svc/$metadata#Products/$entity",
            "ID": 1
        });
        let reference = json!({
            "@odata.context": "http://host/svc/$metadata#$ref",
            "@odata.id": "http://host/svc/Products(1)"
        });
        let error = json!({"error": {"code": "400", "message": "bad"}});
        let property = json!({
            "@odata.context": "http://host/svc/$metadata#Products(1)/Name",
            "value": "Bread"
        });

        let classify = |v: &Value| detect_payload_type("/svc/x", 200, PayloadFormat::Json, Some(v), None);
        assert_eq!(classify(&service_doc), PayloadType::ServiceDocument);
        assert_eq!(classify(&feed), PayloadType::Feed);
        assert_eq!(classify(&entry), PayloadType::Entry);
        assert_eq!(classify(&reference), PayloadType::EntityReference);
        assert_eq!(classify(&error), PayloadType::Error);
        assert_eq!(classify(&property), PayloadType::Property);
    }

    #[test]
    fn test_path_and_status_take_precedence() {
        assert_eq!(
            detect_payload_type("/svc/$metadata", 200, PayloadFormat::Xml, None, None),
            PayloadType::Metadata
        );
        assert_eq!(
            detect_payload_type("/svc/Products(1)/Name/$value", 200, PayloadFormat::Other, None, None),
            PayloadType::RawValue
        );
        assert_eq!(
            detect_payload_type("/svc/Nope", 404, PayloadFormat::Other, None, None),
            PayloadType::Error
        );

        // 可辨識的內容保留原本的類型
        let feed = json!({"@odata.context": "http://host/svc/$metadata#Products", "value": []});
        assert_eq!(
            detect_payload_type("/svc/Products", 500, PayloadFormat::Json, Some(&feed), None),
            PayloadType::Feed
        );
        let atom = XmlElement::parse(r#"<feed xmlns="http://www.w3.org/2005/Atom"/>"#).unwrap();
        assert_eq!(
            detect_payload_type("/svc/Products", 503, PayloadFormat::Atom, None, Some(&atom)),
            PayloadType::Feed
        );
    }

    #[test]
    fn test_classify_xml_roots() {
        let feed = XmlElement::parse(r#"<feed xmlns="http://www.w3.org/2005/Atom"/>"#).unwrap();
        let service = XmlElement::parse(r#"<service xmlns="http://www.w3.org/2007/app"/>"#).unwrap();
        assert_eq!(
            detect_payload_type("/svc/Products", 200, PayloadFormat::Atom, None, Some(&feed)),
            PayloadType::Feed
        );
        assert_eq!(
            detect_payload_type("/svc/", 200, PayloadFormat::Xml, None, Some(&service)),
            PayloadType::ServiceDocument
        );
    }

    #[test]
    fn test_annotation_names_per_version() {
        assert_eq!(annotation(ODataVersion::V4, "count"), "@odata.count");
        assert_eq!(annotation(ODataVersion::V3, "count"), "odata.count");
        assert!(is_annotation("Name@odata.type"));
        assert!(!is_annotation("Name"));
    }
}
