use crate::core::context::ServiceContext;
use crate::core::http::HttpClient;
use crate::core::payload::detect_format;
use crate::domain::model::{
    ODataVersion, PayloadFormat, PayloadType, RequestedFormat, RequirementLevel, RuleCategory,
};
use crate::rules::{Rule, RuleInfo, Verdict, ALL_PAYLOAD_TYPES};
use crate::utils::error::Result;
use async_trait::async_trait;
use std::sync::Arc;

pub fn rules() -> Vec<Arc<dyn Rule>> {
    vec![
        Arc::new(VersionHeaderPresent),
        Arc::new(ContentTypeMatchesPayload),
        Arc::new(JsonMetadataParameter),
        Arc::new(RequestedFormatHonored),
    ]
}

pub struct VersionHeaderPresent;

#[async_trait]
impl Rule for VersionHeaderPresent {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Common.Core.2001",
            description: "Responses carry the OData version header (OData-Version for 4.0, DataServiceVersion for 3.0).",
            spec_section: "OData Protocol 8.1.5",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: ALL_PAYLOAD_TYPES,
            formats: &[],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let verdict = match ctx.version {
            ODataVersion::V4 => match ctx.response.header("odata-version") {
                Some(v) if v.trim().starts_with("4.0") || v.trim().starts_with("4.01") => {
                    Verdict::pass()
                }
                Some(v) => Verdict::fail(format!("OData-Version header has unexpected value '{}'", v)),
                None => Verdict::fail("OData-Version header is missing"),
            },
            ODataVersion::V3 => match ctx.response.header("dataserviceversion") {
                Some(_) => Verdict::pass(),
                None => Verdict::fail("DataServiceVersion header is missing"),
            },
        };
        Ok(verdict)
    }
}

pub struct ContentTypeMatchesPayload;

#[async_trait]
impl Rule for ContentTypeMatchesPayload {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Common.Core.2002",
            description: "The Content-Type header declares the media type of the returned payload.",
            spec_section: "OData Protocol 8.2.1",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[],
            payload_types: &[
                PayloadType::ServiceDocument,
                PayloadType::Metadata,
                PayloadType::Feed,
                PayloadType::Entry,
                PayloadType::Property,
                PayloadType::EntityReference,
                PayloadType::Error,
            ],
            formats: &[],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let Some(content_type) = ctx.response.content_type() else {
            return Ok(Verdict::fail("Content-Type header is missing"));
        };

        let declared = detect_format(Some(content_type), "");
        let matches = match (declared, ctx.format) {
            (a, b) if a == b => true,
            // Atom 與一般 XML 內容可互相宣告
            (PayloadFormat::Xml, PayloadFormat::Atom) | (PayloadFormat::Atom, PayloadFormat::Xml) => true,
            _ => false,
        };

        if matches {
            Ok(Verdict::pass())
        } else {
            Ok(Verdict::fail(format!(
                "Content-Type '{}' does not describe a {:?} payload",
                content_type, ctx.format
            )))
        }
    }
}

pub struct JsonMetadataParameter;

#[async_trait]
impl Rule for JsonMetadataParameter {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Common.Core.2003",
            description: "The odata.metadata media type parameter, when present, is minimal, full or none.",
            spec_section: "OData JSON Format 3",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Must,
            versions: &[ODataVersion::V4],
            payload_types: &[
                PayloadType::ServiceDocument,
                PayloadType::Feed,
                PayloadType::Entry,
                PayloadType::Property,
                PayloadType::EntityReference,
            ],
            formats: &[PayloadFormat::Json],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        match ctx.response.media_type_parameter("odata.metadata") {
            None => Ok(Verdict::pass()),
            Some(value) => match value.to_ascii_lowercase().as_str() {
                "minimal" | "full" | "none" => Ok(Verdict::pass()),
                _ => Ok(Verdict::fail(format!(
                    "odata.metadata parameter has invalid value '{}'",
                    value
                ))),
            },
        }
    }
}

pub struct RequestedFormatHonored;

#[async_trait]
impl Rule for RequestedFormatHonored {
    fn info(&self) -> &'static RuleInfo {
        static INFO: RuleInfo = RuleInfo {
            name: "Common.Core.2004",
            description: "A service that supports the requested format returns the payload in that format.",
            spec_section: "OData Protocol 8.2.1",
            category: RuleCategory::Core,
            requirement_level: RequirementLevel::Should,
            versions: &[],
            payload_types: &[
                PayloadType::ServiceDocument,
                PayloadType::Feed,
                PayloadType::Entry,
                PayloadType::Property,
                PayloadType::EntityReference,
            ],
            formats: &[],
            requires_metadata: false,
            mutating: false,
        };
        &INFO
    }

    async fn verify(&self, ctx: &ServiceContext, _http: &HttpClient) -> Result<Verdict> {
        let honored = match ctx.requested_format {
            RequestedFormat::Any => return Ok(Verdict::not_applicable("no specific format requested")),
            RequestedFormat::Json => ctx.format == PayloadFormat::Json,
            RequestedFormat::Atom | RequestedFormat::Xml => ctx.format.is_xml_family(),
        };

        if honored {
            Ok(Verdict::pass())
        } else {
            Ok(Verdict::fail(format!(
                "requested {:?} but received {:?}",
                ctx.requested_format, ctx.format
            )))
        }
    }
}
