//! Response normalizer: decodes a raw provider response (JSON, or shallow
//! `<tag>value</tag>` XML) and projects it through a template's field map
//! into a [`CanonicalLocation`].
//!
//! XML is read with a single generic tag pattern, not a schema-aware parser.
//! Upstream payloads are flat key/value documents, so nested elements are not
//! supported: only innermost `<tag>value</tag>` pairs are seen, and when a tag
//! name repeats the last occurrence wins.

use crate::{errors::GeoError, template::CanonicalField, template::ProviderTemplate, CanonicalLocation};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::{collections::HashMap, net::IpAddr};
use tracing::debug;

/// Decoded upstream document, keyed by upstream field name.
pub type Decoded = HashMap<String, Value>;

static XML_TAG_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?s)<([A-Za-z_][\w.:-]*)(?:\s[^<>]*)?>(?:<!\[CDATA\[(.*?)\]\]>|([^<]*))</([A-Za-z_][\w.:-]*)\s*>",
    )
    .expect("Failed to compile XML tag regex")
});

static HTML_ENTITY_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^&(?:[A-Za-z][A-Za-z0-9]*|#[0-9]+|#[xX][0-9A-Fa-f]+);")
        .expect("Failed to compile HTML entity regex")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    Json,
    Xml,
    Unsupported,
}

/// Classify a `Content-Type` header by its subtype, ignoring parameters.
///
/// Returns the kind along with the bare subtype (used in error messages).
/// `text/plain` and `text/html` are read as JSON: several providers serve
/// JSON or a bare country code under those types.
pub fn classify_content_type(content_type: Option<&str>) -> (ContentKind, String) {
    let subtype = content_type
        .and_then(|ct| ct.split_once('/'))
        .map(|(_, rest)| rest.split(';').next().unwrap_or("").trim().to_ascii_lowercase())
        .unwrap_or_default();

    let kind = match subtype.as_str() {
        "json" | "html" | "plain" => ContentKind::Json,
        "xml" => ContentKind::Xml,
        s if s.ends_with("+json") => ContentKind::Json,
        s if s.ends_with("+xml") => ContentKind::Xml,
        _ => ContentKind::Unsupported,
    };

    (kind, subtype)
}

/// Fail with `FamilyMismatch` if the template cannot serve this address.
pub fn check_family(ip: &str, template: &ProviderTemplate, provider: &str) -> Result<IpAddr, GeoError> {
    let addr: IpAddr = ip
        .trim()
        .parse()
        .map_err(|_| GeoError::InvalidIp(ip.to_string()))?;

    if template.families().supports(&addr) {
        Ok(addr)
    } else {
        Err(GeoError::FamilyMismatch {
            ip: ip.to_string(),
            provider: provider.to_string(),
        })
    }
}

/// Decode a body according to its content type.
///
/// `Err` carries the error message for an unsupported content type.
pub fn decode(body: &str, content_type: Option<&str>, template: &ProviderTemplate) -> Result<Decoded, String> {
    match classify_content_type(content_type) {
        (ContentKind::Json, _) => Ok(decode_json(body, template)),
        (ContentKind::Xml, _) => Ok(decode_xml(body)),
        (ContentKind::Unsupported, subtype) => Err(format!("unsupported content type: {}", subtype)),
    }
}

fn decode_json(body: &str, template: &ProviderTemplate) -> Decoded {
    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => map.into_iter().collect(),
        parsed => {
            // A bare body (e.g. "US\n") is a country-only answer
            let mut decoded = Decoded::new();
            if let Some(key) = template.upstream(CanonicalField::CountryCode) {
                let raw = match parsed {
                    Ok(Value::String(s)) => s.trim().to_string(),
                    _ => body.trim().to_string(),
                };
                debug!("Response is not a JSON object, treating body as {}", key);
                decoded.insert(key.to_string(), Value::String(raw));
            }
            decoded
        }
    }
}

fn decode_xml(body: &str) -> Decoded {
    let mut decoded = Decoded::new();

    for caps in XML_TAG_RE.captures_iter(body) {
        let (Some(open), Some(close)) = (caps.get(1), caps.get(4)) else {
            continue;
        };
        if !open.as_str().eq_ignore_ascii_case(close.as_str()) {
            continue;
        }
        let value = caps
            .get(2)
            .or_else(|| caps.get(3))
            .map(|m| m.as_str())
            .unwrap_or("");
        decoded.insert(open.as_str().to_string(), Value::String(value.to_string()));
    }

    decoded
}

/// Copy every mapped, non-empty upstream value into the canonical record.
pub fn project(decoded: &Decoded, template: &ProviderTemplate) -> CanonicalLocation {
    let mut location = CanonicalLocation::default();

    for (field, upstream) in template.fields() {
        if let Some(value) = decoded.get(upstream).and_then(value_to_string) {
            location.set(field, Some(value));
        }
    }

    let country_code = location.country_code.take();
    location.country_code = country_code.as_deref().and_then(leading_country_code);

    location
}

/// Full normalization: family check, decode, projection.
pub fn normalize(
    ip: &str,
    body: &str,
    content_type: Option<&str>,
    template: &ProviderTemplate,
    provider: &str,
) -> Result<CanonicalLocation, GeoError> {
    check_family(ip, template, provider)?;

    Ok(match decode(body, content_type, template) {
        Ok(decoded) => project(&decoded, template),
        Err(message) => CanonicalLocation::error(message),
    })
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(escape_html(s)),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Two leading uppercase ASCII letters, or nothing ("-", "UNDEFINED"... count as nothing).
pub fn leading_country_code(code: &str) -> Option<String> {
    let bytes = code.as_bytes();
    if bytes.len() >= 2 && bytes[0].is_ascii_uppercase() && bytes[1].is_ascii_uppercase() {
        Some(code[..2].to_string())
    } else {
        None
    }
}

/// HTML-escape a value, leaving existing entities alone.
pub fn escape_html(input: &str) -> String {
    let mut out = String::with_capacity(input.len());

    for (idx, ch) in input.char_indices() {
        match ch {
            '&' if HTML_ENTITY_RE.is_match(&input[idx..]) => out.push('&'),
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#039;"),
            _ => out.push(ch),
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::IpFamilies;

    fn json_template() -> ProviderTemplate {
        ProviderTemplate::new(IpFamilies::Both, "http://example.com/json/{ip}")
            .field(CanonicalField::CountryCode, "countryCode")
            .field(CanonicalField::CountryName, "country")
    }

    #[test]
    fn test_json_scenario() {
        let location = normalize(
            "8.8.8.8",
            r#"{"countryCode":"US","country":"United States"}"#,
            Some("application/json"),
            &json_template(),
            "test",
        )
        .unwrap();

        assert_eq!(
            location,
            CanonicalLocation {
                country_code: Some("US".to_string()),
                country_name: Some("United States".to_string()),
                ..Default::default()
            }
        );
    }

    #[test]
    fn test_xml_scenario() {
        let template = ProviderTemplate::new(IpFamilies::Both, "http://example.com/?q={ip}")
            .field(CanonicalField::CountryCode, "countrycode");
        let location = normalize(
            "1.2.3.4",
            "<Response><countrycode>JP</countrycode></Response>",
            Some("text/xml"),
            &template,
            "test",
        )
        .unwrap();

        assert_eq!(location.country_code.as_deref(), Some("JP"));
        assert_eq!(location.country_name, None);
        assert!(!location.is_error());
    }

    #[test]
    fn test_unsupported_content_type_is_error_record() {
        let location = normalize(
            "1.2.3.4",
            "\x00\x01",
            Some("application/octet-stream"),
            &json_template(),
            "test",
        )
        .unwrap();

        assert!(location.is_error());
        assert!(location
            .error_message
            .unwrap()
            .contains("unsupported content type"));
        assert_eq!(location.country_code, None);
    }

    #[test]
    fn test_missing_content_type_is_unsupported() {
        let location = normalize("1.2.3.4", "{}", None, &json_template(), "test").unwrap();
        assert!(location.is_error());
    }

    #[test]
    fn test_family_mismatch() {
        let template = ProviderTemplate::new(IpFamilies::V4, "http://example.com/{ip}")
            .field(CanonicalField::CountryCode, "cc");
        let err = normalize("2001:db8::1", "{}", Some("application/json"), &template, "v4only")
            .unwrap_err();
        assert!(matches!(err, GeoError::FamilyMismatch { .. }));
    }

    #[test]
    fn test_content_type_classification() {
        assert_eq!(classify_content_type(Some("application/json; charset=utf-8")).0, ContentKind::Json);
        assert_eq!(classify_content_type(Some("text/plain")).0, ContentKind::Json);
        assert_eq!(classify_content_type(Some("text/html;charset=UTF-8")).0, ContentKind::Json);
        assert_eq!(classify_content_type(Some("application/xml")).0, ContentKind::Xml);
        assert_eq!(classify_content_type(Some("Text/XML")).0, ContentKind::Xml);
        assert_eq!(
            classify_content_type(Some("application/octet-stream")),
            (ContentKind::Unsupported, "octet-stream".to_string())
        );
    }

    #[test]
    fn test_plain_text_body_becomes_country_code() {
        let template = ProviderTemplate::new(IpFamilies::Both, "https://example.com/{ip}/country")
            .field(CanonicalField::CountryCode, "country")
            .field(CanonicalField::CountryName, "country");
        let location = normalize("1.2.3.4", "AU\n", Some("text/plain; charset=utf-8"), &template, "t").unwrap();

        assert_eq!(location.country_code.as_deref(), Some("AU"));
        assert_eq!(location.country_name.as_deref(), Some("AU"));
    }

    #[test]
    fn test_malformed_country_code_is_cleared() {
        for bad in ["-", "UNDEFINED", "us", "U1", "1US"] {
            let body = format!(r#"{{"countryCode":"{}","country":"Somewhere"}}"#, bad);
            let location =
                normalize("1.2.3.4", &body, Some("application/json"), &json_template(), "t").unwrap();
            // "UNDEFINED" keeps its leading two letters, like any longer code
            if bad == "UNDEFINED" {
                assert_eq!(location.country_code.as_deref(), Some("UN"));
            } else {
                assert_eq!(location.country_code, None, "code {:?} should be cleared", bad);
            }
            assert_eq!(location.country_name.as_deref(), Some("Somewhere"));
        }
    }

    #[test]
    fn test_xml_cdata_and_duplicates() {
        let template = ProviderTemplate::new(IpFamilies::Both, "http://example.com/{ip}")
            .field(CanonicalField::CountryCode, "countryCode")
            .field(CanonicalField::CityName, "cityName")
            .field(CanonicalField::RegionName, "regionName");
        let body = "<?xml version=\"1.0\"?><Response>\
            <countryCode>FR</countryCode>\
            <cityName><![CDATA[Saint-Étienne]]></cityName>\
            <regionName>first</regionName><regionName>second</regionName>\
            </Response>";
        let location = normalize("1.2.3.4", body, Some("application/xml"), &template, "t").unwrap();

        assert_eq!(location.country_code.as_deref(), Some("FR"));
        assert_eq!(location.city_name.as_deref(), Some("Saint-Étienne"));
        assert_eq!(location.region_name.as_deref(), Some("second"));
    }

    #[test]
    fn test_xml_nested_tags_only_yield_leaves() {
        let decoded = decode_xml("<result><geo><cc>DE</cc></geo></result>");
        assert_eq!(decoded.len(), 1);
        assert_eq!(decoded.get("cc"), Some(&Value::String("DE".to_string())));
    }

    #[test]
    fn test_numbers_are_stringified_and_strings_escaped() {
        let template = ProviderTemplate::new(IpFamilies::Both, "http://example.com/{ip}")
            .field(CanonicalField::CityName, "city")
            .field(CanonicalField::Latitude, "lat")
            .field(CanonicalField::Longitude, "lon");
        let body = r#"{"city":"<b>A&B</b> &amp; co","lat":35.6895,"lon":null}"#;
        let location = normalize("1.2.3.4", body, Some("application/json"), &template, "t").unwrap();

        assert_eq!(
            location.city_name.as_deref(),
            Some("&lt;b&gt;A&amp;B&lt;/b&gt; &amp; co")
        );
        assert_eq!(location.latitude.as_deref(), Some("35.6895"));
        assert_eq!(location.longitude, None);
    }

    #[test]
    fn test_output_schema_is_closed_over_field_map() {
        let body = r#"{"countryCode":"US","country":"United States","regionName":"CA",
            "city":"Mountain View","lat":"37.4","lon":"-122.1","error":"none"}"#;
        let location = normalize("1.2.3.4", body, Some("application/json"), &json_template(), "t").unwrap();

        let mapped: Vec<CanonicalField> = json_template().fields().map(|(f, _)| f).collect();
        for field in CanonicalField::ALL {
            if !mapped.contains(&field) {
                assert_eq!(location.get(field), None, "{} should not be emitted", field.as_str());
            }
        }
    }

    #[test]
    fn test_normalize_is_idempotent() {
        let body = r#"{"countryCode":"GB","country":"United Kingdom & Co"}"#;
        let first = normalize("1.2.3.4", body, Some("application/json"), &json_template(), "t").unwrap();
        let second = normalize("1.2.3.4", body, Some("application/json"), &json_template(), "t").unwrap();

        assert_eq!(
            serde_json::to_string(&first).unwrap(),
            serde_json::to_string(&second).unwrap()
        );
    }
}
