use super::{FormatParser, PartialReading};
use crate::error::ParseError;
use domain::SourceFormat;
use serde_json::value::RawValue;
use std::collections::HashMap;

/// `{"wavyId": ..., "tipo": ..., "valor": ..., "unidade": ..., "hora"|"data": ...}`
#[derive(Debug, Default, Clone, Copy)]
pub struct JsonParser;

impl FormatParser for JsonParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::Json
    }

    fn parse(&self, text: &str) -> Option<Result<PartialReading, ParseError>> {
        if !(text.starts_with('{') && text.ends_with('}')) {
            return None;
        }
        let fields: HashMap<String, Box<RawValue>> = match serde_json::from_str(text) {
            Ok(fields) => fields,
            Err(err) => return Some(Err(ParseError::unrecognized(format!("malformed json: {err}")))),
        };
        Some(Ok(PartialReading {
            device_id: field_text(&fields, "wavyId"),
            sensor_type: field_text(&fields, "tipo"),
            value: field_text(&fields, "valor"),
            unit: field_text(&fields, "unidade"),
            timestamp: field_text(&fields, "hora").or_else(|| field_text(&fields, "data")),
        }))
    }
}

/// 字符串取其内容，数字与布尔取原始文本（`21.50` 不会变成 `21.5`）。
fn field_text(fields: &HashMap<String, Box<RawValue>>, key: &str) -> Option<String> {
    let raw = fields.get(key)?.get().trim();
    let text = match raw.chars().next()? {
        '"' => serde_json::from_str::<String>(raw).ok()?,
        '{' | '[' => return None,
        _ if raw == "null" => return None,
        _ => raw.to_string(),
    };
    super::non_empty(&text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_value_keeps_raw_text() {
        let partial = JsonParser
            .parse(r#"{"wavyId":"WAVY_001","tipo":"temperatura","valor":21.50,"unidade":"C","hora":"14:02:33"}"#)
            .expect("claimed")
            .expect("json");
        assert_eq!(partial.value.as_deref(), Some("21.50"));
        assert_eq!(partial.timestamp.as_deref(), Some("14:02:33"));
    }

    #[test]
    fn data_used_when_hora_absent() {
        let partial = JsonParser
            .parse(r#"{"wavyId":"W","tipo":"t","valor":"1","data":"18/10/2026"}"#)
            .expect("claimed")
            .expect("json");
        assert_eq!(partial.timestamp.as_deref(), Some("18/10/2026"));
    }

    #[test]
    fn malformed_object_is_claimed_as_error() {
        assert!(matches!(JsonParser.parse("{not json}"), Some(Err(_))));
        assert!(JsonParser.parse("[1,2]").is_none());
    }

    #[test]
    fn nested_values_are_ignored() {
        let partial = JsonParser
            .parse(r#"{"wavyId":"W","tipo":"t","valor":{"x":1}}"#)
            .expect("claimed")
            .expect("json");
        assert!(partial.value.is_none());
    }
}
