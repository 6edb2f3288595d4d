use super::{FormatParser, PartialReading};
use crate::error::ParseError;
use domain::SourceFormat;
use roxmltree::Document;

/// `<leitura><wavyId>..</wavyId><tipo>..</tipo><valor>..</valor>...</leitura>`
#[derive(Debug, Default, Clone, Copy)]
pub struct XmlParser;

impl FormatParser for XmlParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::Xml
    }

    fn parse(&self, text: &str) -> Option<Result<PartialReading, ParseError>> {
        if !(text.starts_with('<') && text.ends_with('>')) {
            return None;
        }
        let doc = match Document::parse(text) {
            Ok(doc) => doc,
            Err(err) => return Some(Err(ParseError::unrecognized(format!("malformed xml: {err}")))),
        };
        let element_text = |name: &str| {
            doc.descendants()
                .find(|node| node.is_element() && node.tag_name().name() == name)
                .and_then(|node| node.text())
                .and_then(super::non_empty)
        };
        Some(Ok(PartialReading {
            device_id: element_text("wavyId"),
            sensor_type: element_text("tipo"),
            value: element_text("valor"),
            unit: element_text("unidade"),
            timestamp: element_text("hora").or_else(|| element_text("data")),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_elements_by_name() {
        let partial = XmlParser
            .parse("<leitura><wavyId>WAVY_003</wavyId><tipo>pressao</tipo><valor> 1013 </valor><unidade>hPa</unidade><data>18/10/2026</data></leitura>")
            .expect("claimed")
            .expect("xml");
        assert_eq!(partial.device_id.as_deref(), Some("WAVY_003"));
        assert_eq!(partial.value.as_deref(), Some("1013"));
        assert_eq!(partial.timestamp.as_deref(), Some("18/10/2026"));
    }

    #[test]
    fn malformed_xml_is_claimed_as_error() {
        assert!(matches!(XmlParser.parse("<a><b></a>"), Some(Err(_))));
        assert!(XmlParser.parse("a,b,c,d,<e>").is_none());
    }
}
