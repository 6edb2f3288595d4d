use super::{FormatParser, PartialReading, non_empty, split_value_unit};
use crate::error::ParseError;
use domain::SourceFormat;

const DEVICE_MARKER: &str = "WAVY ID:";
const TYPE_MARKER: &str = "Tipo:";
const VALUE_MARKER: &str = "Valor:";
const TIME_MARKERS: [&str; 2] = ["Hora:", "Data:"];

/// `WAVY ID: WAVY_001 | Tipo: temperatura | Valor: 21.50 C | Hora: 14:02:33`
#[derive(Debug, Default, Clone, Copy)]
pub struct DelimitedTextParser;

impl FormatParser for DelimitedTextParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::DelimitedText
    }

    fn parse(&self, text: &str) -> Option<Result<PartialReading, ParseError>> {
        let has_time = TIME_MARKERS.iter().any(|marker| text.contains(*marker));
        if !(text.contains(DEVICE_MARKER)
            && text.contains(TYPE_MARKER)
            && text.contains(VALUE_MARKER)
            && has_time)
        {
            return None;
        }
        let (value, unit) = field_after(text, VALUE_MARKER)
            .map(split_value_unit)
            .unwrap_or_default();
        Some(Ok(PartialReading {
            device_id: field_after(text, DEVICE_MARKER).and_then(non_empty),
            sensor_type: field_after(text, TYPE_MARKER).and_then(non_empty),
            value,
            unit,
            timestamp: TIME_MARKERS
                .iter()
                .find_map(|marker| field_after(text, marker).and_then(non_empty)),
        }))
    }
}

/// 取标记之后到下一个 `|`（或结尾）之间的内容。
fn field_after<'a>(text: &'a str, marker: &str) -> Option<&'a str> {
    let start = text.find(marker)? + marker.len();
    let rest = &text[start..];
    let end = rest.find('|').unwrap_or(rest.len());
    Some(rest[..end].trim())
}
