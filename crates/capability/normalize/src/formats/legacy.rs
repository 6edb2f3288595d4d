use super::{FormatParser, PartialReading, non_empty, split_value_unit};
use crate::error::ParseError;
use domain::SourceFormat;

/// `WAVY_ID:WAVY_001|TIPO:temperatura|CARAC:21.50 C|HORA:14:02:33`
///
/// 兜底格式：至少识别到一个已知键才算匹配。
#[derive(Debug, Default, Clone, Copy)]
pub struct LegacyPipeParser;

impl FormatParser for LegacyPipeParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::LegacyPipe
    }

    fn parse(&self, text: &str) -> Option<Result<PartialReading, ParseError>> {
        let mut partial = PartialReading::default();
        let mut recognized = false;
        for part in text.split('|') {
            let Some((key, value)) = part.split_once(':') else {
                continue;
            };
            match key.trim().to_ascii_uppercase().as_str() {
                "WAVY" | "WAVY_ID" | "WAVYID" => partial.device_id = non_empty(value),
                "TIPO" => partial.sensor_type = non_empty(value),
                "CARAC" | "VALOR" => {
                    let (value, unit) = split_value_unit(value);
                    partial.value = value;
                    if partial.unit.is_none() {
                        partial.unit = unit;
                    }
                }
                "UNIDADE" => partial.unit = non_empty(value),
                "HORA" | "DATA" => {
                    if partial.timestamp.is_none() {
                        partial.timestamp = non_empty(value);
                    }
                }
                _ => continue,
            }
            recognized = true;
        }
        recognized.then_some(Ok(partial))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_on_first_colon_only() {
        let partial = LegacyPipeParser
            .parse("WAVY_ID:WAVY_002|TIPO:pressao|CARAC:1013 hPa|HORA:14:02:33")
            .expect("claimed")
            .expect("legacy");
        assert_eq!(partial.device_id.as_deref(), Some("WAVY_002"));
        assert_eq!(partial.value.as_deref(), Some("1013"));
        assert_eq!(partial.unit.as_deref(), Some("hPa"));
        assert_eq!(partial.timestamp.as_deref(), Some("14:02:33"));
    }

    #[test]
    fn unknown_keys_do_not_match() {
        assert!(LegacyPipeParser.parse("FOO:1|BAR:2").is_none());
        assert!(LegacyPipeParser.parse("not a known format").is_none());
    }
}
