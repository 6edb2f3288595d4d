use super::{FormatParser, PartialReading, non_empty};
use crate::error::ParseError;
use domain::SourceFormat;

/// 位置字段：`deviceId,sensorType,value,unit,time[,extra]`，第 6 列忽略。
#[derive(Debug, Default, Clone, Copy)]
pub struct CsvParser;

impl FormatParser for CsvParser {
    fn format(&self) -> SourceFormat {
        SourceFormat::Csv
    }

    fn parse(&self, text: &str) -> Option<Result<PartialReading, ParseError>> {
        let fields: Vec<&str> = text.split(',').collect();
        if !(5..=6).contains(&fields.len()) {
            return None;
        }
        Some(Ok(PartialReading {
            device_id: non_empty(fields[0]),
            sensor_type: non_empty(fields[1]),
            value: non_empty(fields[2]),
            unit: non_empty(fields[3]),
            timestamp: non_empty(fields[4]),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sixth_field_is_ignored() {
        let partial = CsvParser
            .parse("WAVY_001, temperatura ,21.50,C,14:02:33,extra")
            .expect("claimed")
            .expect("csv");
        assert_eq!(partial.sensor_type.as_deref(), Some("temperatura"));
        assert_eq!(partial.timestamp.as_deref(), Some("14:02:33"));
    }

    #[test]
    fn field_count_must_be_five_or_six() {
        assert!(CsvParser.parse("a,b,c,d").is_none());
        assert!(CsvParser.parse("a,b,c,d,e,f,g").is_none());
    }
}
