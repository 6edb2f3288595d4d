//! 报文格式解析器
//!
//! 按固定优先级依次尝试，第一个认领报文的解析器决定结果：
//!
//! ```text
//! JSON → XML → CSV → 分隔文本（"WAVY ID:" 标记）→ 旧版管道（KEY:value|...）
//! ```
//!
//! 认领看外形：`{…}` 归 JSON，`<…>` 归 XML。外形匹配但内容解析失败时
//! 直接报 `UnrecognizedFormat`，不再交给后面的规则。
//!
//! 每个解析器只读取原始文本，互不共享中间状态。

mod csv;
mod delimited;
mod json;
mod legacy;
mod xml;

pub use self::csv::CsvParser;
pub use self::delimited::DelimitedTextParser;
pub use self::json::JsonParser;
pub use self::legacy::LegacyPipeParser;
pub use self::xml::XmlParser;

use crate::error::ParseError;
use domain::SourceFormat;
use std::sync::Arc;

/// 解析器产出的字段集合，必填校验在之后统一进行。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PartialReading {
    pub device_id: Option<String>,
    pub sensor_type: Option<String>,
    pub value: Option<String>,
    pub unit: Option<String>,
    pub timestamp: Option<String>,
}

/// 单一格式解析器。
pub trait FormatParser: Send + Sync {
    fn format(&self) -> SourceFormat;

    /// 不属于本格式时返回 `None`；认领后解析失败返回 `Some(Err(..))`。
    fn parse(&self, text: &str) -> Option<Result<PartialReading, ParseError>>;
}

/// 有序解析器链。
#[derive(Clone)]
pub struct FormatChain {
    parsers: Vec<Arc<dyn FormatParser>>,
}

impl FormatChain {
    /// 标准顺序：JSON、XML、CSV、分隔文本、旧版管道。
    pub fn standard() -> Self {
        Self {
            parsers: vec![
                Arc::new(JsonParser),
                Arc::new(XmlParser),
                Arc::new(CsvParser),
                Arc::new(DelimitedTextParser),
                Arc::new(LegacyPipeParser),
            ],
        }
    }

    pub fn formats(&self) -> Vec<SourceFormat> {
        self.parsers.iter().map(|parser| parser.format()).collect()
    }

    /// 没有解析器认领时返回 `None`。
    pub fn detect(&self, text: &str) -> Option<Result<(SourceFormat, PartialReading), ParseError>> {
        self.parsers.iter().find_map(|parser| {
            parser
                .parse(text)
                .map(|parsed| parsed.map(|partial| (parser.format(), partial)))
        })
    }
}

impl Default for FormatChain {
    fn default() -> Self {
        Self::standard()
    }
}

/// 去空白，空串视为缺失。
pub(crate) fn non_empty(text: &str) -> Option<String> {
    let text = text.trim();
    if text.is_empty() {
        None
    } else {
        Some(text.to_string())
    }
}

/// `"21.50 ºC"` → (`21.50`, `ºC`)。
pub(crate) fn split_value_unit(text: &str) -> (Option<String>, Option<String>) {
    let mut tokens = text.split_whitespace();
    let value = tokens.next().map(str::to_string);
    let unit = tokens.next().map(str::to_string);
    (value, unit)
}
