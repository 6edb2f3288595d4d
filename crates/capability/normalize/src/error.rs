use std::fmt;

/// 解析错误分类。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseErrorKind {
    /// 没有任何格式规则匹配。
    UnrecognizedFormat,
    /// 规则匹配，但缺少必填字段。
    MissingField,
    /// 存储边界处数值解析失败。
    InvalidNumeric,
}

impl ParseErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnrecognizedFormat => "unrecognized_format",
            Self::MissingField => "missing_field",
            Self::InvalidNumeric => "invalid_numeric",
        }
    }
}

impl fmt::Display for ParseErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 规范化错误（单条报文终止，不影响 worker）。
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{kind}: {detail}")]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub detail: String,
}

impl ParseError {
    pub fn unrecognized(detail: impl Into<String>) -> Self {
        Self {
            kind: ParseErrorKind::UnrecognizedFormat,
            detail: detail.into(),
        }
    }

    pub fn missing_field(field: &str) -> Self {
        Self {
            kind: ParseErrorKind::MissingField,
            detail: field.to_string(),
        }
    }

    pub fn invalid_numeric(value: &str) -> Self {
        Self {
            kind: ParseErrorKind::InvalidNumeric,
            detail: value.to_string(),
        }
    }
}
