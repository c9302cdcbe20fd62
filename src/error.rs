use std::fmt;

use thiserror::Error;

/// 错误发生处的源位置，缺失时各字段为默认值。
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceLocation {
    pub file: String,
    pub line: usize,
    pub column: usize,
}

impl SourceLocation {
    pub fn new<S: Into<String>>(file: S, line: usize, column: usize) -> Self {
        Self {
            file: file.into(),
            line,
            column,
        }
    }

    pub fn unknown() -> Self {
        Self::default()
    }
}

impl fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.file.is_empty() && self.line == 0 {
            write!(f, "位置未知")
        } else if self.file.is_empty() {
            write!(f, "{}:{}", self.line, self.column)
        } else {
            write!(f, "{}:{}:{}", self.file, self.line, self.column)
        }
    }
}

/// 编译过程中统一的错误类型。
#[derive(Debug, Error)]
pub enum LessError {
    #[error("解析失败: {message} ({location})")]
    Parse {
        message: String,
        location: SourceLocation,
    },
    #[error("数值非法: {message} ({location})")]
    Value {
        message: String,
        location: SourceLocation,
    },
    #[error("类型不匹配: {0}")]
    Type(String),
    #[error("算术错误: {0}")]
    Arithmetic(String),
    #[error("未定义的变量 {name} ({location})")]
    VariableNotFound {
        name: String,
        location: SourceLocation,
    },
    #[error("未找到匹配的 mixin {name} ({location})")]
    MixinNotFound {
        name: String,
        location: SourceLocation,
    },
    #[error("函数 {call} 参数不匹配，期望 {expected}")]
    FunctionArity { call: String, expected: String },
    #[error("mixin 调用深度超过 {limit}")]
    RecursionLimit { limit: usize },
    #[error("导入失败: {0}")]
    Import(String),
}

pub type LessResult<T> = Result<T, LessError>;

impl LessError {
    pub fn parse<S: Into<String>>(message: S, location: SourceLocation) -> Self {
        LessError::Parse {
            message: message.into(),
            location,
        }
    }

    /// 解析时常见的"期待 X 却得到 Y"形式。
    pub fn expected<S: fmt::Display, G: fmt::Display>(
        expected: S,
        got: G,
        location: SourceLocation,
    ) -> Self {
        LessError::Parse {
            message: format!("期待 {expected}, 却得到 {got}"),
            location,
        }
    }

    pub fn value<S: Into<String>>(message: S, location: SourceLocation) -> Self {
        LessError::Value {
            message: message.into(),
            location,
        }
    }

    pub fn type_mismatch<S: Into<String>>(message: S) -> Self {
        LessError::Type(message.into())
    }

    pub fn arithmetic<S: Into<String>>(message: S) -> Self {
        LessError::Arithmetic(message.into())
    }

    pub fn import<S: Into<String>>(message: S) -> Self {
        LessError::Import(message.into())
    }
}
