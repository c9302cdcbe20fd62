use crate::color::{self, Rgba};
use crate::error::{LessError, LessResult};
use crate::token::{Token, TokenKind, TokenList};
use crate::utils::strip_quotes;

/// 表达式求值支持的二元运算符。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Equal,
    Less,
    Greater,
    LessEq,
    GreaterEq,
}

impl Operator {
    pub fn from_str(text: &str) -> Option<Self> {
        match text {
            "+" => Some(Operator::Add),
            "-" => Some(Operator::Subtract),
            "*" => Some(Operator::Multiply),
            "/" => Some(Operator::Divide),
            "=" => Some(Operator::Equal),
            "<" => Some(Operator::Less),
            ">" => Some(Operator::Greater),
            "=<" | "<=" => Some(Operator::LessEq),
            ">=" => Some(Operator::GreaterEq),
            _ => None,
        }
    }

    /// 优先级层级：比较 < 加减 < 乘除。
    pub fn precedence(self) -> u8 {
        match self {
            Operator::Equal
            | Operator::Less
            | Operator::Greater
            | Operator::LessEq
            | Operator::GreaterEq => 0,
            Operator::Add | Operator::Subtract => 1,
            Operator::Multiply | Operator::Divide => 2,
        }
    }

    pub fn symbol(self) -> &'static str {
        match self {
            Operator::Add => "+",
            Operator::Subtract => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Equal => "=",
            Operator::Less => "<",
            Operator::Greater => ">",
            Operator::LessEq => "=<",
            Operator::GreaterEq => ">=",
        }
    }
}

/// 带单位数值。单位保留原样文本，参与转换的集合见下方分组表。
#[derive(Debug, Clone, PartialEq)]
pub struct NumberValue {
    pub magnitude: f64,
    pub unit: Option<String>,
}

/// 字符串值；quoted 为真时输出会重新带上 quote 字符。
#[derive(Debug, Clone, PartialEq)]
pub struct StringValue {
    pub text: String,
    pub quoted: bool,
    pub quote: char,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UrlValue {
    pub raw: String,
    pub inner: String,
}

/// 颜色；origin 保留源码里的写法，未经运算时按原样回写。
#[derive(Debug, Clone, PartialEq)]
pub struct ColorValue {
    pub rgba: Rgba,
    pub origin: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(NumberValue),
    Color(ColorValue),
    Str(StringValue),
    Url(UrlValue),
    Boolean(bool),
    Unit(String),
}

/// 可参与换算的单位分组，数值为折算到组内基准单位的系数。
fn unit_group(unit: &str) -> Option<(&'static str, f64)> {
    match unit {
        "m" => Some(("length", 1000.0)),
        "cm" => Some(("length", 10.0)),
        "mm" => Some(("length", 1.0)),
        "in" => Some(("length", 25.4)),
        "pt" => Some(("length", 25.4 / 72.0)),
        "pc" => Some(("length", 25.4 / 6.0)),
        "s" => Some(("time", 1000.0)),
        "ms" => Some(("time", 1.0)),
        "rad" => Some(("angle", 180.0 / std::f64::consts::PI)),
        "deg" => Some(("angle", 1.0)),
        "grad" => Some(("angle", 0.9)),
        "turn" => Some(("angle", 360.0)),
        _ => None,
    }
}

/// 裸单位标识符集合（`unit(5, px)` 里的 `px` 会被求值为 Unit）。
pub fn is_known_unit(ident: &str) -> bool {
    matches!(
        ident,
        "em" | "ex"
            | "px"
            | "ch"
            | "in"
            | "mm"
            | "cm"
            | "pt"
            | "pc"
            | "ms"
            | "m"
            | "s"
            | "rad"
            | "deg"
            | "grad"
            | "turn"
    )
}

/// 单位换算；没有定义换算时返回 None。
pub fn convert_unit(magnitude: f64, from: &str, to: &str) -> Option<f64> {
    if from == to {
        return Some(magnitude);
    }
    let (group_from, factor_from) = unit_group(from)?;
    let (group_to, factor_to) = unit_group(to)?;
    if group_from != group_to {
        return None;
    }
    Some(magnitude * factor_from / factor_to)
}

/// 数值输出格式：最多四位小数并去掉尾零。
pub fn format_magnitude(value: f64) -> String {
    let mut value = value;
    if value.abs() < 1e-9 {
        value = 0.0;
    }
    let mut formatted = format!("{value:.4}");
    while formatted.contains('.') && formatted.ends_with('0') {
        formatted.pop();
    }
    if formatted.ends_with('.') {
        formatted.pop();
    }
    formatted
}

impl NumberValue {
    pub fn new(magnitude: f64, unit: Option<String>) -> Self {
        Self { magnitude, unit }
    }

    pub fn bare(magnitude: f64) -> Self {
        Self {
            magnitude,
            unit: None,
        }
    }

    /// 从 NUMBER / PERCENTAGE / DIMENSION token 解析。
    pub fn from_token(token: &Token) -> LessResult<Self> {
        let text = token.text.as_str();
        let split = text
            .char_indices()
            .find(|&(_, ch)| !(ch.is_ascii_digit() || ch == '.' || ch == '-' || ch == '+'))
            .map_or(text.len(), |(idx, _)| idx);
        let (number_part, unit_part) = text.split_at(split);
        let magnitude: f64 = number_part.parse().map_err(|_| {
            LessError::value(format!("无法解析数值 {text}"), token.location())
        })?;
        let unit = if unit_part.is_empty() {
            None
        } else {
            Some(unit_part.to_string())
        };
        Ok(Self { magnitude, unit })
    }

    fn render(&self) -> String {
        match &self.unit {
            Some(unit) => format!("{}{unit}", format_magnitude(self.magnitude)),
            None => format_magnitude(self.magnitude),
        }
    }

    fn token_kind(&self) -> TokenKind {
        match self.unit.as_deref() {
            None => TokenKind::Number,
            Some("%") => TokenKind::Percentage,
            Some(_) => TokenKind::Dimension,
        }
    }

    /// 折算右值并确定结果单位：
    /// 无单位继承对侧；同组换算到左侧；无法换算时保留左侧并警告。
    fn coerce(&self, rhs: &NumberValue) -> (f64, Option<String>) {
        match (&self.unit, &rhs.unit) {
            (None, None) => (rhs.magnitude, None),
            (None, Some(u)) => (rhs.magnitude, Some(u.clone())),
            (Some(u), None) => (rhs.magnitude, Some(u.clone())),
            (Some(lu), Some(ru)) => match convert_unit(rhs.magnitude, ru, lu) {
                Some(converted) => (converted, Some(lu.clone())),
                None => {
                    if lu != ru {
                        log::warn!("单位 {ru} 无法换算为 {lu}，按 {lu} 处理");
                    }
                    (rhs.magnitude, Some(lu.clone()))
                }
            },
        }
    }
}

impl StringValue {
    pub fn quoted(text: String, quote: char) -> Self {
        Self {
            text,
            quoted: true,
            quote,
        }
    }

    pub fn unquoted(text: String) -> Self {
        Self {
            text,
            quoted: false,
            quote: '"',
        }
    }

    /// 从 STRING token 构造，剥掉一层引号。
    pub fn from_string_token(token: &Token) -> Self {
        let quote = token.text.chars().next().unwrap_or('"');
        Self {
            text: strip_quotes(&token.text),
            quoted: true,
            quote,
        }
    }

    fn render(&self) -> String {
        if self.quoted {
            let escaped = self
                .text
                .chars()
                .flat_map(|ch| {
                    if ch == self.quote {
                        vec!['\\', ch]
                    } else {
                        vec![ch]
                    }
                })
                .collect::<String>();
            format!("{q}{escaped}{q}", q = self.quote)
        } else {
            self.text.clone()
        }
    }
}

impl UrlValue {
    pub fn from_token(token: &Token) -> Self {
        let raw = token.text.clone();
        let inner = raw
            .strip_prefix("url(")
            .and_then(|rest| rest.strip_suffix(')'))
            .map(|body| strip_quotes(body.trim()))
            .unwrap_or_else(|| raw.clone());
        Self { raw, inner }
    }
}

impl ColorValue {
    pub fn from_rgba(rgba: Rgba) -> Self {
        Self { rgba, origin: None }
    }

    pub fn from_token(token: &Token) -> LessResult<Self> {
        match color::parse_color(&token.text) {
            Some(rgba) => Ok(Self {
                rgba,
                origin: Some(token.text.clone()),
            }),
            None => Err(LessError::value(
                format!("无法解析颜色 {}", token.text),
                token.location(),
            )),
        }
    }

    fn render(&self) -> String {
        if let Some(origin) = &self.origin {
            return origin.clone();
        }
        if self.rgba.a >= 1.0 {
            color::format_hex(self.rgba)
        } else {
            color::format_rgba(self.rgba)
        }
    }
}

impl Value {
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Number(_) => "number",
            Value::Color(_) => "color",
            Value::Str(_) => "string",
            Value::Url(_) => "url",
            Value::Boolean(_) => "boolean",
            Value::Unit(_) => "unit",
        }
    }

    /// 函数签名匹配用的类别字符。
    pub fn signature_char(&self) -> char {
        match self {
            Value::Number(_) => 'N',
            Value::Color(_) => 'C',
            Value::Str(_) => 'S',
            Value::Url(_) => 'U',
            Value::Boolean(_) => 'B',
            Value::Unit(_) => 'T',
        }
    }

    pub fn render(&self) -> String {
        match self {
            Value::Number(n) => n.render(),
            Value::Color(c) => c.render(),
            Value::Str(s) => s.render(),
            Value::Url(u) => u.raw.clone(),
            Value::Boolean(b) => b.to_string(),
            Value::Unit(u) => u.clone(),
        }
    }

    /// 把值写回 token 序列，供拼接进输出或再求值。
    pub fn to_tokens(&self) -> TokenList {
        let kind = match self {
            Value::Number(n) => n.token_kind(),
            Value::Color(c) => {
                if c.render().starts_with('#') {
                    TokenKind::Hash
                } else {
                    TokenKind::Identifier
                }
            }
            Value::Str(s) => {
                if s.quoted {
                    TokenKind::String
                } else {
                    TokenKind::Identifier
                }
            }
            Value::Url(_) => TokenKind::Url,
            Value::Boolean(_) | Value::Unit(_) => TokenKind::Identifier,
        };
        TokenList::from_tokens(vec![Token::builtin(self.render(), kind)])
    }

    pub fn is_truthy(&self) -> bool {
        matches!(self, Value::Boolean(true))
    }
}

/// 二元运算统一入口；类型组合不支持时返回 TypeError。
pub fn apply(lhs: &Value, op: Operator, rhs: &Value) -> LessResult<Value> {
    match (lhs, rhs) {
        (Value::Number(a), Value::Number(b)) => number_op(a, op, b),
        (Value::Number(a), Value::Color(b)) => match op {
            Operator::Add | Operator::Multiply => color_scalar_op(b, op, a.magnitude),
            Operator::Equal => Ok(Value::Boolean(false)),
            _ => Err(type_error(lhs, op, rhs)),
        },
        (Value::Color(a), Value::Number(b)) => match op {
            Operator::Add | Operator::Subtract | Operator::Multiply | Operator::Divide => {
                color_scalar_op(a, op, b.magnitude)
            }
            Operator::Equal => Ok(Value::Boolean(false)),
            _ => Err(type_error(lhs, op, rhs)),
        },
        (Value::Color(a), Value::Color(b)) => color_op(a, op, b),
        (Value::Str(a), _) => string_op(a, op, rhs),
        (Value::Url(a), Value::Url(b)) => match op {
            Operator::Equal => Ok(Value::Boolean(a.raw == b.raw)),
            _ => Err(type_error(lhs, op, rhs)),
        },
        (Value::Boolean(a), Value::Boolean(b)) => match op {
            Operator::Equal => Ok(Value::Boolean(a == b)),
            _ => Err(type_error(lhs, op, rhs)),
        },
        (Value::Unit(a), Value::Unit(b)) => match op {
            Operator::Equal => Ok(Value::Boolean(a == b)),
            _ => Err(type_error(lhs, op, rhs)),
        },
        _ => match op {
            // 跨类型只定义相等比较，结果恒为 false
            Operator::Equal => Ok(Value::Boolean(false)),
            _ => Err(type_error(lhs, op, rhs)),
        },
    }
}

fn type_error(lhs: &Value, op: Operator, rhs: &Value) -> LessError {
    LessError::type_mismatch(format!(
        "{} {} {} 没有定义",
        lhs.type_name(),
        op.symbol(),
        rhs.type_name()
    ))
}

fn number_op(lhs: &NumberValue, op: Operator, rhs: &NumberValue) -> LessResult<Value> {
    match op {
        Operator::Multiply => {
            let unit = lhs.unit.clone().or_else(|| rhs.unit.clone());
            Ok(Value::Number(NumberValue::new(
                lhs.magnitude * rhs.magnitude,
                unit,
            )))
        }
        Operator::Divide => {
            if rhs.magnitude.abs() < f64::EPSILON {
                return Err(LessError::arithmetic("除法分母不能为 0"));
            }
            let unit = lhs.unit.clone().or_else(|| rhs.unit.clone());
            Ok(Value::Number(NumberValue::new(
                lhs.magnitude / rhs.magnitude,
                unit,
            )))
        }
        Operator::Add | Operator::Subtract => {
            let (rhs_magnitude, unit) = lhs.coerce(rhs);
            let value = if op == Operator::Add {
                lhs.magnitude + rhs_magnitude
            } else {
                lhs.magnitude - rhs_magnitude
            };
            Ok(Value::Number(NumberValue::new(value, unit)))
        }
        _ => {
            let (rhs_magnitude, _) = lhs.coerce(rhs);
            let result = match op {
                Operator::Equal => approx_eq(lhs.magnitude, rhs_magnitude),
                Operator::Less => lhs.magnitude < rhs_magnitude,
                Operator::Greater => lhs.magnitude > rhs_magnitude,
                Operator::LessEq => {
                    lhs.magnitude < rhs_magnitude || approx_eq(lhs.magnitude, rhs_magnitude)
                }
                _ => lhs.magnitude > rhs_magnitude || approx_eq(lhs.magnitude, rhs_magnitude),
            };
            Ok(Value::Boolean(result))
        }
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    (a - b).abs() < 1e-9
}

/// RGB 通道在 [0,255] 空间逐分量运算并截断。
fn color_op(lhs: &ColorValue, op: Operator, rhs: &ColorValue) -> LessResult<Value> {
    if op == Operator::Equal {
        return Ok(Value::Boolean(lhs.rgba == rhs.rgba));
    }
    let combine = channel_op(op)?;
    let a = lhs.rgba;
    let b = rhs.rgba;
    let rgba = Rgba::new(
        combine(a.r * 255.0, b.r * 255.0)? / 255.0,
        combine(a.g * 255.0, b.g * 255.0)? / 255.0,
        combine(a.b * 255.0, b.b * 255.0)? / 255.0,
        a.a.min(b.a),
    );
    Ok(Value::Color(ColorValue::from_rgba(rgba)))
}

fn color_scalar_op(color: &ColorValue, op: Operator, scalar: f64) -> LessResult<Value> {
    let combine = channel_op(op)?;
    let c = color.rgba;
    let rgba = Rgba::new(
        combine(c.r * 255.0, scalar)? / 255.0,
        combine(c.g * 255.0, scalar)? / 255.0,
        combine(c.b * 255.0, scalar)? / 255.0,
        c.a,
    );
    Ok(Value::Color(ColorValue::from_rgba(rgba)))
}

fn channel_op(op: Operator) -> LessResult<fn(f64, f64) -> LessResult<f64>> {
    match op {
        Operator::Add => Ok(|a, b| Ok(a + b)),
        Operator::Subtract => Ok(|a, b| Ok(a - b)),
        Operator::Multiply => Ok(|a, b| Ok(a * b)),
        Operator::Divide => Ok(|a, b| {
            if b.abs() < f64::EPSILON {
                Err(LessError::arithmetic("颜色除法分量不能为 0"))
            } else {
                Ok(a / b)
            }
        }),
        _ => Err(LessError::type_mismatch(format!(
            "颜色不支持 {} 比较",
            op.symbol()
        ))),
    }
}

fn string_op(lhs: &StringValue, op: Operator, rhs: &Value) -> LessResult<Value> {
    match op {
        Operator::Add => {
            let appended = match rhs {
                Value::Str(s) => s.text.clone(),
                other => other.render(),
            };
            let mut text = lhs.text.clone();
            text.push_str(&appended);
            Ok(Value::Str(StringValue {
                text,
                quoted: lhs.quoted,
                quote: lhs.quote,
            }))
        }
        Operator::Equal => match rhs {
            Value::Str(s) => Ok(Value::Boolean(lhs.text == s.text)),
            _ => Ok(Value::Boolean(false)),
        },
        Operator::Less | Operator::Greater | Operator::LessEq | Operator::GreaterEq => match rhs {
            Value::Str(s) => {
                let result = match op {
                    Operator::Less => lhs.text < s.text,
                    Operator::Greater => lhs.text > s.text,
                    Operator::LessEq => lhs.text <= s.text,
                    _ => lhs.text >= s.text,
                };
                Ok(Value::Boolean(result))
            }
            _ => Err(LessError::type_mismatch(format!(
                "string {} {} 没有定义",
                op.symbol(),
                rhs.type_name()
            ))),
        },
        _ => Err(LessError::type_mismatch(format!(
            "string 不支持 {}",
            op.symbol()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn number(text: &str) -> Value {
        let token = Token::builtin(
            text,
            if text.ends_with('%') {
                TokenKind::Percentage
            } else if text.chars().all(|c| c.is_ascii_digit() || c == '.') {
                TokenKind::Number
            } else {
                TokenKind::Dimension
            },
        );
        Value::Number(NumberValue::from_token(&token).unwrap())
    }

    #[test]
    fn unitless_adopts_unit() {
        let result = apply(&number("1px"), Operator::Add, &number("2")).unwrap();
        assert_eq!(result.render(), "3px");
    }

    #[test]
    fn incompatible_units_keep_lhs() {
        let result = apply(&number("1px"), Operator::Add, &number("2em")).unwrap();
        assert_eq!(result.render(), "3px");
    }

    #[test]
    fn angle_conversion_applies() {
        let result = apply(&number("180deg"), Operator::Add, &number("1turn")).unwrap();
        assert_eq!(result.render(), "540deg");
    }

    #[test]
    fn time_conversion_applies() {
        let result = apply(&number("1s"), Operator::Add, &number("100ms")).unwrap();
        assert_eq!(result.render(), "1.1s");
    }

    #[test]
    fn division_by_zero_fails() {
        let err = apply(&number("4px"), Operator::Divide, &number("0")).unwrap_err();
        assert!(matches!(err, LessError::Arithmetic(_)));
    }

    #[test]
    fn color_addition_is_componentwise() {
        let a = Value::Color(ColorValue::from_token(&Token::builtin("#ff0000", TokenKind::Hash)).unwrap());
        let b = Value::Color(ColorValue::from_token(&Token::builtin("#000044", TokenKind::Hash)).unwrap());
        let result = apply(&a, Operator::Add, &b).unwrap();
        assert_eq!(result.render(), "#ff0044");
    }

    #[test]
    fn string_concat_preserves_quote_style() {
        let lhs = Value::Str(StringValue::quoted("he".into(), '\''));
        let rhs = Value::Str(StringValue::quoted("llo".into(), '"'));
        let result = apply(&lhs, Operator::Add, &rhs).unwrap();
        assert_eq!(result.render(), "'hello'");
    }

    #[test]
    fn comparisons_yield_booleans() {
        assert_eq!(
            apply(&number("3"), Operator::Greater, &number("2")).unwrap(),
            Value::Boolean(true)
        );
        assert_eq!(
            apply(&number("2px"), Operator::LessEq, &number("2px")).unwrap(),
            Value::Boolean(true)
        );
    }

    #[test]
    fn url_only_supports_equality() {
        let a = Value::Url(UrlValue::from_token(&Token::builtin("url(a.png)", TokenKind::Url)));
        let b = Value::Url(UrlValue::from_token(&Token::builtin("url(a.png)", TokenKind::Url)));
        assert_eq!(apply(&a, Operator::Equal, &b).unwrap(), Value::Boolean(true));
        assert!(apply(&a, Operator::Add, &b).is_err());
    }
}
