use std::collections::HashMap;

use once_cell::sync::Lazy;

use crate::color::{self, Rgba};
use crate::error::{LessError, LessResult};
use crate::value::{ColorValue, NumberValue, StringValue, Value};

pub type NativeFunction = fn(&[Value]) -> LessResult<Value>;

/// 单个重载：参数签名 + 原生处理函数。
/// 签名字符：N 数值、C 颜色、S 字符串、U url、B 布尔、T 单位、`.` 任意；
/// 末尾 `*` 表示其余参数不限个数与类型。
pub struct FunctionOverload {
    pub signature: &'static str,
    pub handler: NativeFunction,
}

/// 内置函数分发表，名称查找不区分大小写。
pub struct FunctionLibrary {
    functions: HashMap<&'static str, Vec<FunctionOverload>>,
}

/// 进程级共享的函数库：初始化一次，之后只读。
pub static LIBRARY: Lazy<FunctionLibrary> = Lazy::new(FunctionLibrary::with_builtins);

impl FunctionLibrary {
    fn new() -> Self {
        Self {
            functions: HashMap::new(),
        }
    }

    pub fn exists(&self, name: &str) -> bool {
        self.functions.contains_key(name.to_ascii_lowercase().as_str())
    }

    fn register(&mut self, name: &'static str, signature: &'static str, handler: NativeFunction) {
        self.functions
            .entry(name)
            .or_default()
            .push(FunctionOverload { signature, handler });
    }

    /// 选择第一个签名匹配的重载并调用；全部不匹配时报 FunctionArity。
    pub fn call(&self, name: &str, arguments: &[Value]) -> LessResult<Value> {
        let lowered = name.to_ascii_lowercase();
        let overloads = self.functions.get(lowered.as_str()).ok_or_else(|| {
            LessError::FunctionArity {
                call: format!("{name}(...)"),
                expected: "已注册的函数".to_string(),
            }
        })?;

        for overload in overloads {
            if signature_matches(overload.signature, arguments) {
                return (overload.handler)(arguments);
            }
        }

        let call = format!(
            "{name}({})",
            arguments
                .iter()
                .map(Value::render)
                .collect::<Vec<_>>()
                .join(", ")
        );
        let expected = overloads
            .iter()
            .map(|o| describe_signature(name, o.signature))
            .collect::<Vec<_>>()
            .join(" 或 ");
        Err(LessError::FunctionArity { call, expected })
    }

    fn with_builtins() -> Self {
        let mut lib = Self::new();

        // 颜色构造
        lib.register("rgb", "NNN", fn_rgb);
        lib.register("rgba", "NNNN", fn_rgba);
        lib.register("hsl", "NNN", fn_hsl);
        lib.register("hsla", "NNNN", fn_hsla);

        // 颜色变换
        lib.register("lighten", "CN", fn_lighten);
        lib.register("darken", "CN", fn_darken);
        lib.register("saturate", "CN", fn_saturate);
        lib.register("desaturate", "CN", fn_desaturate);
        lib.register("fadein", "CN", fn_fadein);
        lib.register("fadeout", "CN", fn_fadeout);
        lib.register("fade", "CN", fn_fade);
        lib.register("spin", "CN", fn_spin);
        lib.register("mix", "CC", fn_mix2);
        lib.register("mix", "CCN", fn_mix3);
        lib.register("overlay", "CC", fn_overlay);

        // 颜色分量
        lib.register("hue", "C", fn_hue);
        lib.register("saturation", "C", fn_saturation);
        lib.register("lightness", "C", fn_lightness);
        lib.register("alpha", "C", fn_alpha);
        lib.register("red", "C", fn_red);
        lib.register("green", "C", fn_green);
        lib.register("blue", "C", fn_blue);

        // 数值
        lib.register("round", "N", fn_round);
        lib.register("round", "NN", fn_round_digits);
        lib.register("floor", "N", fn_floor);
        lib.register("ceil", "N", fn_ceil);
        lib.register("abs", "N", fn_abs);
        lib.register("percentage", "N", fn_percentage);
        lib.register("unit", "N", fn_unit_strip);
        lib.register("unit", "NT", fn_unit_set);
        lib.register("unit", "NS", fn_unit_set);
        lib.register("convert", "NT", fn_convert);
        lib.register("convert", "NS", fn_convert);

        // 字符串
        lib.register("e", "S", fn_e);
        lib.register("escape", "S", fn_escape);
        lib.register("%", "S*", fn_format);

        lib
    }
}

fn signature_matches(signature: &str, arguments: &[Value]) -> bool {
    let variadic = signature.ends_with('*');
    let fixed: Vec<char> = signature.trim_end_matches('*').chars().collect();

    if variadic {
        if arguments.len() < fixed.len() {
            return false;
        }
    } else if arguments.len() != fixed.len() {
        return false;
    }

    fixed
        .iter()
        .zip(arguments.iter())
        .all(|(sig, arg)| *sig == '.' || *sig == arg.signature_char())
}

fn describe_signature(name: &str, signature: &str) -> String {
    let variadic = signature.ends_with('*');
    let mut parts: Vec<&str> = signature
        .trim_end_matches('*')
        .chars()
        .map(|ch| match ch {
            'N' => "number",
            'C' => "color",
            'S' => "string",
            'U' => "url",
            'B' => "boolean",
            'T' => "unit",
            _ => "any",
        })
        .collect();
    if variadic {
        parts.push("...");
    }
    format!("{name}({})", parts.join(", "))
}

fn expect_color(value: &Value) -> &ColorValue {
    match value {
        Value::Color(c) => c,
        _ => unreachable!("签名已保证参数为颜色"),
    }
}

fn expect_number(value: &Value) -> &NumberValue {
    match value {
        Value::Number(n) => n,
        _ => unreachable!("签名已保证参数为数值"),
    }
}

/// 百分比或 0..1 小数皆可作为比例参数。
fn amount_of(value: &Value) -> f64 {
    let number = expect_number(value);
    if number.unit.as_deref() == Some("%") {
        (number.magnitude / 100.0).clamp(0.0, 1.0)
    } else {
        number.magnitude.clamp(0.0, 1.0)
    }
}

fn channel_of(value: &Value) -> f64 {
    let number = expect_number(value);
    if number.unit.as_deref() == Some("%") {
        (number.magnitude / 100.0).clamp(0.0, 1.0)
    } else {
        (number.magnitude / 255.0).clamp(0.0, 1.0)
    }
}

fn color_value(rgba: Rgba) -> LessResult<Value> {
    Ok(Value::Color(ColorValue::from_rgba(rgba)))
}

fn fn_rgb(args: &[Value]) -> LessResult<Value> {
    color_value(Rgba::new(
        channel_of(&args[0]),
        channel_of(&args[1]),
        channel_of(&args[2]),
        1.0,
    ))
}

fn fn_rgba(args: &[Value]) -> LessResult<Value> {
    color_value(Rgba::new(
        channel_of(&args[0]),
        channel_of(&args[1]),
        channel_of(&args[2]),
        amount_of(&args[3]),
    ))
}

fn fn_hsl(args: &[Value]) -> LessResult<Value> {
    color_value(color::hsl(
        expect_number(&args[0]).magnitude,
        amount_of(&args[1]),
        amount_of(&args[2]),
        1.0,
    ))
}

fn fn_hsla(args: &[Value]) -> LessResult<Value> {
    color_value(color::hsl(
        expect_number(&args[0]).magnitude,
        amount_of(&args[1]),
        amount_of(&args[2]),
        amount_of(&args[3]),
    ))
}

fn fn_lighten(args: &[Value]) -> LessResult<Value> {
    color_value(color::lighten(expect_color(&args[0]).rgba, amount_of(&args[1])))
}

fn fn_darken(args: &[Value]) -> LessResult<Value> {
    color_value(color::darken(expect_color(&args[0]).rgba, amount_of(&args[1])))
}

fn fn_saturate(args: &[Value]) -> LessResult<Value> {
    color_value(color::saturate(expect_color(&args[0]).rgba, amount_of(&args[1])))
}

fn fn_desaturate(args: &[Value]) -> LessResult<Value> {
    color_value(color::desaturate(expect_color(&args[0]).rgba, amount_of(&args[1])))
}

fn fn_fadein(args: &[Value]) -> LessResult<Value> {
    color_value(color::fade_in(expect_color(&args[0]).rgba, amount_of(&args[1])))
}

fn fn_fadeout(args: &[Value]) -> LessResult<Value> {
    color_value(color::fade_out(expect_color(&args[0]).rgba, amount_of(&args[1])))
}

fn fn_fade(args: &[Value]) -> LessResult<Value> {
    color_value(color::fade(expect_color(&args[0]).rgba, amount_of(&args[1])))
}

fn fn_spin(args: &[Value]) -> LessResult<Value> {
    color_value(color::spin(
        expect_color(&args[0]).rgba,
        expect_number(&args[1]).magnitude,
    ))
}

fn fn_mix2(args: &[Value]) -> LessResult<Value> {
    color_value(color::mix(
        expect_color(&args[0]).rgba,
        expect_color(&args[1]).rgba,
        0.5,
    ))
}

fn fn_mix3(args: &[Value]) -> LessResult<Value> {
    color_value(color::mix(
        expect_color(&args[0]).rgba,
        expect_color(&args[1]).rgba,
        amount_of(&args[2]),
    ))
}

fn fn_overlay(args: &[Value]) -> LessResult<Value> {
    color_value(color::overlay(
        expect_color(&args[0]).rgba,
        expect_color(&args[1]).rgba,
    ))
}

fn fn_hue(args: &[Value]) -> LessResult<Value> {
    Ok(Value::Number(NumberValue::bare(
        color::hue(expect_color(&args[0]).rgba).round(),
    )))
}

fn fn_saturation(args: &[Value]) -> LessResult<Value> {
    Ok(Value::Number(NumberValue::new(
        (color::saturation(expect_color(&args[0]).rgba) * 100.0).round(),
        Some("%".to_string()),
    )))
}

fn fn_lightness(args: &[Value]) -> LessResult<Value> {
    Ok(Value::Number(NumberValue::new(
        (color::lightness(expect_color(&args[0]).rgba) * 100.0).round(),
        Some("%".to_string()),
    )))
}

fn fn_alpha(args: &[Value]) -> LessResult<Value> {
    Ok(Value::Number(NumberValue::bare(expect_color(&args[0]).rgba.a)))
}

fn fn_red(args: &[Value]) -> LessResult<Value> {
    Ok(Value::Number(NumberValue::bare(
        (expect_color(&args[0]).rgba.r * 255.0).round(),
    )))
}

fn fn_green(args: &[Value]) -> LessResult<Value> {
    Ok(Value::Number(NumberValue::bare(
        (expect_color(&args[0]).rgba.g * 255.0).round(),
    )))
}

fn fn_blue(args: &[Value]) -> LessResult<Value> {
    Ok(Value::Number(NumberValue::bare(
        (expect_color(&args[0]).rgba.b * 255.0).round(),
    )))
}

fn fn_round(args: &[Value]) -> LessResult<Value> {
    let n = expect_number(&args[0]);
    Ok(Value::Number(NumberValue::new(
        n.magnitude.round(),
        n.unit.clone(),
    )))
}

fn fn_round_digits(args: &[Value]) -> LessResult<Value> {
    let n = expect_number(&args[0]);
    let digits = expect_number(&args[1]).magnitude.max(0.0) as u32;
    let factor = 10f64.powi(digits as i32);
    Ok(Value::Number(NumberValue::new(
        (n.magnitude * factor).round() / factor,
        n.unit.clone(),
    )))
}

fn fn_floor(args: &[Value]) -> LessResult<Value> {
    let n = expect_number(&args[0]);
    Ok(Value::Number(NumberValue::new(
        n.magnitude.floor(),
        n.unit.clone(),
    )))
}

fn fn_ceil(args: &[Value]) -> LessResult<Value> {
    let n = expect_number(&args[0]);
    Ok(Value::Number(NumberValue::new(
        n.magnitude.ceil(),
        n.unit.clone(),
    )))
}

fn fn_abs(args: &[Value]) -> LessResult<Value> {
    let n = expect_number(&args[0]);
    Ok(Value::Number(NumberValue::new(
        n.magnitude.abs(),
        n.unit.clone(),
    )))
}

fn fn_percentage(args: &[Value]) -> LessResult<Value> {
    let n = expect_number(&args[0]);
    Ok(Value::Number(NumberValue::new(
        n.magnitude * 100.0,
        Some("%".to_string()),
    )))
}

fn fn_unit_strip(args: &[Value]) -> LessResult<Value> {
    Ok(Value::Number(NumberValue::bare(
        expect_number(&args[0]).magnitude,
    )))
}

fn unit_argument(value: &Value) -> String {
    match value {
        Value::Unit(u) => u.clone(),
        Value::Str(s) => s.text.clone(),
        _ => unreachable!("签名已保证参数为单位或字符串"),
    }
}

fn fn_unit_set(args: &[Value]) -> LessResult<Value> {
    Ok(Value::Number(NumberValue::new(
        expect_number(&args[0]).magnitude,
        Some(unit_argument(&args[1])),
    )))
}

fn fn_convert(args: &[Value]) -> LessResult<Value> {
    let n = expect_number(&args[0]);
    let target = unit_argument(&args[1]);
    let from = n.unit.clone().unwrap_or_default();
    match crate::value::convert_unit(n.magnitude, &from, &target) {
        Some(converted) => Ok(Value::Number(NumberValue::new(
            converted,
            Some(target),
        ))),
        None => Err(LessError::arithmetic(format!(
            "单位 {from} 无法换算为 {target}"
        ))),
    }
}

fn expect_string(value: &Value) -> &StringValue {
    match value {
        Value::Str(s) => s,
        _ => unreachable!("签名已保证参数为字符串"),
    }
}

fn fn_e(args: &[Value]) -> LessResult<Value> {
    Ok(Value::Str(StringValue::unquoted(
        expect_string(&args[0]).text.clone(),
    )))
}

fn url_encode(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for byte in input.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

fn fn_escape(args: &[Value]) -> LessResult<Value> {
    Ok(Value::Str(StringValue::unquoted(url_encode(
        &expect_string(&args[0]).text,
    ))))
}

/// `%("a: %s", @v)` 占位符格式化；小写占位符去引号，大写再做 URL 编码。
fn fn_format(args: &[Value]) -> LessResult<Value> {
    let template = expect_string(&args[0]);
    let mut rest = args[1..].iter();
    let mut out = String::with_capacity(template.text.len());
    let mut chars = template.text.chars().peekable();
    while let Some(ch) = chars.next() {
        if ch != '%' {
            out.push(ch);
            continue;
        }
        match chars.peek() {
            Some(&spec @ ('s' | 'd' | 'a' | 'S' | 'D' | 'A')) => {
                chars.next();
                let value = rest.next().ok_or_else(|| LessError::FunctionArity {
                    call: format!("%({})", template.text),
                    expected: "每个占位符对应一个参数".to_string(),
                })?;
                let printed = match value {
                    Value::Str(s) => s.text.clone(),
                    other => other.render(),
                };
                if spec.is_ascii_uppercase() {
                    out.push_str(&url_encode(&printed));
                } else {
                    out.push_str(&printed);
                }
            }
            Some('%') => {
                chars.next();
                out.push('%');
            }
            _ => out.push('%'),
        }
    }
    Ok(Value::Str(StringValue::quoted(out, template.quote)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::token::{Token, TokenKind};
    use pretty_assertions::assert_eq;

    fn color(hex: &str) -> Value {
        Value::Color(ColorValue::from_token(&Token::builtin(hex, TokenKind::Hash)).unwrap())
    }

    fn percent(v: f64) -> Value {
        Value::Number(NumberValue::new(v, Some("%".to_string())))
    }

    #[test]
    fn lookup_is_case_insensitive() {
        assert!(LIBRARY.exists("Lighten"));
        assert!(LIBRARY.exists("lighten"));
        assert!(!LIBRARY.exists("nosuchfn"));
    }

    #[test]
    fn lighten_matches_reference_output() {
        let result = LIBRARY.call("lighten", &[color("#336699"), percent(20.0)]).unwrap();
        assert_eq!(result.render(), "#6699cc");
    }

    #[test]
    fn overload_resolution_picks_matching_arity() {
        let two = LIBRARY.call("mix", &[color("#ff0000"), color("#0000ff")]).unwrap();
        assert_eq!(two.render(), "#800080");
        let three = LIBRARY
            .call("mix", &[color("#ff0000"), color("#0000ff"), percent(100.0)])
            .unwrap();
        assert_eq!(three.render(), "#ff0000");
    }

    #[test]
    fn arity_mismatch_reports_signature() {
        let err = LIBRARY.call("lighten", &[percent(10.0)]).unwrap_err();
        match err {
            LessError::FunctionArity { expected, .. } => {
                assert!(expected.contains("lighten(color, number)"));
            }
            other => panic!("意外的错误: {other}"),
        }
    }

    #[test]
    fn percentage_and_unit_helpers() {
        let half = Value::Number(NumberValue::bare(0.5));
        assert_eq!(LIBRARY.call("percentage", &[half]).unwrap().render(), "50%");

        let px = Value::Number(NumberValue::new(5.0, Some("px".to_string())));
        let unit = Value::Unit("em".to_string());
        assert_eq!(LIBRARY.call("unit", &[px, unit]).unwrap().render(), "5em");
    }

    #[test]
    fn convert_requires_defined_conversion() {
        let ms = Value::Number(NumberValue::new(100.0, Some("ms".to_string())));
        let s = Value::Unit("s".to_string());
        assert_eq!(LIBRARY.call("convert", &[ms, s]).unwrap().render(), "0.1s");

        let px = Value::Number(NumberValue::new(1.0, Some("px".to_string())));
        let em = Value::Unit("em".to_string());
        assert!(LIBRARY.call("convert", &[px, em]).is_err());
    }

    #[test]
    fn format_replaces_placeholders() {
        let template = Value::Str(StringValue::quoted("color is %s!".to_string(), '"'));
        let arg = Value::Str(StringValue::quoted("red".to_string(), '"'));
        let result = LIBRARY.call("%", &[template, arg]).unwrap();
        assert_eq!(result.render(), "\"color is red!\"");
    }
}
