/// 压缩多余空白并去掉首尾空白，主要用于输出压缩模式。
pub fn collapse_whitespace(input: &str) -> String {
    input.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// 两空格一级的缩进。
pub fn indent(level: usize) -> String {
    "  ".repeat(level)
}

/// 去掉字符串字面量两端的引号并还原 `\"` 形式的转义。
/// 输入不带引号时原样返回。
pub fn strip_quotes(input: &str) -> String {
    let mut chars = input.chars();
    let quote = match chars.next() {
        Some(q @ ('"' | '\'')) if input.len() >= 2 && input.ends_with(q) => q,
        _ => return input.to_string(),
    };
    let inner = &input[1..input.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut iter = inner.chars().peekable();
    while let Some(ch) = iter.next() {
        if ch == '\\' {
            match iter.peek() {
                Some(&next) if next == quote || next == '\\' => {
                    result.push(next);
                    iter.next();
                }
                _ => result.push(ch),
            }
        } else {
            result.push(ch);
        }
    }
    result
}
