use crate::error::{LessError, LessResult, SourceLocation};
use crate::token::{Token, TokenKind};

/// 带行列指针的字符游标，注释在这里被吞掉。
struct Cursor<'a> {
    source: &'a str,
    position: usize,
    line: usize,
    column: usize,
    name: &'a str,
}

impl<'a> Cursor<'a> {
    fn new(source: &'a str, name: &'a str) -> Self {
        Self {
            source,
            position: 0,
            line: 1,
            column: 1,
            name,
        }
    }

    fn is_eof(&self) -> bool {
        self.position >= self.source.len()
    }

    fn peek_char(&self) -> Option<char> {
        self.source[self.position..].chars().next()
    }

    fn peek_second(&self) -> Option<char> {
        let mut chars = self.source[self.position..].chars();
        chars.next();
        chars.next()
    }

    fn advance_char(&mut self) -> Option<char> {
        let ch = self.peek_char()?;
        self.position += ch.len_utf8();
        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }
        Some(ch)
    }

    fn location(&self) -> SourceLocation {
        SourceLocation::new(self.name, self.line, self.column)
    }

    fn starts_with(&self, prefix: &str) -> bool {
        self.source[self.position..].starts_with(prefix)
    }
}

/// 把 LESS 源码切分成 token 流。空白折叠为单个空白 token，注释被丢弃。
pub fn tokenize(source: &str, name: &str) -> LessResult<Vec<Token>> {
    let mut cursor = Cursor::new(source, name);
    let mut tokens = Vec::new();

    while !cursor.is_eof() {
        if consume_comment(&mut cursor)? {
            continue;
        }

        let ch = match cursor.peek_char() {
            Some(ch) => ch,
            None => break,
        };

        if ch.is_whitespace() {
            let line = cursor.line;
            let column = cursor.column;
            while cursor.peek_char().map_or(false, char::is_whitespace) {
                cursor.advance_char();
            }
            // 连续空白与注释合并为一个空白 token
            if tokens
                .last()
                .map_or(false, |t: &Token| t.kind != TokenKind::Whitespace)
            {
                tokens.push(Token::new(" ", TokenKind::Whitespace, line, column, name));
            }
            continue;
        }

        let token = match ch {
            ';' => single(&mut cursor, TokenKind::Delimiter, name),
            ':' => single(&mut cursor, TokenKind::Colon, name),
            '{' => single(&mut cursor, TokenKind::BracketOpen, name),
            '}' => single(&mut cursor, TokenKind::BracketClosed, name),
            '(' => single(&mut cursor, TokenKind::ParenOpen, name),
            ')' => single(&mut cursor, TokenKind::ParenClosed, name),
            '"' | '\'' => read_string(&mut cursor, name)?,
            '@' => read_at_keyword(&mut cursor, name),
            '#' => read_hash(&mut cursor, name),
            _ if ch.is_ascii_digit() => read_number(&mut cursor, name),
            '.' if cursor.peek_second().map_or(false, |c| c.is_ascii_digit()) => {
                read_number(&mut cursor, name)
            }
            _ if is_ident_start(ch, cursor.peek_second()) => read_identifier_like(&mut cursor, name)?,
            _ => single(&mut cursor, TokenKind::Other, name),
        };
        tokens.push(token);
    }

    Ok(tokens)
}

fn single(cursor: &mut Cursor<'_>, kind: TokenKind, name: &str) -> Token {
    let line = cursor.line;
    let column = cursor.column;
    let ch = cursor.advance_char().unwrap_or_default();
    Token::new(ch.to_string(), kind, line, column, name)
}

fn consume_comment(cursor: &mut Cursor<'_>) -> LessResult<bool> {
    if cursor.starts_with("//") {
        while let Some(ch) = cursor.advance_char() {
            if ch == '\n' {
                break;
            }
        }
        return Ok(true);
    }
    if cursor.starts_with("/*") {
        let start = cursor.location();
        cursor.advance_char();
        cursor.advance_char();
        loop {
            if cursor.starts_with("*/") {
                cursor.advance_char();
                cursor.advance_char();
                return Ok(true);
            }
            if cursor.advance_char().is_none() {
                return Err(LessError::parse("注释缺少匹配的 '*/'", start));
            }
        }
    }
    Ok(false)
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '-' || ch == '_'
}

/// '-' 单独出现时是运算符，后面跟标识符字符时才是标识符起始。
fn is_ident_start(ch: char, next: Option<char>) -> bool {
    if ch.is_alphabetic() || ch == '_' || !ch.is_ascii() {
        return true;
    }
    if ch == '-' {
        return next.map_or(false, |c| c.is_alphabetic() || c == '-' || c == '_');
    }
    false
}

fn read_ident_text(cursor: &mut Cursor<'_>) -> String {
    let mut ident = String::new();
    while let Some(ch) = cursor.peek_char() {
        if is_ident_char(ch) {
            ident.push(ch);
            cursor.advance_char();
        } else {
            break;
        }
    }
    ident
}

/// 消费 `@{name}` 插值片段并原样保留在 token 文本里，留待求值期替换。
fn read_interpolation_fragment(cursor: &mut Cursor<'_>) -> String {
    let mut text = String::from("@{");
    cursor.advance_char();
    cursor.advance_char();
    while let Some(ch) = cursor.advance_char() {
        text.push(ch);
        if ch == '}' {
            break;
        }
    }
    text
}

/// 标识符与 `@{...}` 片段交替出现时合并成一个 token。
fn read_ident_with_interpolation(cursor: &mut Cursor<'_>, mut text: String) -> String {
    loop {
        text.push_str(&read_ident_text(cursor));
        if cursor.peek_char() == Some('@') && cursor.peek_second() == Some('{') {
            text.push_str(&read_interpolation_fragment(cursor));
        } else {
            return text;
        }
    }
}

fn read_string(cursor: &mut Cursor<'_>, name: &str) -> LessResult<Token> {
    let line = cursor.line;
    let column = cursor.column;
    let start = cursor.location();
    let quote = cursor.advance_char().unwrap();
    let mut text = String::new();
    text.push(quote);
    loop {
        match cursor.advance_char() {
            Some('\\') => {
                text.push('\\');
                if let Some(escaped) = cursor.advance_char() {
                    text.push(escaped);
                }
            }
            Some(ch) if ch == quote => {
                text.push(ch);
                break;
            }
            Some(ch) => text.push(ch),
            None => return Err(LessError::parse("字符串缺少结束引号", start)),
        }
    }
    Ok(Token::new(text, TokenKind::String, line, column, name))
}

/// `@name` 产生 ATKEYWORD；`@@name` 的第一个 `@` 保持为 OTHER，
/// 供求值器识别深层变量。
fn read_at_keyword(cursor: &mut Cursor<'_>, name: &str) -> Token {
    let line = cursor.line;
    let column = cursor.column;
    if cursor.peek_char() == Some('@') && cursor.peek_second() == Some('{') {
        // `@{name}` 直接出现时按可插值标识符处理
        let text = read_ident_with_interpolation(cursor, String::new());
        return Token::new(text, TokenKind::Identifier, line, column, name);
    }
    cursor.advance_char();
    match cursor.peek_char() {
        Some(ch) if is_ident_char(ch) => {
            let mut text = String::from("@");
            text.push_str(&read_ident_text(cursor));
            Token::new(text, TokenKind::AtKeyword, line, column, name)
        }
        _ => Token::new("@", TokenKind::Other, line, column, name),
    }
}

fn read_hash(cursor: &mut Cursor<'_>, name: &str) -> Token {
    let line = cursor.line;
    let column = cursor.column;
    cursor.advance_char();
    let ident = read_ident_text(cursor);
    if ident.is_empty() {
        Token::new("#", TokenKind::Other, line, column, name)
    } else {
        Token::new(format!("#{ident}"), TokenKind::Hash, line, column, name)
    }
}

/// 数字、百分比与带单位量。符号不在这里消费，由求值器处理取负。
fn read_number(cursor: &mut Cursor<'_>, name: &str) -> Token {
    let line = cursor.line;
    let column = cursor.column;
    let mut text = String::new();
    let mut saw_dot = false;
    while let Some(ch) = cursor.peek_char() {
        if ch.is_ascii_digit() {
            text.push(ch);
            cursor.advance_char();
        } else if ch == '.' && !saw_dot && cursor.peek_second().map_or(false, |c| c.is_ascii_digit())
        {
            saw_dot = true;
            text.push(ch);
            cursor.advance_char();
        } else {
            break;
        }
    }

    match cursor.peek_char() {
        Some('%') => {
            cursor.advance_char();
            text.push('%');
            Token::new(text, TokenKind::Percentage, line, column, name)
        }
        Some(ch) if ch.is_alphabetic() => {
            text.push_str(&read_ident_text(cursor));
            Token::new(text, TokenKind::Dimension, line, column, name)
        }
        _ => Token::new(text, TokenKind::Number, line, column, name),
    }
}

/// 标识符；`url(` 开头时把整个 url(...) 读成单个 token。
fn read_identifier_like(cursor: &mut Cursor<'_>, name: &str) -> LessResult<Token> {
    let line = cursor.line;
    let column = cursor.column;
    let start = cursor.location();
    let ident = read_ident_text(cursor);

    if ident.eq_ignore_ascii_case("url") && cursor.peek_char() == Some('(') {
        let mut text = ident;
        text.push('(');
        cursor.advance_char();
        let mut quote: Option<char> = None;
        loop {
            match cursor.advance_char() {
                Some('\\') => {
                    text.push('\\');
                    if let Some(escaped) = cursor.advance_char() {
                        text.push(escaped);
                    }
                }
                Some(ch) => {
                    if let Some(q) = quote {
                        text.push(ch);
                        if ch == q {
                            quote = None;
                        }
                    } else if ch == '"' || ch == '\'' {
                        quote = Some(ch);
                        text.push(ch);
                    } else if ch == ')' {
                        text.push(ch);
                        break;
                    } else {
                        text.push(ch);
                    }
                }
                None => return Err(LessError::parse("url(...) 缺少结束括号", start)),
            }
        }
        return Ok(Token::new(text, TokenKind::Url, line, column, name));
    }

    let text = if cursor.peek_char() == Some('@') && cursor.peek_second() == Some('{') {
        read_ident_with_interpolation(cursor, ident)
    } else {
        ident
    };
    Ok(Token::new(text, TokenKind::Identifier, line, column, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn kinds(source: &str) -> Vec<TokenKind> {
        tokenize(source, "test.less")
            .unwrap()
            .into_iter()
            .map(|t| t.kind)
            .collect()
    }

    #[test]
    fn tokenizes_declaration() {
        let tokens = tokenize("color: #ff0000;", "t").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["color", ":", " ", "#ff0000", ";"]);
        assert_eq!(tokens[3].kind, TokenKind::Hash);
    }

    #[test]
    fn dimension_and_percentage() {
        assert_eq!(
            kinds("10px 50% 1.5"),
            vec![
                TokenKind::Dimension,
                TokenKind::Whitespace,
                TokenKind::Percentage,
                TokenKind::Whitespace,
                TokenKind::Number,
            ]
        );
    }

    #[test]
    fn at_keyword_and_deep_variable() {
        let tokens = tokenize("@@name", "t").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Other);
        assert_eq!(tokens[0].text, "@");
        assert_eq!(tokens[1].kind, TokenKind::AtKeyword);
        assert_eq!(tokens[1].text, "@name");
    }

    #[test]
    fn url_is_one_token() {
        let tokens = tokenize("url('/a (b).png')", "t").unwrap();
        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].kind, TokenKind::Url);
        assert_eq!(tokens[0].text, "url('/a (b).png')");
    }

    #[test]
    fn comments_are_dropped() {
        let tokens = tokenize("a /* x */ b // y\nc", "t").unwrap();
        let texts: Vec<&str> = tokens.iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["a", " ", "b", " ", "c"]);
    }

    #[test]
    fn minus_before_digit_stays_separate() {
        let tokens = tokenize("-5px -moz-box", "t").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Other);
        assert_eq!(tokens[1].kind, TokenKind::Dimension);
        assert_eq!(tokens[3].kind, TokenKind::Identifier);
        assert_eq!(tokens[3].text, "-moz-box");
    }

    #[test]
    fn interpolation_merges_into_identifier() {
        let tokens = tokenize(".@{name}-suffix", "t").unwrap();
        assert_eq!(tokens[0].text, ".");
        assert_eq!(tokens[1].kind, TokenKind::Identifier);
        assert_eq!(tokens[1].text, "@{name}-suffix");

        let tokens = tokenize("border@{side}: 0;", "t").unwrap();
        assert_eq!(tokens[0].kind, TokenKind::Identifier);
        assert_eq!(tokens[0].text, "border@{side}");
    }

    #[test]
    fn tracks_line_and_column() {
        let tokens = tokenize(".a {\n  color: red;\n}", "t").unwrap();
        let red = tokens.iter().find(|t| t.text == "red").unwrap();
        assert_eq!(red.line, 2);
        assert_eq!(red.column, 10);
    }
}
