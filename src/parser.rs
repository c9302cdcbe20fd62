use std::cell::Cell;

use crate::context::VariableMap;
use crate::error::{LessError, LessResult, SourceLocation};
use crate::lexer::tokenize;
use crate::ruleset::{LessAtRule, LessRuleset, NestedItem, UnprocessedStatement};
use crate::selector::{LessSelector, Selector};
use crate::stylesheet::{ImportStatement, LessItem, LessStylesheet};
use crate::token::{Token, TokenKind, TokenList};
use crate::utils::strip_quotes;

/// LESS 解析器：token 流上的递归下降。
/// 为每个规则集按构造顺序分配稳定的函数 id，
/// 同一个解析器展开 @import 时 id 继续递增。
pub struct LessParser {
    next_fid: Cell<usize>,
}

impl Default for LessParser {
    fn default() -> Self {
        Self::new()
    }
}

impl LessParser {
    pub fn new() -> Self {
        Self {
            next_fid: Cell::new(0),
        }
    }

    fn alloc_fid(&self) -> usize {
        let id = self.next_fid.get();
        self.next_fid.set(id + 1);
        id
    }

    pub fn parse(&self, source: &str, name: &str) -> LessResult<LessStylesheet> {
        let tokens = tokenize(source, name)?;
        let mut stream = TokenStream::new(tokens);
        let mut stylesheet = LessStylesheet::default();

        loop {
            stream.skip_ws();
            if stream.eof() {
                break;
            }
            self.parse_top_level(&mut stream, &mut stylesheet)?;
        }
        Ok(stylesheet)
    }

    fn parse_top_level(
        &self,
        stream: &mut TokenStream,
        stylesheet: &mut LessStylesheet,
    ) -> LessResult<()> {
        if stream.peek_kind() == Some(TokenKind::AtKeyword) {
            let keyword = stream.peek().unwrap().text.clone();
            if keyword.eq_ignore_ascii_case("@import") {
                let import = self.parse_import(stream)?;
                stylesheet.items.push(LessItem::Import(import));
                return Ok(());
            }
            if stream.lookahead_is_variable() {
                self.parse_variable(stream, &mut stylesheet.variables)?;
                return Ok(());
            }
            if stream.lookahead_is_block_at_rule() {
                let at_rule = self.parse_at_rule(stream)?;
                stylesheet.items.push(LessItem::AtRule(at_rule));
                return Ok(());
            }
            // 无块体 at-rule（@charset 等）原样透传
            let raw = self.read_verbatim_at_rule(stream)?;
            stylesheet.items.push(LessItem::Verbatim(raw));
            return Ok(());
        }

        let (tokens, terminator) = stream.collect_statement()?;
        match terminator {
            Terminator::BlockOpen => {
                let ruleset = self.parse_ruleset(tokens, stream)?;
                stylesheet.items.push(LessItem::Ruleset(ruleset));
            }
            Terminator::Semicolon => {
                let mut tokens = tokens;
                tokens.trim();
                if !tokens.is_empty() {
                    stylesheet.items.push(LessItem::MixinCall(UnprocessedStatement {
                        tokens,
                        property_end: 0,
                    }));
                }
            }
            Terminator::BlockClose => {
                return Err(LessError::parse("意外的 '}'", stream.location()));
            }
            Terminator::Eof => {
                let mut tokens = tokens;
                tokens.trim();
                if !tokens.is_empty() {
                    return Err(LessError::parse("语句缺少 '{' 或 ';'", stream.location()));
                }
            }
        }
        Ok(())
    }

    /// `@name: value;` 绑定；同一作用域重复绑定发警告，后者生效。
    fn parse_variable(
        &self,
        stream: &mut TokenStream,
        variables: &mut VariableMap,
    ) -> LessResult<()> {
        let keyword = stream.next().unwrap();
        stream.skip_ws();
        stream.expect_kind(TokenKind::Colon)?;
        stream.skip_ws();

        if stream.peek_kind() == Some(TokenKind::BracketOpen) {
            return Err(LessError::parse(
                "暂不支持分离规则集形式的变量值",
                stream.location(),
            ));
        }

        let mut value = TokenList::new();
        let mut depth = 0usize;
        loop {
            match stream.peek_kind() {
                None => break,
                Some(TokenKind::ParenOpen) => depth += 1,
                Some(TokenKind::ParenClosed) => depth = depth.saturating_sub(1),
                Some(TokenKind::Delimiter) if depth == 0 => {
                    stream.next();
                    break;
                }
                Some(TokenKind::BracketClosed) if depth == 0 => break,
                _ => {}
            }
            value.push_back(stream.next().unwrap());
        }
        value.trim();

        if variables.contains_key(&keyword.text) {
            log::warn!("变量 {} 在同一作用域中重复定义，后者生效", keyword.text);
        }
        variables.insert(keyword.text, value);
        Ok(())
    }

    /// `@import (options)? target;`，参考 LESS 的 css/less 判定规则。
    fn parse_import(&self, stream: &mut TokenStream) -> LessResult<ImportStatement> {
        stream.next();
        stream.skip_ws();

        let mut options: Vec<String> = Vec::new();
        if stream.peek_kind() == Some(TokenKind::ParenOpen) {
            stream.next();
            loop {
                match stream.peek_kind() {
                    None => {
                        return Err(LessError::parse("不完整的 @import 选项", stream.location()))
                    }
                    Some(TokenKind::ParenClosed) => {
                        stream.next();
                        break;
                    }
                    Some(TokenKind::Identifier) => {
                        options.push(stream.next().unwrap().text.to_ascii_lowercase());
                    }
                    _ => {
                        stream.next();
                    }
                }
            }
            stream.skip_ws();
        }

        let mut spec = TokenList::new();
        loop {
            match stream.peek_kind() {
                None => return Err(LessError::parse("@import 缺少 ';'", stream.location())),
                Some(TokenKind::Delimiter) => {
                    stream.next();
                    break;
                }
                _ => spec.push_back(stream.next().unwrap()),
            }
        }
        spec.trim();

        let path = spec.front().and_then(|token| match token.kind {
            TokenKind::String => Some(strip_quotes(&token.text)),
            TokenKind::Url => None,
            TokenKind::Identifier => Some(token.text.clone()),
            _ => None,
        });

        let mut is_css = options.iter().any(|opt| opt == "css");
        if !is_css {
            match &path {
                Some(target) => {
                    if target.ends_with(".css") || target.starts_with("http") {
                        is_css = true;
                    }
                }
                // 无法解析路径时默认视为 CSS 导入
                None => is_css = true,
            }
        }

        let raw = format!("@import {};", spec.render_normalized());
        Ok(ImportStatement { raw, path, is_css })
    }

    /// 带块体的 at-rule：名称 + 参数 + 匿名规则集块体。
    fn parse_at_rule(&self, stream: &mut TokenStream) -> LessResult<LessAtRule> {
        let keyword = stream.next().unwrap();
        let name = keyword.text.trim_start_matches('@').to_string();

        let mut params = TokenList::new();
        let mut depth = 0usize;
        loop {
            match stream.peek_kind() {
                None => return Err(LessError::parse("at-rule 缺少块体", stream.location())),
                Some(TokenKind::ParenOpen) => depth += 1,
                Some(TokenKind::ParenClosed) => depth = depth.saturating_sub(1),
                Some(TokenKind::BracketOpen) if depth == 0 => break,
                _ => {}
            }
            params.push_back(stream.next().unwrap());
        }
        params.trim();

        stream.expect_kind(TokenKind::BracketOpen)?;
        let mut body = LessRuleset::new(
            LessSelector::plain(Selector::empty()),
            self.alloc_fid(),
        );
        self.parse_block(stream, &mut body)?;

        Ok(LessAtRule { name, params, body })
    }

    fn read_verbatim_at_rule(&self, stream: &mut TokenStream) -> LessResult<String> {
        let mut raw = TokenList::new();
        loop {
            match stream.peek_kind() {
                None => return Err(LessError::parse("at-rule 缺少 ';'", stream.location())),
                Some(TokenKind::Delimiter) => {
                    stream.next();
                    break;
                }
                _ => raw.push_back(stream.next().unwrap()),
            }
        }
        Ok(format!("{};", raw.render_normalized()))
    }

    fn parse_ruleset(
        &self,
        selector_tokens: TokenList,
        stream: &mut TokenStream,
    ) -> LessResult<LessRuleset> {
        let selector = LessSelector::parse(selector_tokens);
        if selector.selector.is_empty() && !selector.parametric {
            return Err(LessError::parse("缺少合法的选择器", stream.location()));
        }
        let mut ruleset = LessRuleset::new(selector, self.alloc_fid());
        self.parse_block(stream, &mut ruleset)?;
        Ok(ruleset)
    }

    /// 规则块体：变量、嵌套 at-rule、嵌套规则与未定性语句。
    /// 调用时 `{` 已被消费。
    fn parse_block(&self, stream: &mut TokenStream, ruleset: &mut LessRuleset) -> LessResult<()> {
        loop {
            stream.skip_ws();
            match stream.peek_kind() {
                None => {
                    return Err(LessError::parse("缺少匹配的 '}'", stream.location()));
                }
                Some(TokenKind::BracketClosed) => {
                    stream.next();
                    return Ok(());
                }
                Some(TokenKind::AtKeyword) => {
                    if stream.lookahead_is_variable() {
                        self.parse_variable(stream, &mut ruleset.variables)?;
                        continue;
                    }
                    if stream.lookahead_is_block_at_rule() {
                        let at_rule = self.parse_at_rule(stream)?;
                        ruleset.nested.push(NestedItem::AtRule(at_rule));
                        continue;
                    }
                    // 其余 @ 开头语句（极少见）按未定性语句收集
                }
                _ => {}
            }

            let (tokens, terminator) = stream.collect_statement()?;
            match terminator {
                Terminator::BlockOpen => {
                    let nested = self.parse_ruleset(tokens, stream)?;
                    ruleset.nested.push(NestedItem::Ruleset(nested));
                }
                Terminator::Semicolon | Terminator::BlockClose => {
                    let mut tokens = tokens;
                    tokens.trim();
                    if !tokens.is_empty() {
                        let property_end = property_boundary(&tokens);
                        ruleset.statements.push(UnprocessedStatement {
                            tokens,
                            property_end,
                        });
                    }
                }
                Terminator::Eof => {
                    return Err(LessError::parse("缺少匹配的 '}'", stream.location()));
                }
            }
        }
    }
}

/// 首个顶层冒号若把一段属性名样式的 token 与值隔开，
/// 返回冒号下标作为属性边界；否则 0（整条按 mixin 调用处理）。
fn property_boundary(tokens: &TokenList) -> usize {
    let mut depth = 0usize;
    for (idx, token) in tokens.iter().enumerate() {
        match token.kind {
            TokenKind::ParenOpen | TokenKind::BracketOpen => depth += 1,
            TokenKind::ParenClosed | TokenKind::BracketClosed => {
                depth = depth.saturating_sub(1)
            }
            TokenKind::Colon if depth == 0 => {
                if idx == 0 {
                    return 0;
                }
                let head: Vec<&Token> = tokens.iter().take(idx).collect();
                let property_like = head.iter().all(|t| {
                    t.is_whitespace()
                        || t.kind == TokenKind::Identifier
                        || (t.kind == TokenKind::Other && (t.text == "*" || t.text == "_"))
                }) && head.iter().any(|t| t.kind == TokenKind::Identifier);
                return if property_like { idx } else { 0 };
            }
            _ => {}
        }
    }
    0
}

/// 带位置的 token 流游标。
struct TokenStream {
    tokens: Vec<Token>,
    pos: usize,
}

/// 语句收集的终止符。
enum Terminator {
    BlockOpen,
    Semicolon,
    BlockClose,
    Eof,
}

impl TokenStream {
    fn new(tokens: Vec<Token>) -> Self {
        Self { tokens, pos: 0 }
    }

    fn eof(&self) -> bool {
        self.pos >= self.tokens.len()
    }

    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos)
    }

    fn peek_kind(&self) -> Option<TokenKind> {
        self.peek().map(|t| t.kind)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn skip_ws(&mut self) {
        while self.peek().map_or(false, Token::is_whitespace) {
            self.pos += 1;
        }
    }

    fn location(&self) -> SourceLocation {
        self.peek()
            .or_else(|| self.tokens.last())
            .map(Token::location)
            .unwrap_or_default()
    }

    fn expect_kind(&mut self, kind: TokenKind) -> LessResult<Token> {
        match self.next() {
            Some(token) if token.kind == kind => Ok(token),
            Some(token) => Err(LessError::expected(
                format!("{kind:?}"),
                token.text.clone(),
                token.location(),
            )),
            None => Err(LessError::parse(
                format!("期待 {kind:?}, 却到达输入末尾"),
                self.location(),
            )),
        }
    }

    /// `@name` 后（跳过空白）跟冒号即为变量绑定。
    fn lookahead_is_variable(&self) -> bool {
        let mut idx = self.pos + 1;
        while self
            .tokens
            .get(idx)
            .map_or(false, Token::is_whitespace)
        {
            idx += 1;
        }
        self.tokens.get(idx).map(|t| t.kind) == Some(TokenKind::Colon)
    }

    /// `@name … {` 在遇到 ';' 之前出现块体即为带块 at-rule。
    fn lookahead_is_block_at_rule(&self) -> bool {
        let mut depth = 0usize;
        for token in &self.tokens[self.pos..] {
            match token.kind {
                TokenKind::ParenOpen => depth += 1,
                TokenKind::ParenClosed => depth = depth.saturating_sub(1),
                TokenKind::BracketOpen if depth == 0 => return true,
                TokenKind::Delimiter if depth == 0 => return false,
                TokenKind::BracketClosed if depth == 0 => return false,
                _ => {}
            }
        }
        false
    }

    /// 收集一条语句直到顶层的 `{`、`;` 或 `}`。
    /// `{` 与 `;` 被消费，`}` 留给块解析器。
    fn collect_statement(&mut self) -> LessResult<(TokenList, Terminator)> {
        let mut tokens = TokenList::new();
        let mut depth = 0usize;
        loop {
            match self.peek_kind() {
                None => return Ok((tokens, Terminator::Eof)),
                Some(TokenKind::ParenOpen) => depth += 1,
                Some(TokenKind::ParenClosed) => depth = depth.saturating_sub(1),
                Some(TokenKind::BracketOpen) if depth == 0 => {
                    self.next();
                    tokens.trim();
                    return Ok((tokens, Terminator::BlockOpen));
                }
                Some(TokenKind::Delimiter) if depth == 0 => {
                    self.next();
                    tokens.trim();
                    return Ok((tokens, Terminator::Semicolon));
                }
                Some(TokenKind::BracketClosed) if depth == 0 => {
                    tokens.trim();
                    return Ok((tokens, Terminator::BlockClose));
                }
                _ => {}
            }
            tokens.push_back(self.next().unwrap());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn parse(src: &str) -> LessStylesheet {
        LessParser::new().parse(src, "test.less").unwrap()
    }

    fn first_ruleset(stylesheet: &LessStylesheet) -> &LessRuleset {
        stylesheet
            .items
            .iter()
            .find_map(|item| match item {
                LessItem::Ruleset(r) => Some(r),
                _ => None,
            })
            .expect("缺少规则集")
    }

    #[test]
    fn parses_variables_and_ruleset() {
        let sheet = parse("@base: 10px;\n.a { width: @base; }");
        assert_eq!(sheet.variables.get("@base").unwrap().render(), "10px");
        let ruleset = first_ruleset(&sheet);
        assert_eq!(ruleset.selector.selector.render(), ".a");
        assert_eq!(ruleset.statements.len(), 1);
        assert!(ruleset.statements[0].property_end > 0);
    }

    #[test]
    fn statement_classification() {
        let sheet = parse(".a { color: red; .m(2px); .b { x: y; } }");
        let ruleset = first_ruleset(&sheet);
        assert_eq!(ruleset.statements.len(), 2);
        assert!(ruleset.statements[0].property_end > 0);
        assert_eq!(ruleset.statements[1].property_end, 0);
        assert_eq!(ruleset.nested.len(), 1);
    }

    #[test]
    fn pseudo_selector_is_nested_rule_not_declaration() {
        let sheet = parse(".a { &:hover { color: red; } }");
        let ruleset = first_ruleset(&sheet);
        assert!(ruleset.statements.is_empty());
        assert_eq!(ruleset.nested.len(), 1);
    }

    #[test]
    fn last_declaration_without_semicolon() {
        let sheet = parse(".a { color: red }");
        let ruleset = first_ruleset(&sheet);
        assert_eq!(ruleset.statements.len(), 1);
    }

    #[test]
    fn mixin_definition_is_parametric_ruleset() {
        let sheet = parse(".m(@r) { border-radius: @r; }");
        let ruleset = first_ruleset(&sheet);
        assert!(ruleset.selector.parametric);
        assert_eq!(ruleset.selector.params.len(), 1);
    }

    #[test]
    fn media_query_inside_ruleset() {
        let sheet = parse(".panel { color: #333; @media (min-width: 800px) { color: #000; } }");
        let ruleset = first_ruleset(&sheet);
        assert_eq!(ruleset.statements.len(), 1);
        assert_eq!(ruleset.nested.len(), 1);
        match &ruleset.nested[0] {
            NestedItem::AtRule(at_rule) => {
                assert_eq!(at_rule.name, "media");
                assert_eq!(at_rule.params.render_normalized(), "(min-width: 800px)");
            }
            other => panic!("期待嵌套 at-rule，得到 {other:?}"),
        }
    }

    #[test]
    fn import_classification() {
        let sheet = parse("@import \"reset.css\";\n@import \"vars\";\n@import (css) \"x.less\";");
        let imports: Vec<&ImportStatement> = sheet
            .items
            .iter()
            .filter_map(|item| match item {
                LessItem::Import(i) => Some(i),
                _ => None,
            })
            .collect();
        assert_eq!(imports.len(), 3);
        assert!(imports[0].is_css);
        assert!(!imports[1].is_css);
        assert_eq!(imports[1].path.as_deref(), Some("vars"));
        assert!(imports[2].is_css);
    }

    #[test]
    fn charset_is_passthrough() {
        let sheet = parse("@charset \"utf-8\";\n.a { color: red; }");
        assert!(matches!(&sheet.items[0], LessItem::Verbatim(raw) if raw == "@charset \"utf-8\";"));
    }

    #[test]
    fn rebinding_warns_and_last_wins() {
        let sheet = parse("@a: 1; @a: 2;");
        assert_eq!(sheet.variables.get("@a").unwrap().render(), "2");
    }

    #[test]
    fn function_ids_are_unique() {
        let sheet = parse(".a { .b { } } .c { }");
        let a = first_ruleset(&sheet);
        let b = a.nested_rulesets().next().unwrap();
        let c = match &sheet.items[1] {
            LessItem::Ruleset(r) => r,
            _ => unreachable!(),
        };
        assert!(a.fid != b.fid && b.fid != c.fid && a.fid != c.fid);
    }

    #[test]
    fn missing_brace_is_parse_error() {
        let err = LessParser::new().parse(".a { color: red;", "t").unwrap_err();
        assert!(matches!(err, LessError::Parse { .. }));
    }
}
