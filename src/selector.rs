use crate::token::{Token, TokenKind, TokenList};

/// 选择器：一段 token 序列，按顶层逗号拆分成多个部分。
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Selector {
    tokens: TokenList,
}

impl Selector {
    pub fn new(mut tokens: TokenList) -> Self {
        tokens.trim();
        Self { tokens }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    pub fn tokens(&self) -> &TokenList {
        &self.tokens
    }

    pub fn render(&self) -> String {
        self.tokens.render_normalized()
    }

    /// 按不在括号内的逗号拆分。
    pub fn parts(&self) -> Vec<TokenList> {
        let mut parts = Vec::new();
        let mut current = TokenList::new();
        let mut depth = 0usize;
        for token in self.tokens.iter() {
            match token.kind {
                TokenKind::ParenOpen | TokenKind::BracketOpen => depth += 1,
                TokenKind::ParenClosed | TokenKind::BracketClosed => {
                    depth = depth.saturating_sub(1)
                }
                TokenKind::Other if token.text == "," && depth == 0 => {
                    current.trim();
                    if !current.is_empty() {
                        parts.push(std::mem::take(&mut current));
                    }
                    continue;
                }
                _ => {}
            }
            current.push_back(token.clone());
        }
        current.trim();
        if !current.is_empty() {
            parts.push(current);
        }
        parts
    }

    pub fn from_parts(parts: Vec<TokenList>) -> Self {
        let mut tokens = TokenList::new();
        for (idx, part) in parts.into_iter().enumerate() {
            if idx > 0 {
                tokens.push_back(Token::builtin(",", TokenKind::Other));
                tokens.push_back(Token::space());
            }
            tokens.append(part);
        }
        Self { tokens }
    }

    pub fn render_parts(&self) -> Vec<String> {
        self.parts()
            .iter()
            .map(TokenList::render_normalized)
            .collect()
    }

    /// 与父选择器做笛卡尔组合；`&` 在原位替换为父部分。
    pub fn join(&self, prefix: &Selector) -> Selector {
        if prefix.is_empty() {
            return self.clone();
        }
        if self.is_empty() {
            return prefix.clone();
        }

        let own_parts = self.parts();
        let mut combined = Vec::new();
        for parent in prefix.parts() {
            for child in &own_parts {
                let has_amp = child
                    .iter()
                    .any(|t| t.kind == TokenKind::Other && t.text == "&");
                let mut joined = TokenList::new();
                if has_amp {
                    for token in child.iter() {
                        if token.kind == TokenKind::Other && token.text == "&" {
                            joined.append(parent.clone());
                        } else {
                            joined.push_back(token.clone());
                        }
                    }
                } else {
                    joined.append(parent.clone());
                    joined.push_back(Token::space());
                    joined.append(child.clone());
                }
                joined.trim();
                combined.push(joined);
            }
        }
        Selector::from_parts(combined)
    }
}

/// 选择器上出现的 `:extend(...)` 子句。
#[derive(Debug, Clone)]
pub struct ExtendClause {
    pub target: Selector,
    pub all: bool,
}

/// 剥离选择器中的 `:extend(...)` 子句，返回净化后的选择器与子句列表。
pub fn strip_extends(selector: &Selector) -> (Selector, Vec<ExtendClause>) {
    let mut clauses = Vec::new();
    let mut parts = Vec::new();

    for part in selector.parts() {
        let tokens: Vec<Token> = part.iter().cloned().collect();
        let mut kept = TokenList::new();
        let mut i = 0;
        while i < tokens.len() {
            let is_extend = tokens[i].kind == TokenKind::Colon
                && tokens
                    .get(i + 1)
                    .map_or(false, |t| t.kind == TokenKind::Identifier && t.text == "extend")
                && tokens
                    .get(i + 2)
                    .map_or(false, |t| t.kind == TokenKind::ParenOpen);
            if !is_extend {
                kept.push_back(tokens[i].clone());
                i += 1;
                continue;
            }

            let mut depth = 1usize;
            let mut j = i + 3;
            let mut inner = TokenList::new();
            while j < tokens.len() && depth > 0 {
                match tokens[j].kind {
                    TokenKind::ParenOpen => depth += 1,
                    TokenKind::ParenClosed => {
                        depth -= 1;
                        if depth == 0 {
                            break;
                        }
                    }
                    _ => {}
                }
                inner.push_back(tokens[j].clone());
                j += 1;
            }
            inner.trim();

            // 末尾的 `all` 把该扩展切换为子串匹配模式
            let mut all = false;
            if inner
                .back()
                .map_or(false, |t| t.kind == TokenKind::Identifier && t.text == "all")
            {
                inner.pop_back();
                inner.rtrim();
                all = true;
            }
            if !inner.is_empty() {
                clauses.push(ExtendClause {
                    target: Selector::new(inner),
                    all,
                });
            }
            i = j + 1;
        }
        kept.trim();
        if !kept.is_empty() {
            parts.push(kept);
        }
    }

    (Selector::from_parts(parts), clauses)
}

/// mixin 形参。
#[derive(Debug, Clone)]
pub struct MixinParam {
    pub name: String,
    pub default: Option<TokenList>,
}

/// LESS 扩展过的选择器：参数列表、rest 形参与守卫条件。
#[derive(Debug, Clone)]
pub struct LessSelector {
    pub selector: Selector,
    pub params: Vec<MixinParam>,
    pub parametric: bool,
    pub rest: Option<String>,
    pub guard: Option<TokenList>,
}

impl LessSelector {
    /// 从完整的选择器 token 序列解析出参数列表与守卫。
    pub fn parse(tokens: TokenList) -> Self {
        let (body, guard) = split_guard(tokens);
        let (selector_tokens, params, parametric, rest) = split_params(body);
        Self {
            selector: Selector::new(selector_tokens),
            params,
            parametric,
            rest,
            guard,
        }
    }

    pub fn plain(selector: Selector) -> Self {
        Self {
            selector,
            params: Vec::new(),
            parametric: false,
            rest: None,
            guard: None,
        }
    }

    /// 无默认值、非 rest 的必填参数个数。
    pub fn required_arguments(&self) -> usize {
        self.params.iter().filter(|p| p.default.is_none()).count()
    }

    /// 调用实参个数是否与形参表兼容。
    pub fn accepts(&self, argument_count: usize) -> bool {
        if argument_count < self.required_arguments() {
            return false;
        }
        self.rest.is_some() || argument_count <= self.params.len()
    }
}

/// 切出顶层 `when` 之后的守卫 token。
fn split_guard(tokens: TokenList) -> (TokenList, Option<TokenList>) {
    let all: Vec<Token> = tokens.into_iter().collect();
    let mut depth = 0usize;
    for (idx, token) in all.iter().enumerate() {
        match token.kind {
            TokenKind::ParenOpen | TokenKind::BracketOpen => depth += 1,
            TokenKind::ParenClosed | TokenKind::BracketClosed => depth = depth.saturating_sub(1),
            TokenKind::Identifier if depth == 0 && token.text == "when" => {
                let mut body: TokenList = all[..idx].iter().cloned().collect();
                let mut guard: TokenList = all[idx + 1..].iter().cloned().collect();
                body.trim();
                guard.trim();
                return (body, Some(guard));
            }
            _ => {}
        }
    }
    (all.into_iter().collect(), None)
}

/// 选择器末尾的 `( ... )` 在内容为空或含 @ 形参时视为参数表。
fn split_params(mut tokens: TokenList) -> (TokenList, Vec<MixinParam>, bool, Option<String>) {
    tokens.trim();
    let all: Vec<Token> = tokens.iter().cloned().collect();
    if all.last().map(|t| t.kind) != Some(TokenKind::ParenClosed) {
        return (tokens, Vec::new(), false, None);
    }

    // 找到与末尾右括号配对的左括号
    let mut depth = 0usize;
    let mut open = None;
    for (idx, token) in all.iter().enumerate().rev() {
        match token.kind {
            TokenKind::ParenClosed => depth += 1,
            TokenKind::ParenOpen => {
                depth -= 1;
                if depth == 0 {
                    open = Some(idx);
                    break;
                }
            }
            _ => {}
        }
    }
    let open = match open {
        Some(idx) => idx,
        None => return (tokens, Vec::new(), false, None),
    };

    let inner = &all[open + 1..all.len() - 1];
    let has_at = inner.iter().any(|t| t.kind == TokenKind::AtKeyword);
    let only_ws = inner.iter().all(Token::is_whitespace);
    if !has_at && !only_ws {
        return (tokens, Vec::new(), false, None);
    }

    let (params, rest) = parse_params(inner);
    let mut selector_tokens: TokenList = all[..open].iter().cloned().collect();
    selector_tokens.trim();
    (selector_tokens, params, true, rest)
}

fn parse_params(inner: &[Token]) -> (Vec<MixinParam>, Option<String>) {
    let mut params = Vec::new();
    let mut rest = None;

    let mut entries: Vec<Vec<Token>> = Vec::new();
    let mut current = Vec::new();
    let mut depth = 0usize;
    for token in inner {
        match token.kind {
            TokenKind::ParenOpen | TokenKind::BracketOpen => depth += 1,
            TokenKind::ParenClosed | TokenKind::BracketClosed => depth = depth.saturating_sub(1),
            TokenKind::Other | TokenKind::Delimiter
                if depth == 0 && (token.text == "," || token.text == ";") =>
            {
                entries.push(std::mem::take(&mut current));
                continue;
            }
            _ => {}
        }
        current.push(token.clone());
    }
    if !current.is_empty() {
        entries.push(current);
    }

    for entry in entries {
        let mut list: TokenList = entry.into_iter().collect();
        list.trim();
        if list.is_empty() {
            continue;
        }
        let first = list.shift().unwrap();
        if first.kind != TokenKind::AtKeyword {
            // 裸 `...` 把其余实参收进 @arguments
            if first.text == "." {
                rest = Some("@arguments".to_string());
            }
            continue;
        }
        let name = first.text.clone();
        list.ltrim();

        // `@name...` 形式的 rest 形参
        let dots = list
            .iter()
            .take_while(|t| t.kind == TokenKind::Other && t.text == ".")
            .count();
        if dots == 3 {
            rest = Some(name);
            continue;
        }

        let default = match list.front().map(|t| t.kind) {
            Some(TokenKind::Colon) => {
                list.shift();
                list.trim();
                Some(list)
            }
            _ => None,
        };
        params.push(MixinParam { name, default });
    }

    (params, rest)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use pretty_assertions::assert_eq;

    fn selector(src: &str) -> Selector {
        Selector::new(tokenize(src, "t").unwrap().into_iter().collect())
    }

    fn less_selector(src: &str) -> LessSelector {
        LessSelector::parse(tokenize(src, "t").unwrap().into_iter().collect())
    }

    #[test]
    fn splits_on_top_level_commas_only() {
        let sel = selector(".a, .b:not(.c, .d), .e");
        assert_eq!(
            sel.render_parts(),
            vec![".a".to_string(), ".b:not(.c, .d)".to_string(), ".e".to_string()]
        );
    }

    #[test]
    fn join_appends_descendant() {
        let parent = selector(".a");
        let child = selector(".b");
        assert_eq!(child.join(&parent).render(), ".a .b");
    }

    #[test]
    fn join_substitutes_ampersand() {
        let parent = selector(".btn");
        let child = selector("&:hover");
        assert_eq!(child.join(&parent).render(), ".btn:hover");
    }

    #[test]
    fn join_is_cartesian() {
        let parent = selector(".a, .b");
        let child = selector(".x, .y");
        assert_eq!(child.join(&parent).render(), ".a .x, .a .y, .b .x, .b .y");
    }

    #[test]
    fn parses_parameters_with_defaults() {
        let sel = less_selector(".shadow(@x, @y: 2px)");
        assert!(sel.parametric);
        assert_eq!(sel.selector.render(), ".shadow");
        assert_eq!(sel.params.len(), 2);
        assert_eq!(sel.params[0].name, "@x");
        assert!(sel.params[0].default.is_none());
        assert_eq!(sel.params[1].default.as_ref().unwrap().render(), "2px");
        assert_eq!(sel.required_arguments(), 1);
        assert!(sel.accepts(1));
        assert!(sel.accepts(2));
        assert!(!sel.accepts(3));
    }

    #[test]
    fn pseudo_class_is_not_parametric() {
        let sel = less_selector("div:not(.a)");
        assert!(!sel.parametric);
        assert_eq!(sel.selector.render(), "div:not(.a)");
    }

    #[test]
    fn guard_is_split_off() {
        let sel = less_selector(".m(@x) when (@x > 0)");
        assert!(sel.parametric);
        assert_eq!(sel.selector.render(), ".m");
        assert_eq!(sel.guard.as_ref().unwrap().render_normalized(), "(@x > 0)");
    }

    #[test]
    fn rest_parameter_is_detected() {
        let sel = less_selector(".m(@a, @rest...)");
        assert_eq!(sel.params.len(), 1);
        assert_eq!(sel.rest.as_deref(), Some("@rest"));
        assert!(sel.accepts(5));
    }

    #[test]
    fn extend_clause_is_stripped() {
        let (clean, extends) = strip_extends(&selector(".a:extend(.b)"));
        assert_eq!(clean.render(), ".a");
        assert_eq!(extends.len(), 1);
        assert_eq!(extends[0].target.render(), ".b");
        assert!(!extends[0].all);

        let (clean, extends) = strip_extends(&selector(".a:extend(.b all)"));
        assert_eq!(clean.render(), ".a");
        assert!(extends[0].all);
    }
}
