use crate::context::{FunctionId, FunctionRef, ProcessingContext, VariableMap};
use crate::css::{CssAtRule, CssDeclaration, CssNode, CssRuleset};
use crate::error::{LessError, LessResult, SourceLocation};
use crate::extend::{Extension, ExtensionMode};
use crate::selector::{strip_extends, LessSelector, Selector};
use crate::token::{Token, TokenKind, TokenList};

/// 规则体里的一条未定性语句：属性边界之前是属性名，
/// 否则整条按 mixin 调用解析。归类推迟到求值期。
#[derive(Debug, Clone)]
pub struct UnprocessedStatement {
    pub tokens: TokenList,
    pub property_end: usize,
}

impl UnprocessedStatement {
    pub fn location(&self) -> SourceLocation {
        self.tokens
            .front()
            .map(Token::location)
            .unwrap_or_default()
    }

    fn property_tokens(&self) -> TokenList {
        self.tokens
            .iter()
            .take(self.property_end)
            .cloned()
            .collect()
    }

    /// 冒号之后的值 token。
    fn value_tokens(&self) -> TokenList {
        let mut rest: TokenList = self
            .tokens
            .iter()
            .skip(self.property_end)
            .cloned()
            .collect();
        rest.ltrim();
        if rest.front().map(|t| t.kind) == Some(TokenKind::Colon) {
            rest.shift();
        }
        rest.trim();
        rest
    }
}

/// 规则集内的嵌套成员，保持源顺序。
#[derive(Debug, Clone)]
pub enum NestedItem {
    Ruleset(LessRuleset),
    AtRule(LessAtRule),
}

/// 带块体的 at-rule（@media、@supports、@keyframes、@font-face）。
/// 块体复用匿名规则集，选择器为空。
#[derive(Debug, Clone)]
pub struct LessAtRule {
    pub name: String,
    pub params: TokenList,
    pub body: LessRuleset,
}

/// LESS 规则集：选择器（可带形参与守卫）、本地变量、未定性语句
/// 与嵌套成员。fid 是求值期的函数身份。
#[derive(Debug, Clone)]
pub struct LessRuleset {
    pub selector: LessSelector,
    pub variables: VariableMap,
    pub statements: Vec<UnprocessedStatement>,
    pub nested: Vec<NestedItem>,
    pub fid: FunctionId,
}

impl LessRuleset {
    pub fn new(selector: LessSelector, fid: FunctionId) -> Self {
        Self {
            selector,
            variables: VariableMap::new(),
            statements: Vec::new(),
            nested: Vec::new(),
            fid,
        }
    }

    pub fn nested_rulesets(&self) -> impl Iterator<Item = &LessRuleset> {
        self.nested.iter().filter_map(|item| match item {
            NestedItem::Ruleset(r) => Some(r),
            NestedItem::AtRule(_) => None,
        })
    }

    /// 自身是否与调用路径的一个单元同名。
    fn matches_unit(&self, unit: &str) -> bool {
        self.selector
            .selector
            .render_parts()
            .iter()
            .any(|part| part == unit)
    }

    /// 以自身为根按调用路径匹配；叶子层校验形参数量兼容。
    pub fn collect_matches<'a>(
        &'a self,
        path: &[String],
        argc: usize,
        out: &mut Vec<&'a LessRuleset>,
    ) {
        let unit = match path.first() {
            Some(unit) => unit,
            None => return,
        };
        if !self.matches_unit(unit) {
            return;
        }
        if path.len() == 1 {
            if self.selector.accepts(argc) {
                out.push(self);
            }
        } else {
            for nested in self.nested_rulesets() {
                nested.collect_matches(&path[1..], argc, out);
            }
        }
    }

    /// 在自己的嵌套规则里查找调用目标。
    pub fn find_inner<'a>(
        &'a self,
        path: &[String],
        argc: usize,
        out: &mut Vec<&'a LessRuleset>,
    ) {
        for nested in self.nested_rulesets() {
            nested.collect_matches(path, argc, out);
        }
    }

    /// 守卫求值；无守卫恒为真。
    pub fn match_conditions(&self, ctx: &ProcessingContext<'_>) -> LessResult<bool> {
        match &self.selector.guard {
            None => Ok(true),
            Some(guard) => {
                let mut tokens = guard.clone();
                ctx.validate_condition(&mut tokens)
            }
        }
    }

    /// 把规则集物化进 CSS 输出：选择器与前缀做笛卡尔组合，
    /// 语句落进新建的 CSS 规则，嵌套成员以组合后的选择器为新前缀。
    pub fn process<'a>(
        &'a self,
        output: &mut Vec<CssNode>,
        prefix: &Selector,
        ctx: &mut ProcessingContext<'a>,
    ) -> LessResult<()> {
        if !self.match_conditions(ctx)? {
            return Ok(());
        }

        let joined = self.selector.selector.join(prefix);
        let mut joined_tokens = joined.tokens().clone();
        ctx.interpolate_list(&mut joined_tokens)?;
        let joined = Selector::new(joined_tokens);
        let (clean, extend_clauses) = strip_extends(&joined);
        for clause in extend_clauses {
            ctx.add_extension(Extension {
                target: clause.target,
                replacement: clean.clone(),
                mode: if clause.all {
                    ExtensionMode::All
                } else {
                    ExtensionMode::Exact
                },
            });
        }

        ctx.push_frame(self, VariableMap::new(), true)?;
        let mut ruleset = CssRuleset::new(clean.clone());
        let mut pending = Vec::new();
        let result = self.process_into(&mut ruleset, &mut pending, &clean, ctx);
        ctx.pop_frame();
        result?;

        if !ruleset.declarations.is_empty() {
            output.push(CssNode::Ruleset(ruleset));
        }
        output.append(&mut pending);
        Ok(())
    }

    /// 规则体展开：声明与 mixin 调用落进 target，
    /// 嵌套规则/At 规则生成的节点落进 pending。
    pub fn process_into<'a>(
        &'a self,
        target: &mut CssRuleset,
        pending: &mut Vec<CssNode>,
        selector: &Selector,
        ctx: &mut ProcessingContext<'a>,
    ) -> LessResult<()> {
        ctx.add_variables(&self.variables);
        for nested in self.nested_rulesets() {
            ctx.add_closure(nested);
        }

        for statement in &self.statements {
            if statement.property_end > 0 {
                let declaration = self.process_declaration(statement, ctx)?;
                target.declarations.push(declaration);
            } else {
                call_mixin(statement, target, pending, selector, ctx)?;
            }
        }

        for item in &self.nested {
            match item {
                NestedItem::Ruleset(nested) => {
                    if !nested.selector.parametric {
                        nested.process(pending, selector, ctx)?;
                    }
                }
                NestedItem::AtRule(at_rule) => at_rule.process(pending, selector, ctx)?,
            }
        }
        Ok(())
    }

    fn process_declaration(
        &self,
        statement: &UnprocessedStatement,
        ctx: &ProcessingContext<'_>,
    ) -> LessResult<CssDeclaration> {
        let mut property_tokens = statement.property_tokens();
        ctx.interpolate_list(&mut property_tokens)?;
        let property = property_tokens.render_normalized();

        let mut value = statement.value_tokens();
        let mut important = strip_important_tokens(&mut value);
        ctx.process_value(&mut value)
            .map_err(|err| at_location(err, &statement.location()))?;
        value.trim();
        let mut rendered = value.render();

        // 变量值自带 !important 时也要剥出来
        if !important {
            if let Some(stripped) = strip_important_text(&rendered) {
                rendered = stripped;
                important = true;
            }
        }

        Ok(CssDeclaration {
            property,
            value: rendered,
            important,
        })
    }
}

/// 类型/算术错误本身不带位置，这里补上声明处的位置。
fn at_location(err: LessError, location: &SourceLocation) -> LessError {
    match err {
        LessError::Type(message) => LessError::Type(format!("{message} ({location})")),
        LessError::Arithmetic(message) => {
            LessError::Arithmetic(format!("{message} ({location})"))
        }
        other => other,
    }
}

/// 末尾的 `! important` token 对。
fn strip_important_tokens(value: &mut TokenList) -> bool {
    value.rtrim();
    let ends_with_important = value
        .back()
        .map_or(false, |t| t.kind == TokenKind::Identifier && t.text == "important");
    if !ends_with_important {
        return false;
    }
    let mut copy: Vec<Token> = value.iter().cloned().collect();
    copy.pop();
    while copy.last().map_or(false, Token::is_whitespace) {
        copy.pop();
    }
    if copy.last().map_or(false, |t| t.text == "!") {
        copy.pop();
        let mut rebuilt: TokenList = copy.into_iter().collect();
        rebuilt.trim();
        *value = rebuilt;
        true
    } else {
        false
    }
}

fn strip_important_text(value: &str) -> Option<String> {
    let trimmed = value.trim_end();
    let without = trimmed.strip_suffix("!important")?;
    let without = without.trim_end().strip_suffix('!').map_or_else(
        || without.trim_end().to_string(),
        |s| s.trim_end().to_string(),
    );
    Some(without)
}

/// mixin 调用语句解析结果：选择器路径 + 实参表。
#[derive(Debug)]
pub struct MixinCallNode {
    pub path: Vec<String>,
    pub arguments: Vec<MixinCallArg>,
    pub display: String,
    pub location: SourceLocation,
}

#[derive(Debug, Clone)]
pub struct MixinCallArg {
    pub name: Option<String>,
    pub tokens: TokenList,
}

impl MixinCallNode {
    pub fn parse(statement: &UnprocessedStatement) -> LessResult<Self> {
        let mut tokens = statement.tokens.clone();
        tokens.trim();
        let location = statement.location();
        let display = tokens.render_normalized();

        let all: Vec<Token> = tokens.into_iter().collect();
        let (path_tokens, argument_tokens) = split_call_arguments(&all);

        let mut path = Vec::new();
        let mut current = String::new();
        for token in path_tokens {
            let boundary = token.is_whitespace()
                || (token.kind == TokenKind::Other && token.text == ">");
            if boundary {
                if !current.is_empty() {
                    path.push(std::mem::take(&mut current));
                }
            } else {
                current.push_str(&token.text);
            }
        }
        if !current.is_empty() {
            path.push(current);
        }
        if path.is_empty() {
            return Err(LessError::parse("期待 mixin 名称", location));
        }

        let arguments = match argument_tokens {
            Some(inner) => parse_call_arguments(inner),
            None => Vec::new(),
        };

        Ok(Self {
            path,
            arguments,
            display,
            location,
        })
    }
}

/// 末尾配对的 `( ... )` 是实参表；返回（路径部分, 实参内部）。
fn split_call_arguments(all: &[Token]) -> (&[Token], Option<&[Token]>) {
    if all.last().map(|t| t.kind) != Some(TokenKind::ParenClosed) {
        return (all, None);
    }
    let mut depth = 0usize;
    for (idx, token) in all.iter().enumerate().rev() {
        match token.kind {
            TokenKind::ParenClosed => depth += 1,
            TokenKind::ParenOpen => {
                depth -= 1;
                if depth == 0 {
                    return (&all[..idx], Some(&all[idx + 1..all.len() - 1]));
                }
            }
            _ => {}
        }
    }
    (all, None)
}

fn parse_call_arguments(inner: &[Token]) -> Vec<MixinCallArg> {
    let mut arguments = Vec::new();
    let mut current: Vec<Token> = Vec::new();
    let mut depth = 0usize;

    let mut flush = |entry: &mut Vec<Token>, arguments: &mut Vec<MixinCallArg>| {
        let mut list: TokenList = entry.drain(..).collect();
        list.trim();
        if list.is_empty() {
            return;
        }
        // `@name: value` 形式的命名实参
        let named = list.front().map(|t| t.kind) == Some(TokenKind::AtKeyword)
            && list.at(1).map(|t| t.kind) == Some(TokenKind::Colon);
        if named {
            let name = list.shift().unwrap().text;
            list.shift();
            list.trim();
            arguments.push(MixinCallArg {
                name: Some(name),
                tokens: list,
            });
        } else {
            arguments.push(MixinCallArg {
                name: None,
                tokens: list,
            });
        }
    };

    for token in inner {
        match token.kind {
            TokenKind::ParenOpen | TokenKind::BracketOpen => depth += 1,
            TokenKind::ParenClosed | TokenKind::BracketClosed => {
                depth = depth.saturating_sub(1)
            }
            _ if depth == 0
                && (token.text == ","
                    || (token.kind == TokenKind::Delimiter && token.text == ";")) =>
            {
                flush(&mut current, &mut arguments);
                continue;
            }
            _ => {}
        }
        current.push(token.clone());
    }
    flush(&mut current, &mut arguments);
    arguments
}

/// 解析并执行一条 mixin 调用语句。
/// 实参先在调用方作用域求值；每个匹配体各自入栈、过守卫、展开。
pub fn call_mixin<'a>(
    statement: &UnprocessedStatement,
    target: &mut CssRuleset,
    pending: &mut Vec<CssNode>,
    selector: &Selector,
    ctx: &mut ProcessingContext<'a>,
) -> LessResult<()> {
    let call = MixinCallNode::parse(statement)?;
    let candidates = ctx.get_functions(&call);
    if candidates.is_empty() {
        return Err(LessError::MixinNotFound {
            name: call.display,
            location: call.location,
        });
    }

    let mut evaluated = Vec::with_capacity(call.arguments.len());
    for argument in &call.arguments {
        let mut tokens = argument.tokens.clone();
        ctx.process_value(&mut tokens)?;
        tokens.trim();
        evaluated.push(MixinCallArg {
            name: argument.name.clone(),
            tokens,
        });
    }

    let mut matched = false;
    let mut skipped_recursive = false;
    for candidate in candidates {
        let (ruleset, captured) = match &candidate {
            FunctionRef::Ruleset(r) => (*r, None),
            FunctionRef::Closure(c) => (c.ruleset, Some(c.captured.clone())),
        };

        // 同一函数不允许在栈上出现第二次
        if ctx.is_in_stack(ruleset.fid) {
            skipped_recursive = true;
            continue;
        }
        let arguments = match bind_arguments(&ruleset.selector, &evaluated) {
            Some(map) => map,
            None => continue,
        };

        let saved_stack = captured.map(|stack| ctx.swap_stack(stack));
        // mixin 调用帧是透明帧：体内变量与闭包归属调用方的 savepoint
        if let Err(err) = ctx.push_frame(ruleset, arguments, false) {
            if let Some(saved) = saved_stack {
                ctx.swap_stack(saved);
            }
            return Err(err);
        }
        let outcome = ruleset.match_conditions(ctx).and_then(|guard_ok| {
            if guard_ok {
                ruleset
                    .process_into(target, pending, selector, ctx)
                    .map(|_| true)
            } else {
                Ok(false)
            }
        });
        ctx.pop_frame();
        if let Some(saved) = saved_stack {
            ctx.swap_stack(saved);
        }
        matched |= outcome?;
    }

    if !matched {
        if skipped_recursive {
            return Err(LessError::RecursionLimit {
                limit: ctx.max_depth(),
            });
        }
        return Err(LessError::MixinNotFound {
            name: call.display,
            location: call.location,
        });
    }
    Ok(())
}

/// 位置与命名实参绑定形参，缺省补默认值，多余实参进 rest。
fn bind_arguments(selector: &LessSelector, args: &[MixinCallArg]) -> Option<VariableMap> {
    let mut map = VariableMap::new();
    let mut named: Vec<(&str, &MixinCallArg)> = Vec::new();
    let mut positional: Vec<&MixinCallArg> = Vec::new();
    for arg in args {
        match &arg.name {
            Some(name) => named.push((name.as_str(), arg)),
            None => positional.push(arg),
        }
    }

    let mut positional_iter = positional.into_iter();
    for param in &selector.params {
        if let Some(pos) = named.iter().position(|(name, _)| *name == param.name) {
            let (_, arg) = named.remove(pos);
            map.insert(param.name.clone(), arg.tokens.clone());
        } else if let Some(arg) = positional_iter.next() {
            map.insert(param.name.clone(), arg.tokens.clone());
        } else if let Some(default) = &param.default {
            map.insert(param.name.clone(), default.clone());
        } else {
            return None;
        }
    }

    let leftovers: Vec<&MixinCallArg> = positional_iter.collect();
    if let Some(rest_name) = &selector.rest {
        let mut rest = TokenList::new();
        for (idx, arg) in leftovers.iter().enumerate() {
            if idx > 0 {
                rest.push_back(Token::space());
            }
            rest.append(arg.tokens.clone());
        }
        map.insert(rest_name.clone(), rest);
    } else if !leftovers.is_empty() || !named.is_empty() {
        return None;
    }

    Some(map)
}

impl LessAtRule {
    /// at-rule 展开：前缀为空时声明直接挂在 at-rule 上，
    /// 否则包进以前缀为选择器的内层规则（选择器冒泡）。
    pub fn process<'a>(
        &'a self,
        output: &mut Vec<CssNode>,
        prefix: &Selector,
        ctx: &mut ProcessingContext<'a>,
    ) -> LessResult<()> {
        let params = self.process_params(ctx)?;

        ctx.push_frame(&self.body, VariableMap::new(), true)?;
        let mut scoped = CssRuleset::new(prefix.clone());
        let mut pending = Vec::new();
        let result = self
            .body
            .process_into(&mut scoped, &mut pending, prefix, ctx);
        ctx.pop_frame();
        result?;

        let mut shell = CssAtRule {
            name: self.name.clone(),
            params,
            declarations: Vec::new(),
            children: Vec::new(),
        };
        if prefix.is_empty() {
            shell.declarations = scoped.declarations;
        } else if !scoped.declarations.is_empty() {
            shell.children.push(CssNode::Ruleset(scoped));
        }
        shell.children.append(&mut pending);
        output.push(CssNode::AtRule(shell));
        Ok(())
    }

    /// 参数里的变量引用与插值替换；其余 token 原样保留。
    fn process_params(&self, ctx: &ProcessingContext<'_>) -> LessResult<String> {
        let mut out = TokenList::new();
        for token in self.params.clone() {
            let mut token = token;
            if token.kind == TokenKind::AtKeyword {
                if let Some(bound) = ctx.get_variable(&token.text) {
                    let mut cloned = bound;
                    ctx.process_value(&mut cloned)?;
                    cloned.trim();
                    out.append(cloned);
                    continue;
                }
            }
            ctx.interpolate_token(&mut token)?;
            out.push_back(token);
        }
        Ok(out.render_normalized())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use pretty_assertions::assert_eq;

    fn statement(src: &str) -> UnprocessedStatement {
        let tokens: TokenList = tokenize(src, "t").unwrap().into_iter().collect();
        UnprocessedStatement {
            tokens,
            property_end: 0,
        }
    }

    #[test]
    fn call_parse_splits_path_and_arguments() {
        let call = MixinCallNode::parse(&statement(".rounded(8px, #fff)")).unwrap();
        assert_eq!(call.path, vec![".rounded".to_string()]);
        assert_eq!(call.arguments.len(), 2);
        assert_eq!(call.arguments[0].tokens.render(), "8px");
        assert_eq!(call.arguments[1].tokens.render(), "#fff");
    }

    #[test]
    fn call_parse_supports_nested_path() {
        let call = MixinCallNode::parse(&statement("#ns > .mixin")).unwrap();
        assert_eq!(call.path, vec!["#ns".to_string(), ".mixin".to_string()]);
        assert!(call.arguments.is_empty());
    }

    #[test]
    fn call_parse_detects_named_arguments() {
        let call = MixinCallNode::parse(&statement(".m(@b: 2px, 1px)")).unwrap();
        assert_eq!(call.arguments[0].name.as_deref(), Some("@b"));
        assert_eq!(call.arguments[0].tokens.render(), "2px");
        assert!(call.arguments[1].name.is_none());
    }

    #[test]
    fn important_tokens_are_stripped() {
        let mut value: TokenList = tokenize("10px !important", "t")
            .unwrap()
            .into_iter()
            .collect();
        assert!(strip_important_tokens(&mut value));
        assert_eq!(value.render(), "10px");

        let mut plain: TokenList = tokenize("10px", "t").unwrap().into_iter().collect();
        assert!(!strip_important_tokens(&mut plain));
    }

    #[test]
    fn bind_arguments_applies_defaults_and_named() {
        let selector = LessSelector::parse(
            tokenize(".m(@a, @b: 4px)", "t").unwrap().into_iter().collect(),
        );
        let args = vec![MixinCallArg {
            name: None,
            tokens: tokenize("1px", "t").unwrap().into_iter().collect(),
        }];
        let map = bind_arguments(&selector, &args).unwrap();
        assert_eq!(map.get("@a").unwrap().render(), "1px");
        assert_eq!(map.get("@b").unwrap().render(), "4px");

        let named = vec![MixinCallArg {
            name: Some("@b".to_string()),
            tokens: tokenize("9px", "t").unwrap().into_iter().collect(),
        }];
        assert!(bind_arguments(&selector, &named).is_none()); // @a 缺失

        let args = vec![
            MixinCallArg {
                name: Some("@b".to_string()),
                tokens: tokenize("9px", "t").unwrap().into_iter().collect(),
            },
            MixinCallArg {
                name: None,
                tokens: tokenize("1px", "t").unwrap().into_iter().collect(),
            },
        ];
        let map = bind_arguments(&selector, &args).unwrap();
        assert_eq!(map.get("@a").unwrap().render(), "1px");
        assert_eq!(map.get("@b").unwrap().render(), "9px");
    }

    #[test]
    fn bind_arguments_collects_rest() {
        let selector = LessSelector::parse(
            tokenize(".m(@first, @rest...)", "t").unwrap().into_iter().collect(),
        );
        let args: Vec<MixinCallArg> = ["1px", "2px", "3px"]
            .iter()
            .map(|src| MixinCallArg {
                name: None,
                tokens: tokenize(src, "t").unwrap().into_iter().collect(),
            })
            .collect();
        let map = bind_arguments(&selector, &args).unwrap();
        assert_eq!(map.get("@first").unwrap().render(), "1px");
        assert_eq!(map.get("@rest").unwrap().render(), "2px 3px");
    }
}
