use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{LessError, LessResult, SourceLocation};
use crate::functions::{FunctionLibrary, LIBRARY};
use crate::token::{Token, TokenKind, TokenList};
use crate::utils::strip_quotes;
use crate::value::{
    self, is_known_unit, ColorValue, NumberValue, Operator, StringValue, UrlValue, Value,
};

/// 字面量里的 `@{name}` 插值片段。
static INTERPOLATION_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"@\{([0-9A-Za-z_-]+)\}").expect("插值正则编译失败"));

/// 变量作用域查询接口，由 ProcessingContext 实现。
/// 返回绑定的 token 序列副本，未绑定时为 None。
pub trait VariableScope {
    fn variable(&self, name: &str) -> Option<TokenList>;
}

/// 空作用域，测试与独立求值时使用。
pub struct EmptyScope;

impl VariableScope for EmptyScope {
    fn variable(&self, _name: &str) -> Option<TokenList> {
        None
    }
}

/// 值表达式求值器：把一段右值 token 序列就地改写为完全求值后的形式。
pub struct ValueProcessor {
    library: &'static FunctionLibrary,
}

impl Default for ValueProcessor {
    fn default() -> Self {
        Self::new()
    }
}

impl ValueProcessor {
    pub fn new() -> Self {
        Self { library: &LIBRARY }
    }

    /// 序列里没有变量、库函数调用、运算符或 `~"…"` 转义时无需求值，
    /// 只对字面量做插值。
    pub fn needs_processing(&self, value: &TokenList) -> bool {
        let tokens: Vec<&Token> = value.iter().collect();
        for (idx, token) in tokens.iter().enumerate() {
            match token.kind {
                TokenKind::AtKeyword | TokenKind::Url => return true,
                TokenKind::Identifier => {
                    if tokens.get(idx + 1).map(|t| t.kind) == Some(TokenKind::ParenOpen)
                        && self.library.exists(&token.text)
                    {
                        return true;
                    }
                }
                TokenKind::Other => {
                    if token.text.len() == 1 && "+-*/".contains(&token.text) {
                        return true;
                    }
                    if token.text == "~"
                        && tokens.get(idx + 1).map(|t| t.kind) == Some(TokenKind::String)
                    {
                        return true;
                    }
                }
                _ => {}
            }
        }
        false
    }

    /// 值求值主循环：逐段解析子表达式并按空白策略拼接输出。
    pub fn process_value(
        &self,
        value: &mut TokenList,
        scope: &dyn VariableScope,
    ) -> LessResult<()> {
        if !self.needs_processing(value) {
            for token in value.iter_mut() {
                self.interpolate_token(token, scope)?;
            }
            return Ok(());
        }

        let mut out = TokenList::new();
        while !value.is_empty() {
            let produced = self.process_statement(value, scope)?;

            if produced.is_some() || !value.is_empty() {
                let suppress = match out.back() {
                    None => true,
                    Some(last) => {
                        !needs_space(last, false)
                            || (produced.is_none()
                                && value.front().map_or(true, |next| !needs_space(next, true)))
                    }
                };
                if !suppress {
                    out.push_back(Token::space());
                }
            }

            match produced {
                Some(v) => out.append(v.to_tokens()),
                None => {
                    let front = match value.front() {
                        Some(token) => token.clone(),
                        None => break,
                    };
                    if front.kind == TokenKind::AtKeyword {
                        match scope.variable(&front.text) {
                            Some(bound) => {
                                // 变量绑定的不是单一值表达式，递归整体求值后拼接
                                value.shift();
                                let mut cloned = bound;
                                self.process_value(&mut cloned, scope)?;
                                out.append(cloned);
                            }
                            None => {
                                return Err(LessError::VariableNotFound {
                                    name: front.text.clone(),
                                    location: front.location(),
                                })
                            }
                        }
                    } else if let Some(deep) = self.resolve_deep_variable(value, scope) {
                        value.shift();
                        value.shift();
                        let mut cloned = deep;
                        self.process_value(&mut cloned, scope)?;
                        out.append(cloned);
                    } else if value.len() > 2
                        && front.kind == TokenKind::Identifier
                        && value.at(1).map(|t| t.kind) == Some(TokenKind::ParenOpen)
                    {
                        // 未注册的函数调用原样透传，交给后续 CSS 处理
                        out.push_back(value.shift().unwrap());
                        out.push_back(value.shift().unwrap());
                    } else {
                        out.push_back(value.shift().unwrap());
                    }
                }
            }
        }

        *value = out;
        Ok(())
    }

    /// 解析 `constant (op constant)*`，返回求得的值；首个 token 无法
    /// 构成常量时返回 None 且不消费。
    pub fn process_statement(
        &self,
        value: &mut TokenList,
        scope: &dyn VariableScope,
    ) -> LessResult<Option<Value>> {
        value.ltrim();
        let mut current = match self.process_constant(value, scope)? {
            Some(v) => v,
            None => return Ok(None),
        };
        value.ltrim();

        while let Some(combined) = self.process_operator(value, &current, None, scope)? {
            current = combined;
            value.ltrim();
        }
        Ok(Some(current))
    }

    /// 运算符优先级爬升：遇到严格更高优先级的运算符时向右递归。
    fn process_operator(
        &self,
        value: &mut TokenList,
        lhs: &Value,
        last: Option<Operator>,
        scope: &dyn VariableScope,
    ) -> LessResult<Option<Value>> {
        let op = match self.peek_operator(value) {
            Some(op) => op,
            None => return Ok(None),
        };
        if let Some(last_op) = last {
            if op.precedence() <= last_op.precedence() {
                return Ok(None);
            }
        }
        self.consume_operator(value, op);
        value.ltrim();

        let mut rhs = match self.process_constant(value, scope)? {
            Some(v) => v,
            None => {
                let (got, location) = match value.front() {
                    Some(token) => (token.text.clone(), token.location()),
                    None => ("行尾".to_string(), SourceLocation::unknown()),
                };
                return Err(LessError::expected("常量或 @ 变量", got, location));
            }
        };
        value.ltrim();

        while let Some(combined) = self.process_operator(value, &rhs, Some(op), scope)? {
            rhs = combined;
            value.ltrim();
        }

        Ok(Some(value::apply(lhs, op, &rhs)?))
    }

    fn peek_operator(&self, value: &TokenList) -> Option<Operator> {
        let front = value.front()?;
        if front.kind != TokenKind::Other || front.text.len() != 1 {
            return None;
        }
        if !"+-*/=<>".contains(&front.text) {
            return None;
        }
        // 双字符运算符（>=、=<、<=）合并为一个
        if let Some(second) = value.at(1) {
            if second.kind == TokenKind::Other {
                let joined = format!("{}{}", front.text, second.text);
                if matches!(joined.as_str(), ">=" | "=<" | "<=") {
                    return Operator::from_str(&joined);
                }
            }
        }
        Operator::from_str(&front.text)
    }

    fn consume_operator(&self, value: &mut TokenList, op: Operator) {
        value.shift();
        if matches!(op, Operator::GreaterEq | Operator::LessEq) {
            // 第二个字符仅在确实组成双字符运算符时被消费
            if value.front().map_or(false, |t| {
                t.kind == TokenKind::Other && (t.text == "=" || t.text == "<")
            }) {
                value.shift();
            }
        }
    }

    /// 按首 token 类别解析一个常量值。
    fn process_constant(
        &self,
        value: &mut TokenList,
        scope: &dyn VariableScope,
    ) -> LessResult<Option<Value>> {
        let front = match value.front() {
            Some(token) => token.clone(),
            None => return Ok(None),
        };

        match front.kind {
            TokenKind::Hash => {
                let color = ColorValue::from_token(&front)?;
                value.shift();
                Ok(Some(Value::Color(color)))
            }
            TokenKind::Number | TokenKind::Percentage | TokenKind::Dimension => {
                let number = NumberValue::from_token(&front)?;
                value.shift();
                Ok(Some(Value::Number(number)))
            }
            TokenKind::AtKeyword => {
                let bound = match scope.variable(&front.text) {
                    Some(bound) => bound,
                    None => return Ok(None),
                };
                let mut cloned = bound;
                let produced = self.process_statement(&mut cloned, scope)?;
                cloned.ltrim();
                if !cloned.is_empty() {
                    // 绑定不是单一值表达式，留给上层整体处理
                    return Ok(None);
                }
                match produced {
                    Some(v) => {
                        value.shift();
                        Ok(Some(v))
                    }
                    None => Ok(None),
                }
            }
            TokenKind::String => {
                let mut token = value.shift().unwrap();
                self.interpolate_token(&mut token, scope)?;
                Ok(Some(Value::Str(StringValue::from_string_token(&token))))
            }
            TokenKind::Url => {
                let mut token = value.shift().unwrap();
                self.interpolate_token(&mut token, scope)?;
                Ok(Some(Value::Url(UrlValue::from_token(&token))))
            }
            TokenKind::Identifier => {
                if value.at(1).map(|t| t.kind) == Some(TokenKind::ParenOpen) {
                    if self.library.exists(&front.text) {
                        value.shift();
                        value.shift();
                        return self.process_function(&front.text, value, scope).map(Some);
                    }
                    return Ok(None);
                }
                if is_known_unit(&front.text) {
                    value.shift();
                    return Ok(Some(Value::Unit(front.text.clone())));
                }
                if front.text == "true" {
                    value.shift();
                    return Ok(Some(Value::Boolean(true)));
                }
                let mut token = value.shift().unwrap();
                self.interpolate_token(&mut token, scope)?;
                Ok(Some(Value::Str(StringValue::unquoted(token.text))))
            }
            TokenKind::ParenOpen => {
                let open = value.shift().unwrap();
                let produced = self.process_statement(value, scope)?;
                value.ltrim();

                if value.is_empty() {
                    return Err(LessError::expected(")", "行尾", open.location()));
                }
                if let Some(v) = produced {
                    if value.front().map(|t| t.kind) == Some(TokenKind::ParenClosed) {
                        value.shift();
                        return Ok(Some(v));
                    }
                    // 括号里不是单一表达式，恢复现场
                    value.prepend(v.to_tokens());
                }
                value.push_front(open);
                Ok(None)
            }
            TokenKind::Other => {
                if let Some(deep) = self.resolve_deep_variable(value, scope) {
                    let mut cloned = deep;
                    let produced = self.process_statement(&mut cloned, scope)?;
                    if produced.is_some() {
                        value.shift();
                        value.shift();
                    }
                    return Ok(produced);
                }
                if front.text == "%"
                    && value.len() > 2
                    && value.at(1).map(|t| t.kind) == Some(TokenKind::ParenOpen)
                {
                    value.shift();
                    value.shift();
                    return self.process_function("%", value, scope).map(Some);
                }
                if let Some(escaped) = self.process_escape(value, scope)? {
                    return Ok(Some(escaped));
                }
                if let Some(negated) = self.process_negative(value, scope)? {
                    return Ok(Some(negated));
                }
                Ok(None)
            }
            _ => Ok(None),
        }
    }

    /// `~"…"` 转义：插值后去引号，作为未加引号的字符串返回。
    fn process_escape(
        &self,
        value: &mut TokenList,
        scope: &dyn VariableScope,
    ) -> LessResult<Option<Value>> {
        let is_escape = value.front().map_or(false, |t| t.text == "~")
            && value.at(1).map(|t| t.kind) == Some(TokenKind::String);
        if !is_escape {
            return Ok(None);
        }
        value.shift();
        let mut token = value.shift().unwrap();
        self.interpolate_token(&mut token, scope)?;
        Ok(Some(Value::Str(StringValue::unquoted(strip_quotes(
            &token.text,
        )))))
    }

    /// 取负：`-` 后紧跟常量时计算 `0 - constant`，否则恢复现场。
    fn process_negative(
        &self,
        value: &mut TokenList,
        scope: &dyn VariableScope,
    ) -> LessResult<Option<Value>> {
        if value.front().map_or(true, |t| t.text != "-") {
            return Ok(None);
        }
        let minus = value.shift().unwrap();
        value.ltrim();
        let constant = self.process_constant(value, scope)?;
        match constant {
            Some(v) => {
                let zero = Value::Number(NumberValue::bare(0.0));
                Ok(Some(value::apply(&zero, Operator::Subtract, &v)?))
            }
            None => {
                value.push_front(minus);
                Ok(None)
            }
        }
    }

    /// `@@name`：`@name` 的字符串值作为另一个变量的名字。
    /// 绑定不是单个带引号字符串时返回 None。
    fn resolve_deep_variable(
        &self,
        value: &TokenList,
        scope: &dyn VariableScope,
    ) -> Option<TokenList> {
        let first = value.front()?;
        let second = value.at(1)?;
        if first.kind != TokenKind::Other || first.text != "@" {
            return None;
        }
        if second.kind != TokenKind::AtKeyword {
            return None;
        }
        let mut bound = scope.variable(&second.text)?;
        bound.trim();
        if bound.len() != 1 || bound.front().map(|t| t.kind) != Some(TokenKind::String) {
            return None;
        }
        let key = format!("@{}", strip_quotes(&bound.front().unwrap().text));
        scope.variable(&key)
    }

    /// 消费 `(` 之后的逗号/分号分隔实参表，终止于 `)`。
    fn process_arguments(
        &self,
        value: &mut TokenList,
        scope: &dyn VariableScope,
    ) -> LessResult<Vec<Value>> {
        let mut arguments = Vec::new();

        if value.is_empty() {
            return Err(LessError::expected(")", "值结束", SourceLocation::unknown()));
        }

        value.ltrim();
        if value.front().map(|t| t.kind) != Some(TokenKind::ParenClosed) {
            match self.process_statement(value, scope)? {
                Some(v) => arguments.push(v),
                None => {
                    let token = value.shift().unwrap();
                    arguments.push(Value::Str(StringValue::unquoted(token.text)));
                }
            }
            value.ltrim();
        }

        while value
            .front()
            .map_or(false, |t| t.text == "," || t.text == ";")
        {
            value.shift();
            value.ltrim();
            match self.process_statement(value, scope)? {
                Some(v) => arguments.push(v),
                None => {
                    if value.front().map(|t| t.kind) != Some(TokenKind::ParenClosed) {
                        let token = value.shift().unwrap();
                        arguments.push(Value::Str(StringValue::unquoted(token.text)));
                    }
                }
            }
            value.ltrim();
        }

        match value.front() {
            None => Err(LessError::expected(")", "值结束", SourceLocation::unknown())),
            Some(token) if token.kind != TokenKind::ParenClosed => Err(LessError::expected(
                ")",
                token.text.clone(),
                token.location(),
            )),
            Some(_) => {
                value.shift();
                Ok(arguments)
            }
        }
    }

    fn process_function(
        &self,
        name: &str,
        value: &mut TokenList,
        scope: &dyn VariableScope,
    ) -> LessResult<Value> {
        let arguments = self.process_arguments(value, scope)?;
        self.library.call(name, &arguments)
    }

    /// mixin 守卫：`and`/`,` 连接的布尔语句，全部为真才通过。
    pub fn validate_condition(
        &self,
        value: &mut TokenList,
        scope: &dyn VariableScope,
    ) -> LessResult<bool> {
        let mut result = self.validate_value(value, scope)?;
        value.ltrim();

        while result
            && value
                .front()
                .map_or(false, |t| t.text == "and" || t.text == ",")
        {
            value.shift();
            value.ltrim();
            result = self.validate_value(value, scope)?;
            value.ltrim();
        }
        Ok(result)
    }

    fn validate_value(&self, value: &mut TokenList, scope: &dyn VariableScope) -> LessResult<bool> {
        let produced = self.process_statement(value, scope)?;
        let v = match produced {
            Some(v) => v,
            None => {
                let (got, location) = match value.front() {
                    Some(token) => (token.text.clone(), token.location()),
                    None => ("行尾".to_string(), SourceLocation::unknown()),
                };
                return Err(LessError::expected("条件表达式", got, location));
            }
        };
        match v {
            Value::Boolean(b) => Ok(b),
            other => Ok(value::apply(&other, Operator::Equal, &Value::Boolean(true))?.is_truthy()),
        }
    }

    /// 对整段 token 序列做 `@{name}` 插值。
    pub fn interpolate_list(
        &self,
        tokens: &mut TokenList,
        scope: &dyn VariableScope,
    ) -> LessResult<()> {
        for token in tokens.iter_mut() {
            self.interpolate_token(token, scope)?;
        }
        Ok(())
    }

    /// 替换字面量中的 `@{name}`：值经完整求值；绑定是单个带引号
    /// 字符串时剥掉一层引号；未绑定的片段保留原样。
    pub fn interpolate_token(
        &self,
        token: &mut Token,
        scope: &dyn VariableScope,
    ) -> LessResult<()> {
        if !matches!(
            token.kind,
            TokenKind::String | TokenKind::Url | TokenKind::Identifier | TokenKind::AtKeyword
        ) {
            return Ok(());
        }
        if !token.text.contains("@{") {
            return Ok(());
        }

        let text = token.text.clone();
        let mut result = String::with_capacity(text.len());
        let mut last = 0;
        for caps in INTERPOLATION_RE.captures_iter(&text) {
            let whole = caps.get(0).unwrap();
            let key = format!("@{}", &caps[1]);
            match scope.variable(&key) {
                Some(bound) => {
                    let mut cloned = bound;
                    self.process_value(&mut cloned, scope)?;
                    cloned.trim();
                    let rendered = if cloned.len() == 1
                        && cloned.front().map(|t| t.kind) == Some(TokenKind::String)
                    {
                        strip_quotes(&cloned.front().unwrap().text)
                    } else {
                        cloned.render()
                    };
                    result.push_str(&text[last..whole.start()]);
                    result.push_str(&rendered);
                }
                None => {
                    result.push_str(&text[last..whole.end()]);
                }
            }
            last = whole.end();
        }
        result.push_str(&text[last..]);
        token.text = result;
        Ok(())
    }
}

/// 空白策略：`, : = .` 与冒号两侧、开括号之后、闭括号之前不补空格。
fn needs_space(token: &Token, before: bool) -> bool {
    if token.kind == TokenKind::Other
        && token.text.len() == 1
        && ",:=.".contains(&token.text)
    {
        return false;
    }
    if token.kind == TokenKind::Colon {
        return false;
    }
    !(token.kind == TokenKind::ParenOpen
        || (before && token.kind == TokenKind::ParenClosed))
}
