use std::collections::HashMap;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::error::{LessError, LessResult};
use crate::extend::Extension;
use crate::processor::{ValueProcessor, VariableScope};
use crate::ruleset::{LessRuleset, MixinCallNode};
use crate::stylesheet::LessStylesheet;
use crate::token::{Token, TokenList};

/// mixin 体的稳定标识，解析期按构造顺序分配。
/// 以数值 id 代替对象地址作为 Function 身份。
pub type FunctionId = usize;

pub type VariableMap = IndexMap<String, TokenList>;

/// mixin 调用栈帧。savepoint 帧拥有自己的变量/闭包作用域，
/// 非 savepoint 帧在 `save_point()` 查找时被跳过。
#[derive(Debug)]
pub struct MixinFrame<'a> {
    pub function: FunctionId,
    pub ruleset: &'a LessRuleset,
    pub arguments: VariableMap,
    pub savepoint: bool,
}

/// 捕获了定义时调用栈的规则集，让离开词法作用域的 mixin
/// 仍能从捕获位置解析名字。
#[derive(Debug, Clone)]
pub struct Closure<'a> {
    pub ruleset: &'a LessRuleset,
    pub captured: Vec<Rc<MixinFrame<'a>>>,
}

/// mixin 解析结果：普通规则集或携带捕获栈的闭包。
#[derive(Debug, Clone)]
pub enum FunctionRef<'a> {
    Ruleset(&'a LessRuleset),
    Closure(Closure<'a>),
}

impl<'a> FunctionRef<'a> {
    pub fn fid(&self) -> FunctionId {
        match self {
            FunctionRef::Ruleset(r) => r.fid,
            FunctionRef::Closure(c) => c.ruleset.fid,
        }
    }
}

/// 一次编译的全部求值状态：调用栈、作用域变量、闭包与扩展收集。
pub struct ProcessingContext<'a> {
    stylesheet: &'a LessStylesheet,
    stack: Vec<Rc<MixinFrame<'a>>>,
    variables: HashMap<FunctionId, VariableMap>,
    closures: HashMap<FunctionId, Vec<Closure<'a>>>,
    base_variables: VariableMap,
    base_closures: Vec<Closure<'a>>,
    extensions: Vec<Extension>,
    processor: ValueProcessor,
    /// 与栈切换无关的真实调用深度，防止闭包换栈绕过上限。
    call_depth: usize,
    max_depth: usize,
}

impl<'a> ProcessingContext<'a> {
    pub fn new(stylesheet: &'a LessStylesheet, max_depth: usize) -> Self {
        Self {
            stylesheet,
            stack: Vec::new(),
            variables: HashMap::new(),
            closures: HashMap::new(),
            base_variables: VariableMap::new(),
            base_closures: Vec::new(),
            extensions: Vec::new(),
            processor: ValueProcessor::new(),
            call_depth: 0,
            max_depth,
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn max_depth(&self) -> usize {
        self.max_depth
    }

    /// 压入一个调用帧；超过深度上限时报 RecursionLimit。
    pub fn push_frame(
        &mut self,
        ruleset: &'a LessRuleset,
        arguments: VariableMap,
        savepoint: bool,
    ) -> LessResult<()> {
        if self.call_depth >= self.max_depth {
            return Err(LessError::RecursionLimit {
                limit: self.max_depth,
            });
        }
        self.call_depth += 1;
        self.stack.push(Rc::new(MixinFrame {
            function: ruleset.fid,
            ruleset,
            arguments,
            savepoint,
        }));
        Ok(())
    }

    pub fn pop_frame(&mut self) {
        self.stack.pop();
        self.call_depth = self.call_depth.saturating_sub(1);
    }

    /// 闭包调用时切换到捕获栈，返回原栈供恢复。
    pub fn swap_stack(
        &mut self,
        stack: Vec<Rc<MixinFrame<'a>>>,
    ) -> Vec<Rc<MixinFrame<'a>>> {
        std::mem::replace(&mut self.stack, stack)
    }

    pub fn is_in_stack(&self, function: FunctionId) -> bool {
        self.stack.iter().any(|frame| frame.function == function)
    }

    pub fn is_save_point(&self) -> bool {
        self.stack.last().map_or(false, |frame| frame.savepoint)
    }

    /// 最近的 savepoint 帧的函数身份。
    pub fn save_point(&self) -> Option<FunctionId> {
        self.stack
            .iter()
            .rev()
            .find(|frame| frame.savepoint)
            .map(|frame| frame.function)
    }

    /// 把变量合并进当前 savepoint 函数的作用域（无栈时进基础作用域），
    /// 同名覆盖。
    pub fn add_variables(&mut self, variables: &VariableMap) {
        let slot = match self.save_point() {
            Some(fid) => self.variables.entry(fid).or_default(),
            None => &mut self.base_variables,
        };
        for (name, value) in variables {
            slot.insert(name.clone(), value.clone());
        }
    }

    /// 记录一个闭包：快照当前栈（Rc 共享，非复制变量）。
    pub fn add_closure(&mut self, ruleset: &'a LessRuleset) {
        if self.stack.is_empty() {
            self.base_closures.push(Closure {
                ruleset,
                captured: Vec::new(),
            });
            return;
        }
        let closure = Closure {
            ruleset,
            captured: self.stack.clone(),
        };
        match self.save_point() {
            Some(fid) => self.closures.entry(fid).or_default().push(closure),
            None => self.base_closures.push(closure),
        }
    }

    /// 变量查找链：栈帧实参 → 帧函数作用域变量 →（自顶向下）→
    /// 基础作用域 → 顶层样式表。
    pub fn get_variable(&self, name: &str) -> Option<TokenList> {
        for frame in self.stack.iter().rev() {
            if let Some(value) = frame.arguments.get(name) {
                return Some(value.clone());
            }
            if let Some(scope) = self.variables.get(&frame.function) {
                if let Some(value) = scope.get(name) {
                    return Some(value.clone());
                }
            }
        }
        if let Some(value) = self.base_variables.get(name) {
            return Some(value.clone());
        }
        self.stylesheet.variable(name)
    }

    /// 解析 mixin 调用：当前帧函数体的嵌套规则 → 该函数的闭包 →
    /// 外层帧 → 基础闭包 → 顶层样式表。找到即止。
    pub fn get_functions(&self, call: &MixinCallNode) -> Vec<FunctionRef<'a>> {
        let argc = call.arguments.len();
        let mut found: Vec<FunctionRef<'a>> = Vec::new();

        for frame in self.stack.iter().rev() {
            let mut matches: Vec<&'a LessRuleset> = Vec::new();
            frame.ruleset.find_inner(&call.path, argc, &mut matches);
            for ruleset in matches {
                push_unique(&mut found, FunctionRef::Ruleset(ruleset));
            }
            if let Some(closures) = self.closures.get(&frame.function) {
                for closure in closures {
                    let mut matches: Vec<&'a LessRuleset> = Vec::new();
                    closure.ruleset.collect_matches(&call.path, argc, &mut matches);
                    for ruleset in matches {
                        push_unique(
                            &mut found,
                            FunctionRef::Closure(Closure {
                                ruleset,
                                captured: closure.captured.clone(),
                            }),
                        );
                    }
                }
            }
            if !found.is_empty() {
                return found;
            }
        }

        for closure in &self.base_closures {
            let mut matches: Vec<&'a LessRuleset> = Vec::new();
            closure.ruleset.collect_matches(&call.path, argc, &mut matches);
            for ruleset in matches {
                push_unique(
                    &mut found,
                    FunctionRef::Closure(Closure {
                        ruleset,
                        captured: closure.captured.clone(),
                    }),
                );
            }
        }
        if !found.is_empty() {
            return found;
        }

        let mut matches: Vec<&'a LessRuleset> = Vec::new();
        self.stylesheet.find_rulesets(&call.path, argc, &mut matches);
        for ruleset in matches {
            push_unique(&mut found, FunctionRef::Ruleset(ruleset));
        }
        found
    }

    pub fn add_extension(&mut self, extension: Extension) {
        self.extensions.push(extension);
    }

    pub fn extensions(&self) -> &[Extension] {
        &self.extensions
    }

    // 求值器的上下文封装：作用域即自身。

    pub fn process_value(&self, value: &mut TokenList) -> LessResult<()> {
        self.processor.process_value(value, self)
    }

    pub fn validate_condition(&self, value: &mut TokenList) -> LessResult<bool> {
        self.processor.validate_condition(value, self)
    }

    pub fn interpolate_list(&self, tokens: &mut TokenList) -> LessResult<()> {
        self.processor.interpolate_list(tokens, self)
    }

    pub fn interpolate_token(&self, token: &mut Token) -> LessResult<()> {
        self.processor.interpolate_token(token, self)
    }
}

impl<'a> VariableScope for ProcessingContext<'a> {
    fn variable(&self, name: &str) -> Option<TokenList> {
        self.get_variable(name)
    }
}

fn push_unique<'a>(found: &mut Vec<FunctionRef<'a>>, item: FunctionRef<'a>) {
    if found.iter().any(|existing| existing.fid() == item.fid()) {
        return;
    }
    found.push(item);
}
