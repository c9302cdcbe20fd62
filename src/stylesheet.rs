use crate::context::{ProcessingContext, VariableMap};
use crate::css::{CssNode, CssRuleset, CssStylesheet};
use crate::error::{LessError, LessResult};
use crate::ruleset::{call_mixin, LessAtRule, LessRuleset, UnprocessedStatement};
use crate::selector::Selector;
use crate::token::TokenList;

/// 顶层 @import。`.css` 目标或显式 (css) 选项时原样透传。
#[derive(Debug, Clone)]
pub struct ImportStatement {
    pub raw: String,
    pub path: Option<String>,
    pub is_css: bool,
}

/// 顶层成员，保持源顺序。
#[derive(Debug, Clone)]
pub enum LessItem {
    Ruleset(LessRuleset),
    AtRule(LessAtRule),
    Import(ImportStatement),
    MixinCall(UnprocessedStatement),
    /// 无块体 at-rule（@charset 等）原样透传。
    Verbatim(String),
}

/// 解析后的 LESS 样式表：插入序变量表 + 顶层成员。
#[derive(Debug, Clone, Default)]
pub struct LessStylesheet {
    pub variables: VariableMap,
    pub items: Vec<LessItem>,
}

impl LessStylesheet {
    pub fn variable(&self, name: &str) -> Option<TokenList> {
        self.variables.get(name).cloned()
    }

    /// 顶层 mixin 查找：逐个顶层规则按调用路径匹配。
    pub fn find_rulesets<'a>(
        &'a self,
        path: &[String],
        argc: usize,
        out: &mut Vec<&'a LessRuleset>,
    ) {
        for item in &self.items {
            if let LessItem::Ruleset(ruleset) = item {
                ruleset.collect_matches(path, argc, out);
            }
        }
    }

    /// 整表求值：顶层成员依序物化进 CSS 输出。
    pub fn process<'a>(
        &'a self,
        ctx: &mut ProcessingContext<'a>,
        css: &mut CssStylesheet,
    ) -> LessResult<()> {
        for item in &self.items {
            match item {
                LessItem::Ruleset(ruleset) => {
                    // 参数化选择器是 mixin 定义，不直接输出
                    if !ruleset.selector.parametric {
                        ruleset.process(&mut css.nodes, &Selector::empty(), ctx)?;
                    }
                }
                LessItem::AtRule(at_rule) => {
                    at_rule.process(&mut css.nodes, &Selector::empty(), ctx)?;
                }
                LessItem::Import(import) => {
                    css.imports.push(import.raw.clone());
                }
                LessItem::MixinCall(statement) => {
                    let mut holder = CssRuleset::new(Selector::empty());
                    let mut pending = Vec::new();
                    call_mixin(statement, &mut holder, &mut pending, &Selector::empty(), ctx)?;
                    if !holder.declarations.is_empty() {
                        return Err(LessError::parse(
                            "顶层 mixin 调用产生了无法附加的声明",
                            statement.location(),
                        ));
                    }
                    css.nodes.append(&mut pending);
                }
                LessItem::Verbatim(raw) => {
                    css.nodes.push(CssNode::Verbatim(raw.clone()));
                }
            }
        }
        Ok(())
    }
}
