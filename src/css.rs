use crate::selector::Selector;

/// 求值完成后的扁平 CSS 模型，序列化器据此输出文本。
#[derive(Debug, Clone, Default)]
pub struct CssStylesheet {
    pub imports: Vec<String>,
    pub nodes: Vec<CssNode>,
}

#[derive(Debug, Clone)]
pub enum CssNode {
    Ruleset(CssRuleset),
    AtRule(CssAtRule),
    /// 无块体的 at-rule（如 @charset）原样透传。
    Verbatim(String),
}

#[derive(Debug, Clone)]
pub struct CssRuleset {
    pub selector: Selector,
    pub declarations: Vec<CssDeclaration>,
}

impl CssRuleset {
    pub fn new(selector: Selector) -> Self {
        Self {
            selector,
            declarations: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CssDeclaration {
    pub property: String,
    pub value: String,
    pub important: bool,
}

/// 带块体的 at-rule（@media、@font-face、@keyframes、@supports）。
/// declarations 直接挂在 at-rule 上，children 是内部的完整节点。
#[derive(Debug, Clone)]
pub struct CssAtRule {
    pub name: String,
    pub params: String,
    pub declarations: Vec<CssDeclaration>,
    pub children: Vec<CssNode>,
}
