use crate::css::{CssNode, CssStylesheet};
use crate::selector::Selector;
use crate::token::TokenList;

/// 扩展匹配模式：部分精确相等，或（`all`）部分内子串改写。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtensionMode {
    Exact,
    All,
}

/// 求值阶段收集的 `:extend(...)` 指令。
#[derive(Debug, Clone)]
pub struct Extension {
    pub target: Selector,
    pub replacement: Selector,
    pub mode: ExtensionMode,
}

/// 扩展改写的传递迭代上限。
const MAX_PASSES: usize = 32;

/// 对已物化的 CSS 树应用所有扩展：目标选择器命中的规则追加
/// replacement 部分；传递闭包迭代到不动点为止。
pub fn rewrite(stylesheet: &mut CssStylesheet, extensions: &[Extension]) {
    if extensions.is_empty() {
        return;
    }
    for _ in 0..MAX_PASSES {
        let mut changed = false;
        for node in stylesheet.nodes.iter_mut() {
            changed |= rewrite_node(node, extensions);
        }
        if !changed {
            return;
        }
    }
}

fn rewrite_node(node: &mut CssNode, extensions: &[Extension]) -> bool {
    match node {
        CssNode::Ruleset(ruleset) => {
            let mut changed = false;
            for extension in extensions {
                changed |= apply_extension(&mut ruleset.selector, extension);
            }
            changed
        }
        CssNode::AtRule(at_rule) => {
            let mut changed = false;
            for child in at_rule.children.iter_mut() {
                changed |= rewrite_node(child, extensions);
            }
            changed
        }
        CssNode::Verbatim(_) => false,
    }
}

fn apply_extension(selector: &mut Selector, extension: &Extension) -> bool {
    let parts = selector.parts();
    let existing: Vec<String> = parts.iter().map(TokenList::render_normalized).collect();

    let replacement_parts = extension.replacement.parts();
    let mut additions: Vec<TokenList> = Vec::new();
    for rendered in existing.iter() {
        for target in extension.target.parts() {
            let target_text = target.render_normalized();
            match extension.mode {
                ExtensionMode::Exact => {
                    if rendered == &target_text {
                        additions.extend(replacement_parts.iter().cloned());
                    }
                }
                ExtensionMode::All => {
                    if rendered.contains(&target_text) {
                        // 子串模式：在命中部分里把目标替换为扩展选择器
                        for replacement in &replacement_parts {
                            let replaced =
                                rendered.replace(&target_text, &replacement.render_normalized());
                            additions.push(text_part(&replaced));
                        }
                    }
                }
            }
        }
    }

    let mut changed = false;
    let mut all_parts = parts;
    for addition in additions {
        let rendered = addition.render_normalized();
        if existing.iter().any(|p| p == &rendered)
            || all_parts
                .iter()
                .any(|p| p.render_normalized() == rendered)
        {
            continue;
        }
        all_parts.push(addition);
        changed = true;
    }
    if changed {
        *selector = Selector::from_parts(all_parts);
    }
    changed
}

/// 以改写后的文本构造一个选择器部分。
fn text_part(text: &str) -> TokenList {
    use crate::token::{Token, TokenKind};
    let mut list = TokenList::new();
    for (idx, word) in text.split_whitespace().enumerate() {
        if idx > 0 {
            list.push_back(Token::space());
        }
        list.push_back(Token::builtin(word, TokenKind::Identifier));
    }
    list
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::{CssDeclaration, CssRuleset};
    use crate::lexer::tokenize;
    use pretty_assertions::assert_eq;

    fn selector(src: &str) -> Selector {
        Selector::new(tokenize(src, "t").unwrap().into_iter().collect())
    }

    fn ruleset(sel: &str) -> CssNode {
        let mut rule = CssRuleset::new(selector(sel));
        rule.declarations.push(CssDeclaration {
            property: "color".to_string(),
            value: "red".to_string(),
            important: false,
        });
        CssNode::Ruleset(rule)
    }

    fn selectors(stylesheet: &CssStylesheet) -> Vec<String> {
        stylesheet
            .nodes
            .iter()
            .map(|node| match node {
                CssNode::Ruleset(rule) => rule.selector.render(),
                _ => String::new(),
            })
            .collect()
    }

    #[test]
    fn exact_match_appends_replacement() {
        let mut sheet = CssStylesheet {
            imports: vec![],
            nodes: vec![ruleset(".b")],
        };
        let extensions = vec![Extension {
            target: selector(".b"),
            replacement: selector(".a"),
            mode: ExtensionMode::Exact,
        }];
        rewrite(&mut sheet, &extensions);
        assert_eq!(selectors(&sheet), vec![".b, .a".to_string()]);
    }

    #[test]
    fn exact_match_requires_whole_part() {
        let mut sheet = CssStylesheet {
            imports: vec![],
            nodes: vec![ruleset(".bold")],
        };
        let extensions = vec![Extension {
            target: selector(".b"),
            replacement: selector(".a"),
            mode: ExtensionMode::Exact,
        }];
        rewrite(&mut sheet, &extensions);
        assert_eq!(selectors(&sheet), vec![".bold".to_string()]);
    }

    #[test]
    fn all_mode_rewrites_inside_part() {
        let mut sheet = CssStylesheet {
            imports: vec![],
            nodes: vec![ruleset(".b:hover")],
        };
        let extensions = vec![Extension {
            target: selector(".b"),
            replacement: selector(".a"),
            mode: ExtensionMode::All,
        }];
        rewrite(&mut sheet, &extensions);
        assert_eq!(selectors(&sheet), vec![".b:hover, .a:hover".to_string()]);
    }

    #[test]
    fn rewriting_reaches_fixpoint() {
        let mut sheet = CssStylesheet {
            imports: vec![],
            nodes: vec![ruleset(".b")],
        };
        // .a 扩展 .b，.c 又扩展 .a：第二轮才能命中新增部分
        let extensions = vec![
            Extension {
                target: selector(".b"),
                replacement: selector(".a"),
                mode: ExtensionMode::Exact,
            },
            Extension {
                target: selector(".a"),
                replacement: selector(".c"),
                mode: ExtensionMode::Exact,
            },
        ];
        rewrite(&mut sheet, &extensions);
        assert_eq!(selectors(&sheet), vec![".b, .a, .c".to_string()]);

        // 再跑一遍必须是 no-op
        let before = selectors(&sheet);
        rewrite(&mut sheet, &extensions);
        assert_eq!(selectors(&sheet), before);
    }
}
