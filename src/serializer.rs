use crate::css::{CssAtRule, CssDeclaration, CssNode, CssRuleset, CssStylesheet};
use crate::utils::{collapse_whitespace, indent};

/// 把扁平 CSS 树写成文本。压缩与否不分两棵渲染树，
/// 同一次递归遍历里由 minify 决定缩进、换行与声明间缝隙。
pub struct Serializer {
    minify: bool,
}

impl Serializer {
    pub fn new(minify: bool) -> Self {
        Self { minify }
    }

    pub fn to_css(&self, stylesheet: &CssStylesheet) -> String {
        let mut out = String::new();
        for import in &stylesheet.imports {
            out.push_str(import.trim());
            out.push('\n');
        }
        if !self.minify && !stylesheet.imports.is_empty() && !stylesheet.nodes.is_empty() {
            out.push('\n');
        }

        // 空规则不产出任何文本，节点间的空行只隔在实际输出之间
        let mut wrote_any = false;
        for node in &stylesheet.nodes {
            let mut chunk = String::new();
            self.write_node(node, 0, &mut chunk);
            if chunk.is_empty() {
                continue;
            }
            if wrote_any && !self.minify {
                out.push('\n');
            }
            out.push_str(&chunk);
            wrote_any = true;
        }

        while out.ends_with('\n') {
            out.pop();
        }
        out
    }

    fn write_node(&self, node: &CssNode, depth: usize, out: &mut String) {
        match node {
            CssNode::Ruleset(ruleset) => self.write_ruleset(ruleset, depth, out),
            CssNode::AtRule(at_rule) => self.write_at_rule(at_rule, depth, out),
            CssNode::Verbatim(raw) => {
                self.line_start(depth, out);
                out.push_str(raw.trim());
                if !self.minify {
                    out.push('\n');
                }
            }
        }
    }

    fn write_ruleset(&self, ruleset: &CssRuleset, depth: usize, out: &mut String) {
        if ruleset.declarations.is_empty() {
            return;
        }
        self.line_start(depth, out);
        let separator = if self.minify { "," } else { ", " };
        out.push_str(&ruleset.selector.render_parts().join(separator));
        self.open_block(out);
        self.write_declarations(&ruleset.declarations, depth + 1, out);
        self.close_block(depth, out);
    }

    /// at-rule 外壳：自身声明在前（@font-face 形态），
    /// 随后递归输出内部节点（@media/@keyframes 形态）。
    fn write_at_rule(&self, at_rule: &CssAtRule, depth: usize, out: &mut String) {
        self.line_start(depth, out);
        out.push('@');
        out.push_str(&at_rule.name);
        let params = if self.minify {
            collapse_whitespace(&at_rule.params)
        } else {
            at_rule.params.trim().to_string()
        };
        if !params.is_empty() {
            out.push(' ');
            out.push_str(&params);
        }
        self.open_block(out);
        self.write_declarations(&at_rule.declarations, depth + 1, out);
        for child in &at_rule.children {
            self.write_node(child, depth + 1, out);
        }
        self.close_block(depth, out);
    }

    /// 压缩模式下分号只隔在声明之间，最后一条不带。
    fn write_declarations(
        &self,
        declarations: &[CssDeclaration],
        depth: usize,
        out: &mut String,
    ) {
        for (idx, decl) in declarations.iter().enumerate() {
            self.line_start(depth, out);
            out.push_str(decl.property.trim());
            out.push(':');
            if self.minify {
                out.push_str(&collapse_whitespace(&decl.value));
                if decl.important {
                    out.push_str("!important");
                }
                if idx + 1 < declarations.len() {
                    out.push(';');
                }
            } else {
                out.push(' ');
                out.push_str(decl.value.trim());
                if decl.important {
                    out.push_str(" !important");
                }
                out.push_str(";\n");
            }
        }
    }

    fn line_start(&self, depth: usize, out: &mut String) {
        if !self.minify {
            out.push_str(&indent(depth));
        }
    }

    fn open_block(&self, out: &mut String) {
        if self.minify {
            out.push('{');
        } else {
            out.push_str(" {\n");
        }
    }

    fn close_block(&self, depth: usize, out: &mut String) {
        if self.minify {
            out.push('}');
        } else {
            out.push_str(&indent(depth));
            out.push_str("}\n");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::css::CssNode;
    use crate::lexer::tokenize;
    use crate::selector::Selector;
    use pretty_assertions::assert_eq;

    fn declaration(property: &str, value: &str, important: bool) -> CssDeclaration {
        CssDeclaration {
            property: property.to_string(),
            value: value.to_string(),
            important,
        }
    }

    fn ruleset(selector: &str, declarations: Vec<CssDeclaration>) -> CssNode {
        CssNode::Ruleset(CssRuleset {
            selector: Selector::new(tokenize(selector, "t").unwrap().into_iter().collect()),
            declarations,
        })
    }

    #[test]
    fn pretty_and_minified_share_one_tree() {
        let sheet = CssStylesheet {
            imports: vec![],
            nodes: vec![ruleset(
                ".a",
                vec![
                    declaration("color", "red", false),
                    declaration("margin", "4px", true),
                ],
            )],
        };
        assert_eq!(
            Serializer::new(false).to_css(&sheet),
            ".a {\n  color: red;\n  margin: 4px !important;\n}"
        );
        assert_eq!(
            Serializer::new(true).to_css(&sheet),
            ".a{color:red;margin:4px!important}"
        );
    }

    #[test]
    fn empty_rulesets_produce_no_blank_lines() {
        let sheet = CssStylesheet {
            imports: vec![],
            nodes: vec![
                ruleset(".a", vec![declaration("color", "red", false)]),
                ruleset(".empty", vec![]),
                ruleset(".b", vec![declaration("color", "blue", false)]),
            ],
        };
        assert_eq!(
            Serializer::new(false).to_css(&sheet),
            ".a {\n  color: red;\n}\n\n.b {\n  color: blue;\n}"
        );
    }

    #[test]
    fn at_rule_nests_children_with_indent() {
        let sheet = CssStylesheet {
            imports: vec![],
            nodes: vec![CssNode::AtRule(CssAtRule {
                name: "media".to_string(),
                params: "(min-width: 800px)".to_string(),
                declarations: vec![],
                children: vec![ruleset(".a", vec![declaration("width", "100%", false)])],
            })],
        };
        assert_eq!(
            Serializer::new(false).to_css(&sheet),
            "@media (min-width: 800px) {\n  .a {\n    width: 100%;\n  }\n}"
        );
        assert_eq!(
            Serializer::new(true).to_css(&sheet),
            "@media (min-width: 800px){.a{width:100%}}"
        );
    }
}
