use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{LessError, LessResult};
use crate::parser::LessParser;
use crate::stylesheet::{LessItem, LessStylesheet};

/// 注入式源加载器：把 import 目标解析为（名字, 内容）。
/// 文件系统之外的宿主（测试、内存打包）可提供自己的实现。
pub trait SourceLoader {
    fn load(&mut self, target: &str, from_dir: Option<&Path>) -> LessResult<(String, String)>;
}

/// 默认的文件系统加载器：当前目录 + 检索目录，缺省补 .less 扩展名。
pub struct FileLoader {
    include_paths: Vec<PathBuf>,
}

impl FileLoader {
    pub fn new(include_paths: &[PathBuf]) -> Self {
        Self {
            include_paths: include_paths.to_vec(),
        }
    }

    /// 候选路径按查找顺序展开：相对目标依次挂在当前文件目录与各
    /// 检索目录下；目标没有扩展名时，每个位置先试 `.less` 再试原样。
    fn candidates(&self, target: &Path, from_dir: Option<&Path>) -> Vec<PathBuf> {
        let roots: Vec<PathBuf> = if target.is_absolute() {
            vec![target.to_path_buf()]
        } else {
            from_dir
                .into_iter()
                .chain(self.include_paths.iter().map(PathBuf::as_path))
                .map(|base| base.join(target))
                .collect()
        };

        let mut candidates = Vec::with_capacity(roots.len() * 2);
        for root in roots {
            if root.extension().is_none() {
                candidates.push(root.with_extension("less"));
            }
            candidates.push(root);
        }
        candidates
    }
}

impl SourceLoader for FileLoader {
    fn load(&mut self, target: &str, from_dir: Option<&Path>) -> LessResult<(String, String)> {
        for candidate in self.candidates(Path::new(target), from_dir) {
            if !candidate.is_file() {
                continue;
            }
            let resolved = candidate.canonicalize().unwrap_or(candidate);
            let content = fs::read_to_string(&resolved).map_err(|err| {
                LessError::import(format!("读取文件 {} 失败: {err}", resolved.display()))
            })?;
            return Ok((resolved.display().to_string(), content));
        }
        Err(LessError::import(format!("无法解析 @import 路径 {target}")))
    }
}

/// 解析期的 import 展开：`.less` 目标内联拼接，`.css` 目标保留原样。
pub struct ImportExpander<'a> {
    parser: &'a LessParser,
    loader: &'a mut dyn SourceLoader,
    cache: HashMap<String, LessStylesheet>,
    stack: Vec<String>,
}

impl<'a> ImportExpander<'a> {
    pub fn new(parser: &'a LessParser, loader: &'a mut dyn SourceLoader) -> Self {
        Self {
            parser,
            loader,
            cache: HashMap::new(),
            stack: Vec::new(),
        }
    }

    pub fn expand(
        &mut self,
        stylesheet: LessStylesheet,
        current_dir: Option<&Path>,
    ) -> LessResult<LessStylesheet> {
        let mut result = LessStylesheet {
            variables: stylesheet.variables,
            items: Vec::new(),
        };

        for item in stylesheet.items {
            match item {
                LessItem::Import(import) if !import.is_css => {
                    let target = match &import.path {
                        Some(path) => path.clone(),
                        None => {
                            result.items.push(LessItem::Import(import));
                            continue;
                        }
                    };
                    let (resolved, content) = self.loader.load(&target, current_dir)?;
                    if self.stack.contains(&resolved) {
                        return Err(LessError::import(format!("检测到循环导入: {resolved}")));
                    }
                    self.stack.push(resolved.clone());

                    let parsed = match self.cache.get(&resolved) {
                        Some(cached) => cached.clone(),
                        None => {
                            let parsed = self.parser.parse(&content, &resolved)?;
                            self.cache.insert(resolved.clone(), parsed.clone());
                            parsed
                        }
                    };
                    let parent = Path::new(&resolved).parent().map(Path::to_path_buf);
                    let expanded = self.expand(parsed, parent.as_deref())?;
                    self.stack.pop();

                    for (name, value) in expanded.variables {
                        result.variables.insert(name, value);
                    }
                    result.items.extend(expanded.items);
                }
                other => result.items.push(other),
            }
        }
        Ok(result)
    }
}

/// 便捷入口：文件系统加载器 + 解析器共用的一次性展开。
pub fn expand_imports(
    parser: &LessParser,
    stylesheet: LessStylesheet,
    current_dir: Option<&Path>,
    include_paths: &[PathBuf],
) -> LessResult<LessStylesheet> {
    let mut loader = FileLoader::new(include_paths);
    let mut expander = ImportExpander::new(parser, &mut loader);
    expander.expand(stylesheet, current_dir)
}

/// 注入自定义加载器的展开入口。
pub fn expand_imports_with(
    parser: &LessParser,
    stylesheet: LessStylesheet,
    current_dir: Option<&Path>,
    loader: &mut dyn SourceLoader,
) -> LessResult<LessStylesheet> {
    let mut expander = ImportExpander::new(parser, loader);
    expander.expand(stylesheet, current_dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stylesheet::LessItem;

    struct MapLoader(HashMap<String, String>);

    impl SourceLoader for MapLoader {
        fn load(
            &mut self,
            target: &str,
            _from_dir: Option<&Path>,
        ) -> LessResult<(String, String)> {
            match self.0.get(target) {
                Some(content) => Ok((target.to_string(), content.clone())),
                None => Err(LessError::import(format!("无法解析 @import 路径 {target}"))),
            }
        }
    }

    #[test]
    fn inlines_less_imports() {
        let parser = LessParser::new();
        let sheet = parser
            .parse("@import \"vars\";\n.a { width: @w; }", "main.less")
            .unwrap();
        let mut loader = MapLoader(HashMap::from([(
            "vars".to_string(),
            "@w: 10px;".to_string(),
        )]));
        let expanded = expand_imports_with(&parser, sheet, None, &mut loader).unwrap();
        assert_eq!(expanded.variables.get("@w").unwrap().render(), "10px");
        assert_eq!(expanded.items.len(), 1);
    }

    #[test]
    fn cyclic_import_is_an_error() {
        let parser = LessParser::new();
        let sheet = parser.parse("@import \"a\";", "main.less").unwrap();
        let mut loader = MapLoader(HashMap::from([
            ("a".to_string(), "@import \"b\";".to_string()),
            ("b".to_string(), "@import \"a\";".to_string()),
        ]));
        let err = expand_imports_with(&parser, sheet, None, &mut loader).unwrap_err();
        assert!(matches!(err, LessError::Import(_)));
    }

    #[test]
    fn css_imports_stay_put() {
        let parser = LessParser::new();
        let sheet = parser
            .parse("@import \"reset.css\";", "main.less")
            .unwrap();
        let mut loader = MapLoader(HashMap::new());
        let expanded = expand_imports_with(&parser, sheet, None, &mut loader).unwrap();
        assert!(matches!(&expanded.items[0], LessItem::Import(i) if i.is_css));
    }
}
