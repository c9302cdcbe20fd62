//! less_forge 库入口，提供面向 Rust 与 Node.js 的 LESS 编译能力。
//! 流水线：词法（lexer）→ 解析（parser）→ 求值引擎（context/processor/
//! ruleset）→ extend 改写 → CSS 序列化（serializer）。

mod color;
mod context;
mod css;
mod error;
mod extend;
mod functions;
mod importer;
mod lexer;
mod parser;
mod processor;
mod ruleset;
mod selector;
mod serializer;
mod stylesheet;
mod token;
mod utils;
mod value;

use std::fs;
use std::path::{Path, PathBuf};

use context::ProcessingContext;
use css::CssStylesheet;
use importer::{expand_imports, expand_imports_with};
use parser::LessParser;
use serializer::Serializer;

pub use error::{LessError, LessResult, SourceLocation};
pub use importer::{FileLoader, SourceLoader};

/// LESS 编译配置。
#[derive(Debug, Clone)]
pub struct CompileOptions {
    /// 是否输出压缩后的 CSS。
    pub minify: bool,
    /// 当前源文件所在目录，用于解析相对 @import。
    pub current_dir: Option<PathBuf>,
    /// 额外的检索目录。
    pub include_paths: Vec<PathBuf>,
    /// mixin 调用深度上限。
    pub max_call_depth: usize,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            minify: false,
            current_dir: None,
            include_paths: Vec::new(),
            max_call_depth: 100,
        }
    }
}

/// 编译 LESS 源码为 CSS 文本。
///
/// # 参数
/// * `source` - 待编译的 LESS 字符串
/// * `options` - 编译配置
pub fn compile(source: &str, options: CompileOptions) -> LessResult<String> {
    compile_named(source, "<input>", options)
}

/// 带源名称的编译入口，诊断信息会引用该名称。
pub fn compile_named(source: &str, name: &str, options: CompileOptions) -> LessResult<String> {
    let parser = LessParser::new();
    let mut ast = parser.parse(source, name)?;
    if options.current_dir.is_some() || !options.include_paths.is_empty() {
        ast = expand_imports(
            &parser,
            ast,
            options.current_dir.as_deref(),
            &options.include_paths,
        )?;
    }
    render(&ast, &options)
}

/// 注入自定义源加载器的编译入口（宿主可控的 @import 解析）。
pub fn compile_with_loader(
    source: &str,
    name: &str,
    loader: &mut dyn SourceLoader,
    options: CompileOptions,
) -> LessResult<String> {
    let parser = LessParser::new();
    let ast = parser.parse(source, name)?;
    let ast = expand_imports_with(&parser, ast, options.current_dir.as_deref(), loader)?;
    render(&ast, &options)
}

fn render(ast: &stylesheet::LessStylesheet, options: &CompileOptions) -> LessResult<String> {
    let mut css = CssStylesheet::default();
    let mut ctx = ProcessingContext::new(ast, options.max_call_depth);
    ast.process(&mut ctx, &mut css)?;
    extend::rewrite(&mut css, ctx.extensions());

    let serializer = Serializer::new(options.minify);
    Ok(serializer.to_css(&css))
}

/// 从文件路径编译 LESS，自动处理 @import。
pub fn compile_file<P: AsRef<Path>>(path: P, mut options: CompileOptions) -> LessResult<String> {
    let path = path.as_ref();
    let source = fs::read_to_string(path)
        .map_err(|err| LessError::import(format!("读取文件 {} 失败: {err}", path.display())))?;
    if options.current_dir.is_none() {
        if let Some(parent) = path.parent() {
            options.current_dir = Some(parent.to_path_buf());
        }
    }
    if options.include_paths.is_empty() {
        if let Some(parent) = path.parent() {
            options.include_paths.push(parent.to_path_buf());
        }
    }
    compile_named(&source, &path.display().to_string(), options)
}

#[cfg(feature = "node")]
use napi::{Error, Result};
#[cfg(feature = "node")]
use napi_derive::napi;

/// Node.js 侧的编译选项对象。
#[cfg(feature = "node")]
#[napi(object)]
pub struct JsCompileOptions {
    /// 是否压缩输出 CSS。
    pub minify: Option<bool>,
    /// 源文件路径，用于解析 @import。
    pub filename: Option<String>,
}

/// 暴露给 Node.js 的编译函数。
#[cfg(feature = "node")]
#[napi]
pub fn compile_less(source: String, options: Option<JsCompileOptions>) -> Result<String> {
    let opt = options.unwrap_or(JsCompileOptions {
        minify: None,
        filename: None,
    });
    let minify = opt.minify.unwrap_or(false);
    let mut compile_options = CompileOptions {
        minify,
        ..CompileOptions::default()
    };
    if let Some(filename) = opt.filename {
        let path = PathBuf::from(&filename);
        if let Some(parent) = path.parent() {
            let dir = parent.to_path_buf();
            compile_options.current_dir = Some(dir.clone());
            compile_options.include_paths.push(dir);
        }
    }
    let result =
        compile(&source, compile_options).map_err(|err| Error::from_reason(err.to_string()))?;
    Ok(result)
}
