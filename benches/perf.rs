use criterion::{black_box, criterion_group, criterion_main, Criterion};
use less_forge::{compile, CompileOptions};
use std::fs;
use std::path::PathBuf;

/// 合成 n 个带守卫 mixin 调用（一半走正分支，一半走负分支）。
fn guarded_mixins(n: usize) -> String {
    let mut src = String::from(
        ".size(@i) when (@i > 0) { width: @i * 2px; }\n.size(@i) when (@i <= 0) { width: 0; }\n",
    );
    for i in 0..n {
        let arg = i as i64 - (n as i64 / 2);
        src.push_str(&format!(".cell-{i} {{ .size({arg}); }}\n"));
    }
    src
}

/// n 条 :extend 指令指向同一个目标，改写阶段要迭代到不动点。
fn extend_fanout(n: usize) -> String {
    let mut src = String::from(".base { color: #336699; padding: 4px; }\n");
    for i in 0..n {
        src.push_str(&format!(".item-{i}:extend(.base) {{}}\n"));
    }
    src
}

/// 嵌套 @media 冒泡 + !important 剥离。
fn nested_media(n: usize) -> String {
    let mut src = String::new();
    for i in 0..n {
        src.push_str(&format!(
            ".widget-{i} {{\n  margin: 4px !important;\n  @media (min-width: 600px) {{\n    margin: 8px;\n  }}\n}}\n"
        ));
    }
    src
}

/// 选择器、属性名与字符串三处插值。
fn interpolation(n: usize) -> String {
    let mut src = String::from("@side: left;\n@name: \"tile\";\n");
    for i in 0..n {
        src.push_str(&format!(
            ".box-{i}-@{{side}} {{\n  border-@{{side}}: 1px;\n  content: \"@{{name}} {i}\";\n}}\n"
        ));
    }
    src
}

fn synthetic_benchmarks(c: &mut Criterion) {
    let workloads = [
        ("guards", guarded_mixins(64)),
        ("extend", extend_fanout(64)),
        ("nested_media", nested_media(32)),
        ("interpolation", interpolation(64)),
    ];

    let mut group = c.benchmark_group("compile");
    for (name, source) in &workloads {
        for minify in [false, true] {
            let id = format!("{name}/{}", if minify { "min" } else { "pretty" });
            group.bench_function(id, |b| {
                b.iter(|| {
                    compile(
                        black_box(source),
                        CompileOptions {
                            minify,
                            ..CompileOptions::default()
                        },
                    )
                    .unwrap()
                });
            });
        }
    }
    group.finish();
}

/// @import 展开走完整的加载-解析-拼接路径。
fn import_benchmark(c: &mut Criterion) {
    let source = fs::read_to_string("fixtures/styles/base.less").expect("缺少基准样式");
    c.bench_function("compile/imports", |b| {
        b.iter(|| {
            compile(
                black_box(&source),
                CompileOptions {
                    current_dir: Some(PathBuf::from("fixtures/styles")),
                    include_paths: vec![PathBuf::from("fixtures/styles")],
                    ..CompileOptions::default()
                },
            )
            .unwrap()
        });
    });
}

criterion_group!(benches, synthetic_benchmarks, import_benchmark);
criterion_main!(benches);
