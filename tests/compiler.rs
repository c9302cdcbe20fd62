use less_forge::{compile, compile_file, CompileOptions, LessError};
use std::path::Path;

fn minified(src: &str) -> String {
    compile(
        src,
        CompileOptions {
            minify: true,
            ..CompileOptions::default()
        },
    )
    .unwrap()
}

#[test]
fn variable_and_nesting() {
    let src = r"@spacing: 8px;
.container {
  padding: @spacing;
  .title {
    margin-bottom: @spacing;
  }
}";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert!(css.contains(".container"));
    assert!(css.contains(".container .title"));
}

#[test]
fn minify_output() {
    let src = r".demo {
  color: #333;
  font-weight: bold;
}";
    assert_eq!(minified(src), ".demo{color:#333;font-weight:bold}");
}

#[test]
fn scenario_variable_arithmetic() {
    assert_eq!(minified("@w: 10px; .a { width: @w * 2; }"), ".a{width:20px}");
}

#[test]
fn scenario_parametric_mixin() {
    assert_eq!(
        minified(".m(@c) { color: @c; } .a { .m(red); }"),
        ".a{color:red}"
    );
}

#[test]
fn scenario_nested_ruleset() {
    assert_eq!(
        minified(".a { .b { color: red; } }"),
        ".a .b{color:red}"
    );
}

#[test]
fn scenario_color_arithmetic() {
    assert_eq!(
        minified(".a { color: #ff0000 + #000044; }"),
        ".a{color:#ff0044}"
    );
}

#[test]
fn scenario_extend() {
    assert_eq!(
        minified(".a:extend(.b) {} .b { color: red; }"),
        ".b,.a{color:red}"
    );
}

#[test]
fn scenario_interpolation() {
    assert_eq!(
        minified("@n: \"world\"; .a::before { content: \"hello @{n}\"; }"),
        ".a::before{content:\"hello world\"}"
    );
}

#[test]
fn scenario_guarded_mixins() {
    let css = minified(
        ".m(@x) when (@x > 0) { p: pos; } .m(@x) when (@x <= 0) { p: neg; } .a { .m(3); } .b { .m(-1); }",
    );
    assert_eq!(css, ".a{p:pos}.b{p:neg}");
}

#[test]
fn plain_css_roundtrips() {
    let src = r".a {
  color: red;
  border: 1px solid black;
}

.b {
  margin: 0 auto;
}";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert!(css.contains(".a {\n  color: red;\n  border: 1px solid black;\n}"));
    assert!(css.contains(".b {\n  margin: 0 auto;\n}"));
}

#[test]
fn mixin_and_color_functions() {
    let src = r".rounded(@radius) {
  border-radius: @radius;
}

.badge {
  .rounded(4px);
  background: lighten(#123456, 15%);
}";
    let css = minified(src);
    assert!(css.contains(".badge{border-radius:4px"));
    assert!(css.contains("background:#1f5a95"));
}

#[test]
fn mixin_default_and_override() {
    let src = r".shadow(@x: 0, @y: 2px, @blur: 4px) {
  box-shadow: @x @y @blur rgba(0, 0, 0, 0.4);
}

.dialog {
  .shadow();
}

.dialog-elevated {
  .shadow(0, 8px, 16px);
}";
    let css = minified(src);
    assert!(css.contains(".dialog{box-shadow:0 2px 4px rgba(0, 0, 0, 0.4)}"));
    assert!(css.contains(".dialog-elevated{box-shadow:0 8px 16px rgba(0, 0, 0, 0.4)}"));
}

#[test]
fn mixin_named_arguments() {
    let src = r".m(@a: 1px, @b: 2px) {
  margin: @a @b;
}

.x {
  .m(@b: 9px);
}";
    let css = minified(src);
    assert!(css.contains(".x{margin:1px 9px}"));
}

#[test]
fn mixin_rest_parameter() {
    let src = r".m(@first, @rest...) {
  border: @first;
  extra: @rest;
}

.x {
  .m(1px, solid, black);
}";
    let css = minified(src);
    assert!(css.contains("border:1px"));
    assert!(css.contains("extra:solid black"));
}

#[test]
fn mixin_scoped_lookup_prefers_inner_definition() {
    let src = r".m() { color: outer; }
.a {
  .m() { color: inner; }
  .b {
    .m();
  }
}";
    let css = minified(src);
    assert!(css.contains(".a .b{color:inner}"));
}

#[test]
fn arithmetic_multiple_segments_minified() {
    let src = r"@base: 5px;
.layout {
  padding: (@base * 2) (@base * 4) (@base / 5);
}";
    let css = minified(src);
    assert!(css.contains(".layout{padding:10px 20px 1px}"));
}

#[test]
fn deep_variable_lookup() {
    let src = r#"@target: "width";
@width: 640px;
.a {
  w: @@target;
}"#;
    let css = minified(src);
    assert!(css.contains(".a{w:640px}"));
}

#[test]
fn escaped_value_passthrough() {
    let src = r#"@r: 4;
.a {
  width: ~"calc(100% - @{r}px)";
}"#;
    let css = minified(src);
    assert!(css.contains("width:calc(100% - 4px)"));
}

#[test]
fn import_statement_passthrough() {
    let src = r#"@import (css) "https://cdn.example.com/reset.css";
body {
  color: #333;
}"#;
    let css = minified(src);
    assert!(css.starts_with(r#"@import "https://cdn.example.com/reset.css";"#));
    assert!(css.contains("body{color:#333}"));
}

#[test]
fn nested_media_queries_and_supports() {
    let src = r".panel {
  color: #333;
  @media (min-width: 800px) {
    color: #000;
    .panel__title {
      font-size: 20px;
    }
  }
}

@media (max-width: 600px) {
  .panel {
    width: 100%;
  }
}";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert!(css.contains(".panel {\n  color: #333;"));
    assert!(css.contains("@media (min-width: 800px)"));
    assert!(css.contains(".panel__title"));
    assert!(css.contains("@media (max-width: 600px)"));
    assert!(css.contains(".panel {\n    width: 100%;"));
}

#[test]
fn media_query_with_variable_parameter() {
    let src = r"@narrow: 600px;
@media (max-width: @narrow) {
  .a {
    width: 100%;
  }
}";
    let css = compile(src, CompileOptions::default()).unwrap();
    assert!(css.contains("@media (max-width: 600px)"));
}

#[test]
fn font_face_and_keyframes_blocks() {
    let src = r"@font-face {
  font-family: 'Open Sans';
  src: url('/fonts/open-sans.woff2') format('woff2');
}

@keyframes fade-in {
  from {
    opacity: 0;
  }
  to {
    opacity: 1;
  }
}";
    let css = minified(src);
    assert!(css.contains(
        "@font-face{font-family:'Open Sans';src:url('/fonts/open-sans.woff2') format('woff2')}"
    ));
    assert!(css.contains("@keyframes fade-in{from{opacity:0}to{opacity:1}}"));
}

#[test]
fn interpolated_selector_and_property() {
    let src = r#"@side: left;
.@{side}-box {
  border-@{side}: 1px;
}"#;
    let css = minified(src);
    assert!(css.contains(".left-box{border-left:1px}"));
}

#[test]
fn extend_all_mode_rewrites_compound_selectors() {
    let src = r".a:extend(.b all) {}
.b:hover {
  color: red;
}";
    let css = minified(src);
    assert!(css.contains(".b:hover,.a:hover{color:red}"));
}

#[test]
fn undefined_variable_is_an_error() {
    let err = compile(".a { width: @ghost; }", CompileOptions::default()).unwrap_err();
    assert!(matches!(err, LessError::VariableNotFound { .. }));
}

#[test]
fn undefined_interpolation_is_left_verbatim() {
    let css = minified(".a { content: \"@{ghost}\"; }");
    assert!(css.contains("content:\"@{ghost}\""));
}

#[test]
fn wrong_builtin_signature_is_an_error() {
    let err = compile(
        ".a { color: lighten(10px, 20%); }",
        CompileOptions::default(),
    )
    .unwrap_err();
    assert!(matches!(err, LessError::FunctionArity { .. }));
}

#[test]
fn mixin_closure_resolves_from_capture_site() {
    let src = r".outer() {
  .inner() {
    color: captured;
  }
}

.a {
  .outer();
  .inner();
}";
    let css = minified(src);
    assert!(css.contains(".a{color:captured}"));
}

#[test]
fn compile_styles_base_fixture() {
    let path = Path::new("fixtures/styles/base.less");
    let css = compile_file(
        path,
        CompileOptions {
            minify: true,
            ..CompileOptions::default()
        },
    )
    .unwrap();
    assert!(css.contains(".page{min-height:100%"));
    assert!(css.contains(".btn-primary"));
    assert!(css.contains("background:#336699"));
}
