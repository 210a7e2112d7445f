use serde_json::Value;
use stepc::compile_source;
use stepc_core::integration::NoIntegrations;

fn compile(source: &str) -> Value {
    let machine = compile_source(source, &NoIntegrations, "").expect("compiles");
    serde_json::to_value(&machine).expect("serializes")
}

#[test]
fn arrow_expression_root() {
    let document = compile("(x) => x + 1");
    assert!(document.get("StartAt").is_some());
    assert!(document.get("States").is_some());
    assert!(document.get("Comment").is_none());
}

#[test]
fn const_bound_root() {
    let document = compile("const handler = (x) => { return x; };");
    let start = document["StartAt"].as_str().expect("StartAt is a string");
    assert!(document["States"].get(start).is_some());
}

#[test]
fn function_expression_root() {
    let document = compile("(function (x) { return x; });");
    assert!(document["States"].is_object());
}

#[test]
fn async_root_awaits_transparently() {
    let document = compile("async (x) => { return await x; }");
    assert!(document["States"].is_object());
}

#[test]
fn missing_root_function_is_an_error() {
    let result = compile_source("let a = 1;", &NoIntegrations, "");
    assert!(result.is_err());
}

#[test]
fn parse_errors_surface() {
    let result = compile_source("(x) => {", &NoIntegrations, "");
    assert!(result.is_err());
}
