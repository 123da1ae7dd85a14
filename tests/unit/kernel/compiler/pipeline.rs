use super::*;

async fn ready(options: CompilerOptions) -> CompilePipeline {
    let pipeline = CompilePipeline::new(options);
    pipeline.initialize().await;
    pipeline
}

#[test]
fn test_compile_before_initialize_fails() {
    let pipeline = CompilePipeline::default();
    assert!(!pipeline.is_initialized());
    assert_eq!(
        pipeline.compile("console.log(1)"),
        CompileResult::Failure {
            reason: CompileFailure::NotInitialized
        }
    );
}

#[tokio::test]
async fn test_concurrent_initialize_loads_once() {
    let pipeline = CompilePipeline::default();
    tokio::join!(
        pipeline.initialize(),
        pipeline.initialize(),
        pipeline.initialize()
    );
    pipeline.initialize().await;
    assert!(pipeline.is_initialized());
    assert_eq!(pipeline.load_count(), 1);
}

#[tokio::test]
async fn test_trivial_program_compiles() {
    let pipeline = ready(CompilerOptions::default()).await;
    let result = pipeline.compile("return 1 + 1");
    assert!(result.is_success());
    let output = result.output().unwrap();
    assert!(output.starts_with("lyx-script v1\ntarget es2020\nmodule esnext\nstrict true\n"));
    assert!(output.parse::<Script>().is_ok());
}

#[tokio::test]
async fn test_compile_is_deterministic() {
    let pipeline = ready(CompilerOptions::default()).await;
    let source = "let total = 0;\nfor (let i = 0; i < 10; i++) { total += i; }\nconsole.log(total);";
    assert_eq!(pipeline.compile(source), pipeline.compile(source));
}

#[tokio::test]
async fn test_oversized_source_is_rejected_before_compiling() {
    let pipeline = ready(CompilerOptions {
        max_source_bytes: 16,
    })
    .await;
    // not valid source either; the size check comes first
    let source = "@".repeat(17);
    assert_eq!(
        pipeline.compile(&source),
        CompileResult::Failure {
            reason: CompileFailure::TooLarge {
                size: 17,
                limit: 16
            }
        }
    );
    assert!(pipeline.compile("let a = 1;").is_success());
}

#[tokio::test]
async fn test_compiler_errors_become_failures() {
    let pipeline = ready(CompilerOptions::default()).await;
    let result = pipeline.compile("let x = ;");
    let Err(CompileFailure::CompilerError(message)) = result.into_result() else {
        panic!("expected a compiler error");
    };
    assert!(message.starts_with("1:9: "), "{message}");

    let result = pipeline.compile("undeclared = 5");
    assert_eq!(
        result,
        CompileResult::Failure {
            reason: CompileFailure::CompilerError(
                "1:1: Cannot assign to undeclared variable 'undeclared'".to_string()
            )
        }
    );
}

#[test]
fn test_failure_messages() {
    assert_eq!(
        CompileFailure::TooLarge { size: 5, limit: 4 }.to_string(),
        "source is too large (5 bytes, limit 4)"
    );
    assert_eq!(
        CompileError::new("boom", 3, 7).to_string(),
        "3:7: boom"
    );
}

fn compiler_error(result: CompileResult) -> String {
    match result {
        CompileResult::Failure {
            reason: CompileFailure::CompilerError(message),
        } => message,
        other => panic!("expected a compiler error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_deep_nesting_fails_instead_of_overflowing() {
    let pipeline = ready(CompilerOptions::default()).await;
    let sources = [
        format!("let x = {}1{};", "(".repeat(5000), ")".repeat(5000)),
        format!("let x = {}1{};", "(".repeat(50_000), ")".repeat(50_000)),
        format!("let x = {}true;", "!".repeat(50_000)),
        format!("{}{}", "{".repeat(20_000), "}".repeat(20_000)),
        format!("let x = 1{};", " + 1".repeat(20_000)),
    ];
    for source in &sources {
        let message = compiler_error(pipeline.compile(source));
        assert!(message.ends_with("nested too deeply"), "{message}");
    }
    // the pipeline is still usable afterwards
    assert!(pipeline.compile("return 1 + 1").is_success());
}

#[tokio::test]
async fn test_tall_expression_tree_is_rejected_by_the_backend() {
    let pipeline = ready(CompilerOptions::default()).await;
    // each level stays shallow for the parser but the tree grows by 100
    let mut expr = "1".to_string();
    for _ in 0..20 {
        expr = format!("({expr}{})", " + 1".repeat(100));
    }
    let message = compiler_error(pipeline.compile(&format!("return {expr};")));
    assert!(message.ends_with("expression nested too deeply"), "{message}");

    let mut expr = "1".to_string();
    for _ in 0..5 {
        expr = format!("({expr}{})", " + 1".repeat(100));
    }
    assert!(pipeline.compile(&format!("return {expr};")).is_success());
}
