use super::*;

const SAMPLE: &str = "lyx-script v1
target es2020
module esnext
strict true
globals 1
const num 2.0
const str \"a \\\"b\\\"\"
func <main> 0 0
  const 0
  store.global 0
  const 1
  intrinsic console.log 1
  pop
  undefined
  return
end
func helper 1 2
  load.local 0
  return
end
";

#[test]
fn test_load_sample() {
    let script: Script = SAMPLE.parse().unwrap();
    assert_eq!(script.options, ScriptOptions::default());
    assert_eq!(script.globals, 1);
    assert_eq!(
        script.constants,
        vec![Constant::Number(2.0), Constant::Str("a \"b\"".into())]
    );
    assert_eq!(script.main().unwrap().name, MAIN_FUNCTION);
    assert_eq!(
        script.functions[0].code[3],
        Op::Intrinsic {
            intrinsic: Intrinsic::ConsoleLog,
            argc: 1
        }
    );
    assert_eq!(script.functions[1].params, 1);
    assert_eq!(script.functions[1].locals, 2);
}

#[test]
fn test_display_matches_loaded_text() {
    let script: Script = SAMPLE.parse().unwrap();
    assert_eq!(script.to_string(), SAMPLE);
}

#[test]
fn test_intrinsic_names_round_trip() {
    for intrinsic in Intrinsic::ALL {
        assert_eq!(Intrinsic::from_name(intrinsic.name()), Some(intrinsic));
    }
    assert_eq!(Intrinsic::from_name("console.shout"), None);
}

#[test]
fn test_blank_lines_and_indentation_are_ignored() {
    let text = SAMPLE.replace("\nfunc helper", "\n\n   func helper");
    assert!(text.parse::<Script>().is_ok());
}

#[test]
fn test_rejects_missing_header() {
    let err = "target es2020".parse::<Script>().unwrap_err();
    assert_eq!(err.line, 1);
    assert_eq!(err.message, "missing script header");
}

#[test]
fn test_rejects_unknown_instruction_with_line() {
    let text = SAMPLE.replace("  pop", "  frobnicate");
    let err = text.parse::<Script>().unwrap_err();
    assert_eq!(err.line, 13);
    assert!(err.message.contains("frobnicate"));
}

#[test]
fn test_rejects_unterminated_function() {
    let text = SAMPLE.trim_end().trim_end_matches("end");
    let err = text.parse::<Script>().unwrap_err();
    assert_eq!(err.message, "unexpected end of script");
}

#[test]
fn test_validate_rejects_out_of_range_operands() {
    for (from, to) in [
        ("  const 1\n", "  const 9\n"),
        ("  store.global 0", "  store.global 1"),
        ("  load.local 0", "  load.local 2"),
        ("  load.local 0\n  return", "  load.local 0\n  jump 7\n  return"),
    ] {
        let text = SAMPLE.replacen(from, to, 1);
        assert_ne!(text, SAMPLE, "pattern {from:?} not found");
        let err = text.parse::<Script>().unwrap_err();
        assert!(err.message.contains("out of range"), "{}", err.message);
    }
}

#[test]
fn test_validate_requires_trailing_return_and_no_call_to_main() {
    let text = SAMPLE.replace("  load.local 0\n  return\n", "  load.local 0\n");
    assert!(text
        .parse::<Script>()
        .unwrap_err()
        .message
        .contains("does not end with return"));

    let text = SAMPLE.replace("  load.local 0\n", "  call 0 0\n");
    assert!(text.parse::<Script>().is_err());
}

#[test]
fn test_disassemble_lists_indexes() {
    let script: Script = SAMPLE.parse().unwrap();
    let listing = script.disassemble();
    assert!(listing.contains("<main>(0):"));
    assert!(listing.contains("     3  intrinsic console.log 1"));
    assert!(listing.contains("helper(1):"));
}
