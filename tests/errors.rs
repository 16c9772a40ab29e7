use noir::{check_source, parse_source, run_captured, tokenize, ErrorKind, Stage};

#[test]
fn test_lex_errors() {
    let err = tokenize("x: Int = 1 @ 2").unwrap_err();
    assert_eq!(err.stage(), Stage::Lex);
    assert_eq!(err.kind, ErrorKind::UnexpectedCharacter('@'));

    assert!(matches!(tokenize("s: String = \"open").unwrap_err().kind, ErrorKind::UnterminatedString));
    assert!(matches!(tokenize("n: Int = 1.2.3").unwrap_err().kind, ErrorKind::InvalidNumber(_)));
    assert!(matches!(tokenize("c: Char = 'ab'").unwrap_err().kind, ErrorKind::InvalidCharLiteral));
}

#[test]
fn test_unbalanced_terminator() {
    let missing = parse_source("if true:\n  print(1)\n").unwrap_err();
    assert_eq!(missing.stage(), Stage::Parse);
    assert!(matches!(missing.kind, ErrorKind::UnclosedBlock(_, 1)));

    let extra = parse_source("print(1)\n::").unwrap_err();
    assert_eq!(extra.stage(), Stage::Parse);
    assert_eq!(extra.kind, ErrorKind::UnmatchedTerminator);
}

#[test]
fn test_float_into_int_is_type_error() {
    let err = check_source("b: Int = 3.14").unwrap_err();
    assert_eq!(err.stage(), Stage::Type);
    assert!(matches!(err.kind, ErrorKind::InvalidConversion(..)));
    assert!(check_source("b: Int = 3.14 as Int").is_ok());
}

#[test]
fn test_type_errors() {
    let cases = [
        "x: Int = \"text\"",
        "print(y)",
        "x: Int = 1\nx: Int = 2",
        "if 1:\n  print(1)\n::",
        "func f() -> Int:\n  print(1)\n::",
        "f: Float = 1.0\nd: Double = 2.0\nprint(f + d)",
        "a: [Int] = [1]\na.append(\"x\")",
        "x: Widget = 1",
    ];
    for source in cases {
        let err = check_source(source).unwrap_err();
        assert_eq!(err.stage(), Stage::Type, "{}", source);
    }
}

#[test]
fn test_type_errors_stop_execution() {
    // nothing runs when the program does not type-check
    let err = run_captured("print(1)\nx: Int = true").unwrap_err();
    assert_eq!(err.stage(), Stage::Type);
}

#[test]
fn test_error_display_has_location() {
    let source = "x: Int = 1\ny: Int = x / 0";
    let err = run_captured(source).unwrap_err().with_source(source);
    let rendered = err.to_string();
    assert!(rendered.starts_with("[line 2:"), "{}", rendered);
    assert!(rendered.contains("Runtime error: division by zero"));
    assert!(rendered.contains("y: Int = x / 0"));
}

#[test]
fn test_zero_step() {
    let err = run_captured("s: Int = 0\nfor i in 0 to 3 by s:\n  print(i)\n::").unwrap_err();
    assert_eq!(err.kind, ErrorKind::ZeroStep);
}
