use noir::{run_captured, ErrorKind, Stage};

fn output(source: &str) -> Vec<String> {
    run_captured(source).expect("Execution failed")
}

#[test]
fn test_range_loop_is_half_open() {
    assert_eq!(output("for i in 1 to 4: print(i) ::"), vec!["1", "2", "3"]);
}

#[test]
fn test_loops() {
    let source = r#"
        total: Int = 0
        for i in 1 thru 10:
            total = total + i
        ::
        n: Int = 0
        while n < 3:
            n = n + 1
        ::
        for i in 9 to 0 by -3:
            print(i)
        ::
        print(total, n)
    "#;
    assert_eq!(output(source), vec!["9", "6", "3", "55 3"]);
}

#[test]
fn test_if_chain() {
    let source = r#"
        func grade(score: Int) -> String:
            if score >= 90:
                return "A"
            :: else if score >= 75:
                return "B"
            :: else:
                return "C"
            ::
        ::
        print(grade(95), grade(80), grade(10))
    "#;
    assert_eq!(output(source), vec!["A B C"]);
}

#[test]
fn test_numeric_widening() {
    let source = r#"
        f: Float = 2
        d: Double = 1.5
        x: Int = 7
        print(f, d + x, x / 2, x as Float / 2)
        print(3.9 as Int, -3.9 as Int)
    "#;
    assert_eq!(output(source), vec!["2.0 8.5 3 3.5", "3 -3"]);
}

#[test]
fn test_strings_and_chars() {
    let source = r#"
        s: String = "noir"
        c: Char = s[0]
        print(s.count, c, s + "!", s.contains("oi"))
        for ch in "ab":
            print(ch)
        ::
    "#;
    assert_eq!(output(source), vec!["4 n noir! true", "a", "b"]);
}

#[test]
fn test_collections() {
    let source = r#"
        a: [Int] = [3, 1]
        a.append(4)
        a.insert(9, 0)
        print(a, a.count, a.contains(4))
        print(a.pop(), a.remove(0), a)

        d: [String: Int] = ["one": 1]
        d["two"] = 2
        print(d["two"], d.count, d.contains("one"), d.keys())

        s: Set<Int> = [1, 2, 2, 3]
        s.insert(3)
        print(s.count, s.remove(2), s.contains(2))

        o: OSet<String> = empty
        o.insert("b")
        o.insert("a")
        o.insert("b")
        print(o, o[1])
    "#;
    assert_eq!(
        output(source),
        vec![
            "[9, 3, 1, 4] 4 true",
            "4 9 [3, 1]",
            "2 2 true [\"one\", \"two\"]",
            "3 true false",
            "{\"b\", \"a\"} a",
        ]
    );
}

#[test]
fn test_empty_takes_declared_shape() {
    let source = r#"
        names: [String] = empty
        lookup: [String: [Int]] = empty
        print(names.isEmpty, lookup.count)
        lookup["a"] = empty
        lookup["a"].append(1)
        print(lookup)
    "#;
    assert_eq!(output(source), vec!["true 0", "[\"a\": [1]]"]);
}

#[test]
fn test_enum_match() {
    let source = r#"
        union Shape:
            Circle(radius: Float)
            Rect(w: Float, h: Float)
            Empty
        ::
        func area(s: Shape) -> Float:
            match s:
                Circle(r):
                    return 3.0 * r * r
                ::
                Rect(w, h):
                    return w * h
                ::
                Empty:
                    return 0.0
                ::
            ::
            return 0.0
        ::
        shapes: [Shape] = [Shape::Circle(1), Shape::Rect(2, 3), Shape::Empty]
        for s in shapes:
            print(area(s))
        ::
    "#;
    assert_eq!(output(source), vec!["3.0", "6.0", "0.0"]);
}

#[test]
fn test_match_else_arm() {
    let source = r#"
        enum Color:
            Red, Green, Blue
        ::
        c: Color = Color::Blue
        match c:
            Red:
                print("red")
            ::
            else:
                print("other", c)
            ::
        ::
    "#;
    assert_eq!(output(source), vec!["other Color::Blue"]);
}

#[test]
fn test_functions_are_hoisted() {
    let source = r#"
        print(twice(21))
        func twice(n: Int) -> Int:
            return n * 2
        ::
    "#;
    assert_eq!(output(source), vec!["42"]);
}

#[test]
fn test_recursion() {
    let source = r#"
        func fib(n: Int) -> Int:
            if n < 2:
                return n
            ::
            return fib(n - 1) + fib(n - 2)
        ::
        print(fib(20))
    "#;
    assert_eq!(output(source), vec!["6765"]);
}

#[test]
fn test_runtime_errors() {
    let cases = [
        ("a: [Int] = [1]\nprint(a[5])", "index 5 out of range"),
        ("d: [String: Int] = empty\nprint(d[\"k\"])", "not found"),
        ("x: Int = 9223372036854775807\nprint(x + 1)", "integer overflow"),
        ("z: Float = 0.0\nprint(1.0 / z)", "division by zero"),
    ];
    for (source, message) in cases {
        let err = run_captured(source).unwrap_err();
        assert_eq!(err.stage(), Stage::Runtime, "{}", source);
        assert!(err.to_string().contains(message), "{}: {}", source, err);
    }
}

#[test]
fn test_within_and_raise() {
    let source = r#"
        func parse(n: Int) throws -> Int:
            if n < 0:
                raise "negative input"
            ::
            return n * 10
        ::
        within:
            print(try parse(4))
            print(try parse(-1))
            print("unreachable")
        :: catch e:
            print("caught:", e)
        ::
        within:
            a: [Int] = empty
            a.pop()
        :: catch:
            print("recovered")
        ::
    "#;
    assert_eq!(
        output(source),
        vec!["40", "caught: negative input", "recovered"]
    );
}

#[test]
fn test_uncaught_raise_is_runtime_error() {
    let err = run_captured("print(1)\nraise \"stop\"").unwrap_err();
    assert_eq!(err.kind, ErrorKind::Raised("stop".to_string()));
    assert_eq!(err.span.map(|s| s.line), Some(2));
}
