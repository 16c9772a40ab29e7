use noir::run_captured;

fn output(source: &str) -> Vec<String> {
    run_captured(source).expect("Execution failed")
}

#[test]
fn test_basic_closure() {
    let source = r#"
        x: String = "global"
        func makeClosure() -> func() -> String:
            y: String = "captured"
            func inner() -> String:
                return x + " " + y
            ::
            return inner
        ::
        closure: func() -> String = makeClosure()
        print(closure())
    "#;
    assert_eq!(output(source), vec!["global captured"]);
}

#[test]
fn test_counter_state() {
    let source = r#"
        func makeCounter() -> func() -> Int:
            i: Int = 0
            func count() -> Int:
                i = i + 1
                return i
            ::
            return count
        ::
        c1: func() -> Int = makeCounter()
        c2: func() -> Int = makeCounter()
        print(c1(), c1(), c2())
    "#;
    assert_eq!(output(source), vec!["1 2 1"]);
}

#[test]
fn test_closure_sees_later_writes() {
    let source = r#"
        base: Int = 10
        func addBase(n: Int) -> Int:
            return n + base
        ::
        print(addBase(1))
        base = 20
        print(addBase(1))
    "#;
    assert_eq!(output(source), vec!["11", "21"]);
}

#[test]
fn test_functions_as_values() {
    let source = r#"
        func apply(f: func(Int) -> Int, x: Int) -> Int:
            return f(x)
        ::
        func square(n: Int) -> Int:
            return n * n
        ::
        ops: [func(Int) -> Int] = [square]
        print(apply(square, 7), ops[0](3))
    "#;
    assert_eq!(output(source), vec!["49 9"]);
}

#[test]
fn test_function_valued_field() {
    let source = r#"
        func half(n: Int) -> Float:
            return n / 2.0
        ::
        struct Handler:
            run: func(Int) -> Float
        ::
        h: Handler = Handler(run: half)
        print(h.run(5))
    "#;
    assert_eq!(output(source), vec!["2.5"]);
}

#[test]
fn test_loop_closures_capture_their_iteration() {
    let source = r#"
        makers: [func() -> Int] = empty
        for i in 0 to 3:
            func current() -> Int:
                return i * 10
            ::
            makers.append(current)
        ::
        for m in makers:
            print(m())
        ::
    "#;
    assert_eq!(output(source), vec!["0", "10", "20"]);
}
