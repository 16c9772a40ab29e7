use noir::{check_source, run_captured, ErrorKind, Stage};

fn output(source: &str) -> Vec<String> {
    run_captured(source).expect("Execution failed")
}

#[test]
fn test_tasks_are_joined() {
    let source = r#"
        async func greet(n: Int):
            print("task", n)
        ::
        for i in 0 to 3:
            greet(i)
        ::
    "#;
    let mut lines = output(source);
    lines.sort();
    assert_eq!(lines, vec!["task 0", "task 1", "task 2"]);
}

#[test]
fn test_grab_serializes_writers() {
    let source = r#"
        shared counter: Int = 0
        shared finished: Int = 0

        async func worker(times: Int):
            for i in 0 to times:
                grab counter:
                    counter = counter + 1
                ::
            ::
            grab finished:
                finished = finished + 1
            ::
        ::

        for w in 0 to 4:
            worker(250)
        ::
        grab counter, finished to read:
            await finished == 4:
                print(counter)
            ::
        ::
    "#;
    assert_eq!(output(source), vec!["1000"]);
}

#[test]
fn test_producer_consumer() {
    let source = r#"
        shared queue: [Int] = empty

        async func producer(n: Int):
            for i in 0 to n:
                grab queue to write:
                    queue.append(i)
                ::
            ::
        ::

        producer(5)
        total: Int = 0
        seen: Int = 0
        while seen < 5:
            grab queue:
                await queue.count > 0:
                    total = total + queue.pop()
                    seen = seen + 1
                ::
            ::
        ::
        print(total, seen)
    "#;
    assert_eq!(output(source), vec!["10 5"]);
}

#[test]
fn test_regrab_is_self_deadlock() {
    let source = "shared a: Int = 0\ngrab a:\n  grab a to read:\n  ::\n::";
    let err = run_captured(source).unwrap_err();
    assert_eq!(err.stage(), Stage::Runtime);
    assert!(matches!(err.kind, ErrorKind::SelfDeadlock(ref name) if name == "a"));
}

#[test]
fn test_nested_grab_must_follow_declaration_order() {
    let source = "shared a: Int = 0\nshared b: Int = 0\ngrab b:\n  grab a:\n  ::\n::";
    let err = run_captured(source).unwrap_err();
    assert_eq!(err.kind, ErrorKind::LockOrder("a".to_string(), "b".to_string()));

    let ordered = "shared a: Int = 0\nshared b: Int = 0\ngrab a:\n  grab b:\n    b = a + 1\n  ::\n::\ngrab b to read:\n  print(b)\n::";
    assert_eq!(output(ordered), vec!["1"]);
}

#[test]
fn test_lock_errors_can_be_caught() {
    let source = r#"
        shared a: Int = 0
        grab a:
            within:
                grab a:
                ::
            :: catch e:
                print("caught")
            ::
            a = 2
        ::
        grab a to read:
            print(a)
        ::
    "#;
    assert_eq!(output(source), vec!["caught", "2"]);
}

#[test]
fn test_task_failure_aborts_program() {
    let source = r#"
        shared gate: Bool = false

        async func crash():
            items: [Int] = empty
            items.pop()
        ::

        crash()
        grab gate:
            await gate:
                print("never")
            ::
        ::
    "#;
    let err = run_captured(source).unwrap_err();
    assert_eq!(err.stage(), Stage::Runtime);
    assert!(err.to_string().contains("pop from an empty array"), "{}", err);
}

#[test]
fn test_async_arguments_are_copies() {
    let source = r#"
        shared results: [Int] = empty

        async func record(values: [Int]):
            values.append(99)
            grab results:
                results.append(values.count)
            ::
        ::

        mine: [Int] = [1, 2]
        record(mine)
        record(mine)
        grab results to read:
            await results.count == 2:
                print(results, mine)
            ::
        ::
    "#;
    assert_eq!(output(source), vec!["[3, 3] [1, 2]"]);
}

#[test]
fn test_tasks_work_on_copies_of_plain_globals() {
    let source = r#"
        counter: Int = 0
        shared totals: [Int] = empty

        func bump():
            counter = counter + 1
        ::

        async func worker(times: Int):
            for i in 0 to times:
                bump()
            ::
            grab totals:
                totals.append(counter)
            ::
        ::

        for w in 0 to 4:
            worker(500)
        ::
        grab totals to read:
            await totals.count == 4:
                print(totals, counter)
            ::
        ::
    "#;
    assert_eq!(output(source), vec!["[500, 500, 500, 500] 0"]);
}

#[test]
fn test_async_cannot_call_mutating_method_on_captured_value() {
    let source = r#"
        struct Tally:
            n: Int = 0
            func add():
                self.n = self.n + 1
            ::
        ::
        t: Tally = Tally()
        async func worker():
            t.add()
        ::
    "#;
    let err = check_source(source).unwrap_err();
    assert!(matches!(err.kind, ErrorKind::AsyncCapture(ref name) if name == "t"));
}

#[test]
fn test_await_releases_outer_grabs() {
    let source = r#"
        shared a: Int = 0
        shared b: Int = 0

        async func producer():
            grab a:
                a = 1
            ::
        ::

        grab a:
            producer()
            grab b:
                await a == 1:
                    b = a + 1
                ::
            ::
        ::
        grab b to read:
            print(b)
        ::
    "#;
    assert_eq!(output(source), vec!["2"]);
}

#[test]
fn test_mutating_method_needs_write_grab() {
    let source = r#"
        struct Tally:
            n: Int = 0
            func add():
                self.n = self.n + 1
            ::
        ::
        shared t: Tally = Tally()
        grab t to read:
            t.add()
        ::
    "#;
    let err = check_source(source).unwrap_err();
    assert_eq!(err.stage(), Stage::Type);
    assert!(matches!(err.kind, ErrorKind::ReadOnlyResource(ref name) if name == "t"));
}
