use noir::{check_source, run_captured, ErrorKind};

fn output(source: &str) -> Vec<String> {
    run_captured(source).expect("Execution failed")
}

#[test]
fn test_struct_fields_and_defaults() {
    let source = r#"
        struct Point:
            x: Float
            y: Float = 0
        ::
        p: Point = Point(x: 1, y: 2)
        q: Point = Point(3)
        q.y = 5
        print(p.x + p.y, q.x, q.y)
    "#;
    assert_eq!(output(source), vec!["3.0 3.0 5.0"]);
}

#[test]
fn test_structs_are_values() {
    let source = r#"
        struct Bag:
            items: [Int] = empty
        ::
        a: Bag = Bag()
        b: Bag = a
        b.items.append(1)
        print(a.items.count, b.items.count)
    "#;
    assert_eq!(output(source), vec!["0 1"]);
}

#[test]
fn test_methods_see_self() {
    let source = r#"
        struct Account:
            owner: String
            balance: Int = 0
            func deposit(amount: Int):
                self.balance = self.balance + amount
            ::
            func describe() -> String:
                return self.owner + " has funds"
            ::
        ::
        acct: Account = Account(owner: "ada")
        acct.deposit(10)
        acct.deposit(5)
        print(acct.balance, acct.describe())
    "#;
    assert_eq!(output(source), vec!["15 ada has funds"]);
}

#[test]
fn test_method_on_element_writes_back() {
    let source = r#"
        struct Counter:
            n: Int = 0
            func bump():
                self.n = self.n + 1
            ::
        ::
        counters: [Counter] = [Counter(), Counter()]
        counters[1].bump()
        counters[1].bump()
        print(counters[0].n, counters[1].n)
    "#;
    assert_eq!(output(source), vec!["0 2"]);
}

#[test]
fn test_class_composition() {
    let source = r#"
        struct Animal:
            name: String
            func speak() -> String:
                return "..."
            ::
            func greet() -> String:
                return "I am " + self.name
            ::
        ::
        class Dog(Animal):
            tricks: Int = 0
            func speak() -> String:
                return "woof"
            ::
        ::
        d: Dog = Dog(name: "rex", tricks: 2)
        print(d.speak(), d.greet(), d.tricks)
    "#;
    assert_eq!(output(source), vec!["woof I am rex 2"]);
}

#[test]
fn test_protocol_values() {
    let source = r#"
        protocol Shape:
            area() -> Float
        ::
        struct Square <- Shape:
            side: Float
            func area() -> Float:
                return self.side * self.side
            ::
        ::
        enum Unit conforms Shape:
            One
            func area() -> Float:
                return 1.0
            ::
        ::
        shapes: [Shape] = [Square(side: 2), Unit::One]
        total: Float = 0
        for s in shapes:
            total = total + s.area()
        ::
        print(total)
    "#;
    assert_eq!(output(source), vec!["5.0"]);
}

#[test]
fn test_enum_methods() {
    let source = r#"
        enum Light:
            Red
            Green
            func next() -> Light:
                match self:
                    Red:
                        return Light::Green
                    ::
                    Green:
                        return Light::Red
                    ::
                ::
                return Light::Red
            ::
        ::
        l: Light = Light::Red
        print(l.next(), l.next().next())
    "#;
    assert_eq!(output(source), vec!["Light::Green Light::Red"]);
}

#[test]
fn test_struct_type_errors() {
    let missing_field = "struct P:\n  x: Int\n::\np: P = P()";
    assert!(matches!(
        check_source(missing_field).unwrap_err().kind,
        ErrorKind::WrongArity(..)
    ));

    let wrong_label = "struct P:\n  x: Int\n::\np: P = P(y: 1)";
    assert!(check_source(wrong_label).is_err());

    let unknown_member = "struct P:\n  x: Int\n::\np: P = P(1)\nprint(p.z)";
    assert!(matches!(
        check_source(unknown_member).unwrap_err().kind,
        ErrorKind::UnknownMember(..)
    ));
}
