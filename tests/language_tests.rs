#![expect(clippy::unwrap_used)] // test code OK

use lispxp::ast::{Value, kw, nil, val, vector};
use lispxp::interop::{HostModule, HostObject, StandardHost};
use lispxp::loader::MemoryLocator;
use lispxp::parser::parse;
use lispxp::{Error, Interpreter, eval_top_level};
use std::rc::Rc;

/// Expected outcome of a whole program
#[derive(Debug, Clone)]
enum TestResult {
    Success(Value),            // Program should succeed with this last value
    SpecificError(&'static str), // Program should fail with an error whose message contains this
    AnyError,                  // Program should fail (any error)
}
use TestResult::*;

fn list(items: Vec<Value>) -> Value {
    Value::List(items)
}

fn run_cases(mut make_interp: impl FnMut() -> Interpreter, cases: Vec<(&str, TestResult)>) {
    for (source, expected) in cases {
        let mut interp = make_interp();
        let result = interp.eval_top_level(source);
        match (&expected, result) {
            (Success(value), Ok(actual)) => assert_eq!(&actual, value, "program: {source}"),
            (SpecificError(needle), Err(err)) => {
                let message = err.to_string();
                assert!(
                    message.contains(needle),
                    "program: {source}\nexpected error containing {needle:?}, got {message:?}"
                );
            }
            (AnyError, Err(_)) => {}
            (expected, actual) => {
                panic!("program: {source}\nexpected {expected:?}, got {actual:?}")
            }
        }
    }
}

#[test]
fn test_core_language() {
    let cases = vec![
        // Arithmetic and comparison
        ("(+ 1 2 (* 3 4))", Success(val(15))),
        ("(- 10)", Success(val(-10))),
        ("(/ 12 3 2)", Success(val(2))),
        ("(mod -7 3)", Success(val(2))),
        ("(< 1 2 3 4)", Success(val(true))),
        ("(< 1 3 2)", Success(val(false))),
        ("(= [1 2] [1 2])", Success(val(true))),
        ("(not= 1 2)", Success(val(true))),
        ("(/ 1 0)", SpecificError("Division by zero")),
        ("(+ 1 \"a\")", AnyError),
        // Truthiness: only nil and false are falsey
        ("(if 0 :yes :no)", Success(kw("yes"))),
        ("(if \"\" :yes :no)", Success(kw("yes"))),
        ("(if nil :yes :no)", Success(kw("no"))),
        ("(if false :yes)", Success(nil())),
        ("(and 1 2 3)", Success(val(3))),
        ("(and 1 nil 3)", Success(nil())),
        ("(or false nil 7)", Success(val(7))),
        ("(or)", Success(nil())),
        ("(cond false 1 nil 2 :else 3)", Success(val(3))),
        ("(when true 1 2 3)", Success(val(3))),
        // Bindings and shadowing
        ("(def x 1) (let [x 2 y (+ x 1)] y)", Success(val(3))),
        ("(def x 1) (let [x 2] x) x", Success(val(1))),
        ("(let [a 1 b] a)", SpecificError("even")),
        ("(let [1 2] 1)", SpecificError("symbol")),
        ("(def x 1) (set! x 5) x", Success(val(5))),
        ("(set! never-defined 5)", AnyError),
        ("undefined-thing", SpecificError("Undefined symbol: undefined-thing")),
        // Closures
        (
            "(defn make-adder [n] (fn [x] (+ x n))) (def add5 (make-adder 5)) (add5 10)",
            Success(val(15)),
        ),
        ("((fn [x y] (* x y)) 6 7)", Success(val(42))),
        ("((fn [x] x) 1 2)", SpecificError("ArityMismatch")),
        ("(fn [x x] x)", SpecificError("Duplicate parameter name")),
        ("(define square [x] (* x x)) (square 9)", Success(val(81))),
        ("(defun cube (x) (* x x x)) (cube 2)", Success(val(8))),
        ("(5 1)", SpecificError("Cannot apply non-function")),
        // Quoting and data
        ("'(1 2 foo)", Success(list(vec![val(1), val(2), Value::Symbol("foo".into())]))),
        ("(quote (a b) c)", SpecificError("quote")),
        ("[1 (+ 1 1) 3]", Success(vector(vec![1, 2, 3]))),
        ("(get {:a (+ 1 2)} :a)", Success(val(3))),
        ("(count (assoc nil :k 1))", Success(val(1))),
        ("(conj '(2 3) 1)", Success(list(vec![val(1), val(2), val(3)]))),
        ("(conj [1 2] 3 4)", Success(vector(vec![1, 2, 3, 4]))),
        ("(nth [10 20 30] 1)", Success(val(20))),
        ("(str \"a\" 1 :b nil)", Success(val("a1:b"))),
        ("(subs \"hello\" 1 3)", Success(val("el"))),
        ("(error \"boom\" 42)", SpecificError("boom 42")),
    ];
    run_cases(Interpreter::new, cases);
}

#[test]
fn test_higher_order_functions() {
    let cases = vec![
        ("(map inc [1 2 3])", Success(list(vec![val(2), val(3), val(4)]))),
        (
            "(filter (fn [x] (> x 2)) '(1 2 3 4))",
            Success(list(vec![val(3), val(4)])),
        ),
        ("(reduce + 0 [1 2 3 4])", Success(val(10))),
        ("(reduce + [1 2 3 4])", Success(val(10))),
        ("(reduce + [])", Success(val(0))),
        ("(apply max [3 9 2])", Success(val(9))),
        (
            "(defn compose [f g] (fn [x] (f (g x)))) ((compose inc inc) 1)",
            Success(val(3)),
        ),
        ("(map 5 [1 2])", SpecificError("map expects a function")),
        ("(filter inc 7)", SpecificError("filter expects a list or vector")),
        ("(map inc)", SpecificError("ArityMismatch")),
        // The primitives are ordinary values
        ("(def f map) (f inc [1 2])", Success(list(vec![val(2), val(3)]))),
        ("(apply map [inc [1 2]])", Success(list(vec![val(2), val(3)]))),
        (
            "((fn [keep] (keep (fn [x] (> x 1)) [1 2 3])) filter)",
            Success(list(vec![val(2), val(3)])),
        ),
        (
            "(map (fn [xs] (reduce + xs)) [[1 2] [3 4]])",
            Success(list(vec![val(3), val(7)])),
        ),
        ("(fn? swap!)", Success(val(true))),
        ("(def f map) (f inc)", SpecificError("ArityMismatch")),
        // A user definition takes precedence over the primitive
        ("(defn map [f xs] :mine) (map inc [1])", Success(kw("mine"))),
        (
            "(def c (atom 10)) (swap! c + 5) (swap! c - 1) @c",
            Success(val(14)),
        ),
        ("(def c (atom 0)) (reset! c 3) (deref c)", Success(val(3))),
    ];
    run_cases(Interpreter::new, cases);
}

#[test]
fn test_tail_recursion_runs_in_constant_stack() {
    let cases = vec![
        (
            "(loop [i 0 acc 0] (if (< i 100000) (recur (inc i) (+ acc 1)) acc))",
            Success(val(100000)),
        ),
        (
            "(defn count-down [n] (if (= n 0) :done (recur (dec n)))) (count-down 100000)",
            Success(kw("done")),
        ),
        ("(loop [i 0] (recur 1 2))", SpecificError("recur")),
        ("(recur 1)", SpecificError("outside of loop")),
    ];
    run_cases(Interpreter::new, cases);
}

#[test]
fn test_deep_recursion() {
    let run = || {
        let sum_to = "(defn sum-to [n] (if (= n 0) 0 (+ n (sum-to (- n 1)))))";
        let my_len = "(defn my-len [xs] (if (empty? xs) 0 (+ 1 (my-len (rest xs)))))";
        let cases = vec![
            (format!("{sum_to} (sum-to 70)"), Success(val(2485))),
            (format!("{sum_to} (sum-to 1000)"), Success(val(500500))),
            (format!("{my_len} (my-len (range 80))"), Success(val(80))),
            (
                format!("{sum_to} (map sum-to [10 1000])"),
                Success(list(vec![val(55), val(500500)])),
            ),
            // Runaway recursion hits the depth limit instead of the native stack
            (format!("{sum_to} (sum-to 100000)"), SpecificError("depth limit")),
        ];
        let cases: Vec<(&str, TestResult)> = cases
            .iter()
            .map(|(source, expected)| (source.as_str(), expected.clone()))
            .collect();
        run_cases(Interpreter::new, cases);
    };

    std::thread::Builder::new()
        .stack_size(lispxp::EVAL_STACK_SIZE)
        .spawn(run)
        .unwrap()
        .join()
        .unwrap();
}

fn namespaced_interpreter() -> Interpreter {
    let locator = MemoryLocator::new()
        .with_source("ns-b", "(ns ns-b) (def x 42) (defn twice [n] (* 2 n))")
        .with_source(
            "broken",
            "(ns broken) (def loaded-part 1) (this-is-not-defined) (def never 2)",
        );
    Interpreter::new().with_locator(locator)
}

#[test]
fn test_namespaces() {
    let cases = vec![
        ("(ns app (:require [ns-b])) ns-b/x", Success(val(42))),
        ("(ns app (:require [ns-b :as b])) (b/twice b/x)", Success(val(84))),
        ("(ns app (:require ns-b)) (ns-b/twice 1)", Success(val(2))),
        // Definitions stay in their own namespace
        ("(ns app (:require [ns-b])) x", SpecificError("Undefined symbol: x")),
        ("(ns app (:require [ns-b])) ns-b/missing", SpecificError("missing")),
        ("nope/x", AnyError),
        ("(ns a) (def v 1) (ns b) (def v 2) (ns a) v", Success(val(1))),
        // Builtins are visible from every namespace
        ("(ns fresh) (inc 1)", Success(val(2))),
        ("(ns app (:require [ns-b] :bad))", SpecificError("ns")),
        // A failing namespace is loaded as far as it got and does not abort the requirer
        (
            "(ns app (:require [broken])) broken/loaded-part",
            Success(val(1)),
        ),
        ("(ns app (:require [broken])) broken/never", AnyError),
    ];
    run_cases(namespaced_interpreter, cases);
}

#[test]
fn test_namespace_state_across_calls() {
    let mut interp = namespaced_interpreter();
    interp.eval_top_level("(ns app (:require [ns-b :as b]))").unwrap();
    assert_eq!(interp.namespaces().current_name(), "app");
    interp.eval_top_level("(def local 1)").unwrap();
    assert_eq!(interp.eval_top_level("(+ local b/x)").unwrap(), val(43));

    interp.eval_top_level("(ns user)").unwrap();
    assert!(matches!(
        interp.eval_top_level("local"),
        Err(Error::UndefinedSymbol(_))
    ));
}

fn geo_module() -> HostModule {
    fn hypot(a: f64, b: f64) -> f64 {
        a.hypot(b)
    }
    fn checked_sqrt(x: f64) -> Result<f64, Error> {
        if x < 0.0 {
            Err(Error::EvalError("negative input".into()))
        } else {
            Ok(x.sqrt())
        }
    }
    HostModule::new("geo")
        .with_function::<_, (f64, f64)>("hypot", hypot)
        .with_function::<_, (f64,)>("checked-sqrt", checked_sqrt)
        .with_value("origin", vector(vec![0, 0]))
}

fn host_interpreter() -> Interpreter {
    let host = StandardHost::new().with_module(geo_module());
    let interp = Interpreter::new().with_host(Rc::new(host));

    let counter = HostObject::new("Counter")
        .with_property("label", val("clicks"))
        .with_method("increment", |this, _args| {
            let next = match this.property("count") {
                Some(Value::Number(n)) => n + 1.0,
                _ => 1.0,
            };
            this.set_property("count", val(next));
            Ok(val(next))
        });
    interp.global_env().define("counter", counter.into_value());
    interp
}

#[test]
fn test_host_interop() {
    let cases = vec![
        // String methods on the standard host
        ("(.toUpperCase \"abc\")", Success(val("ABC"))),
        ("(. \"  pad  \" trim)", Success(val("pad"))),
        ("(.includes \"haystack\" \"st\")", Success(val(true))),
        ("(.split \"a,b\" \",\")", Success(vector(vec!["a", "b"]))),
        ("(.noSuchMethod \"abc\")", SpecificError("noSuchMethod")),
        // Host objects
        ("(.increment counter) (.increment counter)", Success(val(2))),
        ("(.-label counter)", Success(val("clicks"))),
        ("(.- counter label)", Success(val("clicks"))),
        ("(.-missing counter)", Success(nil())),
        ("(.fly counter)", SpecificError("Counter")),
        // Host modules through :import and :require
        ("(ns app (:import math)) (sqrt 16)", Success(val(4))),
        ("(ns app (:import [math pow])) (pow 2 10)", Success(val(1024))),
        ("(ns app (:import [math pow])) (sqrt 4)", AnyError),
        ("(ns app (:import [math nothing]))", SpecificError("nothing")),
        ("(ns app (:import nowhere))", AnyError),
        ("(ns app (:import geo)) (hypot 3 4)", Success(val(5))),
        ("(ns app (:import [geo origin])) origin", Success(vector(vec![0, 0]))),
        ("(ns app (:require [geo :as g])) (g/hypot 6 8)", Success(val(10))),
        ("(ns app (:import geo)) (checked-sqrt -1)", SpecificError("negative input")),
    ];
    run_cases(host_interpreter, cases);
}

#[test]
fn test_fresh_interpreters_are_isolated() {
    eval_top_level("(def leaked 1)").unwrap();
    assert!(eval_top_level("leaked").is_err());

    let mut interp = Interpreter::new();
    interp.eval_top_level("(def kept 1)").unwrap();
    interp.reset_global_state();
    assert!(interp.eval_top_level("kept").is_err());
}

#[test]
fn test_display_round_trips_through_parser() {
    let sources = [
        "(defn f [x & rest] (if (nil? x) :none x))",
        "{:a 1 :b [2 3] \"spaced key\" nil}",
        "(quote (1 2.5 \"str\" true false))",
        "[]",
        "(.toUpperCase \"abc\")",
    ];
    for source in sources {
        let parsed = parse(source).unwrap();
        let printed = parsed.to_string();
        assert_eq!(parse(&printed).unwrap(), parsed, "{source} printed as {printed}");
    }
}
