//! Built-in scenario tests and their reporting, run via `--run-tests`.
//! Grounded in the teacher's `testing/runner.rs`: a fixed list of
//! hand-assembled programs checked against an expected printed result,
//! reported through the same `comfy-table`/`colored` pairing gated by
//! `OutputMode`.

use colored::*;
use comfy_table::{modifiers::UTF8_SOLID_INNER_BORDERS, presets::UTF8_FULL, Attribute, Cell, Color, Table};

use crate::heap::GcStats;
use crate::interpreter::interpret;
use crate::opcode::byte;
use crate::value::Value;
use crate::vm::Vm;
use crate::OutputMode;

#[derive(Debug, Clone)]
pub struct TestResult {
    pub name: String,
    pub expected: String,
    pub actual: String,
    pub passed: bool,
}

fn check(name: &str, expected: &str, vm: &mut Vm, code: Vec<u8>, constants: Vec<Value>) -> TestResult {
    let f = vm.new_function(code, constants);
    let actual = match interpret(vm, f) {
        Ok(value) => vm.print_value(value),
        Err(fault) => format!("ERROR: {fault}"),
    };
    TestResult { name: name.to_string(), expected: expected.to_string(), actual: actual.clone(), passed: actual == expected }
}

/// Runs the fixed scenario suite, one fresh `Vm` per scenario so a failure
/// in one can't corrupt the heap state of the next.
pub fn run_vm_tests() -> Vec<TestResult> {
    let mut results = Vec::new();

    results.push({
        let mut vm = Vm::new();
        check("constant and end", "42", &mut vm, vec![byte::CONSTANT, 0, byte::END], vec![Value::Num(42.0)])
    });

    results.push({
        let mut vm = Vm::new();
        check(
            "jump_if skips on false",
            "true",
            &mut vm,
            vec![byte::TRUE, byte::FALSE, byte::JUMP_IF, 2, byte::CONSTANT, 0, byte::END],
            vec![Value::Num(0.0)],
        )
    });

    results.push({
        let mut vm = Vm::new();
        let text = vm.new_string("hi");
        check("string constant prints raw", "hi", &mut vm, vec![byte::CONSTANT, 0, byte::END], vec![Value::Obj(text)])
    });

    results.push({
        let mut vm = Vm::new();
        let body = vm.new_function(vec![byte::CONSTANT, 0, byte::END], vec![Value::Num(7.0)]);
        let selector = vm.methods.ensure("value").unwrap();
        let class = vm.define_class(None, "A".to_string());
        vm.register_method(class, selector, body);
        let instance = crate::primitive::metaclass_new(&mut vm, &[Value::Obj(class)]);
        vm.fiber.push(instance).unwrap();
        check("class method dispatch", "7", &mut vm, vec![byte::CALL_0, selector, byte::END], vec![])
    });

    results.push({
        let mut vm = Vm::new();
        let body = vm.new_function(vec![byte::CONSTANT, 0, byte::END], vec![Value::Num(7.0)]);
        let selector = vm.methods.ensure("value").unwrap();
        let base = vm.define_class(None, "A".to_string());
        vm.register_method(base, selector, body);
        let sub = vm.define_class(Some(base), "B".to_string());
        let instance = crate::primitive::metaclass_new(&mut vm, &[Value::Obj(sub)]);
        vm.fiber.push(instance).unwrap();
        check("subclass inherits method", "7", &mut vm, vec![byte::CALL_0, selector, byte::END], vec![])
    });

    results
}

pub fn report_test_results(results: &[TestResult], output_mode: OutputMode) {
    match output_mode {
        OutputMode::PrettyTable => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).apply_modifier(UTF8_SOLID_INNER_BORDERS);
            table.set_header(vec!["Test", "Expected", "Actual", "Result"]);
            for r in results {
                let status = if r.passed { "PASS" } else { "FAIL" };
                table.add_row(vec![Cell::new(&r.name), Cell::new(&r.expected), Cell::new(&r.actual), Cell::new(status)]);
            }
            println!("=== Scenario Test Results ===");
            println!("{table}");
        }
        OutputMode::Plain => {
            println!("=== Scenario Test Results ===");
            for r in results {
                let status = if r.passed { "PASS" } else { "FAIL" };
                println!("{} | expected: {} | actual: {} | {}", r.name, r.expected, r.actual, status);
            }
        }
    }
    let passed = results.iter().filter(|r| r.passed).count();
    println!("Tests passed: {}/{}", passed, results.len());
}

pub fn report_gc_stats(stats: &GcStats, output_mode: OutputMode) {
    match output_mode {
        OutputMode::PrettyTable => {
            let mut table = Table::new();
            table.load_preset(UTF8_FULL).apply_modifier(UTF8_SOLID_INNER_BORDERS);
            table.set_header(vec![
                Cell::new("GC Metric").add_attribute(Attribute::Bold).fg(Color::Cyan),
                Cell::new("Value").add_attribute(Attribute::Bold).fg(Color::White),
            ]);
            let current_color =
                if stats.current_objects > 10_000 { Color::Red } else if stats.current_objects > 1_000 { Color::Yellow } else { Color::Green };
            table.add_row(vec![Cell::new("Total Allocated"), Cell::new(stats.total_allocated.to_string()).fg(Color::Blue)]);
            table.add_row(vec![Cell::new("Total Freed"), Cell::new(stats.total_freed.to_string()).fg(Color::Green)]);
            table.add_row(vec![Cell::new("Currently Allocated"), Cell::new(stats.current_objects.to_string()).fg(current_color)]);
            table.add_row(vec![Cell::new("Collections Performed"), Cell::new(stats.collections_performed.to_string()).fg(Color::Magenta)]);
            println!("{}", "=== GC Statistics ===".bright_cyan().bold());
            println!("{table}");
        }
        OutputMode::Plain => {
            println!("{}", "=== GC Statistics ===".bright_cyan().bold());
            println!("{}: {}", "Total allocated".bright_cyan(), stats.total_allocated.to_string().blue());
            println!("{}: {}", "Total freed".bright_cyan(), stats.total_freed.to_string().green());
            println!("{}: {}", "Currently allocated".bright_cyan(), stats.current_objects.to_string().yellow());
            println!("{}: {}", "Collections performed".bright_cyan(), stats.collections_performed.to_string().magenta());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtin_scenarios_pass() {
        for result in run_vm_tests() {
            assert!(result.passed, "{}: expected {} got {}", result.name, result.expected, result.actual);
        }
    }
}
