use std::fs;

use crate::bytecode;
use crate::cli::args::{CliArgs, CliCommand};
use crate::interpreter::interpret;
use crate::testing::{report_gc_stats, report_test_results, run_vm_tests};
use crate::vm::{Vm, VmConfig};

pub fn execute_command(args: &CliArgs) -> Result<(), Box<dyn std::error::Error>> {
    let settings = args.to_vm_settings();

    if args.run_tests {
        let results = run_vm_tests();
        report_test_results(&results, settings.output_mode);
    }

    match &args.command {
        CliCommand::Run { file } if file.is_empty() => Ok(()),
        CliCommand::Run { file } => {
            let mut vm = Vm::with_config(VmConfig { gc_stress: settings.gc_stress, gc_stats: settings.gc_stats, trace: settings.trace });
            let entry = if file.ends_with(".ttb") {
                let bytes = fs::read(file)?;
                let code = bytecode::load_bytecode(&mut &bytes[..])?;
                vm.new_function(code, Vec::new())
            } else {
                let source = fs::read_to_string(file)?;
                let built = bytecode::assemble(&mut vm, &source)?;
                *built.get("main").ok_or("assembled program has no FUNCTION main")?
            };

            let result = interpret(&mut vm, entry)?;
            println!("{}", vm.print_value(result));

            if settings.gc_debug || settings.gc_stats {
                report_gc_stats(&vm.gc_stats(), settings.output_mode);
            }
            Ok(())
        }
        CliCommand::Disasm { file } => {
            let bytes = fs::read(file)?;
            let code = bytecode::load_bytecode(&mut &bytes[..])?;
            print!("{}", bytecode::disassemble(&code)?);
            Ok(())
        }
    }
}
