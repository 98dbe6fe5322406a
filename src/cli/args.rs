use std::env;

use crate::{OutputMode, VmSettings};

#[derive(Debug, Clone)]
pub struct CliArgs {
    pub gc_debug: bool,
    pub gc_stats: bool,
    pub run_tests: bool,
    pub no_table: bool,
    pub trace: bool,
    pub gc_stress: bool,
    pub command: CliCommand,
}

#[derive(Debug, Clone)]
pub enum CliCommand {
    Run { file: String },
    Disasm { file: String },
}

impl CliArgs {
    pub fn parse() -> Result<Self, String> {
        let args: Vec<String> = env::args().collect();
        if args.len() < 2 {
            return Err(Self::usage_string());
        }

        let mut gc_debug = false;
        let mut gc_stats = false;
        let mut run_tests = false;
        let mut no_table = false;
        let mut trace = false;
        let mut gc_stress = false;
        let mut index = 1;

        while index < args.len() && args[index].starts_with("--") {
            match args[index].as_str() {
                "--gc-debug" => gc_debug = true,
                "--gc-stats" => gc_stats = true,
                "--run-tests" => run_tests = true,
                "--no-table" => no_table = true,
                "--trace" => trace = true,
                "--gc-stress" => gc_stress = true,
                other => return Err(format!("Unknown flag: {other}")),
            }
            index += 1;
        }

        let command = if index < args.len() {
            match args[index].as_str() {
                "disasm" => {
                    let file = args.get(index + 1).ok_or("Usage: totter disasm <program.ttb>")?.clone();
                    CliCommand::Disasm { file }
                }
                file => CliCommand::Run { file: file.to_string() },
            }
        } else if run_tests {
            CliCommand::Run { file: String::new() }
        } else {
            return Err("No program file specified".to_string());
        };

        Ok(CliArgs { gc_debug, gc_stats, run_tests, no_table, trace, gc_stress, command })
    }

    pub fn to_vm_settings(&self) -> VmSettings {
        let output_mode = if self.no_table { OutputMode::Plain } else { OutputMode::PrettyTable };
        VmSettings { output_mode, run_tests: self.run_tests, gc_debug: self.gc_debug, gc_stats: self.gc_stats, trace: self.trace, gc_stress: self.gc_stress }
    }

    fn usage_string() -> String {
        "Usage: totter [--gc-debug] [--gc-stats] [--run-tests] [--no-table] [--trace] [--gc-stress] <program.ttasm|program.ttb>\n      \
         totter disasm <program.ttb>\n\
         \n\
         Debug Output: --run-tests runs the built-in scenario suite, --gc-debug/--gc-stats print GC tables\n\
         Table Control: --no-table switches tabular output to plain text\n\
         Execution: --trace prints one line per dispatched instruction, --gc-stress collects before every allocation"
            .to_string()
    }
}
