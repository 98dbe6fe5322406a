//! Host tooling around the bytecode contract of §6: a binary loader/writer
//! for fixture files, a disassembler for `--trace`-style diagnostics, and a
//! line-oriented assembler for hand-written test programs. None of this is
//! a language front end — there is no lexer, no expression grammar, no
//! scoping. A real compiler would call `Vm::new_function` directly.

use std::collections::HashMap;
use std::io::{self, Read, Write};

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};

use crate::error::VmFault;
use crate::opcode::{byte, Opcode};
use crate::value::Value;
use crate::vm::Vm;

/// One constant-pool entry as written by the assembler, before it is
/// resolved against already-built functions.
#[derive(Debug, Clone, PartialEq)]
enum ConstantSource {
    Num(f64),
    Str(String),
    /// References another `FUNCTION` block by name; only valid if that
    /// block appears earlier in the source (functions are built bottom-up).
    FnRef(String),
}

/// Parses and builds every `FUNCTION` block in `source`, in file order, and
/// returns a name -> `ObjRef` map the caller can use to find its entry
/// point. Symbol and global names are interned into `vm` as they're seen.
pub fn assemble(vm: &mut Vm, source: &str) -> Result<HashMap<String, crate::value::ObjRef>, VmFault> {
    let blocks = parse_blocks(source)?;
    let mut built = HashMap::new();
    for block in blocks {
        let mut constants = Vec::with_capacity(block.constants.len());
        for c in &block.constants {
            constants.push(resolve_constant(vm, c, &built)?);
        }
        let code = assemble_code(vm, &block.lines)?;
        let fn_ref = vm.new_function(code, constants);
        built.insert(block.name, fn_ref);
    }
    Ok(built)
}

fn resolve_constant(vm: &mut Vm, source: &ConstantSource, built: &HashMap<String, crate::value::ObjRef>) -> Result<Value, VmFault> {
    match source {
        ConstantSource::Num(n) => Ok(Value::Num(*n)),
        ConstantSource::Str(text) => Ok(Value::Obj(vm.new_string(text))),
        ConstantSource::FnRef(name) => built
            .get(name)
            .map(|r| Value::Obj(*r))
            .ok_or(VmFault::InvalidValue("FUNCTION referenced before it was defined")),
    }
}

struct RawBlock {
    name: String,
    lines: Vec<String>,
    constants: Vec<ConstantSource>,
}

/// First pass: split the source into `FUNCTION name ... END_FUNCTION`
/// blocks, each with its own `CONSTANTS ... END_CONSTANTS` header.
fn parse_blocks(source: &str) -> Result<Vec<RawBlock>, VmFault> {
    let mut blocks = Vec::new();
    let mut lines = source.lines().map(str::trim).filter(|l| !l.is_empty() && !l.starts_with('#'));

    while let Some(line) = lines.next() {
        let Some(name) = line.strip_prefix("FUNCTION ") else {
            return Err(VmFault::InvalidValue("expected FUNCTION <name>"));
        };
        let mut constants = Vec::new();
        let mut body_lines = Vec::new();
        let mut in_constants = false;
        loop {
            let line = lines.next().ok_or(VmFault::InvalidValue("unterminated FUNCTION block"))?;
            match line {
                "CONSTANTS" => in_constants = true,
                "END_CONSTANTS" => in_constants = false,
                "END_FUNCTION" => break,
                _ if in_constants => constants.push(parse_constant(line)?),
                _ => body_lines.push(line.to_string()),
            }
        }
        blocks.push(RawBlock { name: name.trim().to_string(), lines: body_lines, constants });
    }
    Ok(blocks)
}

fn parse_constant(line: &str) -> Result<ConstantSource, VmFault> {
    let mut parts = line.splitn(2, ' ');
    let tag = parts.next().unwrap_or("");
    let rest = parts.next().unwrap_or("").trim();
    match tag {
        "NUM" => rest.parse::<f64>().map(ConstantSource::Num).map_err(|_| VmFault::InvalidValue("bad NUM constant")),
        "STR" => Ok(ConstantSource::Str(rest.trim_matches('"').to_string())),
        "FN" => Ok(ConstantSource::FnRef(rest.to_string())),
        _ => Err(VmFault::InvalidValue("unknown constant tag (expected NUM, STR, or FN)")),
    }
}

/// Second pass: turn mnemonic lines into raw bytes, resolving `LABEL name`
/// pseudo-ops into forward jump offsets and symbol/global names into their
/// interned IDs.
fn assemble_code(vm: &mut Vm, lines: &[String]) -> Result<Vec<u8>, VmFault> {
    // Pass 1: strip LABEL pseudo-ops, recording the byte offset each label
    // resolves to once every real instruction's width is known.
    let mut labels = HashMap::new();
    let mut instructions = Vec::new();
    let mut offset = 0usize;
    for line in lines {
        if let Some(name) = line.strip_prefix("LABEL ") {
            labels.insert(name.trim().to_string(), offset);
            continue;
        }
        let mut tokens = line.split_whitespace();
        let mnemonic = tokens.next().ok_or(VmFault::InvalidValue("empty instruction line"))?;
        let args: Vec<&str> = tokens.collect();
        offset += instruction_width(mnemonic)?;
        instructions.push((mnemonic.to_string(), args.iter().map(|s| s.to_string()).collect::<Vec<_>>()));
    }

    let mut code = Vec::with_capacity(offset);
    let mut pos = 0usize;
    for (mnemonic, args) in &instructions {
        let width = instruction_width(mnemonic)?;
        emit(vm, &mut code, mnemonic, args, pos, &labels)?;
        pos += width;
    }
    Ok(code)
}

fn instruction_width(mnemonic: &str) -> Result<usize, VmFault> {
    Ok(match mnemonic {
        "CONSTANT" | "LOAD_LOCAL" | "STORE_LOCAL" | "LOAD_GLOBAL" | "STORE_GLOBAL" | "JUMP" | "JUMP_IF" => 2,
        "METHOD" => 3,
        "NULL" | "FALSE" | "TRUE" | "CLASS" | "SUBCLASS" | "METACLASS" | "DUP" | "POP" | "IS" | "END" => 1,
        _ if mnemonic.starts_with("CALL_") => 2,
        _ => return Err(VmFault::InvalidValue("unknown mnemonic")),
    })
}

fn emit(
    vm: &mut Vm,
    out: &mut Vec<u8>,
    mnemonic: &str,
    args: &[String],
    pos: usize,
    labels: &HashMap<String, usize>,
) -> Result<(), VmFault> {
    let decimal_or_symbol = |table: &mut crate::symbol::SymbolTable, token: &str| -> Result<u8, VmFault> {
        token.parse::<u8>().ok().or_else(|| table.ensure(token)).ok_or(VmFault::SymbolTableFull)
    };

    match mnemonic {
        "CONSTANT" => { out.push(byte::CONSTANT); out.push(parse_u8(&args[0])?); }
        "NULL" => out.push(byte::NULL),
        "FALSE" => out.push(byte::FALSE),
        "TRUE" => out.push(byte::TRUE),
        "CLASS" => out.push(byte::CLASS),
        "SUBCLASS" => out.push(byte::SUBCLASS),
        "METACLASS" => out.push(byte::METACLASS),
        "METHOD" => {
            out.push(byte::METHOD);
            out.push(decimal_or_symbol(&mut vm.methods, &args[0])?);
            out.push(parse_u8(&args[1])?);
        }
        "LOAD_LOCAL" => { out.push(byte::LOAD_LOCAL); out.push(parse_u8(&args[0])?); }
        "STORE_LOCAL" => { out.push(byte::STORE_LOCAL); out.push(parse_u8(&args[0])?); }
        "LOAD_GLOBAL" => { out.push(byte::LOAD_GLOBAL); out.push(decimal_or_symbol(&mut vm.global_names, &args[0])?); }
        "STORE_GLOBAL" => { out.push(byte::STORE_GLOBAL); out.push(decimal_or_symbol(&mut vm.global_names, &args[0])?); }
        "DUP" => out.push(byte::DUP),
        "POP" => out.push(byte::POP),
        "JUMP" => { out.push(byte::JUMP); out.push(label_offset(&args[0], pos, labels)?); }
        "JUMP_IF" => { out.push(byte::JUMP_IF); out.push(label_offset(&args[0], pos, labels)?); }
        "IS" => out.push(byte::IS),
        "END" => out.push(byte::END),
        _ if mnemonic.starts_with("CALL_") => {
            let n: u8 = mnemonic[5..].parse().map_err(|_| VmFault::InvalidValue("bad CALL_n mnemonic"))?;
            out.push(byte::CALL_0 + n);
            out.push(decimal_or_symbol(&mut vm.methods, &args[0])?);
        }
        _ => return Err(VmFault::InvalidValue("unknown mnemonic")),
    }
    Ok(())
}

fn parse_u8(token: &str) -> Result<u8, VmFault> {
    token.parse().map_err(|_| VmFault::InvalidValue("expected a decimal byte operand"))
}

/// Jump offsets are relative to the byte just past the operand (§6: the
/// interpreter advances past `JUMP`'s own operand before adding the
/// offset), so `label - (pos + 2)`.
fn label_offset(label: &str, pos: usize, labels: &HashMap<String, usize>) -> Result<u8, VmFault> {
    let target = *labels.get(label).ok_or(VmFault::InvalidValue("undefined LABEL"))?;
    let from = pos + 2;
    if target < from {
        return Err(VmFault::InvalidValue("jump offsets must be forward-only"));
    }
    u8::try_from(target - from).map_err(|_| VmFault::InvalidValue("jump target too far for a single byte offset"))
}

/// Renders every instruction in `code` as `IP  MNEMONIC operands`, for
/// `--trace`-style diagnostics and the CLI `disasm` subcommand.
pub fn disassemble(code: &[u8]) -> Result<String, VmFault> {
    let mut out = String::new();
    let mut ip = 0;
    while ip < code.len() {
        let (op, next) = Opcode::decode(code, ip)?;
        out.push_str(&format!("{ip:04} {}", op.mnemonic()));
        match op {
            Opcode::Constant(n) | Opcode::LoadLocal(n) | Opcode::StoreLocal(n) | Opcode::LoadGlobal(n)
            | Opcode::StoreGlobal(n) | Opcode::Jump(n) | Opcode::JumpIf(n) => out.push_str(&format!(" {n}")),
            Opcode::Method { selector, constant } => out.push_str(&format!(" {selector} {constant}")),
            Opcode::Call { num_args, selector } => out.push_str(&format!(" selector={selector} (args={num_args})")),
            _ => {}
        }
        out.push('\n');
        ip = next;
    }
    Ok(out)
}

const MAGIC: &[u8; 4] = b"TTLK";

/// Writes a single function's flat bytecode buffer to `writer` (§6):
/// magic, version, code length + bytes. The constant pool is not part of
/// this format — fixtures built this way carry no constants, matching the
/// teacher's own loader, which only round-trips the instruction stream.
pub fn write_bytecode<W: Write>(writer: &mut W, code: &[u8]) -> io::Result<()> {
    writer.write_all(MAGIC)?;
    writer.write_u8(1)?;
    writer.write_u32::<LittleEndian>(code.len() as u32)?;
    writer.write_all(code)?;
    Ok(())
}

pub fn load_bytecode<R: Read>(reader: &mut R) -> io::Result<Vec<u8>> {
    let mut magic = [0u8; 4];
    reader.read_exact(&mut magic)?;
    if &magic != MAGIC {
        return Err(io::Error::new(io::ErrorKind::InvalidData, "not a tottertalk bytecode file"));
    }
    let _version = reader.read_u8()?;
    let len = reader.read_u32::<LittleEndian>()? as usize;
    let mut code = vec![0u8; len];
    reader.read_exact(&mut code)?;
    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn binary_round_trip_preserves_code() {
        let code = vec![byte::TRUE, byte::FALSE, byte::END];
        let mut buf = Vec::new();
        write_bytecode(&mut buf, &code).unwrap();
        let loaded = load_bytecode(&mut &buf[..]).unwrap();
        assert_eq!(loaded, code);
    }

    #[test]
    fn loading_a_foreign_file_is_an_error() {
        let garbage = b"not bytecode at all".to_vec();
        assert!(load_bytecode(&mut &garbage[..]).is_err());
    }

    #[test]
    fn disassemble_renders_one_line_per_instruction() {
        let code = vec![byte::CONSTANT, 3, byte::END];
        let text = disassemble(&code).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(text.contains("CONSTANT 3"));
    }

    #[test]
    fn assembler_builds_a_callable_function() {
        let mut vm = Vm::new();
        let source = "FUNCTION main\nCONSTANTS\nNUM 42\nEND_CONSTANTS\nCONSTANT 0\nEND\nEND_FUNCTION\n";
        let built = assemble(&mut vm, source).unwrap();
        let main_ref = built["main"];
        let result = crate::interpreter::interpret(&mut vm, main_ref).unwrap();
        assert_eq!(result, Value::Num(42.0));
    }

    #[test]
    fn assembler_resolves_forward_jump_labels() {
        let mut vm = Vm::new();
        let source = "FUNCTION main\nTRUE\nFALSE\nJUMP_IF skip\nFALSE\nLABEL skip\nEND\nEND_FUNCTION\n";
        let built = assemble(&mut vm, source).unwrap();
        let main_ref = built["main"];
        let result = crate::interpreter::interpret(&mut vm, main_ref).unwrap();
        assert_eq!(result, Value::True);
    }

    #[test]
    fn assembler_resolves_nested_function_constants() {
        let mut vm = Vm::new();
        let source = "FUNCTION inner\nCONSTANTS\nNUM 7\nEND_CONSTANTS\nCONSTANT 0\nEND\nEND_FUNCTION\n\
                      FUNCTION main\nCONSTANTS\nFN inner\nEND_CONSTANTS\nCONSTANT 0\nEND\nEND_FUNCTION\n";
        let built = assemble(&mut vm, source).unwrap();
        assert!(built.contains_key("inner"));
        assert!(built.contains_key("main"));
    }
}
