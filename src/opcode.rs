/// Raw opcode byte values (§6). The interpreter dispatches on these bytes
/// directly, same as the source; `Opcode` below exists only for the
/// disassembler, assembler, and tests, where a named enum reads better than
/// a bare integer.
pub mod byte {
    pub const CONSTANT: u8 = 0;
    pub const NULL: u8 = 1;
    pub const FALSE: u8 = 2;
    pub const TRUE: u8 = 3;
    pub const CLASS: u8 = 4;
    pub const SUBCLASS: u8 = 5;
    pub const METACLASS: u8 = 6;
    pub const METHOD: u8 = 7;
    pub const LOAD_LOCAL: u8 = 8;
    pub const STORE_LOCAL: u8 = 9;
    pub const LOAD_GLOBAL: u8 = 10;
    pub const STORE_GLOBAL: u8 = 11;
    pub const DUP: u8 = 12;
    pub const POP: u8 = 13;
    /// CALL_0 .. CALL_10 occupy 14..=24; dispatch depends on
    /// `instruction - CALL_0` being the argument count, per the contract.
    pub const CALL_0: u8 = 14;
    pub const CALL_10: u8 = 24;
    pub const JUMP: u8 = 25;
    pub const JUMP_IF: u8 = 26;
    pub const IS: u8 = 27;
    pub const END: u8 = 28;
}

/// A disassembler/assembler-facing view of one instruction. Never used by
/// the interpreter's own dispatch loop, which reads `fn.code` directly.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Opcode {
    Constant(u8),
    Null,
    False,
    True,
    Class,
    Subclass,
    Metaclass,
    Method { selector: u8, constant: u8 },
    LoadLocal(u8),
    StoreLocal(u8),
    LoadGlobal(u8),
    StoreGlobal(u8),
    Dup,
    Pop,
    Call { num_args: u8, selector: u8 },
    Jump(u8),
    JumpIf(u8),
    Is,
    End,
}

impl Opcode {
    pub fn mnemonic(self) -> &'static str {
        match self {
            Opcode::Constant(_) => "CONSTANT",
            Opcode::Null => "NULL",
            Opcode::False => "FALSE",
            Opcode::True => "TRUE",
            Opcode::Class => "CLASS",
            Opcode::Subclass => "SUBCLASS",
            Opcode::Metaclass => "METACLASS",
            Opcode::Method { .. } => "METHOD",
            Opcode::LoadLocal(_) => "LOAD_LOCAL",
            Opcode::StoreLocal(_) => "STORE_LOCAL",
            Opcode::LoadGlobal(_) => "LOAD_GLOBAL",
            Opcode::StoreGlobal(_) => "STORE_GLOBAL",
            Opcode::Dup => "DUP",
            Opcode::Pop => "POP",
            Opcode::Call { .. } => "CALL",
            Opcode::Jump(_) => "JUMP",
            Opcode::JumpIf(_) => "JUMP_IF",
            Opcode::Is => "IS",
            Opcode::End => "END",
        }
    }

    /// Decodes one instruction starting at `code[ip]`, returning it and the
    /// index of the next instruction.
    pub fn decode(code: &[u8], ip: usize) -> Result<(Opcode, usize), crate::error::VmFault> {
        use crate::error::VmFault;
        let read = |i: usize| -> Result<u8, VmFault> { code.get(i).copied().ok_or(VmFault::TruncatedBytecode) };

        let op = read(ip)?;
        let mut next = ip + 1;
        let mut arg = || -> Result<u8, VmFault> {
            let b = read(next)?;
            next += 1;
            Ok(b)
        };

        let decoded = match op {
            byte::CONSTANT => Opcode::Constant(arg()?),
            byte::NULL => Opcode::Null,
            byte::FALSE => Opcode::False,
            byte::TRUE => Opcode::True,
            byte::CLASS => Opcode::Class,
            byte::SUBCLASS => Opcode::Subclass,
            byte::METACLASS => Opcode::Metaclass,
            byte::METHOD => {
                let selector = arg()?;
                let constant = arg()?;
                Opcode::Method { selector, constant }
            }
            byte::LOAD_LOCAL => Opcode::LoadLocal(arg()?),
            byte::STORE_LOCAL => Opcode::StoreLocal(arg()?),
            byte::LOAD_GLOBAL => Opcode::LoadGlobal(arg()?),
            byte::STORE_GLOBAL => Opcode::StoreGlobal(arg()?),
            byte::DUP => Opcode::Dup,
            byte::POP => Opcode::Pop,
            byte::JUMP => Opcode::Jump(arg()?),
            byte::JUMP_IF => Opcode::JumpIf(arg()?),
            byte::IS => Opcode::Is,
            byte::END => Opcode::End,
            n if (byte::CALL_0..=byte::CALL_10).contains(&n) => {
                let num_args = n - byte::CALL_0;
                let selector = arg()?;
                Opcode::Call { num_args, selector }
            }
            other => return Err(VmFault::UnknownOpcode(other)),
        };

        Ok((decoded, next))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_constant_with_operand() {
        let code = [byte::CONSTANT, 7];
        let (op, next) = Opcode::decode(&code, 0).unwrap();
        assert_eq!(op, Opcode::Constant(7));
        assert_eq!(next, 2);
    }

    #[test]
    fn decodes_call_n_arity_from_offset() {
        let code = [byte::CALL_0 + 3, 9];
        let (op, _) = Opcode::decode(&code, 0).unwrap();
        assert_eq!(op, Opcode::Call { num_args: 3, selector: 9 });
    }

    #[test]
    fn truncated_operand_is_an_error() {
        let code = [byte::CONSTANT];
        assert!(Opcode::decode(&code, 0).is_err());
    }

    #[test]
    fn unknown_opcode_is_an_error() {
        let code = [200u8];
        assert!(matches!(Opcode::decode(&code, 0), Err(crate::error::VmFault::UnknownOpcode(200))));
    }
}
