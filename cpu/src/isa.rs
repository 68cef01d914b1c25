//! Instruction decoding.
//!
//! Instructions are single text lines: an opcode followed by
//! whitespace-delimited operands, each optionally wrapped in double
//! quotes. Decode failures are process faults, never engine errors.

use simnix_shared::pcb::Register;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// SET reg value
    Set { reg: Register, value: u32 },
    /// MOV_IN reg addr — load reg-width bytes from the logical address.
    MovIn { reg: Register, address: u32 },
    /// MOV_OUT addr reg — store the register at the logical address.
    MovOut { address: u32, reg: Register },
    /// SUM dst src
    Sum { dst: Register, src: Register },
    /// SUB dst src — saturating at zero.
    Sub { dst: Register, src: Register },
    /// JNZ reg target — jump to `target` when reg != 0.
    Jnz { reg: Register, target: u32 },
    /// RESIZE size — grow or shrink this process's page table.
    Resize { size: u32 },
    /// WAIT resource
    Wait { resource: String },
    /// SIGNAL resource
    Signal { resource: String },
    /// IO_GEN_SLEEP device units
    IoGenSleep { device: String, units: u32 },
    /// IO_STDIN_READ device addr_reg size_reg
    IoStdinRead {
        device: String,
        addr: Register,
        size: Register,
    },
    /// IO_STDOUT_WRITE device addr_reg size_reg
    IoStdoutWrite {
        device: String,
        addr: Register,
        size: Register,
    },
    /// EXIT
    Exit,
}

pub fn decode(line: &str) -> Result<Instruction, String> {
    let tokens: Vec<&str> = line
        .split_whitespace()
        .map(|t| t.trim_matches('"'))
        .collect();

    let instruction = match tokens.as_slice() {
        [] => return Err("empty instruction".to_string()),
        ["SET", reg, value] => Instruction::Set {
            reg: register(reg)?,
            value: number(value)?,
        },
        ["MOV_IN", reg, address] => Instruction::MovIn {
            reg: register(reg)?,
            address: number(address)?,
        },
        ["MOV_OUT", address, reg] => Instruction::MovOut {
            address: number(address)?,
            reg: register(reg)?,
        },
        ["SUM", dst, src] => Instruction::Sum {
            dst: register(dst)?,
            src: register(src)?,
        },
        ["SUB", dst, src] => Instruction::Sub {
            dst: register(dst)?,
            src: register(src)?,
        },
        ["JNZ", reg, target] => Instruction::Jnz {
            reg: register(reg)?,
            target: number(target)?,
        },
        ["RESIZE", size] => Instruction::Resize {
            size: number(size)?,
        },
        ["WAIT", resource] => Instruction::Wait {
            resource: resource.to_string(),
        },
        ["SIGNAL", resource] => Instruction::Signal {
            resource: resource.to_string(),
        },
        ["IO_GEN_SLEEP", device, units] => Instruction::IoGenSleep {
            device: device.to_string(),
            units: number(units)?,
        },
        ["IO_STDIN_READ", device, addr, size] => Instruction::IoStdinRead {
            device: device.to_string(),
            addr: register(addr)?,
            size: register(size)?,
        },
        ["IO_STDOUT_WRITE", device, addr, size] => Instruction::IoStdoutWrite {
            device: device.to_string(),
            addr: register(addr)?,
            size: register(size)?,
        },
        ["EXIT"] => Instruction::Exit,
        [op @ ("SET" | "MOV_IN" | "MOV_OUT" | "SUM" | "SUB" | "JNZ" | "RESIZE" | "WAIT"
        | "SIGNAL" | "IO_GEN_SLEEP" | "IO_STDIN_READ" | "IO_STDOUT_WRITE" | "EXIT"), ..] => {
            return Err(format!("malformed {op} instruction"))
        }
        [op, ..] => return Err(format!("unknown opcode {op}")),
    };
    Ok(instruction)
}

fn register(token: &str) -> Result<Register, String> {
    Register::from_name(token).ok_or_else(|| format!("unknown register {token}"))
}

fn number(token: &str) -> Result<u32, String> {
    token
        .parse::<u32>()
        .map_err(|_| format!("invalid numeric operand {token}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_arithmetic_and_flow() {
        assert_eq!(
            decode("SET AX 5").unwrap(),
            Instruction::Set {
                reg: Register::Ax,
                value: 5
            }
        );
        assert_eq!(
            decode("SUM EAX BX").unwrap(),
            Instruction::Sum {
                dst: Register::Eax,
                src: Register::Bx
            }
        );
        assert_eq!(
            decode("JNZ CX 0").unwrap(),
            Instruction::Jnz {
                reg: Register::Cx,
                target: 0
            }
        );
        assert_eq!(decode("EXIT").unwrap(), Instruction::Exit);
    }

    #[test]
    fn unquotes_operands() {
        assert_eq!(
            decode(r#"WAIT "disk""#).unwrap(),
            Instruction::Wait {
                resource: "disk".to_string()
            }
        );
        assert_eq!(
            decode(r#"IO_GEN_SLEEP "printer" 3"#).unwrap(),
            Instruction::IoGenSleep {
                device: "printer".to_string(),
                units: 3
            }
        );
    }

    #[test]
    fn rejects_garbage() {
        assert!(decode("").is_err());
        assert!(decode("NOP").unwrap_err().contains("unknown opcode"));
        assert!(decode("SET AX").unwrap_err().contains("malformed"));
        assert!(decode("SET ZX 1").unwrap_err().contains("unknown register"));
        assert!(decode("JNZ AX up").unwrap_err().contains("numeric"));
        assert!(decode("EXIT 1").unwrap_err().contains("malformed"));
    }
}
