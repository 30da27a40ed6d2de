//! JVM opcodes understood by the runtime together with their encoded widths.
//!
//! Every opcode the runtime executes appears here exactly once. Anything else
//! fails to decode, so the interpreter never has to guess how far to advance
//! the program counter past an instruction it doesn't know.

/// Supported JVM opcodes.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum OPCode {
    NOP = 0x00,
    IconstM1 = 0x02,
    Iconst0 = 0x03,
    Iconst1 = 0x04,
    Iconst2 = 0x05,
    Iconst3 = 0x06,
    Iconst4 = 0x07,
    Iconst5 = 0x08,
    BiPush = 0x10,
    SiPush = 0x11,
    Ldc = 0x12,
    ILoad = 0x15,
    ILoad0 = 0x1a,
    ILoad1 = 0x1b,
    ILoad2 = 0x1c,
    ILoad3 = 0x1d,
    ALoad0 = 0x2a,
    ALoad1 = 0x2b,
    ALoad2 = 0x2c,
    ALoad3 = 0x2d,
    IStore = 0x36,
    IStore0 = 0x3b,
    IStore1 = 0x3c,
    IStore2 = 0x3d,
    IStore3 = 0x3e,
    AStore0 = 0x4b,
    AStore1 = 0x4c,
    AStore2 = 0x4d,
    AStore3 = 0x4e,
    Pop = 0x57,
    Dup = 0x59,
    IAdd = 0x60,
    ISub = 0x64,
    IMul = 0x68,
    IInc = 0x84,
    IfEq = 0x99,
    IfNe = 0x9a,
    IfLt = 0x9b,
    IfGe = 0x9c,
    IfGt = 0x9d,
    IfLe = 0x9e,
    IfICmpEq = 0x9f,
    IfICmpNe = 0xa0,
    IfICmpLt = 0xa1,
    IfICmpGe = 0xa2,
    IfICmpGt = 0xa3,
    IfICmpLe = 0xa4,
    Goto = 0xa7,
    IReturn = 0xac,
    AReturn = 0xb0,
    Return = 0xb1,
    GetStatic = 0xb2,
    GetField = 0xb4,
    PutField = 0xb5,
    InvokeVirtual = 0xb6,
    InvokeSpecial = 0xb7,
    InvokeStatic = 0xb8,
    New = 0xbb,
}

impl OPCode {
    /// Encoded size of the instruction in bytes, opcode included.
    pub const fn width(self) -> usize {
        match self {
            Self::BiPush | Self::Ldc | Self::ILoad | Self::IStore => 2,
            Self::SiPush
            | Self::IInc
            | Self::IfEq
            | Self::IfNe
            | Self::IfLt
            | Self::IfGe
            | Self::IfGt
            | Self::IfLe
            | Self::IfICmpEq
            | Self::IfICmpNe
            | Self::IfICmpLt
            | Self::IfICmpGe
            | Self::IfICmpGt
            | Self::IfICmpLe
            | Self::Goto
            | Self::GetStatic
            | Self::GetField
            | Self::PutField
            | Self::InvokeVirtual
            | Self::InvokeSpecial
            | Self::InvokeStatic
            | Self::New => 3,
            _ => 1,
        }
    }

    /// Raw opcode byte.
    pub const fn byte(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for OPCode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        let op = match byte {
            0x00 => Self::NOP,
            0x02 => Self::IconstM1,
            0x03 => Self::Iconst0,
            0x04 => Self::Iconst1,
            0x05 => Self::Iconst2,
            0x06 => Self::Iconst3,
            0x07 => Self::Iconst4,
            0x08 => Self::Iconst5,
            0x10 => Self::BiPush,
            0x11 => Self::SiPush,
            0x12 => Self::Ldc,
            0x15 => Self::ILoad,
            0x1a => Self::ILoad0,
            0x1b => Self::ILoad1,
            0x1c => Self::ILoad2,
            0x1d => Self::ILoad3,
            0x2a => Self::ALoad0,
            0x2b => Self::ALoad1,
            0x2c => Self::ALoad2,
            0x2d => Self::ALoad3,
            0x36 => Self::IStore,
            0x3b => Self::IStore0,
            0x3c => Self::IStore1,
            0x3d => Self::IStore2,
            0x3e => Self::IStore3,
            0x4b => Self::AStore0,
            0x4c => Self::AStore1,
            0x4d => Self::AStore2,
            0x4e => Self::AStore3,
            0x57 => Self::Pop,
            0x59 => Self::Dup,
            0x60 => Self::IAdd,
            0x64 => Self::ISub,
            0x68 => Self::IMul,
            0x84 => Self::IInc,
            0x99 => Self::IfEq,
            0x9a => Self::IfNe,
            0x9b => Self::IfLt,
            0x9c => Self::IfGe,
            0x9d => Self::IfGt,
            0x9e => Self::IfLe,
            0x9f => Self::IfICmpEq,
            0xa0 => Self::IfICmpNe,
            0xa1 => Self::IfICmpLt,
            0xa2 => Self::IfICmpGe,
            0xa3 => Self::IfICmpGt,
            0xa4 => Self::IfICmpLe,
            0xa7 => Self::Goto,
            0xac => Self::IReturn,
            0xb0 => Self::AReturn,
            0xb1 => Self::Return,
            0xb2 => Self::GetStatic,
            0xb4 => Self::GetField,
            0xb5 => Self::PutField,
            0xb6 => Self::InvokeVirtual,
            0xb7 => Self::InvokeSpecial,
            0xb8 => Self::InvokeStatic,
            0xbb => Self::New,
            _ => return Err(byte),
        };
        Ok(op)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_every_supported_byte_back_to_itself() {
        for byte in 0..=u8::MAX {
            if let Ok(op) = OPCode::try_from(byte) {
                assert_eq!(op.byte(), byte, "{op:?}");
            }
        }
    }

    #[test]
    fn widths_match_operand_layout() {
        assert_eq!(OPCode::IAdd.width(), 1);
        assert_eq!(OPCode::BiPush.width(), 2);
        assert_eq!(OPCode::Ldc.width(), 2);
        assert_eq!(OPCode::SiPush.width(), 3);
        assert_eq!(OPCode::IInc.width(), 3);
        assert_eq!(OPCode::InvokeStatic.width(), 3);
        assert_eq!(OPCode::Goto.width(), 3);
    }

    #[test]
    fn unknown_opcodes_do_not_decode() {
        // iaload, tableswitch, wide
        for byte in [0x2e, 0xaa, 0xc4] {
            assert_eq!(OPCode::try_from(byte), Err(byte));
        }
    }
}
