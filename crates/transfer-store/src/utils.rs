use bitcoin::{
    opcodes::all::OP_RETURN,
    script::{Instruction, Instructions},
    Opcode, Script,
};

/// Extract next instruction and try to parse it as an opcode
pub(crate) fn next_op(instructions: &mut Instructions<'_>) -> Option<Opcode> {
    match instructions.next() {
        Some(Ok(Instruction::Op(op))) => Some(op),
        _ => None,
    }
}

/// Extract next instruction and try to parse it as a byte slice
pub(crate) fn next_bytes<'a>(instructions: &mut Instructions<'a>) -> Option<&'a [u8]> {
    match instructions.next() {
        Some(Ok(Instruction::PushBytes(bytes))) => Some(bytes.as_bytes()),
        _ => None,
    }
}

/// Data carried by an `OP_RETURN <data>` script, if that is exactly what `script` is.
pub(crate) fn op_return_data(script: &Script) -> Option<&[u8]> {
    let mut instructions = script.instructions();
    if next_op(&mut instructions) != Some(OP_RETURN) {
        return None;
    }

    let data = next_bytes(&mut instructions)?;
    if instructions.next().is_some() {
        return None;
    }

    Some(data)
}
