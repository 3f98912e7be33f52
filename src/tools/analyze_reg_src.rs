//! `--analyze-reg-src`/`-r <hex>:<ulong>:<ulong>` argument parsing (spec
//! §6): guest address of the source-level instruction, IR-instruction
//! offset within it, and operand index including outputs.

use anyhow::{bail, Context, Result};

use liftgraph::request::SourceQuery;

pub fn parse_source_query(raw: &str) -> Result<SourceQuery> {
    let mut parts = raw.split(':');
    let (Some(addr_part), Some(offset_part), Some(operand_part), None) =
        (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        bail!("--analyze-reg-src expects <hex>:<ulong>:<ulong>, got \"{raw}\"");
    };

    let addr_part = addr_part.trim_start_matches("0x").trim_start_matches("0X");
    let guest_addr = u64::from_str_radix(addr_part, 16).with_context(|| format!("invalid hex address \"{addr_part}\""))?;
    let ir_offset_in_instruction: usize = offset_part.parse().with_context(|| format!("invalid IR offset \"{offset_part}\""))?;
    let operand_index: usize = operand_part.parse().with_context(|| format!("invalid operand index \"{operand_part}\""))?;

    Ok(SourceQuery {
        guest_addr,
        ir_offset_in_instruction,
        operand_index,
    })
}
