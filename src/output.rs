use std::io::Write;

use ladder::FeeTierRow;
use serde::Serialize;

use crate::error::Result;

/// Serialize a value as one JSON line and flush.
pub fn write_json_line<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *writer, value)?;
    writer.write_all(b"\n")?;
    writer.flush()?;
    Ok(())
}

/// Write the fee table as TSV: level, name, discount %, effective rate, benefits.
pub fn write_fee_table<W: Write>(writer: &mut W, rows: &[FeeTierRow]) -> Result<()> {
    let mut buf = String::with_capacity(128);
    for row in rows {
        buf.clear();
        buf.push_str(&row.level.to_string());
        buf.push('\t');
        buf.push_str(&row.name);
        buf.push('\t');
        buf.push_str(&row.discount_pct.to_string());
        buf.push('\t');
        buf.push_str(&row.effective_fee_rate.to_string());
        buf.push('\t');
        buf.push_str(&row.benefits.join("; "));
        buf.push('\n');
        writer.write_all(buf.as_bytes())?;
    }
    writer.flush()?;
    Ok(())
}
