//! Byte-code encoding of a chunk
//!
//! The chunk becomes a sequence of `string.char(...)` calls that rebuild the
//! original bytes at load time, followed by a `load` of the result.

use std::fmt::Write as _;

use crate::code_generator::lua_string;

/// Byte codes per `string.char` call; stays below common argument limits
pub const CHUNK_SIZE: usize = 200;

/// Encode `source` as Lua that loads the original text under `chunk_name`
pub fn encode(source: &str, chunk_name: &str) -> String {
    let blocks: Vec<String> = source
        .as_bytes()
        .chunks(CHUNK_SIZE)
        .map(|chunk| {
            let codes: Vec<String> = chunk.iter().map(u8::to_string).collect();
            format!("string.char({})", codes.join(","))
        })
        .collect();

    let expression = match blocks.as_slice() {
        [] => "\"\"".to_owned(),
        [single] => single.clone(),
        many => format!("table.concat({{ {} }})", many.join(", ")),
    };

    let mut output = String::with_capacity(expression.len() + 128);
    let _ = writeln!(output, "local __lp_source = {expression}");
    let _ = writeln!(
        output,
        "local __lp_chunk = assert(load(__lp_source, {}))",
        lua_string(chunk_name)
    );
    output.push_str("return __lp_chunk(...)\n");
    output
}
