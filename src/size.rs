//! Human readable size parsing for the command line tools.

use bytesize::ByteSize;

/// Parses a size like `512MiB`, `2GB` or `1024`.
///
/// Single letter and `*B` units are binary: `KB`, `MB` and `GB` mean `KiB`, `MiB` and `GiB`.
pub fn parse_size(value: &str) -> Result<u64, String> {
    let value = value.trim();
    let (number, unit) = value.split_at(value.find(|c: char| c.is_ascii_alphabetic()).unwrap_or(value.len()));

    let unit = match unit.to_ascii_lowercase().as_str() {
        "" | "b" => "B",
        "k" | "kb" => "KiB",
        "m" | "mb" => "MiB",
        "g" | "gb" => "GiB",
        "t" | "tb" => "TiB",
        "p" | "pb" => "PiB",
        _ => unit,
    };

    let size = format!("{}{}", number.trim(), unit)
        .parse::<ByteSize>()
        .map_err(|err| format!("size format incorrect: {}", err))?;

    return Ok(size.as_u64());
}
