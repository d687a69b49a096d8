/* BEGIN LICENSE
  clspv-harness, a Vulkan test harness for clspv-compiled OpenCL kernels.
  Copyright (C) 2025 SupaMaggie70 (Magnus Larsson)


  clspv-harness is free software; you can redistribute it and/or
  modify it under the terms of the GNU General Public License
  as published by the Free Software Foundation; either version 3
  of the License, or (at your option) any later version.

  clspv-harness is distributed in the hope that it will be useful,
  but WITHOUT ANY WARRANTY; without even the implied warranty of
  MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
  GNU General Public License for more details.

  You should have received a copy of the GNU General Public License
  along with this program.  If not, see <http://www.gnu.org/licenses/>.
END LICENSE */
use std::collections::HashMap;

use thiserror::Error;

use crate::{ArgKind, ArgSpec, KernelSpec, ModuleSpec, SamplerSpec, validate};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("spvmap line {line}: {kind}")]
pub struct ParseError {
    /// 1-based
    pub line: usize,
    pub kind: ParseErrorKind,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseErrorKind {
    #[error("unknown directive `{0}`")]
    UnknownTag(String),
    #[error("unknown key `{0}`")]
    UnknownKey(String),
    #[error("unknown argument kind `{0}`")]
    UnknownArgKind(String),
    #[error("key `{0}` has no value")]
    MissingValue(String),
    #[error("value `{value}` of `{key}` is not a valid number")]
    MalformedNumber { key: String, value: String },
    #[error("kernel directive without a kernel name")]
    MissingKernelName,
    #[error("unterminated quoted field")]
    UnterminatedQuote,
    #[error("kernel `{kernel}` declares argument ordinal {ordinal} twice with different contents")]
    ConflictingArgument { kernel: String, ordinal: u32 },
}

/// Parses the full text of a spvmap file, runs the ordering passes and validates the
/// result.
pub fn parse(text: &str) -> crate::Result<ModuleSpec> {
    let mut module = parse_unvalidated(text)?;
    sort_samplers(&mut module.samplers);
    for kernel in &mut module.kernels {
        reorder_args(&mut kernel.args);
    }
    validate(&module)?;
    log::debug!(
        "Parsed spvmap with {} literal samplers and {} kernels",
        module.samplers.len(),
        module.kernels.len()
    );
    Ok(module)
}

/// Sorts literal samplers by binding. The sampler-descriptor cache key depends on this
/// order being stable.
pub fn sort_samplers(samplers: &mut [SamplerSpec]) {
    samplers.sort_by_key(|s| s.binding);
}

/// Moves POD arguments behind every other argument, keeping each group in ordinal
/// order. Running it on an already ordered list changes nothing.
pub fn reorder_args(args: &mut [ArgSpec]) {
    args.sort_by_key(|a| (a.kind.is_pod(), a.ordinal));
}

fn parse_unvalidated(text: &str) -> Result<ModuleSpec, ParseError> {
    let mut module = ModuleSpec::default();
    let mut kernel_indices: HashMap<String, usize> = HashMap::new();
    // CRLF is folded first so it counts as a single terminator
    let normalized = text.replace("\r\n", "\n");
    for (i, line) in normalized.split(['\n', '\r']).enumerate() {
        let at = |kind| ParseError { line: i + 1, kind };
        let fields = split_fields(line).map_err(at)?;
        let Some((tag, rest)) = fields.split_first() else {
            continue;
        };
        match tag.as_str() {
            "" => continue,
            "sampler" => {
                let sampler = parse_sampler(rest).map_err(at)?;
                module.samplers.push(sampler);
            }
            "kernel" | "kernel_decl" => {
                let Some((name, pairs)) = rest.split_first() else {
                    return Err(at(ParseErrorKind::MissingKernelName));
                };
                let idx = *kernel_indices.entry(name.clone()).or_insert_with(|| {
                    module.kernels.push(KernelSpec::new(name.clone()));
                    module.kernels.len() - 1
                });
                if tag == "kernel_decl" || pairs.is_empty() {
                    continue;
                }
                let arg = parse_arg(pairs).map_err(at)?;
                merge_arg(&mut module.kernels[idx], arg).map_err(at)?;
            }
            other => return Err(at(ParseErrorKind::UnknownTag(other.to_owned()))),
        }
    }
    Ok(module)
}

fn merge_arg(kernel: &mut KernelSpec, arg: ArgSpec) -> Result<(), ParseErrorKind> {
    if let Some(ordinal) = arg.ordinal {
        if let Some(existing) = kernel.args.iter().find(|a| a.ordinal == Some(ordinal)) {
            if *existing == arg {
                return Ok(());
            }
            return Err(ParseErrorKind::ConflictingArgument {
                kernel: kernel.name.clone(),
                ordinal,
            });
        }
    }
    kernel.args.push(arg);
    Ok(())
}

fn parse_sampler(rest: &[String]) -> Result<SamplerSpec, ParseErrorKind> {
    let (flags, pairs) = rest
        .split_first()
        .ok_or_else(|| ParseErrorKind::MissingValue("sampler".to_owned()))?;
    let mut sampler = SamplerSpec {
        opencl_flags: parse_number("sampler", flags)?
            .ok_or_else(|| malformed("sampler", flags))?,
        descriptor_set: None,
        binding: None,
    };
    for (key, value) in key_values(pairs)? {
        match key {
            "descriptorSet" => sampler.descriptor_set = parse_number(key, value)?,
            "binding" => sampler.binding = parse_number(key, value)?,
            other => return Err(ParseErrorKind::UnknownKey(other.to_owned())),
        }
    }
    Ok(sampler)
}

fn parse_arg(pairs: &[String]) -> Result<ArgSpec, ParseErrorKind> {
    let mut arg = ArgSpec::default();
    for (key, value) in key_values(pairs)? {
        match key {
            "arg" => arg.name = Some(value.to_owned()),
            "argOrdinal" => arg.ordinal = parse_number(key, value)?,
            "descriptorSet" => arg.descriptor_set = parse_number(key, value)?,
            "binding" => arg.binding = parse_number(key, value)?,
            "offset" => arg.offset = parse_number(key, value)?,
            "argKind" | "argType" => {
                arg.kind = ArgKind::from_token(value)
                    .ok_or_else(|| ParseErrorKind::UnknownArgKind(value.to_owned()))?
            }
            // Element size of local arrays isn't needed to size them
            "arrayElemSize" => {
                parse_number(key, value)?;
            }
            "arrayNumElemSpecId" => arg.spec_constant = parse_number(key, value)?,
            "argSize" => arg.arg_size = parse_number(key, value)?,
            other => return Err(ParseErrorKind::UnknownKey(other.to_owned())),
        }
    }
    Ok(arg)
}

fn key_values(pairs: &[String]) -> Result<Vec<(&str, &str)>, ParseErrorKind> {
    pairs
        .chunks(2)
        .map(|pair| match pair {
            [key, value] => Ok((key.as_str(), value.as_str())),
            [key] => Err(ParseErrorKind::MissingValue(key.clone())),
            _ => unreachable!(),
        })
        .collect()
}

fn malformed(key: &str, value: &str) -> ParseErrorKind {
    ParseErrorKind::MalformedNumber {
        key: key.to_owned(),
        value: value.to_owned(),
    }
}

/// Decimal or `0x` hexadecimal. `-1` is the "unset" marker and yields `None`.
fn parse_number(key: &str, value: &str) -> Result<Option<u32>, ParseErrorKind> {
    if value == "-1" {
        return Ok(None);
    }
    let parsed = match value
        .strip_prefix("0x")
        .or_else(|| value.strip_prefix("0X"))
    {
        Some(hex) => u32::from_str_radix(hex, 16),
        None => value.parse::<u32>(),
    };
    parsed.map(Some).map_err(|_| malformed(key, value))
}

/// Splits one line into comma separated fields. A field starting with `"` runs to the
/// closing quote and may contain commas; `""` inside it is a literal quote.
fn split_fields(line: &str) -> Result<Vec<String>, ParseErrorKind> {
    let mut fields = Vec::new();
    let mut chars = line.chars().peekable();
    loop {
        while chars.next_if(|c| *c == ' ' || *c == '\t').is_some() {}
        let mut field = String::new();
        let quoted = chars.next_if_eq(&'"').is_some();
        if quoted {
            loop {
                match chars.next() {
                    Some('"') if chars.next_if_eq(&'"').is_some() => field.push('"'),
                    Some('"') => break,
                    Some(c) => field.push(c),
                    None => return Err(ParseErrorKind::UnterminatedQuote),
                }
            }
        }
        while let Some(c) = chars.next_if(|c| *c != ',') {
            field.push(c);
        }
        if quoted {
            fields.push(field);
        } else {
            fields.push(field.trim_end().to_owned());
        }
        if chars.next().is_none() {
            break;
        }
    }
    Ok(fields)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_plain_and_quoted_fields() {
        assert_eq!(
            split_fields(r#"kernel,"a,b",argOrdinal,0"#).unwrap(),
            vec!["kernel", "a,b", "argOrdinal", "0"]
        );
        assert_eq!(
            split_fields(r#"kernel,"say ""hi""",x"#).unwrap(),
            vec!["kernel", "say \"hi\"", "x"]
        );
        assert_eq!(split_fields("a,,b").unwrap(), vec!["a", "", "b"]);
        assert_eq!(
            split_fields(r#"kernel,"open"#),
            Err(ParseErrorKind::UnterminatedQuote)
        );
    }

    #[test]
    fn numbers() {
        assert_eq!(parse_number("k", "18"), Ok(Some(18)));
        assert_eq!(parse_number("k", "0x12"), Ok(Some(18)));
        assert_eq!(parse_number("k", "-1"), Ok(None));
        assert!(matches!(
            parse_number("k", "twelve"),
            Err(ParseErrorKind::MalformedNumber { .. })
        ));
        assert!(parse_number("k", "-2").is_err());
    }
}
