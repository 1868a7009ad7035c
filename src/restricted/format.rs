//! Number rendering and the format-spec mini-language used by f-strings
//! and `str.format`.

use crate::restricted::error::{ErrorKind, ScriptError, ScriptResult};
use crate::restricted::value::Value;

/// Shortest round-tripping float text, switching to exponent form outside
/// `1e-4 <= |f| < 1e16`.
pub fn float_repr(f: f64) -> String {
    if f.is_nan() {
        return "nan".to_string();
    }
    if f.is_infinite() {
        return if f > 0.0 { "inf" } else { "-inf" }.to_string();
    }
    if f == 0.0 {
        return if f.is_sign_negative() { "-0.0" } else { "0.0" }.to_string();
    }

    let sci = format!("{f:e}");
    let (mantissa, exp) = split_exponent(&sci);
    let negative = mantissa.starts_with('-');
    let digits: String = mantissa.chars().filter(|c| c.is_ascii_digit()).collect();

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    if (-4..16).contains(&exp) {
        if exp >= 0 {
            let int_len = exp as usize + 1;
            if digits.len() <= int_len {
                out.push_str(&digits);
                out.push_str(&"0".repeat(int_len - digits.len()));
                out.push_str(".0");
            } else {
                out.push_str(&digits[..int_len]);
                out.push('.');
                out.push_str(&digits[int_len..]);
            }
        } else {
            out.push_str("0.");
            out.push_str(&"0".repeat((-exp - 1) as usize));
            out.push_str(&digits);
        }
    } else {
        out.push_str(&digits[..1]);
        if digits.len() > 1 {
            out.push('.');
            out.push_str(&digits[1..]);
        }
        out.push_str(&exponent_suffix(exp, 'e'));
    }
    out
}

fn split_exponent(sci: &str) -> (&str, i32) {
    match sci.split_once(['e', 'E']) {
        Some((mantissa, exp)) => (mantissa, exp.parse().unwrap_or(0)),
        None => (sci, 0),
    }
}

fn exponent_suffix(exp: i32, marker: char) -> String {
    let sign = if exp < 0 { '-' } else { '+' };
    format!("{marker}{sign}{:02}", exp.unsigned_abs())
}

/// Parsed `[[fill]align][sign][#][0][width][grouping][.precision][type]`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormatSpec {
    pub fill: Option<char>,
    pub align: Option<char>,
    pub sign: Option<char>,
    pub alternate: bool,
    pub zero_pad: bool,
    pub width: Option<usize>,
    pub grouping: Option<char>,
    pub precision: Option<usize>,
    pub kind: Option<char>,
}

impl FormatSpec {
    pub fn parse(spec: &str) -> ScriptResult<Self> {
        let chars: Vec<char> = spec.chars().collect();
        let mut parsed = FormatSpec::default();
        let mut i = 0;
        let is_align = |c: char| matches!(c, '<' | '>' | '=' | '^');

        if chars.len() >= 2 && is_align(chars[1]) {
            parsed.fill = Some(chars[0]);
            parsed.align = Some(chars[1]);
            i = 2;
        } else if !chars.is_empty() && is_align(chars[0]) {
            parsed.align = Some(chars[0]);
            i = 1;
        }
        if let Some(&c) = chars.get(i) {
            if matches!(c, '+' | '-' | ' ') {
                parsed.sign = Some(c);
                i += 1;
            }
        }
        if chars.get(i) == Some(&'z') {
            i += 1;
        }
        if chars.get(i) == Some(&'#') {
            parsed.alternate = true;
            i += 1;
        }
        if chars.get(i) == Some(&'0') {
            parsed.zero_pad = true;
            i += 1;
        }
        let start = i;
        while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
            i += 1;
        }
        if i > start {
            parsed.width = Some(parse_count(&chars[start..i])?);
        }
        if let Some(&c) = chars.get(i) {
            if c == ',' || c == '_' {
                parsed.grouping = Some(c);
                i += 1;
            }
        }
        if chars.get(i) == Some(&'.') {
            i += 1;
            let start = i;
            while chars.get(i).is_some_and(|c| c.is_ascii_digit()) {
                i += 1;
            }
            if i == start {
                return Err(ScriptError::value_error("Format specifier missing precision"));
            }
            parsed.precision = Some(parse_count(&chars[start..i])?);
        }
        if let Some(&c) = chars.get(i) {
            parsed.kind = Some(c);
            i += 1;
        }
        if i != chars.len() {
            return Err(ScriptError::value_error("Invalid format specifier"));
        }
        Ok(parsed)
    }
}

fn parse_count(digits: &[char]) -> ScriptResult<usize> {
    let text: String = digits.iter().collect();
    text.parse::<usize>()
        .ok()
        .filter(|n| *n <= 10_000)
        .ok_or_else(|| ScriptError::value_error("Too many decimal digits in format string"))
}

/// `format(value, spec)`.
pub fn format_value(value: &Value, spec: &str) -> ScriptResult<String> {
    if spec.is_empty() {
        return value.to_str();
    }
    let parsed = FormatSpec::parse(spec)?;
    match value {
        Value::Str(s) => format_str(s, &parsed),
        Value::Int(_) | Value::Bool(_) => {
            let i = value.as_int().unwrap_or_default();
            match parsed.kind {
                Some('e' | 'E' | 'f' | 'F' | 'g' | 'G' | '%') => format_float(i as f64, &parsed),
                _ => format_int(i, &parsed),
            }
        }
        Value::Float(f) => format_float(*f, &parsed),
        other => Err(ScriptError::type_error(format!(
            "unsupported format string passed to {}.__format__",
            other.type_name()
        ))),
    }
}

fn unknown_code(kind: char, type_name: &str) -> ScriptError {
    ScriptError::value_error(format!(
        "Unknown format code '{kind}' for object of type '{type_name}'"
    ))
}

fn format_str(s: &str, spec: &FormatSpec) -> ScriptResult<String> {
    if let Some(kind) = spec.kind.filter(|k| *k != 's') {
        return Err(unknown_code(kind, "str"));
    }
    if spec.sign.is_some() {
        return Err(ScriptError::value_error(
            "Sign not allowed in string format specifier",
        ));
    }
    let text: String = match spec.precision {
        Some(p) => s.chars().take(p).collect(),
        None => s.to_string(),
    };
    Ok(pad(&text, "", spec, '<'))
}

fn format_int(i: i64, spec: &FormatSpec) -> ScriptResult<String> {
    if spec.precision.is_some() {
        return Err(ScriptError::value_error(
            "Precision not allowed in integer format specifier",
        ));
    }
    let magnitude = i.unsigned_abs();
    let (digits, prefix, group_size) = match spec.kind {
        None | Some('d') | Some('n') => (magnitude.to_string(), "", 3),
        Some('b') => (format!("{magnitude:b}"), "0b", 4),
        Some('o') => (format!("{magnitude:o}"), "0o", 4),
        Some('x') => (format!("{magnitude:x}"), "0x", 4),
        Some('X') => (format!("{magnitude:X}"), "0X", 4),
        Some('c') => {
            let c = u32::try_from(i)
                .ok()
                .and_then(char::from_u32)
                .ok_or_else(|| {
                    ScriptError::new(ErrorKind::OverflowError, "%c arg not in range(0x110000)")
                })?;
            return Ok(pad(&c.to_string(), "", spec, '<'));
        }
        Some(kind) => return Err(unknown_code(kind, "int")),
    };
    let digits = match spec.grouping {
        Some(sep) => group_digits(&digits, sep, group_size),
        None => digits,
    };
    let mut lead = sign_text(i < 0, spec.sign).to_string();
    if spec.alternate {
        lead.push_str(prefix);
    }
    Ok(pad(&digits, &lead, spec, '>'))
}

fn format_float(f: f64, spec: &FormatSpec) -> ScriptResult<String> {
    let negative = f.is_sign_negative() && !f.is_nan();
    let magnitude = f.abs();
    let upper = matches!(spec.kind, Some('E' | 'F' | 'G'));

    let body = if !magnitude.is_finite() {
        let text = if magnitude.is_nan() { "nan" } else { "inf" };
        let text = if upper {
            text.to_uppercase()
        } else {
            text.to_string()
        };
        if spec.kind == Some('%') {
            format!("{text}%")
        } else {
            text
        }
    } else {
        match spec.kind {
            Some('f' | 'F') => fixed(magnitude, spec.precision.unwrap_or(6), spec.alternate),
            Some('e' | 'E') => {
                scientific(magnitude, spec.precision.unwrap_or(6), spec.alternate, upper)
            }
            Some('g' | 'G') => general(magnitude, spec.precision.unwrap_or(6), spec.alternate, upper),
            Some('%') => format!(
                "{}%",
                fixed(magnitude * 100.0, spec.precision.unwrap_or(6), spec.alternate)
            ),
            None => match spec.precision {
                Some(p) => {
                    let text = general(magnitude, p.max(1), spec.alternate, false);
                    if text.contains(['.', 'e']) {
                        text
                    } else {
                        format!("{text}.0")
                    }
                }
                None => float_repr(magnitude),
            },
            Some(kind) => return Err(unknown_code(kind, "float")),
        }
    };

    let body = match spec.grouping {
        Some(sep) if magnitude.is_finite() => {
            let split = body
                .find(|c: char| !c.is_ascii_digit())
                .unwrap_or(body.len());
            format!("{}{}", group_digits(&body[..split], sep, 3), &body[split..])
        }
        _ => body,
    };
    Ok(pad(&body, sign_text(negative, spec.sign), spec, '>'))
}

fn fixed(f: f64, precision: usize, alternate: bool) -> String {
    let mut text = format!("{f:.precision$}");
    if alternate && precision == 0 {
        text.push('.');
    }
    text
}

fn scientific(f: f64, precision: usize, alternate: bool, upper: bool) -> String {
    let sci = format!("{f:.precision$e}");
    let (mantissa, exp) = split_exponent(&sci);
    let mut mantissa = mantissa.to_string();
    if alternate && precision == 0 {
        mantissa.push('.');
    }
    let marker = if upper { 'E' } else { 'e' };
    format!("{mantissa}{}", exponent_suffix(exp, marker))
}

fn general(f: f64, precision: usize, alternate: bool, upper: bool) -> String {
    let precision = precision.max(1);
    if f == 0.0 {
        return if alternate {
            format!("{:.*}", precision - 1, 0.0)
        } else {
            "0".to_string()
        };
    }
    let sci = format!("{:.*e}", precision - 1, f);
    let (_, exp) = split_exponent(&sci);
    let text = if exp >= -4 && (exp as i64) < precision as i64 {
        let decimals = (precision as i64 - 1 - exp as i64).max(0) as usize;
        format!("{f:.decimals$}")
    } else {
        scientific(f, precision - 1, false, upper)
    };
    if alternate {
        return text;
    }
    strip_trailing_zeros(&text)
}

fn strip_trailing_zeros(text: &str) -> String {
    let (mantissa, suffix) = match text.find(['e', 'E']) {
        Some(pos) => text.split_at(pos),
        None => (text, ""),
    };
    if !mantissa.contains('.') {
        return text.to_string();
    }
    let trimmed = mantissa.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed}{suffix}")
}

fn sign_text(negative: bool, sign: Option<char>) -> &'static str {
    match (negative, sign) {
        (true, _) => "-",
        (false, Some('+')) => "+",
        (false, Some(' ')) => " ",
        _ => "",
    }
}

fn group_digits(digits: &str, sep: char, size: usize) -> String {
    let chars: Vec<char> = digits.chars().collect();
    let mut out = String::with_capacity(chars.len() + chars.len() / size);
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && (chars.len() - i) % size == 0 {
            out.push(sep);
        }
        out.push(*c);
    }
    out
}

fn pad(body: &str, lead: &str, spec: &FormatSpec, default_align: char) -> String {
    let (fill, align) = match (spec.fill, spec.align) {
        (fill, Some(align)) => (fill.unwrap_or(' '), align),
        (_, None) if spec.zero_pad && default_align == '>' => ('0', '='),
        (_, None) => (' ', default_align),
    };
    let len = lead.chars().count() + body.chars().count();
    let width = spec.width.unwrap_or(0);
    if len >= width {
        return format!("{lead}{body}");
    }
    let gap = width - len;
    let filler = |n: usize| fill.to_string().repeat(n);
    match align {
        '<' => format!("{lead}{body}{}", filler(gap)),
        '^' => format!("{}{lead}{body}{}", filler(gap / 2), filler(gap - gap / 2)),
        '=' => format!("{lead}{}{body}", filler(gap)),
        _ => format!("{}{lead}{body}", filler(gap)),
    }
}
