//! printf-style render formats for field values.
//!
//! A [`FormatSpec`] holds exactly one conversion (`%d`, `%f`, `%e`, or `%s`)
//! with optional flags, width, and precision, surrounded by literal text.
//! Specs are parsed when a field is registered so rendering itself never fails.

use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::{
    error::{CodecError, Result},
    field::{FieldKind, Value},
};

const DEFAULT_FLOAT_PRECISION: usize = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Conversion {
    Decimal,
    Fixed,
    Exponent,
    Str,
}

impl Conversion {
    fn from_char(ch: char) -> Option<Self> {
        match ch {
            'd' => Some(Conversion::Decimal),
            'f' => Some(Conversion::Fixed),
            'e' => Some(Conversion::Exponent),
            's' => Some(Conversion::Str),
            _ => None,
        }
    }

    pub fn accepts(self, kind: FieldKind) -> bool {
        match self {
            Conversion::Decimal => kind == FieldKind::Integer,
            Conversion::Fixed | Conversion::Exponent => kind == FieldKind::Float,
            Conversion::Str => true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct FormatSpec {
    raw: String,
    prefix: String,
    suffix: String,
    left_justify: bool,
    zero_pad: bool,
    plus_sign: bool,
    space_sign: bool,
    width: Option<usize>,
    precision: Option<usize>,
    conversion: Conversion,
}

impl FormatSpec {
    pub fn parse(spec: &str) -> Result<Self> {
        let invalid = |reason: &str| CodecError::InvalidFormat {
            spec: spec.to_string(),
            reason: reason.to_string(),
        };

        let mut chars = spec.chars().peekable();
        let mut prefix = String::new();
        loop {
            match chars.next() {
                Some('%') if chars.peek() == Some(&'%') => {
                    chars.next();
                    prefix.push('%');
                }
                Some('%') => break,
                Some(other) => prefix.push(other),
                None => return Err(invalid("missing conversion")),
            }
        }

        let (mut left_justify, mut zero_pad, mut plus_sign, mut space_sign) =
            (false, false, false, false);
        while let Some(&flag) = chars.peek() {
            match flag {
                '-' => left_justify = true,
                '0' => zero_pad = true,
                '+' => plus_sign = true,
                ' ' => space_sign = true,
                _ => break,
            }
            chars.next();
        }

        let width = take_number(&mut chars);
        let precision = if chars.peek() == Some(&'.') {
            chars.next();
            Some(take_number(&mut chars).unwrap_or(0))
        } else {
            None
        };

        let conversion = chars
            .next()
            .ok_or_else(|| invalid("missing conversion character"))
            .and_then(|ch| {
                Conversion::from_char(ch)
                    .ok_or_else(|| invalid(&format!("unsupported conversion '{ch}'")))
            })?;

        let mut suffix = String::new();
        while let Some(ch) = chars.next() {
            if ch == '%' {
                if chars.peek() == Some(&'%') {
                    chars.next();
                    suffix.push('%');
                    continue;
                }
                return Err(invalid("only one conversion is allowed"));
            }
            suffix.push(ch);
        }

        Ok(FormatSpec {
            raw: spec.to_string(),
            prefix,
            suffix,
            left_justify,
            zero_pad,
            plus_sign,
            space_sign,
            width,
            precision,
            conversion,
        })
    }

    /// Kind-appropriate format used when a descriptor does not declare one.
    pub fn default_for(kind: FieldKind) -> Self {
        let raw = match kind {
            FieldKind::Integer => "%d",
            FieldKind::Float | FieldKind::Text => "%s",
        };
        FormatSpec {
            raw: raw.to_string(),
            prefix: String::new(),
            suffix: String::new(),
            left_justify: false,
            zero_pad: false,
            plus_sign: false,
            space_sign: false,
            width: None,
            precision: None,
            conversion: if kind == FieldKind::Integer {
                Conversion::Decimal
            } else {
                Conversion::Str
            },
        }
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn conversion(&self) -> Conversion {
        self.conversion
    }

    pub fn accepts(&self, kind: FieldKind) -> bool {
        self.conversion.accepts(kind)
    }

    pub fn render(&self, value: &Value) -> String {
        let body = match (self.conversion, value) {
            (Conversion::Decimal, Value::Integer(i)) => {
                self.signed(*i < 0, i.unsigned_abs().to_string(), true)
            }
            (Conversion::Fixed, Value::Float(f)) => self.render_float(*f, |abs| {
                format!("{:.*}", self.precision.unwrap_or(DEFAULT_FLOAT_PRECISION), abs)
            }),
            (Conversion::Exponent, Value::Float(f)) => self.render_float(*f, |abs| {
                exponent_notation(abs, self.precision.unwrap_or(DEFAULT_FLOAT_PRECISION))
            }),
            (Conversion::Str, Value::Float(f)) => {
                self.render_float(*f, |abs| abs.to_string())
            }
            (Conversion::Str, Value::Integer(i)) => self.truncate(&i.to_string()),
            (_, Value::Text(s)) => self.truncate(s),
            // Registration rejects the remaining pairings; render something sensible.
            (_, other) => other.to_string(),
        };
        format!("{}{}{}", self.prefix, self.pad(body), self.suffix)
    }

    fn render_float(&self, value: f64, digits: impl Fn(f64) -> String) -> String {
        if value.is_nan() {
            return "NaN".to_string();
        }
        let negative = value.is_sign_negative();
        if value.is_infinite() {
            return self.signed(negative, "Infinity".to_string(), false);
        }
        self.signed(negative, digits(value.abs()), true)
    }

    fn signed(&self, negative: bool, digits: String, zero_pad_allowed: bool) -> String {
        let sign = if negative {
            "-"
        } else if self.plus_sign {
            "+"
        } else if self.space_sign {
            " "
        } else {
            ""
        };
        match self.width {
            Some(width)
                if zero_pad_allowed
                    && self.zero_pad
                    && !self.left_justify
                    && sign.len() + digits.len() < width =>
            {
                let zeros = "0".repeat(width - sign.len() - digits.len());
                format!("{sign}{zeros}{digits}")
            }
            _ => format!("{sign}{digits}"),
        }
    }

    fn truncate(&self, text: &str) -> String {
        match self.precision {
            Some(limit) => text.chars().take(limit).collect(),
            None => text.to_string(),
        }
    }

    fn pad(&self, body: String) -> String {
        let len = body.chars().count();
        match self.width {
            Some(width) if len < width => {
                let fill = " ".repeat(width - len);
                if self.left_justify {
                    body + &fill
                } else {
                    fill + &body
                }
            }
            _ => body,
        }
    }
}

fn take_number(chars: &mut std::iter::Peekable<std::str::Chars<'_>>) -> Option<usize> {
    let mut digits = String::new();
    while let Some(&ch) = chars.peek() {
        if !ch.is_ascii_digit() {
            break;
        }
        digits.push(ch);
        chars.next();
    }
    digits.parse().ok()
}

/// Renders `value` as `d.ddde±XX`, with at least two exponent digits.
fn exponent_notation(value: f64, precision: usize) -> String {
    let rendered = format!("{:.*e}", precision, value);
    let Some((mantissa, exponent)) = rendered.split_once('e') else {
        return rendered;
    };
    let exponent: i32 = exponent.parse().unwrap_or(0);
    let sign = if exponent < 0 { '-' } else { '+' };
    format!("{mantissa}e{sign}{:02}", exponent.unsigned_abs())
}

impl FromStr for FormatSpec {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self> {
        FormatSpec::parse(s)
    }
}

impl TryFrom<String> for FormatSpec {
    type Error = CodecError;

    fn try_from(value: String) -> Result<Self> {
        FormatSpec::parse(&value)
    }
}

impl From<FormatSpec> for String {
    fn from(spec: FormatSpec) -> Self {
        spec.raw
    }
}

impl fmt::Display for FormatSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
