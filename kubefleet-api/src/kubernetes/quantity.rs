//! Kubernetes resource quantity conversion
//!
//! Converts quantity strings ("1500m", "16Gi", "1e3") into whole units of a
//! decimal scale, rounding up the way `Quantity.ScaledValue` does. Parsing
//! is exact integer arithmetic so "100n" of CPU still counts as 1 millicore.

/// Decimal scale of CPU values (milli-cores)
pub const MILLI: i32 = -3;

/// Decimal scale of memory values (10^6 bytes)
pub const MEGA: i32 = 6;

/// A parsed quantity: `mantissa * 10^dec_exp * 2^bin_exp`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Parsed {
    negative: bool,
    mantissa: u128,
    dec_exp: i32,
    bin_exp: u32,
}

fn parse(quantity: &str) -> Option<Parsed> {
    let quantity = quantity.trim();

    let (negative, rest) = match quantity.as_bytes().first()? {
        b'-' => (true, &quantity[1..]),
        b'+' => (false, &quantity[1..]),
        _ => (false, quantity),
    };

    let number_len = rest
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(rest.len());
    let (number, suffix) = rest.split_at(number_len);

    let (whole, fraction) = match number.split_once('.') {
        Some((whole, fraction)) => (whole, fraction),
        None => (number, ""),
    };
    if whole.is_empty() && fraction.is_empty() {
        return None;
    }
    if fraction.contains('.') {
        return None;
    }

    let mut mantissa: u128 = 0;
    for digit in whole.bytes().chain(fraction.bytes()) {
        mantissa = mantissa
            .checked_mul(10)?
            .checked_add(u128::from(digit - b'0'))?;
    }

    let (suffix_dec, bin_exp) = match suffix {
        "" => (0, 0),
        "n" => (-9, 0),
        "u" => (-6, 0),
        "m" => (-3, 0),
        "k" => (3, 0),
        "M" => (6, 0),
        "G" => (9, 0),
        "T" => (12, 0),
        "P" => (15, 0),
        "E" => (18, 0),
        "Ki" => (0, 10),
        "Mi" => (0, 20),
        "Gi" => (0, 30),
        "Ti" => (0, 40),
        "Pi" => (0, 50),
        "Ei" => (0, 60),
        s if s.starts_with('e') || s.starts_with('E') => (s[1..].parse::<i32>().ok()?, 0),
        _ => return None,
    };

    Some(Parsed {
        negative,
        mantissa,
        dec_exp: suffix_dec.checked_sub(i32::try_from(fraction.len()).ok()?)?,
        bin_exp,
    })
}

/// Whole units of `10^scale` contained in `quantity`, rounded up.
///
/// Returns `None` when the string is not a valid quantity or its exponent
/// is out of range. Values that do not fit in an `i64` saturate.
pub fn scaled_value(quantity: &str, scale: i32) -> Option<i64> {
    let parsed = parse(quantity)?;

    let numerator = match parsed.mantissa.checked_mul(1u128 << parsed.bin_exp) {
        Some(n) => n,
        None => return Some(saturate(parsed.negative)),
    };
    let exponent = parsed.dec_exp.checked_sub(scale)?;

    let magnitude = if exponent >= 0 {
        match 10u128
            .checked_pow(exponent as u32)
            .and_then(|factor| numerator.checked_mul(factor))
        {
            Some(n) => n,
            None if numerator == 0 => 0,
            None => return Some(saturate(parsed.negative)),
        }
    } else {
        match 10u128.checked_pow(exponent.unsigned_abs()) {
            // Rounding toward positive infinity
            Some(divisor) if parsed.negative => numerator / divisor,
            Some(divisor) => numerator.div_ceil(divisor),
            None if numerator == 0 || parsed.negative => 0,
            None => 1,
        }
    };

    let value = i64::try_from(magnitude).unwrap_or(i64::MAX);
    Some(if parsed.negative { -value } else { value })
}

fn saturate(negative: bool) -> i64 {
    if negative {
        i64::MIN
    } else {
        i64::MAX
    }
}

/// CPU quantity in milli-cores
pub fn to_millicores(quantity: &str) -> Option<i64> {
    scaled_value(quantity, MILLI)
}

/// Memory quantity in decimal megabytes
pub fn to_megabytes(quantity: &str) -> Option<i64> {
    scaled_value(quantity, MEGA)
}
