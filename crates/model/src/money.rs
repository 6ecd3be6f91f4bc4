//! Formatting of minor-unit amounts.

/// Renders an amount the way the storefront displays prices: `₺1.234,50`.
///
/// Currencies other than TRY are prefixed with their ISO code.
pub fn format_amount(minor: i64, currency: &str) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    let whole = group_thousands(abs / 100, '.');
    let cents = abs % 100;

    match currency {
        "TRY" => format!("{sign}₺{whole},{cents:02}"),
        code => format!("{sign}{code} {whole},{cents:02}"),
    }
}

/// Renders an amount with two decimals and a dot separator (`1234.50`).
pub fn format_decimal(minor: i64) -> String {
    let sign = if minor < 0 { "-" } else { "" };
    let abs = minor.unsigned_abs();
    format!("{sign}{}.{:02}", abs / 100, abs % 100)
}

fn group_thousands(value: u64, separator: char) -> String {
    let digits = value.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(separator);
        }
        out.push(ch);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_amount_try() {
        assert_eq!(format_amount(123_450, "TRY"), "₺1.234,50");
        assert_eq!(format_amount(2_990, "TRY"), "₺29,90");
        assert_eq!(format_amount(5, "TRY"), "₺0,05");
        assert_eq!(format_amount(100_000_000, "TRY"), "₺1.000.000,00");
    }

    #[test]
    fn test_format_amount_other_currency() {
        assert_eq!(format_amount(-1_999, "EUR"), "-EUR 19,99");
    }

    #[test]
    fn test_format_decimal() {
        assert_eq!(format_decimal(149_900), "1499.00");
        assert_eq!(format_decimal(7), "0.07");
    }
}
