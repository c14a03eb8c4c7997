//! Identifier case conversion: model property names to database columns, action names to paths.

/// Convert a camelCase or PascalCase identifier to snake_case.
/// e.g. "userId" -> "user_id", "OrderItem" -> "order_item", "parseURL" -> "parse_url"
pub fn to_snake_case(s: &str) -> String {
    let chars: Vec<char> = s.chars().collect();
    let mut out = String::with_capacity(s.len() + 4);
    for (i, &c) in chars.iter().enumerate() {
        if c.is_uppercase() {
            let prev = i.checked_sub(1).map(|p| chars[p]);
            let next = chars.get(i + 1);
            let boundary = match prev {
                Some(p) if p == '_' || p == '-' => false,
                Some(p) => p.is_lowercase() || p.is_ascii_digit() || (p.is_uppercase() && next.map_or(false, |n| n.is_lowercase())),
                None => false,
            };
            if boundary {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else if c == '-' || c == ' ' {
            out.push('_');
        } else {
            out.push(c);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snake_case_conversions() {
        assert_eq!(to_snake_case("userId"), "user_id");
        assert_eq!(to_snake_case("OrderItem"), "order_item");
        assert_eq!(to_snake_case("parseURL"), "parse_url");
        assert_eq!(to_snake_case("HTMLPage"), "html_page");
        assert_eq!(to_snake_case("already_snake"), "already_snake");
        assert_eq!(to_snake_case("kebab-name"), "kebab_name");
    }
}
