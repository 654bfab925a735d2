//! Recursive-descent decoder.
//!
//! Every function takes the full input and a cursor, and on success leaves
//! the cursor right after the value it parsed.
use super::{FormatError, Value};

/// Maximum nesting of lists and dictionaries.
pub const MAX_DEPTH: usize = 64;

/// Decode exactly one value, the whole input must be consumed.
pub fn decode(data: &[u8]) -> Result<Value, FormatError> {
    let (value, consumed) = decode_prefix(data)?;
    if consumed != data.len() {
        return Err(FormatError::TrailingData);
    }
    Ok(value)
}

/// Decode the first value of `data`, returning it together with the number
/// of bytes it occupied. Anything after it is left alone.
pub fn decode_prefix(data: &[u8]) -> Result<(Value, usize), FormatError> {
    let mut pos = 0;
    let value = decode_value(data, &mut pos, 0)?;
    Ok((value, pos))
}

fn decode_value(
    data: &[u8],
    pos: &mut usize,
    depth: usize,
) -> Result<Value, FormatError> {
    if depth > MAX_DEPTH {
        return Err(FormatError::NestingTooDeep);
    }

    match data.get(*pos) {
        None => Err(FormatError::UnexpectedEof),
        Some(b'i') => decode_int(data, pos).map(Value::Integer),
        Some(b'l') => decode_list(data, pos, depth),
        Some(b'd') => decode_dict(data, pos, depth),
        Some(b'0'..=b'9') => decode_bytes(data, pos).map(Value::Bytes),
        // a string length can never be negative.
        Some(b'-') => Err(FormatError::InvalidStringLength),
        Some(&b) => Err(FormatError::UnexpectedByte(b, *pos)),
    }
}

/// Position of the next `delim`, starting at `from`.
fn find(data: &[u8], from: usize, delim: u8) -> Result<usize, FormatError> {
    data[from..]
        .iter()
        .position(|b| *b == delim)
        .map(|p| from + p)
        .ok_or(FormatError::UnexpectedEof)
}

fn decode_int(data: &[u8], pos: &mut usize) -> Result<i64, FormatError> {
    // skip the `i`
    let start = *pos + 1;
    let end = find(data, start, b'e')?;
    let raw = &data[start..end];

    let text = std::str::from_utf8(raw)
        .map_err(|_| FormatError::InvalidInteger(format!("{raw:?}")))?;

    let digits = text.strip_prefix('-').unwrap_or(text);

    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(FormatError::InvalidInteger(text.to_owned()));
    }

    // `i03e` and `i-0e` are not canonical
    if (digits.starts_with('0') && digits.len() > 1) || text == "-0" {
        return Err(FormatError::InvalidInteger(text.to_owned()));
    }

    let n = text
        .parse::<i64>()
        .map_err(|_| FormatError::InvalidInteger(text.to_owned()))?;

    *pos = end + 1;
    Ok(n)
}

fn decode_bytes(data: &[u8], pos: &mut usize) -> Result<Vec<u8>, FormatError> {
    let colon = find(data, *pos, b':')?;
    let raw = &data[*pos..colon];

    if !raw.iter().all(|b| b.is_ascii_digit()) {
        return Err(FormatError::InvalidStringLength);
    }

    let len = std::str::from_utf8(raw)
        .ok()
        .and_then(|s| s.parse::<usize>().ok())
        .ok_or(FormatError::InvalidStringLength)?;

    let start = colon + 1;
    let end = start.checked_add(len).ok_or(FormatError::InvalidStringLength)?;

    if end > data.len() {
        return Err(FormatError::UnexpectedEof);
    }

    *pos = end;
    Ok(data[start..end].to_vec())
}

fn decode_list(
    data: &[u8],
    pos: &mut usize,
    depth: usize,
) -> Result<Value, FormatError> {
    *pos += 1;
    let mut list = Vec::new();

    loop {
        match data.get(*pos) {
            None => return Err(FormatError::UnexpectedEof),
            Some(b'e') => break,
            Some(_) => list.push(decode_value(data, pos, depth + 1)?),
        }
    }

    *pos += 1;
    Ok(Value::List(list))
}

fn decode_dict(
    data: &[u8],
    pos: &mut usize,
    depth: usize,
) -> Result<Value, FormatError> {
    *pos += 1;
    let mut dict = Vec::new();

    loop {
        match data.get(*pos) {
            None => return Err(FormatError::UnexpectedEof),
            Some(b'e') => break,
            Some(b'0'..=b'9') => {
                let key = decode_bytes(data, pos)?;
                let value = decode_value(data, pos, depth + 1)?;
                dict.push((key, value));
            }
            Some(_) => return Err(FormatError::KeyNotString),
        }
    }

    *pos += 1;
    Ok(Value::Dict(dict))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::encode;

    #[test]
    fn integers() {
        assert_eq!(decode(b"i42e"), Ok(Value::Integer(42)));
        assert_eq!(decode(b"i0e"), Ok(Value::Integer(0)));
        assert_eq!(decode(b"i-7e"), Ok(Value::Integer(-7)));
        assert_eq!(
            decode(b"i9223372036854775807e"),
            Ok(Value::Integer(i64::MAX))
        );
    }

    #[test]
    fn non_canonical_integers() {
        for input in [&b"i03e"[..], b"i-0e", b"ie", b"i-e", b"i1x2e", b"i+1e"] {
            assert!(
                matches!(decode(input), Err(FormatError::InvalidInteger(_))),
                "{input:?}"
            );
        }
        // does not fit in 63 bits
        assert!(decode(b"i9223372036854775808e").is_err());
    }

    #[test]
    fn byte_strings_are_raw() {
        let raw = [0xff, 0x00, 0x13, 0x80];
        let mut input = b"4:".to_vec();
        input.extend_from_slice(&raw);

        assert_eq!(decode(&input), Ok(Value::Bytes(raw.to_vec())));
        assert_eq!(decode(b"0:"), Ok(Value::Bytes(vec![])));
    }

    #[test]
    fn nested() {
        let v = decode(b"d4:spaml1:ai1ee3:cowd3:moo4:eggsee").unwrap();

        assert_eq!(
            v.get("spam"),
            Some(&Value::List(vec![Value::string("a"), Value::Integer(1)]))
        );
        assert_eq!(
            v.get("cow").and_then(|c| c.get("moo")),
            Some(&Value::string("eggs"))
        );
    }

    #[test]
    fn dict_keeps_input_order() {
        let input = b"d1:zi1e1:ai2ee";
        let v = decode(input).unwrap();
        let keys: Vec<&[u8]> =
            v.as_dict().unwrap().iter().map(|(k, _)| k.as_slice()).collect();

        assert_eq!(keys, vec![&b"z"[..], b"a"]);
        assert_eq!(encode(&v), input);
    }

    #[test]
    fn malformed() {
        // truncated length field
        assert_eq!(decode(b"5"), Err(FormatError::UnexpectedEof));
        assert_eq!(decode(b"5:abc"), Err(FormatError::UnexpectedEof));
        // missing terminators
        assert_eq!(decode(b"li1e"), Err(FormatError::UnexpectedEof));
        assert_eq!(decode(b"d1:ai1e"), Err(FormatError::UnexpectedEof));
        assert_eq!(decode(b"i12"), Err(FormatError::UnexpectedEof));
        // negative string length
        assert_eq!(decode(b"-3:abc"), Err(FormatError::InvalidStringLength));
        assert_eq!(decode(b"l-3:abce"), Err(FormatError::InvalidStringLength));
        // non numeric length
        assert_eq!(decode(b"d3x:abce"), Err(FormatError::InvalidStringLength));
        assert_eq!(decode(b"1x:a"), Err(FormatError::InvalidStringLength));
        // integer keys
        assert_eq!(decode(b"di1ei2ee"), Err(FormatError::KeyNotString));
        assert_eq!(decode(b""), Err(FormatError::UnexpectedEof));
        assert_eq!(decode(b"x"), Err(FormatError::UnexpectedByte(b'x', 0)));
        assert_eq!(decode(b"i1ei2e"), Err(FormatError::TrailingData));
    }

    #[test]
    fn nesting_limit() {
        let deep = |n: usize| {
            let mut v = vec![b'l'; n];
            v.extend(std::iter::repeat(b'e').take(n));
            v
        };
        assert!(decode(&deep(MAX_DEPTH)).is_ok());
        assert_eq!(decode(&deep(MAX_DEPTH + 2)), Err(FormatError::NestingTooDeep));
    }

    #[test]
    fn prefix() {
        let (v, used) = decode_prefix(b"d1:ai1eeTRAILING").unwrap();
        assert_eq!(v.get("a"), Some(&Value::Integer(1)));
        assert_eq!(used, 8);
    }
}
