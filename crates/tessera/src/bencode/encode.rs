use super::Value;

/// Encode a value. Dictionary keys are written in the order they are stored.
pub fn encode(value: &Value) -> Vec<u8> {
    let mut buf = Vec::new();
    encode_into(value, &mut buf);
    buf
}

pub(crate) fn encode_into(value: &Value, buf: &mut Vec<u8>) {
    match value {
        Value::Integer(i) => {
            buf.push(b'i');
            buf.extend_from_slice(i.to_string().as_bytes());
            buf.push(b'e');
        }
        Value::Bytes(b) => encode_bytes(b, buf),
        Value::List(list) => {
            buf.push(b'l');
            for v in list {
                encode_into(v, buf);
            }
            buf.push(b'e');
        }
        Value::Dict(entries) => {
            buf.push(b'd');
            for (k, v) in entries {
                encode_bytes(k, buf);
                encode_into(v, buf);
            }
            buf.push(b'e');
        }
    }
}

fn encode_bytes(b: &[u8], buf: &mut Vec<u8>) {
    buf.extend_from_slice(b.len().to_string().as_bytes());
    buf.push(b':');
    buf.extend_from_slice(b);
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bencode::decode;

    #[test]
    fn canonical_scalars() {
        assert_eq!(encode(&Value::Integer(0)), b"i0e");
        assert_eq!(encode(&Value::Integer(42)), b"i42e");
        assert_eq!(encode(&Value::Integer(-42)), b"i-42e");
        assert_eq!(
            encode(&Value::Integer(i64::MAX)),
            b"i9223372036854775807e"
        );
        assert_eq!(encode(&Value::string("spam")), b"4:spam");
        assert_eq!(encode(&Value::Bytes(vec![])), b"0:");
    }

    #[test]
    fn round_trip() {
        let digest: Vec<u8> = (0..=255u8).rev().collect();
        let v = Value::dict()
            .insert("announce", "http://127.0.0.1:6969/announce")
            .insert("length", 1u64 << 40)
            .insert("pieces", digest)
            .insert(
                "files",
                vec![
                    Value::dict().insert("length", -1i64),
                    Value::List(vec![]),
                    Value::dict(),
                ],
            );

        let bytes = encode(&v);
        assert_eq!(decode(&bytes), Ok(v));
    }
}
