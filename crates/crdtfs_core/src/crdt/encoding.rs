//! VarUint encoding helpers (y-protocols compatible).

/// Write a variable-length unsigned integer to a buffer.
/// Uses 7 bits per byte, with MSB indicating continuation.
pub(crate) fn write_var_uint(buf: &mut Vec<u8>, mut num: u64) {
    loop {
        let mut byte = (num & 0x7F) as u8;
        num >>= 7;
        if num > 0 {
            byte |= 0x80; // Set continuation bit
        }
        buf.push(byte);
        if num == 0 {
            break;
        }
    }
}

/// Read a variable-length unsigned integer from a buffer.
/// Returns (value, bytes_consumed) or None if buffer is too short.
pub(crate) fn read_var_uint(data: &[u8]) -> Option<(u64, usize)> {
    let mut num: u64 = 0;
    let mut shift = 0;
    for (i, &byte) in data.iter().enumerate() {
        num |= ((byte & 0x7F) as u64) << shift;
        if byte & 0x80 == 0 {
            return Some((num, i + 1));
        }
        shift += 7;
        if shift > 63 {
            return None; // Overflow
        }
    }
    None // Incomplete
}

/// Write a byte array with length prefix (varUint encoding).
pub(crate) fn write_var_byte_array(buf: &mut Vec<u8>, data: &[u8]) {
    write_var_uint(buf, data.len() as u64);
    buf.extend_from_slice(data);
}

/// Read a byte array with length prefix.
/// Returns (data, bytes_consumed) or None if buffer is too short.
pub(crate) fn read_var_byte_array(data: &[u8]) -> Option<(Vec<u8>, usize)> {
    let (len, len_bytes) = read_var_uint(data)?;
    let len = usize::try_from(len).ok()?;
    let total = len_bytes.checked_add(len)?;
    if data.len() < total {
        return None;
    }
    Some((data[len_bytes..total].to_vec(), total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_var_uint_multibyte() {
        let mut buf = Vec::new();
        write_var_uint(&mut buf, 300);
        assert_eq!(buf, vec![0xAC, 0x02]);
        assert_eq!(read_var_uint(&buf), Some((300, 2)));
    }

    #[test]
    fn test_var_uint_incomplete() {
        assert_eq!(read_var_uint(&[0x80]), None);
        assert_eq!(read_var_uint(&[]), None);
    }

    #[test]
    fn test_var_uint_overflow_rejected() {
        let data = [0xFF; 11];
        assert_eq!(read_var_uint(&data), None);
    }

    #[test]
    fn test_byte_array_too_short() {
        // Claims 5 bytes, carries 2
        assert_eq!(read_var_byte_array(&[5, 1, 2]), None);
    }
}
