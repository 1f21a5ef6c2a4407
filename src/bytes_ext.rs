pub trait ReadBytesExt: std::io::Read {
    #[inline]
    fn read_u8(&mut self) -> std::io::Result<u8> {
        let mut buf = [0; 1];
        self.read_exact(&mut buf)?;
        Ok(buf[0])
    }

    #[inline]
    fn read_i8(&mut self) -> std::io::Result<i8> {
        Ok(self.read_u8()? as i8)
    }

    #[inline]
    fn read_le_u16(&mut self) -> std::io::Result<u16> {
        let mut buf = [0; 2];
        self.read_exact(&mut buf)?;
        Ok(u16::from_le_bytes(buf))
    }

    #[inline]
    fn read_le_i16(&mut self) -> std::io::Result<i16> {
        Ok(self.read_le_u16()? as i16)
    }

    #[inline]
    fn read_le_u32(&mut self) -> std::io::Result<u32> {
        let mut buf = [0; 4];
        self.read_exact(&mut buf)?;
        Ok(u32::from_le_bytes(buf))
    }

    #[inline]
    fn read_le_i32(&mut self) -> std::io::Result<i32> {
        Ok(self.read_le_u32()? as i32)
    }

    #[inline]
    fn read_le_u64(&mut self) -> std::io::Result<u64> {
        let mut buf = [0; 8];
        self.read_exact(&mut buf)?;
        Ok(u64::from_le_bytes(buf))
    }

    #[inline]
    fn read_le_f32(&mut self) -> std::io::Result<f32> {
        Ok(f32::from_bits(self.read_le_u32()?))
    }

    #[inline]
    fn read_le_f64(&mut self) -> std::io::Result<f64> {
        Ok(f64::from_bits(self.read_le_u64()?))
    }

    /// Reads a fixed-size, NUL-padded string field.
    fn read_fixed_str(&mut self, len: usize) -> std::io::Result<String> {
        let mut s = String::new();
        let mut bytes_read = 0;
        let mut found_end_of_string = false;

        while bytes_read < len {
            let c = self.read_u8()?;
            bytes_read += 1;

            if found_end_of_string {
            } else if c == 0 {
                found_end_of_string = true;
            } else {
                s.push(c as char);
            }
        }

        Ok(s)
    }
}

impl<R: std::io::Read> ReadBytesExt for R {}

pub trait WriteBytesExt: std::io::Write {
    #[inline]
    fn write_u8(&mut self, v: u8) -> std::io::Result<()> {
        self.write_all(&[v])
    }

    #[inline]
    fn write_le_u16(&mut self, v: u16) -> std::io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    #[inline]
    fn write_le_u32(&mut self, v: u32) -> std::io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    #[inline]
    fn write_le_i32(&mut self, v: i32) -> std::io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    #[inline]
    fn write_le_u64(&mut self, v: u64) -> std::io::Result<()> {
        self.write_all(&v.to_le_bytes())
    }

    #[inline]
    fn write_le_f32(&mut self, v: f32) -> std::io::Result<()> {
        self.write_le_u32(v.to_bits())
    }

    #[inline]
    fn write_le_f64(&mut self, v: f64) -> std::io::Result<()> {
        self.write_le_u64(v.to_bits())
    }

    /// Writes `s` into a field of exactly `len` bytes, truncating or NUL-padding.
    fn write_fixed_str(&mut self, s: &str, len: usize) -> std::io::Result<()> {
        let mut field = vec![0u8; len];
        let bytes = s.as_bytes();
        let n = bytes.len().min(len);
        field[..n].copy_from_slice(&bytes[..n]);
        self.write_all(&field)
    }
}

impl<W: std::io::Write> WriteBytesExt for W {}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn fixed_str_stops_at_nul_but_consumes_field() {
        let mut r = Cursor::new(b"abc\0zz\0\0tail".as_slice());
        assert_eq!(r.read_fixed_str(8).unwrap(), "abc");
        assert_eq!(r.position(), 8);
    }

    #[test]
    fn short_read_is_an_error() {
        let mut r = Cursor::new([1u8, 2, 3].as_slice());
        assert!(r.read_le_u32().is_err());
    }

    #[test]
    fn write_fixed_str_pads_and_truncates() {
        let mut w = Vec::new();
        w.write_fixed_str("ab", 4).unwrap();
        w.write_fixed_str("abcdef", 3).unwrap();
        assert_eq!(w, b"ab\0\0abc");
    }
}
