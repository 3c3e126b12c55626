use super::{CborError, Map, Value};

/// Nesting limit for arrays/maps; OIC payloads are two or three levels deep.
const MAX_DEPTH: usize = 16;

const MAJOR_UNSIGNED: u8 = 0;
const MAJOR_NEGATIVE: u8 = 1;
const MAJOR_BYTES: u8 = 2;
const MAJOR_TEXT: u8 = 3;
const MAJOR_ARRAY: u8 = 4;
const MAJOR_MAP: u8 = 5;
const MAJOR_SIMPLE: u8 = 7;

/// Serialize a value (the `dump` of the representation layer).
pub fn encode(value: &Value) -> Vec<u8> {
    let mut out = Vec::with_capacity(64);
    write_value(&mut out, value);
    out
}

fn write_head(out: &mut Vec<u8>, major: u8, arg: u64) {
    let m = major << 5;
    match arg {
        0..=23 => out.push(m | arg as u8),
        24..=0xFF => {
            out.push(m | 24);
            out.push(arg as u8);
        }
        0x100..=0xFFFF => {
            out.push(m | 25);
            out.extend_from_slice(&(arg as u16).to_be_bytes());
        }
        0x1_0000..=0xFFFF_FFFF => {
            out.push(m | 26);
            out.extend_from_slice(&(arg as u32).to_be_bytes());
        }
        _ => {
            out.push(m | 27);
            out.extend_from_slice(&arg.to_be_bytes());
        }
    }
}

fn write_value(out: &mut Vec<u8>, value: &Value) {
    match value {
        Value::Null => out.push(0xF6),
        Value::Bool(false) => out.push(0xF4),
        Value::Bool(true) => out.push(0xF5),
        Value::Integer(v) if *v >= 0 => write_head(out, MAJOR_UNSIGNED, *v as u64),
        // -1 - n encoding: !v == -1 - v for two's complement
        Value::Integer(v) => write_head(out, MAJOR_NEGATIVE, !*v as u64),
        Value::Float(f) => {
            out.push((MAJOR_SIMPLE << 5) | 27);
            out.extend_from_slice(&f.to_bits().to_be_bytes());
        }
        Value::Bytes(b) => {
            write_head(out, MAJOR_BYTES, b.len() as u64);
            out.extend_from_slice(b);
        }
        Value::Text(s) => {
            write_head(out, MAJOR_TEXT, s.len() as u64);
            out.extend_from_slice(s.as_bytes());
        }
        Value::Array(items) => {
            write_head(out, MAJOR_ARRAY, items.len() as u64);
            for item in items {
                write_value(out, item);
            }
        }
        Value::Map(map) => {
            write_head(out, MAJOR_MAP, map.len() as u64);
            for (k, v) in map.iter() {
                write_head(out, MAJOR_TEXT, k.len() as u64);
                out.extend_from_slice(k.as_bytes());
                write_value(out, v);
            }
        }
    }
}

/// Decode exactly one top-level item; trailing bytes are an error.
pub fn decode(data: &[u8]) -> Result<Value, CborError> {
    let mut reader = Reader { data, pos: 0 };
    let value = reader.read_value(0)?;
    let rest = data.len() - reader.pos;
    if rest > 0 {
        return Err(CborError::TrailingBytes(rest));
    }
    Ok(value)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CborError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.data.len())
            .ok_or(CborError::Truncated(self.pos))?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn read_u8(&mut self) -> Result<u8, CborError> {
        Ok(self.take(1)?[0])
    }

    /// Returns (major, info, argument). Indefinite lengths are rejected.
    fn read_head(&mut self) -> Result<(u8, u8, u64), CborError> {
        let offset = self.pos;
        let initial = self.read_u8()?;
        let major = initial >> 5;
        let info = initial & 0x1F;
        let arg = match info {
            0..=23 => info as u64,
            24 => self.read_u8()? as u64,
            25 => u16::from_be_bytes([self.read_u8()?, self.read_u8()?]) as u64,
            26 => {
                let b = self.take(4)?;
                u32::from_be_bytes([b[0], b[1], b[2], b[3]]) as u64
            }
            27 => {
                let b = self.take(8)?;
                let mut buf = [0u8; 8];
                buf.copy_from_slice(b);
                u64::from_be_bytes(buf)
            }
            _ => {
                return Err(CborError::Unsupported {
                    major,
                    info,
                    offset,
                })
            }
        };
        Ok((major, info, arg))
    }

    fn read_len(&mut self, arg: u64) -> Result<usize, CborError> {
        let len = usize::try_from(arg).map_err(|_| CborError::Truncated(self.pos))?;
        // Every element needs at least one byte, so a count beyond the
        // remaining input is already truncated.
        if len > self.data.len() - self.pos {
            return Err(CborError::Truncated(self.pos));
        }
        Ok(len)
    }

    fn read_text(&mut self, arg: u64, offset: usize) -> Result<String, CborError> {
        let len = self.read_len(arg)?;
        let raw = self.take(len)?;
        String::from_utf8(raw.to_vec()).map_err(|_| CborError::InvalidUtf8(offset))
    }

    fn read_value(&mut self, depth: usize) -> Result<Value, CborError> {
        if depth > MAX_DEPTH {
            return Err(CborError::TooDeep(MAX_DEPTH));
        }
        let offset = self.pos;
        let (major, info, arg) = self.read_head()?;
        match major {
            MAJOR_UNSIGNED => i64::try_from(arg)
                .map(Value::Integer)
                .map_err(|_| CborError::IntegerOverflow(offset)),
            MAJOR_NEGATIVE => i64::try_from(arg)
                .map(|n| Value::Integer(-1 - n))
                .map_err(|_| CborError::IntegerOverflow(offset)),
            MAJOR_BYTES => {
                let len = self.read_len(arg)?;
                Ok(Value::Bytes(self.take(len)?.to_vec()))
            }
            MAJOR_TEXT => self.read_text(arg, offset).map(Value::Text),
            MAJOR_ARRAY => {
                let len = self.read_len(arg)?;
                let mut items = Vec::with_capacity(len);
                for _ in 0..len {
                    items.push(self.read_value(depth + 1)?);
                }
                Ok(Value::Array(items))
            }
            MAJOR_MAP => {
                let len = self.read_len(arg)?;
                let mut map = Map::new();
                for _ in 0..len {
                    let key_offset = self.pos;
                    let (kmajor, _, karg) = self.read_head()?;
                    if kmajor != MAJOR_TEXT {
                        return Err(CborError::NonTextKey(key_offset));
                    }
                    let key = self.read_text(karg, key_offset)?;
                    let value = self.read_value(depth + 1)?;
                    map.append(key, value);
                }
                Ok(Value::Map(map))
            }
            MAJOR_SIMPLE => match info {
                20 => Ok(Value::Bool(false)),
                21 => Ok(Value::Bool(true)),
                22 | 23 => Ok(Value::Null),
                25 => Ok(Value::Float(half_to_f64(arg as u16))),
                26 => Ok(Value::Float(f32::from_bits(arg as u32) as f64)),
                27 => Ok(Value::Float(f64::from_bits(arg))),
                _ => Err(CborError::Unsupported {
                    major,
                    info,
                    offset,
                }),
            },
            // tags (major 6) are not used by OIC payloads
            _ => Err(CborError::Unsupported {
                major,
                info,
                offset,
            }),
        }
    }
}

fn half_to_f64(bits: u16) -> f64 {
    let sign = if bits & 0x8000 != 0 { -1.0 } else { 1.0 };
    let exp = ((bits >> 10) & 0x1F) as i32;
    let mant = (bits & 0x3FF) as f64;
    let magnitude = match exp {
        0 => mant * 2f64.powi(-24),
        31 if mant == 0.0 => f64::INFINITY,
        31 => f64::NAN,
        _ => (1.0 + mant / 1024.0) * 2f64.powi(exp - 15),
    };
    sign * magnitude
}
