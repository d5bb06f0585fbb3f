//! WebAssembly import section reader.

const MAGIC: &[u8; 4] = b"\0asm";
const IMPORT_SECTION: u8 = 2;

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn byte(&mut self) -> Result<u8, String> {
        let b = *self
            .bytes
            .get(self.pos)
            .ok_or_else(|| format!("Unexpected end of module at byte {}", self.pos))?;
        self.pos += 1;
        Ok(b)
    }

    fn leb_u32(&mut self) -> Result<u32, String> {
        let mut result: u32 = 0;
        let mut shift = 0;
        loop {
            let b = self.byte()?;
            if shift >= 32 {
                return Err(format!("Invalid LEB128 integer at byte {}", self.pos));
            }
            result |= u32::from(b & 0x7f) << shift;
            if b & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8], String> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|&end| end <= self.bytes.len())
            .ok_or_else(|| format!("Unexpected end of module at byte {}", self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn name(&mut self) -> Result<String, String> {
        let len = self.leb_u32()? as usize;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| "Invalid UTF-8 in import name".to_string())
    }

    fn limits(&mut self) -> Result<(), String> {
        let flags = self.byte()?;
        self.leb_u32()?;
        if flags & 1 == 1 {
            self.leb_u32()?;
        }
        Ok(())
    }
}

/// Module names imported by a WebAssembly binary, deduplicated in order.
///
/// # Errors
/// Returns a message describing the first malformed byte.
pub fn imported_modules(bytes: &[u8]) -> Result<Vec<String>, String> {
    if bytes.len() < 8 || &bytes[..4] != MAGIC {
        return Err("Not a WebAssembly binary".to_string());
    }
    let mut reader = Reader { bytes, pos: 8 };
    let mut modules: Vec<String> = Vec::new();

    while reader.pos < bytes.len() {
        let id = reader.byte()?;
        let size = reader.leb_u32()? as usize;
        if id != IMPORT_SECTION {
            reader.take(size)?;
            continue;
        }

        let count = reader.leb_u32()?;
        for _ in 0..count {
            let module = reader.name()?;
            reader.name()?;
            match reader.byte()? {
                // func, tag
                0 => {
                    reader.leb_u32()?;
                }
                4 => {
                    reader.byte()?;
                    reader.leb_u32()?;
                }
                // table
                1 => {
                    reader.byte()?;
                    reader.limits()?;
                }
                // memory
                2 => reader.limits()?,
                // global
                3 => {
                    reader.byte()?;
                    reader.byte()?;
                }
                kind => return Err(format!("Unknown import kind {kind}")),
            }
            if !modules.contains(&module) {
                modules.push(module);
            }
        }
        break;
    }

    Ok(modules)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> Vec<u8> {
        let mut out = vec![s.len() as u8];
        out.extend_from_slice(s.as_bytes());
        out
    }

    fn module_with_imports() -> Vec<u8> {
        let mut body = vec![3];
        body.extend(name("./env.js"));
        body.extend(name("log"));
        body.extend([0, 0]);
        body.extend(name("./env.js"));
        body.extend(name("mem"));
        body.extend([2, 1, 1, 2]);
        body.extend(name("wasi"));
        body.extend(name("g"));
        body.extend([3, 0x7f, 0]);

        let mut module = MAGIC.to_vec();
        module.extend([1, 0, 0, 0]);
        // An empty type section first.
        module.extend([1, 1, 0]);
        module.push(IMPORT_SECTION);
        module.push(body.len() as u8);
        module.extend(body);
        module
    }

    #[test]
    fn test_imported_modules() {
        let modules = imported_modules(&module_with_imports()).unwrap();
        assert_eq!(modules, vec!["./env.js", "wasi"]);
    }

    #[test]
    fn test_no_imports() {
        let mut module = MAGIC.to_vec();
        module.extend([1, 0, 0, 0]);
        assert!(imported_modules(&module).unwrap().is_empty());
    }

    #[test]
    fn test_rejects_non_wasm() {
        assert!(imported_modules(b"export default 1").is_err());
        let mut truncated = module_with_imports();
        truncated.truncate(truncated.len() - 3);
        assert!(imported_modules(&truncated).is_err());
    }
}
