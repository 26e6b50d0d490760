// Test-only hexdump renderer: given a byte buffer and a list of
// (byte range, dotted field path) pairs, prints a readable annotated
// dump instead of a raw byte wall. Used by round-trip tests to make
// failures legible. Not compiled outside `cfg(test)`.

use std::ops::Range;

use claw_base::Result;

#[derive(Default)]
pub(crate) struct Annotations {
    context: Vec<String>,
    entries: Vec<(Range<usize>, Vec<String>)>,
}

impl Annotations {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push_context(&mut self, name: impl ToString) {
        self.context.push(name.to_string());
    }

    pub(crate) fn pop_context(&mut self) {
        self.context.pop();
    }

    pub(crate) fn annotate(&mut self, range: Range<usize>, name: impl ToString) {
        let mut path = self.context.clone();
        path.push(name.to_string());
        self.entries.push((range, path));
    }

    pub(crate) fn render_hexdump(&self, buf: &[u8]) -> Result<String> {
        use std::fmt::Write;
        let mut s = String::new();
        for (range, path) in &self.entries {
            if range.is_empty() {
                continue;
            }
            let name = path.join(".");
            writeln!(s, "- {} ({} bytes) @ {}:", name, range.len(), range.start)?;
            for (n, line) in buf[range.clone()].chunks(16).enumerate() {
                write!(s, "\t{:08x} |", range.start + n * 16)?;
                for byte in line {
                    write!(s, " {:02x}", byte)?;
                }
                s.push_str("  | ");
                for ch in line {
                    if ch.is_ascii_graphic() {
                        s.push(*ch as char);
                    } else {
                        s.push('.');
                    }
                }
                writeln!(s)?;
            }
        }
        Ok(s)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_annotations_render() {
        let mut a = Annotations::new();
        a.push_context("root");
        a.annotate(0..8, "header");
        a.pop_context();
        let buf = [0u8; 8];
        let dump = a.render_hexdump(&buf).unwrap();
        assert!(dump.contains("root.header"));
    }
}
