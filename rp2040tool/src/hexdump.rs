const WIDTH: usize = 0x10;

fn printable(chr: u8) -> char {
    if (0x20..0x7f).contains(&chr) {
        chr as char
    } else {
        '.'
    }
}

/// One row of a hex dump: offset, hex bytes, ASCII.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Line<'a> {
    offset: usize,
    data: &'a [u8],
}

impl<'a> std::fmt::Display for Line<'a> {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "{:04x}", self.offset)?;
        for i in 0..WIDTH {
            if i % 8 == 0 {
                write!(f, " ")?;
            }
            match self.data.get(i) {
                Some(b) => write!(f, " {:02x}", b)?,
                None => write!(f, "   ")?,
            }
        }

        write!(f, "  |")?;
        for b in self.data {
            write!(f, "{}", printable(*b))?;
        }
        write!(f, "|")
    }
}

pub fn lines(data: &[u8]) -> impl Iterator<Item = Line<'_>> {
    data.chunks(WIDTH).enumerate().map(|(i, data)| Line {
        offset: i * WIDTH,
        data,
    })
}

pub fn hexdump_prefix(prefix: &str, data: &[u8]) {
    for line in lines(data) {
        println!("{}{}", prefix, line);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn format_rows() {
        let data: Vec<u8> = (0x40..0x52).collect();
        let rows: Vec<String> = lines(&data).map(|l| l.to_string()).collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(
            rows[0],
            "0000  40 41 42 43 44 45 46 47  48 49 4a 4b 4c 4d 4e 4f  |@ABCDEFGHIJKLMNO|"
        );
        assert!(rows[1].starts_with("0010  50 51   "));
        assert!(rows[1].ends_with("|PQ|"));
    }

    #[test]
    fn nonprintable_as_dots() {
        let row = lines(&[0x00, 0x41, 0xfe]).next().unwrap().to_string();
        assert!(row.ends_with("|.A.|"));
    }
}
