use std::fs::File;
use std::io::{self, Read};

/// An image source for the checksum loop.
///
/// Regular files know their size up front, enabling progress
/// reporting; pipes do not.
pub trait Source {
    /// Image size in bytes when known.
    fn size(&self) -> Option<u64>;

    /// Read into `buf`, returning 0 at the end of the image.
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Open `path`, with `-` meaning standard input.
pub fn open(path: &str) -> io::Result<Box<dyn Source>> {
    if path == "-" {
        return Ok(Box::new(PipeSource { stdin: io::stdin() }));
    }
    let file = File::open(path)?;
    let size = file.metadata()?.len();
    Ok(Box::new(FileSource { file, size }))
}

struct FileSource {
    file: File,
    size: u64,
}

impl Source for FileSource {
    fn size(&self) -> Option<u64> {
        Some(self.size)
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_full(&mut self.file, buf)
    }
}

struct PipeSource {
    stdin: io::Stdin,
}

impl Source for PipeSource {
    fn size(&self) -> Option<u64> {
        None
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        read_full(&mut self.stdin, buf)
    }
}

/// Fill `buf` as far as possible, so a short read happens only at the
/// end of the input and updates stay block aligned.
fn read_full(reader: &mut impl Read, buf: &mut [u8]) -> io::Result<usize> {
    let mut total = 0;
    while total < buf.len() {
        match reader.read(&mut buf[total..]) {
            Ok(0) => break,
            Ok(count) => total += count,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) => return Err(err),
        }
    }
    Ok(total)
}

#[cfg(test)]
mod test {
    use super::read_full;
    use std::io::Cursor;

    #[test]
    fn fills_the_buffer() {
        let mut reader = Cursor::new(vec![7u8; 10]);
        let mut buf = [0u8; 4];
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 4);
        assert_eq!(buf, [7; 4]);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 4);
        // Short read at the end of input only.
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 2);
        assert_eq!(read_full(&mut reader, &mut buf).unwrap(), 0);
    }
}
