//! Easy2 handler that collects one response: header lines and body.

use std::str;

/// Handler state for one transfer. Implements curl's Handler for Easy2.
#[derive(Debug, Default)]
pub(super) struct Collector {
    pub(super) headers: Vec<String>,
    pub(super) body: Vec<u8>,
}

impl Collector {
    /// Header lines and body, leaving the collector empty.
    pub(super) fn take(&mut self) -> (Vec<String>, Vec<u8>) {
        (
            std::mem::take(&mut self.headers),
            std::mem::take(&mut self.body),
        )
    }
}

impl curl::easy::Handler for Collector {
    fn header(&mut self, data: &[u8]) -> bool {
        if let Ok(s) = str::from_utf8(data) {
            let line = s.trim_end();
            // A new status line starts a new header block (redirect hops,
            // 100-continue); keep only the final one.
            if line.starts_with("HTTP/") {
                self.headers.clear();
                self.body.clear();
            }
            self.headers.push(line.to_string());
        }
        true
    }

    fn write(&mut self, data: &[u8]) -> Result<usize, curl::easy::WriteError> {
        self.body.extend_from_slice(data);
        Ok(data.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use curl::easy::Handler;

    #[test]
    fn header_block_restarts_on_status_line() {
        let mut c = Collector::default();
        c.header(b"HTTP/1.1 302 Found\r\n");
        c.header(b"Location: http://other/\r\n");
        c.write(b"redirect body").unwrap();
        assert_eq!(c.headers.len(), 2);

        c.header(b"HTTP/1.1 200 OK\r\n");
        assert_eq!(c.headers.len(), 1, "headers cleared on new HTTP/ line");
        assert!(c.headers[0].contains("200"));
        assert!(c.body.is_empty(), "body of the redirect hop is discarded");
    }

    #[test]
    fn write_appends_and_take_empties() {
        let mut c = Collector::default();
        c.header(b"HTTP/1.1 200 OK\r\n");
        assert_eq!(c.write(b"abcd").unwrap(), 4);
        assert_eq!(c.write(b"ef").unwrap(), 2);

        let (headers, body) = c.take();
        assert_eq!(headers, vec!["HTTP/1.1 200 OK".to_string()]);
        assert_eq!(body, b"abcdef");
        assert!(c.headers.is_empty() && c.body.is_empty());
    }
}
