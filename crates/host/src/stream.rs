//! Sending a G-code file over the link, one line at a time.

use crate::link::{numbered, Link};

/// Sends numbered lines and waits for each `ok` before the next, going back when
/// the firmware asks for a resend.
pub struct Streamer {
    lines: Vec<String>,
    /// Index of the next line to send. Line numbers start at 1.
    next: usize,
    in_flight: bool,
}

impl Streamer {
    pub fn new(text: &str) -> Self {
        let lines = text
            .lines()
            .map(|l| l.split(';').next().unwrap_or_default().trim())
            .filter(|l| !l.is_empty())
            .map(str::to_owned)
            .collect();
        Streamer {
            lines,
            next: 0,
            in_flight: false,
        }
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// How many lines have been acknowledged.
    pub fn done(&self) -> usize {
        if self.in_flight {
            self.next - 1
        } else {
            self.next
        }
    }

    pub fn is_finished(&self) -> bool {
        !self.in_flight && self.next >= self.lines.len()
    }

    pub fn pump(&mut self, link: &Link) {
        let feedback = link.take_feedback();
        if let Some(n) = feedback.resend {
            log::warn!("resending from line {n}");
            self.next = usize::try_from(n - 1).unwrap_or(0).min(self.lines.len());
        }
        if feedback.acks > 0 {
            self.in_flight = false;
        }
        if self.in_flight {
            return;
        }
        if let Some(body) = self.lines.get(self.next) {
            link.send_line(&numbered(self.next + 1, body));
            self.next += 1;
            self.in_flight = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scarab_firmware::hal::{ResponseSink as _, SerialPort as _};
    use scarab_protocol::Response;

    fn received(link: &mut Link) -> String {
        let bytes: Vec<u8> = std::iter::from_fn(|| link.read_byte()).collect();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn comments_and_blank_lines_are_dropped() {
        let s = Streamer::new("; header\nG28 ; home\n\n  G1 X1  \n");
        assert_eq!(s.lines, ["G28", "G1 X1"]);
    }

    #[test]
    fn waits_for_each_ok() {
        let mut link = Link::quiet();
        let mut s = Streamer::new("G28\nG1 X1\n");
        s.pump(&link);
        assert_eq!(received(&mut link), numbered(1, "G28") + "\n");
        s.pump(&link);
        assert!(link.is_drained());
        assert_eq!(s.done(), 0);

        link.send(&Response::Ok);
        s.pump(&link);
        assert_eq!(received(&mut link), numbered(2, "G1 X1") + "\n");
        assert!(!s.is_finished());

        link.send(&Response::Ok);
        s.pump(&link);
        assert!(link.is_drained());
        assert!(s.is_finished());
        assert_eq!(s.done(), 2);
    }

    #[test]
    fn goes_back_on_resend() {
        let mut link = Link::quiet();
        let mut s = Streamer::new("G28\nG1 X1\nG1 X2\n");
        for _ in 0..2 {
            s.pump(&link);
            link.send(&Response::Ok);
        }
        s.pump(&link);
        received(&mut link);

        link.send(&Response::Resend(2));
        link.send(&Response::Ok);
        s.pump(&link);
        assert_eq!(received(&mut link), numbered(2, "G1 X1") + "\n");
    }
}
