use crate::{response::ResponseSink, CommandLine, LineText, Response, Source, MAX_CMD_SIZE};

/// Collects bytes into a line, dropping comments.
#[derive(Debug, Default)]
struct LineAssembler {
    buf: LineText,
    in_comment: bool,
}

impl LineAssembler {
    /// Returns the finished line when `byte` ends one. Empty lines are swallowed.
    fn push(&mut self, byte: u8) -> Option<LineText> {
        let terminates = byte == b'\n'
            || byte == b'\r'
            || (byte == b':' && !self.in_comment)
            || self.buf.len() >= MAX_CMD_SIZE - 1;
        if terminates {
            return self.finish();
        }

        if byte == b';' {
            self.in_comment = true;
        }
        if !self.in_comment {
            // G-code is ASCII. Anything else is kept as a placeholder so the
            // checksum still fails.
            let c = if byte.is_ascii() { byte as char } else { '?' };
            // Can't overflow: we terminate before the buffer fills.
            let _ = self.buf.push(c);
        }
        None
    }

    fn finish(&mut self) -> Option<LineText> {
        self.in_comment = false;
        if self.buf.is_empty() {
            None
        } else {
            Some(core::mem::take(&mut self.buf))
        }
    }

    fn is_empty(&self) -> bool {
        self.buf.is_empty() && !self.in_comment
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RejectionKind {
    /// The line number wasn't one more than the last accepted one.
    LineNumber,
    /// There was a line number but no checksum.
    NoChecksum,
    ChecksumMismatch,
    /// There was a checksum but no line number.
    NoLineNumber,
}

/// Why a serial line was thrown away.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Rejection {
    pub kind: RejectionKind,
    /// The last line number accepted before this line.
    pub last: i64,
}

impl Rejection {
    pub fn message(&self) -> &'static str {
        match self.kind {
            RejectionKind::LineNumber => "Line Number is not Last Line Number+1, Last Line: ",
            RejectionKind::NoChecksum => "No Checksum with line number, Last Line: ",
            RejectionKind::ChecksumMismatch => "checksum mismatch, Last Line: ",
            RejectionKind::NoLineNumber => "No Line Number with checksum, Last Line: ",
        }
    }

    /// Does the host need to be asked to send the line again?
    pub fn needs_resend(&self) -> bool {
        self.kind != RejectionKind::NoLineNumber
    }

    pub fn report(&self, sink: &mut dyn ResponseSink) {
        sink.send(&Response::Error(format_args!("{}{}", self.message(), self.last)));
        if self.needs_resend() {
            sink.send(&Response::Resend(self.last + 1));
            sink.send(&Response::Ok);
        }
    }
}

// Finds "M110" anywhere in the line, in either case.
fn mentions_m110(line: &str) -> bool {
    line.as_bytes()
        .windows(4)
        .any(|w| w.eq_ignore_ascii_case(b"M110"))
}

// Parses a leading integer the way `strtol` does: optional sign, then digits.
// Returns the value and the number of bytes consumed.
fn leading_int(s: &str) -> (i64, usize) {
    let bytes = s.as_bytes();
    let mut idx = 0;
    let negative = match bytes.first() {
        Some(b'-') => {
            idx += 1;
            true
        }
        Some(b'+') => {
            idx += 1;
            false
        }
        _ => false,
    };
    let digits_start = idx;
    let mut value: i64 = 0;
    while let Some(d) = bytes.get(idx).filter(|b| b.is_ascii_digit()) {
        value = value.saturating_mul(10).saturating_add((d - b'0') as i64);
        idx += 1;
    }
    if idx == digits_start {
        return (0, 0);
    }
    (if negative { -value } else { value }, idx)
}

pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0, |acc, b| acc ^ b)
}

/// Tracks line numbers on the serial link.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SequenceTracker {
    last: i64,
    /// The last line number when the machine was stopped.
    saved: i64,
}

impl SequenceTracker {
    pub fn last(&self) -> i64 {
        self.last
    }

    pub fn reset(&mut self, n: i64) {
        self.last = n;
    }

    /// Remembers the current line number, so that a restart can ask for
    /// everything after it again.
    pub fn save(&mut self) {
        self.saved = self.last;
    }

    /// Goes back to the saved line number, returning the line to resend from.
    pub fn restore(&mut self) -> i64 {
        self.last = self.saved;
        self.last + 1
    }

    /// Checks the line number and checksum of a serial line, and returns the
    /// command with both stripped.
    pub fn validate<'a>(&mut self, line: &'a str) -> Result<&'a str, Rejection> {
        let reject = |kind| Rejection {
            kind,
            last: self.last,
        };
        let star = line.find('*');
        let body_end = star.unwrap_or(line.len());

        let Some(numbered) = line.trim_start().strip_prefix('N') else {
            return match star {
                Some(_) => Err(reject(RejectionKind::NoLineNumber)),
                None => Ok(line.trim()),
            };
        };

        let (n, len) = leading_int(numbered);
        if n != self.last + 1 && !mentions_m110(line) {
            return Err(reject(RejectionKind::LineNumber));
        }

        let Some(star) = star else {
            return Err(reject(RejectionKind::NoChecksum));
        };
        let (expected, _) = leading_int(&line[star + 1..]);
        if expected != checksum(line[..star].as_bytes()) as i64 {
            return Err(reject(RejectionKind::ChecksumMismatch));
        }

        self.last = n;
        let body_start = line.len() - numbered.len() + len;
        if body_start >= body_end {
            return Ok("");
        }
        Ok(line[body_start..body_end].trim())
    }
}

/// Turns bytes from the serial link and from stored media into command lines.
#[derive(Debug, Default)]
pub struct Framer {
    serial: LineAssembler,
    media: LineAssembler,
    pub sequence: SequenceTracker,
}

impl Framer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one byte from the serial link. Returns something when the byte ends
    /// a non-empty line: either the validated command or the reason it was
    /// rejected.
    pub fn push_serial(&mut self, byte: u8) -> Option<Result<CommandLine, Rejection>> {
        let raw = self.serial.push(byte)?;
        let result = self.sequence.validate(raw.as_str()).map(|body| line(body, Source::Serial));
        match &result {
            Ok(l) if l.text.is_empty() => return None,
            Err(r) => log::warn!("rejected {:?}: {:?}", raw.as_str(), r.kind),
            _ => {}
        }
        Some(result)
    }

    /// Feeds one byte from stored media. Media lines are not validated.
    pub fn push_media(&mut self, byte: u8) -> Option<CommandLine> {
        let raw = self.media.push(byte)?;
        Some(line(raw.trim(), Source::Media)).filter(|l| !l.text.is_empty())
    }

    /// Finishes a media line that was cut off by the end of the file.
    pub fn finish_media(&mut self) -> Option<CommandLine> {
        let raw = self.media.finish()?;
        Some(line(raw.trim(), Source::Media)).filter(|l| !l.text.is_empty())
    }

    /// Is there no partly received serial line? Media is only read when this holds.
    pub fn serial_idle(&self) -> bool {
        self.serial.is_empty()
    }
}

fn line(text: &str, source: Source) -> CommandLine {
    let mut buf = LineText::new();
    // `text` is a slice of an assembled line, so it fits.
    let _ = buf.push_str(text);
    CommandLine { text: buf, source }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn with_checksum(line: &str) -> String {
        format!("{line}*{}", checksum(line.as_bytes()))
    }

    fn feed(framer: &mut Framer, text: &str) -> Vec<Result<CommandLine, Rejection>> {
        text.bytes().filter_map(|b| framer.push_serial(b)).collect()
    }

    fn tracker_at(last: i64) -> SequenceTracker {
        let mut t = SequenceTracker::default();
        t.reset(last);
        t
    }

    #[test]
    fn numbered_line_after_last_is_accepted() {
        let mut t = tracker_at(4);
        let line = with_checksum("N5 G1 X10");
        assert_eq!(t.validate(&line), Ok("G1 X10"));
        assert_eq!(t.last(), 5);
    }

    #[test]
    fn skipped_line_asks_for_resend() {
        let mut t = tracker_at(4);
        let line = with_checksum("N7 G1 X10");
        let r = t.validate(&line).unwrap_err();
        assert_eq!(r.kind, RejectionKind::LineNumber);
        assert!(r.needs_resend());
        assert_eq!(r.last + 1, 5);
        assert_eq!(t.last(), 4);
    }

    #[test]
    fn m110_skips_line_check() {
        let mut t = tracker_at(40);
        let line = with_checksum("N0 M110 N0");
        assert_eq!(t.validate(&line), Ok("M110 N0"));
        assert_eq!(t.last(), 0);
    }

    #[test]
    fn checksum_rules() {
        let mut t = tracker_at(0);
        assert_eq!(
            t.validate("N1 G28").unwrap_err().kind,
            RejectionKind::NoChecksum
        );
        assert_eq!(
            t.validate("N1 G28*0").unwrap_err().kind,
            RejectionKind::ChecksumMismatch
        );
        let r = t.validate("G28*12").unwrap_err();
        assert_eq!(r.kind, RejectionKind::NoLineNumber);
        assert!(!r.needs_resend());
        assert_eq!(t.validate("G28"), Ok("G28"));
        assert_eq!(t.last(), 0);
    }

    #[test]
    fn save_and_restore() {
        let mut t = tracker_at(12);
        t.save();
        t.reset(20);
        assert_eq!(t.restore(), 13);
        assert_eq!(t.last(), 12);
    }

    #[test]
    fn framing() {
        let mut framer = Framer::new();
        let lines = feed(&mut framer, "G28 ; home\r\n\nG1 X1:G1 X2\n;just a comment\n");
        let texts: Vec<&str> = lines
            .iter()
            .map(|l| l.as_ref().unwrap().as_str())
            .collect();
        assert_eq!(texts, ["G28", "G1 X1", "G1 X2"]);
        assert!(framer.serial_idle());
    }

    #[test]
    fn colon_inside_comment_does_not_split() {
        let mut framer = Framer::new();
        let lines = feed(&mut framer, "M117 hi ; time: 5\n");
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].as_ref().unwrap().as_str(), "M117 hi");
    }

    #[test]
    fn overlong_line_is_cut() {
        let mut framer = Framer::new();
        let long = "G1 ".to_string() + &"X".repeat(200) + "\n";
        let lines = feed(&mut framer, &long);
        assert!(lines.len() >= 2);
        assert!(lines
            .iter()
            .all(|l| l.as_ref().unwrap().text.len() < MAX_CMD_SIZE));
    }

    #[test]
    fn media_lines_skip_validation() {
        let mut framer = Framer::new();
        let lines: Vec<CommandLine> = "N99 G1 X1*5\nG1 X2"
            .bytes()
            .filter_map(|b| framer.push_media(b))
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0].as_str(), "N99 G1 X1*5");
        assert_eq!(lines[0].source, Source::Media);
        assert_eq!(framer.finish_media().unwrap().as_str(), "G1 X2");
        assert_eq!(framer.sequence.last(), 0);
    }

    proptest! {
        #[test]
        fn next_line_number_accepted(last in 0i64..100_000, x in -500i32..500) {
            let mut t = tracker_at(last);
            let line = with_checksum(&format!("N{} G1 X{x}", last + 1));
            prop_assert!(t.validate(&line).is_ok());
            prop_assert_eq!(t.last(), last + 1);
        }

        #[test]
        fn other_line_numbers_rejected(last in 0i64..100_000, n in 0i64..200_000, x in -500i32..500) {
            prop_assume!(n != last + 1);
            let mut t = tracker_at(last);
            let line = with_checksum(&format!("N{n} G1 X{x}"));
            let r = t.validate(&line).unwrap_err();
            prop_assert_eq!(r.kind, RejectionKind::LineNumber);
            prop_assert_eq!(r.last + 1, last + 1);
        }

        #[test]
        fn corrupted_line_rejected(
            x in -500i32..500,
            idx in any::<prop::sample::Index>(),
            replacement in proptest::char::range('!', '~'),
        ) {
            prop_assume!(!matches!(replacement, '*' | ';' | ':'));
            let good = format!("N1 G1 X{x} Y2");
            let pos = idx.index(good.len());
            prop_assume!(good.as_bytes()[pos] != replacement as u8);

            let mut bad = good.clone().into_bytes();
            bad[pos] = replacement as u8;
            let bad = String::from_utf8(bad).unwrap();
            let line = format!("{bad}*{}", checksum(good.as_bytes()));

            let mut t = tracker_at(0);
            prop_assert!(t.validate(&line).is_err());
        }
    }
}
